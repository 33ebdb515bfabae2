mod common;

use common::*;
use zenpixmap::*;

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn frame(source: &mut ImageSource<'_>, index: u32) -> PixelMap {
    source
        .create_pixel_map(index, &straight(), &Unstoppable)
        .unwrap()
}

#[test]
fn animation_metadata() {
    let bytes = gif_animation();
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    assert_eq!(source.format(), Some(ImageFormat::Gif));
    assert_eq!(source.frame_count().unwrap(), 3);
    assert_eq!(source.delay_times().unwrap(), vec![50, 100, 20]);
    assert_eq!(source.loop_count().unwrap(), LoopCount::Infinite);
    assert!(source.image_info().unwrap().has_alpha);
}

#[test]
fn frames_composite_in_order() {
    let bytes = gif_animation();
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();

    let f0 = frame(&mut source, 0);
    assert!((0..4).all(|y| (0..4).all(|x| f0.pixel(x, y).unwrap() == RED)));

    let f1 = frame(&mut source, 1);
    assert_eq!(f1.pixel(0, 0).unwrap(), RED);
    assert_eq!(f1.pixel(1, 1).unwrap(), GREEN);
    assert_eq!(f1.pixel(2, 2).unwrap(), GREEN);
    assert_eq!(f1.pixel(3, 3).unwrap(), RED);

    let f2 = frame(&mut source, 2);
    assert_eq!(f2.pixel(0, 0).unwrap(), BLUE);
    // Transparent index leaves the previous frame showing.
    assert_eq!(f2.pixel(1, 0).unwrap(), RED);
    // Frame 1's area was disposed to the background.
    assert_ne!(f2.pixel(1, 1).unwrap(), GREEN);
    assert_eq!(f2.pixel(3, 3).unwrap(), RED);
}

#[test]
fn random_access_matches_sequential() {
    let bytes = gif_animation();
    let registry = CodecRegistry::with_builtin();

    let mut sequential = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    let in_order: Vec<PixelMap> = (0..3).map(|i| frame(&mut sequential, i)).collect();

    let mut direct = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    assert!(frame(&mut direct, 2).is_same_image(&in_order[2]));
    // Going backwards rebuilds the canvas from the first frame.
    assert!(frame(&mut direct, 0).is_same_image(&in_order[0]));
    assert!(frame(&mut direct, 1).is_same_image(&in_order[1]));
    // Repeating a frame renders it again unchanged.
    assert!(frame(&mut direct, 1).is_same_image(&in_order[1]));
}

#[test]
fn frame_past_the_end() {
    let bytes = gif_animation();
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    let err = source
        .create_pixel_map(3, &DecodeOptions::new(), &Unstoppable)
        .unwrap_err();
    assert!(matches!(err, ImageError::FrameOutOfRange { index: 3, count: 3 }));
}

struct AlreadyCancelled;

impl Stop for AlreadyCancelled {
    fn check(&self) -> Result<(), StopReason> {
        Err(StopReason::Cancelled)
    }
}

#[test]
fn cancelled_decode_is_reported() {
    let bytes = gif_animation();
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    let err = source
        .create_pixel_map(2, &DecodeOptions::new(), &AlreadyCancelled)
        .unwrap_err();
    assert!(matches!(err, ImageError::Cancelled(_)));
    assert!(err.is_retryable());
}
