mod common;

use common::*;
use zenpixmap::*;

fn rgba_of(bytes: &[u8]) -> Vec<u8> {
    decode(bytes, &straight()).unwrap().pixels().to_vec()
}

#[test]
fn sixteen_bit_rgb_keeps_the_high_byte() {
    let (w, h) = (5, 3);
    let layout = PngLayout::new(w, h, 16, 2);
    let sample = |x: u32, y: u32| vec![(x * 4000 + 0x12) as u16, (y * 9000 + 0x34) as u16, 0xABCD];
    let bytes = png_with(&layout, sample);
    let mut expected = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let s = sample(x, y);
            expected.extend_from_slice(&[(s[0] >> 8) as u8, (s[1] >> 8) as u8, 0xAB, 255]);
        }
    }
    assert_eq!(rgba_of(&bytes), expected);
}

#[test]
fn packed_gray_scales_to_full_range() {
    let (w, h) = (11, 3);
    for (depth, scale) in [(1u8, 255u8), (2, 85), (4, 17)] {
        let levels = 1u32 << depth;
        let layout = PngLayout::new(w, h, depth, 0);
        let bytes = png_with(&layout, |x, y| vec![((x + y) % levels) as u16]);
        let mut expected = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let g = ((x + y) % levels) as u8 * scale;
                expected.extend_from_slice(&[g, g, g, 255]);
            }
        }
        assert_eq!(rgba_of(&bytes), expected, "depth {depth}");
    }
}

#[test]
fn palette_alpha_comes_from_trns() {
    let palette = [255, 0, 0, 0, 255, 0, 0, 0, 255, 9, 9, 9];
    // Shorter than the palette: later entries stay opaque.
    let trns = [0, 128];
    let (w, h) = (7, 2);
    let layout = PngLayout {
        palette: Some(&palette[..]),
        trns: Some(&trns[..]),
        ..PngLayout::new(w, h, 2, 3)
    };
    let bytes = png_with(&layout, |x, y| vec![((x + y) % 4) as u16]);
    let map = decode(&bytes, &straight()).unwrap();
    assert_eq!(map.alpha_type(), AlphaType::Unpremul);
    for y in 0..h {
        for x in 0..w {
            let i = ((x + y) % 4) as usize;
            let rgb = &palette[i * 3..i * 3 + 3];
            let a = trns.get(i).copied().unwrap_or(255);
            assert_eq!(map.pixel(x, y).unwrap(), [rgb[0], rgb[1], rgb[2], a], "({x}, {y})");
        }
    }
}

#[test]
fn interlaced_png_matches_the_pattern() {
    init_logging();
    // The small sizes leave some passes empty.
    for (w, h) in [(13, 11), (3, 2), (1, 1)] {
        let rgba = pattern(w, h, true);
        let layout = PngLayout {
            interlaced: true,
            ..PngLayout::new(w, h, 8, 6)
        };
        let bytes = png_with(&layout, |x, y| {
            let at = ((y * w + x) * 4) as usize;
            rgba[at..at + 4].iter().map(|&c| u16::from(c)).collect()
        });
        assert_eq!(rgba_of(&bytes), rgba, "{w}x{h}");
    }
}

#[test]
fn interlaced_staging_counts_against_limits() {
    let limits = Limits::default().with_max_alloc(4096);
    let registry = CodecRegistry::with_builtin();
    let opts = straight().with_desired_size(Size::new(1, 1));

    let big = png_from_raw(
        &PngLayout {
            interlaced: true,
            ..PngLayout::new(2048, 2048, 8, 0)
        },
        &[],
    );
    let options = SourceOptions::new().with_limits(limits.clone());
    let mut source = ImageSource::from_bytes(&registry, &big, options).unwrap();
    assert!(matches!(
        source.create_pixel_map(0, &opts, &Unstoppable),
        Err(ImageError::LimitExceeded(_))
    ));

    let layout = PngLayout {
        interlaced: true,
        ..PngLayout::new(16, 16, 8, 0)
    };
    let small = png_with(&layout, |x, y| vec![(x * 16 + y) as u16]);
    let options = SourceOptions::new().with_limits(limits);
    let mut source = ImageSource::from_bytes(&registry, &small, options).unwrap();
    let map = source.create_pixel_map(0, &opts, &Unstoppable).unwrap();
    assert_eq!(map.size(), Size::new(1, 1));
}
