#![no_main]
use libfuzzer_sys::fuzz_target;
use zenpixmap::*;

fuzz_target!(|data: &[u8]| {
    let registry = CodecRegistry::with_builtin();
    let options = SourceOptions::new().with_limits(Limits::default().with_max_pixels(1 << 22));
    let Ok(mut source) = ImageSource::from_bytes(&registry, data, options) else {
        return;
    };
    // Header queries and every frame must never panic
    let _ = source.image_info();
    let _ = source.delay_times();
    let _ = source.loop_count();
    let frames = source.frame_count().unwrap_or(1).min(4);
    for index in 0..frames {
        let opts = DecodeOptions::new().with_allow_partial_image(true);
        let _ = source.create_pixel_map(index, &opts, &enough::Unstoppable);
    }
});
