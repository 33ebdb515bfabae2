#![no_main]
use libfuzzer_sys::fuzz_target;
use zenpixmap::*;

fuzz_target!(|input: (u8, &[u8])| {
    let (step, data) = input;
    let step = usize::from(step.max(1));
    let registry = CodecRegistry::with_builtin();
    let options = SourceOptions::new().with_limits(Limits::default().with_max_pixels(1 << 22));
    let Ok(mut source) = ImageSource::incremental(&registry, options) else {
        return;
    };
    let Ok(mut pending) = source.create_incremental_pixel_map(0, &DecodeOptions::new()) else {
        return;
    };
    let chunks: Vec<&[u8]> = data.chunks(step).collect();
    let mut last_progress = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        if pending.update_data(chunk, i + 1 == chunks.len()).is_err() {
            return;
        }
        match pending.promote_decoding(&enough::Unstoppable) {
            Ok(progress) => {
                // Progress never moves backwards
                assert!(progress >= last_progress);
                last_progress = progress;
            }
            Err(_) => return,
        }
    }
});
