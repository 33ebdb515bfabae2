#!/usr/bin/env -S cargo +nightly -Zscript
//! Generate seed corpus files for fuzzing.
//! Run: cargo +nightly -Zscript fuzz/generate_seeds.rs

fn main() {
    use std::fs;
    for dir in ["fuzz/corpus/fuzz_decode", "fuzz/corpus/fuzz_incremental"] {
        fs::create_dir_all(dir).unwrap();

        // Minimal BMP 1x1 24-bit
        let mut bmp = vec![0u8; 58]; // 54 header + 4 pixel (3 + 1 padding)
        bmp[0] = b'B'; bmp[1] = b'M';
        bmp[2..6].copy_from_slice(&58u32.to_le_bytes()); // file size
        bmp[10..14].copy_from_slice(&54u32.to_le_bytes()); // data offset
        bmp[14..18].copy_from_slice(&40u32.to_le_bytes()); // DIB header size
        bmp[18..22].copy_from_slice(&1i32.to_le_bytes()); // width
        bmp[22..26].copy_from_slice(&1i32.to_le_bytes()); // height
        bmp[26..28].copy_from_slice(&1u16.to_le_bytes()); // planes
        bmp[28..30].copy_from_slice(&24u16.to_le_bytes()); // bpp
        bmp[54] = 0xff; bmp[55] = 0x00; bmp[56] = 0x00; // BGR
        fs::write(format!("{dir}/bmp_1x1.bmp"), bmp).unwrap();

        // WBMP 8x2, checkerboard rows
        fs::write(format!("{dir}/wbmp_8x2.wbmp"), [0, 0, 8, 2, 0xAA, 0x55]).unwrap();

        // GIF 1x1, one red pixel
        let gif: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\x00\x00\x00\x00\x00\
            \x2c\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02\x44\x01\x00\x3b";
        fs::write(format!("{dir}/gif_1x1.gif"), gif).unwrap();

        // TIFF header with an empty IFD
        fs::write(format!("{dir}/tiff_empty.dng"), b"II*\0\x08\0\0\0\0\0\0\0\0\0").unwrap();

        // Truncated/malformed seeds for edge coverage
        fs::write(format!("{dir}/empty.bin"), b"").unwrap();
        fs::write(format!("{dir}/png_sig.bin"), b"\x89PNG\r\n\x1a\n").unwrap();
        fs::write(format!("{dir}/bm_short.bin"), b"BM\x00\x00").unwrap();
        fs::write(format!("{dir}/riff_short.bin"), b"RIFF\x10\0\0\0WEBPVP8L").unwrap();
        fs::write(format!("{dir}/ftyp_heic.bin"), b"\0\0\0\x10ftypheic\0\0\0\0").unwrap();
    }

    println!("Generated seed corpus in fuzz/corpus/");
}
