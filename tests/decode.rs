mod common;

use common::*;
use zenpixmap::*;

#[test]
fn png_decodes_exactly() {
    init_logging();
    let rgba = pattern(9, 7, true);
    let bytes = png(9, 7, &rgba, 40);
    let map = decode(&bytes, &straight()).unwrap();
    assert_eq!(map.size(), Size::new(9, 7));
    assert_eq!(map.pixel_format(), PixelFormat::Rgba8888);
    assert_eq!(map.alpha_type(), AlphaType::Unpremul);
    assert_eq!(map.row_bytes(), 36);
    assert_eq!(map.pixels(), &rgba[..]);
}

#[test]
fn header_is_read_without_decoding() {
    let bytes = png(300, 200, &pattern(300, 200, false), 4096);
    let registry = CodecRegistry::with_builtin();
    let mut session = registry
        .open(Box::new(BufferSourceStream::new(&bytes)), Limits::default())
        .unwrap();
    assert_eq!(session.format(), ImageFormat::Png);
    assert_eq!(session.state(), DecodeState::SourceInited);
    assert_eq!(session.get_image_size(0).unwrap(), Size::new(300, 200));
    assert_eq!(session.state(), DecodeState::BaseInfoParsed);
    assert!(session.pixels().is_none());
    assert_eq!(session.frame_count().unwrap(), 1);
}

#[test]
fn opaque_image_negotiates_opaque_alpha() {
    let bytes = jpeg_solid(16, 8, [200, 40, 40]);
    let map = decode(&bytes, &DecodeOptions::new().with_alpha_type(AlphaType::Premul)).unwrap();
    assert_eq!(map.alpha_type(), AlphaType::Opaque);
    assert_eq!(map.size(), Size::new(16, 8));
    let [r, g, b, a] = map.pixel(8, 4).unwrap();
    assert!(r.abs_diff(200) <= 8 && g.abs_diff(40) <= 8 && b.abs_diff(40) <= 8);
    assert_eq!(a, 255);
}

#[test]
fn pixel_format_conversion() {
    let rgba = pattern(5, 3, false);
    let bytes = png(5, 3, &rgba, 1024);

    let bgra = decode(&bytes, &straight().with_pixel_format(PixelFormat::Bgra8888)).unwrap();
    assert_eq!(bgra.pixels()[..4], [rgba[2], rgba[1], rgba[0], rgba[3]]);

    let rgb = decode(&bytes, &straight().with_pixel_format(PixelFormat::Rgb888)).unwrap();
    assert_eq!(rgb.row_bytes(), 15);
    assert_eq!(rgb.pixels()[3..6], rgba[4..7]);

    let alpha = decode(&bytes, &DecodeOptions::new().with_pixel_format(PixelFormat::Alpha8)).unwrap();
    assert_eq!(alpha.row_bytes(), 8);
    assert_eq!(alpha.get_pixel8(4, 2).unwrap(), 255);
}

#[test]
fn crop_and_scale() {
    let rgba = pattern(8, 8, false);
    let bytes = png(8, 8, &rgba, 1024);
    let opts = straight().with_crop(Rect::new(2, 3, 4, 4));
    let map = decode(&bytes, &opts).unwrap();
    assert_eq!(map.size(), Size::new(4, 4));
    let at = |x: usize, y: usize| {
        let i = (y * 8 + x) * 4;
        [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]]
    };
    assert_eq!(map.pixel(0, 0).unwrap(), at(2, 3));
    assert_eq!(map.pixel(3, 3).unwrap(), at(5, 6));

    let scaled = decode(&bytes, &straight().with_desired_size(Size::new(4, 2))).unwrap();
    assert_eq!(scaled.size(), Size::new(4, 2));
    assert_eq!(scaled.pixel(0, 0).unwrap(), at(0, 0));
}

#[test]
fn repeated_decode_is_idempotent() {
    let bytes = png(6, 6, &pattern(6, 6, true), 16);
    let registry = CodecRegistry::with_builtin();
    let mut session = registry
        .open(Box::new(BufferSourceStream::new(&bytes)), Limits::default())
        .unwrap();
    session.set_decode_options(0, &straight()).unwrap();
    assert_eq!(session.decode(0, &Unstoppable).unwrap(), DecodeOutcome::Complete);
    let first = session.pixels().unwrap().to_vec();
    assert_eq!(session.decode(0, &Unstoppable).unwrap(), DecodeOutcome::Complete);
    assert_eq!(session.pixels().unwrap(), &first[..]);
    assert_eq!(session.state(), DecodeState::ImageDecoded);
}

#[test]
fn oversized_image_fails_before_allocating() {
    let bytes = png(64, 64, &pattern(64, 64, false), 4096);
    let registry = CodecRegistry::with_builtin();
    let limits = Limits::default().with_max_pixels(1000);
    let mut session = registry
        .open(Box::new(BufferSourceStream::new(&bytes)), limits)
        .unwrap();
    let err = session.set_decode_options(0, &DecodeOptions::new()).unwrap_err();
    assert!(matches!(err, ImageError::LimitExceeded(_)));
    assert_eq!(err.kind(), ErrorKind::TooLarge);
    assert!(session.pixels().is_none());
}

#[test]
fn truncated_png_is_an_error_unless_partial_allowed() {
    let rgba = pattern(16, 16, false);
    let mut bytes = png(16, 16, &rgba, 32);
    bytes.truncate(bytes.len() / 2);

    let err = decode(&bytes, &straight()).unwrap_err();
    assert!(matches!(err, ImageError::UnexpectedEof));

    let map = decode(&bytes, &straight().with_allow_partial_image(true)).unwrap();
    assert_eq!(map.size(), Size::new(16, 16));
    assert_eq!(map.pixels()[..64], rgba[..64]);
    // Rows never reached stay zero.
    assert!(map.pixels()[map.byte_count() - 64..].iter().all(|&b| b == 0));
}

#[test]
fn changed_options_restart_the_session() {
    let bytes = png(4, 4, &pattern(4, 4, false), 1024);
    let registry = CodecRegistry::with_builtin();
    let mut session = registry
        .open(Box::new(BufferSourceStream::new(&bytes)), Limits::default())
        .unwrap();
    session.set_decode_options(0, &straight()).unwrap();
    session.decode(0, &Unstoppable).unwrap();
    let rgb = straight().with_pixel_format(PixelFormat::Rgb888);
    let out = session.set_decode_options(0, &rgb).unwrap();
    assert_eq!(out.pixel_format, PixelFormat::Rgb888);
    assert_eq!(session.state(), DecodeState::ImageDecoding);
    session.decode(0, &Unstoppable).unwrap();
    assert_eq!(session.take_pixel_map().unwrap().row_bytes(), 12);
}

#[test]
fn out_of_bounds_crop_keeps_the_decoded_png() {
    let rgba = pattern(4, 4, false);
    let bytes = png(4, 4, &rgba, 1024);
    let registry = CodecRegistry::with_builtin();
    let mut session = registry
        .open(Box::new(BufferSourceStream::new(&bytes)), Limits::default())
        .unwrap();
    session.set_decode_options(0, &straight()).unwrap();
    session.decode(0, &Unstoppable).unwrap();
    let outside = straight().with_crop(Rect::new(10, 10, 2, 2));
    assert!(matches!(
        session.set_decode_options(0, &outside),
        Err(ImageError::InvalidParameter(_))
    ));
    assert_eq!(session.state(), DecodeState::ImageDecoded);
    assert_eq!(session.pixels().map(<[u8]>::len), Some(64));
    assert_eq!(session.take_pixel_map().unwrap().pixels(), &rgba[..]);
}

#[test]
fn decode_before_options_is_rejected() {
    let bytes = png(2, 2, &pattern(2, 2, false), 1024);
    let registry = CodecRegistry::with_builtin();
    let mut session = registry
        .open(Box::new(BufferSourceStream::new(&bytes)), Limits::default())
        .unwrap();
    assert!(matches!(
        session.decode(0, &Unstoppable),
        Err(ImageError::InvalidState(DecodeState::SourceInited))
    ));
}

#[test]
fn webp_lossless() {
    let rgba = pattern(10, 6, false);
    let map = decode(&webp(10, 6, &rgba), &straight()).unwrap();
    assert_eq!(map.size(), Size::new(10, 6));
    assert_eq!(map.pixels(), &rgba[..]);
}

#[test]
fn bmp_export_decodes_back() {
    let rgba = pattern(7, 5, true);
    let bytes = bmp(7, 5, &rgba);
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    assert_eq!(source.format(), Some(ImageFormat::Bmp));
    assert!(source.image_info().unwrap().has_alpha);
    let map = source.create_pixel_map(0, &straight(), &Unstoppable).unwrap();
    assert_eq!(map.pixels(), &rgba[..]);
}

#[test]
fn wbmp_with_format_hint() {
    // 10x2: row 0 alternates white/black, row 1 is black.
    let bytes = wbmp(10, 2, &[0b1010_1010, 0b1000_0000, 0, 0]);
    let registry = CodecRegistry::with_builtin();
    let opts = SourceOptions::new().with_format_hint(ImageFormat::Wbmp);
    let mut source = ImageSource::from_bytes(&registry, &bytes, opts).unwrap();
    let map = source
        .create_pixel_map(0, &DecodeOptions::new(), &Unstoppable)
        .unwrap();
    assert_eq!(map.alpha_type(), AlphaType::Opaque);
    assert_eq!(map.pixel(0, 0).unwrap(), [255, 255, 255, 255]);
    assert_eq!(map.pixel(1, 0).unwrap(), [0, 0, 0, 255]);
    assert_eq!(map.pixel(8, 0).unwrap(), [255, 255, 255, 255]);
    assert_eq!(map.pixel(9, 0).unwrap(), [0, 0, 0, 255]);
    assert_eq!(map.pixel(0, 1).unwrap(), [0, 0, 0, 255]);
}

#[test]
fn raw_decodes_embedded_preview() {
    let preview = jpeg_solid(24, 16, [30, 90, 220]);
    let bytes = raw_with_preview(&preview);
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    assert_eq!(source.format(), Some(ImageFormat::Raw));
    assert_eq!(source.image_info().unwrap().size, Size::new(24, 16));
    let map = source
        .create_pixel_map(0, &DecodeOptions::new(), &Unstoppable)
        .unwrap();
    let [r, g, b, _] = map.pixel(12, 8).unwrap();
    assert!(r.abs_diff(30) <= 8 && g.abs_diff(90) <= 8 && b.abs_diff(220) <= 8);
}

#[test]
fn unrecognized_bytes() {
    let registry = CodecRegistry::with_builtin();
    let err = ImageSource::from_bytes(&registry, b"\x01\x02definitely not an image", SourceOptions::new())
        .unwrap_err();
    assert!(matches!(err, ImageError::UnrecognizedFormat));
}

#[test]
fn heif_without_backend_reports_size_but_cannot_decode() {
    // ftyp(heic) + meta(hdlr, pitm, iinf/infe hvc1, iloc, iprp/ipco/ispe + ipma)
    let bytes = heif_fixture();
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, &bytes, SourceOptions::new()).unwrap();
    assert_eq!(source.format(), Some(ImageFormat::Heif));
    assert_eq!(source.image_info().unwrap().size, Size::new(64, 48));
    let err = source
        .create_pixel_map(0, &DecodeOptions::new(), &Unstoppable)
        .unwrap_err();
    assert!(matches!(err, ImageError::DecodeAbnormal(_)));
}

#[test]
fn density_falls_back_to_source_options() {
    let bytes = png(2, 2, &pattern(2, 2, false), 1024);
    let registry = CodecRegistry::with_builtin();
    let opts = SourceOptions::new().with_base_density(480);
    let mut source = ImageSource::from_bytes(&registry, &bytes, opts).unwrap();
    let map = source
        .create_pixel_map(0, &DecodeOptions::new(), &Unstoppable)
        .unwrap();
    assert_eq!(map.base_density(), 480);
}

fn heif_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn heif_full_box(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
    let mut full = vec![version, 0, 0, 0];
    full.extend_from_slice(body);
    heif_box(kind, &full)
}

fn heif_fixture() -> Vec<u8> {
    let ftyp = heif_box(b"ftyp", b"heic\0\0\0\0mif1heic");
    let hdlr = heif_full_box(b"hdlr", 0, b"\0\0\0\0pict\0\0\0\0\0\0\0\0\0\0\0\0\0");
    let pitm = heif_full_box(b"pitm", 0, &1u16.to_be_bytes());
    // infe v2: item_ID, protection index, item_type, empty name
    let infe = heif_full_box(b"infe", 2, b"\0\x01\0\0hvc1\0");
    let mut iinf_body = 1u16.to_be_bytes().to_vec();
    iinf_body.extend_from_slice(&infe);
    let iinf = heif_full_box(b"iinf", 0, &iinf_body);

    let data = b"not really hevc";
    let mdat = heif_box(b"mdat", data);
    // iloc v0: offset_size=4 length_size=4, base_offset_size=0
    let mut iloc_body = vec![0x44, 0x00];
    iloc_body.extend_from_slice(&1u16.to_be_bytes()); // item count
    iloc_body.extend_from_slice(&1u16.to_be_bytes()); // item id
    iloc_body.extend_from_slice(&0u16.to_be_bytes()); // data reference index
    iloc_body.extend_from_slice(&1u16.to_be_bytes()); // extent count
    let offset_at = iloc_body.len();
    iloc_body.extend_from_slice(&0u32.to_be_bytes()); // patched below
    iloc_body.extend_from_slice(&(data.len() as u32).to_be_bytes());

    let mut ispe_body = 64u32.to_be_bytes().to_vec();
    ispe_body.extend_from_slice(&48u32.to_be_bytes());
    let ispe = heif_full_box(b"ispe", 0, &ispe_body);
    let ipco = heif_box(b"ipco", &ispe);
    // ipma v0: one item, one association (essential, property 1)
    let ipma = heif_full_box(b"ipma", 0, &[0, 0, 0, 1, 0, 1, 1, 0x81]);
    let mut iprp_body = ipco;
    iprp_body.extend_from_slice(&ipma);
    let iprp = heif_box(b"iprp", &iprp_body);

    let build = |iloc_body: &[u8]| {
        let mut meta_body = hdlr.clone();
        meta_body.extend_from_slice(&pitm);
        meta_body.extend_from_slice(&iinf);
        meta_body.extend_from_slice(&heif_full_box(b"iloc", 0, iloc_body));
        meta_body.extend_from_slice(&iprp);
        let mut file = ftyp.clone();
        file.extend_from_slice(&heif_full_box(b"meta", 0, &meta_body));
        file
    };
    let head_len = build(&iloc_body).len();
    let data_offset = (head_len + 8) as u32;
    iloc_body[offset_at..offset_at + 4].copy_from_slice(&data_offset.to_be_bytes());
    let mut file = build(&iloc_body);
    file.extend_from_slice(&mdat);
    file
}
