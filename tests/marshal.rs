#![cfg(unix)]

mod common;

use std::os::unix::net::UnixStream;
use std::thread;

use common::*;
use zenpixmap::ipc::socket::{recv_parcel, send_parcel};
use zenpixmap::*;

fn decoded(allocator: AllocatorType) -> (PixelMap, Vec<u8>) {
    let rgba = pattern(11, 7, true);
    let bytes = png(11, 7, &rgba, 64);
    let opts = straight().with_allocator(allocator).with_base_density(240);
    let map = decode(&bytes, &opts).unwrap();
    assert_eq!(map.allocator_type(), allocator);
    (map, rgba)
}

/// Marshal `map`, push the parcel through a socket pair from another
/// thread, and unmarshal what arrives.
fn transfer(map: &PixelMap) -> PixelMap {
    let (tx, rx) = UnixStream::pair().unwrap();
    let mut parcel = MessageParcel::new();
    map.marshal(&mut parcel).unwrap();
    let sender = thread::spawn(move || send_parcel(&tx, &parcel));
    let mut received = recv_parcel(&rx).unwrap();
    sender.join().unwrap().unwrap();
    PixelMap::unmarshal(&mut received, &Limits::default()).unwrap()
}

#[test]
fn heap_map_crosses_socket() {
    init_logging();
    let (map, rgba) = decoded(AllocatorType::Heap);
    let back = transfer(&map);
    assert!(back.is_same_image(&map));
    assert_eq!(back.allocator_type(), AllocatorType::Heap);
    assert_eq!(back.base_density(), 240);
    assert_eq!(back.alpha_type(), AlphaType::Unpremul);
    assert_eq!(back.pixels(), &rgba[..]);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn shared_map_crosses_socket_without_copying() {
    let (mut map, rgba) = decoded(AllocatorType::SharedMemory);
    let back = transfer(&map);
    assert_eq!(back.allocator_type(), AllocatorType::SharedMemory);
    assert!(back.buffer().fd().is_some());
    assert_eq!(back.pixels(), &rgba[..]);
    // Sender and receiver map the same segment.
    map.pixels_mut()[0] = rgba[0].wrapping_add(1);
    assert_eq!(back.pixels()[0], rgba[0].wrapping_add(1));
}

#[test]
fn unmarshal_respects_limits() {
    let (map, _) = decoded(AllocatorType::Heap);
    let mut parcel = MessageParcel::new();
    map.marshal(&mut parcel).unwrap();
    let limits = Limits::default().with_max_width(10);
    let err = PixelMap::unmarshal(&mut parcel, &limits).unwrap_err();
    assert!(matches!(err, ImageError::LimitExceeded(_)));
}

#[test]
fn unknown_pixel_format_is_rejected() {
    let mut parcel = MessageParcel::new();
    for v in [2, 2, 42, 2, 2, 0, 16, 1] {
        parcel.write_i32(v);
    }
    parcel.write_bytes(&[0; 16]).unwrap();
    let err = PixelMap::unmarshal(&mut parcel, &Limits::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ipc);
}
