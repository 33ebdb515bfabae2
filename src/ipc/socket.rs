//! Parcel transport over a Unix stream socket.
//!
//! Frame: `PXMP`, data length (u32 LE), descriptor count (u32 LE), then the
//! data bytes. The descriptors ride as `SCM_RIGHTS` ancillary data on the
//! 12-byte frame header.
#![allow(unsafe_code)]

use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use log::{debug, warn};

use super::{MAX_MARSHAL_BYTES, MessageParcel};
use crate::error::ImageError;

const MAGIC: [u8; 4] = *b"PXMP";
const HEADER_LEN: usize = 12;
/// Descriptors accepted in one frame.
pub const MAX_FDS: usize = 16;
/// Parcel data bytes accepted in one frame: a full inline PixelMap plus
/// its metadata.
const MAX_DATA: usize = MAX_MARSHAL_BYTES + 4096;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

/// Control buffer for `n` descriptors, aligned for `cmsghdr`.
// CMSG_SPACE is a safe fn on some targets and unsafe on others.
#[allow(unused_unsafe)]
fn control_buffer(n: usize) -> (Vec<u64>, usize) {
    // SAFETY: pure arithmetic.
    let space = unsafe { libc::CMSG_SPACE((n * size_of::<RawFd>()) as u32) } as usize;
    (vec![0u64; space.div_ceil(size_of::<u64>())], space)
}

/// `sendmsg` of `bytes` with `fds` attached. Returns bytes sent.
fn send_with_fds(sock: &UnixStream, bytes: &[u8], fds: &[BorrowedFd<'_>]) -> Result<usize, ImageError> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut libc::c_void,
        iov_len: bytes.len(),
    };
    // SAFETY: an all-zero msghdr is a valid empty message.
    let mut msg: libc::msghdr = unsafe { core::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    let (mut control, space) = control_buffer(fds.len());
    if !fds.is_empty() {
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;
        // SAFETY: msg_control points at `space` writable, aligned bytes, enough
        // for one header and `fds.len()` descriptors.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if cmsg.is_null() {
                return Err(ImageError::Parcel("no room for control message".into()));
            }
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * size_of::<RawFd>()) as u32) as _;
            let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
            for (i, fd) in fds.iter().enumerate() {
                data.add(i).write_unaligned(fd.as_raw_fd());
            }
        }
    }
    // SAFETY: `msg` and everything it points to outlive the call.
    let n = unsafe { libc::sendmsg(sock.as_raw_fd(), &msg, SEND_FLAGS) };
    if n < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(n as usize)
}

/// `recvmsg` into `buf`, collecting any descriptors. Returns bytes read.
fn recv_with_fds(sock: &UnixStream, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> Result<usize, ImageError> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let (mut control, space) = control_buffer(MAX_FDS);
    // SAFETY: an all-zero msghdr is a valid empty message.
    let mut msg: libc::msghdr = unsafe { core::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    // SAFETY: `msg` describes live buffers of the advertised sizes.
    let n = unsafe { libc::recvmsg(sock.as_raw_fd(), &mut msg, RECV_FLAGS) };
    if n < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    // SAFETY: the kernel filled `msg_controllen` bytes of well-formed control
    // messages; each SCM_RIGHTS payload is an array of fresh descriptors
    // now owned by this process.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..payload / size_of::<RawFd>() {
                    fds.push(OwnedFd::from_raw_fd(data.add(i).read_unaligned()));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }
    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        // The descriptors that did arrive close when `fds` drops.
        return Err(ImageError::Parcel(alloc::format!(
            "more than {MAX_FDS} descriptors in one frame"
        )));
    }
    Ok(n as usize)
}

/// Send `parcel` over `sock`. The parcel's descriptors are duplicated by
/// the kernel; the parcel still owns its copies.
pub fn send_parcel(sock: &UnixStream, parcel: &MessageParcel) -> Result<(), ImageError> {
    let data = parcel.data();
    let fds: Vec<BorrowedFd<'_>> = parcel.fds().collect();
    if fds.len() > MAX_FDS || data.len() > MAX_DATA {
        return Err(ImageError::Parcel(alloc::format!(
            "parcel of {} bytes and {} descriptors is too large to send",
            data.len(),
            fds.len()
        )));
    }
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    header[4..8].copy_from_slice(&(data.len() as u32).to_le_bytes());
    header[8..12].copy_from_slice(&(fds.len() as u32).to_le_bytes());

    let sent = send_with_fds(sock, &header, &fds)?;
    let mut writer = sock;
    writer.write_all(&header[sent..])?;
    writer.write_all(data)?;
    writer.flush()?;
    debug!("sent parcel: {} bytes, {} descriptors", data.len(), fds.len());
    Ok(())
}

/// Receive one parcel sent by [`send_parcel`].
pub fn recv_parcel(sock: &UnixStream) -> Result<MessageParcel, ImageError> {
    let mut header = [0u8; HEADER_LEN];
    let mut fds = Vec::new();
    let got = recv_with_fds(sock, &mut header, &mut fds)?;
    if got == 0 {
        return Err(ImageError::Parcel("peer closed the socket".into()));
    }
    let mut reader = sock;
    reader.read_exact(&mut header[got..])?;

    if header[..4] != MAGIC {
        return Err(ImageError::Parcel("bad frame magic".into()));
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let count = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if count != fds.len() {
        warn!("frame announced {count} descriptors, {} arrived", fds.len());
        return Err(ImageError::Parcel(alloc::format!(
            "expected {count} descriptors, received {}",
            fds.len()
        )));
    }
    if len > MAX_DATA {
        return Err(ImageError::Parcel(alloc::format!("{len} byte frame too large")));
    }
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| ImageError::MallocAbnormal(len))?;
    data.resize(len, 0);
    reader.read_exact(&mut data)?;
    debug!("received parcel: {len} bytes, {count} descriptors");
    Ok(MessageParcel::from_parts(data, fds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_parcel_crosses_socket() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut parcel = MessageParcel::new();
        parcel.write_i32(42);
        parcel.write_bytes(b"pixels").unwrap();
        send_parcel(&a, &parcel).unwrap();
        let mut got = recv_parcel(&b).unwrap();
        assert_eq!(got.read_i32().unwrap(), 42);
        assert_eq!(got.read_bytes(6).unwrap(), b"pixels");
        assert_eq!(got.fd_count(), 0);
    }

    #[test]
    fn descriptors_cross_socket() {
        let (a, b) = UnixStream::pair().unwrap();
        let (mut pipe_w, pipe_r) = UnixStream::pair().unwrap();
        let mut parcel = MessageParcel::new();
        parcel.write_fd(OwnedFd::from(pipe_r));
        send_parcel(&a, &parcel).unwrap();
        drop(parcel);

        let mut got = recv_parcel(&b).unwrap();
        assert_eq!(got.fd_count(), 1);
        let mut received = UnixStream::from(got.take_fd().unwrap());
        pipe_w.write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        received.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn garbage_frame_is_rejected() {
        let (mut a, b) = UnixStream::pair().unwrap();
        a.write_all(b"NOPE\0\0\0\0\0\0\0\0").unwrap();
        assert!(matches!(recv_parcel(&b), Err(ImageError::Parcel(_))));
    }
}
