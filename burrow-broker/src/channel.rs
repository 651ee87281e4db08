//! Handle-passing channel
//!
//! A connected `AF_UNIX` `SOCK_SEQPACKET` socket carrying one payload plus
//! any number of kernel handles per message, atomically, using
//! `SCM_RIGHTS` control messages. Message boundaries are preserved, so each
//! send is matched by exactly one receive.

#![allow(unsafe_code)]

use std::io;
use std::mem::{self, size_of};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use burrow_core::{Error, Result};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, getsockopt, socketpair, sockopt};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

/// Upper bound of handles accepted in a single message
pub const MAX_HANDLES: usize = 16;

/// A received message: payload length and the handles that came with it
#[derive(Debug)]
pub struct Received {
    /// Number of payload bytes written into the receive buffer
    pub len: usize,
    /// Received handles, all close-on-exec
    pub handles: Vec<OwnedFd>,
}

/// One end of a connected handle-passing channel
#[derive(Debug)]
pub struct HandleChannel {
    fd: AsyncFd<OwnedFd>,
}

impl HandleChannel {
    /// Create a connected pair of raw, blocking, close-on-exec socket ends.
    ///
    /// Use this when one end is to be handed to another process; wrap ends
    /// to be used in this process with [`HandleChannel::from_fd`].
    pub fn socketpair() -> Result<(OwnedFd, OwnedFd)> {
        socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| Error::channel(format!("cannot create socket pair: {e}")))
    }

    /// Create a connected pair of channel ends for use in this process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = Self::socketpair()?;
        Ok((Self::from_fd(left)?, Self::from_fd(right)?))
    }

    /// Take ownership of a connected socket and use it as a channel end.
    ///
    /// The descriptor is closed if it isn't a sequenced-packet socket or
    /// can't be registered with the runtime. Must be called from within a
    /// tokio runtime.
    pub fn from_fd(fd: OwnedFd) -> Result<Self> {
        let raw = fd.as_raw_fd();

        let sock_type = getsockopt(&fd, sockopt::SockType)
            .map_err(|e| Error::channel(format!("descriptor {raw} is not a socket: {e}")))?;
        if sock_type != SockType::SeqPacket {
            return Err(Error::channel(format!(
                "descriptor {raw} is not a sequenced-packet socket"
            )));
        }

        let flags = OFlag::from_bits_retain(fcntl(&fd, FcntlArg::F_GETFL)?);
        fcntl(&fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Send one payload together with the passed handles.
    ///
    /// The handles are only borrowed: the caller still owns (and eventually
    /// closes) them.
    pub async fn send(&self, payload: &[u8], handles: &[BorrowedFd<'_>]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::channel("refusing to send an empty payload"));
        }
        if handles.len() > MAX_HANDLES {
            return Err(Error::channel(format!(
                "cannot send {} handles in a single message",
                handles.len()
            )));
        }
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| send_with_handles(inner.as_raw_fd(), payload, handles)) {
                Ok(Ok(sent)) if sent == payload.len() => {
                    trace!(len = sent, handles = handles.len(), "Sent message");
                    return Ok(());
                }
                Ok(Ok(sent)) => {
                    return Err(Error::channel(format!(
                        "short send of {sent} out of {} bytes",
                        payload.len()
                    )));
                }
                Ok(Err(e)) => return Err(map_io_error(e)),
                Err(_would_block) => {}
            }
        }
    }

    /// Receive one message into `buf`, accepting up to `max_handles` handles.
    ///
    /// Fails with [`Error::Disconnected`] when the peer has closed its end,
    /// and with [`Error::DeadlineExceeded`] when `deadline` passes first.
    pub async fn receive(
        &self,
        buf: &mut [u8],
        max_handles: usize,
        deadline: Option<Duration>,
    ) -> Result<Received> {
        let max_handles = max_handles.min(MAX_HANDLES);
        let message = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.recv_message(buf, max_handles))
                .await
                .map_err(|_| Error::DeadlineExceeded)??,
            None => self.recv_message(buf, max_handles).await?,
        };

        if message.len == 0 && message.handles.is_empty() {
            debug!("Channel peer disconnected");
            return Err(Error::Disconnected);
        }
        if message.flags & libc::MSG_TRUNC != 0 {
            return Err(Error::channel("message truncated"));
        }
        if message.flags & libc::MSG_CTRUNC != 0 {
            return Err(Error::channel("handles truncated"));
        }
        trace!(len = message.len, handles = message.handles.len(), "Received message");
        Ok(Received {
            len: message.len,
            handles: message.handles,
        })
    }

    async fn recv_message(&self, buf: &mut [u8], max_handles: usize) -> Result<RawMessage> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recv_with_handles(inner.as_raw_fd(), buf, max_handles)) {
                Ok(result) => return result.map_err(map_io_error),
                Err(_would_block) => {}
            }
        }
    }

}

impl AsFd for HandleChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.get_ref().as_fd()
    }
}

fn map_io_error(err: io::Error) -> Error {
    match err.raw_os_error() {
        Some(libc::EPIPE | libc::ECONNRESET) => Error::Disconnected,
        _ => Error::channel(err.to_string()),
    }
}

struct RawMessage {
    len: usize,
    flags: libc::c_int,
    handles: Vec<OwnedFd>,
}

/// Control buffer for `count` descriptors, aligned for `cmsghdr`.
fn control_buffer(count: usize) -> (Vec<u64>, usize) {
    #[allow(clippy::cast_possible_truncation)]
    // SAFETY: CMSG_SPACE only computes a size.
    let space = unsafe { libc::CMSG_SPACE((count * size_of::<RawFd>()) as u32) } as usize;
    (vec![0u64; space.div_ceil(size_of::<u64>())], space)
}

fn send_with_handles(fd: RawFd, payload: &[u8], handles: &[BorrowedFd<'_>]) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr().cast_mut().cast(),
        iov_len: payload.len(),
    };
    // SAFETY: an all-zero msghdr is a valid empty message header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;

    let (mut control, space) = control_buffer(handles.len());
    if !handles.is_empty() {
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;
        #[allow(clippy::cast_possible_truncation)]
        let data_len = (handles.len() * size_of::<RawFd>()) as u32;
        // SAFETY: the control buffer has room for one header plus all
        // descriptors, as computed by CMSG_SPACE.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(data_len) as _;
            let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
            for (i, handle) in handles.iter().enumerate() {
                ptr::write_unaligned(data.add(i), handle.as_raw_fd());
            }
        }
    }

    // SAFETY: msg references live buffers for the duration of the call.
    let sent = unsafe { libc::sendmsg(fd, &raw const msg, libc::MSG_NOSIGNAL) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::cast_sign_loss)]
    let sent = sent as usize;
    Ok(sent)
}

fn recv_with_handles(fd: RawFd, buf: &mut [u8], max_handles: usize) -> io::Result<RawMessage> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: an all-zero msghdr is a valid empty message header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;

    let (mut control, space) = control_buffer(max_handles);
    if max_handles > 0 {
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;
    }

    // SAFETY: msg references live buffers for the duration of the call.
    let received = unsafe { libc::recvmsg(fd, &raw mut msg, libc::MSG_CMSG_CLOEXEC) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut handles = Vec::new();
    // SAFETY: the kernel filled in the control buffer and msg_controllen;
    // every SCM_RIGHTS descriptor received is now owned by this process.
    unsafe {
        let header_len = libc::CMSG_LEN(0) as usize;
        let mut cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header_len) / size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..count {
                    handles.push(OwnedFd::from_raw_fd(ptr::read_unaligned(data.add(i))));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&raw const msg, cmsg);
        }
    }

    #[allow(clippy::cast_sign_loss)]
    let len = received as usize;
    Ok(RawMessage {
        len,
        flags: msg.msg_flags,
        handles,
    })
}
