//! Netlink implementation of the kernel channel.
//!
//! Commands are a single `nlmsghdr` followed by the action index as a
//! NUL-terminated ASCII decimal string, which the module parses with
//! `kstrtol`. Statistics arrive as one `nlmsghdr` whose payload is decoded by
//! [`decode_payload`].

use super::record::{decode_payload, StatRecord};
use super::KernelChannel;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::types::Action;
use async_trait::async_trait;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tracing::{debug, info};

/// Size of `struct nlmsghdr`.
const NLMSG_HDRLEN: usize = 16;

/// `NLMSG_ERROR` message type.
const NLMSG_ERROR: u16 = 2;

const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Netlink socket bound to the mimic kernel module.
#[derive(Debug)]
pub struct NetlinkChannel {
    fd: Option<AsyncFd<OwnedFd>>,
    port_id: u32,
    seq: u32,
    num_fields: usize,
    nchoices: usize,
    opened_at: Instant,
    buf: Vec<u8>,
}

impl NetlinkChannel {
    /// Opens and binds a netlink socket for the configured protocol family.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::unavailable` if the protocol family is not
    /// registered (module not loaded) or the socket cannot be bound.
    pub fn open(
        config: &ChannelConfig,
        num_fields: usize,
        nchoices: usize,
    ) -> Result<Self, ChannelError> {
        // SAFETY: socket(2) has no memory-safety preconditions; ownership of
        // the returned descriptor is taken immediately below.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                config.protocol,
            )
        };
        if raw < 0 {
            return Err(ChannelError::unavailable(format!(
                "socket(AF_NETLINK, {}): {}",
                config.protocol,
                io::Error::last_os_error()
            )));
        }
        // SAFETY: `raw` is a freshly created, valid descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr = netlink_addr();
        // SAFETY: `addr` is a valid sockaddr_nl and the length matches its type.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(ChannelError::unavailable(format!(
                "bind: {}",
                io::Error::last_os_error()
            )));
        }

        let mut len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        // SAFETY: `addr` and `len` are valid for writes of a sockaddr_nl.
        let rc = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                std::ptr::addr_of_mut!(addr).cast::<libc::sockaddr>(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(ChannelError::io(
                "getsockname",
                io::Error::last_os_error().to_string(),
            ));
        }

        let fd = AsyncFd::new(fd).map_err(|e| ChannelError::io("register", e.to_string()))?;

        info!(
            protocol = config.protocol,
            port_id = addr.nl_pid,
            "netlink channel opened"
        );

        Ok(Self {
            fd: Some(fd),
            port_id: addr.nl_pid,
            seq: 0,
            num_fields,
            nchoices,
            opened_at: Instant::now(),
            buf: vec![0; config.recv_buffer],
        })
    }
}

fn netlink_addr() -> libc::sockaddr_nl {
    // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr
}

/// Encodes a protocol-switch command.
fn encode_command(action: Action, seq: u32, port_id: u32) -> Vec<u8> {
    let payload = format!("{}\0", action.index());
    let len = NLMSG_HDRLEN + payload.len();

    let mut buf = Vec::with_capacity(nlmsg_align(len));
    buf.extend_from_slice(&(len as u32).to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&port_id.to_ne_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf.resize(nlmsg_align(len), 0);
    buf
}

/// Extracts the statistics payload from one received netlink message.
fn parse_message(msg: &[u8], num_fields: usize) -> Result<Vec<f64>, ChannelError> {
    if msg.len() < NLMSG_HDRLEN {
        return Err(ChannelError::decode(format!(
            "message has {} bytes, shorter than a netlink header",
            msg.len()
        )));
    }
    let len = u32::from_ne_bytes([msg[0], msg[1], msg[2], msg[3]]) as usize;
    let kind = u16::from_ne_bytes([msg[4], msg[5]]);
    if len < NLMSG_HDRLEN || len > msg.len() {
        return Err(ChannelError::decode(format!(
            "header length {} does not fit the {} received bytes",
            len,
            msg.len()
        )));
    }
    if kind == NLMSG_ERROR {
        return Err(ChannelError::unavailable("kernel answered with NLMSG_ERROR"));
    }

    decode_payload(&msg[NLMSG_HDRLEN..len], num_fields)
}

fn recv_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), 0) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

async fn read_message(fd: &AsyncFd<OwnedFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = fd.readable().await?;
        match guard.try_io(|inner| recv_raw(inner.get_ref().as_raw_fd(), &mut *buf)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

fn send_raw(fd: RawFd, msg: &[u8]) -> io::Result<usize> {
    let dest = netlink_addr();
    // SAFETY: `msg` is valid for reads and `dest` is a valid sockaddr_nl.
    let n = unsafe {
        libc::sendto(
            fd,
            msg.as_ptr().cast::<libc::c_void>(),
            msg.len(),
            0,
            std::ptr::addr_of!(dest).cast::<libc::sockaddr>(),
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[async_trait]
impl KernelChannel for NetlinkChannel {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<StatRecord>, ChannelError> {
        let Self {
            fd,
            buf,
            num_fields,
            opened_at,
            ..
        } = self;
        let fd = fd.as_ref().ok_or_else(ChannelError::closed)?;

        let n = match tokio::time::timeout(timeout, read_message(fd, buf)).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) => return Err(ChannelError::io("recv", e.to_string())),
            Ok(Ok(0)) => return Err(ChannelError::unavailable("socket closed by peer")),
            Ok(Ok(n)) => n,
        };

        let values = parse_message(&buf[..n], *num_fields)?;
        Ok(Some(StatRecord::new(opened_at.elapsed(), values)))
    }

    async fn send(&mut self, action: Action) -> Result<(), ChannelError> {
        if action.index() >= self.nchoices {
            return Err(ChannelError::invalid_action(action.index(), self.nchoices));
        }
        let fd = self.fd.as_ref().ok_or_else(ChannelError::closed)?;

        self.seq = self.seq.wrapping_add(1);
        let msg = encode_command(action, self.seq, self.port_id);

        loop {
            let mut guard = fd
                .writable()
                .await
                .map_err(|e| ChannelError::io("send", e.to_string()))?;
            match guard.try_io(|inner| send_raw(inner.get_ref().as_raw_fd(), &msg)) {
                Ok(Ok(_)) => break,
                Ok(Err(e)) => return Err(ChannelError::io("send", e.to_string())),
                Err(_would_block) => continue,
            }
        }

        debug!(action = action.index(), seq = self.seq, "protocol switch sent");
        Ok(())
    }

    fn close(&mut self) {
        if self.fd.take().is_some() {
            info!(port_id = self.port_id, "netlink channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_aligned_ascii_payload() {
        let msg = encode_command(Action::new(2), 7, 1234);
        assert_eq!(msg.len() % 4, 0);

        let len = u32::from_ne_bytes([msg[0], msg[1], msg[2], msg[3]]) as usize;
        assert_eq!(len, NLMSG_HDRLEN + 2);
        assert_eq!(&msg[NLMSG_HDRLEN..len], b"2\0");
        assert_eq!(u32::from_ne_bytes([msg[8], msg[9], msg[10], msg[11]]), 7);
        assert_eq!(u32::from_ne_bytes([msg[12], msg[13], msg[14], msg[15]]), 1234);
    }

    #[test]
    fn multi_digit_action_is_decimal() {
        let msg = encode_command(Action::new(12), 1, 0);
        assert_eq!(&msg[NLMSG_HDRLEN..NLMSG_HDRLEN + 3], b"12\0");
    }

    fn stats_message(values: &[u32]) -> Vec<u8> {
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let len = NLMSG_HDRLEN + payload.len();
        let mut msg = Vec::new();
        msg.extend_from_slice(&(len as u32).to_ne_bytes());
        msg.extend_from_slice(&0u16.to_ne_bytes());
        msg.extend_from_slice(&0u16.to_ne_bytes());
        msg.extend_from_slice(&0u32.to_ne_bytes());
        msg.extend_from_slice(&0u32.to_ne_bytes());
        msg.extend_from_slice(&payload);
        msg
    }

    #[test]
    fn parse_message_extracts_fields() {
        let msg = stats_message(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let values = parse_message(&msg, 10).unwrap();
        assert_eq!(values, (1..=10).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn parse_message_rejects_truncated_header() {
        let error = parse_message(&[0u8; 8], 10).unwrap_err();
        assert!(error.is_decode());
    }

    #[test]
    fn parse_message_rejects_inconsistent_length() {
        let mut msg = stats_message(&[1; 10]);
        msg.truncate(30);
        assert!(parse_message(&msg, 10).unwrap_err().is_decode());
    }

    #[test]
    fn parse_message_maps_nlmsg_error_to_unavailable() {
        let mut msg = stats_message(&[0; 10]);
        msg[4..6].copy_from_slice(&NLMSG_ERROR.to_ne_bytes());
        assert!(parse_message(&msg, 10).unwrap_err().is_unavailable());
    }
}
