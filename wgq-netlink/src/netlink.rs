//! Netlink protocol utilities shared by the rtnetlink and generic netlink
//! backends.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};

// Netlink protocols
pub const NETLINK_ROUTE: i32 = 0;
pub const NETLINK_GENERIC: i32 = 16;
pub const AF_NETLINK: i32 = libc::AF_NETLINK;

// Netlink message header flags
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_DUMP: u16 = 0x300;

// Netlink message types
pub const NLMSG_ERROR: u16 = 0x02;
pub const NLMSG_DONE: u16 = 0x03;

// Netlink attribute flags
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// Alignment
pub const NLMSG_ALIGNTO: usize = 4;
pub const NLA_ALIGNTO: usize = 4;

const RECV_BUF_SZ: usize = 32 * 1024;

#[inline]
pub fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

#[inline]
pub fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Netlink message header (struct nlmsghdr)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
}

impl NlMsgHdr {
    pub const SIZE: usize = 16;

    /// Decode a header from the start of `buf`
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            nlmsg_len: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            nlmsg_type: u16::from_ne_bytes([buf[4], buf[5]]),
            nlmsg_flags: u16::from_ne_bytes([buf[6], buf[7]]),
        })
    }
}

/// Netlink attribute header (struct nlattr)
pub struct NlAttr;

impl NlAttr {
    pub const SIZE: usize = 4;
}

/// A netlink socket for communicating with the kernel.
pub struct NetlinkSocket {
    fd: RawFd,
}

impl NetlinkSocket {
    /// Open and bind a netlink socket for the given protocol.
    pub fn new(protocol: i32) -> io::Result<Self> {
        let fd = unsafe {
            libc::socket(
                AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                protocol,
            )
        };

        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = AF_NETLINK as u16;
        addr.nl_pid = 0;
        addr.nl_groups = 0;

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as u32,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(Self { fd })
    }

    /// Send a netlink message to the kernel.
    pub fn send(&self, msg: &[u8]) -> io::Result<()> {
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = AF_NETLINK as u16;
        addr.nl_pid = 0; // Kernel
        addr.nl_groups = 0;

        let mut retries = 3;
        loop {
            let sent = unsafe {
                libc::sendto(
                    self.fd,
                    msg.as_ptr() as *const libc::c_void,
                    msg.len(),
                    0,
                    &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_nl>() as u32,
                )
            };

            if sent < 0 {
                let err = io::Error::last_os_error();
                if retries > 0 && is_transient(&err) {
                    retries -= 1;
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                return Err(err);
            }

            if sent as usize != msg.len() {
                return Err(io::Error::other("incomplete send"));
            }
            return Ok(());
        }
    }

    /// Receive one datagram (possibly several netlink messages).
    pub fn recv(&self, recv_buf: &mut [u8]) -> io::Result<usize> {
        let mut retries = 3;
        loop {
            let received = unsafe {
                libc::recv(
                    self.fd,
                    recv_buf.as_mut_ptr() as *mut libc::c_void,
                    recv_buf.len(),
                    0,
                )
            };

            if received < 0 {
                let err = io::Error::last_os_error();
                if retries > 0 && is_transient(&err) {
                    retries -= 1;
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                return Err(err);
            }

            return Ok(received as usize);
        }
    }

    /// Send a request that carries `NLM_F_ACK` and wait for the acknowledgement.
    pub fn request_ack(&self, msg: &[u8]) -> Result<()> {
        self.send(msg)?;

        let mut buf = vec![0u8; RECV_BUF_SZ];
        loop {
            let n = self.recv(&mut buf)?;
            if n == 0 {
                return Err(Error::Protocol("socket closed before acknowledgement".into()));
            }
            for msg in Messages::new(&buf[..n]) {
                let (hdr, body) = msg?;
                if hdr.nlmsg_type == NLMSG_ERROR {
                    return check_ack(body);
                }
            }
        }
    }

    /// Send a request and return the body of the first reply message.
    pub fn request_one(&self, msg: &[u8]) -> Result<Vec<u8>> {
        self.send(msg)?;

        let mut buf = vec![0u8; RECV_BUF_SZ];
        loop {
            let n = self.recv(&mut buf)?;
            if n == 0 {
                return Err(Error::Protocol("socket closed before reply".into()));
            }
            for msg in Messages::new(&buf[..n]) {
                let (hdr, body) = msg?;
                match hdr.nlmsg_type {
                    NLMSG_ERROR => check_ack(body)?,
                    NLMSG_DONE => return Err(Error::Protocol("empty reply".into())),
                    _ => return Ok(body.to_vec()),
                }
            }
        }
    }

    /// Send a dump request and collect the bodies of every reply message.
    pub fn dump(&self, msg: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.send(msg)?;

        let mut bodies = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_SZ];
        loop {
            let n = self.recv(&mut buf)?;
            if n == 0 {
                return Err(Error::Protocol("socket closed during dump".into()));
            }
            for msg in Messages::new(&buf[..n]) {
                let (hdr, body) = msg?;
                match hdr.nlmsg_type {
                    NLMSG_DONE => {
                        // NLMSG_DONE may carry the dump's final error code
                        if let Some(code) = read_i32(body) {
                            if code < 0 {
                                return Err(Error::Netlink(-code));
                            }
                        }
                        return Ok(bodies);
                    }
                    NLMSG_ERROR => {
                        check_ack(body)?;
                        return Ok(bodies);
                    }
                    _ => {
                        bodies.push(body.to_vec());
                        if hdr.nlmsg_flags & NLM_F_MULTI == 0 {
                            return Ok(bodies);
                        }
                    }
                }
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EAGAIN)
        || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        || err.raw_os_error() == Some(libc::EINTR)
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn read_i32(buf: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = buf.get(0..4)?.try_into().ok()?;
    Some(i32::from_ne_bytes(bytes))
}

/// Interpret the body of an NLMSG_ERROR message (struct nlmsgerr).
/// A zero error code is a plain acknowledgement.
pub fn check_ack(body: &[u8]) -> Result<()> {
    match read_i32(body) {
        Some(0) => Ok(()),
        Some(code) => Err(Error::Netlink(-code)),
        None => Err(Error::Protocol("truncated error message".into())),
    }
}

/// Iterator over the netlink messages packed in one datagram
pub struct Messages<'a> {
    buf: &'a [u8],
}

impl<'a> Messages<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<(NlMsgHdr, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        let Some(hdr) = NlMsgHdr::parse(self.buf) else {
            self.buf = &[];
            return Some(Err(Error::Protocol("truncated netlink header".into())));
        };

        let len = hdr.nlmsg_len as usize;
        if len < NlMsgHdr::SIZE || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(Error::Protocol(format!(
                "invalid netlink message length {}",
                len
            ))));
        }

        let body = &self.buf[NlMsgHdr::SIZE..len];
        let advance = nlmsg_align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(Ok((hdr, body)))
    }
}

/// Iterator over a run of netlink attributes, yielding (type, payload).
/// The nested and byte-order flags are masked off the type.
pub struct Attrs<'a> {
    buf: &'a [u8],
}

impl<'a> Attrs<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < NlAttr::SIZE {
            return None;
        }

        let len = u16::from_ne_bytes([self.buf[0], self.buf[1]]) as usize;
        let attr_type = u16::from_ne_bytes([self.buf[2], self.buf[3]]) & NLA_TYPE_MASK;

        if len < NlAttr::SIZE || len > self.buf.len() {
            self.buf = &[];
            return None;
        }

        let payload = &self.buf[NlAttr::SIZE..len];
        let advance = nla_align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some((attr_type, payload))
    }
}

pub fn attr_u16(payload: &[u8]) -> Option<u16> {
    let bytes: [u8; 2] = payload.get(0..2)?.try_into().ok()?;
    Some(u16::from_ne_bytes(bytes))
}

pub fn attr_u32(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.get(0..4)?.try_into().ok()?;
    Some(u32::from_ne_bytes(bytes))
}

pub fn attr_ipv4(payload: &[u8]) -> Option<Ipv4Addr> {
    let bytes: [u8; 4] = payload.get(0..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(bytes))
}

/// Decode a NUL-terminated string attribute
pub fn attr_str(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Buffer for building netlink messages.
///
/// Attribute lengths are 16 bits wide. An attribute that outgrows them is
/// remembered and reported by [`MsgBuffer::finalize_nlmsg`].
pub struct MsgBuffer {
    data: Vec<u8>,
    overflow: bool,
}

impl MsgBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            overflow: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Add raw bytes to the buffer.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn put_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    /// Add a u16 value in native byte order.
    pub fn put_u16(&mut self, val: u16) {
        self.data.extend_from_slice(&val.to_ne_bytes());
    }

    /// Add a u32 value in native byte order.
    pub fn put_u32(&mut self, val: u32) {
        self.data.extend_from_slice(&val.to_ne_bytes());
    }

    /// Pad to attribute alignment.
    pub fn align(&mut self) {
        let aligned = nla_align(self.data.len());
        self.data.resize(aligned, 0);
    }

    /// Add the netlink message header. The length is filled in by
    /// [`MsgBuffer::finalize_nlmsg`].
    pub fn put_nlmsghdr(&mut self, msg_type: u16, flags: u16, seq: u32) {
        self.put_u32(0);
        self.put_u16(msg_type);
        self.put_u16(flags);
        self.put_u32(seq);
        self.put_u32(0);
    }

    pub fn put_attr_u8(&mut self, attr_type: u16, val: u8) {
        self.put_attr_bytes(attr_type, &[val]);
    }

    pub fn put_attr_u16(&mut self, attr_type: u16, val: u16) {
        self.put_attr_bytes(attr_type, &val.to_ne_bytes());
    }

    pub fn put_attr_u32(&mut self, attr_type: u16, val: u32) {
        self.put_attr_bytes(attr_type, &val.to_ne_bytes());
    }

    fn attr_len(&mut self, len: usize) -> u16 {
        match u16::try_from(len) {
            Ok(len) => len,
            Err(_) => {
                self.overflow = true;
                0
            }
        }
    }

    /// Add a netlink attribute with string value (null-terminated).
    pub fn put_attr_str(&mut self, attr_type: u16, val: &str) {
        let bytes = val.as_bytes();
        let len = self.attr_len(NlAttr::SIZE + bytes.len() + 1);
        self.put_u16(len);
        self.put_u16(attr_type);
        self.put_bytes(bytes);
        self.put_u8(0);
        self.align();
    }

    /// Add a netlink attribute with binary data.
    pub fn put_attr_bytes(&mut self, attr_type: u16, val: &[u8]) {
        let len = self.attr_len(NlAttr::SIZE + val.len());
        self.put_u16(len);
        self.put_u16(attr_type);
        self.put_bytes(val);
        self.align();
    }

    /// Start a nested attribute. Returns the offset where the length will be stored.
    pub fn start_nested(&mut self, attr_type: u16) -> usize {
        let offset = self.data.len();
        self.put_u16(0); // Placeholder for length
        self.put_u16(attr_type | NLA_F_NESTED);
        offset
    }

    /// End a nested attribute by updating its length.
    pub fn end_nested(&mut self, offset: usize) {
        let len = self.attr_len(self.data.len() - offset);
        self.data[offset..offset + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// Update the netlink message header length at the beginning of the
    /// buffer. Fails if any attribute was too long to encode.
    pub fn finalize_nlmsg(&mut self) -> Result<()> {
        if self.overflow {
            return Err(Error::Protocol(
                "netlink attribute longer than 65535 bytes".into(),
            ));
        }
        let len = u32::try_from(self.data.len())
            .map_err(|_| Error::Protocol("netlink message too long".into()))?;
        self.data[0..4].copy_from_slice(&len.to_ne_bytes());
        Ok(())
    }
}
