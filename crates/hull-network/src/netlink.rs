//! Minimal rtnetlink client for link, address and route configuration.
//!
//! Requests are assembled by [`Request`], a byte builder that lays out
//! `nlmsghdr`, the family header and attributes in native byte order with
//! 4-byte alignment. [`Netlink`] owns a `NETLINK_ROUTE` socket and sends
//! one request at a time, waiting for the kernel's acknowledgement.
//!
//! A socket is bound to the network namespace of the thread that opened it.
//! Code configuring a container namespace must open its own socket after
//! entering that namespace.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use hull_common::error::{HullError, Result};
use ipnetwork::Ipv4Network;

const NETLINK_ROUTE: i32 = 0;

const NLMSG_HDRLEN: usize = 16;
const NLA_HDRLEN: usize = 4;
const NLMSG_ERROR: u16 = 2;

const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_NEWROUTE: u16 = 24;

const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;
const NLA_F_NESTED: u16 = 1 << 15;

const IFF_UP: u32 = 0x1;

const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;

const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;

const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

const AF_UNSPEC: u8 = 0;
const AF_INET: u8 = 2;

fn len_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

fn align(n: usize) -> usize {
    (n + 3) & !3
}

/// Byte builder for a single rtnetlink request.
#[derive(Debug, Clone)]
pub struct Request {
    buf: Vec<u8>,
}

impl Request {
    /// Starts a message of type `kind`; `NLM_F_REQUEST | NLM_F_ACK` are implied.
    #[must_use]
    pub fn new(kind: u16, flags: u16) -> Self {
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[4..6].copy_from_slice(&kind.to_ne_bytes());
        buf[6..8].copy_from_slice(&(flags | NLM_F_REQUEST | NLM_F_ACK).to_ne_bytes());
        Self { buf }
    }

    /// Appends an `ifinfomsg`.
    pub fn ifinfo(&mut self, index: u32, flags: u32, change: u32) -> &mut Self {
        self.buf.push(AF_UNSPEC);
        self.buf.push(0);
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self.buf.extend_from_slice(&flags.to_ne_bytes());
        self.buf.extend_from_slice(&change.to_ne_bytes());
        self
    }

    /// Appends an IPv4 `ifaddrmsg`.
    pub fn ifaddr(&mut self, prefix: u8, index: u32) -> &mut Self {
        self.buf
            .extend_from_slice(&[AF_INET, prefix, 0, RT_SCOPE_UNIVERSE]);
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self
    }

    /// Appends an IPv4 unicast `rtmsg` for the main table.
    pub fn rtmsg(&mut self, dst_len: u8) -> &mut Self {
        self.buf.extend_from_slice(&[
            AF_INET,
            dst_len,
            0,
            0,
            RT_TABLE_MAIN,
            RTPROT_BOOT,
            RT_SCOPE_UNIVERSE,
            RTN_UNICAST,
        ]);
        self.buf.extend_from_slice(&0u32.to_ne_bytes());
        self
    }

    /// Appends an attribute with a raw payload.
    pub fn attr(&mut self, kind: u16, payload: &[u8]) -> &mut Self {
        let len = NLA_HDRLEN + payload.len();
        self.buf.extend_from_slice(&len_u16(len).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(self.buf.len() + align(len) - len, 0);
        self
    }

    /// Appends a `u32` attribute.
    pub fn attr_u32(&mut self, kind: u16, value: u32) -> &mut Self {
        self.attr(kind, &value.to_ne_bytes())
    }

    /// Appends a NUL-terminated string attribute.
    pub fn attr_str(&mut self, kind: u16, value: &str) -> &mut Self {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.attr(kind, &payload)
    }

    /// Opens a nested attribute; close it with [`Request::end_nested`].
    pub fn begin_nested(&mut self, kind: u16) -> usize {
        let start = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf
            .extend_from_slice(&(kind | NLA_F_NESTED).to_ne_bytes());
        start
    }

    /// Fixes up the length of the nested attribute opened at `start`.
    pub fn end_nested(&mut self, start: usize) -> &mut Self {
        let len = len_u16(self.buf.len() - start);
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
        self
    }

    /// Writes the total length and sequence number and returns the bytes.
    #[must_use]
    pub fn finish(mut self, seq: u32) -> Vec<u8> {
        let len = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
        self.buf
    }
}

/// Scans a receive buffer for the acknowledgement of `seq`.
///
/// Returns `Some(0)` for success, `Some(errno)` for a kernel rejection and
/// `None` if the buffer holds no answer to `seq`.
#[must_use]
pub fn parse_ack(buf: &[u8], seq: u32) -> Option<i32> {
    let mut offset = 0;
    while offset + NLMSG_HDRLEN <= buf.len() {
        let header = &buf[offset..];
        let len = u32::from_ne_bytes(header[0..4].try_into().ok()?) as usize;
        let kind = u16::from_ne_bytes(header[4..6].try_into().ok()?);
        let msg_seq = u32::from_ne_bytes(header[8..12].try_into().ok()?);
        if len < NLMSG_HDRLEN || offset + len > buf.len() {
            return None;
        }
        if kind == NLMSG_ERROR && msg_seq == seq && len >= NLMSG_HDRLEN + 4 {
            let code = i32::from_ne_bytes(header[16..20].try_into().ok()?);
            return Some(-code);
        }
        offset += align(len);
    }
    None
}

/// Resolves an interface name to its index in the calling thread's namespace.
///
/// # Errors
///
/// Returns an error if `name` contains a NUL byte.
pub fn link_index(name: &str) -> Result<Option<u32>> {
    let c_name = CString::new(name).map_err(|_| HullError::InvalidInput {
        message: format!("interface name {name:?} contains NUL"),
    })?;
    // SAFETY: c_name is a valid NUL-terminated string that outlives the call.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    Ok((index != 0).then_some(index))
}

/// Like [`link_index`] but a missing interface is an error.
///
/// # Errors
///
/// Returns [`HullError::NotFound`] if no interface has that name.
pub fn require_link(name: &str) -> Result<u32> {
    link_index(name)?.ok_or_else(|| HullError::NotFound {
        kind: "interface",
        id: name.to_owned(),
    })
}

/// An open `NETLINK_ROUTE` socket.
#[derive(Debug)]
pub struct Netlink {
    fd: OwnedFd,
    seq: u32,
}

impl Netlink {
    /// Opens and binds a route socket in the calling thread's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    pub fn open() -> Result<Self> {
        // SAFETY: plain socket(2) call, the result is checked below.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(netlink_error("socket", &io::Error::last_os_error()));
        }
        // SAFETY: raw is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::sa_family_t::try_from(libc::AF_NETLINK).unwrap_or_default();
        let addr_len =
            libc::socklen_t::try_from(std::mem::size_of::<libc::sockaddr_nl>()).unwrap_or_default();
        // SAFETY: addr points to a properly initialized sockaddr_nl of addr_len bytes.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                addr_len,
            )
        };
        if rc < 0 {
            return Err(netlink_error("bind", &io::Error::last_os_error()));
        }
        Ok(Self { fd, seq: 0 })
    }

    fn execute(&mut self, request: Request, what: &str) -> Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let bytes = request.finish(seq);

        // SAFETY: bytes is a live buffer of bytes.len() bytes.
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                bytes.as_ptr().cast::<libc::c_void>(),
                bytes.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(netlink_error(what, &io::Error::last_os_error()));
        }

        let mut buf = vec![0u8; 8192];
        loop {
            // SAFETY: buf is a live, writable buffer of buf.len() bytes.
            let received = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            let Ok(received) = usize::try_from(received) else {
                return Err(netlink_error(what, &io::Error::last_os_error()));
            };
            match parse_ack(&buf[..received], seq) {
                Some(0) => return Ok(()),
                Some(errno) => {
                    return Err(netlink_error(what, &io::Error::from_raw_os_error(errno)));
                }
                None => {}
            }
        }
    }

    /// Creates a bridge named `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request, e.g. the name exists.
    pub fn create_bridge(&mut self, name: &str) -> Result<()> {
        let mut req = Request::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL);
        let _ = req.ifinfo(0, 0, 0).attr_str(IFLA_IFNAME, name);
        let info = req.begin_nested(IFLA_LINKINFO);
        let _ = req.attr_str(IFLA_INFO_KIND, "bridge").end_nested(info);
        self.execute(req, &format!("create bridge {name}"))
    }

    /// Creates a veth pair `name` <-> `peer` in the current namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn create_veth(&mut self, name: &str, peer: &str) -> Result<()> {
        let mut req = Request::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL);
        let _ = req.ifinfo(0, 0, 0).attr_str(IFLA_IFNAME, name);
        let info = req.begin_nested(IFLA_LINKINFO);
        let _ = req.attr_str(IFLA_INFO_KIND, "veth");
        let data = req.begin_nested(IFLA_INFO_DATA);
        let peer_info = req.begin_nested(VETH_INFO_PEER);
        let _ = req
            .ifinfo(0, 0, 0)
            .attr_str(IFLA_IFNAME, peer)
            .end_nested(peer_info)
            .end_nested(data)
            .end_nested(info);
        self.execute(req, &format!("create veth {name}/{peer}"))
    }

    /// Deletes the link with `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn delete_link(&mut self, index: u32) -> Result<()> {
        let mut req = Request::new(RTM_DELLINK, 0);
        let _ = req.ifinfo(index, 0, 0);
        self.execute(req, &format!("delete link {index}"))
    }

    /// Brings the link with `index` up.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn set_up(&mut self, index: u32) -> Result<()> {
        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.ifinfo(index, IFF_UP, IFF_UP);
        self.execute(req, &format!("set link {index} up"))
    }

    /// Enslaves link `index` to the bridge `master`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn set_master(&mut self, index: u32, master: u32) -> Result<()> {
        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.ifinfo(index, 0, 0).attr_u32(IFLA_MASTER, master);
        self.execute(req, &format!("set master of link {index}"))
    }

    /// Moves link `index` into the network namespace referred to by `ns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn set_netns(&mut self, index: u32, ns: BorrowedFd<'_>) -> Result<()> {
        let fd = u32::try_from(ns.as_raw_fd()).map_err(|_| HullError::InvalidInput {
            message: "negative namespace descriptor".into(),
        })?;
        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.ifinfo(index, 0, 0).attr_u32(IFLA_NET_NS_FD, fd);
        self.execute(req, &format!("move link {index} to namespace"))
    }

    /// Assigns `address` (with its prefix) to link `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_address(&mut self, index: u32, address: Ipv4Network) -> Result<()> {
        let octets = address.ip().octets();
        let mut req = Request::new(RTM_NEWADDR, NLM_F_CREATE | NLM_F_EXCL);
        let _ = req
            .ifaddr(address.prefix(), index)
            .attr(IFA_LOCAL, &octets)
            .attr(IFA_ADDRESS, &octets);
        self.execute(req, &format!("add address {address} to link {index}"))
    }

    /// Installs a default route through `gateway` on link `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_default_route(&mut self, gateway: Ipv4Addr, index: u32) -> Result<()> {
        let mut req = Request::new(RTM_NEWROUTE, NLM_F_CREATE | NLM_F_EXCL);
        let _ = req
            .rtmsg(0)
            .attr(RTA_GATEWAY, &gateway.octets())
            .attr_u32(RTA_OIF, index);
        self.execute(req, &format!("add default route via {gateway}"))
    }
}

fn netlink_error(what: &str, err: &io::Error) -> HullError {
    HullError::Netlink {
        message: format!("{what}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_ne_bytes(buf[at..at + 2].try_into().unwrap())
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_ne_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn header_carries_length_type_flags_and_seq() {
        let mut req = Request::new(RTM_DELLINK, 0);
        let _ = req.ifinfo(7, 0, 0);
        let bytes = req.finish(42);
        assert_eq!(bytes.len(), 32);
        assert_eq!(u32_at(&bytes, 0), 32);
        assert_eq!(u16_at(&bytes, 4), RTM_DELLINK);
        assert_eq!(u16_at(&bytes, 6), NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(u32_at(&bytes, 8), 42);
        assert_eq!(u32_at(&bytes, 20), 7);
    }

    #[test]
    fn string_attributes_are_padded() {
        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.attr_str(IFLA_IFNAME, "br0");
        let bytes = req.finish(1);
        // "br0\0" fits exactly; a 5 byte payload would pad to 12.
        assert_eq!(bytes.len(), NLMSG_HDRLEN + 8);
        assert_eq!(u16_at(&bytes, 16), 8);
        assert_eq!(&bytes[20..24], b"br0\0");

        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.attr_str(IFLA_IFNAME, "eth0");
        let bytes = req.finish(1);
        assert_eq!(u16_at(&bytes, 16), 9);
        assert_eq!(bytes.len(), NLMSG_HDRLEN + 12);
    }

    #[test]
    fn nested_attribute_length_covers_children() {
        let mut req = Request::new(RTM_NEWLINK, 0);
        let info = req.begin_nested(IFLA_LINKINFO);
        let _ = req.attr_str(IFLA_INFO_KIND, "veth").end_nested(info);
        let bytes = req.finish(1);
        assert_eq!(u16_at(&bytes, 16), 4 + 12);
        assert_eq!(u16_at(&bytes, 18), IFLA_LINKINFO | NLA_F_NESTED);
    }

    fn ack(seq: u32, code: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&36u32.to_ne_bytes());
        buf.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&code.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf
    }

    #[test]
    fn ack_parsing_matches_sequence() {
        assert_eq!(parse_ack(&ack(3, 0), 3), Some(0));
        assert_eq!(parse_ack(&ack(3, -17), 3), Some(17));
        assert_eq!(parse_ack(&ack(2, 0), 3), None);
        assert_eq!(parse_ack(&[0u8; 4], 3), None);
    }

    #[test]
    fn loopback_has_an_index() {
        assert!(link_index("lo").unwrap().is_some());
        assert!(link_index("hull-nope0").unwrap().is_none());
    }
}
