//! C layout of the two capability tables and the values that travel through them.
//!
//! Every fallible entry returns a status (`0` on success, [`ErrorKind::status`] otherwise) and
//! may store a [`CErr`] in its `err` out-parameter. The error stays owned by the host.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::{ErrorKind, HookError};

/// Size of the caller buffers that receive a name: the longest name plus a terminator.
pub const NAME_BUF_LEN: usize = edgehook_dns::DNS_MAX_HOSTNAME_LEN + 1;

/// Opaque host-side packet handle.
#[repr(C)]
pub struct RawPacket {
    _private: [u8; 0],
}

/// Opaque host-side session handle.
#[repr(C)]
pub struct RawSession {
    _private: [u8; 0],
}

/// Error handle. Modules only ever see a pointer and pass it back to `error_description`.
#[derive(Debug)]
pub struct CErr {
    kind: ErrorKind,
    description: CString,
}

impl CErr {
    pub fn new(err: &HookError) -> Self {
        let text = err.describe().replace('\0', " ");
        Self {
            kind: err.kind(),
            description: CString::new(text).unwrap_or_default(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn description(&self) -> &CStr {
        &self.description
    }
}

/// Per-record callback used by the iteration entries. Returning `false` stops the traversal.
pub type IterCallback = unsafe extern "C" fn(ctx: *mut c_void, it: *mut c_void) -> bool;

pub type ErrOut = *mut *const CErr;

/// Packet capability table.
#[repr(C)]
pub struct FnTable {
    pub error_description: unsafe extern "C" fn(err: *const CErr) -> *const c_char,
    pub flags: unsafe extern "C" fn(packet: *const RawPacket) -> u32,
    pub set_flags: unsafe extern "C" fn(packet: *mut RawPacket, flags: u32),
    pub rcode: unsafe extern "C" fn(packet: *const RawPacket) -> u8,
    pub set_rcode: unsafe extern "C" fn(packet: *mut RawPacket, rcode: u8),
    pub opcode: unsafe extern "C" fn(packet: *const RawPacket) -> u8,
    pub set_opcode: unsafe extern "C" fn(packet: *mut RawPacket, opcode: u8),
    pub iter_answer: unsafe extern "C" fn(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void),
    pub iter_nameservers: unsafe extern "C" fn(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void),
    pub iter_additional: unsafe extern "C" fn(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void),
    pub iter_edns: unsafe extern "C" fn(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void),
    /// Writes a NUL-terminated name into a buffer of [`NAME_BUF_LEN`] bytes.
    pub name: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, name: *mut c_char) -> c_int,
    pub rr_type: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, rr_type: *mut u16) -> c_int,
    pub rr_class: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, rr_class: *mut u16) -> c_int,
    pub rr_ttl: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, ttl: *mut u32) -> c_int,
    pub set_rr_ttl: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, ttl: u32) -> c_int,
    pub rr_ip: unsafe extern "C" fn(
        it: *mut c_void,
        err: ErrOut,
        addr: *mut u8,
        addr_len: *mut usize,
        addr_max_len: usize,
    ) -> c_int,
    pub set_rr_ip: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, addr: *const u8, addr_len: usize) -> c_int,
    /// Writes into a buffer of [`NAME_BUF_LEN`] bytes.
    pub raw_name_from_str: unsafe extern "C" fn(
        raw_name: *mut u8,
        raw_name_len: *mut usize,
        err: ErrOut,
        name: *const c_char,
        name_len: usize,
    ) -> c_int,
    pub set_raw_name: unsafe extern "C" fn(it: *mut c_void, err: ErrOut, name: *const u8, name_len: usize) -> c_int,
    pub set_name: unsafe extern "C" fn(
        it: *mut c_void,
        err: ErrOut,
        name: *const c_char,
        name_len: usize,
        default_zone_raw: *const u8,
        default_zone_raw_len: usize,
    ) -> c_int,
    pub delete_rr: unsafe extern "C" fn(it: *mut c_void, err: ErrOut) -> c_int,
    /// The record text is NUL-terminated.
    pub add_to_question: unsafe extern "C" fn(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int,
    pub add_to_answer: unsafe extern "C" fn(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int,
    pub add_to_nameservers: unsafe extern "C" fn(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int,
    pub add_to_additional: unsafe extern "C" fn(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int,
    pub raw_packet: unsafe extern "C" fn(
        packet: *const RawPacket,
        err: ErrOut,
        raw_packet: *mut u8,
        raw_packet_len: *mut usize,
        max_len: usize,
    ) -> c_int,
    /// Writes a NUL-terminated name into a buffer of [`NAME_BUF_LEN`] bytes.
    pub question:
        unsafe extern "C" fn(packet: *const RawPacket, err: ErrOut, name: *mut c_char, rr_type: *mut u16) -> c_int,
    pub rename_with_raw_names: unsafe extern "C" fn(
        packet: *mut RawPacket,
        err: ErrOut,
        raw_target_name: *const u8,
        raw_target_name_len: usize,
        raw_source_name: *const u8,
        raw_source_name_len: usize,
        match_suffix: bool,
    ) -> c_int,
    pub abi_version: u64,
}

/// Host environment table: session values and backends.
#[repr(C)]
pub struct EdgeDnsFnTable {
    pub error_description: unsafe extern "C" fn(err: *const CErr) -> *const c_char,
    pub set_service_id:
        unsafe extern "C" fn(session: *mut RawSession, err: ErrOut, service_id: *const c_char, len: usize) -> c_int,
    pub env_insert_str: unsafe extern "C" fn(
        session: *mut RawSession,
        err: ErrOut,
        key: *const c_char,
        key_len: usize,
        val: *const c_char,
        val_len: usize,
    ) -> c_int,
    pub env_insert_i64:
        unsafe extern "C" fn(session: *mut RawSession, err: ErrOut, key: *const c_char, key_len: usize, v: i64) -> c_int,
    pub env_insert_bool:
        unsafe extern "C" fn(session: *mut RawSession, err: ErrOut, key: *const c_char, key_len: usize, v: bool) -> c_int,
    pub env_get_str: unsafe extern "C" fn(
        session: *const RawSession,
        err: ErrOut,
        key: *const c_char,
        key_len: usize,
        val: *mut c_char,
        val_len: *mut usize,
        val_max_len: usize,
    ) -> c_int,
    pub env_get_i64: unsafe extern "C" fn(
        session: *const RawSession,
        err: ErrOut,
        key: *const c_char,
        key_len: usize,
        v: *mut i64,
    ) -> c_int,
    pub env_get_bool: unsafe extern "C" fn(
        session: *const RawSession,
        err: ErrOut,
        key: *const c_char,
        key_len: usize,
        v: *mut bool,
    ) -> c_int,
    pub register_backend: unsafe extern "C" fn(
        session: *mut RawSession,
        err: ErrOut,
        key: *const c_char,
        key_len: usize,
        ss: *const libc::sockaddr_storage,
        ss_len: usize,
    ) -> c_int,
    pub add_backend_to_director:
        unsafe extern "C" fn(session: *mut RawSession, err: ErrOut, key: *const c_char, key_len: usize) -> c_int,
    pub abi_version: u64,
}

/// Fill a `sockaddr_storage` for `addr`, returning the meaningful length.
pub fn socket_addr_to_storage(addr: &SocketAddr) -> (libc::sockaddr_storage, usize) {
    // SAFETY: sockaddr_storage is plain data and all-zero is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large and aligned enough for any sockaddr type.
            let sin = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            // SAFETY: as above.
            let sin6 = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len)
}

/// Read an IPv4 or IPv6 address out of a `sockaddr_storage`.
pub fn socket_addr_from_storage(storage: &libc::sockaddr_storage, len: usize) -> Result<SocketAddr, HookError> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            if len < mem::size_of::<libc::sockaddr_in>() {
                return Err(HookError::parse(format!("sockaddr_in needs more than {} bytes", len)));
            }
            // SAFETY: the family says this is a sockaddr_in and the length covers it.
            let sin = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            if len < mem::size_of::<libc::sockaddr_in6>() {
                return Err(HookError::parse(format!("sockaddr_in6 needs more than {} bytes", len)));
            }
            // SAFETY: as above.
            let sin6 = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(HookError::parse(format!("unsupported address family {}", family))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_v4() {
        let addr: SocketAddr = "192.0.2.10:8053".parse().unwrap();
        let (storage, len) = socket_addr_to_storage(&addr);
        assert_eq!(len, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(socket_addr_from_storage(&storage, len).unwrap(), addr);
    }

    #[test]
    fn test_sockaddr_v6() {
        let addr: SocketAddr = "[2001:db8::53]:53".parse().unwrap();
        let (storage, len) = socket_addr_to_storage(&addr);
        assert_eq!(socket_addr_from_storage(&storage, len).unwrap(), addr);
    }

    #[test]
    fn test_sockaddr_rejects_short_or_unknown() {
        let addr: SocketAddr = "192.0.2.10:53".parse().unwrap();
        let (storage, _) = socket_addr_to_storage(&addr);
        let err = socket_addr_from_storage(&storage, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);

        // SAFETY: all-zero is a valid sockaddr_storage.
        let empty: libc::sockaddr_storage = unsafe { mem::zeroed() };
        assert!(socket_addr_from_storage(&empty, mem::size_of::<libc::sockaddr_storage>()).is_err());
    }

    #[test]
    fn test_cerr_description() {
        let err = HookError::parse("bad\0record");
        let cerr = CErr::new(&err);
        assert_eq!(cerr.kind(), ErrorKind::Parse);
        assert_eq!(cerr.description().to_str().unwrap(), "parse error: bad record");
    }
}
