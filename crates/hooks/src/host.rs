//! Host side of the C boundary: the capability tables handed to modules, implemented over
//! [`ParsedPacket`] and [`SessionState`].
//!
//! Packet handles point at a `ParsedPacket`, session handles at a `SessionState`. Iteration
//! cursors point at a `&mut dyn RecordOps` slot that only lives for the callback.

use std::cell::RefCell;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::mem;
use std::ptr;
use std::slice;

use edgehook_abi::ffi::{
    CErr, EdgeDnsFnTable, ErrOut, FnTable, IterCallback, NAME_BUF_LEN, RawPacket, RawSession,
    socket_addr_from_storage,
};
use edgehook_abi::{HOST_ENV_ABI_VERSION, HookError, PACKET_ABI_VERSION, Result};
use edgehook_packet::{PacketOps, ParsedPacket, RecordOps, Section};
use edgehook_session::{SessionOps, SessionState};
use tracing::debug;

thread_local! {
    // Last error reported on this thread. Replaced by the next failure.
    static LAST_ERROR: RefCell<Option<Box<CErr>>> = const { RefCell::new(None) };
}

static UNKNOWN_ERROR: &CStr = c"unknown error";

static PACKET_TABLE: FnTable = FnTable {
    error_description,
    flags,
    set_flags,
    rcode,
    set_rcode,
    opcode,
    set_opcode,
    iter_answer,
    iter_nameservers,
    iter_additional,
    iter_edns,
    name,
    rr_type,
    rr_class,
    rr_ttl,
    set_rr_ttl,
    rr_ip,
    set_rr_ip,
    raw_name_from_str,
    set_raw_name,
    set_name,
    delete_rr,
    add_to_question,
    add_to_answer,
    add_to_nameservers,
    add_to_additional,
    raw_packet,
    question,
    rename_with_raw_names,
    abi_version: PACKET_ABI_VERSION,
};

static ENV_TABLE: EdgeDnsFnTable = EdgeDnsFnTable {
    error_description,
    set_service_id,
    env_insert_str,
    env_insert_i64,
    env_insert_bool,
    env_get_str,
    env_get_i64,
    env_get_bool,
    register_backend,
    add_backend_to_director,
    abi_version: HOST_ENV_ABI_VERSION,
};

/// The host environment and packet tables, in the order hook entry points take them.
pub fn host_tables() -> (&'static EdgeDnsFnTable, &'static FnTable) {
    (&ENV_TABLE, &PACKET_TABLE)
}

/// Description of the last error reported to a module on this thread.
pub fn last_error_description() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|err| err.description().to_string_lossy().into_owned())
    })
}

fn fail(err_out: ErrOut, err: HookError) -> c_int {
    debug!(error = %err, "capability call failed");
    let status = err.kind().status();
    let boxed = Box::new(CErr::new(&err));
    let handle: *const CErr = &*boxed;
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(boxed));
    if !err_out.is_null() {
        // SAFETY: a non-null err out-parameter points at writable storage for one pointer.
        unsafe { *err_out = handle };
    }
    status
}

fn finish(err_out: ErrOut, result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => fail(err_out, e),
    }
}

unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> Result<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(HookError::protocol("null buffer with a non-zero length"));
    }
    // SAFETY: the caller vouches for `len` readable bytes at `ptr`.
    Ok(unsafe { slice::from_raw_parts(ptr, len) })
}

unsafe fn bytes_mut<'a>(ptr: *mut u8, len: usize) -> Result<&'a mut [u8]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(HookError::protocol("null buffer with a non-zero length"));
    }
    // SAFETY: the caller vouches for `len` writable bytes at `ptr`.
    Ok(unsafe { slice::from_raw_parts_mut(ptr, len) })
}

unsafe fn text<'a>(ptr: *const c_char, len: usize) -> Result<&'a str> {
    let raw = unsafe { bytes(ptr as *const u8, len) }?;
    std::str::from_utf8(raw).map_err(|e| HookError::parse(format!("text is not UTF-8: {}", e)))
}

unsafe fn c_text<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(HookError::protocol("null string"));
    }
    // SAFETY: the caller passes a NUL-terminated string.
    let raw = unsafe { CStr::from_ptr(ptr) };
    raw.to_str()
        .map_err(|e| HookError::parse(format!("text is not UTF-8: {}", e)))
}

unsafe fn name_buf<'a>(ptr: *mut c_char) -> Result<&'a mut [u8; NAME_BUF_LEN]> {
    if ptr.is_null() {
        return Err(HookError::protocol("null name buffer"));
    }
    // SAFETY: name buffers are NAME_BUF_LEN bytes long by contract.
    Ok(unsafe { &mut *(ptr as *mut [u8; NAME_BUF_LEN]) })
}

unsafe fn out<T>(ptr: *mut T, value: T) -> Result<()> {
    if ptr.is_null() {
        return Err(HookError::protocol("null output pointer"));
    }
    // SAFETY: non-null output pointers are writable.
    unsafe { ptr.write(value) };
    Ok(())
}

unsafe fn packet_ref<'a>(packet: *const RawPacket) -> Result<&'a ParsedPacket> {
    if packet.is_null() {
        return Err(HookError::protocol("null packet handle"));
    }
    // SAFETY: packet handles given out by the host point at a live ParsedPacket.
    Ok(unsafe { &*(packet as *const ParsedPacket) })
}

unsafe fn packet_mut<'a>(packet: *mut RawPacket) -> Result<&'a mut ParsedPacket> {
    if packet.is_null() {
        return Err(HookError::protocol("null packet handle"));
    }
    // SAFETY: as above, and the module has exclusive use of it during the hook call.
    Ok(unsafe { &mut *(packet as *mut ParsedPacket) })
}

unsafe fn session_ref<'a>(session: *const RawSession) -> Result<&'a SessionState> {
    if session.is_null() {
        return Err(HookError::protocol("null session handle"));
    }
    // SAFETY: session handles given out by the host point at a live SessionState.
    Ok(unsafe { &*(session as *const SessionState) })
}

unsafe fn session_mut<'a>(session: *mut RawSession) -> Result<&'a mut SessionState> {
    if session.is_null() {
        return Err(HookError::protocol("null session handle"));
    }
    // SAFETY: as above.
    Ok(unsafe { &mut *(session as *mut SessionState) })
}

unsafe fn cursor<'a>(it: *mut c_void) -> Result<&'a mut (dyn RecordOps + 'a)> {
    if it.is_null() {
        return Err(HookError::protocol("null record cursor"));
    }
    // SAFETY: cursors are only handed out by `iterate`, pointing at its slot.
    let slot = unsafe { &mut *(it as *mut &'a mut (dyn RecordOps + 'a)) };
    Ok(&mut **slot)
}

unsafe extern "C" fn error_description(err: *const CErr) -> *const c_char {
    if err.is_null() {
        return UNKNOWN_ERROR.as_ptr();
    }
    // SAFETY: non-null errors come from `fail` and stay alive until the next failure.
    unsafe { (*err).description().as_ptr() }
}

unsafe extern "C" fn flags(packet: *const RawPacket) -> u32 {
    unsafe { packet_ref(packet) }.map(|p| p.flags()).unwrap_or_default()
}

unsafe extern "C" fn set_flags(packet: *mut RawPacket, flags: u32) {
    if let Ok(p) = unsafe { packet_mut(packet) } {
        p.set_flags(flags);
    }
}

unsafe extern "C" fn rcode(packet: *const RawPacket) -> u8 {
    unsafe { packet_ref(packet) }.map(|p| p.rcode()).unwrap_or_default()
}

unsafe extern "C" fn set_rcode(packet: *mut RawPacket, rcode: u8) {
    if let Ok(p) = unsafe { packet_mut(packet) } {
        p.set_rcode(rcode);
    }
}

unsafe extern "C" fn opcode(packet: *const RawPacket) -> u8 {
    unsafe { packet_ref(packet) }.map(|p| p.opcode()).unwrap_or_default()
}

unsafe extern "C" fn set_opcode(packet: *mut RawPacket, opcode: u8) {
    if let Ok(p) = unsafe { packet_mut(packet) } {
        p.set_opcode(opcode);
    }
}

unsafe fn iterate(packet: *mut RawPacket, section: Section, cb: IterCallback, ctx: *mut c_void) {
    let Ok(packet) = (unsafe { packet_mut(packet) }) else {
        debug!(%section, "iteration over a null packet");
        return;
    };
    packet.iter_section(section, &mut |rr| {
        let mut slot: &mut dyn RecordOps = rr;
        let it = &mut slot as *mut &mut dyn RecordOps as *mut c_void;
        // SAFETY: the callback and its context come from the module for this walk.
        unsafe { cb(ctx, it) }
    });
}

unsafe extern "C" fn iter_answer(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void) {
    unsafe { iterate(packet, Section::Answer, cb, ctx) }
}

unsafe extern "C" fn iter_nameservers(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void) {
    unsafe { iterate(packet, Section::Nameservers, cb, ctx) }
}

unsafe extern "C" fn iter_additional(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void) {
    unsafe { iterate(packet, Section::Additional, cb, ctx) }
}

unsafe extern "C" fn iter_edns(packet: *mut RawPacket, cb: IterCallback, ctx: *mut c_void) {
    unsafe { iterate(packet, Section::Edns, cb, ctx) }
}

unsafe extern "C" fn name(it: *mut c_void, err: ErrOut, name: *mut c_char) -> c_int {
    finish(err, unsafe {
        (|| {
            let buf = name_buf(name)?;
            cursor(it)?.name(buf).map(|_| ())
        })()
    })
}

unsafe extern "C" fn rr_type(it: *mut c_void, err: ErrOut, rr_type: *mut u16) -> c_int {
    finish(err, unsafe { (|| out(rr_type, cursor(it)?.rr_type()?))() })
}

unsafe extern "C" fn rr_class(it: *mut c_void, err: ErrOut, rr_class: *mut u16) -> c_int {
    finish(err, unsafe { (|| out(rr_class, cursor(it)?.rr_class()?))() })
}

unsafe extern "C" fn rr_ttl(it: *mut c_void, err: ErrOut, ttl: *mut u32) -> c_int {
    finish(err, unsafe { (|| out(ttl, cursor(it)?.rr_ttl()?))() })
}

unsafe extern "C" fn set_rr_ttl(it: *mut c_void, err: ErrOut, ttl: u32) -> c_int {
    finish(err, unsafe { (|| cursor(it)?.set_rr_ttl(ttl))() })
}

unsafe extern "C" fn rr_ip(
    it: *mut c_void,
    err: ErrOut,
    addr: *mut u8,
    addr_len: *mut usize,
    addr_max_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let buf = bytes_mut(addr, addr_max_len)?;
            let len = cursor(it)?.rr_ip(buf)?;
            out(addr_len, len)
        })()
    })
}

unsafe extern "C" fn set_rr_ip(it: *mut c_void, err: ErrOut, addr: *const u8, addr_len: usize) -> c_int {
    finish(err, unsafe { (|| cursor(it)?.set_rr_ip(bytes(addr, addr_len)?))() })
}

unsafe extern "C" fn raw_name_from_str(
    raw_name: *mut u8,
    raw_name_len: *mut usize,
    err: ErrOut,
    name: *const c_char,
    name_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let name = text(name, name_len)?;
            let buf = name_buf(raw_name as *mut c_char)?;
            let len = edgehook_packet::raw_name_from_str(name, buf)?;
            out(raw_name_len, len)
        })()
    })
}

unsafe extern "C" fn set_raw_name(it: *mut c_void, err: ErrOut, name: *const u8, name_len: usize) -> c_int {
    finish(err, unsafe { (|| cursor(it)?.set_raw_name(bytes(name, name_len)?))() })
}

unsafe extern "C" fn set_name(
    it: *mut c_void,
    err: ErrOut,
    name: *const c_char,
    name_len: usize,
    default_zone_raw: *const u8,
    default_zone_raw_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let name = text(name, name_len)?;
            let zone = bytes(default_zone_raw, default_zone_raw_len)?;
            cursor(it)?.set_name(name, zone)
        })()
    })
}

unsafe extern "C" fn delete_rr(it: *mut c_void, err: ErrOut) -> c_int {
    finish(err, unsafe { (|| cursor(it)?.delete())() })
}

unsafe extern "C" fn add_to_question(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int {
    finish(err, unsafe { (|| packet_mut(packet)?.add_to_question(c_text(rr_str)?))() })
}

unsafe fn add(packet: *mut RawPacket, err: ErrOut, section: Section, rr_str: *const c_char) -> c_int {
    finish(err, unsafe { (|| packet_mut(packet)?.add_record(section, c_text(rr_str)?))() })
}

unsafe extern "C" fn add_to_answer(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int {
    unsafe { add(packet, err, Section::Answer, rr_str) }
}

unsafe extern "C" fn add_to_nameservers(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int {
    unsafe { add(packet, err, Section::Nameservers, rr_str) }
}

unsafe extern "C" fn add_to_additional(packet: *mut RawPacket, err: ErrOut, rr_str: *const c_char) -> c_int {
    unsafe { add(packet, err, Section::Additional, rr_str) }
}

unsafe extern "C" fn raw_packet(
    packet: *const RawPacket,
    err: ErrOut,
    raw_packet: *mut u8,
    raw_packet_len: *mut usize,
    max_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let buf = bytes_mut(raw_packet, max_len)?;
            let len = packet_ref(packet)?.raw_packet(buf)?;
            out(raw_packet_len, len)
        })()
    })
}

unsafe extern "C" fn question(packet: *const RawPacket, err: ErrOut, name: *mut c_char, rr_type: *mut u16) -> c_int {
    finish(err, unsafe {
        (|| {
            let buf = name_buf(name)?;
            let (_, qtype) = packet_ref(packet)?.question(buf)?;
            out(rr_type, qtype)
        })()
    })
}

unsafe extern "C" fn rename_with_raw_names(
    packet: *mut RawPacket,
    err: ErrOut,
    raw_target_name: *const u8,
    raw_target_name_len: usize,
    raw_source_name: *const u8,
    raw_source_name_len: usize,
    match_suffix: bool,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let target = bytes(raw_target_name, raw_target_name_len)?;
            let source = bytes(raw_source_name, raw_source_name_len)?;
            packet_mut(packet)?.rename_with_raw_names(target, source, match_suffix)
        })()
    })
}

unsafe extern "C" fn set_service_id(session: *mut RawSession, err: ErrOut, service_id: *const c_char, len: usize) -> c_int {
    finish(err, unsafe {
        (|| session_mut(session)?.set_service_id(bytes(service_id as *const u8, len)?))()
    })
}

unsafe extern "C" fn env_insert_str(
    session: *mut RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    val: *const c_char,
    val_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let key = bytes(key as *const u8, key_len)?;
            let val = bytes(val as *const u8, val_len)?;
            session_mut(session)?.insert_str(key, val)
        })()
    })
}

unsafe extern "C" fn env_insert_i64(
    session: *mut RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    v: i64,
) -> c_int {
    finish(err, unsafe {
        (|| session_mut(session)?.insert_i64(bytes(key as *const u8, key_len)?, v))()
    })
}

unsafe extern "C" fn env_insert_bool(
    session: *mut RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    v: bool,
) -> c_int {
    finish(err, unsafe {
        (|| session_mut(session)?.insert_bool(bytes(key as *const u8, key_len)?, v))()
    })
}

unsafe extern "C" fn env_get_str(
    session: *const RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    val: *mut c_char,
    val_len: *mut usize,
    val_max_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let key = bytes(key as *const u8, key_len)?;
            let buf = bytes_mut(val as *mut u8, val_max_len)?;
            let len = session_ref(session)?.get_str(key, buf)?;
            out(val_len, len)
        })()
    })
}

unsafe extern "C" fn env_get_i64(
    session: *const RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    v: *mut i64,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let value = session_ref(session)?.get_i64(bytes(key as *const u8, key_len)?)?;
            out(v, value)
        })()
    })
}

unsafe extern "C" fn env_get_bool(
    session: *const RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    v: *mut bool,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let value = session_ref(session)?.get_bool(bytes(key as *const u8, key_len)?)?;
            out(v, value)
        })()
    })
}

unsafe extern "C" fn register_backend(
    session: *mut RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
    ss: *const libc::sockaddr_storage,
    ss_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| {
            let key = bytes(key as *const u8, key_len)?;
            let raw = bytes(ss as *const u8, ss_len.min(mem::size_of::<libc::sockaddr_storage>()))?;
            // Copy out so a caller passing a bare sockaddr_in is never read past its end.
            let mut storage: libc::sockaddr_storage = mem::zeroed();
            ptr::copy_nonoverlapping(raw.as_ptr(), &mut storage as *mut _ as *mut u8, raw.len());
            let addr = socket_addr_from_storage(&storage, raw.len())?;
            session_mut(session)?.register_backend(key, addr)
        })()
    })
}

unsafe extern "C" fn add_backend_to_director(
    session: *mut RawSession,
    err: ErrOut,
    key: *const c_char,
    key_len: usize,
) -> c_int {
    finish(err, unsafe {
        (|| session_mut(session)?.add_backend_to_director(bytes(key as *const u8, key_len)?))()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgehook_abi::ErrorKind;

    #[test]
    fn test_error_description_of_null() {
        let text = unsafe { CStr::from_ptr(error_description(ptr::null())) };
        assert_eq!(text.to_str().unwrap(), "unknown error");
    }

    #[test]
    fn test_failures_fill_the_error_slot() {
        let mut session = SessionState::new();
        let handle = &mut session as *mut SessionState as *mut RawSession;
        let mut err: *const CErr = ptr::null();
        let mut v = 0i64;

        let status = unsafe { env_get_i64(handle, &mut err, c"missing".as_ptr(), 7, &mut v) };
        assert_eq!(status, ErrorKind::NotFound.status());
        assert!(!err.is_null());
        let text = unsafe { CStr::from_ptr(error_description(err)) };
        assert!(text.to_str().unwrap().starts_with("not found"));
        assert!(last_error_description().unwrap().contains("missing"));
    }

    #[test]
    fn test_null_handles_are_protocol_violations() {
        let mut err: *const CErr = ptr::null();
        let status = unsafe { add_to_answer(ptr::null_mut(), &mut err, c"a.example 60 A 192.0.2.1".as_ptr()) };
        assert_eq!(status, ErrorKind::ProtocolViolation.status());

        let status = unsafe { delete_rr(ptr::null_mut(), ptr::null_mut()) };
        assert_eq!(status, ErrorKind::ProtocolViolation.status());
        assert_eq!(unsafe { flags(ptr::null()) }, 0);
    }

    #[test]
    fn test_register_backend_short_sockaddr() {
        let mut session = SessionState::new();
        let handle = &mut session as *mut SessionState as *mut RawSession;
        let addr = "192.0.2.53:53".parse().unwrap();
        let (storage, len) = edgehook_abi::ffi::socket_addr_to_storage(&addr);

        let status = unsafe {
            register_backend(handle, ptr::null_mut(), c"origin".as_ptr(), 6, &storage, len)
        };
        assert_eq!(status, 0);
        assert_eq!(session.backend(b"origin"), Some(addr));
    }
}
