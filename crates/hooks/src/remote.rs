//! Module side of the C boundary: the packet and session capabilities, reached through the
//! tables a host passed to a hook entry point.

use std::any::Any;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use edgehook_abi::ffi::{CErr, EdgeDnsFnTable, FnTable, NAME_BUF_LEN, RawPacket, RawSession, socket_addr_to_storage};
use edgehook_abi::{ErrorKind, HookError, Result};
use edgehook_packet::{PacketOps, RecordOps, RecordVisitor, Section};
use edgehook_session::SessionOps;

type Describe = unsafe extern "C" fn(err: *const CErr) -> *const c_char;

/// Turn a status and error handle into a [`HookError`] using the host's descriptions.
fn check(describe: Describe, status: c_int, err: *const CErr) -> Result<()> {
    let Some(kind) = ErrorKind::from_status(status) else {
        return Ok(());
    };
    // SAFETY: the host returns a NUL-terminated description for any handle, null included.
    let description = unsafe { describe(err) };
    let text = if description.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(description) }.to_string_lossy().into_owned()
    };
    let prefix = format!("{}: ", kind);
    let message = text.strip_prefix(&prefix).unwrap_or(&text).to_string();
    Err(HookError::new(kind, message))
}

fn c_string(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| HookError::parse("text contains a NUL byte"))
}

fn nul_terminated_len(buf: &[u8]) -> usize {
    buf.iter().position(|b| *b == 0).unwrap_or(buf.len())
}

/// Packet handle received by an exported hook.
pub struct RemotePacket<'t> {
    table: &'t FnTable,
    handle: *mut RawPacket,
}

impl<'t> RemotePacket<'t> {
    /// # Safety
    ///
    /// `handle` must be the packet handle the host passed along with `table`, and stay valid
    /// for as long as this value is used.
    pub unsafe fn new(table: &'t FnTable, handle: *mut RawPacket) -> Self {
        Self { table, handle }
    }

    fn add(&mut self, section: Section, text: &str) -> Result<()> {
        let add = match section {
            Section::Answer => self.table.add_to_answer,
            Section::Nameservers => self.table.add_to_nameservers,
            Section::Additional => self.table.add_to_additional,
            Section::Edns => return Err(HookError::protocol("records cannot be added to the edns section")),
        };
        let text = c_string(text)?;
        let mut err = ptr::null();
        let status = unsafe { add(self.handle, &mut err, text.as_ptr()) };
        check(self.table.error_description, status, err)
    }
}

struct IterContext<'a, 'v> {
    table: &'a FnTable,
    visit: &'a mut RecordVisitor<'v>,
    panic: Option<Box<dyn Any + Send>>,
}

unsafe extern "C" fn visit_record(ctx: *mut c_void, it: *mut c_void) -> bool {
    // SAFETY: `ctx` is the IterContext that `iter_section` passed to the host for this walk.
    let ctx = unsafe { &mut *(ctx as *mut IterContext<'_, '_>) };
    let mut record = RemoteRecord { table: ctx.table, it };
    match panic::catch_unwind(AssertUnwindSafe(|| (ctx.visit)(&mut record))) {
        Ok(keep_going) => keep_going,
        Err(payload) => {
            ctx.panic = Some(payload);
            false
        }
    }
}

impl PacketOps for RemotePacket<'_> {
    fn flags(&self) -> u32 {
        unsafe { (self.table.flags)(self.handle) }
    }

    fn set_flags(&mut self, flags: u32) {
        unsafe { (self.table.set_flags)(self.handle, flags) }
    }

    fn rcode(&self) -> u8 {
        unsafe { (self.table.rcode)(self.handle) }
    }

    fn set_rcode(&mut self, rcode: u8) {
        unsafe { (self.table.set_rcode)(self.handle, rcode) }
    }

    fn opcode(&self) -> u8 {
        unsafe { (self.table.opcode)(self.handle) }
    }

    fn set_opcode(&mut self, opcode: u8) {
        unsafe { (self.table.set_opcode)(self.handle, opcode) }
    }

    fn iter_section(&mut self, section: Section, visit: &mut RecordVisitor<'_>) {
        let iter = match section {
            Section::Answer => self.table.iter_answer,
            Section::Nameservers => self.table.iter_nameservers,
            Section::Additional => self.table.iter_additional,
            Section::Edns => self.table.iter_edns,
        };
        let mut ctx = IterContext {
            table: self.table,
            visit,
            panic: None,
        };
        unsafe { iter(self.handle, visit_record, &mut ctx as *mut IterContext<'_, '_> as *mut c_void) };
        // Panics cannot unwind through the host, so they are carried over and resumed here.
        if let Some(payload) = ctx.panic {
            panic::resume_unwind(payload);
        }
    }

    fn add_to_question(&mut self, text: &str) -> Result<()> {
        let text = c_string(text)?;
        let mut err = ptr::null();
        let status = unsafe { (self.table.add_to_question)(self.handle, &mut err, text.as_ptr()) };
        check(self.table.error_description, status, err)
    }

    fn add_record(&mut self, section: Section, text: &str) -> Result<()> {
        self.add(section, text)
    }

    fn raw_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let mut err = ptr::null();
        let mut len = 0usize;
        let status = unsafe { (self.table.raw_packet)(self.handle, &mut err, buf.as_mut_ptr(), &mut len, buf.len()) };
        check(self.table.error_description, status, err)?;
        Ok(len)
    }

    fn question(&self, name: &mut [u8; NAME_BUF_LEN]) -> Result<(usize, u16)> {
        let mut err = ptr::null();
        let mut rr_type = 0u16;
        let status =
            unsafe { (self.table.question)(self.handle, &mut err, name.as_mut_ptr() as *mut c_char, &mut rr_type) };
        check(self.table.error_description, status, err)?;
        Ok((nul_terminated_len(name), rr_type))
    }

    fn rename_with_raw_names(&mut self, target: &[u8], source: &[u8], match_suffix: bool) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe {
            (self.table.rename_with_raw_names)(
                self.handle,
                &mut err,
                target.as_ptr(),
                target.len(),
                source.as_ptr(),
                source.len(),
                match_suffix,
            )
        };
        check(self.table.error_description, status, err)
    }

    fn raw_name_from_str(&self, name: &str, out: &mut [u8; NAME_BUF_LEN]) -> Result<usize> {
        let mut err = ptr::null();
        let mut len = 0usize;
        let status = unsafe {
            (self.table.raw_name_from_str)(out.as_mut_ptr(), &mut len, &mut err, name.as_ptr() as *const c_char, name.len())
        };
        check(self.table.error_description, status, err)?;
        Ok(len)
    }
}

/// Record cursor received by an iteration callback.
pub struct RemoteRecord<'t> {
    table: &'t FnTable,
    it: *mut c_void,
}

impl RecordOps for RemoteRecord<'_> {
    fn name(&self, buf: &mut [u8; NAME_BUF_LEN]) -> Result<usize> {
        let mut err = ptr::null();
        let status = unsafe { (self.table.name)(self.it, &mut err, buf.as_mut_ptr() as *mut c_char) };
        check(self.table.error_description, status, err)?;
        Ok(nul_terminated_len(buf))
    }

    fn rr_type(&self) -> Result<u16> {
        let mut err = ptr::null();
        let mut v = 0u16;
        let status = unsafe { (self.table.rr_type)(self.it, &mut err, &mut v) };
        check(self.table.error_description, status, err)?;
        Ok(v)
    }

    fn rr_class(&self) -> Result<u16> {
        let mut err = ptr::null();
        let mut v = 0u16;
        let status = unsafe { (self.table.rr_class)(self.it, &mut err, &mut v) };
        check(self.table.error_description, status, err)?;
        Ok(v)
    }

    fn rr_ttl(&self) -> Result<u32> {
        let mut err = ptr::null();
        let mut v = 0u32;
        let status = unsafe { (self.table.rr_ttl)(self.it, &mut err, &mut v) };
        check(self.table.error_description, status, err)?;
        Ok(v)
    }

    fn set_rr_ttl(&mut self, ttl: u32) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe { (self.table.set_rr_ttl)(self.it, &mut err, ttl) };
        check(self.table.error_description, status, err)
    }

    fn rr_ip(&self, buf: &mut [u8]) -> Result<usize> {
        let mut err = ptr::null();
        let mut len = 0usize;
        let status = unsafe { (self.table.rr_ip)(self.it, &mut err, buf.as_mut_ptr(), &mut len, buf.len()) };
        check(self.table.error_description, status, err)?;
        Ok(len)
    }

    fn set_rr_ip(&mut self, ip: &[u8]) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe { (self.table.set_rr_ip)(self.it, &mut err, ip.as_ptr(), ip.len()) };
        check(self.table.error_description, status, err)
    }

    fn set_raw_name(&mut self, raw_name: &[u8]) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe { (self.table.set_raw_name)(self.it, &mut err, raw_name.as_ptr(), raw_name.len()) };
        check(self.table.error_description, status, err)
    }

    fn set_name(&mut self, name: &str, default_zone_raw: &[u8]) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe {
            (self.table.set_name)(
                self.it,
                &mut err,
                name.as_ptr() as *const c_char,
                name.len(),
                default_zone_raw.as_ptr(),
                default_zone_raw.len(),
            )
        };
        check(self.table.error_description, status, err)
    }

    fn delete(&mut self) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe { (self.table.delete_rr)(self.it, &mut err) };
        check(self.table.error_description, status, err)
    }
}

/// Session handle received by an exported hook.
pub struct RemoteSession<'t> {
    table: &'t EdgeDnsFnTable,
    handle: *mut RawSession,
}

impl<'t> RemoteSession<'t> {
    /// # Safety
    ///
    /// `handle` must be the session handle the host passed along with `table`, and stay valid
    /// for as long as this value is used.
    pub unsafe fn new(table: &'t EdgeDnsFnTable, handle: *mut RawSession) -> Self {
        Self { table, handle }
    }
}

impl SessionOps for RemoteSession<'_> {
    fn set_service_id(&mut self, service_id: &[u8]) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe {
            (self.table.set_service_id)(self.handle, &mut err, service_id.as_ptr() as *const c_char, service_id.len())
        };
        check(self.table.error_description, status, err)
    }

    fn insert_str(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe {
            (self.table.env_insert_str)(
                self.handle,
                &mut err,
                key.as_ptr() as *const c_char,
                key.len(),
                value.as_ptr() as *const c_char,
                value.len(),
            )
        };
        check(self.table.error_description, status, err)
    }

    fn insert_i64(&mut self, key: &[u8], value: i64) -> Result<()> {
        let mut err = ptr::null();
        let status =
            unsafe { (self.table.env_insert_i64)(self.handle, &mut err, key.as_ptr() as *const c_char, key.len(), value) };
        check(self.table.error_description, status, err)
    }

    fn insert_bool(&mut self, key: &[u8], value: bool) -> Result<()> {
        let mut err = ptr::null();
        let status =
            unsafe { (self.table.env_insert_bool)(self.handle, &mut err, key.as_ptr() as *const c_char, key.len(), value) };
        check(self.table.error_description, status, err)
    }

    fn get_str(&self, key: &[u8], buf: &mut [u8]) -> Result<usize> {
        let mut err = ptr::null();
        let mut len = 0usize;
        let status = unsafe {
            (self.table.env_get_str)(
                self.handle,
                &mut err,
                key.as_ptr() as *const c_char,
                key.len(),
                buf.as_mut_ptr() as *mut c_char,
                &mut len,
                buf.len(),
            )
        };
        check(self.table.error_description, status, err)?;
        Ok(len)
    }

    fn get_i64(&self, key: &[u8]) -> Result<i64> {
        let mut err = ptr::null();
        let mut v = 0i64;
        let status =
            unsafe { (self.table.env_get_i64)(self.handle, &mut err, key.as_ptr() as *const c_char, key.len(), &mut v) };
        check(self.table.error_description, status, err)?;
        Ok(v)
    }

    fn get_bool(&self, key: &[u8]) -> Result<bool> {
        let mut err = ptr::null();
        let mut v = false;
        let status =
            unsafe { (self.table.env_get_bool)(self.handle, &mut err, key.as_ptr() as *const c_char, key.len(), &mut v) };
        check(self.table.error_description, status, err)?;
        Ok(v)
    }

    fn register_backend(&mut self, key: &[u8], addr: SocketAddr) -> Result<()> {
        let (storage, len) = socket_addr_to_storage(&addr);
        let mut err = ptr::null();
        let status = unsafe {
            (self.table.register_backend)(self.handle, &mut err, key.as_ptr() as *const c_char, key.len(), &storage, len)
        };
        check(self.table.error_description, status, err)
    }

    fn add_backend_to_director(&mut self, key: &[u8]) -> Result<()> {
        let mut err = ptr::null();
        let status = unsafe {
            (self.table.add_backend_to_director)(self.handle, &mut err, key.as_ptr() as *const c_char, key.len())
        };
        check(self.table.error_description, status, err)
    }
}
