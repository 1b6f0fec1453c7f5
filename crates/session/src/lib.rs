//! Per-request session environment.

mod state;

use std::net::SocketAddr;

use edgehook_abi::Result;

pub use state::{EnvValue, SessionState};

/// Capabilities a hook has over the current request's session.
///
/// Keys are byte strings and are not assumed to be NUL-terminated or valid UTF-8.
pub trait SessionOps {
    /// Replace the session's service identifier.
    fn set_service_id(&mut self, service_id: &[u8]) -> Result<()>;

    fn insert_str(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn insert_i64(&mut self, key: &[u8], value: i64) -> Result<()>;
    fn insert_bool(&mut self, key: &[u8], value: bool) -> Result<()>;

    /// Copy a string value into `buf`, returning its length.
    ///
    /// Fails with `CapacityExceeded` rather than truncating when `buf` is too small.
    fn get_str(&self, key: &[u8], buf: &mut [u8]) -> Result<usize>;
    fn get_i64(&self, key: &[u8]) -> Result<i64>;
    fn get_bool(&self, key: &[u8]) -> Result<bool>;

    /// Associate a backend address with `key`. A key can only be registered once.
    fn register_backend(&mut self, key: &[u8], addr: SocketAddr) -> Result<()>;

    /// Make a registered backend part of this session's forwarding set.
    fn add_backend_to_director(&mut self, key: &[u8]) -> Result<()>;

    /// Owned copy of a string value, growing the buffer as needed.
    fn get_string(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 64];
        loop {
            match self.get_str(key, &mut buf) {
                Ok(len) => {
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(e) if e.kind() == edgehook_abi::ErrorKind::CapacityExceeded && buf.len() < MAX_VALUE_LEN => {
                    buf.resize(buf.len() * 4, 0);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Upper bound used by [`SessionOps::get_string`] when growing its buffer.
pub const MAX_VALUE_LEN: usize = 1 << 20;
