use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use edgehook_abi::{HookError, Result};
use tracing::debug;

use crate::SessionOps;

/// A value stored in the session environment. Types are never coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Str(Vec<u8>),
    I64(i64),
    Bool(bool),
}

impl EnvValue {
    fn type_name(&self) -> &'static str {
        match self {
            EnvValue::Str(_) => "string",
            EnvValue::I64(_) => "i64",
            EnvValue::Bool(_) => "bool",
        }
    }
}

/// Host-owned state for one request. Created when processing begins and dropped with it.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    service_id: Option<Vec<u8>>,
    env: HashMap<Vec<u8>, EnvValue>,
    backends: HashMap<Vec<u8>, SocketAddr>,
    director: Vec<Vec<u8>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_id(&self) -> Option<&[u8]> {
        self.service_id.as_deref()
    }

    pub fn env(&self, key: &[u8]) -> Option<&EnvValue> {
        self.env.get(key)
    }

    pub fn backend(&self, key: &[u8]) -> Option<SocketAddr> {
        self.backends.get(key).copied()
    }

    /// Addresses activated for forwarding, in activation order.
    pub fn director(&self) -> Vec<SocketAddr> {
        self.director
            .iter()
            .filter_map(|key| self.backends.get(key).copied())
            .collect()
    }

    fn lookup(&self, key: &[u8]) -> Result<&EnvValue> {
        self.env
            .get(key)
            .ok_or_else(|| HookError::not_found(format!("no value for key {}", KeyDisplay(key))))
    }

    fn mismatch(key: &[u8], wanted: &str, found: &EnvValue) -> HookError {
        HookError::type_mismatch(format!(
            "key {} holds a {}, not a {}",
            KeyDisplay(key),
            found.type_name(),
            wanted
        ))
    }
}

impl SessionOps for SessionState {
    fn set_service_id(&mut self, service_id: &[u8]) -> Result<()> {
        self.service_id = Some(service_id.to_vec());
        Ok(())
    }

    fn insert_str(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.env.insert(key.to_vec(), EnvValue::Str(value.to_vec()));
        Ok(())
    }

    fn insert_i64(&mut self, key: &[u8], value: i64) -> Result<()> {
        self.env.insert(key.to_vec(), EnvValue::I64(value));
        Ok(())
    }

    fn insert_bool(&mut self, key: &[u8], value: bool) -> Result<()> {
        self.env.insert(key.to_vec(), EnvValue::Bool(value));
        Ok(())
    }

    fn get_str(&self, key: &[u8], buf: &mut [u8]) -> Result<usize> {
        match self.lookup(key)? {
            EnvValue::Str(value) => {
                if value.len() > buf.len() {
                    return Err(HookError::capacity(format!(
                        "value for key {} is {} bytes, buffer holds {}",
                        KeyDisplay(key),
                        value.len(),
                        buf.len()
                    )));
                }
                buf[..value.len()].copy_from_slice(value);
                Ok(value.len())
            }
            other => Err(Self::mismatch(key, "string", other)),
        }
    }

    fn get_i64(&self, key: &[u8]) -> Result<i64> {
        match self.lookup(key)? {
            EnvValue::I64(v) => Ok(*v),
            other => Err(Self::mismatch(key, "i64", other)),
        }
    }

    fn get_bool(&self, key: &[u8]) -> Result<bool> {
        match self.lookup(key)? {
            EnvValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    fn register_backend(&mut self, key: &[u8], addr: SocketAddr) -> Result<()> {
        match self.backends.entry(key.to_vec()) {
            Entry::Occupied(existing) => Err(HookError::protocol(format!(
                "backend {} is already registered as {}",
                KeyDisplay(key),
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                debug!(key = %KeyDisplay(key), %addr, "backend registered");
                slot.insert(addr);
                Ok(())
            }
        }
    }

    fn add_backend_to_director(&mut self, key: &[u8]) -> Result<()> {
        if !self.backends.contains_key(key) {
            return Err(HookError::not_found(format!("backend {} was never registered", KeyDisplay(key))));
        }
        if !self.director.iter().any(|k| k == key) {
            self.director.push(key.to_vec());
        }
        Ok(())
    }
}

/// Renders a byte key for messages.
struct KeyDisplay<'a>(&'a [u8]);

impl Display for KeyDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.0.escape_ascii())
    }
}
