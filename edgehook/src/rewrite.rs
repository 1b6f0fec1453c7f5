use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use edgehook_abi::{Action, ErrorKind, Result};
use edgehook_dns::{DnsResponseCode, DomainName, PacketFlags};
use edgehook_hooks::Hook;
use edgehook_packet::{PacketOps, Section};
use edgehook_session::SessionOps;
use tracing::{debug, info, warn};

use crate::config::{self, CONFIG_PATH_ENV, ConfigError, DEFAULT_CONFIG_PATH, RewriteConfig};
use crate::matcher::NameMatcher;

/// Session flag set when the query was renamed, so delivery knows to undo it.
pub const RENAMED_KEY: &[u8] = b"edgehook.renamed";

/// Session flag set when the query was answered with a synthesized NXDOMAIN.
pub const BLOCKED_KEY: &[u8] = b"edgehook.blocked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
    pub suffix: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRule {
    pub key: String,
    pub addr: SocketAddr,
}

/// Everything [`RewriteHook`] acts on. Swapped as a whole.
#[derive(Debug, Clone, Default)]
pub struct RewriteRules {
    pub blocked: NameMatcher,
    pub max_ttl: Option<u32>,
    pub service_id: Option<String>,
    pub bypass_env_key: Option<String>,
    pub renames: Vec<RenameRule>,
    pub backends: Vec<BackendRule>,
}

impl RewriteRules {
    pub fn from_config(config: &RewriteConfig) -> anyhow::Result<Self> {
        let renames = config
            .rename
            .iter()
            .map(|rule| {
                Ok(RenameRule {
                    from: DomainName::from_user(&rule.from)?.to_fqdn(),
                    to: DomainName::from_user(&rule.to)?.to_fqdn(),
                    suffix: rule.suffix,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            blocked: NameMatcher::load(config.block.iter().map(String::as_str))?,
            max_ttl: config.max_ttl,
            service_id: config.service_id.clone(),
            bypass_env_key: config.bypass_env_key.clone(),
            renames,
            backends: config
                .backend
                .iter()
                .map(|b| BackendRule {
                    key: b.key.clone(),
                    addr: b.addr,
                })
                .collect(),
        })
    }
}

/// Reference hook: blocks names, renames queries into an origin namespace and back, pins
/// backends, and clamps TTLs on the way out.
///
/// Rules are process-wide and may be replaced with [`RewriteHook::reload`] while requests run;
/// each hook call works on the rules it loaded when it started.
pub struct RewriteHook {
    rules: ArcSwap<RewriteRules>,
}

impl Default for RewriteHook {
    fn default() -> Self {
        Self::new(RewriteRules::default())
    }
}

impl RewriteHook {
    pub fn new(rules: RewriteRules) -> Self {
        Self {
            rules: ArcSwap::new(rules.into()),
        }
    }

    pub fn from_config(config: &RewriteConfig) -> anyhow::Result<Self> {
        Ok(Self::new(RewriteRules::from_config(config)?))
    }

    /// Build from the config file named by `EDGEHOOK_CONFIG`. Used when loaded as a module,
    /// where there is nobody to report a startup error to: problems are logged and the hook
    /// starts with no rules.
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or(DEFAULT_CONFIG_PATH.to_string());
        let rules = match config::decode_from_path(&path) {
            Ok(cfg) => RewriteRules::from_config(&cfg.rewrite),
            Err(ConfigError::NotFound) => Ok(RewriteRules::default()),
            Err(e) => Err(e.into()),
        };
        match rules {
            Ok(rules) => Self::new(rules),
            Err(e) => {
                warn!(%path, error = %e, "invalid rewrite config, starting without rules");
                Self::default()
            }
        }
    }

    pub fn reload(&self, rules: RewriteRules) {
        self.rules.store(Arc::new(rules));
    }

    pub fn rules(&self) -> Arc<RewriteRules> {
        self.rules.load_full()
    }

    fn receive(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Result<Action> {
        let rules = self.rules.load();

        for backend in &rules.backends {
            match session.register_backend(backend.key.as_bytes(), backend.addr) {
                Ok(()) => {}
                // Already there after a restart.
                Err(e) if e.kind() == ErrorKind::ProtocolViolation => debug!(key = %backend.key, "backend kept"),
                Err(e) => return Err(e),
            }
            session.add_backend_to_director(backend.key.as_bytes())?;
        }
        if let Some(service_id) = &rules.service_id {
            session.set_service_id(service_id.as_bytes())?;
        }

        let qname = match packet.question_name() {
            Ok((qname, _)) => qname,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Action::Default),
            Err(e) => return Err(e),
        };

        if rules.blocked.is_match(&qname) {
            info!(%qname, "blocked");
            packet.set_flags(packet.flags() | (PacketFlags::QR | PacketFlags::RA).bits());
            let nxdomain: u16 = DnsResponseCode::NxDomain.into();
            packet.set_rcode(nxdomain as u8);
            session.insert_bool(BLOCKED_KEY, true)?;
            return Ok(Action::Synth);
        }

        for rule in &rules.renames {
            packet.rename(&rule.to, &rule.from, rule.suffix)?;
        }
        // Only a query that left the public namespace is mapped back on delivery.
        if !rules.renames.is_empty() && packet.question_name()?.0 != qname {
            session.insert_bool(RENAMED_KEY, true)?;
        }
        Ok(Action::Lookup)
    }

    fn deliver(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Result<Action> {
        let rules = self.rules.load();

        if flag(session, RENAMED_KEY)? {
            for rule in rules.renames.iter().rev() {
                packet.rename(&rule.from, &rule.to, rule.suffix)?;
            }
        }

        if let Some(max_ttl) = rules.max_ttl {
            for section in [Section::Answer, Section::Nameservers, Section::Additional] {
                clamp_ttls(packet, section, max_ttl)?;
            }
        }
        Ok(Action::Deliver)
    }
}

/// Read a boolean session flag, treating an absent key as `false`.
fn flag(session: &dyn SessionOps, key: &[u8]) -> Result<bool> {
    match session.get_bool(key) {
        Ok(v) => Ok(v),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn clamp_ttls(packet: &mut dyn PacketOps, section: Section, max_ttl: u32) -> Result<()> {
    let mut failure = None;
    packet.iter_section(section, &mut |rr| {
        let clamped = rr.rr_ttl().and_then(|ttl| if ttl > max_ttl { rr.set_rr_ttl(max_ttl) } else { Ok(()) });
        match clamped {
            Ok(()) => true,
            Err(e) => {
                failure = Some(e);
                false
            }
        }
    });
    failure.map_or(Ok(()), Err)
}

impl Hook for RewriteHook {
    fn on_receive(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        self.receive(session, packet).unwrap_or_else(|e| {
            warn!(error = %e, "receive hook failed");
            Action::Error
        })
    }

    fn on_deliver(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        self.deliver(session, packet).unwrap_or_else(|e| {
            warn!(error = %e, "deliver hook failed");
            Action::Error
        })
    }

    fn on_cache_hit(&self, session: &mut dyn SessionOps, _packet: &mut dyn PacketOps) -> Action {
        let rules = self.rules.load();
        let Some(key) = &rules.bypass_env_key else {
            return Action::Default;
        };
        match flag(session, key.as_bytes()) {
            Ok(true) => Action::Pass,
            Ok(false) => Action::Default,
            Err(e) => {
                warn!(%key, error = %e, "ignoring bypass flag");
                Action::Default
            }
        }
    }

    fn on_cache_miss(&self, _session: &mut dyn SessionOps, _packet: &mut dyn PacketOps) -> Action {
        Action::Fetch
    }
}

#[cfg(test)]
#[path = "rewrite_tests.rs"]
mod rewrite_tests;
