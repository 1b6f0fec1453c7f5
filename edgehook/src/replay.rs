//! A minimal host: runs configured queries through the hook lifecycle against an in-memory
//! zone, with a shared answer cache.

use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use edgehook_abi::{Action, HookError, HookPoint};
use edgehook_dns::{
    ClassType, DnsMessage, DnsMessageBuilder, DnsQuestion, DnsRecord, DnsRecordData, DnsResponseCode, DomainName,
    RecordType,
};
use edgehook_hooks::HookRunner;
use edgehook_packet::ParsedPacket;
use edgehook_session::SessionState;
use moka::future::{Cache, CacheBuilder};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::ReplayQuery;

/// How many times a request may be restarted before it is failed.
const MAX_RESTARTS: usize = 3;

/// Longest CNAME chain followed inside the zone.
const MAX_CNAME_HOPS: usize = 8;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub name: DomainName,
    pub record_type: RecordType,
}

impl CacheKey {
    pub fn from_message(message: &DnsMessage) -> Option<Self> {
        message.questions().first().map(|q| CacheKey {
            name: q.qname.clone(),
            record_type: q.qtype,
        })
    }
}

/// Records the simulated backend answers from.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    records: Vec<DnsRecord>,
}

/// What the zone has for a name and type.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAnswer {
    pub records: Vec<DnsRecord>,
    pub nxdomain: bool,
}

impl Zone {
    pub fn parse<'a, I>(texts: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let records = texts
            .into_iter()
            .map(|text| text.parse::<DnsRecord>().map_err(|e| anyhow!("zone record '{}': {:#}", text, e)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of `record_type` at `name`, following CNAMEs.
    pub fn answer(&self, name: &DomainName, record_type: RecordType) -> ZoneAnswer {
        let mut records = Vec::new();
        let mut current = name.clone();

        for _ in 0..MAX_CNAME_HOPS {
            let at_name: Vec<&DnsRecord> = self.records.iter().filter(|r| r.name == current).collect();
            if at_name.is_empty() {
                // Only the queried name itself can be absent; a dangling CNAME is still an answer.
                return ZoneAnswer {
                    nxdomain: records.is_empty(),
                    records,
                };
            }

            let matching: Vec<DnsRecord> = at_name
                .iter()
                .filter(|r| r.record_type == record_type)
                .map(|r| (*r).clone())
                .collect();
            if !matching.is_empty() || record_type == RecordType::CNAME {
                records.extend(matching);
                break;
            }

            match at_name.iter().find(|r| r.record_type == RecordType::CNAME) {
                Some(cname) => {
                    records.push((*cname).clone());
                    match &cname.data {
                        DnsRecordData::DomainName(target) => current = target.clone(),
                        _ => break,
                    }
                }
                None => break,
            }
        }

        ZoneAnswer {
            records,
            nxdomain: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    Dropped,
    Failed(String),
}

impl Display for Disposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Delivered => f.write_str("delivered"),
            Disposition::Dropped => f.write_str("dropped"),
            Disposition::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of replaying one query.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub query: String,
    pub disposition: Disposition,
    /// Every hook call made, in order, across restarts.
    pub trace: Vec<(HookPoint, Action)>,
    pub from_cache: bool,
    pub response: Option<DnsMessage>,
    pub director: Vec<SocketAddr>,
}

enum Step {
    Restart,
    Done { disposition: Disposition, from_cache: bool },
}

impl Step {
    fn failed(reason: impl Display) -> Self {
        Step::Done {
            disposition: Disposition::Failed(reason.to_string()),
            from_cache: false,
        }
    }
}

#[derive(Clone)]
pub struct Replay {
    runner: Arc<dyn HookRunner>,
    cache: Cache<CacheKey, Arc<[DnsRecord]>>,
    hit_for_pass: Cache<CacheKey, ()>,
    zone: Arc<Zone>,
}

impl Replay {
    pub fn new(runner: Arc<dyn HookRunner>, zone: Zone, capacity: u64) -> Self {
        Self {
            runner,
            cache: CacheBuilder::new(capacity).build(),
            hit_for_pass: CacheBuilder::new(capacity).build(),
            zone: Arc::new(zone),
        }
    }

    /// Replay every query concurrently, each on its own task with its own session.
    /// Outcomes come back in query order.
    pub async fn run_all(&self, queries: &[ReplayQuery]) -> anyhow::Result<Vec<ReplayOutcome>> {
        let mut tasks = JoinSet::new();
        for (i, query) in queries.iter().enumerate() {
            let record_type = RecordType::from_mnemonic(&query.qtype)
                .ok_or_else(|| anyhow!("unknown query type '{}'", query.qtype))?;
            let replay = self.clone();
            let name = query.name.clone();
            tasks.spawn(async move { (i, replay.resolve(&name, record_type, i as u16).await) });
        }

        let mut outcomes: Vec<Option<ReplayOutcome>> = vec![None; queries.len()];
        while let Some(joined) = tasks.join_next().await {
            let (i, outcome) = joined?;
            outcomes[i] = Some(outcome?);
        }
        Ok(outcomes.into_iter().flatten().collect())
    }

    pub async fn resolve(&self, name: &str, record_type: RecordType, id: u16) -> anyhow::Result<ReplayOutcome> {
        let question = DnsQuestion::new(DomainName::from_user(name)?, record_type, ClassType::IN);
        let query = DnsMessageBuilder::new().with_id(id).add_question(question).build();
        let label = format!("{} {}", name, record_type);
        let mut trace = Vec::new();
        // A restart keeps the session and starts over from the original query.
        let mut session = SessionState::new();

        for attempt in 0..=MAX_RESTARTS {
            let mut packet = ParsedPacket::new(query.clone());

            if let Step::Done {
                disposition,
                from_cache,
            } = self.attempt(&mut session, &mut packet, &mut trace).await
            {
                let response = (disposition == Disposition::Delivered).then(|| packet.into_message());
                return Ok(ReplayOutcome {
                    query: label,
                    disposition,
                    trace,
                    from_cache,
                    response,
                    director: session.director(),
                });
            }
            debug!(query = %label, attempt, "restarting");
        }

        Ok(ReplayOutcome {
            query: label,
            disposition: Disposition::Failed(format!("restarted more than {} times", MAX_RESTARTS)),
            trace,
            from_cache: false,
            response: None,
            director: session.director(),
        })
    }

    fn run(
        &self,
        point: HookPoint,
        session: &mut SessionState,
        packet: &mut ParsedPacket,
        trace: &mut Vec<(HookPoint, Action)>,
    ) -> Result<Action, HookError> {
        let action = self.runner.run(point, session, packet)?;
        trace.push((point, action));
        Ok(action)
    }

    async fn attempt(
        &self,
        session: &mut SessionState,
        packet: &mut ParsedPacket,
        trace: &mut Vec<(HookPoint, Action)>,
    ) -> Step {
        let mut from_cache = false;

        match self.run(HookPoint::Receive, session, packet, trace) {
            Err(e) => return Step::failed(e),
            Ok(Action::Lookup | Action::Default) => {
                let Some(key) = CacheKey::from_message(packet.message()) else {
                    return Step::failed("query has no question");
                };

                if self.hit_for_pass.contains_key(&key) {
                    debug!(?key, "hit-for-pass, skipping cache");
                    self.fetch(session, packet, None).await;
                } else if let Some(records) = self.cache.get(&key).await {
                    fill(packet, records.to_vec(), DnsResponseCode::NoError);
                    match self.run(HookPoint::CacheHit, session, packet, trace) {
                        Err(e) => return Step::failed(e),
                        Ok(Action::Default | Action::DeliverStale) => from_cache = true,
                        Ok(Action::Pass) => self.fetch(session, packet, None).await,
                        Ok(Action::HitForPass) => {
                            self.hit_for_pass.insert(key, ()).await;
                            self.fetch(session, packet, None).await;
                        }
                        Ok(Action::Restart) => return Step::Restart,
                        Ok(action) => return Step::failed(format!("cache hit hook returned {}", action)),
                    }
                } else {
                    match self.run(HookPoint::CacheMiss, session, packet, trace) {
                        Err(e) => return Step::failed(e),
                        Ok(Action::Fetch | Action::Miss | Action::Hash | Action::Default) => {
                            self.fetch(session, packet, Some(key)).await
                        }
                        Ok(Action::Purge) => {
                            self.cache.invalidate(&key).await;
                            self.fetch(session, packet, Some(key)).await;
                        }
                        Ok(action) => return Step::failed(format!("cache miss hook returned {}", action)),
                    }
                }
            }
            Ok(Action::Pass | Action::Pipe) => self.fetch(session, packet, None).await,
            Ok(Action::Synth) => {}
            Ok(Action::Drop) => {
                return Step::Done {
                    disposition: Disposition::Dropped,
                    from_cache,
                };
            }
            Ok(action) => return Step::failed(format!("receive hook returned {}", action)),
        }

        match self.run(HookPoint::Deliver, session, packet, trace) {
            Err(e) => Step::failed(e),
            Ok(Action::Drop) => Step::Done {
                disposition: Disposition::Dropped,
                from_cache,
            },
            Ok(Action::Error) => Step::failed("deliver hook returned ERROR"),
            Ok(_) => Step::Done {
                disposition: Disposition::Delivered,
                from_cache,
            },
        }
    }

    /// Answer from the zone. With a key, positive answers are cached under it.
    async fn fetch(&self, session: &SessionState, packet: &mut ParsedPacket, store: Option<CacheKey>) {
        let Some(question) = packet.message().questions().first().cloned() else {
            return;
        };
        let director = session.director();
        if !director.is_empty() {
            debug!(backends = ?director, "forwarding");
        }

        let answer = self.zone.answer(&question.qname, question.qtype);
        let rcode = if answer.nxdomain {
            DnsResponseCode::NxDomain
        } else {
            DnsResponseCode::NoError
        };
        if let Some(key) = store {
            if !answer.records.is_empty() {
                self.cache.insert(key, answer.records.clone().into()).await;
            }
        }
        fill(packet, answer.records, rcode);
    }
}

/// Turn the packet into a response carrying `records`.
fn fill(packet: &mut ParsedPacket, records: Vec<DnsRecord>, rcode: DnsResponseCode) {
    let message = packet.message_mut();
    message.flags.response = true;
    message.flags.recursion_available = true;
    message.set_response_code(rcode);
    *message.answers_mut() = records;
}

/// Log an outcome and its answers.
pub fn report(round: u32, outcome: &ReplayOutcome) {
    let actions: Vec<String> = outcome
        .trace
        .iter()
        .map(|(point, action)| format!("{}={}", point, action))
        .collect();
    info!(
        round,
        query = %outcome.query,
        disposition = %outcome.disposition,
        cached = outcome.from_cache,
        actions = %actions.join(" "),
        "replayed"
    );
    if let Some(response) = &outcome.response {
        for record in response.answers() {
            info!("  {}", record);
        }
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod replay_tests;
