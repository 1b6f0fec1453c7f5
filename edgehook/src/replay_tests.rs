use edgehook_abi::AbiVersions;
use edgehook_dns::DnsResponseCode;
use edgehook_hooks::HookDispatcher;

use super::*;
use crate::config::sample_config;
use crate::rewrite::RewriteHook;

/// Returns the same action at each point, whatever the request.
struct Scripted {
    receive: Action,
    hit: Action,
    miss: Action,
    deliver: Action,
}

impl Default for Scripted {
    fn default() -> Self {
        Self {
            receive: Action::Lookup,
            hit: Action::Default,
            miss: Action::Fetch,
            deliver: Action::Deliver,
        }
    }
}

impl HookRunner for Scripted {
    fn run(&self, point: HookPoint, _session: &mut SessionState, _packet: &mut ParsedPacket) -> edgehook_abi::Result<Action> {
        Ok(match point {
            HookPoint::Receive => self.receive,
            HookPoint::CacheHit => self.hit,
            HookPoint::CacheMiss => self.miss,
            HookPoint::Deliver => self.deliver,
        })
    }
}

fn zone() -> Zone {
    let config = sample_config();
    Zone::parse(config.zone.iter().map(|z| z.record.as_str())).unwrap()
}

fn scripted(script: Scripted) -> Replay {
    Replay::new(Arc::new(script), zone(), 64)
}

fn points(outcome: &ReplayOutcome) -> Vec<HookPoint> {
    outcome.trace.iter().map(|(point, _)| *point).collect()
}

#[test]
fn test_zone_answers() {
    let zone = zone();
    assert_eq!(zone.len(), 3);

    let www = DomainName::from_user("www.origin.internal").unwrap();
    let answer = zone.answer(&www, RecordType::A);
    assert_eq!(answer.records.len(), 1);
    assert!(!answer.nxdomain);

    let api = DomainName::from_user("api.origin.internal").unwrap();
    let answer = zone.answer(&api, RecordType::AAAA);
    assert_eq!(answer.records.len(), 2);
    assert_eq!(answer.records[0].record_type, RecordType::CNAME);
    assert_eq!(answer.records[1].record_type, RecordType::AAAA);

    let answer = zone.answer(&api, RecordType::CNAME);
    assert_eq!(answer.records.len(), 1);

    let answer = zone.answer(&www, RecordType::MX);
    assert!(answer.records.is_empty());
    assert!(!answer.nxdomain);

    let missing = DomainName::from_user("nope.origin.internal").unwrap();
    assert!(zone.answer(&missing, RecordType::A).nxdomain);
}

#[test]
fn test_zone_rejects_bad_records() {
    assert!(Zone::parse(["www.example.com 60 A not-an-address"]).is_err());
}

#[tokio::test]
async fn test_miss_then_hit() {
    let replay = scripted(Scripted::default());

    let first = replay.resolve("www.origin.internal", RecordType::A, 1).await.unwrap();
    assert_eq!(first.disposition, Disposition::Delivered);
    assert!(!first.from_cache);
    assert_eq!(points(&first), vec![HookPoint::Receive, HookPoint::CacheMiss, HookPoint::Deliver]);
    let response = first.response.unwrap();
    assert!(response.flags.response);
    assert_eq!(response.answers().len(), 1);

    let second = replay.resolve("www.origin.internal", RecordType::A, 2).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(points(&second), vec![HookPoint::Receive, HookPoint::CacheHit, HookPoint::Deliver]);
    assert_eq!(second.response.unwrap().answers().len(), 1);
}

#[tokio::test]
async fn test_nxdomain_is_not_cached() {
    let replay = scripted(Scripted::default());
    for id in 0..2 {
        let outcome = replay.resolve("nope.origin.internal", RecordType::A, id).await.unwrap();
        assert_eq!(points(&outcome)[1], HookPoint::CacheMiss);
        assert_eq!(outcome.response.unwrap().response_code().unwrap(), DnsResponseCode::NxDomain);
    }
}

#[tokio::test]
async fn test_pass_skips_cache() {
    let replay = scripted(Scripted {
        receive: Action::Pass,
        ..Default::default()
    });
    for id in 0..2 {
        let outcome = replay.resolve("www.origin.internal", RecordType::A, id).await.unwrap();
        assert_eq!(points(&outcome), vec![HookPoint::Receive, HookPoint::Deliver]);
        assert!(!outcome.from_cache);
    }
}

#[tokio::test]
async fn test_drop_and_error() {
    let replay = scripted(Scripted {
        receive: Action::Drop,
        ..Default::default()
    });
    let outcome = replay.resolve("www.origin.internal", RecordType::A, 1).await.unwrap();
    assert_eq!(outcome.disposition, Disposition::Dropped);
    assert!(outcome.response.is_none());

    let replay = scripted(Scripted {
        miss: Action::Error,
        ..Default::default()
    });
    let outcome = replay.resolve("www.origin.internal", RecordType::A, 1).await.unwrap();
    assert!(matches!(outcome.disposition, Disposition::Failed(_)));
    assert_eq!(points(&outcome), vec![HookPoint::Receive, HookPoint::CacheMiss]);
}

#[tokio::test]
async fn test_restart_is_bounded() {
    let replay = scripted(Scripted {
        hit: Action::Restart,
        ..Default::default()
    });
    replay.resolve("www.origin.internal", RecordType::A, 1).await.unwrap();

    let outcome = replay.resolve("www.origin.internal", RecordType::A, 2).await.unwrap();
    assert!(matches!(outcome.disposition, Disposition::Failed(_)));
    let hits = outcome.trace.iter().filter(|(p, _)| *p == HookPoint::CacheHit).count();
    assert_eq!(hits, MAX_RESTARTS + 1);
}

#[tokio::test]
async fn test_hit_for_pass_marks_key() {
    let replay = scripted(Scripted {
        hit: Action::HitForPass,
        ..Default::default()
    });
    replay.resolve("www.origin.internal", RecordType::A, 1).await.unwrap();

    let marked = replay.resolve("www.origin.internal", RecordType::A, 2).await.unwrap();
    assert_eq!(points(&marked), vec![HookPoint::Receive, HookPoint::CacheHit, HookPoint::Deliver]);
    assert!(!marked.from_cache);

    let passed = replay.resolve("www.origin.internal", RecordType::A, 3).await.unwrap();
    assert_eq!(points(&passed), vec![HookPoint::Receive, HookPoint::Deliver]);
    assert_eq!(passed.disposition, Disposition::Delivered);
}

#[tokio::test]
async fn test_rewrite_hook_end_to_end() {
    let config = sample_config();
    let negotiated = AbiVersions::CURRENT.negotiate(AbiVersions::CURRENT).unwrap();
    let hook = RewriteHook::from_config(&config.rewrite).unwrap();
    let replay = Replay::new(Arc::new(HookDispatcher::new(hook, negotiated)), zone(), 64);

    let first = replay.run_all(&config.replay).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].query, "www.example.com A");
    assert_eq!(first[2].query, "ads.example.com A");

    let www = first[0].response.as_ref().unwrap();
    assert_eq!(www.questions()[0].qname.as_str(), "www.example.com");
    assert_eq!(www.answers()[0].name.as_str(), "www.example.com");
    assert_eq!(www.answers()[0].ttl, 300);

    let api = first[1].response.as_ref().unwrap();
    assert_eq!(api.answers().len(), 2);
    assert_eq!(api.answers()[0].name.as_str(), "api.example.com");

    assert_eq!(points(&first[2]), vec![HookPoint::Receive, HookPoint::Deliver]);
    let ads = first[2].response.as_ref().unwrap();
    assert_eq!(ads.response_code().unwrap(), DnsResponseCode::NxDomain);

    let second = replay.run_all(&config.replay).await.unwrap();
    assert!(second[0].from_cache);
    assert!(second[1].from_cache);
    assert_eq!(second[0].response.as_ref().unwrap().answers()[0].name.as_str(), "www.example.com");
}

#[tokio::test]
async fn test_unknown_query_type() {
    let replay = scripted(Scripted::default());
    let queries = vec![ReplayQuery {
        name: "www.origin.internal".into(),
        qtype: "BOGUS".into(),
    }];
    assert!(replay.run_all(&queries).await.is_err());
}
