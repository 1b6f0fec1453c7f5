use std::net::{IpAddr, SocketAddr};
use std::ptr;

use edgehook_abi::ffi::{FnTable, RawPacket, RawSession};
use edgehook_abi::{Action, ErrorKind, HookPoint};
use edgehook_dns::{DnsMessageBuilder, PacketFlags};
use edgehook_hooks::{Hook, HookRunner, ModuleEntries, export_hooks, host_tables};
use edgehook_packet::{PacketOps, ParsedPacket};
use edgehook_session::{EnvValue, SessionOps, SessionState};

#[derive(Default)]
struct ProbeHook;

fn record_status(session: &mut dyn SessionOps, key: &[u8], kind: Option<ErrorKind>) {
    let status = kind.map(|k| k.status() as i64).unwrap_or(0);
    session.insert_i64(key, status).unwrap();
}

impl Hook for ProbeHook {
    fn on_receive(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        let mode = session.get_string(b"mode").unwrap_or_default();
        match mode.as_slice() {
            b"rewrite" => {
                let drop: IpAddr = "192.0.2.2".parse().unwrap();
                let mut kept = 0;
                packet.iter_answer(&mut |rr| {
                    if rr.ip_addr().unwrap() == drop {
                        rr.delete().unwrap();
                    } else {
                        rr.set_rr_ttl(30).unwrap();
                        kept += 1;
                    }
                    true
                });
                packet.add_to_additional("extra.example.com 60 TXT \"hello\"").unwrap();
                packet.rename("example.net", "example.com", true).unwrap();
                session.insert_i64(b"kept", kept).unwrap();
                Action::Lookup
            }
            b"errors" => {
                let missing = session.get_i64(b"nope").err().map(|e| e.kind());
                record_status(session, b"missing", missing);
                let mismatch = session.get_bool(b"mode").err().map(|e| e.kind());
                record_status(session, b"mismatch", mismatch);
                let mut small = [0u8; 2];
                let small = session.get_str(b"mode", &mut small).err().map(|e| e.kind());
                record_status(session, b"small", small);
                let parse = packet.add_to_answer("garbage").err().map(|e| e.kind());
                record_status(session, b"parse", parse);
                let mut tiny = [0u8; 8];
                let raw = packet.raw_packet(&mut tiny).err().map(|e| e.kind());
                record_status(session, b"raw", raw);

                let mut stale = None;
                packet.iter_answer(&mut |rr| {
                    rr.delete().unwrap();
                    stale = rr.rr_ttl().err().map(|e| e.kind());
                    false
                });
                record_status(session, b"stale", stale);
                Action::Pass
            }
            b"backend" => {
                let addr: SocketAddr = "[2001:db8::53]:5353".parse().unwrap();
                session.register_backend(b"origin", addr).unwrap();
                let twice = session.register_backend(b"origin", addr).err().map(|e| e.kind());
                record_status(session, b"twice", twice);
                let unknown = session.add_backend_to_director(b"other").err().map(|e| e.kind());
                record_status(session, b"unknown", unknown);
                session.add_backend_to_director(b"origin").unwrap();
                session.set_service_id(b"svc-1").unwrap();
                Action::Pass
            }
            b"panic" => panic!("hook failure"),
            b"panic-in-visitor" => {
                packet.iter_answer(&mut |_| panic!("visitor failure"));
                Action::Lookup
            }
            b"illegal" => Action::Fetch,
            _ => Action::Default,
        }
    }

    fn on_deliver(&self, _session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        packet.set_flags(packet.flags() | PacketFlags::QR.bits() | PacketFlags::AA.bits());
        packet.set_rcode(3);
        Action::Deliver
    }

    fn on_cache_miss(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        let (name, rr_type) = packet.question_name().unwrap();
        session.insert_str(b"qname", name.as_bytes()).unwrap();
        session.insert_i64(b"qtype", rr_type as i64).unwrap();
        session.insert_bool(b"seen", true).unwrap();
        Action::Fetch
    }
}

export_hooks!(ProbeHook);

fn module() -> ModuleEntries {
    unsafe { ModuleEntries::new(hook_recv, hook_deliver, hook_hit, hook_miss) }
}

fn packet() -> ParsedPacket {
    let mut packet = ParsedPacket::new(DnsMessageBuilder::new().with_id(7).build());
    packet.add_to_question("www.example.com A").unwrap();
    packet.add_to_answer("www.example.com 300 A 192.0.2.1").unwrap();
    packet.add_to_answer("www.example.com 300 A 192.0.2.2").unwrap();
    packet.add_to_answer("www.example.com 300 A 192.0.2.3").unwrap();
    packet
}

fn session(mode: &str) -> SessionState {
    let mut session = SessionState::new();
    session.insert_str(b"mode", mode.as_bytes()).unwrap();
    session
}

fn status(session: &SessionState, key: &[u8]) -> i64 {
    match session.env(key) {
        Some(EnvValue::I64(v)) => *v,
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_rewrite_through_tables() {
    let mut session = session("rewrite");
    let mut packet = packet();
    let action = module().run(HookPoint::Receive, &mut session, &mut packet).unwrap();
    assert_eq!(action, Action::Lookup);

    assert_eq!(status(&session, b"kept"), 2);
    let message = packet.message();
    assert_eq!(message.answers().len(), 2);
    assert!(message.answers().iter().all(|rr| rr.ttl == 30));
    assert!(message.answers().iter().all(|rr| rr.name.as_str() == "www.example.net"));
    assert_eq!(message.additional_records()[0].name.as_str(), "extra.example.net");
    assert_eq!(packet.question_name().unwrap().0, "www.example.net.");
}

#[test]
fn test_errors_cross_the_boundary_with_their_kind() {
    let mut session = session("errors");
    let mut packet = packet();
    let action = module().run(HookPoint::Receive, &mut session, &mut packet).unwrap();
    assert_eq!(action, Action::Pass);

    assert_eq!(status(&session, b"missing"), ErrorKind::NotFound.status() as i64);
    assert_eq!(status(&session, b"mismatch"), ErrorKind::TypeMismatch.status() as i64);
    assert_eq!(status(&session, b"small"), ErrorKind::CapacityExceeded.status() as i64);
    assert_eq!(status(&session, b"parse"), ErrorKind::Parse.status() as i64);
    assert_eq!(status(&session, b"raw"), ErrorKind::CapacityExceeded.status() as i64);
    assert_eq!(status(&session, b"stale"), ErrorKind::ProtocolViolation.status() as i64);
    assert_eq!(packet.message().answers().len(), 2);
}

#[test]
fn test_backends() {
    let mut session = session("backend");
    let mut packet = packet();
    module().run(HookPoint::Receive, &mut session, &mut packet).unwrap();

    assert_eq!(status(&session, b"twice"), ErrorKind::ProtocolViolation.status() as i64);
    assert_eq!(status(&session, b"unknown"), ErrorKind::NotFound.status() as i64);
    let addr: SocketAddr = "[2001:db8::53]:5353".parse().unwrap();
    assert_eq!(session.director(), vec![addr]);
    assert_eq!(session.service_id(), Some(&b"svc-1"[..]));
}

#[test]
fn test_header_and_question_access() {
    let mut session = session("");
    let mut packet = packet();
    let module = module();

    assert_eq!(module.run(HookPoint::Deliver, &mut session, &mut packet).unwrap(), Action::Deliver);
    assert!(packet.message().flags.response);
    assert!(packet.message().flags.authorative_answer);
    assert_eq!(packet.rcode(), 3);

    assert_eq!(module.run(HookPoint::CacheMiss, &mut session, &mut packet).unwrap(), Action::Fetch);
    assert_eq!(session.env(b"qname"), Some(&EnvValue::Str(b"www.example.com.".to_vec())));
    assert_eq!(session.env(b"qtype"), Some(&EnvValue::I64(1)));
    assert_eq!(session.env(b"seen"), Some(&EnvValue::Bool(true)));

    assert_eq!(module.run(HookPoint::CacheHit, &mut session, &mut packet).unwrap(), Action::Default);
}

#[test]
fn test_panics_become_errors() {
    let mut packet = packet();
    let module = module();

    let mut plain = session("panic");
    assert_eq!(module.run(HookPoint::Receive, &mut plain, &mut packet).unwrap(), Action::Error);

    let mut in_visitor = session("panic-in-visitor");
    assert_eq!(module.run(HookPoint::Receive, &mut in_visitor, &mut packet).unwrap(), Action::Error);
    assert_eq!(packet.message().answers().len(), 3);
}

#[test]
fn test_illegal_action_is_rejected_by_host() {
    let mut session = session("illegal");
    let mut packet = packet();
    let err = module().run(HookPoint::Receive, &mut session, &mut packet).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn test_null_pointers_and_version_mismatch() {
    let (env, fns) = host_tables();
    let mut session = session("rewrite");
    let mut packet = packet();
    let session_handle = &mut session as *mut SessionState as *mut RawSession;
    let packet_handle = &mut packet as *mut ParsedPacket as *mut RawPacket;

    let code = unsafe { hook_recv(ptr::null(), session_handle, fns, packet_handle) };
    assert_eq!(code, Action::Error.as_u32());
    let code = unsafe { hook_recv(env, session_handle, fns, ptr::null_mut()) };
    assert_eq!(code, Action::Error.as_u32());

    // Same entries, but an older packet table layout.
    let mut old: FnTable = unsafe { ptr::read(fns) };
    old.abi_version = 1;
    let code = unsafe { hook_recv(env, session_handle, &old, packet_handle) };
    assert_eq!(code, Action::Error.as_u32());

    // Nothing ran.
    assert!(session.env(b"kept").is_none());
    assert_eq!(packet.message().answers().len(), 3);
}
