//! End-to-end coordinator flows driven through the public dispatch
//! entry point, the way the server's hub task drives it.

use chrono::{Duration, Utc};
use duet_core::{ConnId, Coordinator, CoreConfig, Outbound};
use duet_shared::{CallKind, ClientEvent, Identity, ServerEvent};
use serde_json::json;

const RAV_CONN: ConnId = ConnId(1);
const MON_CONN: ConnId = ConnId(2);

fn coordinator() -> Coordinator {
    Coordinator::new(CoreConfig::default())
}

fn send(coordinator: &mut Coordinator, conn: ConnId, event: ClientEvent) -> Vec<Outbound> {
    coordinator.handle_event(conn, event, Utc::now())
}

fn login(coordinator: &mut Coordinator, conn: ConnId, name: &str) -> Vec<Outbound> {
    send(
        coordinator,
        conn,
        ClientEvent::Login {
            identity: name.to_string(),
        },
    )
}

fn login_both(coordinator: &mut Coordinator) {
    login(coordinator, RAV_CONN, "Rav");
    login(coordinator, MON_CONN, "Mon");
}

fn call_user(coordinator: &mut Coordinator, conn: ConnId, to: &str) -> Vec<Outbound> {
    send(
        coordinator,
        conn,
        ClientEvent::CallUser {
            to: to.to_string(),
            kind: CallKind::Video,
            offer: json!({"type": "offer", "sdp": "v=0"}),
        },
    )
}

/// Events delivered directly to one connection.
fn directed(out: &[Outbound], conn: ConnId) -> Vec<ServerEvent> {
    out.iter()
        .filter_map(|o| match o {
            Outbound::Direct { to, event } if *to == conn => Some(event.clone()),
            _ => None,
        })
        .collect()
}

fn broadcasts(out: &[Outbound]) -> Vec<ServerEvent> {
    out.iter()
        .filter_map(|o| match o {
            Outbound::Broadcast { event } => Some(event.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn login_replays_history_and_broadcasts_presence() {
    let mut c = coordinator();
    login(&mut c, RAV_CONN, "Rav");
    send(
        &mut c,
        RAV_CONN,
        ClientEvent::Message {
            sender: "Rav".to_string(),
            text: Some("hi".to_string()),
            attachment: None,
            attachment_name: None,
        },
    );

    let out = login(&mut c, MON_CONN, "Mon");
    let direct = directed(&out, MON_CONN);
    match &direct[0] {
        ServerEvent::LoginSuccess { identity, messages, .. } => {
            assert_eq!(*identity, Identity::new("Mon"));
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].text.as_deref(), Some("hi"));
        }
        other => panic!("expected login-success, got {other:?}"),
    }
    match &broadcasts(&out)[0] {
        ServerEvent::UserStatus(status) => {
            assert!(status[&Identity::new("Rav")].connected);
            assert!(status[&Identity::new("Mon")].connected);
        }
        other => panic!("expected user-status, got {other:?}"),
    }
}

#[test]
fn second_login_for_connected_identity_fails() {
    let mut c = coordinator();
    login(&mut c, RAV_CONN, "Rav");

    let out = login(&mut c, ConnId(9), "Rav");
    assert_eq!(
        directed(&out, ConnId(9)),
        vec![ServerEvent::LoginFailed {
            reason: "User already logged in".to_string()
        }]
    );

    // After the holder disconnects the identity is free again.
    c.handle_disconnect(RAV_CONN);
    let out = login(&mut c, ConnId(9), "Rav");
    assert!(matches!(
        directed(&out, ConnId(9))[0],
        ServerEvent::LoginSuccess { .. }
    ));
}

#[test]
fn unknown_name_fails_login() {
    let mut c = coordinator();
    let out = login(&mut c, RAV_CONN, "Eve");
    assert_eq!(
        directed(&out, RAV_CONN),
        vec![ServerEvent::LoginFailed {
            reason: "Invalid username".to_string()
        }]
    );
}

#[test]
fn text_message_is_broadcast_to_everyone() {
    let mut c = coordinator();
    login_both(&mut c);

    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::Message {
            sender: "Rav".to_string(),
            text: Some("hi".to_string()),
            attachment: None,
            attachment_name: None,
        },
    );
    match &broadcasts(&out)[0] {
        ServerEvent::Message(message) => {
            assert_eq!(message.sender, Identity::new("Rav"));
            assert_eq!(message.text.as_deref(), Some("hi"));
            assert!(message.attachment.is_none());
        }
        other => panic!("expected message broadcast, got {other:?}"),
    }
}

#[test]
fn delete_resyncs_once_and_is_idempotent() {
    let mut c = coordinator();
    login_both(&mut c);
    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::Message {
            sender: "Rav".to_string(),
            text: Some("oops".to_string()),
            attachment: None,
            attachment_name: None,
        },
    );
    let id = match &broadcasts(&out)[0] {
        ServerEvent::Message(message) => message.id,
        other => panic!("expected message broadcast, got {other:?}"),
    };

    let out = send(&mut c, MON_CONN, ClientEvent::DeleteMessage { id });
    assert_eq!(
        broadcasts(&out),
        vec![ServerEvent::MessagesUpdated(Vec::new())]
    );

    // Second delete of the same id: no error, no re-sync.
    let out = send(&mut c, MON_CONN, ClientEvent::DeleteMessage { id });
    assert!(out.is_empty());
}

#[test]
fn call_rings_responder_then_accept_reaches_initiator() {
    let mut c = coordinator();
    login_both(&mut c);

    let out = call_user(&mut c, RAV_CONN, "Mon");
    match &directed(&out, MON_CONN)[0] {
        ServerEvent::IncomingCall {
            from_identity,
            kind,
            offer,
            ..
        } => {
            assert_eq!(*from_identity, Identity::new("Rav"));
            assert_eq!(*kind, CallKind::Video);
            assert_eq!(*offer, json!({"type": "offer", "sdp": "v=0"}));
        }
        other => panic!("expected incoming-call, got {other:?}"),
    }

    let out = send(
        &mut c,
        MON_CONN,
        ClientEvent::AcceptCall {
            to: "Rav".to_string(),
        },
    );
    assert_eq!(directed(&out, RAV_CONN), vec![ServerEvent::CallAccepted]);
}

#[test]
fn full_call_negotiation_reaches_active() {
    let mut c = coordinator();
    login_both(&mut c);
    call_user(&mut c, RAV_CONN, "Mon");
    send(
        &mut c,
        MON_CONN,
        ClientEvent::AcceptCall {
            to: "Rav".to_string(),
        },
    );

    let out = send(
        &mut c,
        MON_CONN,
        ClientEvent::CallAnswer {
            to: "Rav".to_string(),
            answer: json!({"type": "answer", "sdp": "v=0"}),
        },
    );
    assert_eq!(
        directed(&out, RAV_CONN),
        vec![ServerEvent::CallAnswered {
            answer: json!({"type": "answer", "sdp": "v=0"})
        }]
    );

    // Candidates now flow both ways.
    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::IceCandidate {
            to: "Mon".to_string(),
            candidate: json!({"candidate": "a"}),
        },
    );
    assert_eq!(
        directed(&out, MON_CONN),
        vec![ServerEvent::IceCandidate {
            candidate: json!({"candidate": "a"})
        }]
    );

    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::EndCall {
            to: "Mon".to_string(),
        },
    );
    assert_eq!(directed(&out, MON_CONN), vec![ServerEvent::CallEnded]);
}

#[test]
fn glare_first_arrival_wins() {
    let mut c = coordinator();
    login_both(&mut c);

    let first = call_user(&mut c, RAV_CONN, "Mon");
    let second = call_user(&mut c, MON_CONN, "Rav");

    assert!(matches!(
        directed(&first, MON_CONN)[0],
        ServerEvent::IncomingCall { .. }
    ));
    assert_eq!(
        directed(&second, MON_CONN),
        vec![ServerEvent::CallFailed {
            reason: "already negotiating".to_string()
        }]
    );
}

#[test]
fn calling_an_offline_or_unknown_target_fails() {
    let mut c = coordinator();
    login(&mut c, RAV_CONN, "Rav");

    let out = call_user(&mut c, RAV_CONN, "Mon");
    assert_eq!(
        directed(&out, RAV_CONN),
        vec![ServerEvent::CallFailed {
            reason: "Mon is not connected".to_string()
        }]
    );

    let out = call_user(&mut c, RAV_CONN, "peer-stale");
    assert_eq!(
        directed(&out, RAV_CONN),
        vec![ServerEvent::CallFailed {
            reason: "unknown call target: peer-stale".to_string()
        }]
    );
}

#[test]
fn callee_may_be_addressed_by_advertised_peer_address() {
    let mut c = coordinator();
    login_both(&mut c);
    send(
        &mut c,
        MON_CONN,
        ClientEvent::PeerAddress {
            address: "peer-mon-7".to_string(),
        },
    );

    let out = call_user(&mut c, RAV_CONN, "peer-mon-7");
    assert!(matches!(
        directed(&out, MON_CONN)[0],
        ServerEvent::IncomingCall { .. }
    ));
}

#[test]
fn incoming_call_from_field_carries_caller_address() {
    let mut c = coordinator();
    login_both(&mut c);
    send(
        &mut c,
        RAV_CONN,
        ClientEvent::PeerAddress {
            address: "peer-rav-3".to_string(),
        },
    );

    let out = call_user(&mut c, RAV_CONN, "Mon");
    match &directed(&out, MON_CONN)[0] {
        ServerEvent::IncomingCall { from, .. } => assert_eq!(from, "peer-rav-3"),
        other => panic!("expected incoming-call, got {other:?}"),
    }
}

#[test]
fn disconnect_mid_call_notifies_remaining_party() {
    // In every pre-terminal state the surviving side hears call-ended.
    for accept_first in [false, true] {
        let mut c = coordinator();
        login_both(&mut c);
        call_user(&mut c, RAV_CONN, "Mon");
        if accept_first {
            send(
                &mut c,
                MON_CONN,
                ClientEvent::AcceptCall {
                    to: "Rav".to_string(),
                },
            );
        }

        let out = c.handle_disconnect(RAV_CONN);
        assert_eq!(directed(&out, MON_CONN), vec![ServerEvent::CallEnded]);
        match &broadcasts(&out)[0] {
            ServerEvent::UserStatus(status) => {
                assert!(!status[&Identity::new("Rav")].connected)
            }
            other => panic!("expected user-status, got {other:?}"),
        }

        // The slot is free again.
        login(&mut c, ConnId(3), "Rav");
        let out = call_user(&mut c, MON_CONN, "Rav");
        assert!(matches!(
            directed(&out, ConnId(3))[0],
            ServerEvent::IncomingCall { .. }
        ));
    }
}

#[test]
fn disconnect_of_unbound_connection_is_a_noop() {
    let mut c = coordinator();
    login_both(&mut c);
    assert!(c.handle_disconnect(ConnId(42)).is_empty());
}

#[test]
fn stale_call_events_after_teardown_are_dropped() {
    let mut c = coordinator();
    login_both(&mut c);
    call_user(&mut c, RAV_CONN, "Mon");
    send(
        &mut c,
        MON_CONN,
        ClientEvent::RejectCall {
            to: "Rav".to_string(),
        },
    );

    // Duplicate reject and a late candidate: silent, no call-failed.
    let out = send(
        &mut c,
        MON_CONN,
        ClientEvent::RejectCall {
            to: "Rav".to_string(),
        },
    );
    assert!(out.is_empty());
    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::IceCandidate {
            to: "Mon".to_string(),
            candidate: json!({"candidate": "late"}),
        },
    );
    assert!(out.is_empty());
}

#[test]
fn ringing_times_out_into_idle() {
    let start = Utc::now();
    let mut c = coordinator();
    login_both(&mut c);
    call_user(&mut c, RAV_CONN, "Mon");

    let deadline = c.next_deadline().expect("ringing call must carry a deadline");
    assert!(c.expire(deadline - Duration::seconds(1)).is_empty());

    let out = c.expire(deadline);
    assert_eq!(
        directed(&out, RAV_CONN),
        vec![ServerEvent::CallFailed {
            reason: "call timed out ringing".to_string()
        }]
    );
    assert_eq!(directed(&out, MON_CONN), vec![ServerEvent::CallEnded]);
    assert!(c.next_deadline().is_none());

    // Idle again: a fresh call goes through.
    let out = call_user(&mut c, MON_CONN, "Rav");
    assert!(matches!(
        directed(&out, RAV_CONN)[0],
        ServerEvent::IncomingCall { .. }
    ));
    assert!(deadline >= start);
}

#[test]
fn profile_pic_broadcasts_and_replays_on_login() {
    let mut c = coordinator();
    login(&mut c, RAV_CONN, "Rav");

    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::ProfilePic {
            identity: "Rav".to_string(),
            image: "data:image/png;base64,abc".to_string(),
        },
    );
    assert_eq!(
        broadcasts(&out),
        vec![ServerEvent::ProfilePicUpdated {
            identity: Identity::new("Rav"),
            image: "data:image/png;base64,abc".to_string(),
        }]
    );

    let out = login(&mut c, MON_CONN, "Mon");
    match &directed(&out, MON_CONN)[0] {
        ServerEvent::LoginSuccess { profile_pics, .. } => {
            assert_eq!(
                profile_pics.get(&Identity::new("Rav")).map(String::as_str),
                Some("data:image/png;base64,abc")
            );
        }
        other => panic!("expected login-success, got {other:?}"),
    }
}

#[test]
fn oversized_profile_pic_is_rejected() {
    let mut c = coordinator();
    login(&mut c, RAV_CONN, "Rav");

    let big = "x".repeat(duet_shared::constants::MAX_PROFILE_IMAGE_SIZE + 1);
    let out = send(
        &mut c,
        RAV_CONN,
        ClientEvent::ProfilePic {
            identity: "Rav".to_string(),
            image: big,
        },
    );
    assert!(out.is_empty());
}

#[test]
fn events_from_unbound_connections_are_dropped() {
    let mut c = coordinator();
    login(&mut c, MON_CONN, "Mon");

    // A connection that never logged in cannot signal.
    let out = call_user(&mut c, ConnId(77), "Mon");
    assert!(out.is_empty());
    let out = send(
        &mut c,
        ConnId(77),
        ClientEvent::AcceptCall {
            to: "Mon".to_string(),
        },
    );
    assert!(out.is_empty());
}
