//! Call Lifecycle Integration Tests
//!
//! Drives a `CallSession` with wire-level events and user commands and checks
//! the resulting state sequence and command guards.

use callscript::core::{CallSession, ConnectErrorPolicy, TransportRequest};
use callscript::domain::{CallState, RawEvent, Transition, UserCommand};
use serde_json::json;

fn start() -> UserCommand {
    UserCommand::Start {
        assistant_id: "asst-nutrition".to_string(),
    }
}

#[test]
fn test_full_call_reproduces_state_sequence() {
    let mut session = CallSession::default();
    let mut states = vec![session.state()];

    session.command(start()).unwrap();
    states.push(session.state());

    session.ingest(&RawEvent::signal("call-start")).unwrap();
    states.push(session.state());

    session.command(UserCommand::End).unwrap();
    states.push(session.state());

    session.ingest(&RawEvent::signal("call-end")).unwrap();
    states.push(session.state());

    session.grace_elapsed(session.call_seq()).unwrap();
    states.push(session.state());

    assert_eq!(
        states,
        vec![
            CallState::Idle,
            CallState::Connecting,
            CallState::Active,
            CallState::Ending,
            CallState::Ended,
            CallState::Idle,
        ]
    );
}

#[test]
fn test_remote_hangup_bypasses_ending() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();
    session.ingest(&RawEvent::signal("call-start")).unwrap();

    let t = session.ingest(&RawEvent::signal("call-end")).unwrap();
    assert_eq!(t, Some(Transition::new(CallState::Active, CallState::Ended)));
}

#[test]
fn test_end_in_idle_is_a_no_op() {
    let mut session = CallSession::default();

    let result = session.command(UserCommand::End);

    assert!(result.is_err());
    assert!(result.unwrap_err().is_benign());
    assert_eq!(session.state(), CallState::Idle);
    assert_eq!(session.call_seq(), 0);
}

#[test]
fn test_double_start_is_rejected() {
    let mut session = CallSession::default();
    assert!(session.command(start()).is_ok());
    assert!(session.command(start()).is_err());
    assert_eq!(session.state(), CallState::Connecting);
    assert_eq!(session.call_seq(), 1);
}

#[test]
fn test_double_end_forwards_one_stop() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();
    session.ingest(&RawEvent::signal("call-start")).unwrap();

    assert_eq!(session.command(UserCommand::End).unwrap(), TransportRequest::Stop);
    assert!(session.command(UserCommand::End).is_err());
    assert_eq!(session.state(), CallState::Ending);
}

#[test]
fn test_end_while_connecting_goes_to_ending() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();

    assert_eq!(session.command(UserCommand::End).unwrap(), TransportRequest::Stop);
    assert_eq!(session.state(), CallState::Ending);

    session.ingest(&RawEvent::signal("call-end")).unwrap();
    assert_eq!(session.state(), CallState::Ended);
}

#[test]
fn test_connect_error_defaults_to_idle() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();

    let t = session
        .ingest(&RawEvent::new("error", json!({"error": {"message": "assistant not found"}})))
        .unwrap();

    assert_eq!(t, Some(Transition::new(CallState::Connecting, CallState::Idle)));
    assert_eq!(session.last_error(), Some("assistant not found"));
}

#[test]
fn test_connect_error_can_land_in_errored() {
    let mut session = CallSession::new(ConnectErrorPolicy::Errored);
    session.command(start()).unwrap();

    session.start_failed("microphone permission denied");

    assert_eq!(session.state(), CallState::Errored);
    assert_eq!(session.last_error(), Some("microphone permission denied"));

    // Recoverable by a new start; the error slot clears on the transition
    session.command(start()).unwrap();
    assert_eq!(session.state(), CallState::Connecting);
    assert_eq!(session.last_error(), None);
}

#[test]
fn test_connect_error_event_lands_in_errored_by_policy() {
    let mut session = CallSession::new(ConnectErrorPolicy::Errored);
    session.command(start()).unwrap();

    let t = session
        .ingest(&RawEvent::new("error", json!({"errorMsg": "assistant not found"})))
        .unwrap();

    assert_eq!(t, Some(Transition::new(CallState::Connecting, CallState::Errored)));
    assert_eq!(session.last_error(), Some("assistant not found"));
}

#[test]
fn test_error_while_ending_moves_to_errored() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();
    session.ingest(&RawEvent::signal("call-start")).unwrap();
    session.command(UserCommand::End).unwrap();

    let t = session
        .ingest(&RawEvent::new("error", json!({"message": "hang-up timed out"})))
        .unwrap();

    assert_eq!(t, Some(Transition::new(CallState::Ending, CallState::Errored)));
    assert_eq!(session.last_error(), Some("hang-up timed out"));

    // The late hang-up acknowledgement no longer matters
    assert_eq!(session.ingest(&RawEvent::signal("call-end")).unwrap(), None);
    assert_eq!(session.state(), CallState::Errored);
}

#[test]
fn test_late_errors_are_ignored_after_end() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();
    session.ingest(&RawEvent::signal("call-start")).unwrap();
    session.ingest(&RawEvent::signal("call-end")).unwrap();

    let t = session.ingest(&RawEvent::new("error", json!("socket closed"))).unwrap();

    assert_eq!(t, None);
    assert_eq!(session.state(), CallState::Ended);
    assert_eq!(session.last_error(), None);
}

#[test]
fn test_mute_only_during_a_call() {
    let mut session = CallSession::default();
    assert!(session.command(UserCommand::SetMuted { muted: true }).is_err());
    assert!(!session.is_muted());

    session.command(start()).unwrap();
    let request = session.command(UserCommand::SetMuted { muted: true }).unwrap();

    assert_eq!(request, TransportRequest::SetMuted { muted: true });
    assert!(session.is_muted());
    assert_eq!(session.state(), CallState::Connecting);
}

#[test]
fn test_status_update_drives_lifecycle() {
    let mut session = CallSession::default();
    session.command(start()).unwrap();

    session
        .ingest(&RawEvent::message(json!({"type": "status-update", "status": "in-progress"})))
        .unwrap();
    assert_eq!(session.state(), CallState::Active);

    session
        .ingest(&RawEvent::message(json!({"type": "status-update", "status": "ended"})))
        .unwrap();
    assert_eq!(session.state(), CallState::Ended);
}
