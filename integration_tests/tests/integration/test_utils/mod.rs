//! Shared scaffolding for driving whole `Session` runs against a
//! [`MockBroker`] instead of a live relay, per the scenarios in the
//! engine's testable-properties section.

use dkls_client::testing::{InMemoryTransport, MockBroker, TestCoreFactory};
use dkls_client::{KeyshareStore, Session};
use dkls_protocol::{
    Event, EventBus, GroupId, GroupInfo, GroupMember, GroupStatus, KeyValueStore, MemoryStore,
    PartyId, RoundNumber,
};
use std::sync::Arc;
use std::time::Duration;

/// A deterministic, valid-looking party id for test party `letter`
/// (e.g. `party_id("a")`, `party_id("b")`).
pub fn party_id(letter: &str) -> PartyId {
    ("02".to_string() + &letter.repeat(64))
        .parse()
        .expect("well-formed test party id")
}

/// A ready, 2-of-2 group with `a` at index 0 and `b` at index 1.
pub fn two_party_group(a: &PartyId, b: &PartyId) -> GroupInfo {
    GroupInfo {
        group_id: GroupId::generate(),
        threshold: 2,
        total_parties: 2,
        timeout_minutes: 10,
        members: vec![
            GroupMember { party_id: a.clone(), index: 0 },
            GroupMember { party_id: b.clone(), index: 1 },
        ],
        created_by: a.clone(),
        status: GroupStatus::Ready,
    }
}

/// A fresh, empty keyshare-persistence backing.
pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

/// A session wired directly to `broker`, seeded with already-known
/// registration and group state, driven by the deterministic
/// [`TestCoreFactory`] rather than real DKLS23 cryptography, and
/// persisting keyshares to `backing`.
pub fn build_session(
    broker: &Arc<MockBroker>,
    party_id: PartyId,
    group: GroupInfo,
    backing: Arc<dyn KeyValueStore>,
) -> Session<TestCoreFactory> {
    Session::new_for_test(
        broker.clone(),
        TestCoreFactory,
        KeyshareStore::new(backing),
        Arc::new(EventBus::new()),
        party_id,
        "test-token".to_string(),
        group,
    )
    .expect("session construction against a mock broker cannot fail")
}

/// Pump `session` until it reports a terminal event (`keygen-complete`
/// or `error`) or the transport closes, collecting every event seen
/// along the way.
pub async fn drive_to_completion(session: &mut Session<TestCoreFactory>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) =
        session.next_event().await.expect("mock transport never errors in these tests")
    {
        let terminal = matches!(event, Event::KeygenComplete(_) | Event::Error(_));
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

/// Pump `session` for at most `budget`, collecting whatever events
/// arrive without requiring the run to reach a terminal event. Used
/// for scenarios that are expected to stall (e.g. a mismatched
/// encryption key), where waiting for termination would hang forever.
pub async fn drive_briefly(session: &mut Session<TestCoreFactory>, budget: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, session.next_event()).await {
            Ok(Ok(Some(event))) => {
                let terminal = matches!(event, Event::KeygenComplete(_) | Event::Error(_));
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => break,
        }
    }
    events
}

/// Stand in for the relay server: wait for `parties` `DONE` frames to
/// arrive (one per party finishing round 4), then broadcast the
/// server's terminal `END:<status>` frame.
pub async fn finish_with_status(
    broker: &Arc<MockBroker>,
    group_id: &GroupId,
    server: &mut InMemoryTransport,
    parties: usize,
    status: &str,
) {
    for _ in 0..parties {
        server.recv().await.expect("server observes a DONE frame");
    }
    broker.broadcast_control(group_id, format!("END:{status}"), RoundNumber::START);
}

/// Count of [`Event::RoundComplete`] events in `events`.
pub fn round_complete_count(events: &[Event]) -> usize {
    events.iter().filter(|e| matches!(e, Event::RoundComplete { .. })).count()
}
