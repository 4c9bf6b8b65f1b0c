//! S4: a transport-key mismatch must stall the run rather than letting
//! either party silently proceed on garbage payloads.

use crate::test_utils::{build_session, drive_briefly, memory_store, party_id, round_complete_count, two_party_group};
use dkls_client::testing::MockBroker;
use dkls_protocol::{control, Event, RoundNumber};
use std::time::Duration;

const KEY_A: [u8; 32] = [3u8; 32];
const KEY_B: [u8; 32] = [9u8; 32];

#[tokio::test]
async fn s4_mismatched_encryption_keys_stall_after_round_zero() {
    let broker = MockBroker::new();
    let a = party_id("a");
    let b = party_id("b");
    let group = two_party_group(&a, &b);

    let mut session_a = build_session(&broker, a.clone(), group.clone(), memory_store());
    let mut session_b = build_session(&broker, b.clone(), group.clone(), memory_store());

    session_a.start_keygen(true, None, KEY_A).await.unwrap();
    session_b.start_keygen(true, None, KEY_B).await.unwrap();

    broker.broadcast_control(&group.group_id, control::START, RoundNumber::START);

    let (events_a, events_b) = tokio::join!(
        drive_briefly(&mut session_a, Duration::from_millis(200)),
        drive_briefly(&mut session_b, Duration::from_millis(200)),
    );

    // Only the unencrypted, server-originated START round completes;
    // every round-1 payload is undecryptable under the other party's
    // key and is dropped on arrival.
    assert_eq!(round_complete_count(&events_a), 1);
    assert_eq!(round_complete_count(&events_b), 1);

    assert!(!events_a.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(!events_b.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(!events_a.iter().any(|e| matches!(e, Event::KeygenComplete(_))));
    assert!(!events_b.iter().any(|e| matches!(e, Event::KeygenComplete(_))));
}
