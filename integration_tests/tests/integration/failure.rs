//! S6: a non-success terminal status from the server must surface as
//! an `error` event, never a `keygen-complete`.

use crate::test_utils::{
    build_session, drive_to_completion, finish_with_status, memory_store, party_id,
    round_complete_count, two_party_group,
};
use dkls_client::testing::MockBroker;
use dkls_protocol::{control, Event, RoundNumber};

const KEY: [u8; 32] = [11u8; 32];

#[tokio::test]
async fn s6_server_reported_timeout_surfaces_as_error() {
    let broker = MockBroker::new();
    let a = party_id("a");
    let b = party_id("b");
    let group = two_party_group(&a, &b);

    let mut session_a = build_session(&broker, a.clone(), group.clone(), memory_store());
    let mut session_b = build_session(&broker, b.clone(), group.clone(), memory_store());

    session_a.start_keygen(true, None, KEY).await.unwrap();
    session_b.start_keygen(true, None, KEY).await.unwrap();

    let mut server = broker.register(dkls_protocol::PartyId::server());
    broker.broadcast_control(&group.group_id, control::START, RoundNumber::START);

    let (events_a, events_b, ()) = tokio::join!(
        drive_to_completion(&mut session_a),
        drive_to_completion(&mut session_b),
        finish_with_status(&broker, &group.group_id, &mut server, 2, "TIMEOUT"),
    );

    // All four protocol rounds still ran to completion on both sides;
    // only the terminal outcome differs from the happy path.
    assert_eq!(round_complete_count(&events_a), 5);
    assert_eq!(round_complete_count(&events_b), 5);

    for events in [&events_a, &events_b] {
        match events.last() {
            Some(Event::Error(message)) => assert!(message.contains("TIMEOUT")),
            other => panic!("expected a terminal error event, got {other:?}"),
        }
        assert!(!events.iter().any(|e| matches!(e, Event::KeygenComplete(_))));
    }
}
