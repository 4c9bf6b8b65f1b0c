//! S5: key rotation keeps exactly one backup slot, always holding the
//! immediately prior record rather than accumulating history.

use crate::test_utils::{
    build_session, drive_to_completion, finish_with_status, memory_store, party_id,
    two_party_group,
};
use dkls_client::testing::MockBroker;
use dkls_client::KeyshareStore;
use dkls_protocol::{control, Event, GroupInfo, KeyValueStore, KeyshareRecord, PartyId, RoundNumber};
use std::sync::Arc;

const KEY: [u8; 32] = [5u8; 32];

#[allow(clippy::too_many_arguments)]
async fn run_keygen_or_rotation(
    broker: &Arc<MockBroker>,
    a: &PartyId,
    b: &PartyId,
    group: &GroupInfo,
    store_a: Arc<dyn KeyValueStore>,
    store_b: Arc<dyn KeyValueStore>,
    existing_a: Option<KeyshareRecord>,
    existing_b: Option<KeyshareRecord>,
) -> (Vec<Event>, Vec<Event>) {
    let mut session_a = build_session(broker, a.clone(), group.clone(), store_a);
    let mut session_b = build_session(broker, b.clone(), group.clone(), store_b);

    session_a.start_keygen(true, existing_a, KEY).await.unwrap();
    session_b.start_keygen(true, existing_b, KEY).await.unwrap();

    let mut server = broker.register(dkls_protocol::PartyId::server());
    broker.broadcast_control(&group.group_id, control::START, RoundNumber::START);

    let (events_a, events_b, ()) = tokio::join!(
        drive_to_completion(&mut session_a),
        drive_to_completion(&mut session_b),
        finish_with_status(broker, &group.group_id, &mut server, 2, "SUCCESS"),
    );

    (events_a, events_b)
}

fn record_of(events: &[Event]) -> KeyshareRecord {
    events
        .iter()
        .find_map(|e| match e {
            Event::KeygenComplete(record) => Some(record.clone()),
            _ => None,
        })
        .expect("run must finish with a keyshare")
}

#[tokio::test]
async fn s5_rotation_preserves_exactly_one_backup() {
    let broker = MockBroker::new();
    let a = party_id("a");
    let b = party_id("b");
    let group = two_party_group(&a, &b);

    let store_a = memory_store();
    let store_b = memory_store();
    let store = KeyshareStore::new(store_a.clone());

    let (events_a, events_b) =
        run_keygen_or_rotation(&broker, &a, &b, &group, store_a.clone(), store_b.clone(), None, None)
            .await;
    let r0_a = record_of(&events_a);
    let r0_b = record_of(&events_b);

    assert_eq!(store.load(&group.group_id, 0).await.unwrap().timestamp, r0_a.timestamp);
    assert!(store.load_backup(&group.group_id, 0).await.is_err());

    let (events_a, events_b) = run_keygen_or_rotation(
        &broker,
        &a,
        &b,
        &group,
        store_a.clone(),
        store_b.clone(),
        Some(r0_a.clone()),
        Some(r0_b.clone()),
    )
    .await;
    let r1_a = record_of(&events_a);
    let r1_b = record_of(&events_b);

    assert_eq!(store.load(&group.group_id, 0).await.unwrap().timestamp, r1_a.timestamp);
    assert_eq!(store.load_backup(&group.group_id, 0).await.unwrap().timestamp, r0_a.timestamp);

    let (events_a, _events_b) = run_keygen_or_rotation(
        &broker,
        &a,
        &b,
        &group,
        store_a.clone(),
        store_b.clone(),
        Some(r1_a.clone()),
        Some(r1_b.clone()),
    )
    .await;
    let r2_a = record_of(&events_a);

    assert_eq!(store.load(&group.group_id, 0).await.unwrap().timestamp, r2_a.timestamp);
    assert_eq!(store.load_backup(&group.group_id, 0).await.unwrap().timestamp, r1_a.timestamp);
    assert_ne!(
        store.load_backup(&group.group_id, 0).await.unwrap().timestamp,
        r0_a.timestamp,
        "the oldest record must not survive a second rotation"
    );
}
