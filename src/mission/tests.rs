use super::*;
use crate::codec::{decode, DecodedMessage, MessageKind, MissionField, Segment};
use crate::observer::QueueChannel;
use std::collections::HashSet;
use std::thread;
use tokio::sync::mpsc::UnboundedReceiver;

fn mission() -> MissionObject {
    MissionObject::new(
        ObjectId(1001),
        "tatooine",
        "object/mission/base/shared_base_mission.iff",
    )
}

/// Subscribe a fresh queue-backed endpoint and discard its baselines.
fn observe(mission: &MissionObject) -> (EndpointId, Arc<dyn ClientChannel>, UnboundedReceiver<OutboundMessage>) {
    let (channel, mut rx) = QueueChannel::pair();
    let channel: Arc<dyn ClientChannel> = channel;
    let endpoint = EndpointId::new();
    mission.subscribe(endpoint, &channel).unwrap();

    for _ in Segment::ALL {
        let message = rx.try_recv().expect("baseline segment");
        assert_eq!(message.payload[0], MessageKind::Baseline as u8);
    }

    (endpoint, channel, rx)
}

fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<DecodedMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(decode(&message.payload).unwrap());
    }
    messages
}

#[test]
fn test_setters_return_previous_value() {
    let mission = mission();

    assert_eq!(mission.set_mission_level(3).unwrap(), 0);
    assert_eq!(mission.set_mission_level(7).unwrap(), 3);
    assert_eq!(mission.mission_level(), 7);

    assert_eq!(mission.set_mission_creator("Jabba").unwrap(), "");
    assert_eq!(mission.set_mission_creator("Bib").unwrap(), "Jabba");

    let previous = mission
        .set_mission_title("Bounty", "mission/bounty:t1")
        .unwrap();
    assert_eq!(previous, StfText::default());
    assert_eq!(mission.mission_title(), "Bounty");
    assert_eq!(mission.mission_title_id(), "mission/bounty:t1");
}

#[test]
fn test_out_of_range_values_are_stored() {
    let mission = mission();
    mission.set_credit_reward(-50).unwrap();
    mission.set_mission_start(f32::MAX, -1e9, 0.0, "").unwrap();

    assert_eq!(mission.credit_reward(), -50);
    assert_eq!(mission.mission_start_x(), f32::MAX);
    assert_eq!(mission.mission_start_y(), -1e9);
}

// The mission object this replaces stored destZ twice and never destX, so the
// stored X went stale while the broadcast carried the right value. All three
// coordinates must now land in the store.
#[test]
fn test_destination_setter_stores_every_coordinate() {
    let mission = mission();
    mission.set_mission_destination(1.0, 2.0, 3.0, "naboo").unwrap();
    mission
        .set_mission_destination(10.0, 0.5, 20.0, "tatooine")
        .unwrap();

    assert_eq!(mission.mission_destination_x(), 10.0);
    assert_eq!(mission.mission_destination_y(), 0.5);
    assert_eq!(mission.mission_destination_z(), 20.0);
    assert_eq!(mission.mission_destination_planet(), "tatooine");
}

#[test]
fn test_mutation_emits_one_delta_per_observer() {
    let mission = mission();
    let (_, _c1, mut rx1) = observe(&mission);
    let (_, _c2, mut rx2) = observe(&mission);

    mission.set_mission_level(7).unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let messages = drain(rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            DecodedMessage::Delta { header, delta } => {
                assert_eq!(header.object_id, ObjectId(1001));
                assert_eq!(header.sequence, 1);
                assert_eq!(delta.field(), MissionField::DifficultyLevel);
                assert_eq!(*delta, MissionDelta::DifficultyLevel(7));
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }
}

#[test]
fn test_every_mutator_emits_exactly_one_delta() {
    let mission = mission();
    let (_, _channel, mut rx) = observe(&mission);
    let waypoint = Arc::new(WaypointObject {
        object_id: ObjectId(77),
        location: Location::new(1.0, 2.0, 3.0, "tatooine"),
        name: "Target".to_string(),
    });

    mission.set_mission_level(1).unwrap();
    mission.set_mission_destination(1.0, 2.0, 3.0, "naboo").unwrap();
    mission.set_mission_creator("Jabba").unwrap();
    mission.set_credit_reward(100).unwrap();
    mission.set_mission_start(4.0, 5.0, 6.0, "naboo").unwrap();
    mission.set_mission_template_object("object/tangible/shared_crate.iff").unwrap();
    mission.set_mission_description("desc", "stf:d").unwrap();
    mission.set_mission_title("title", "stf:t").unwrap();
    mission.set_mission_type("deliver").unwrap();
    mission.set_mission_target_name("courier").unwrap();
    mission.set_repeat_count(2).unwrap();
    mission.set_attached_waypoint(Some(waypoint)).unwrap();
    // Same value again still counts as a mutation
    mission.set_repeat_count(2).unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 13);

    let fields: HashSet<MissionField> = messages
        .iter()
        .filter_map(|m| match m {
            DecodedMessage::Delta { delta, .. } => Some(delta.field()),
            _ => None,
        })
        .collect();
    assert_eq!(fields.len(), 12);

    let sequences: Vec<u32> = messages.iter().map(|m| m.header().sequence).collect();
    assert_eq!(sequences, (1..=13).collect::<Vec<u32>>());
}

#[test]
fn test_destination_is_a_single_composite_delta() {
    let mission = mission();
    let (_, _channel, mut rx) = observe(&mission);

    mission
        .set_mission_destination(10.0, 0.0, 20.0, "tatooine")
        .unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        DecodedMessage::Delta { delta, .. } => assert_eq!(
            *delta,
            MissionDelta::Destination(Location::new(10.0, 0.0, 20.0, "tatooine"))
        ),
        other => panic!("expected delta, got {:?}", other),
    }
}

#[test]
fn test_unreliable_by_default_and_configurable() {
    let mission = mission();
    let (_, _channel, mut rx) = observe(&mission);
    mission.set_mission_level(2).unwrap();
    assert!(!rx.try_recv().unwrap().reliable);

    let mission = MissionObject::new(ObjectId(2), "naboo", "t").with_reliable_deltas(true);
    let (_, _channel, mut rx) = observe(&mission);
    mission.set_mission_level(2).unwrap();
    assert!(rx.try_recv().unwrap().reliable);
}

#[test]
fn test_baselines_are_deterministic() {
    let mission = mission();
    mission.set_mission_creator("Jabba").unwrap();
    mission
        .set_mission_description("Deliver", "mission/deliver:d")
        .unwrap();

    let first = mission.baselines().unwrap();
    let second = mission.baselines().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn test_baseline_carries_current_sequence_and_values() {
    let mission = mission();
    mission.set_credit_reward(250).unwrap();
    mission.set_repeat_count(4).unwrap();

    let mut replica = MissionAttributes::default();
    for bytes in mission.baselines().unwrap() {
        match decode(&bytes).unwrap() {
            DecodedMessage::Baseline { header, fields } => {
                assert_eq!(header.sequence, 2);
                fields.into_iter().for_each(|d| replica.apply(d));
            }
            other => panic!("expected baseline, got {:?}", other),
        }
    }

    assert_eq!(replica, mission.attributes());
    assert_eq!(replica.credit_reward, 250);
    assert_eq!(replica.repeat_count, 4);
}

#[test]
fn test_send_baselines_skips_closed_channel() {
    let mission = mission();
    let (channel, rx) = QueueChannel::pair();
    drop(rx);

    assert_eq!(mission.send_baselines(channel.as_ref()).unwrap(), 0);

    let (channel, mut rx) = QueueChannel::pair();
    assert_eq!(mission.send_baselines(channel.as_ref()).unwrap(), 2);
    assert!(rx.try_recv().unwrap().reliable);
}

#[test]
fn test_unsubscribed_observer_stops_receiving() {
    let mission = mission();
    let (endpoint, _channel, mut rx) = observe(&mission);
    assert!(mission.is_observed_by(&endpoint));

    assert!(mission.unsubscribe(&endpoint));
    mission.set_mission_level(9).unwrap();

    assert!(drain(&mut rx).is_empty());
    assert_eq!(mission.observer_count(), 0);
}

#[test]
fn test_destroyed_mission_rejects_work() {
    let mission = mission();
    let (_, _channel, mut rx) = observe(&mission);

    assert!(mission.destroy());
    assert!(!mission.destroy());
    assert_eq!(mission.observer_count(), 0);

    assert!(matches!(
        mission.set_mission_level(1),
        Err(MissionError::Destroyed(ObjectId(1001)))
    ));
    assert!(matches!(mission.baselines(), Err(MissionError::Destroyed(_))));
    assert!(matches!(mission.to_record(), Err(MissionError::Destroyed(_))));

    let (channel, _rx) = QueueChannel::pair();
    let channel: Arc<dyn ClientChannel> = channel;
    assert!(matches!(
        mission.subscribe(EndpointId::new(), &channel),
        Err(MissionError::Destroyed(_))
    ));
    assert_eq!(mission.observer_count(), 0);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_from_record_rejects_newer_schema() {
    let mut record = mission().to_record().unwrap();
    record.schema_version = MISSION_SCHEMA_VERSION + 1;

    assert!(matches!(
        MissionObject::from_record(record),
        Err(MissionError::UnsupportedSchemaVersion { found, .. }) if found == MISSION_SCHEMA_VERSION + 1
    ));
}

#[test]
fn test_from_record_restores_attributes() {
    let original = mission();
    original.set_mission_target_name("Greedo").unwrap();
    original.set_mission_start(1.0, 2.0, 3.0, "corellia").unwrap();

    let restored = MissionObject::from_record(original.to_record().unwrap()).unwrap();
    assert_eq!(restored.object_id(), original.object_id());
    assert_eq!(restored.planet(), "tatooine");
    assert_eq!(restored.template(), original.template());
    assert_eq!(restored.attributes(), original.attributes());
}

#[test]
fn test_concurrent_mutation_matches_a_serial_order() {
    let mission = Arc::new(mission());
    let (_, _channel, mut rx) = observe(&mission);
    let threads = 8;
    let writes_per_thread = 200;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let mission = Arc::clone(&mission);
            thread::spawn(move || {
                for i in 0..writes_per_thread {
                    let v = (t * 1000 + i) as f32;
                    mission
                        .set_mission_destination(v, v, v, format!("planet-{}", t))
                        .unwrap();
                    mission.set_credit_reward(t * 1000 + i).unwrap();
                }
            })
        })
        .collect();

    // Readers never observe a torn destination
    for _ in 0..1000 {
        let destination = mission.attributes().destination;
        assert_eq!(destination.x, destination.y);
        assert_eq!(destination.y, destination.z);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let total = (threads * writes_per_thread * 2) as u32;
    assert_eq!(mission.sequence(), total);

    // One delta per mutation, each with its own sequence number
    let messages = drain(&mut rx);
    assert_eq!(messages.len(), total as usize);
    let sequences: HashSet<u32> = messages.iter().map(|m| m.header().sequence).collect();
    assert_eq!(sequences.len(), total as usize);

    // Oracle: replaying the deltas in sequence order gives the final state
    let mut ordered: Vec<_> = messages
        .into_iter()
        .filter_map(|m| match m {
            DecodedMessage::Delta { header, delta } => Some((header.sequence, delta)),
            _ => None,
        })
        .collect();
    ordered.sort_by_key(|(sequence, _)| *sequence);

    let mut replica = MissionAttributes::default();
    for (_, delta) in ordered {
        replica.apply(delta);
    }
    assert_eq!(replica, mission.attributes());

    let final_destination = mission.attributes().destination;
    let writer = final_destination.x as i32 / 1000;
    assert_eq!(final_destination.planet, format!("planet-{}", writer));
}

#[test]
fn test_begin_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = crate::store::SqliteStore::open(dir.path().join("missions.db")).unwrap();
    let mission = mission();

    let txn = mission.begin_transaction(&store).unwrap();
    assert_eq!(mission.transaction(), Some(txn));

    match mission.begin_transaction(&store) {
        Err(MissionError::TransactionAlreadyBound { txn: bound, .. }) => {
            assert_eq!(bound, Some(txn))
        }
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }

    // Still the original handle
    assert_eq!(mission.transaction(), Some(txn));
    assert!(mission.take_transaction().is_some());
    assert_eq!(mission.transaction(), None);
}

/// Records every message; the first write lets a mutator thread in and then
/// stalls, so a mutation is attempted while baselines are still going out.
struct StallingChannel {
    received: Mutex<Vec<OutboundMessage>>,
    first_write: std::sync::atomic::AtomicBool,
    entered: std::sync::Barrier,
}

impl ClientChannel for StallingChannel {
    fn is_open(&self) -> bool {
        true
    }

    fn write(&self, message: OutboundMessage) -> Result<(), crate::observer::ChannelClosed> {
        if self.first_write.swap(false, std::sync::atomic::Ordering::SeqCst) {
            self.entered.wait();
            thread::sleep(std::time::Duration::from_millis(50));
        }
        self.received.lock().push(message);
        Ok(())
    }
}

#[test]
fn test_mutation_during_subscribe_arrives_after_baselines() {
    let mission = Arc::new(mission());
    mission.set_mission_level(1).unwrap();

    let channel = Arc::new(StallingChannel {
        received: Mutex::new(Vec::new()),
        first_write: std::sync::atomic::AtomicBool::new(true),
        entered: std::sync::Barrier::new(2),
    });

    let mutator = {
        let mission = Arc::clone(&mission);
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            channel.entered.wait();
            mission.set_mission_level(9).unwrap();
        })
    };

    let client: Arc<dyn ClientChannel> = channel.clone();
    mission.subscribe(EndpointId::new(), &client).unwrap();
    mutator.join().unwrap();

    let received: Vec<DecodedMessage> = channel
        .received
        .lock()
        .iter()
        .map(|m| decode(&m.payload).unwrap())
        .collect();
    assert_eq!(received.len(), 3);
    assert!(matches!(received[0], DecodedMessage::Baseline { .. }));
    assert!(matches!(received[1], DecodedMessage::Baseline { .. }));
    assert!(matches!(received[2], DecodedMessage::Delta { .. }));
    assert!(received[2].header().sequence > received[0].header().sequence);

    let mut replica = MissionAttributes::default();
    for message in received {
        match message {
            DecodedMessage::Baseline { fields, .. } => fields.into_iter().for_each(|f| replica.apply(f)),
            DecodedMessage::Delta { delta, .. } => replica.apply(delta),
        }
    }
    assert_eq!(replica.difficulty_level, 9);
    assert_eq!(replica, mission.attributes());
}

#[test]
fn test_deltas_leave_in_sequence_order() {
    let mission = Arc::new(mission());
    let (_endpoint, _channel, mut rx) = observe(&mission);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let mission = Arc::clone(&mission);
            thread::spawn(move || {
                for i in 0..50 {
                    mission.set_credit_reward(t * 100 + i).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let sequences: Vec<u32> = drain(&mut rx).iter().map(|m| m.header().sequence).collect();
    assert_eq!(sequences, (1..=200).collect::<Vec<u32>>());
}

#[test]
fn test_add_observer_reports_sequence_and_respects_destroy() {
    let mission = mission();
    mission.set_mission_level(4).unwrap();

    let (channel, mut rx) = QueueChannel::pair();
    let channel: Arc<dyn ClientChannel> = channel;
    assert_eq!(mission.add_observer(EndpointId::new(), &channel).unwrap(), 1);
    assert!(rx.try_recv().is_err());

    mission.destroy();
    assert_eq!(mission.observer_count(), 0);
    assert!(matches!(
        mission.add_observer(EndpointId::new(), &channel),
        Err(MissionError::Destroyed(_))
    ));
    assert_eq!(mission.observer_count(), 0);
}

#[test]
fn test_no_observer_survives_concurrent_destroy() {
    for _ in 0..20 {
        let mission = Arc::new(mission());
        let (channel, _rx) = QueueChannel::pair();
        let channel: Arc<dyn ClientChannel> = channel;
        let barrier = Arc::new(std::sync::Barrier::new(5));

        let adders: Vec<_> = (0..4)
            .map(|_| {
                let mission = Arc::clone(&mission);
                let channel = Arc::clone(&channel);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..25 {
                        let _ = mission.add_observer(EndpointId::new(), &channel);
                    }
                })
            })
            .collect();

        barrier.wait();
        mission.destroy();
        for adder in adders {
            adder.join().unwrap();
        }

        assert_eq!(mission.observer_count(), 0);
    }
}

/// Store wrapper that destroys the mission while the transaction is opening.
struct DestroyOnBegin {
    mission: Arc<MissionObject>,
    store: crate::store::SqliteStore,
}

impl TransactionalStore for DestroyOnBegin {
    fn begin_transaction(&self) -> anyhow::Result<Box<dyn StoreTransaction>> {
        self.mission.destroy();
        self.store.begin_transaction()
    }
}

#[test]
fn test_destroy_while_opening_rolls_back_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missions.db");
    let mission = Arc::new(mission());
    let store = DestroyOnBegin {
        mission: Arc::clone(&mission),
        store: crate::store::SqliteStore::open(&path).unwrap(),
    };

    assert!(matches!(
        mission.begin_transaction(&store),
        Err(MissionError::Destroyed(ObjectId(1001)))
    ));
    assert!(mission.is_destroyed());
    assert_eq!(mission.transaction(), None);

    // The write lock was released
    let other = crate::store::SqliteStore::with_busy_timeout(
        &path,
        std::time::Duration::from_millis(100),
    )
    .unwrap();
    let txn = other.begin_transaction().unwrap();
    txn.rollback().unwrap();
}

#[test]
fn test_oversized_short_string_is_rejected() {
    let mission = mission();
    let (_endpoint, _channel, mut rx) = observe(&mission);
    let long = "x".repeat(crate::codec::MAX_SHORT_STRING_LEN + 1);

    match mission.set_mission_type(long.clone()) {
        Err(MissionError::ValueTooLong { field, len, .. }) => {
            assert_eq!(field, MissionField::MissionType);
            assert_eq!(len, long.len());
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(mission
        .set_mission_destination(0.0, 0.0, 0.0, long.clone())
        .is_err());

    assert_eq!(mission.mission_type(), "");
    assert_eq!(mission.sequence(), 0);
    assert!(drain(&mut rx).is_empty());

    // Creator is a UTF-16 text string with a u32 count
    mission.set_mission_creator(long.clone()).unwrap();
    assert_eq!(mission.mission_creator(), long);
}
