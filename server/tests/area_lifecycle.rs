//! Visible area load, populate, save and idle-unload behavior.

use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use vantage_server::{
    ActionRegistry, ReplicationConfig, ReplicationManager, StoreRequest, WorldHooks,
};
use vantage_shared::{EncodingKind, FieldSpec, SchemaRegistry};

/// Populates area 7 with a single creature on its first-ever load.
struct PopulateHooks;

impl WorldHooks for PopulateHooks {
    fn area_of(&self, data: &Map<String, Value>) -> u64 {
        data.get("area").and_then(Value::as_u64).unwrap_or(1)
    }

    fn new_player(&self, player_key: &str) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("name".into(), json!(player_key));
        data.insert("area".into(), json!(1));
        data
    }

    fn populate_area(&self, area: u64) -> Vec<Map<String, Value>> {
        if area != 7 {
            return Vec::new();
        }
        let mut creature = Map::new();
        creature.insert("area".into(), json!(7));
        creature.insert("hp".into(), json!(5));
        vec![creature]
    }
}

fn schema() -> SchemaRegistry {
    SchemaRegistry::new(vec![
        FieldSpec::new("area")
            .encoding(EncodingKind::Int)
            .default_value(json!(1)),
        FieldSpec::new("hp")
            .encoding(EncodingKind::Int)
            .default_value(json!(0)),
        FieldSpec::new("name").encoding(EncodingKind::Str),
    ])
    .unwrap()
}

fn manager() -> ReplicationManager {
    ReplicationManager::new(
        ReplicationConfig::default(),
        schema(),
        ActionRegistry::new(vec![]),
        Box::new(PopulateHooks),
    )
}

fn only_load_area(requests: Vec<StoreRequest>) -> u64 {
    match requests.as_slice() {
        [StoreRequest::LoadArea { area }] => *area,
        other => panic!("expected a single area load, got {other:?}"),
    }
}

#[test]
fn empty_first_load_populates_and_marks_for_save() {
    let config = ReplicationConfig::default();
    let mut manager = manager();

    let client = manager.client_connect();
    manager.client_set_areas(client, vec![7]).unwrap();
    let area = only_load_area(manager.take_store_requests());
    assert_eq!(area, 7);
    manager.complete_area_load(7, Ok(vec![])).unwrap();

    // the populated creature is live immediately
    manager.tick(Instant::now());
    manager.take_outgoing();

    // and hits the store on the next save sweep
    manager.tick(Instant::now() + config.save_interval + Duration::from_secs(1));
    let saves = manager.take_store_requests();
    match saves.as_slice() {
        [StoreRequest::SaveArea { area: 7, entities }] => {
            assert_eq!(entities.len(), 1);
            assert_eq!(entities[0]["hp"], json!(5));
        }
        other => panic!("expected an area save, got {other:?}"),
    }
    manager.complete_area_save(7, Ok(())).unwrap();
}

#[test]
fn unload_and_reload_round_trips_through_the_store() {
    let config = ReplicationConfig::default();
    let mut manager = manager();

    let client = manager.client_connect();
    manager.client_set_areas(client, vec![7]).unwrap();
    manager.take_store_requests();
    manager.complete_area_load(7, Ok(vec![])).unwrap();
    manager.tick(Instant::now());
    manager.take_outgoing();

    // persist the populated content
    let sweep_at = Instant::now() + config.save_interval + Duration::from_secs(1);
    manager.tick(sweep_at);
    let saved = match manager.take_store_requests().as_slice() {
        [StoreRequest::SaveArea { entities, .. }] => entities.clone(),
        other => panic!("expected an area save, got {other:?}"),
    };
    manager.complete_area_save(7, Ok(())).unwrap();

    // unsubscribe and let the idle timeout pass: the area unloads and its
    // residents leave memory
    manager.client_set_areas(client, vec![]).unwrap();
    manager.tick(sweep_at + config.area_unload_timeout + Duration::from_secs(1));
    manager.take_outgoing();

    // resubscribing loads the saved snapshot back; same data, fresh entity
    manager.client_set_areas(client, vec![7]).unwrap();
    let area = only_load_area(manager.take_store_requests());
    assert_eq!(area, 7);
    manager.complete_area_load(7, Ok(saved)).unwrap();

    let events = manager.take_events();
    assert!(events.is_empty(), "reload must not raise events: {events:?}");
    manager.tick(Instant::now());
    manager.take_outgoing();

    // second load was not a first load: nothing new to save yet
    manager.tick(Instant::now() + 2 * config.save_interval);
    assert!(manager.take_store_requests().is_empty());
}

#[test]
fn save_requested_mid_load_is_deferred_not_dropped() {
    let config = ReplicationConfig::default();
    let mut manager = manager();

    let client = manager.client_connect();
    manager.client_set_areas(client, vec![9]).unwrap();
    manager.take_store_requests();

    // an entity created into the still-loading area dirties it
    let mut data = Map::new();
    data.insert("area".into(), json!(9));
    data.insert("hp".into(), json!(2));
    let entity = manager.create_entity(data);

    manager.complete_area_load(9, Ok(vec![])).unwrap();
    manager.tick(Instant::now());
    manager.take_outgoing();
    manager.take_store_requests();

    manager.tick(Instant::now() + config.save_interval + Duration::from_secs(1));
    let saves = manager.take_store_requests();
    match saves.as_slice() {
        [StoreRequest::SaveArea { area: 9, entities }] => {
            assert_eq!(entities.len(), 1);
            assert_eq!(entities[0]["hp"], json!(2));
        }
        other => panic!("expected the deferred save, got {other:?}"),
    }
    assert!(manager.entity(entity).is_some());
}

#[test]
fn failed_area_load_raises_an_event_with_its_waiters() {
    let mut manager = manager();

    let client = manager.client_connect();
    manager.client_set_areas(client, vec![3]).unwrap();
    manager.take_store_requests();
    manager
        .complete_area_load(3, Err("store offline".into()))
        .unwrap();

    let events = manager.take_events();
    match events.as_slice() {
        [vantage_server::ReplicationEvent::AreaLoadFailed {
            area,
            error,
            waiters,
        }] => {
            assert_eq!(*area, 3);
            assert_eq!(error, "store offline");
            assert_eq!(waiters, &vec![client]);
        }
        other => panic!("expected a load failure event, got {other:?}"),
    }

    // no stale record: a later subscription retries the load
    manager.client_set_areas(client, vec![]).unwrap();
    manager.client_set_areas(client, vec![3]).unwrap();
    assert_eq!(only_load_area(manager.take_store_requests()), 3);
}

#[test]
fn entities_bound_for_a_failed_load_survive_the_retry() {
    let config = ReplicationConfig::default();
    let mut manager = manager();

    let client = manager.client_connect();
    manager.client_set_areas(client, vec![9]).unwrap();
    manager.take_store_requests();

    // arrives while the area is still loading
    let mut data = Map::new();
    data.insert("area".into(), json!(9));
    data.insert("hp".into(), json!(4));
    let entity = manager.create_entity(data);

    // the failed load immediately queues another attempt for the stranded
    // arrival
    manager
        .complete_area_load(9, Err("store offline".into()))
        .unwrap();
    assert_eq!(only_load_area(manager.take_store_requests()), 9);
    manager.take_events();

    manager.complete_area_load(9, Ok(vec![])).unwrap();
    manager.tick(Instant::now());
    manager.take_outgoing();
    manager.take_store_requests();
    assert!(manager.entity(entity).is_some());

    manager.tick(Instant::now() + config.save_interval + Duration::from_secs(1));
    match manager.take_store_requests().as_slice() {
        [StoreRequest::SaveArea { area: 9, entities }] => {
            assert_eq!(entities.len(), 1);
            assert_eq!(entities[0]["hp"], json!(4));
        }
        other => panic!("expected the arrival in the save, got {other:?}"),
    }
}
