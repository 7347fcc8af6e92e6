//! End to end distribution: full snapshots on first sight, diffs afterwards,
//! deletes when entities leave a client's visible areas.

use std::time::Instant;

use serde_json::{json, Map, Value};

use vantage_server::{
    ActionRegistry, ClientKey, ReplicationConfig, ReplicationManager, StoreRequest, WorldHooks,
};
use vantage_shared::{
    read_update, Body, EncodingKind, EntityView, Envelope, FieldSpec, MessageId, Packet,
    PacketPool, SchemaRegistry, UpdateRecord,
};

struct GridHooks;

impl WorldHooks for GridHooks {
    fn area_of(&self, data: &Map<String, Value>) -> u64 {
        data.get("area").and_then(Value::as_u64).unwrap_or(1)
    }

    fn new_player(&self, player_key: &str) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("name".into(), json!(player_key));
        data.insert("area".into(), json!(1));
        data
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
        Box::new(GridHooks),
    )
}

fn settle_area_loads(manager: &mut ReplicationManager) {
    for request in manager.take_store_requests() {
        if let StoreRequest::LoadArea { area } = request {
            manager.complete_area_load(area, Ok(vec![])).unwrap();
        }
    }
}

/// Decodes the per-tick update envelope addressed to `key`, if any.
fn update_for(
    pool: &PacketPool,
    outgoing: &[(ClientKey, Packet)],
    key: ClientKey,
    registry: &SchemaRegistry,
) -> Option<Vec<UpdateRecord>> {
    for (to, packet) in outgoing {
        if *to != key {
            continue;
        }
        let envelope = Envelope::read(packet, pool).unwrap();
        if let (MessageId::Name(name), Body::Packet(update)) = (envelope.id, envelope.body) {
            if name == "update" {
                let mut reader = update.reader();
                return Some(read_update(&mut reader, registry).unwrap());
            }
        }
    }
    None
}

#[test]
fn full_then_diff_then_delete_on_area_change() {
    let pool = PacketPool::new();
    let registry = schema();
    let mut manager = manager();

    let a = manager.client_connect();
    let b = manager.client_connect();
    manager.client_set_areas(a, vec![1, 2]).unwrap();
    manager.client_set_areas(b, vec![1]).unwrap();
    settle_area_loads(&mut manager);

    let mut entity_data = Map::new();
    entity_data.insert("area".into(), json!(1));
    entity_data.insert("hp".into(), json!(10));
    let entity = manager.create_entity(entity_data);

    let mut view_a = EntityView::new(schema());
    let mut view_b = EntityView::new(schema());

    // first tick: both clients see their first full snapshots
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();
    let records_a = update_for(&pool, &outgoing, a, &registry).unwrap();
    let records_b = update_for(&pool, &outgoing, b, &registry).unwrap();
    assert!(matches!(records_a[0], UpdateRecord::InitialList));
    assert!(records_a.iter().any(|r| matches!(r, UpdateRecord::Schema(_))));
    assert!(records_a
        .iter()
        .any(|r| matches!(r, UpdateRecord::Full { entity: e, .. } if *e == entity)));
    view_a.apply(&records_a).unwrap();
    view_b.apply(&records_b).unwrap();
    assert_eq!(view_a.field(entity, "hp"), json!(10));
    assert_eq!(view_b.field(entity, "hp"), json!(10));

    // second tick: a scalar change travels as a diff
    manager.set_field(entity, "hp", json!(7)).unwrap();
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();
    let records_b = update_for(&pool, &outgoing, b, &registry).unwrap();
    assert!(records_b
        .iter()
        .any(|r| matches!(r, UpdateRecord::Diff { entity: e, .. } if *e == entity)));
    view_a
        .apply(&update_for(&pool, &outgoing, a, &registry).unwrap())
        .unwrap();
    view_b.apply(&records_b).unwrap();
    assert_eq!(view_a.field(entity, "hp"), json!(7));
    assert_eq!(view_b.field(entity, "hp"), json!(7));

    // third tick: the entity moves to area 2. A watches area 2 and gets a
    // fresh full; B does not and gets a delete.
    manager.set_field(entity, "area", json!(2)).unwrap();
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();

    let records_a = update_for(&pool, &outgoing, a, &registry).unwrap();
    assert!(records_a
        .iter()
        .any(|r| matches!(r, UpdateRecord::Full { entity: e, .. } if *e == entity)));
    view_a.apply(&records_a).unwrap();
    assert_eq!(view_a.field(entity, "area"), json!(2));
    assert_eq!(view_a.field(entity, "hp"), json!(7));

    let records_b = update_for(&pool, &outgoing, b, &registry).unwrap();
    let delete = records_b
        .iter()
        .find_map(|r| match r {
            UpdateRecord::Delete { entity: e, reason } if *e == entity => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(delete, "newva");
    view_b.apply(&records_b).unwrap();
    assert!(!view_b.entities.contains_key(&entity));
}

#[test]
fn quiet_ticks_send_nothing() {
    let pool = PacketPool::new();
    let registry = schema();
    let mut manager = manager();

    let a = manager.client_connect();
    manager.client_set_areas(a, vec![1]).unwrap();
    settle_area_loads(&mut manager);

    // the first tick carries the schema even with no entities
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();
    assert!(update_for(&pool, &outgoing, a, &registry).is_some());

    // after that, a tick with no changes produces no packet
    manager.tick(Instant::now());
    assert!(manager.take_outgoing().is_empty());
}

#[test]
fn broadcast_events_reach_area_subscribers_only() {
    let pool = PacketPool::new();
    let registry = schema();
    let mut manager = manager();

    let a = manager.client_connect();
    let b = manager.client_connect();
    manager.client_set_areas(a, vec![1]).unwrap();
    manager.client_set_areas(b, vec![2]).unwrap();
    settle_area_loads(&mut manager);
    manager.tick(Instant::now());
    manager.take_outgoing();

    manager.broadcast_event(1, json!({"kind": "rain"}));
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();

    let records_a = update_for(&pool, &outgoing, a, &registry).unwrap();
    let mut view_a = EntityView::new(schema());
    view_a.apply(&records_a).unwrap();
    assert_eq!(view_a.events, vec![json!({"kind": "rain"})]);

    assert!(update_for(&pool, &outgoing, b, &registry).is_none());
}

#[test]
fn destroyed_entity_reports_its_reason() {
    let pool = PacketPool::new();
    let registry = schema();
    let mut manager = manager();

    let a = manager.client_connect();
    manager.client_set_areas(a, vec![1]).unwrap();
    settle_area_loads(&mut manager);

    let mut data = Map::new();
    data.insert("area".into(), json!(1));
    let entity = manager.create_entity(data);
    manager.tick(Instant::now());
    manager.take_outgoing();

    manager.destroy_entity(entity, "slain").unwrap();
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();
    let records = update_for(&pool, &outgoing, a, &registry).unwrap();
    assert!(records
        .iter()
        .any(|r| matches!(r, UpdateRecord::Delete { entity: e, reason } if *e == entity && reason == "slain")));
}

#[test]
fn first_sight_packets_carry_no_diffs() {
    let pool = PacketPool::new();
    let registry = schema();
    let mut manager = manager();

    let a = manager.client_connect();
    manager.client_set_areas(a, vec![1]).unwrap();
    settle_area_loads(&mut manager);

    let mut data = Map::new();
    data.insert("area".into(), json!(1));
    data.insert("hp".into(), json!(10));
    let entity = manager.create_entity(data);
    manager.tick(Instant::now());
    manager.take_outgoing();

    // a late subscriber arrives on the same tick as a change: the change
    // travels as a diff to A but must fold into the newcomer's full
    let c = manager.client_connect();
    manager.client_set_areas(c, vec![1]).unwrap();
    manager.set_field(entity, "hp", json!(3)).unwrap();
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();

    let records_a = update_for(&pool, &outgoing, a, &registry).unwrap();
    assert!(records_a
        .iter()
        .any(|r| matches!(r, UpdateRecord::Diff { .. })));

    let records_c = update_for(&pool, &outgoing, c, &registry).unwrap();
    assert!(matches!(records_c[0], UpdateRecord::InitialList));
    assert!(records_c
        .iter()
        .all(|r| !matches!(r, UpdateRecord::Diff { .. })));
    let mut view_c = EntityView::new(schema());
    view_c.apply(&records_c).unwrap();
    assert_eq!(view_c.field(entity, "hp"), json!(3));
}

#[test]
fn reapplying_a_delivered_diff_changes_nothing() {
    let pool = PacketPool::new();
    let registry = SchemaRegistry::new(vec![
        FieldSpec::new("area")
            .encoding(EncodingKind::Int)
            .default_value(json!(1)),
        FieldSpec::new("items").array().default_value(json!([])),
    ])
    .unwrap();
    let mut manager = ReplicationManager::new(
        ReplicationConfig::default(),
        registry.clone(),
        ActionRegistry::new(vec![]),
        Box::new(GridHooks),
    );

    let a = manager.client_connect();
    manager.client_set_areas(a, vec![1]).unwrap();
    settle_area_loads(&mut manager);

    let mut data = Map::new();
    data.insert("area".into(), json!(1));
    data.insert("items".into(), json!(["axe", "rope", "map"]));
    let entity = manager.create_entity(data);

    let mut view = EntityView::new(registry.clone());
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();
    view.apply(&update_for(&pool, &outgoing, a, &registry).unwrap())
        .unwrap();

    manager.set_length(entity, "items", 2).unwrap();
    manager.set_index(entity, "items", 0, json!("sword")).unwrap();
    manager.tick(Instant::now());
    let outgoing = manager.take_outgoing();
    let records = update_for(&pool, &outgoing, a, &registry).unwrap();

    view.apply(&records).unwrap();
    let after_once = view.field(entity, "items");
    assert_eq!(after_once, json!(["sword", "rope"]));

    // a redelivered update stream must land on the same state
    view.apply(&records).unwrap();
    assert_eq!(view.field(entity, "items"), after_once);
}
