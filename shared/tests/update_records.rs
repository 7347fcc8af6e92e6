//! Update record stream round-trips and the diff application rules.

use serde_json::{json, Map, Value};
use vantage_shared::{
    read_update, write_delete, write_diff, write_event, write_full, write_schema,
    write_terminate, DiffChange, EncodingKind, EntityView, FieldSpec, PacketPool, PacketWriter,
    SchemaRegistry, SubOp, UpdateRecord,
};

fn registry() -> SchemaRegistry {
    SchemaRegistry::new(vec![
        FieldSpec::new("hp").encoding(EncodingKind::Int).default_value(json!(0)),
        FieldSpec::new("name").encoding(EncodingKind::Str).default_value(json!("")),
        FieldSpec::new("items").array().default_value(json!([])),
        FieldSpec::new("stats").record().default_value(json!({})),
        FieldSpec::new("session").server_only(),
    ])
    .unwrap()
}

fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn update_body_round_trips() {
    let registry = registry();
    let pool = PacketPool::new();
    let mut writer = PacketWriter::new(&pool);

    write_schema(&mut writer, &registry);
    write_full(
        &mut writer,
        &registry,
        10,
        &data(&[("hp", json!(12)), ("name", json!("orc")), ("items", json!(["axe"]))]),
    )
    .unwrap();
    write_diff(
        &mut writer,
        &registry,
        10,
        &[
            ("hp".to_string(), DiffChange::Scalar(json!(9))),
            (
                "items".to_string(),
                DiffChange::Collection(vec![
                    SubOp::SetLength(2),
                    SubOp::SetIndex(1, json!("shield")),
                ]),
            ),
            (
                "stats".to_string(),
                DiffChange::Collection(vec![
                    SubOp::SetKey("str".into(), json!(5)),
                    SubOp::RemoveKey("agi".into()),
                ]),
            ),
        ],
    )
    .unwrap();
    write_delete(&mut writer, 11, "newva").unwrap();
    write_event(&mut writer, &json!({"kind": "earthquake"}));
    write_terminate(&mut writer);

    let packet = writer.finish();
    let records = read_update(&mut packet.reader(), &registry).unwrap();
    assert_eq!(records.len(), 5);
    assert!(matches!(records[0], UpdateRecord::Schema(_)));
    match &records[1] {
        UpdateRecord::Full { entity, fields } => {
            assert_eq!(*entity, 10);
            assert_eq!(fields.len(), 3);
        }
        other => panic!("expected full, got {other:?}"),
    }
    match &records[3] {
        UpdateRecord::Delete { entity, reason } => {
            assert_eq!(*entity, 11);
            assert_eq!(reason, "newva");
        }
        other => panic!("expected delete, got {other:?}"),
    }
}

#[test]
fn full_omits_default_valued_fields() {
    let registry = registry();
    let pool = PacketPool::new();
    let mut writer = PacketWriter::new(&pool);
    write_full(
        &mut writer,
        &registry,
        5,
        &data(&[("hp", json!(0)), ("name", json!("x"))]),
    )
    .unwrap();
    write_terminate(&mut writer);
    let packet = writer.finish();
    let records = read_update(&mut packet.reader(), &registry).unwrap();
    match &records[0] {
        UpdateRecord::Full { fields, .. } => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].0, "name");
        }
        other => panic!("expected full, got {other:?}"),
    }
}

#[test]
fn diff_apply_is_idempotent() {
    let registry = registry();
    let mut view = EntityView::new(registry.clone());
    view.apply(&[UpdateRecord::Full {
        entity: 1,
        fields: vec![
            ("hp".into(), json!(10)),
            ("items".into(), json!(["axe", "rope"])),
        ],
    }])
    .unwrap();

    let diff = UpdateRecord::Diff {
        entity: 1,
        changes: vec![
            ("hp".into(), DiffChange::Scalar(json!(7))),
            (
                "items".into(),
                DiffChange::Collection(vec![SubOp::SetLength(1), SubOp::SetIndex(0, json!("axe"))]),
            ),
        ],
    };

    view.apply(std::slice::from_ref(&diff)).unwrap();
    let after_once = view.entities.get(&1).cloned().unwrap();
    assert_eq!(after_once.get("hp"), Some(&json!(7)));
    assert_eq!(after_once.get("items"), Some(&json!(["axe"])));

    // second application must be a no-op
    view.apply(std::slice::from_ref(&diff)).unwrap();
    assert_eq!(view.entities.get(&1).unwrap(), &after_once);
}

#[test]
fn diff_for_unknown_entity_is_skipped() {
    let registry = registry();
    let mut view = EntityView::new(registry);
    view.apply(&[UpdateRecord::Diff {
        entity: 99,
        changes: vec![("hp".into(), DiffChange::Scalar(json!(3)))],
    }])
    .unwrap();
    assert!(view.entities.is_empty());
}

#[test]
fn schema_record_rebuilds_the_client_registry() {
    let registry = registry();
    // client starts with an empty schema and learns it from the wire
    let mut view = EntityView::new(SchemaRegistry::new(Vec::new()).unwrap());
    view.apply(&[UpdateRecord::Schema(registry.descriptor())]).unwrap();
    assert_eq!(view.schema().get("hp").unwrap().id, registry.get("hp").unwrap().id);
    // server_only fields never replicate
    assert!(view.schema().get("session").is_none());
}

#[test]
fn delete_removes_the_entity() {
    let registry = registry();
    let mut view = EntityView::new(registry);
    view.apply(&[
        UpdateRecord::Full {
            entity: 4,
            fields: vec![("hp".into(), json!(1))],
        },
        UpdateRecord::Delete {
            entity: 4,
            reason: "newva".into(),
        },
    ])
    .unwrap();
    assert!(view.entities.is_empty());
}
