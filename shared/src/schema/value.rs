//! Per-field value codec: dispatches a JSON value onto the packet primitive
//! selected by the field's encoding kind.

use serde_json::Value;

use super::error::SchemaError;
use super::field::{EncodingKind, FieldDef};
use crate::packet::{PacketReader, PacketWriter};

pub fn write_value(
    writer: &mut PacketWriter,
    field: &FieldDef,
    value: &Value,
) -> Result<(), SchemaError> {
    match field.encoding {
        EncodingKind::Int => {
            let v = value.as_i64().ok_or_else(|| wrong(field, "int"))?;
            writer.write_int(v);
        }
        EncodingKind::Float => {
            let v = value.as_f64().ok_or_else(|| wrong(field, "float"))?;
            writer.write_f64(v);
        }
        EncodingKind::Str => {
            let v = value.as_str().ok_or_else(|| wrong(field, "str"))?;
            writer.write_str(v);
        }
        EncodingKind::Bool => {
            let v = value.as_bool().ok_or_else(|| wrong(field, "bool"))?;
            writer.write_bool(v);
        }
        EncodingKind::Buffer => {
            let bytes = value_to_bytes(value).ok_or_else(|| wrong(field, "buffer"))?;
            writer.write_buffer(&bytes);
        }
        EncodingKind::Json => writer.write_json(value),
    }
    Ok(())
}

pub fn read_value(reader: &mut PacketReader<'_>, field: &FieldDef) -> Result<Value, SchemaError> {
    let value = match field.encoding {
        EncodingKind::Int => Value::from(reader.read_int()?),
        EncodingKind::Float => {
            let v = reader.read_f64()?;
            serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        EncodingKind::Str => Value::String(reader.read_str()?),
        EncodingKind::Bool => Value::Bool(reader.read_bool()?),
        EncodingKind::Buffer => {
            let bytes = reader.read_buffer()?;
            Value::Array(bytes.into_iter().map(Value::from).collect())
        }
        EncodingKind::Json => reader.read_json()?,
    };
    Ok(value)
}

// Buffer fields carry their bytes as a JSON array of numbers in entity data.
fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    let array = value.as_array()?;
    let mut bytes = Vec::with_capacity(array.len());
    for entry in array {
        let n = entry.as_u64()?;
        bytes.push(u8::try_from(n).ok()?);
    }
    Some(bytes)
}

fn wrong(field: &FieldDef, expected: &'static str) -> SchemaError {
    SchemaError::WrongValueType {
        field: field.name.clone(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::field::{EncodingKind, FieldSpec};
    use super::super::registry::SchemaRegistry;
    use super::{read_value, write_value};
    use crate::packet::{PacketPool, PacketWriter};

    #[test]
    fn typed_values_round_trip() {
        let registry = SchemaRegistry::new(vec![
            FieldSpec::new("hp").encoding(EncodingKind::Int),
            FieldSpec::new("speed").encoding(EncodingKind::Float),
            FieldSpec::new("label").encoding(EncodingKind::Str),
            FieldSpec::new("alive").encoding(EncodingKind::Bool),
            FieldSpec::new("blob").encoding(EncodingKind::Buffer),
            FieldSpec::new("misc"),
        ])
        .unwrap();

        let pool = PacketPool::new();
        let mut writer = PacketWriter::new(&pool);
        let values = [
            ("hp", json!(42)),
            ("speed", json!(1.5)),
            ("label", json!("orc")),
            ("alive", json!(true)),
            ("blob", json!([1, 2, 255])),
            ("misc", json!({"a": [1, 2]})),
        ];
        for (name, value) in &values {
            write_value(&mut writer, registry.require(name).unwrap(), value).unwrap();
        }
        let packet = writer.finish();
        let mut reader = packet.reader();
        for (name, value) in &values {
            let decoded = read_value(&mut reader, registry.require(name).unwrap()).unwrap();
            assert_eq!(&decoded, value, "field {name}");
        }
    }

    #[test]
    fn mismatched_type_is_an_error() {
        let registry =
            SchemaRegistry::new(vec![FieldSpec::new("hp").encoding(EncodingKind::Int)]).unwrap();
        let pool = PacketPool::new();
        let mut writer = PacketWriter::new(&pool);
        let result = write_value(&mut writer, registry.require("hp").unwrap(), &json!("nan"));
        assert!(result.is_err());
    }
}
