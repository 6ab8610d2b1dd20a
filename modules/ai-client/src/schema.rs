use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A type the model can be forced to produce.
///
/// Blanket-implemented for every `JsonSchema + DeserializeOwned` type. The
/// schema is flattened for tool use: `definitions` are inlined in place of
/// their `$ref`s and every object is closed (`additionalProperties: false`).
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn tool_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = match &mut root {
            Value::Object(map) => {
                map.remove("$schema");
                map.remove("title");
                map.remove("definitions").unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };

        resolve(&mut root, &definitions);
        root
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn resolve(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(target) = referenced(map, definitions) {
                *value = target;
                resolve(value, definitions);
                return;
            }
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".into(), Value::Bool(false));
            }
            for child in map.values_mut() {
                resolve(child, definitions);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve(item, definitions);
            }
        }
        _ => {}
    }
}

/// `{"$ref": "#/definitions/X"}` or a single-element `allOf` wrapping one.
fn referenced(map: &Map<String, Value>, definitions: &Value) -> Option<Value> {
    if let Some(path) = map.get("$ref").and_then(Value::as_str) {
        let name = path.strip_prefix("#/definitions/")?;
        return definitions.get(name).cloned();
    }
    match map.get("allOf").and_then(Value::as_array) {
        Some(all_of) if all_of.len() == 1 => Some(all_of[0].clone()),
        _ => None,
    }
}
