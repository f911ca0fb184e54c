//! Request body schemas
//!
//! A small subset of JSON Schema: `type`, `properties`, `required`,
//! `additionalProperties` (boolean), `items`, `minItems`, `maxItems`,
//! `minLength`, `maxLength`, `minimum`, `maximum` and `enum`.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::info;

use crate::errors::EnvError;
use crate::filesys::file::File;

pub const SIMPLE_ENV_POST: &str = "simple_env_post";
pub const ENVIRONMENT_POST: &str = "environment_post";
pub const ENVIRONMENT_PUT: &str = "environment_put";
pub const FLOWS_POST: &str = "flows_post";

/// Named schemas, loaded once at start-up
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Value>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    /// Registry holding the built-in schemas only
    pub fn builtin() -> Self {
        let schemas = HashMap::from([
            (SIMPLE_ENV_POST.to_string(), simple_env_post()),
            (ENVIRONMENT_POST.to_string(), environment_batch(false)),
            (ENVIRONMENT_PUT.to_string(), environment_batch(true)),
            (FLOWS_POST.to_string(), flows_post()),
        ]);
        Self { schemas }
    }

    /// Built-ins, overridden by the schemas of a `{name: schema}` JSON file
    pub async fn load(path: Option<&Path>) -> Result<Self, EnvError> {
        let mut registry = Self::builtin();
        if let Some(path) = path {
            let overrides: HashMap<String, Value> = File::new(path).read_json().await?;
            for (name, schema) in overrides {
                if !schema.is_object() {
                    return Err(EnvError::ConfigError(format!(
                        "schema {} in {:?} is not an object",
                        name, path
                    )));
                }
                info!("Schema {} overridden from {:?}", name, path);
                registry.schemas.insert(name, schema);
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    /// Validate `value` against the named schema
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), EnvError> {
        let schema = self
            .get(name)
            .ok_or_else(|| EnvError::Internal(format!("unknown schema {}", name)))?;

        let mut errors = Vec::new();
        check(schema, value, "$", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EnvError::ValidationError(format!(
                "{} validation failed: {}",
                name,
                errors.join("; ")
            )))
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn check(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            errors.push(format!("{}: expected {}", path, allowed.join(" or ")));
            return;
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            errors.push(format!("{}: value is not one of {}", path, Value::Array(options.clone())));
        }
    }

    match value {
        Value::Object(object) => check_object(schema, object, path, errors),
        Value::Array(items) => {
            if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    errors.push(format!("{}: expected at least {} item(s)", path, min));
                }
            }
            if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
                if items.len() as u64 > max {
                    errors.push(format!("{}: expected at most {} item(s)", path, max));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{}[{}]", path, index), errors);
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    errors.push(format!("{}: shorter than {} character(s)", path, min));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    errors.push(format!("{}: longer than {} character(s)", path, max));
                }
            }
        }
        Value::Number(n) => {
            let Some(n) = n.as_f64() else {
                return;
            };
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    errors.push(format!("{}: lower than {}", path, min));
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    errors.push(format!("{}: greater than {}", path, max));
                }
            }
        }
        _ => {}
    }
}

fn check_object(schema: &Map<String, Value>, object: &Map<String, Value>, path: &str, errors: &mut Vec<String>) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                errors.push(format!("{}: missing required field {}", path, field));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(properties) = properties {
        for (field, field_schema) in properties {
            if let Some(field_value) = object.get(field) {
                check(field_schema, field_value, &format!("{}.{}", path, field), errors);
            }
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        for field in object.keys() {
            if !properties.map_or(false, |p| p.contains_key(field)) {
                errors.push(format!("{}: unexpected field {}", path, field));
            }
        }
    }
}

fn id() -> Value {
    json!({"type": "integer", "minimum": 1})
}

fn optional_id() -> Value {
    json!({"type": ["integer", "null"], "minimum": 1})
}

fn optional_string() -> Value {
    json!({"type": ["string", "null"]})
}

fn vlan() -> Value {
    json!({"type": ["integer", "null"], "minimum": 1, "maximum": 4094})
}

fn simple_env_post() -> Value {
    let batch = json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string", "minLength": 1, "maxLength": 80}}
        }
    });
    json!({
        "type": "object",
        "properties": {"logic": batch, "l3": batch, "dc": batch}
    })
}

fn environment_batch(with_id: bool) -> Value {
    let mut required = vec!["grupo_l3", "ambiente_logico", "divisao_dc"];
    if with_id {
        required.push("id");
    }
    let id_schema = if with_id { id() } else { optional_id() };
    let item = json!({
        "type": "object",
        "required": required,
        "properties": {
            "id": id_schema,
            "grupo_l3": id(),
            "ambiente_logico": id(),
            "divisao_dc": id(),
            "filter": optional_id(),
            "acl_path": optional_string(),
            "ipv4_template": optional_string(),
            "ipv6_template": optional_string(),
            "link": optional_string(),
            "min_num_vlan_1": vlan(),
            "max_num_vlan_1": vlan(),
            "min_num_vlan_2": vlan(),
            "max_num_vlan_2": vlan(),
            "vrf": optional_string(),
            "default_vrf": optional_id(),
            "father_environment": optional_id(),
            "environment_vips": {"type": "array", "items": id()},
            "configs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["subnet", "new_prefix", "type"],
                    "properties": {
                        "subnet": {"type": "string", "minLength": 1},
                        "new_prefix": {"type": "integer", "minimum": 0, "maximum": 128},
                        "type": {"enum": ["v4", "v6"]}
                    }
                }
            }
        }
    });
    json!({
        "type": "object",
        "required": ["environments"],
        "properties": {"environments": {"type": "array", "minItems": 1, "items": item}}
    })
}

fn flows_post() -> Value {
    json!({
        "type": "object",
        "required": ["flows"],
        "properties": {
            "flows": {"type": "array", "items": {"type": "object"}}
        }
    })
}
