//! Field projection of rendered records

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::errors::EnvError;

/// Rendering kind requested with `kind=`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectionKind {
    #[default]
    Default,
    /// Only `id` and `name`
    Basic,
    /// References expanded into nested objects
    Details,
}

/// Which fields of a record end up in a response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub fields: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub kind: ProjectionKind,
}

fn split_list(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

impl Projection {
    /// Read `fields`, `include`, `exclude` and `kind` from the query string
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, EnvError> {
        let kind = match query.get("kind").map(String::as_str) {
            None | Some("") => ProjectionKind::Default,
            Some("basic") => ProjectionKind::Basic,
            Some("details") => ProjectionKind::Details,
            Some(other) => {
                return Err(EnvError::ValidationError(format!(
                    "unknown kind: {}",
                    other
                )))
            }
        };

        Ok(Self {
            fields: split_list(query.get("fields")),
            include: split_list(query.get("include")),
            exclude: split_list(query.get("exclude")),
            kind,
        })
    }

    /// Render one record.
    ///
    /// `details` holds the expanded form of reference fields plus fields that
    /// only exist in the detailed rendering.
    pub fn apply(&self, record: Value, details: &Map<String, Value>) -> Value {
        let mut object = match record {
            Value::Object(object) => object,
            other => return other,
        };

        match self.kind {
            ProjectionKind::Default => {}
            ProjectionKind::Basic => object.retain(|key, _| key == "id" || key == "name"),
            ProjectionKind::Details => {
                for (key, value) in details {
                    object.insert(key.clone(), value.clone());
                }
            }
        }

        for key in &self.include {
            if let Some(value) = details.get(key) {
                object.insert(key.clone(), value.clone());
            }
        }

        if !self.fields.is_empty() {
            object.retain(|key, _| key == "id" || self.fields.iter().any(|f| f == key));
        }

        for key in &self.exclude {
            object.remove(key);
        }

        Value::Object(object)
    }
}
