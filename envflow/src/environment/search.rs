//! Search over environment records
//!
//! A search is a JSON object passed in the `search` query parameter:
//!
//! ```json
//! {
//!   "extends_search": [{"grupo_l3": 1}, {"name__icontains": "prod"}],
//!   "start_record": 0,
//!   "end_record": 25,
//!   "asorting_cols": ["-id"],
//!   "searchable_columns": ["name"],
//!   "custom_search": "core"
//! }
//! ```
//!
//! Maps in `extends_search` are OR-ed, the conditions inside one map are
//! AND-ed. A key may carry a `__icontains` or `__in` lookup suffix.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::EnvError;

const DEFAULT_PAGE_SIZE: usize = 25;

fn default_end_record() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub extends_search: Vec<Map<String, Value>>,

    #[serde(default)]
    pub start_record: usize,

    #[serde(default = "default_end_record")]
    pub end_record: usize,

    #[serde(default)]
    pub asorting_cols: Vec<String>,

    #[serde(default)]
    pub searchable_columns: Vec<String>,

    #[serde(default)]
    pub custom_search: String,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            extends_search: Vec::new(),
            start_record: 0,
            end_record: DEFAULT_PAGE_SIZE,
            asorting_cols: Vec::new(),
            searchable_columns: Vec::new(),
            custom_search: String::new(),
        }
    }
}

impl SearchParams {
    /// Parse the `search` query parameter
    pub fn parse(raw: &str) -> Result<Self, EnvError> {
        let params: SearchParams = serde_json::from_str(raw)
            .map_err(|e| EnvError::ValidationError(format!("invalid search: {}", e)))?;
        if params.end_record < params.start_record {
            return Err(EnvError::ValidationError(
                "invalid search: end_record is lower than start_record".into(),
            ));
        }
        Ok(params)
    }

    fn page_size(&self) -> usize {
        self.end_record - self.start_record
    }
}

/// Outcome of a search
#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    pub query_set: Vec<T>,
    /// Matches before paging
    pub total: usize,
    pub next_search: Option<SearchParams>,
    pub prev_search: Option<SearchParams>,
}

/// Filter, sort and page `records`
pub fn apply<T: Serialize>(records: Vec<T>, params: &SearchParams) -> Result<SearchResult<T>, EnvError> {
    let mut matched = Vec::new();
    for record in records {
        let value = serde_json::to_value(&record)?;
        let object = value.as_object().cloned().unwrap_or_default();
        if matches_filters(&object, &params.extends_search)
            && matches_custom(&object, &params.searchable_columns, &params.custom_search)
        {
            matched.push((object, record));
        }
    }

    for column in params.asorting_cols.iter().rev() {
        let (field, descending) = match column.strip_prefix('-') {
            Some(field) => (field, true),
            None => (column.as_str(), false),
        };
        matched.sort_by(|(a, _), (b, _)| {
            let ordering = compare_values(a.get(field), b.get(field));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let total = matched.len();
    let query_set: Vec<T> = matched
        .into_iter()
        .skip(params.start_record)
        .take(params.page_size())
        .map(|(_, record)| record)
        .collect();

    let page = params.page_size();
    let next_search = (page > 0 && params.end_record < total).then(|| SearchParams {
        start_record: params.end_record,
        end_record: params.end_record + page,
        ..params.clone()
    });
    let prev_search = (page > 0 && params.start_record > 0).then(|| {
        let start = params.start_record.saturating_sub(page);
        SearchParams {
            start_record: start,
            end_record: start + page,
            ..params.clone()
        }
    });

    Ok(SearchResult {
        query_set,
        total,
        next_search,
        prev_search,
    })
}

fn matches_filters(object: &Map<String, Value>, filters: &[Map<String, Value>]) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters.iter().any(|filter| {
        filter
            .iter()
            .all(|(key, expected)| matches_condition(object, key, expected))
    })
}

fn matches_condition(object: &Map<String, Value>, key: &str, expected: &Value) -> bool {
    if let Some(field) = key.strip_suffix("__icontains") {
        let needle = match expected.as_str() {
            Some(needle) => needle.to_lowercase(),
            None => return false,
        };
        return object
            .get(field)
            .and_then(Value::as_str)
            .map_or(false, |s| s.to_lowercase().contains(&needle));
    }
    if let Some(field) = key.strip_suffix("__in") {
        let candidates = match expected.as_array() {
            Some(candidates) => candidates,
            None => return false,
        };
        return object
            .get(field)
            .map_or(false, |actual| candidates.contains(actual));
    }
    object.get(key).map_or(expected.is_null(), |actual| actual == expected)
}

fn matches_custom(object: &Map<String, Value>, columns: &[String], needle: &str) -> bool {
    if needle.is_empty() || columns.is_empty() {
        return true;
    }
    let needle = needle.to_lowercase();
    columns.iter().any(|column| match object.get(column) {
        Some(Value::String(s)) => s.to_lowercase().contains(&needle),
        Some(Value::Number(n)) => n.to_string().contains(&needle),
        _ => false,
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}
