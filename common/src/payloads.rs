use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::StoredFile;

/// Query parameters for the list endpoint. Only non-empty fields become
/// parameters; the server treats the filter fields as conjunctive
/// substring matches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub content_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_number: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListQuery {
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        let mut push_text = |key, value: &Option<String>| {
            if let Some(value) = value {
                if !value.is_empty() {
                    params.push((key, value.clone()));
                }
            }
        };
        push_text("name", &self.name);
        push_text("tag", &self.tag);
        push_text("contentType", &self.content_type);
        if let Some(date) = self.start_date {
            params.push(("startDate", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(date) = self.end_date {
            params.push(("endDate", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(page) = self.page_number {
            params.push(("pageNumber", page.to_string()));
        }
        if let Some(size) = self.page_size {
            params.push(("pageSize", size.to_string()));
        }
        params
    }
}

/// One page of list results after tolerant decoding.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub rows: Vec<StoredFile>,
    pub total_count: u64,
}

impl ListPage {
    /// Decodes a list body. The API has been seen returning a bare array,
    /// or an object wrapping the rows under `data`, `items`, or `results`
    /// with an optional `totalCount`/`total`. Anything else decodes as an
    /// empty page, never an error; rows that fail to decode are skipped.
    pub fn from_value(value: Value) -> Self {
        let (rows_value, total) = match value {
            Value::Array(rows) => (Some(rows), None),
            Value::Object(mut map) => {
                let total = map
                    .get("totalCount")
                    .or_else(|| map.get("total"))
                    .and_then(Value::as_u64);
                let rows = ["data", "items", "results"]
                    .iter()
                    .find_map(|key| map.remove(*key))
                    .and_then(|v| match v {
                        Value::Array(rows) => Some(rows),
                        _ => None,
                    });
                (rows, total)
            }
            _ => (None, None),
        };
        let rows: Vec<StoredFile> = rows_value
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();
        let total_count = total.unwrap_or(rows.len() as u64);
        Self { rows, total_count }
    }
}

/// The subset of an RFC 7807 problem response worth showing to a user.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Problem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}
