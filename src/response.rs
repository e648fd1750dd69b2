//! Action results and the response envelope.

use crate::error::{ActionError, ErrorBody};
use crate::record::Record;
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub total_count: i64,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub results: Vec<Record>,
    pub page_info: PageInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Record(Record),
    Page(PageResult),
    Deleted(bool),
}

impl ActionOutput {
    pub fn into_record(self) -> Option<Record> {
        match self {
            ActionOutput::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_page(self) -> Option<PageResult> {
        match self {
            ActionOutput::Page(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct Success<T> {
    pub data: T,
}

/// `{"data": ...}` on success, `{"error": {...}}` otherwise.
pub fn envelope(result: &Result<ActionOutput, ActionError>, conceal_not_found: bool) -> serde_json::Value {
    let body = match result {
        Ok(output) => serde_json::to_value(Success { data: output }),
        Err(err) => serde_json::to_value(ErrorBody::from_error(err, conceal_not_found)),
    };
    body.unwrap_or(serde_json::Value::Null)
}
