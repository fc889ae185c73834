//! `Query`: read-time projection applied to a file's content (spec.md §4.4).
//!
//! Two query types are supported: `IDENTITY`, which returns an entry's
//! content unchanged, and `JSON_PATH`, which evaluates one or more
//! JSONPath expressions against a JSON entry's content in sequence, each
//! expression's result array feeding the next. Results are always
//! wrapped in a JSON array, even when a single expression selects a
//! single node.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::entry::EntryContent;
use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    Identity,
    JsonPath { expressions: Vec<String> },
}

/// A query: the path of the file to read plus how to project its
/// content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    pub path: String,
    #[serde(flatten)]
    pub query_type: QueryType,
}

impl Query {
    pub fn identity(path: impl Into<String>) -> Self {
        Query {
            path: path.into(),
            query_type: QueryType::Identity,
        }
    }

    pub fn json_path(path: impl Into<String>, expressions: Vec<String>) -> Self {
        Query {
            path: path.into(),
            query_type: QueryType::JsonPath { expressions },
        }
    }
}

/// The outcome of executing a [`Query`] against an [`EntryContent`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Json(Value),
    Text(String),
}

/// Evaluate `query_type` against `content`. `JsonPath` queries require
/// JSON content; text and directory content only support `Identity`.
pub fn execute(query_type: &QueryType, content: &EntryContent) -> CoreResult<QueryResult> {
    match (query_type, content) {
        (QueryType::Identity, EntryContent::Json(v)) => Ok(QueryResult::Json(v.clone())),
        (QueryType::Identity, EntryContent::Text(t)) => Ok(QueryResult::Text(t.clone())),
        (QueryType::Identity, EntryContent::Directory) => Err(CoreError::QueryExecution(
            "cannot query a directory entry".to_string(),
        )),
        (QueryType::JsonPath { expressions }, EntryContent::Json(v)) => {
            if expressions.is_empty() {
                return Ok(QueryResult::Json(v.clone()));
            }
            let mut current = v.clone();
            for expr in expressions {
                let path = JsonPath::parse(expr)
                    .map_err(|e| CoreError::QueryExecution(format!("invalid JSONPath {expr:?}: {e}")))?;
                let nodes: Vec<Value> = path.query(&current).all().into_iter().cloned().collect();
                current = Value::Array(nodes);
            }
            Ok(QueryResult::Json(current))
        }
        (QueryType::JsonPath { .. }, _) => Err(CoreError::QueryExecution(
            "JSON_PATH queries require a JSON entry".to_string(),
        )),
    }
}
