//! The normalized decision-problem document served to the front-end.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::StyleId;

/// Subject, column schema, and options of a tradeoff problem.
///
/// The template file provides `subject` and `columns`; the mapper fills
/// `options`. Extra top-level template keys are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDocument {
    pub subject: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub options: Vec<ProblemOption>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub is_objective: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<Goal>,
    /// `{ "low": .., "high": .. }` for numeric columns, a value list for
    /// categorical ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

/// Optimization direction of an objective column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Min,
    Max,
}

/// One candidate in the problem.
///
/// A `None` value serializes as `null`: the source field was missing and the
/// value is deliberately not fabricated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemOption {
    pub key: StyleId,
    pub name: String,
    pub description: String,
    pub values: BTreeMap<String, Option<f64>>,
}

impl ProblemDocument {
    /// Keys of the columns declared by the template, in order.
    pub fn column_keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.key.as_str())
    }
}
