//! Domain types for the query iteration engine: batches, iterations, and the
//! cumulative result map. No I/O, no async — see `lib.rs`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One physical shard of a corpus token table.
///
/// Batches are compared by `approximate_row_count` ascending, with a stable
/// lexicographic tie-break on `batch_name` (Open Question 2 in DESIGN.md —
/// the source left equal-size ties unspecified).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Batch {
    pub corpus_id: i64,
    pub schema_name: String,
    pub batch_name: String,
    pub approximate_row_count: u64,
}

impl Batch {
    pub fn new(
        corpus_id: i64,
        schema_name: impl Into<String>,
        batch_name: impl Into<String>,
        approximate_row_count: u64,
    ) -> Self {
        Self {
            corpus_id,
            schema_name: schema_name.into(),
            batch_name: batch_name.into(),
            approximate_row_count,
        }
    }

    /// Whether this is the distinguished "rest" batch preferred on the first
    /// iteration (spec.md §3, §4.3 step 4).
    pub fn is_rest(&self) -> bool {
        self.batch_name.ends_with("rest")
    }
}

impl PartialOrd for Batch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Batch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.approximate_row_count
            .cmp(&other.approximate_row_count)
            .then_with(|| self.batch_name.cmp(&other.batch_name))
    }
}

/// The tagged sum over result-map keys (spec.md §9 Design Note): index `0`
/// is the descriptor, `-1` is diagnostics, everything else is a data bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Descriptor,
    Diagnostics,
    Bucket(u32),
}

impl ResultKey {
    pub fn from_index(index: i64) -> Self {
        match index {
            0 => ResultKey::Descriptor,
            -1 => ResultKey::Diagnostics,
            n => ResultKey::Bucket(n as u32),
        }
    }

    pub fn as_index(&self) -> i64 {
        match self {
            ResultKey::Descriptor => 0,
            ResultKey::Diagnostics => -1,
            ResultKey::Bucket(n) => *n as i64,
        }
    }
}

impl PartialOrd for ResultKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResultKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_index().cmp(&other.as_index())
    }
}

/// Whether a result-set index is `plain` (row-per-match, KWIC-eligible) or
/// some other aggregate/statistical kind. The wire form is a single string
/// (e.g. `"plain"`, `"freq"`, `"collocation"`), so this round-trips through
/// a plain string rather than serde's externally-tagged enum encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSetKind {
    Plain,
    Other(String),
}

impl Serialize for ResultSetKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResultSetKind::Plain => serializer.serialize_str("plain"),
            ResultSetKind::Other(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for ResultSetKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "plain" => ResultSetKind::Plain,
            _ => ResultSetKind::Other(s),
        })
    }
}

/// One entry of the descriptor row at result-map key `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResultSetKind,
}

/// A single opaque result row. The engine does not interpret row shape
/// beyond "array, first element is a segment id" for KWIC splicing.
pub type Row = serde_json::Value;

/// One bucket of the result map, keyed by `ResultKey`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultBucket {
    Descriptor(Vec<ResultSetDescriptor>),
    Diagnostics(serde_json::Value),
    /// Row-per-match; extended (not replaced) on union.
    Plain(Vec<Row>),
    /// Statistical/aggregate rows; replaced wholesale on union since the
    /// generator re-emits the full aggregate each iteration.
    Aggregate(Vec<Row>),
}

impl ResultBucket {
    pub fn len(&self) -> usize {
        match self {
            ResultBucket::Descriptor(d) => d.len(),
            ResultBucket::Diagnostics(_) => 1,
            ResultBucket::Plain(rows) | ResultBucket::Aggregate(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The cumulative result map carried across iterations of one logical query.
pub type ResultMap = BTreeMap<ResultKey, ResultBucket>;

/// Per-index filter/projection applied by the aggregator (spec.md §4.2 step
/// 5). Opaque to everything but the aggregator; idempotent by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessRule {
    /// If set, only these fields survive projection (object rows only).
    pub keep_fields: Option<Vec<String>>,
    /// Rows missing any of these (non-null) fields are dropped.
    pub require_non_null: Vec<String>,
}

impl PostProcessRule {
    pub fn matches(&self, row: &Row) -> bool {
        self.require_non_null
            .iter()
            .all(|field| row.get(field).is_some_and(|v| !v.is_null()))
    }

    pub fn project(&self, row: &Row) -> Row {
        match &self.keep_fields {
            None => row.clone(),
            Some(fields) => {
                let mut obj = serde_json::Map::new();
                for field in fields {
                    if let Some(v) = row.get(field) {
                        obj.insert(field.clone(), v.clone());
                    }
                }
                Row::Object(obj)
            }
        }
    }
}

/// Per-result-set-index post-processing, produced by the (out-of-scope) SQL
/// generator and applied by the aggregator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessDescriptor(pub BTreeMap<u32, PostProcessRule>);

/// One pass of the engine over exactly one batch (spec.md §3 "Iteration").
#[derive(Debug, Clone)]
pub struct Iteration {
    pub logical_query_id: String,
    pub index: u32,
    pub batch: Batch,
    pub sql_text: String,
    /// `:ids`-templated; the worker resolves the bind at execution time.
    pub sentence_sql_template: String,
    /// `:ids`-templated; the worker resolves the bind at execution time.
    pub metadata_sql_template: String,
    pub post_process: PostProcessDescriptor,
    pub offset: i64,
    /// `-1` means unlimited (full-corpus mode).
    pub needed: i64,
    pub full: bool,
    pub total_results_requested: i64,
    pub primary_job_id: Option<String>,
    pub sentence_job_id: Option<String>,
    pub metadata_job_id: Option<String>,
}

impl Iteration {
    pub fn unlimited(&self) -> bool {
        self.full || self.needed == -1
    }
}
