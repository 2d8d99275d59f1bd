//! The Result Aggregator (spec.md §4.2): merges one batch's raw result rows
//! into the cumulative result map, applying offset, quota, and
//! post-processing. A pure function — no cache or job lookups here; those
//! live in the callback layer that calls this.

use std::collections::{BTreeSet, HashMap};

use crate::error::EngineError;
use crate::types::{
    PostProcessDescriptor, ResultBucket, ResultKey, ResultMap, ResultSetDescriptor,
    ResultSetKind, Row,
};

/// One raw row as returned by a primary job: `(result_set_index, payload)`.
/// Index `0` is the descriptor row; everything else is data.
pub type RawRow = (i64, Row);

/// Inputs to one aggregation pass over a single batch's raw results
/// (spec.md §4.2).
pub struct AggregateInput<'a> {
    pub rows: &'a [RawRow],
    /// Plain-result count accumulated by prior iterations, used for the
    /// quota check (`so_far + len(bucket) >= total_requested`).
    pub so_far: i64,
    /// `full_flag || needed == -1`.
    pub unlimited: bool,
    /// Skip rows below this per-index count before `offset` (0 = no skip).
    /// Open Question 1: applied here, before the post-union truncate.
    pub offset: i64,
    /// Resume count: when `Some(n)`, only start counting a plain index once
    /// its running count reaches `n` (pagination restart point).
    pub restart: Option<i64>,
    pub total_requested: i64,
    /// Whether this pass is hydrating KWIC rows (sentence/metadata jobs) or
    /// just counting matches (primary job).
    pub hydrating: bool,
    /// Sentence rows to splice into plain payloads when `hydrating`.
    pub sentences: &'a [Row],
    /// Descriptor carried over from a previous iteration, used when this
    /// batch's rows don't include their own descriptor row (e.g. a
    /// hydration pass against an already-classified primary result).
    pub known_descriptor: Option<&'a [ResultSetDescriptor]>,
}

pub struct AggregateOutput {
    pub bucket: ResultMap,
    /// Count of plain matches produced by this batch (first plain index).
    pub batch_matches: i64,
}

/// Build this batch's result bucket from its raw rows (spec.md §4.2 steps
/// 1-2). Does not touch the cumulative map — see [`union_results`].
pub fn aggregate(input: &AggregateInput<'_>) -> Result<AggregateOutput, EngineError> {
    let mut bucket: ResultMap = ResultMap::new();
    let mut plain_indices: BTreeSet<u32> = BTreeSet::new();

    for (index, payload) in input.rows {
        if *index == 0 {
            let descriptors = parse_descriptor(payload)?;
            plain_indices.extend(
                descriptors
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.kind == ResultSetKind::Plain)
                    .map(|(i, _)| (i + 1) as u32),
            );
            bucket.insert(ResultKey::Descriptor, ResultBucket::Descriptor(descriptors));
        }
    }
    if plain_indices.is_empty() {
        if let Some(known) = input.known_descriptor {
            plain_indices.extend(
                known
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.kind == ResultSetKind::Plain)
                    .map(|(i, _)| (i + 1) as u32),
            );
        }
    }

    let mut counts: HashMap<u32, i64> = HashMap::new();

    for (index, payload) in input.rows {
        if *index == 0 {
            continue;
        }
        if *index < 0 {
            bucket.insert(ResultKey::Diagnostics, ResultBucket::Diagnostics(payload.clone()));
            continue;
        }
        let idx = *index as u32;
        if plain_indices.contains(&idx) {
            let count = counts.entry(idx).or_insert(0);
            *count += 1;

            if !input.hydrating {
                // Primary pass: tally matches, don't emit rows (sentences
                // hydrate separately).
                continue;
            }

            if !input.unlimited && input.offset > 0 && *count <= input.offset {
                continue;
            }
            if let Some(restart) = input.restart {
                if *count < restart {
                    continue;
                }
            }
            if !input.unlimited {
                let current_len = bucket_len(&bucket, idx);
                if input.so_far + current_len as i64 >= input.total_requested {
                    continue;
                }
            }

            let row = make_kwic_line(payload, input.sentences)?;
            push_plain(&mut bucket, idx, row);
        } else {
            push_aggregate(&mut bucket, idx, payload.clone());
        }
    }

    let batch_matches = plain_indices
        .iter()
        .next()
        .and_then(|idx| counts.get(idx))
        .copied()
        .unwrap_or(0);

    Ok(AggregateOutput { bucket, batch_matches })
}

fn bucket_len(map: &ResultMap, idx: u32) -> usize {
    map.get(&ResultKey::Bucket(idx)).map(ResultBucket::len).unwrap_or(0)
}

fn push_plain(map: &mut ResultMap, idx: u32, row: Row) {
    match map.get_mut(&ResultKey::Bucket(idx)) {
        Some(ResultBucket::Plain(rows)) => rows.push(row),
        _ => {
            map.insert(ResultKey::Bucket(idx), ResultBucket::Plain(vec![row]));
        }
    }
}

fn push_aggregate(map: &mut ResultMap, idx: u32, row: Row) {
    match map.get_mut(&ResultKey::Bucket(idx)) {
        Some(ResultBucket::Aggregate(rows)) => rows.push(row),
        _ => {
            map.insert(ResultKey::Bucket(idx), ResultBucket::Aggregate(vec![row]));
        }
    }
}

fn parse_descriptor(payload: &Row) -> Result<Vec<ResultSetDescriptor>, EngineError> {
    let sets = payload
        .get("result_sets")
        .ok_or_else(|| EngineError::MalformedDescriptor(payload.clone()))?;
    serde_json::from_value(sets.clone())
        .map_err(|_| EngineError::MalformedDescriptor(payload.clone()))
}

/// Splice a matching sentence row's fields into a match row (spec.md §4.2
/// "hydrating"). `original[0]` is the segment id; the returned row is
/// `[seg_id, ...sentence_fields, ...original[1..]]`.
pub fn make_kwic_line(original: &Row, sentences: &[Row]) -> Result<Row, EngineError> {
    let original_arr = original
        .as_array()
        .ok_or_else(|| EngineError::MalformedRow(original.clone()))?;
    let seg_id = original_arr
        .first()
        .ok_or_else(|| EngineError::MalformedRow(original.clone()))?;

    for sent in sentences {
        let sent_arr = sent
            .as_array()
            .ok_or_else(|| EngineError::MalformedRow(sent.clone()))?;
        let sent_id = sent_arr
            .first()
            .ok_or_else(|| EngineError::MalformedRow(sent.clone()))?;
        if values_eq_as_string(sent_id, seg_id) {
            let mut out = Vec::with_capacity(1 + sent_arr.len() + original_arr.len().saturating_sub(1));
            out.push(seg_id.clone());
            out.extend(sent_arr.iter().cloned());
            out.extend(original_arr[1..].iter().cloned());
            return Ok(Row::Array(out));
        }
    }
    Err(EngineError::SentenceNotFound(original.clone()))
}

fn values_eq_as_string(a: &Row, b: &Row) -> bool {
    stringify(a) == stringify(b)
}

fn stringify(value: &Row) -> String {
    match value {
        Row::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merge a batch's bucket into the cumulative map (spec.md §4.2 step 3):
/// plain indices extend, non-plain indices are replaced wholesale, and the
/// descriptor/diagnostics entries are filled in once and never overwritten
/// (they're stable across iterations per spec.md §3 invariant).
pub fn union_results(base: &mut ResultMap, incoming: ResultMap) {
    for (key, bucket) in incoming {
        match bucket {
            ResultBucket::Descriptor(d) => {
                base.entry(key).or_insert(ResultBucket::Descriptor(d));
            }
            ResultBucket::Diagnostics(d) => {
                base.entry(key).or_insert(ResultBucket::Diagnostics(d));
            }
            ResultBucket::Plain(mut rows) => match base.get_mut(&key) {
                Some(ResultBucket::Plain(existing)) => existing.append(&mut rows),
                _ => {
                    base.insert(key, ResultBucket::Plain(rows));
                }
            },
            ResultBucket::Aggregate(rows) => {
                base.insert(key, ResultBucket::Aggregate(rows));
            }
        }
    }
}

/// Truncate every plain bucket to `total_requested` (spec.md §4.2 step 4).
/// Applied only after union, per Open Question 1's resolution — offset is a
/// per-batch skip applied in [`aggregate`], truncation is a whole-map cap
/// applied here.
pub fn truncate_to_quota(map: &mut ResultMap, total_requested: i64) {
    if total_requested < 0 {
        return;
    }
    let cap = total_requested as usize;
    for bucket in map.values_mut() {
        if let ResultBucket::Plain(rows) = bucket {
            if rows.len() > cap {
                rows.truncate(cap);
            }
        }
    }
}

/// Apply the post-processing descriptor (spec.md §4.2 step 5). Idempotent:
/// re-running on already-filtered/projected data is a no-op.
pub fn apply_post_process(map: &mut ResultMap, descriptor: &PostProcessDescriptor) {
    for (idx, rule) in &descriptor.0 {
        if let Some(ResultBucket::Plain(rows)) = map.get_mut(&ResultKey::Bucket(*idx)) {
            rows.retain(|r| rule.matches(r));
            for r in rows.iter_mut() {
                *r = rule.project(r);
            }
        }
    }
}
