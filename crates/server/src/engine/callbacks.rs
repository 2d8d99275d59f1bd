//! Job callbacks (spec.md §4.5): what happens when a primary, sentence, or
//! metadata job finishes — fold its rows into the owning Logical Query and
//! publish a progress envelope. Grounded on `backend/callbacks.py`'s
//! `_query()`, `_sentences()`, `_general_failure()`, `_get_status()` — same
//! split between "success path mutates accumulators then publishes" and
//! "failure path classifies and, unless interrupted, publishes a terminal
//! error".

use std::sync::Arc;

use corpusq_cache::Envelope;
use corpusq_core::{apply_post_process, RawRow, ResultBucket, ResultMap, Row};
use serde_json::Value;

use crate::adapters::export_writer::ExportRequest;
use crate::adapters::worker_runtime::Job;
use crate::engine::controller::{LogicalQuery, LogicalQueryState};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn poisoned(what: &str) -> ApiError {
    ApiError::Internal(format!("{what} lock poisoned"))
}

/// A primary job's raw result is a JSON array of `[index, payload]` pairs
/// (the wire shape `corpusq_core::RawRow` models in memory).
fn parse_raw_rows(value: &Value) -> Vec<RawRow> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| {
            let pair = row.as_array()?;
            let index = pair.first()?.as_i64()?;
            let payload = pair.get(1)?.clone();
            Some((index, payload))
        })
        .collect()
}

/// Stringifies whatever a segment id happens to be (row's first element),
/// so sentence/metadata rows can be keyed consistently regardless of
/// whether the DB executor hands back a number or a string.
fn stringify_seg_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders a `ResultMap` into the stringified-key wire object spec.md §6
/// describes ("dynamic result-map keys... small non-negative integers,
/// plus the reserved keys `0` and `-1`").
fn result_map_to_wire(map: &ResultMap) -> Value {
    let mut obj = serde_json::Map::new();
    for (key, bucket) in map {
        let rendered = match bucket {
            ResultBucket::Descriptor(descriptors) => serde_json::to_value(descriptors).unwrap_or(Value::Array(vec![])),
            ResultBucket::Diagnostics(value) => value.clone(),
            ResultBucket::Plain(rows) | ResultBucket::Aggregate(rows) => Value::Array(rows.clone()),
        };
        obj.insert(key.as_index().to_string(), rendered);
    }
    Value::Object(obj)
}

/// `percentage_done` published alongside every `action: query` message
/// (spec.md §8 invariant 5, replay idempotence).
fn percentage_done(logical: &LogicalQuery, total_batches: usize) -> f64 {
    if logical.unlimited() {
        if total_batches == 0 {
            100.0
        } else {
            (logical.done_batches.len() as f64 / total_batches as f64) * 100.0
        }
    } else if logical.total_results_requested <= 0 {
        100.0
    } else {
        ((logical.total_results_so_far as f64 / logical.total_results_requested as f64) * 100.0).min(100.0)
    }
}

/// A primary job finished: aggregate its rows into the Logical Query's
/// cumulative state, decide the iteration status, and publish `action:
/// query` (spec.md §4.5 steps 1-4, §6).
pub async fn primary_success(state: Arc<AppState>, iteration: corpusq_core::Iteration, raw_result: Value) -> ApiResult<()> {
    let raw_rows = parse_raw_rows(&raw_result);
    let job_id = iteration.primary_job_id.clone().unwrap_or_default();

    let (published, export_intent) = {
        let mut registry = state.logical_queries.write().map_err(|_| poisoned("logical_queries"))?;
        let logical = registry
            .get_mut(&iteration.logical_query_id)
            .ok_or_else(|| ApiError::QueryNotFound(iteration.logical_query_id.clone()))?;

        if logical.is_canceled() || logical.job_is_canceled(&job_id) {
            return Ok(());
        }

        let output = logical.aggregate_primary(&raw_rows).map_err(|e| ApiError::Internal(e.to_string()))?;
        let all_batches = state.batches_for(&logical.corpora);
        let total_batches = all_batches.len().max(logical.done_batches.len() + 1);

        // Stash before `record_primary_result` advances `total_results_so_far`
        // past this batch — a resumed/paginated replay of an already-done
        // batch stashes nothing, since there's no fresh content to splice.
        logical.stash_for_hydration(iteration.batch.clone(), raw_rows);
        let status = logical.record_primary_result(iteration.batch.clone(), output, total_batches);
        // Replay rule (spec.md §4.1): apply the caller's *current*
        // post-processing descriptor even on a cache-hit replay of an
        // already-scored batch, not whatever was in force when it was cached.
        apply_post_process(&mut logical.result_map, &iteration.post_process);
        logical.advance(status);

        let payload = serde_json::json!({
            "result_map": result_map_to_wire(&logical.result_map),
            "total_results_so_far": logical.total_results_so_far,
            "done_batches": logical.done_batches.len(),
            "percentage_done": percentage_done(logical, total_batches),
            "job_id": job_id,
        });

        // `envelope.job` carries the Logical Query's *stable* id, not this
        // iteration's own primary job id — the listener's `continue_iteration`
        // (and a client's `cancel` message) look the registry up by this field,
        // and only the very first iteration's primary id ever equals it.
        let envelope = Envelope::new("query", logical.user.clone(), logical.room.clone(), iteration.logical_query_id.clone())
            .with_status(status.as_str())
            .with_payload(payload);

        // Export hand-off (spec.md §4.6): only once this Logical Query is
        // actually done, and only if the client asked for one.
        let export_intent = (logical.state == LogicalQueryState::Terminal)
            .then(|| logical.to_export.clone())
            .flatten()
            .map(|to_export| {
                (
                    logical.user.clone(),
                    logical.room.clone(),
                    ExportRequest {
                        logical_query_id: iteration.logical_query_id.clone(),
                        to_export,
                        sentence_job_ids: logical.sentence_job_ids.clone(),
                        metadata_job_ids: logical.metadata_job_ids.clone(),
                    },
                )
            });

        (envelope, export_intent)
    };

    let message_id = message_cache_key(&job_id, &iteration.logical_query_id);
    state.cache.put_message(&message_id, serde_json::to_value(&published).unwrap_or(Value::Null), state.config.query_ttl).await?;
    state.publisher.publish(published).await?;

    if let Some((user, room, request)) = export_intent {
        let logical_id = request.logical_query_id.clone();
        let export_job_id = state.export_writer.schedule_export(request).await.map_err(|e| ApiError::Internal(e.to_string()))?;
        let started = Envelope::new("started_export", user, room, logical_id)
            .with_payload(serde_json::json!({ "export_job": export_job_id }));
        state.publisher.publish(started).await?;
    }

    Ok(())
}

/// Derives the `msg:<id>` cache key spec.md §6 describes — the fingerprint
/// already uniquely identifies the job whose progress this message reports,
/// so no separate uuid generation is needed.
fn message_cache_key(job_id: &str, logical_id: &str) -> String {
    format!("msg:{logical_id}:{job_id}")
}

/// A sentence job finished: merge its rows into the Logical Query's
/// segment-keyed sentence map and publish `action: sentences` (spec.md §6).
pub async fn sentence_success(state: Arc<AppState>, iteration: corpusq_core::Iteration, rows: Value) -> ApiResult<()> {
    let published = {
        let mut registry = state.logical_queries.write().map_err(|_| poisoned("logical_queries"))?;
        let logical = registry
            .get_mut(&iteration.logical_query_id)
            .ok_or_else(|| ApiError::QueryNotFound(iteration.logical_query_id.clone()))?;

        if logical.is_canceled() {
            return Ok(());
        }

        merge_segment_rows(&mut logical.sentences, &rows);

        // Splice this batch's sentences into its stashed primary rows to
        // produce the final KWIC lines (spec.md §4.2 step 2), then re-apply
        // post-processing since hydration can add freshly-spliced plain rows.
        let sentence_rows: Vec<Row> = rows.as_array().cloned().unwrap_or_default();
        if let Err(e) = logical.hydrate_batch(&iteration.batch, &sentence_rows) {
            tracing::warn!(error = %e, "failed to splice sentence rows into KWIC lines");
        } else {
            apply_post_process(&mut logical.result_map, &iteration.post_process);
        }

        let job_id = iteration.sentence_job_id.clone().or_else(|| iteration.primary_job_id.clone()).unwrap_or_default();
        let payload = serde_json::json!({ "sentences": logical.sentences.values().cloned().collect::<Vec<Row>>() });
        Envelope::new("sentences", logical.user.clone(), logical.room.clone(), job_id).with_payload(payload)
    };

    state.publisher.publish(published).await?;
    Ok(())
}

/// A metadata job finished: merge its rows into the Logical Query's
/// segment-keyed metadata map and publish `action: meta` (spec.md §6).
pub async fn metadata_success(state: Arc<AppState>, iteration: corpusq_core::Iteration, rows: Value) -> ApiResult<()> {
    let published = {
        let mut registry = state.logical_queries.write().map_err(|_| poisoned("logical_queries"))?;
        let logical = registry
            .get_mut(&iteration.logical_query_id)
            .ok_or_else(|| ApiError::QueryNotFound(iteration.logical_query_id.clone()))?;

        if logical.is_canceled() {
            return Ok(());
        }

        merge_segment_rows(&mut logical.metadata, &rows);

        let job_id = iteration.metadata_job_id.clone().or_else(|| iteration.primary_job_id.clone()).unwrap_or_default();
        let payload = serde_json::json!({ "meta": logical.metadata.values().cloned().collect::<Vec<Row>>() });
        Envelope::new("meta", logical.user.clone(), logical.room.clone(), job_id).with_payload(payload)
    };

    state.publisher.publish(published).await?;
    Ok(())
}

/// Inserts each row keyed by its first element, overwriting on repeat keys
/// so merges from overlapping iterations stay commutative and idempotent.
fn merge_segment_rows(into: &mut std::collections::BTreeMap<String, Row>, rows: &Value) {
    for row in rows.as_array().into_iter().flatten() {
        if let Some(seg_id) = row.as_array().and_then(|a| a.first()) {
            into.insert(stringify_seg_id(seg_id), row.clone());
        }
    }
}

/// A job failed or timed out. Cancellation is suppressed entirely — the
/// client already knows it asked for this (spec.md §7 "Interrupted").
/// Anything else publishes a terminal `status: failed` message.
pub async fn general_failure(state: Arc<AppState>, logical_id: String, iteration: corpusq_core::Iteration, job: Job) {
    let job_id = iteration.primary_job_id.clone().unwrap_or_default();

    let published = {
        let registry = match state.logical_queries.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("logical_queries lock poisoned handling failure: {e}");
                return;
            }
        };
        let Some(logical) = registry.get(&logical_id) else {
            tracing::warn!(logical_id, "general_failure for unknown logical query");
            return;
        };

        let interrupted = logical.is_canceled() || logical.job_is_canceled(&job_id) || job.status == corpusq_cache::JobStatus::Stopped;
        if interrupted {
            return;
        }

        let detail = if state.config.debug {
            format!("job {} failed", job.id)
        } else {
            "internal error".to_string()
        };

        Envelope::new("query", logical.user.clone(), logical.room.clone(), job_id)
            .with_status("failed")
            .with_payload(serde_json::json!({ "kind": "BackendFailure", "value": detail }))
    };

    if let Err(e) = state.publisher.publish(published).await {
        tracing::error!(error = %e, "failed to publish failure envelope");
    }
}
