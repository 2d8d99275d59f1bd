//! Job Submitter (spec.md §4.4): turns one chosen batch into a primary job,
//! and a primary job's completion into sentence/metadata jobs. Attempts
//! lease-by-lookup cache replay (spec.md §4.1) before ever touching the
//! worker runtime. Grounded on `lcpvian/qi.py`'s `submit_query()`/
//! `submit_sents()` — same split between "replay a finished job in-process"
//! and "enqueue a fresh one with dependency wiring".

use std::sync::Arc;

use corpusq_cache::JobRecord;
use corpusq_core::{fingerprint_dependent, fingerprint_primary, Batch, Iteration};
use serde_json::Value;

use crate::adapters::worker_runtime::{EnqueueRequest, Hook, JobFn};
use crate::engine::callbacks;
use crate::engine::controller::LogicalQuery;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// What submission produced: an immediate in-process replay, or a freshly
/// enqueued job the caller must wait on via websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Replayed,
    Enqueued,
}

/// Segment ids present in a primary job's raw result, in the shape the
/// dependent jobs' `:ids` templates expect. First element of each row's
/// payload is the segment id (spec.md §4.2 "hydrating").
fn extract_segment_ids(primary_rows: &Value) -> Vec<String> {
    let mut ids: Vec<String> = primary_rows
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| row.as_array())
        .filter(|pair| pair.len() >= 2)
        .filter_map(|pair| pair[1].as_array())
        .filter_map(|payload| payload.first())
        .map(|seg| match seg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Builds a primary job body: runs the generated SQL against the DB
/// executor and returns its raw rows as a JSON array.
fn make_primary_job(state: Arc<AppState>, sql_text: String) -> JobFn {
    Box::new(move |_args, _kwargs, _cancel| {
        Box::pin(async move {
            let rows = state
                .db_executor
                .execute(&sql_text, &[], false)
                .await
                .map_err(|e| e.to_string())?;
            Ok(Value::Array(rows))
        })
    })
}

/// Builds a sentence/metadata job body: fetches the primary's result at
/// execution time, extracts segment ids, binds them into the `:ids`
/// template, and runs it (spec.md §4.4, §4.8 "the worker resolves the bind
/// at execution time, not the engine").
fn make_dependent_job(state: Arc<AppState>, template: String, primary_job_id: String) -> JobFn {
    Box::new(move |_args, _kwargs, _cancel| {
        Box::pin(async move {
            let primary = state.worker.fetch(&primary_job_id).await.map_err(|e| e.to_string())?;
            let ids = extract_segment_ids(&primary.result.unwrap_or(Value::Array(vec![])));
            let sql = template.replace(":ids", &ids.join(", "));
            let rows = state.db_executor.execute(&sql, &[], false).await.map_err(|e| e.to_string())?;
            Ok(Value::Array(rows))
        })
    })
}

fn general_failure_hook(state: Arc<AppState>, logical_id: String, iteration: Iteration) -> Hook {
    Box::new(move |job| Box::pin(async move { callbacks::general_failure(state, logical_id, iteration, job).await }))
}

/// Submits the primary job of one iteration: generates SQL, checks for a
/// replayable cached result, and either replays in-process or enqueues a
/// fresh job (spec.md §4.1, §4.4).
pub async fn submit_primary(state: Arc<AppState>, logical: &mut LogicalQuery, batch: Batch) -> ApiResult<SubmitOutcome> {
    let schema = batch.schema_name.clone();
    let generated = state
        .sql_generator
        .generate(&logical.structured_query, &schema, &batch.batch_name, &logical.languages, &Value::Null)
        .await
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let prefilter_fragment = state.prefilter.build(&logical.structured_query, &Value::Null);
    let sql_text = if prefilter_fragment.is_empty() {
        generated.sql_text.clone()
    } else {
        format!("{} AND {}", generated.sql_text, prefilter_fragment)
    };

    let fingerprint = fingerprint_primary(&sql_text);
    if logical.id.is_none() {
        logical.id = Some(fingerprint.clone());
    }
    let logical_id = logical.id.clone().expect("just assigned above");

    let iteration = Iteration {
        logical_query_id: logical_id.clone(),
        index: logical.iteration_index,
        batch: batch.clone(),
        sql_text: sql_text.clone(),
        sentence_sql_template: generated.sentence_sql_template.clone(),
        metadata_sql_template: generated.metadata_sql_template.clone(),
        post_process: generated.post_process.clone(),
        offset: 0,
        needed: logical.needed(),
        full: logical.full,
        total_results_requested: logical.total_results_requested,
        primary_job_id: Some(fingerprint.clone()),
        sentence_job_id: None,
        metadata_job_id: None,
    };

    logical.current_primary_job_id = Some(fingerprint.clone());
    logical.mark_submitting();
    state.logical_queries.write().map_err(|_| ApiError::Internal("logical_queries lock poisoned".into()))?.insert(logical_id.clone(), logical.clone());

    let cache_hit = if state.config.use_cache { state.cache.get_job(&fingerprint).await? } else { None };

    let outcome = if let Some(record) = cache_hit.filter(|record| record.is_replayable()) {
        state.cache.refresh_ttl(&fingerprint).await?;
        let rows = record.result.unwrap_or(Value::Array(vec![]));
        // A replayed primary never runs through the worker, so register its
        // result directly — dependents still `depends_on`/`fetch` it by id.
        state.worker.record_finished(&fingerprint, rows.clone()).await.map_err(|e| ApiError::Internal(e.to_string()))?;
        callbacks::primary_success(state.clone(), iteration.clone(), rows).await?;
        SubmitOutcome::Replayed
    } else {
        state
            .cache
            .put_job(JobRecord::queued(fingerprint.clone(), Value::Null, state.config.query_ttl))
            .await?;

        let on_success: Hook = {
            let state = state.clone();
            let iteration = iteration.clone();
            let fingerprint = fingerprint.clone();
            Box::new(move |job| {
                Box::pin(async move {
                    let rows = job.result.unwrap_or(Value::Array(vec![]));
                    if let Err(e) = state.cache.put_job(JobRecord::finished(fingerprint, rows.clone(), state.config.query_ttl)).await {
                        tracing::error!(error = %e, "failed to cache finished primary job");
                    }
                    if let Err(e) = callbacks::primary_success(state, iteration, rows).await {
                        tracing::error!(error = %e, "primary_success callback failed");
                    }
                })
            })
        };
        let on_failure = general_failure_hook(state.clone(), logical_id.clone(), iteration.clone());

        let func = make_primary_job(state.clone(), sql_text);
        let timeout = state.config.primary_timeout(logical.full || logical.needed() == -1);

        state
            .worker
            .enqueue(
                EnqueueRequest {
                    job_id: fingerprint.clone(),
                    args: vec![],
                    kwargs: Value::Null,
                    depends_on: vec![],
                    timeout,
                    result_ttl: state.config.query_ttl,
                },
                func,
                Some(on_success),
                Some(on_failure),
            )
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        SubmitOutcome::Enqueued
    };

    if logical.want_sentences {
        let (_, sentence_id) = submit_sentence(state.clone(), &iteration).await?;
        let (_, metadata_id) = submit_metadata(state.clone(), &iteration).await?;
        logical.sentence_job_ids.push(sentence_id.clone());
        logical.metadata_job_ids.push(metadata_id.clone());

        // Record onto the registry entry directly rather than re-inserting
        // the whole `logical` snapshot, which could otherwise clobber
        // concurrent mutations already applied by the primary's callback.
        if let Ok(mut registry) = state.logical_queries.write() {
            if let Some(entry) = registry.get_mut(&logical_id) {
                entry.sentence_job_ids.push(sentence_id);
                entry.metadata_job_ids.push(metadata_id);
            }
        }
    }

    Ok(outcome)
}

enum DependentKind {
    Sentence,
    Metadata,
}

async fn submit_dependent(state: Arc<AppState>, iteration: &Iteration, kind: DependentKind) -> ApiResult<(SubmitOutcome, String)> {
    let primary_job_id = iteration
        .primary_job_id
        .clone()
        .ok_or_else(|| ApiError::Internal("dependent job submitted before its primary".into()))?;

    let template = match kind {
        DependentKind::Sentence => iteration.sentence_sql_template.clone(),
        DependentKind::Metadata => iteration.metadata_sql_template.clone(),
    };
    let fingerprint = fingerprint_dependent(&template, &primary_job_id, iteration.offset, iteration.needed, iteration.full);

    if state.config.use_cache {
        if let Some(record) = state.cache.get_job(&fingerprint).await? {
            if record.is_replayable() {
                state.cache.refresh_ttl(&fingerprint).await?;
                let rows = record.result.unwrap_or(Value::Array(vec![]));
                run_dependent_success(state.clone(), iteration.clone(), &kind, rows).await?;
                return Ok((SubmitOutcome::Replayed, fingerprint));
            }
        }
    }

    state
        .cache
        .put_job(JobRecord::queued(fingerprint.clone(), Value::Null, state.config.query_ttl))
        .await?;

    let on_success: Hook = {
        let state = state.clone();
        let iteration = iteration.clone();
        let fingerprint = fingerprint.clone();
        Box::new(move |job| {
            Box::pin(async move {
                let rows = job.result.unwrap_or(Value::Array(vec![]));
                if let Err(e) = state.cache.put_job(JobRecord::finished(fingerprint, rows.clone(), state.config.query_ttl)).await {
                    tracing::error!(error = %e, "failed to cache finished dependent job");
                }
                if let Err(e) = run_dependent_success(state, iteration, &kind, rows).await {
                    tracing::error!(error = %e, "dependent success callback failed");
                }
            })
        })
    };
    let on_failure = general_failure_hook(state.clone(), iteration.logical_query_id.clone(), iteration.clone());

    let func = make_dependent_job(state.clone(), template, primary_job_id.clone());
    state
        .worker
        .enqueue(
            EnqueueRequest {
                job_id: fingerprint.clone(),
                args: vec![],
                kwargs: Value::Null,
                depends_on: vec![primary_job_id],
                timeout: state.config.callback_timeout,
                result_ttl: state.config.query_ttl,
            },
            func,
            Some(on_success),
            Some(on_failure),
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((SubmitOutcome::Enqueued, fingerprint))
}

async fn run_dependent_success(state: Arc<AppState>, iteration: Iteration, kind: &DependentKind, rows: Value) -> ApiResult<()> {
    match kind {
        DependentKind::Sentence => callbacks::sentence_success(state, iteration, rows).await,
        DependentKind::Metadata => callbacks::metadata_success(state, iteration, rows).await,
    }
}

/// Submits the sentence job for one iteration, once its primary job id is
/// known (spec.md §4.4). Returns the job's fingerprint alongside how it was
/// satisfied, so the caller can record it on the Logical Query.
pub async fn submit_sentence(state: Arc<AppState>, iteration: &Iteration) -> ApiResult<(SubmitOutcome, String)> {
    submit_dependent(state, iteration, DependentKind::Sentence).await
}

/// Submits the metadata job for one iteration, once its primary job id is
/// known (spec.md §4.4). Returns the job's fingerprint alongside how it was
/// satisfied, so the caller can record it on the Logical Query.
pub async fn submit_metadata(state: Arc<AppState>, iteration: &Iteration) -> ApiResult<(SubmitOutcome, String)> {
    submit_dependent(state, iteration, DependentKind::Metadata).await
}
