//! Query Iteration Controller (spec.md §4.6): the state machine that owns
//! one Logical Query's lifecycle across iterations. Grounded on
//! `lcpvian/qi.py`'s `QueryIteration` dataclass and its `from_request`/
//! `from_manual` classmethods — the same split between "fresh from an
//! HTTP request" and "synthesised by the listener for continuation"
//! reappears here as two constructors on [`LogicalQuery`].

use std::collections::{BTreeMap, BTreeSet};

use corpusq_core::{
    aggregate, truncate_to_quota, union_results, AggregateOutput, Batch, RawRow, ResultBucket,
    ResultKey, ResultMap, Row,
};
use serde::Deserialize;

/// A batch's raw primary rows and the quota context active when it was
/// counted, kept just long enough for its matching sentence job to splice
/// KWIC lines against the same rows (spec.md §4.2 step 2). Dropped once
/// [`LogicalQuery::hydrate_batch`] consumes it.
#[derive(Debug, Clone)]
pub struct PendingHydration {
    pub raw_rows: Vec<RawRow>,
    pub so_far_before: i64,
    pub unlimited: bool,
    pub total_requested: i64,
}

/// Body of `POST /query` (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub user: String,
    pub room: String,
    pub corpora: Vec<i64>,
    pub query: serde_json::Value,
    pub languages: Vec<String>,
    pub total_results_requested: i64,
    pub page_size: i64,
    pub sentences: bool,
    pub full: bool,
    pub previous: Option<String>,
    pub to_export: Option<String>,
}

/// spec.md §4.6 state diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalQueryState {
    Created,
    Submitting,
    Replaying,
    Running,
    Aggregated,
    Terminal,
    Continue,
    Canceled,
}

/// The `_status` vocabulary published on `action: query` messages
/// (spec.md §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    Finished,
    Satisfied,
    Partial,
    Failed,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationStatus::Finished => "finished",
            IterationStatus::Satisfied => "satisfied",
            IterationStatus::Partial => "partial",
            IterationStatus::Failed => "failed",
        }
    }
}

/// The user-facing query identity and its cross-iteration accumulators
/// (spec.md §3 "Logical Query").
#[derive(Debug, Clone)]
pub struct LogicalQuery {
    /// The id of the first iteration's primary job, once known. `None`
    /// between `CREATED` and the first successful submission/replay.
    pub id: Option<String>,
    pub user: String,
    pub room: String,
    pub corpora: Vec<i64>,
    pub structured_query: serde_json::Value,
    pub languages: Vec<String>,
    pub total_results_requested: i64,
    pub page_size: i64,
    pub want_sentences: bool,
    pub full: bool,
    pub to_export: Option<String>,

    pub done_batches: Vec<Batch>,
    pub result_map: ResultMap,
    pub total_results_so_far: i64,

    pub sentence_job_ids: Vec<String>,
    pub metadata_job_ids: Vec<String>,
    pub last_message_id: Option<String>,

    /// The primary job id of whichever iteration is currently in flight —
    /// distinct from `id`, which stays pinned to the *first* iteration's
    /// primary job id for the Logical Query's whole lifetime (spec.md §3).
    /// Cancellation needs this one to stop the job actually running.
    pub current_primary_job_id: Option<String>,

    /// Sentence/metadata rows merged in as dependent jobs complete, keyed by
    /// segment id so repeated merges from overlapping iterations stay
    /// idempotent and commutative (spec.md §8 invariant 6).
    pub sentences: BTreeMap<String, Row>,
    pub metadata: BTreeMap<String, Row>,

    /// Raw rows stashed per not-yet-hydrated batch, awaiting that batch's
    /// sentence job (spec.md §4.2 step 2, `hydrate_batch`).
    pub pending_hydration: BTreeMap<Batch, PendingHydration>,

    pub state: LogicalQueryState,
    pub canceled_jobs: BTreeSet<String>,
    pub iteration_index: u32,
}

impl LogicalQuery {
    /// CREATED from an HTTP request (spec.md §4.6 "from request").
    pub fn from_request(request: &QueryRequest) -> Self {
        Self {
            id: None,
            user: request.user.clone(),
            room: request.room.clone(),
            corpora: request.corpora.clone(),
            structured_query: request.query.clone(),
            languages: request.languages.clone(),
            total_results_requested: request.total_results_requested,
            page_size: request.page_size,
            want_sentences: request.sentences,
            full: request.full,
            to_export: request.to_export.clone(),
            done_batches: Vec::new(),
            result_map: ResultMap::new(),
            total_results_so_far: 0,
            sentence_job_ids: Vec::new(),
            metadata_job_ids: Vec::new(),
            last_message_id: None,
            current_primary_job_id: None,
            sentences: BTreeMap::new(),
            metadata: BTreeMap::new(),
            pending_hydration: BTreeMap::new(),
            state: LogicalQueryState::Created,
            canceled_jobs: BTreeSet::new(),
            iteration_index: 0,
        }
    }

    /// CREATED from a manual continuation (spec.md §4.6 transition rules):
    /// the listener hands back the prior iteration's accumulators
    /// (`done_batches`, `result_map`, `total_results_so_far`) as if a fresh
    /// request had arrived, so submission proceeds identically either way.
    pub fn from_manual_continuation(prior: &LogicalQuery) -> Self {
        let mut next = prior.clone();
        next.state = LogicalQueryState::Created;
        next.iteration_index += 1;
        next
    }

    pub fn unlimited(&self) -> bool {
        self.full || self.total_results_requested < 0
    }

    /// `needed` for the next iteration: quota minus what's already in hand,
    /// or `-1` for full-corpus mode (spec.md §3 "Iteration").
    pub fn needed(&self) -> i64 {
        if self.unlimited() {
            -1
        } else {
            (self.total_results_requested - self.total_results_so_far).max(0)
        }
    }

    pub fn mark_submitting(&mut self) {
        self.state = LogicalQueryState::Submitting;
    }

    pub fn mark_replaying(&mut self) {
        self.state = LogicalQueryState::Replaying;
    }

    pub fn mark_running(&mut self) {
        self.state = LogicalQueryState::Running;
    }

    /// A client-initiated cancel targets every not-yet-terminal job of this
    /// Logical Query; re-cancellation is safe because `canceled_jobs` only
    /// grows (spec.md §4.6).
    pub fn cancel(&mut self, in_flight_job_ids: impl IntoIterator<Item = String>) {
        self.canceled_jobs.extend(in_flight_job_ids);
        self.state = LogicalQueryState::Canceled;
    }

    pub fn is_canceled(&self) -> bool {
        self.state == LogicalQueryState::Canceled
    }

    pub fn job_is_canceled(&self, job_id: &str) -> bool {
        self.canceled_jobs.contains(job_id)
    }

    /// Fold one batch's aggregated output into the cumulative state and
    /// decide `_status` (spec.md §4.5 primary-success, steps 1-4 of §4.2).
    ///
    /// A resumed/paginated query replays an already-`done_batches` batch
    /// purely to re-extract segment ids for its sentence/metadata jobs
    /// (spec.md §4.3 "resume" branch) — that replay must not re-score the
    /// batch, or `done_batches` stops being a set of unique batches and
    /// `total_results_so_far` double-counts it.
    pub fn record_primary_result(&mut self, batch: Batch, output: AggregateOutput, total_batches: usize) -> IterationStatus {
        if !self.done_batches.contains(&batch) {
            self.done_batches.push(batch);
            self.total_results_so_far += output.batch_matches;
            union_results(&mut self.result_map, output.bucket);
            truncate_to_quota(&mut self.result_map, self.total_results_requested);
        }
        self.state = LogicalQueryState::Aggregated;

        if self.done_batches.len() >= total_batches {
            IterationStatus::Finished
        } else if !self.unlimited() && self.total_results_so_far >= self.total_results_requested {
            IterationStatus::Satisfied
        } else {
            IterationStatus::Partial
        }
    }

    /// Stashes a fresh batch's raw rows for its sentence job to hydrate
    /// later (spec.md §4.2 step 2). A no-op for a batch already in
    /// `done_batches` — a resumed/paginated replay has nothing fresh to
    /// splice, it only re-extracts segment ids for the dependent jobs.
    /// Must be called before [`Self::record_primary_result`], which is what
    /// advances `total_results_so_far`/`unlimited` past this batch.
    pub fn stash_for_hydration(&mut self, batch: Batch, raw_rows: Vec<RawRow>) {
        if self.done_batches.contains(&batch) {
            return;
        }
        self.pending_hydration.insert(
            batch,
            PendingHydration {
                raw_rows,
                so_far_before: self.total_results_so_far,
                unlimited: self.unlimited(),
                total_requested: self.total_results_requested,
            },
        );
    }

    /// Splices `sentences` into this batch's stashed raw rows to produce
    /// final KWIC lines, then folds them into the cumulative result map
    /// (spec.md §4.2 step 2). A no-op if the batch was never stashed (a
    /// resumed replay, or a sentence job completing twice for one batch).
    pub fn hydrate_batch(&mut self, batch: &Batch, sentences: &[Row]) -> Result<(), corpusq_core::EngineError> {
        let Some(ctx) = self.pending_hydration.remove(batch) else {
            return Ok(());
        };
        let known_descriptor = match self.result_map.get(&ResultKey::Descriptor) {
            Some(ResultBucket::Descriptor(d)) => Some(d.as_slice()),
            _ => None,
        };
        let input = corpusq_core::AggregateInput {
            rows: &ctx.raw_rows,
            so_far: ctx.so_far_before,
            unlimited: ctx.unlimited,
            offset: 0,
            restart: None,
            total_requested: ctx.total_requested,
            hydrating: true,
            sentences,
            known_descriptor,
        };
        let output = aggregate(&input)?;
        union_results(&mut self.result_map, output.bucket);
        truncate_to_quota(&mut self.result_map, self.total_results_requested);
        Ok(())
    }

    /// `TERMINAL` on `finished`/`satisfied`, `CONTINUE` (back to `CREATED`)
    /// on `partial` (spec.md §4.6 diagram).
    pub fn advance(&mut self, status: IterationStatus) -> LogicalQueryState {
        self.state = match status {
            IterationStatus::Finished | IterationStatus::Satisfied => LogicalQueryState::Terminal,
            IterationStatus::Partial => LogicalQueryState::Continue,
            IterationStatus::Failed => LogicalQueryState::Terminal,
        };
        self.state
    }

    /// Fresh aggregation input for a primary (counting, non-hydrating)
    /// pass (spec.md §4.2). The sentence pass builds its own
    /// `AggregateInput` with `hydrating: true` — see
    /// [`Self::stash_for_hydration`]/[`Self::hydrate_batch`].
    pub fn aggregate_primary(&self, rows: &[corpusq_core::RawRow]) -> Result<AggregateOutput, corpusq_core::EngineError> {
        let input = corpusq_core::AggregateInput {
            rows,
            so_far: self.total_results_so_far,
            unlimited: self.unlimited(),
            offset: 0,
            restart: None,
            total_requested: self.total_results_requested,
            hydrating: false,
            sentences: &[],
            known_descriptor: None,
        };
        aggregate(&input)
    }
}
