//! The Batch Selector (spec.md §4.3): a pure function of its inputs, no
//! hidden state, so it can be exercised with scenario tables.

use crate::types::Batch;

/// Fraction of `needed` added as safety margin before trusting the
/// density-based prediction (spec.md §4.3 step 6).
const DENSITY_BUFFER: f64 = 0.1;

/// Below this many accumulated results, prefer speed over batch-size
/// prediction (spec.md §4.3 step 6, "get something to the user quickly").
const FAST_START_THRESHOLD: i64 = 25;

#[derive(Debug, Clone)]
pub struct SelectorInput<'a> {
    /// Sorted ascending by `approximate_row_count` (caller's responsibility,
    /// matching how the generator emits them).
    pub all_batches: &'a [Batch],
    pub done_batches: &'a [Batch],
    pub total_results_so_far: i64,
    /// `-1` means unlimited.
    pub needed: i64,
    pub full: bool,
    pub page_size: i64,
    pub is_single_batch: bool,
    /// True when this call is resuming an existing Logical Query
    /// (pagination), not creating a fresh one.
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorDecision {
    Next(Batch),
    NoMoreData,
}

/// Choose the next batch to query given partial results (spec.md §4.3).
pub fn select_next_batch(input: &SelectorInput<'_>) -> SelectorDecision {
    if !input.done_batches.is_empty() && input.resume {
        if input.done_batches.len() == input.all_batches.len() {
            return SelectorDecision::NoMoreData;
        }
        let last = input
            .done_batches
            .last()
            .expect("checked non-empty above")
            .clone();
        return SelectorDecision::Next(last);
    }

    if !input.resume && input.done_batches.len() == input.all_batches.len() {
        return SelectorDecision::NoMoreData;
    }

    if input.is_single_batch {
        return match input.all_batches.first() {
            Some(batch) => SelectorDecision::Next(batch.clone()),
            None => SelectorDecision::NoMoreData,
        };
    }

    if input.done_batches.is_empty() {
        let first = input
            .all_batches
            .iter()
            .find(|b| b.is_rest())
            .or_else(|| input.all_batches.first());
        return match first {
            Some(batch) => SelectorDecision::Next(batch.clone()),
            None => SelectorDecision::NoMoreData,
        };
    }

    let total_rows_processed: u64 = input.done_batches.iter().map(|b| b.approximate_row_count).sum();
    let density = if total_rows_processed == 0 {
        0.0
    } else {
        input.total_results_so_far as f64 / total_rows_processed as f64
    };

    let mut first_not_done: Option<&Batch> = None;
    for batch in input.all_batches {
        if input.done_batches.contains(batch) {
            continue;
        }
        if input.full || input.needed == -1 {
            return SelectorDecision::Next(batch.clone());
        }
        if first_not_done.is_none() {
            first_not_done = Some(batch);
        }
        if input.page_size > 0 && input.total_results_so_far < input.page_size.min(FAST_START_THRESHOLD) {
            return SelectorDecision::Next(batch.clone());
        }
        let expected = batch.approximate_row_count as f64 * density;
        if expected >= input.needed as f64 * (1.0 + DENSITY_BUFFER) {
            return SelectorDecision::Next(batch.clone());
        }
    }

    match first_not_done {
        Some(batch) => SelectorDecision::Next(batch.clone()),
        None => SelectorDecision::NoMoreData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(name: &str, size: u64) -> Batch {
        Batch::new(1, "schema", name, size)
    }

    #[test]
    fn no_batches_left_when_all_done_and_not_resuming() {
        let all = vec![batch("b1", 100)];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &all,
            total_results_so_far: 10,
            needed: 50,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(select_next_batch(&input), SelectorDecision::NoMoreData);
    }

    #[test]
    fn resumption_returns_last_done_batch() {
        let all = vec![batch("b1", 100), batch("b2", 200)];
        let done = vec![all[0].clone()];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 10,
            needed: -1,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: true,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[0].clone())
        );
    }

    #[test]
    fn resumption_with_all_batches_done_signals_no_more_data() {
        let all = vec![batch("b1", 100)];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &all,
            total_results_so_far: 10,
            needed: -1,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: true,
        };
        assert_eq!(select_next_batch(&input), SelectorDecision::NoMoreData);
    }

    #[test]
    fn single_batch_corpora_always_return_the_one_batch() {
        let all = vec![batch("only", 500)];
        let done: Vec<Batch> = vec![];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 0,
            needed: 10,
            full: false,
            page_size: 20,
            is_single_batch: true,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[0].clone())
        );
    }

    #[test]
    fn first_iteration_prefers_rest_batch() {
        let all = vec![batch("b1", 100), batch("brest", 50000)];
        let done: Vec<Batch> = vec![];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 0,
            needed: 10,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[1].clone())
        );
    }

    #[test]
    fn first_iteration_without_rest_picks_smallest() {
        let all = vec![batch("b1", 100), batch("b2", 50000)];
        let done: Vec<Batch> = vec![];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 0,
            needed: 10,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[0].clone())
        );
    }

    #[test]
    fn full_corpus_mode_always_returns_smallest_not_done() {
        let all = vec![batch("b1", 100), batch("b2", 200), batch("b3", 300)];
        let done = vec![all[0].clone()];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 1000,
            needed: -1,
            full: true,
            page_size: 20,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[1].clone())
        );
    }

    #[test]
    fn low_result_count_prefers_smallest_not_done_for_speed() {
        let all = vec![batch("b1", 100), batch("b2", 200)];
        let done = vec![all[0].clone()];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 5,
            needed: 100,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[1].clone())
        );
    }

    #[test]
    fn density_prediction_skips_batches_too_small_to_satisfy_quota() {
        // done: b1 (size 1000) yielded 500 results -> density 0.5.
        // b2 (size 40) would yield ~20, short of needed=100*1.1=110 -> skip.
        // b3 (size 1000) would yield ~500, qualifies.
        let all = vec![batch("b1", 1000), batch("b2", 40), batch("b3", 1000)];
        let done = vec![all[0].clone()];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 500,
            needed: 100,
            full: false,
            page_size: 5, // keep below FAST_START_THRESHOLD cutoff irrelevant since so_far=500
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[2].clone())
        );
    }

    #[test]
    fn density_prediction_falls_back_to_smallest_not_done_when_none_qualify() {
        let all = vec![batch("b1", 1000), batch("b2", 10), batch("b3", 20)];
        let done = vec![all[0].clone()];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 1, // density 0.001, nothing qualifies for needed=1000
            needed: 1000,
            full: false,
            page_size: 5,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(
            select_next_batch(&input),
            SelectorDecision::Next(all[1].clone())
        );
    }

    #[test]
    fn done_batches_are_never_returned_again_outside_resumption() {
        let all = vec![batch("b1", 100), batch("b2", 200)];
        let done = vec![all[0].clone(), all[1].clone()];
        let input = SelectorInput {
            all_batches: &all,
            done_batches: &done,
            total_results_so_far: 10,
            needed: 50,
            full: false,
            page_size: 20,
            is_single_batch: false,
            resume: false,
        };
        assert_eq!(select_next_batch(&input), SelectorDecision::NoMoreData);
    }
}
