pub mod aggregator;
pub mod error;
pub mod fingerprint;
pub mod selector;
pub mod types;

pub use aggregator::{aggregate, apply_post_process, make_kwic_line, truncate_to_quota, union_results};
pub use aggregator::{AggregateInput, AggregateOutput, RawRow};
pub use error::EngineError;
pub use fingerprint::{fingerprint_dependent, fingerprint_primary};
pub use selector::{select_next_batch, SelectorDecision, SelectorInput};
pub use types::{
    Batch, Iteration, PostProcessDescriptor, PostProcessRule, ResultBucket, ResultKey, ResultMap,
    ResultSetDescriptor, ResultSetKind, Row,
};
