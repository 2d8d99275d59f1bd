//! SQL generator adapter (spec.md §4.8). Consumes
//! `(structured_query, schema, batch_name, language, config)` and returns
//! `(sql_text, per-result-set metadata, post-processing descriptor)`. The
//! engine treats all three as opaque — it never inspects `sql_text` beyond
//! forwarding it to the DB executor.

use async_trait::async_trait;
use corpusq_core::{PostProcessDescriptor, ResultSetDescriptor};
use serde_json::Value;

use super::AdapterError;

/// Everything one generation call produces. `sentence_sql_template` and
/// `metadata_sql_template` are `:ids`-templated (the worker binds the
/// dependency's matched ids at execution time, not the generator).
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql_text: String,
    pub sentence_sql_template: String,
    pub metadata_sql_template: String,
    pub result_sets: Vec<ResultSetDescriptor>,
    pub post_process: PostProcessDescriptor,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(
        &self,
        structured_query: &Value,
        schema: &str,
        batch_name: &str,
        languages: &[String],
        config: &Value,
    ) -> Result<GeneratedSql, AdapterError>;
}

/// Placeholder generator standing in for the query-DSL compiler (out of
/// scope here: the engine does not itself parse query DSLs). Produces a
/// template that substitutes only the batch name and schema, which is the
/// one substitution the engine is allowed to make directly.
#[derive(Debug, Default)]
pub struct StubSqlGenerator;

#[async_trait]
impl SqlGenerator for StubSqlGenerator {
    async fn generate(
        &self,
        structured_query: &Value,
        schema: &str,
        batch_name: &str,
        _languages: &[String],
        _config: &Value,
    ) -> Result<GeneratedSql, AdapterError> {
        if structured_query.is_null() {
            return Err(AdapterError::SqlGeneration("empty structured query".into()));
        }
        Ok(GeneratedSql {
            sql_text: format!("SELECT * FROM \"{schema}\".\"{batch_name}\""),
            sentence_sql_template: format!("SELECT * FROM \"{schema}\".segment WHERE segment_id IN (:ids)"),
            metadata_sql_template: format!("SELECT * FROM \"{schema}\".meta WHERE segment_id IN (:ids)"),
            result_sets: vec![ResultSetDescriptor {
                name: "plain".to_string(),
                kind: corpusq_core::ResultSetKind::Plain,
            }],
            post_process: PostProcessDescriptor::default(),
        })
    }
}
