//! Worker runtime adapter (spec.md §4.8): `enqueue(func, args, kwargs,
//! depends_on, on_success, on_failure, job_id, timeout, result_ttl)` and
//! `fetch(job_id) -> Job`. Generalises the teacher's
//! `crates/server/src/jobs/runner.rs` `JobRunner`/`JobState` pair — same
//! atomics-behind-a-lock job table, same oneshot-cancellation-per-job
//! shape — with one addition the teacher's jobs never needed:
//! `depends_on` gating, so a sentence or metadata job only starts once its
//! primary has actually finished (spec.md §4.4, §5).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use corpusq_cache::JobStatus;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use super::AdapterError;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
/// A job body. Receives its positional args, its kwargs, and a cancellation
/// receiver it should select on at its own suspension points — mirrors the
/// teacher's `FnOnce(Arc<JobState>, oneshot::Receiver<()>) -> Fut` shape.
pub type JobFn = Box<dyn FnOnce(Vec<Value>, Value, oneshot::Receiver<()>) -> JobFuture + Send>;

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// Run after a job reaches a terminal state, with the finished `Job` record.
pub type Hook = Box<dyn FnOnce(Job) -> HookFuture + Send>;

/// The serialisable half of an enqueue call. `func`/`on_success`/`on_failure`
/// are passed alongside rather than folded in here, since closures aren't
/// data.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_id: String,
    pub args: Vec<Value>,
    pub kwargs: Value,
    /// Job ids that must reach `Finished` before this job's body runs.
    pub depends_on: Vec<String>,
    pub timeout: Duration,
    pub result_ttl: Duration,
}

/// A job as the engine observes it: enough to drive the Callback Layer
/// without re-deriving anything from worker-internal state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kwargs: Value,
    pub result: Option<Value>,
    pub meta: Value,
    pub status: JobStatus,
    pub depends_on: Vec<String>,
}

#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn enqueue(
        &self,
        request: EnqueueRequest,
        func: JobFn,
        on_success: Option<Hook>,
        on_failure: Option<Hook>,
    ) -> Result<(), AdapterError>;

    async fn fetch(&self, job_id: &str) -> Result<Job, AdapterError>;

    /// Idempotent: a job already terminal is left alone.
    async fn stop(&self, job_id: &str) -> Result<(), AdapterError>;

    /// Registers a job as already `Finished` with the given result, without
    /// running it — used when a cache hit replays a primary job's output, so
    /// dependents that `depends_on` it can still `fetch` a result instead of
    /// re-running the primary themselves.
    async fn record_finished(&self, job_id: &str, result: Value) -> Result<(), AdapterError>;
}

type JobTable = Arc<RwLock<HashMap<String, Job>>>;
type CancelTable = Arc<RwLock<HashMap<String, oneshot::Sender<()>>>>;

/// In-process worker runtime backed by `tokio::spawn`. One shared broadcast
/// channel announces `(job_id, status)` transitions so dependency waiters
/// don't need to poll.
pub struct TokioWorkerRuntime {
    jobs: JobTable,
    cancels: CancelTable,
    done_tx: broadcast::Sender<(String, JobStatus)>,
}

impl TokioWorkerRuntime {
    pub fn new() -> Self {
        let (done_tx, _) = broadcast::channel(1024);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
            done_tx,
        }
    }
}

impl Default for TokioWorkerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(what: &str) -> AdapterError {
    AdapterError::Poisoned(what.to_string())
}

fn set_status(jobs: &JobTable, done_tx: &broadcast::Sender<(String, JobStatus)>, job_id: &str, status: JobStatus, result: Option<Value>) {
    let terminal = status.is_terminal();
    match jobs.write() {
        Ok(mut guard) => {
            if let Some(job) = guard.get_mut(job_id) {
                job.status = status.clone();
                if result.is_some() {
                    job.result = result;
                }
            }
        }
        Err(e) => tracing::error!("RwLock poisoned writing job {job_id}: {e}"),
    }
    if terminal {
        let _ = done_tx.send((job_id.to_string(), status));
    }
}

fn snapshot(jobs: &JobTable, job_id: &str) -> Option<Job> {
    jobs.read().ok().and_then(|guard| guard.get(job_id).cloned())
}

/// Waits until `dep` reaches a terminal status, subscribing to the done
/// channel before the first status check so a dependency finishing in the
/// gap can't be missed.
async fn await_dependency(jobs: &JobTable, done_tx: &broadcast::Sender<(String, JobStatus)>, dep: &str) -> Result<(), AdapterError> {
    let mut rx = done_tx.subscribe();

    let current = jobs.read().map_err(|_| poisoned("jobs"))?.get(dep).map(|j| j.status.clone());
    match current {
        None => return Err(AdapterError::JobNotFound(dep.to_string())),
        Some(JobStatus::Finished) => return Ok(()),
        Some(s) if s.is_terminal() => return Err(AdapterError::DependencyFailed(dep.to_string())),
        Some(_) => {}
    }

    loop {
        match rx.recv().await {
            Ok((id, status)) if id == dep => {
                return if status == JobStatus::Finished {
                    Ok(())
                } else {
                    Err(AdapterError::DependencyFailed(dep.to_string()))
                };
            }
            Ok(_) => continue,
            Err(_) => return Err(AdapterError::JobNotFound(dep.to_string())),
        }
    }
}

async fn run_hook(hook: Option<Hook>, jobs: &JobTable, job_id: &str) {
    if let Some(hook) = hook {
        if let Some(job) = snapshot(jobs, job_id) {
            hook(job).await;
        }
    }
}

#[async_trait]
impl WorkerRuntime for TokioWorkerRuntime {
    async fn enqueue(
        &self,
        request: EnqueueRequest,
        func: JobFn,
        on_success: Option<Hook>,
        on_failure: Option<Hook>,
    ) -> Result<(), AdapterError> {
        let EnqueueRequest { job_id, args, kwargs, depends_on, timeout, result_ttl } = request;

        let job = Job {
            id: job_id.clone(),
            kwargs: kwargs.clone(),
            result: None,
            meta: serde_json::json!({ "result_ttl_secs": result_ttl.as_secs() }),
            status: JobStatus::Queued,
            depends_on: depends_on.clone(),
        };
        self.jobs.write().map_err(|_| poisoned("jobs"))?.insert(job_id.clone(), job);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels.write().map_err(|_| poisoned("cancels"))?.insert(job_id.clone(), cancel_tx);

        let jobs = Arc::clone(&self.jobs);
        let done_tx = self.done_tx.clone();
        let id = job_id.clone();

        tokio::spawn(async move {
            for dep in &depends_on {
                if await_dependency(&jobs, &done_tx, dep).await.is_err() {
                    set_status(&jobs, &done_tx, &id, JobStatus::Failed, None);
                    run_hook(on_failure, &jobs, &id).await;
                    return;
                }
            }

            set_status(&jobs, &done_tx, &id, JobStatus::Started, None);

            match tokio::time::timeout(timeout, func(args, kwargs, cancel_rx)).await {
                Ok(Ok(result)) => {
                    set_status(&jobs, &done_tx, &id, JobStatus::Finished, Some(result));
                    run_hook(on_success, &jobs, &id).await;
                }
                Ok(Err(_)) => {
                    set_status(&jobs, &done_tx, &id, JobStatus::Failed, None);
                    run_hook(on_failure, &jobs, &id).await;
                }
                Err(_elapsed) => {
                    set_status(&jobs, &done_tx, &id, JobStatus::Failed, None);
                    run_hook(on_failure, &jobs, &id).await;
                }
            }
        });

        Ok(())
    }

    async fn fetch(&self, job_id: &str) -> Result<Job, AdapterError> {
        snapshot(&self.jobs, job_id).ok_or_else(|| AdapterError::JobNotFound(job_id.to_string()))
    }

    async fn stop(&self, job_id: &str) -> Result<(), AdapterError> {
        let sender = self.cancels.write().map_err(|_| poisoned("cancels"))?.remove(job_id);
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
        set_status(&self.jobs, &self.done_tx, job_id, JobStatus::Stopped, None);
        Ok(())
    }

    async fn record_finished(&self, job_id: &str, result: Value) -> Result<(), AdapterError> {
        let job = Job {
            id: job_id.to_string(),
            kwargs: Value::Null,
            result: Some(result.clone()),
            meta: Value::Null,
            status: JobStatus::Finished,
            depends_on: vec![],
        };
        self.jobs.write().map_err(|_| poisoned("jobs"))?.insert(job_id.to_string(), job);
        let _ = self.done_tx.send((job_id.to_string(), JobStatus::Finished));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate(value: Value) -> JobFn {
        Box::new(move |_args, _kwargs, _cancel| Box::pin(async move { Ok(value) }))
    }

    fn failing(message: &'static str) -> JobFn {
        Box::new(move |_args, _kwargs, _cancel| Box::pin(async move { Err(message.to_string()) }))
    }

    #[tokio::test]
    async fn enqueue_without_dependencies_runs_immediately() {
        let runtime = TokioWorkerRuntime::new();
        let request = EnqueueRequest {
            job_id: "job1".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec![],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };
        runtime.enqueue(request, immediate(serde_json::json!(42)), None, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = runtime.fetch("job1").await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.result, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn dependent_job_waits_for_primary_to_finish() {
        let runtime = TokioWorkerRuntime::new();
        let primary = EnqueueRequest {
            job_id: "primary".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec![],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };
        let sentence = EnqueueRequest {
            job_id: "sentence".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec!["primary".into()],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };

        runtime.enqueue(sentence, immediate(serde_json::json!("sentences")), None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.fetch("sentence").await.unwrap().status, JobStatus::Queued);

        runtime.enqueue(primary, immediate(serde_json::json!("rows")), None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(runtime.fetch("primary").await.unwrap().status, JobStatus::Finished);
        assert_eq!(runtime.fetch("sentence").await.unwrap().status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn dependent_job_fails_when_primary_fails() {
        let runtime = TokioWorkerRuntime::new();
        let primary = EnqueueRequest {
            job_id: "primary2".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec![],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };
        let dependent = EnqueueRequest {
            job_id: "dependent2".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec!["primary2".into()],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };

        runtime.enqueue(dependent, immediate(serde_json::json!(1)), None, None).await.unwrap();
        runtime.enqueue(primary, failing("boom"), None, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.fetch("dependent2").await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn on_success_hook_runs_with_finished_job() {
        let runtime = TokioWorkerRuntime::new();
        let (tx, rx) = oneshot::channel();
        let hook: Hook = Box::new(move |job| {
            Box::pin(async move {
                let _ = tx.send(job.status);
            })
        });
        let request = EnqueueRequest {
            job_id: "hooked".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec![],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };
        runtime.enqueue(request, immediate(serde_json::json!(true)), Some(hook), None).await.unwrap();

        let status = tokio::time::timeout(Duration::from_millis(200), rx).await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let runtime = TokioWorkerRuntime::new();
        let request = EnqueueRequest {
            job_id: "stoppable".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec![],
            timeout: Duration::from_secs(5),
            result_ttl: Duration::from_secs(60),
        };
        runtime
            .enqueue(
                request,
                Box::new(|_args, _kwargs, cancel| {
                    Box::pin(async move {
                        let _ = cancel.await;
                        Err("cancelled".to_string())
                    })
                }),
                None,
                None,
            )
            .await
            .unwrap();

        runtime.stop("stoppable").await.unwrap();
        runtime.stop("stoppable").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = runtime.fetch("stoppable").await.unwrap();
        assert!(matches!(job.status, JobStatus::Stopped | JobStatus::Failed));
    }

    #[tokio::test]
    async fn fetch_unknown_job_errors() {
        let runtime = TokioWorkerRuntime::new();
        let result = runtime.fetch("does-not-exist").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn record_finished_makes_a_job_fetchable_as_a_dependency() {
        let runtime = TokioWorkerRuntime::new();
        runtime.record_finished("replayed-primary", serde_json::json!(["rows"])).await.unwrap();

        let job = runtime.fetch("replayed-primary").await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.result, Some(serde_json::json!(["rows"])));

        let dependent = EnqueueRequest {
            job_id: "dependent3".into(),
            args: vec![],
            kwargs: serde_json::json!({}),
            depends_on: vec!["replayed-primary".into()],
            timeout: Duration::from_secs(1),
            result_ttl: Duration::from_secs(60),
        };
        runtime.enqueue(dependent, immediate(serde_json::json!("sentences")), None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.fetch("dependent3").await.unwrap().status, JobStatus::Finished);
    }
}
