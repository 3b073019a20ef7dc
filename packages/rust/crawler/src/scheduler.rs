//! Paced work queue for catalog requests.
//!
//! Tasks wait in a FIFO queue. On every tick of a fixed-period timer at most
//! one task is dispatched, so the request rate never exceeds one per period
//! regardless of how many tasks are pending. Requests run concurrently once
//! dispatched; each response is fed back to a [`CrawlPlan`], which may enqueue
//! follow-up tasks. The run ends when nothing is pending and every dispatched
//! request has completed.
//!
//! The first failure aborts the run: pending tasks are discarded, nothing new
//! is dispatched, and responses still in flight are awaited and dropped
//! before the failure is returned.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use catalogsync_shared::{CatalogSyncError, Result};

use crate::client::CatalogFetch;
use crate::job::ImportJob;

// ---------------------------------------------------------------------------
// CrawlPlan
// ---------------------------------------------------------------------------

/// Decides what to request and what to do with each response.
pub trait CrawlPlan: Send {
    type Task: Send + 'static;

    /// Request path for `task`.
    fn path(&self, task: &Self::Task) -> String;

    /// Consume the response to `task` and return follow-up tasks.
    ///
    /// `payload` is `None` when the resource does not exist. An error aborts
    /// the run.
    fn resume(&mut self, task: Self::Task, payload: Option<Value>) -> Result<Vec<Self::Task>>;
}

// ---------------------------------------------------------------------------
// WorkQueue
// ---------------------------------------------------------------------------

/// Bookkeeping for pending, dispatched, and completed tasks.
#[derive(Debug)]
pub struct WorkQueue<T> {
    pending: VecDeque<T>,
    dispatched: u64,
    completed: u64,
    aborted: bool,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            dispatched: 0,
            completed: 0,
            aborted: false,
        }
    }

    /// Append a task. Returns `false` (and drops the task) once aborted.
    pub fn enqueue(&mut self, task: T) -> bool {
        if self.aborted {
            return false;
        }
        self.pending.push_back(task);
        true
    }

    /// Take the next task to dispatch, if any.
    pub fn tick(&mut self) -> Option<T> {
        if self.aborted {
            return None;
        }
        let task = self.pending.pop_front()?;
        self.dispatched += 1;
        Some(task)
    }

    /// Record a completion. Returns whether the response should be used;
    /// after an abort it must be discarded.
    pub fn complete(&mut self) -> bool {
        self.completed += 1;
        !self.aborted
    }

    /// Stop dispatching and drop everything still pending.
    pub fn abort(&mut self) {
        self.aborted = true;
        self.pending.clear();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Nothing pending and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.dispatched == self.completed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> u64 {
        self.dispatched - self.completed
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Runs a [`CrawlPlan`] against a fetcher at one dispatch per `period`.
pub struct Scheduler<F> {
    fetcher: Arc<F>,
    period: Duration,
}

type Completion<T> = (T, Result<Option<Value>>);

impl<F: CatalogFetch> Scheduler<F> {
    pub fn new(fetcher: Arc<F>, period: Duration) -> Self {
        Self { fetcher, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Drive `plan` from `seed` until the queue drains or a failure aborts
    /// the run. `job` counters track dispatches and completions.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn run<P: CrawlPlan>(
        &self,
        plan: &mut P,
        seed: Vec<P::Task>,
        job: &mut ImportJob,
    ) -> Result<()> {
        let mut queue = WorkQueue::new();
        for task in seed {
            queue.enqueue(task);
        }

        let mut in_flight: JoinSet<Completion<P::Task>> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failure: Option<CatalogSyncError> = None;

        info!(
            pending = queue.pending(),
            period_ms = self.period.as_millis() as u64,
            "work queue started"
        );

        while !queue.is_drained() {
            tokio::select! {
                _ = ticker.tick(), if queue.pending() > 0 => {
                    if let Some(task) = queue.tick() {
                        let path = plan.path(&task);
                        let fetcher = Arc::clone(&self.fetcher);
                        job.dispatched = queue.dispatched();
                        debug!(%path, pending = queue.pending(), "dispatching");
                        in_flight.spawn(async move {
                            let result = fetcher.fetch(&path).await;
                            (task, result)
                        });
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let usable = queue.complete();
                    job.completed = queue.completed();

                    let outcome = match joined {
                        Ok((task, Ok(payload))) if usable => plan.resume(task, payload),
                        Ok((_, Ok(_))) => {
                            debug!(in_flight = queue.in_flight(), "discarding response after abort");
                            Ok(Vec::new())
                        }
                        Ok((_, Err(e))) => Err(e),
                        Err(e) => Err(CatalogSyncError::crawl(format!("request task failed: {e}"))),
                    };

                    match outcome {
                        Ok(next) => {
                            for task in next {
                                queue.enqueue(task);
                            }
                        }
                        Err(e) => {
                            if queue.is_aborted() {
                                debug!(error = %e, "further failure after abort");
                            } else {
                                warn!(
                                    error = %e,
                                    in_flight = queue.in_flight(),
                                    dropped = queue.pending(),
                                    "aborting work queue"
                                );
                                queue.abort();
                                failure = Some(e);
                            }
                        }
                    }
                }
                else => break,
            }
        }

        job.dispatched = queue.dispatched();
        job.completed = queue.completed();

        match failure {
            Some(e) => Err(e),
            None => {
                info!(
                    dispatched = queue.dispatched(),
                    completed = queue.completed(),
                    "work queue drained"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Clone)]
    enum Reply {
        Found(Value),
        Missing,
        Fail(u16),
        Slow(Duration, Value),
    }

    /// Fetcher answering from a fixed script and recording call times.
    struct ScriptedFetcher {
        script: HashMap<String, Reply>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedFetcher {
        fn new(script: &[(&str, Reply)]) -> Self {
            Self {
                script: script
                    .iter()
                    .map(|(p, r)| (p.to_string(), r.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CatalogFetch for ScriptedFetcher {
        async fn fetch(&self, path: &str) -> Result<Option<Value>> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), Instant::now()));
            match self.script.get(path).cloned().unwrap_or(Reply::Missing) {
                Reply::Found(v) => Ok(Some(v)),
                Reply::Missing => Ok(None),
                Reply::Fail(status) => Err(CatalogSyncError::Server {
                    status,
                    url: path.to_string(),
                    body: String::new(),
                }),
                Reply::Slow(delay, v) => {
                    tokio::time::sleep(delay).await;
                    Ok(Some(v))
                }
            }
        }
    }

    /// Plan whose responses list the next paths to visit.
    #[derive(Default)]
    struct FanOut {
        resumed: Vec<String>,
    }

    impl CrawlPlan for FanOut {
        type Task = String;

        fn path(&self, task: &String) -> String {
            task.clone()
        }

        fn resume(&mut self, task: String, payload: Option<Value>) -> Result<Vec<String>> {
            self.resumed.push(task);
            let next = payload
                .as_ref()
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Ok(next)
        }
    }

    #[test]
    fn queue_tracks_dispatch_and_completion() {
        let mut queue = WorkQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        assert!(!queue.is_drained());

        assert_eq!(queue.tick(), Some("a"));
        assert_eq!(queue.in_flight(), 1);
        assert!(queue.complete());
        assert_eq!(queue.tick(), Some("b"));
        assert_eq!(queue.tick(), None);
        assert!(!queue.is_drained(), "b still in flight");
        assert!(queue.complete());
        assert!(queue.is_drained());
        assert_eq!((queue.dispatched(), queue.completed()), (2, 2));
    }

    #[test]
    fn aborted_queue_ignores_new_work() {
        let mut queue = WorkQueue::new();
        for task in ["a", "b", "c"] {
            queue.enqueue(task);
        }
        assert_eq!(queue.tick(), Some("a"));

        queue.abort();
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.tick(), None);
        assert!(!queue.enqueue("d"));
        assert!(!queue.is_drained());

        assert!(!queue.complete(), "late response must be discarded");
        assert!(queue.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_at_most_one_request_per_period() {
        let period = Duration::from_millis(500);
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("root", Reply::Found(serde_json::json!(["a", "b", "c"]))),
            ("a", Reply::Found(serde_json::json!(["a1"]))),
            ("b", Reply::Missing),
            ("c", Reply::Found(serde_json::json!([]))),
            ("a1", Reply::Found(serde_json::json!([]))),
        ]));
        let scheduler = Scheduler::new(Arc::clone(&fetcher), period);
        let mut plan = FanOut::default();
        let mut job = ImportJob::new();

        scheduler
            .run(&mut plan, vec!["root".to_string()], &mut job)
            .await
            .unwrap();

        let calls = fetcher.calls();
        let paths: Vec<&str> = calls.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["root", "a", "b", "c", "a1"]);
        for pair in calls.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            assert!(gap >= period, "requests {gap:?} apart");
        }
        assert_eq!(plan.resumed.len(), 5);
        assert_eq!((job.dispatched, job.completed), (5, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_aborts_and_waits_for_in_flight() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("root", Reply::Found(serde_json::json!(["slow", "bad", "never"]))),
            (
                "slow",
                Reply::Slow(Duration::from_millis(350), serde_json::json!(["child"])),
            ),
            ("bad", Reply::Fail(500)),
        ]));
        let scheduler = Scheduler::new(Arc::clone(&fetcher), Duration::from_millis(100));
        let mut plan = FanOut::default();
        let mut job = ImportJob::new();

        let err = scheduler
            .run(&mut plan, vec!["root".to_string()], &mut job)
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogSyncError::Server { status: 500, .. }));
        let paths: Vec<String> = fetcher.calls().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["root", "slow", "bad"]);
        assert_eq!(plan.resumed, vec!["root"], "late response must not resume");
        assert_eq!((job.dispatched, job.completed), (3, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn plan_error_aborts_run() {
        struct Refuse;
        impl CrawlPlan for Refuse {
            type Task = ();
            fn path(&self, _: &()) -> String {
                "root".into()
            }
            fn resume(&mut self, _: (), _: Option<Value>) -> Result<Vec<()>> {
                Err(CatalogSyncError::crawl("root not found"))
            }
        }

        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let scheduler = Scheduler::new(fetcher, Duration::from_millis(100));
        let mut job = ImportJob::new();
        let err = scheduler.run(&mut Refuse, vec![()], &mut job).await.unwrap_err();
        assert!(matches!(err, CatalogSyncError::Crawl { .. }));
        assert_eq!((job.dispatched, job.completed), (1, 1));
    }
}
