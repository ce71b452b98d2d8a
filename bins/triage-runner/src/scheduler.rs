/// Batch Scheduler - Bounded Worker Pool
///
/// **Responsibility:**
/// Drive the runner over every identifier with at most `pool_size` runs in
/// flight, classify each outcome, and gather the results.
///
/// **Architecture:**
/// 1. Identifiers sit in a shared slice; workers claim the next slot with
///    an atomic counter, so no identifier is claimed twice
/// 2. Each worker runs then classifies, and sends the completion over a
///    channel
/// 3. The calling task is the only receiver and the only writer of the
///    batch result
///
/// With `pool_size = 1` a single worker claims slots in order, which makes
/// the run strictly sequential.
use crate::classifier::{classify_with, Markers};
use crate::runner::Runner;
use anyhow::{bail, Context, Result};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use triage_common::config::LaunchFailurePolicy;
use triage_common::types::{
    BatchResult, Category, ClassificationTables, Identifier, LaunchError, RunOutcome,
};

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Record known timeouts without launching them
    pub bypass_known_timeouts: bool,
    pub launch_failure: LaunchFailurePolicy,
    /// Print `<id>: <category> (<secs>s)` to stderr per completion
    pub progress: bool,
}

/// One finished identifier, as sent from a worker to the collector
#[derive(Debug)]
struct Completion {
    identifier: Identifier,
    result: std::result::Result<(Category, RunOutcome), String>,
    bypassed: bool,
}

pub struct Scheduler<R: Runner> {
    runner: Arc<R>,
    tables: Arc<ClassificationTables>,
    markers: Arc<Markers>,
    options: SchedulerOptions,
}

impl<R: Runner> Scheduler<R> {
    pub fn new(
        runner: R,
        tables: ClassificationTables,
        markers: Markers,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            runner: Arc::new(runner),
            tables: Arc::new(tables),
            markers: Arc::new(markers),
            options,
        }
    }

    /// Run every identifier and return one entry per identifier
    ///
    /// Launch failures are recorded in `launch_errors` under
    /// `LaunchFailurePolicy::Record`. Under `FailFast` the first one stops
    /// workers from claiming more identifiers, in-flight runs finish, and
    /// the batch fails.
    #[instrument(skip(self, identifiers), fields(count = identifiers.len()))]
    pub async fn run_all(
        &self,
        identifiers: Vec<Identifier>,
        pool_size: usize,
    ) -> Result<BatchResult> {
        let queue: Arc<[Identifier]> = dedup_in_order(identifiers).into();
        let total = queue.len();
        let workers = pool_size.max(1).min(total.max(1));

        info!(total, workers, "Starting batch");

        let next = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let next = Arc::clone(&next);
            let stop = Arc::clone(&stop);
            let tx = tx.clone();
            let runner = Arc::clone(&self.runner);
            let tables = Arc::clone(&self.tables);
            let markers = Arc::clone(&self.markers);
            let options = self.options.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        debug!(worker_id, "Stop requested, worker exiting");
                        break;
                    }
                    let slot = next.fetch_add(1, Ordering::SeqCst);
                    let Some(identifier) = queue.get(slot) else {
                        break;
                    };

                    let completion =
                        execute_one(runner.as_ref(), identifier, &tables, &markers, &options).await;
                    let launch_failed = completion.result.is_err();

                    if tx.send(completion).is_err() {
                        break;
                    }
                    if launch_failed && options.launch_failure == LaunchFailurePolicy::FailFast {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
            }));
        }
        // Only workers hold senders now, so recv() ends once they all exit
        drop(tx);

        let mut batch = BatchResult::default();
        while let Some(completion) = rx.recv().await {
            self.record(&mut batch, completion);
        }

        for joined in join_all(handles).await {
            joined.context("Worker task panicked")?;
        }

        info!(
            completed = batch.len(),
            launch_errors = batch.launch_errors.len(),
            "Batch finished"
        );

        if self.options.launch_failure == LaunchFailurePolicy::FailFast {
            if let Some(first) = batch.launch_errors.first() {
                bail!(
                    "Aborting batch after launch failure ({} of {} identifiers completed): {}",
                    batch.len(),
                    total,
                    first
                );
            }
        }

        Ok(batch)
    }

    /// Collector side: the single writer of `batch`
    fn record(&self, batch: &mut BatchResult, completion: Completion) {
        let Completion {
            identifier,
            result,
            bypassed,
        } = completion;

        match result {
            Ok((category, outcome)) => {
                if self.options.progress {
                    eprintln!(
                        "{}",
                        progress_line(&identifier, category, outcome.elapsed, bypassed)
                    );
                }
                debug!(
                    identifier = %identifier,
                    category = %category,
                    exit_status = ?outcome.exit_status,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Run classified"
                );
                batch.entries.insert(identifier, (category, outcome));
            }
            Err(message) => {
                if self.options.progress {
                    eprintln!("{}: launch error ({})", identifier, message);
                }
                warn!(identifier = %identifier, error = %message, "Launch failed");
                batch.launch_errors.push(LaunchError {
                    identifier,
                    message,
                });
            }
        }
    }
}

async fn execute_one<R: Runner>(
    runner: &R,
    identifier: &str,
    tables: &ClassificationTables,
    markers: &Markers,
    options: &SchedulerOptions,
) -> Completion {
    if options.bypass_known_timeouts && tables.is_known_timeout(identifier) {
        return Completion {
            identifier: identifier.to_string(),
            result: Ok((
                Category::Timeout,
                RunOutcome::timed_out(identifier, Duration::ZERO),
            )),
            bypassed: true,
        };
    }

    let result = match runner.run(identifier).await {
        Ok(outcome) => {
            let category = classify_with(identifier, &outcome, tables, markers);
            Ok((category, outcome))
        }
        Err(e) => Err(format!("{:#}", e)),
    };

    Completion {
        identifier: identifier.to_string(),
        result,
        bypassed: false,
    }
}

/// `test_os: musl issue (12.3s)`
pub fn progress_line(
    identifier: &str,
    category: Category,
    elapsed: Duration,
    bypassed: bool,
) -> String {
    let mut line = format!("{}: {} ({:.1}s)", identifier, category, elapsed.as_secs_f64());
    if bypassed {
        line.push_str(" [bypassed]");
    }
    line
}

fn dedup_in_order(identifiers: Vec<Identifier>) -> Vec<Identifier> {
    let mut seen = HashSet::with_capacity(identifiers.len());
    identifiers
        .into_iter()
        .filter(|identifier| {
            let fresh = seen.insert(identifier.clone());
            if !fresh {
                warn!(identifier = %identifier, "Dropping duplicate identifier");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::future::Future;
    use std::sync::Mutex;

    /// Synthetic runner: exit status is looked up by identifier, never
    /// spawns a process
    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
        unlaunchable: HashSet<String>,
    }

    impl FakeRunner {
        fn unlaunchable(ids: &[&str]) -> Self {
            Self {
                unlaunchable: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl Runner for FakeRunner {
        fn run(&self, identifier: &str) -> impl Future<Output = Result<RunOutcome>> + Send {
            self.calls.lock().unwrap().push(identifier.to_string());
            let result = if self.unlaunchable.contains(identifier) {
                Err(anyhow!("Failed to launch `node` for {}", identifier))
            } else {
                let (status, stdout, stderr) = match identifier {
                    id if id.ends_with("_skip") => (0, "test skipped", ""),
                    id if id.ends_with("_fail") => (1, "", ""),
                    id if id.ends_with("_abort") => (7, "", "Aborted()"),
                    id if id.ends_with("_crash") => (7, "", "out of bounds"),
                    _ => (0, "", ""),
                };
                Ok(RunOutcome::exited(
                    identifier,
                    status,
                    stdout.as_bytes().to_vec(),
                    stderr.as_bytes().to_vec(),
                    Duration::from_millis(1),
                ))
            };
            async move {
                tokio::task::yield_now().await;
                result
            }
        }
    }

    fn scheduler(runner: FakeRunner, options: SchedulerOptions) -> Scheduler<FakeRunner> {
        Scheduler::new(
            runner,
            ClassificationTables::new(["test_os_fail"], ["test_logging"]),
            Markers::default(),
            options,
        )
    }

    fn ids(n: usize) -> Vec<Identifier> {
        (0..n).map(|i| format!("test_{:03}", i)).collect()
    }

    #[tokio::test]
    async fn test_every_identifier_exactly_once_for_any_pool_size() {
        for pool_size in [1, 2, 3, 8, 64] {
            let scheduler = scheduler(FakeRunner::default(), SchedulerOptions::default());
            let batch = scheduler.run_all(ids(25), pool_size).await.unwrap();

            assert_eq!(batch.len(), 25, "pool_size {}", pool_size);
            assert!(batch.launch_errors.is_empty());

            let mut calls = scheduler.runner.calls.lock().unwrap().clone();
            calls.sort();
            assert_eq!(calls, ids(25), "pool_size {}", pool_size);
        }
    }

    #[tokio::test]
    async fn test_single_worker_runs_in_order() {
        let scheduler = scheduler(FakeRunner::default(), SchedulerOptions::default());
        let input = vec!["test_c".to_string(), "test_a".to_string(), "test_b".to_string()];
        scheduler.run_all(input.clone(), 1).await.unwrap();

        assert_eq!(*scheduler.runner.calls.lock().unwrap(), input);
    }

    #[tokio::test]
    async fn test_results_classified() {
        let scheduler = scheduler(FakeRunner::default(), SchedulerOptions::default());
        let input = [
            "test_a",
            "test_b_skip",
            "test_c_fail",
            "test_os_fail",
            "test_d_abort",
            "test_e_crash",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let batch = scheduler.run_all(input, 4).await.unwrap();

        assert_eq!(batch.category_of("test_a"), Some(Category::Ok));
        assert_eq!(batch.category_of("test_b_skip"), Some(Category::Skipped));
        assert_eq!(batch.category_of("test_c_fail"), Some(Category::Failed));
        assert_eq!(batch.category_of("test_os_fail"), Some(Category::MuslIssue));
        assert_eq!(batch.category_of("test_d_abort"), Some(Category::Abort));
        assert_eq!(batch.category_of("test_e_crash"), Some(Category::Crash));
    }

    #[tokio::test]
    async fn test_parallel_and_sequential_agree() {
        let input: Vec<Identifier> = ["test_a", "test_b_skip", "test_c_fail", "test_d_crash"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let sequential = scheduler(FakeRunner::default(), SchedulerOptions::default())
            .run_all(input.clone(), 1)
            .await
            .unwrap();
        let parallel = scheduler(FakeRunner::default(), SchedulerOptions::default())
            .run_all(input, 4)
            .await
            .unwrap();

        assert_eq!(sequential.index(), parallel.index());
    }

    #[tokio::test]
    async fn test_launch_failure_recorded_and_batch_continues() {
        let scheduler = scheduler(
            FakeRunner::unlaunchable(&["test_001"]),
            SchedulerOptions::default(),
        );
        let batch = scheduler.run_all(ids(5), 2).await.unwrap();

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.launch_errors.len(), 1);
        assert_eq!(batch.launch_errors[0].identifier, "test_001");
        assert!(batch.category_of("test_001").is_none());
    }

    #[tokio::test]
    async fn test_fail_fast_stops_claiming() {
        let options = SchedulerOptions {
            launch_failure: LaunchFailurePolicy::FailFast,
            ..Default::default()
        };
        let scheduler = scheduler(FakeRunner::unlaunchable(&["test_001"]), options);
        let err = scheduler.run_all(ids(10), 1).await.unwrap_err();

        assert!(err.to_string().contains("test_001"));
        // sequential: test_000 then the failing test_001, nothing after
        assert_eq!(scheduler.runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bypass_is_opt_in() {
        let input = vec!["test_logging".to_string(), "test_a".to_string()];

        let off = scheduler(FakeRunner::default(), SchedulerOptions::default());
        let batch = off.run_all(input.clone(), 1).await.unwrap();
        assert_eq!(batch.category_of("test_logging"), Some(Category::Ok));
        assert_eq!(off.runner.calls.lock().unwrap().len(), 2);

        let options = SchedulerOptions {
            bypass_known_timeouts: true,
            ..Default::default()
        };
        let on = scheduler(FakeRunner::default(), options);
        let batch = on.run_all(input, 1).await.unwrap();
        assert_eq!(batch.category_of("test_logging"), Some(Category::Timeout));
        assert_eq!(*on.runner.calls.lock().unwrap(), vec!["test_a".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = scheduler(FakeRunner::default(), SchedulerOptions::default());
        let batch = scheduler.run_all(Vec::new(), 4).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_identifiers_run_once() {
        let scheduler = scheduler(FakeRunner::default(), SchedulerOptions::default());
        let input = vec!["test_a".to_string(), "test_a".to_string()];
        let batch = scheduler.run_all(input, 2).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(scheduler.runner.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_progress_line_format() {
        assert_eq!(
            progress_line("test_os", Category::MuslIssue, Duration::from_millis(12_340), false),
            "test_os: musl issue (12.3s)"
        );
        assert_eq!(
            progress_line("test_logging", Category::Timeout, Duration::ZERO, true),
            "test_logging: timeout (0.0s) [bypassed]"
        );
    }
}
