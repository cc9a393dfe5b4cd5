//! Dispatch engine: one worker per backend pulling tasks from a shared queue.
//!
//! Every task ends in exactly one [`TaskOutcome`]. Workers keep local
//! statistics and hand them back when they exit; the coordinator folds them
//! into a [`DispatchSummary`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, instrument, warn};

use promptbatch_artifacts::{GenerationRecord, ResultStore};
use promptbatch_backend::{Backend, invoke};
use promptbatch_enricher::Enricher;
use promptbatch_shared::{BackendSpec, PromptBatchError, Result, Task};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A backend and the client used to reach it.
#[derive(Clone)]
pub struct BackendWorker {
    pub spec: BackendSpec,
    pub client: Arc<dyn Backend>,
}

impl BackendWorker {
    pub fn new(spec: BackendSpec, client: Arc<dyn Backend>) -> Self {
        Self { spec, client }
    }
}

/// Per-run settings handed to every worker.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Model identifier sent with every request.
    pub model: String,
    /// Regenerate even when the artifact is fresh.
    pub force: bool,
}

/// Summary of a successful generation.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    /// Artifact file stem.
    pub key: String,
    pub words: usize,
    pub duration: Duration,
    pub words_per_second: f64,
}

/// Terminal state of one task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Artifact is newer than the source; nothing was sent.
    Skipped,
    Completed(CompletedTask),
    /// Enrichment, invocation or persistence failed.
    Failed(PromptBatchError),
}

/// Counts kept by a single worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WorkerStats {
    fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Completed(_) => self.processed += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

/// Result of a whole run.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    /// Tasks enqueued.
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Tasks never dequeued because of a shutdown request.
    pub not_started: usize,
    pub elapsed: Duration,
    pub per_backend: Vec<(BackendSpec, WorkerStats)>,
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for a dispatch run.
pub trait DispatchProgress: Send + Sync {
    /// Called once before any worker starts.
    fn started(&self, total: usize);
    /// Called after each task reaches its outcome.
    fn task_finished(&self, backend: &BackendSpec, task: &Task, outcome: &TaskOutcome);
    /// Called once after every worker has exited.
    fn finished(&self, summary: &DispatchSummary);
}

/// No-op dispatch progress.
pub struct SilentDispatchProgress;

impl DispatchProgress for SilentDispatchProgress {
    fn started(&self, _total: usize) {}
    fn task_finished(&self, _backend: &BackendSpec, _task: &Task, _outcome: &TaskOutcome) {}
    fn finished(&self, _summary: &DispatchSummary) {}
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

enum QueueItem {
    Task(Box<Task>),
    Stop,
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>;

/// Owns the worker pool for one batch.
pub struct Dispatcher {
    workers: Vec<BackendWorker>,
    enricher: Arc<Enricher>,
    store: Arc<ResultStore>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        workers: Vec<BackendWorker>,
        enricher: Arc<Enricher>,
        store: Arc<ResultStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            workers,
            enricher,
            store,
            settings,
        }
    }

    /// Process `tasks` across all backends and wait for every worker.
    ///
    /// Task failures are counted, never returned. Setting `shutdown` to `true`
    /// stops workers before their next dequeue; in-flight tasks finish.
    #[instrument(skip_all, fields(tasks = tasks.len(), backends = self.workers.len(), model = %self.settings.model))]
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        progress: Arc<dyn DispatchProgress>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchSummary> {
        if tasks.is_empty() {
            return Err(PromptBatchError::NoTasksFound);
        }
        if self.workers.is_empty() {
            return Err(PromptBatchError::config("no backends configured"));
        }

        let start = Instant::now();
        let total = tasks.len();
        progress.started(total);
        info!(total, "dispatch starting");

        let (tx, rx) = mpsc::unbounded_channel();
        let items = tasks
            .into_iter()
            .map(|t| QueueItem::Task(Box::new(t)))
            .chain(self.workers.iter().map(|_| QueueItem::Stop));
        for item in items {
            tx.send(item)
                .map_err(|_| PromptBatchError::validation("task queue closed before dispatch"))?;
        }
        drop(tx);

        let queue: SharedQueue = Arc::new(Mutex::new(rx));

        let handles: Vec<_> = self
            .workers
            .iter()
            .map(|worker| {
                let ctx = WorkerContext {
                    spec: worker.spec.clone(),
                    client: Arc::clone(&worker.client),
                    enricher: Arc::clone(&self.enricher),
                    store: Arc::clone(&self.store),
                    settings: self.settings.clone(),
                    queue: Arc::clone(&queue),
                    progress: Arc::clone(&progress),
                    shutdown: shutdown.clone(),
                };
                (worker.spec.clone(), tokio::spawn(ctx.run()))
            })
            .collect();

        let mut summary = DispatchSummary {
            total,
            processed: 0,
            skipped: 0,
            failed: 0,
            not_started: 0,
            elapsed: Duration::ZERO,
            per_backend: Vec::with_capacity(handles.len()),
        };

        for (spec, handle) in handles {
            let stats = handle.await.unwrap_or_else(|e| {
                error!(host = %spec.host, error = %e, "worker terminated abnormally");
                WorkerStats::default()
            });
            summary.processed += stats.processed;
            summary.skipped += stats.skipped;
            summary.failed += stats.failed;
            summary.per_backend.push((spec, stats));
        }

        summary.not_started = total - (summary.processed + summary.skipped + summary.failed);
        summary.elapsed = start.elapsed();

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            not_started = summary.not_started,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "dispatch complete"
        );
        progress.finished(&summary);

        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct WorkerContext {
    spec: BackendSpec,
    client: Arc<dyn Backend>,
    enricher: Arc<Enricher>,
    store: Arc<ResultStore>,
    settings: DispatchSettings,
    queue: SharedQueue,
    progress: Arc<dyn DispatchProgress>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerContext {
    async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();

        loop {
            let stop_requested = *self.shutdown.borrow();
            if stop_requested {
                warn!(host = %self.spec.host, "shutdown requested, worker stopping");
                break;
            }

            let item = self.queue.lock().await.recv().await;
            let task = match item {
                Some(QueueItem::Task(task)) => task,
                Some(QueueItem::Stop) | None => break,
            };

            let outcome = self.process(&task).await;
            stats.record(&outcome);
            self.progress.task_finished(&self.spec, &task, &outcome);
        }

        info!(
            host = %self.spec.host,
            compute_unit = self.spec.compute_unit,
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "worker finished"
        );
        stats
    }

    async fn process(&self, task: &Task) -> TaskOutcome {
        if !self.settings.force
            && !self
                .store
                .should_regenerate(task.id.as_deref(), task.source_modified)
        {
            info!(host = %self.spec.host, task = task.label(), "artifact is up to date, skipping");
            return TaskOutcome::Skipped;
        }

        match self.generate(task).await {
            Ok(done) => {
                info!(
                    host = %self.spec.host,
                    compute_unit = self.spec.compute_unit,
                    task = task.label(),
                    key = %done.key,
                    words = done.words,
                    duration_ms = done.duration.as_millis() as u64,
                    wps = done.words_per_second,
                    "task completed"
                );
                TaskOutcome::Completed(done)
            }
            Err(e) => {
                error!(
                    host = %self.spec.host,
                    compute_unit = self.spec.compute_unit,
                    task = task.label(),
                    error = %e,
                    "task failed"
                );
                TaskOutcome::Failed(e)
            }
        }
    }

    async fn generate(&self, task: &Task) -> Result<CompletedTask> {
        let enrichment = self.enricher.enrich(&task.content).await?;

        let invocation = invoke(
            self.client.as_ref(),
            &self.settings.model,
            &task.system_instruction,
            &enrichment.block,
            &enrichment.rewritten_prompt,
        )
        .await?;

        let duration = invocation.duration;
        let saved = self.store.save(GenerationRecord {
            id: task.id.clone(),
            prompt: task.content.clone(),
            assembled_prompt: enrichment.assembled_prompt(),
            generated_text: invocation.generated_text,
            started_at: invocation.started_at,
            duration,
            response_chars: invocation.response_chars,
            backend: self.spec.clone(),
            model: self.settings.model.clone(),
        })?;

        let (words, words_per_second) = saved
            .artifact
            .metrics
            .as_ref()
            .map(|m| (m.words, m.words_per_second))
            .unwrap_or_default();

        Ok(CompletedTask {
            key: saved.key,
            words,
            duration,
            words_per_second,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use promptbatch_backend::ChatMessage;
    use promptbatch_enricher::{BlockSettings, FetchMode, PageFetcher};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Scripted in-memory backend. Prompts containing `FAIL` get an error.
    struct ScriptedBackend {
        host: String,
        reply: String,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(host: &str, reply: &str) -> Arc<Self> {
            Self::with_delay(host, reply, Duration::ZERO)
        }

        fn with_delay(host: &str, reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                host: host.into(),
                reply: reply.into(),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn host(&self) -> &str {
            &self.host
        }

        async fn chat(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
            if prompt.contains("FAIL") {
                return Err(PromptBatchError::backend_error(&self.host, "scripted failure"));
            }
            Ok(self.reply.clone())
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pb-dispatch-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn task(id: Option<&str>, content: &str) -> Task {
        Task {
            id: id.map(String::from),
            content: content.into(),
            system_instruction: "Be helpful.".into(),
            source_modified: Utc::now() - TimeDelta::days(1),
            source: PathBuf::from("test.jsonl"),
        }
    }

    fn dispatcher(backends: &[Arc<ScriptedBackend>], out: &std::path::Path, force: bool) -> Dispatcher {
        let workers = backends
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let client: Arc<dyn Backend> = b.clone();
                BackendWorker::new(BackendSpec::new(b.host.clone(), i as u32), client)
            })
            .collect();
        let fetcher = PageFetcher::new(Duration::from_secs(5), FetchMode::Lenient).unwrap();
        Dispatcher::new(
            workers,
            Arc::new(Enricher::new(fetcher, BlockSettings::default())),
            Arc::new(ResultStore::new(out)),
            DispatchSettings {
                model: "test-model".into(),
                force,
            },
        )
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    async fn run(d: &Dispatcher, tasks: Vec<Task>) -> DispatchSummary {
        d.run(tasks, Arc::new(SilentDispatchProgress), no_shutdown())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn every_task_accounted_for_with_more_tasks_than_backends() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::with_delay("h1", "ok", Duration::from_millis(20));
        let h2 = ScriptedBackend::new("h2", "ok");
        let d = dispatcher(&[h1.clone(), h2.clone()], &tmp, false);

        let mut tasks: Vec<Task> = (0..6).map(|i| task(Some(&format!("t{i}")), "hello")).collect();
        tasks.push(task(Some("bad"), "please FAIL"));

        let summary = run(&d, tasks).await;
        assert_eq!(summary.total, 7);
        assert_eq!(summary.processed + summary.skipped + summary.failed, 7);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 6);
        assert_eq!(summary.not_started, 0);
        assert_eq!(h1.calls() + h2.calls(), 7);
        assert_eq!(summary.per_backend.len(), 2);
        let folded: usize = summary.per_backend.iter().map(|(_, s)| s.total()).sum();
        assert_eq!(folded, 7);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn fresh_artifact_is_skipped_without_contacting_backend() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::new("h1", "first");
        let d = dispatcher(&[h1.clone()], &tmp, false);

        run(&d, vec![task(Some("a"), "hello")]).await;
        assert_eq!(h1.calls(), 1);

        let summary = run(&d, vec![task(Some("a"), "hello")]).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(h1.calls(), 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn modified_source_and_force_regenerate() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::new("h1", "again");
        let d = dispatcher(&[h1.clone()], &tmp, false);
        run(&d, vec![task(Some("a"), "hello")]).await;

        let mut touched = task(Some("a"), "hello");
        touched.source_modified = Utc::now() + TimeDelta::seconds(5);
        let summary = run(&d, vec![touched]).await;
        assert_eq!(summary.processed, 1);

        let forced = dispatcher(&[h1.clone()], &tmp, true);
        let summary = run(&forced, vec![task(Some("a"), "hello")]).await;
        assert_eq!(summary.processed, 1);
        assert_eq!(h1.calls(), 3);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_worker() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::new("h1", "fine");
        let d = dispatcher(&[h1.clone()], &tmp, false);

        let tasks = vec![
            task(Some("x"), "FAIL first"),
            task(Some("y"), "second"),
            task(Some("z"), "third"),
        ];
        let summary = run(&d, tasks).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 2);
        assert!(!tmp.join("x.json").exists());
        assert!(tmp.join("z.json").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn unnamed_tasks_get_distinct_artifacts() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::new("h1", "same");
        let d = dispatcher(&[h1.clone()], &tmp, false);

        let summary = run(&d, vec![task(None, "one"), task(None, "two")]).await;
        assert_eq!(summary.processed, 2);

        let json_files = std::fs::read_dir(&tmp)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .count();
        assert_eq!(json_files, 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn linked_prompt_end_to_end() {
        let tmp = temp_dir();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Example content."))
            .mount(&server)
            .await;

        let url = server.uri();
        let h1 = ScriptedBackend::new("h1", "Hello world");
        let d = dispatcher(&[h1.clone()], &tmp, false);

        let summary = run(&d, vec![task(Some("a"), &format!("Summarize [x]({url})"))]).await;
        assert_eq!(summary.processed, 1);

        let artifact = ResultStore::new(&tmp).load("a").unwrap();
        assert_eq!(artifact.response, "Hello world");
        assert!(
            artifact
                .assembled_prompt
                .contains(&format!("Reference [1]: {url}\nExample content."))
        );
        assert!(artifact.assembled_prompt.ends_with("Summarize x[1]"));
        assert_eq!(artifact.backend, Some(BackendSpec::new("h1", 0)));
        assert_eq!(artifact.model, "test-model");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn shutdown_leaves_tasks_not_started() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::new("h1", "never");
        let d = dispatcher(&[h1.clone()], &tmp, false);

        let (tx, rx) = watch::channel(true);
        let summary = d
            .run(
                vec![task(Some("a"), "one"), task(Some("b"), "two")],
                Arc::new(SilentDispatchProgress),
                rx,
            )
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.not_started, 2);
        assert_eq!(summary.processed, 0);
        assert_eq!(h1.calls(), 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn shutdown_mid_run_finishes_the_in_flight_task() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::with_delay("h1", "done", Duration::from_millis(200));
        let d = dispatcher(&[h1.clone()], &tmp, false);

        let (tx, rx) = watch::channel(false);
        let tasks = vec![
            task(Some("a"), "one"),
            task(Some("b"), "two"),
            task(Some("c"), "three"),
        ];
        let interrupt = async {
            while h1.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _ = tx.send(true);
        };

        let (summary, ()) = tokio::join!(
            d.run(tasks, Arc::new(SilentDispatchProgress), rx),
            interrupt
        );
        let summary = summary.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.not_started, 2);
        assert_eq!(h1.calls(), 1);
        assert_eq!(ResultStore::new(&tmp).load("a").unwrap().response, "done");
        assert!(!tmp.join("b.json").exists());
        assert!(!tmp.join("c.json").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn empty_batch_and_empty_pool_are_rejected() {
        let tmp = temp_dir();
        let h1 = ScriptedBackend::new("h1", "x");

        let err = dispatcher(&[h1], &tmp, false)
            .run(Vec::new(), Arc::new(SilentDispatchProgress), no_shutdown())
            .await
            .unwrap_err();
        assert!(matches!(err, PromptBatchError::NoTasksFound));

        let err = dispatcher(&[], &tmp, false)
            .run(vec![task(None, "x")], Arc::new(SilentDispatchProgress), no_shutdown())
            .await
            .unwrap_err();
        assert!(matches!(err, PromptBatchError::Config { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
