//! Shared helpers for queue integration tests: a scripted in-process fetcher
//! and queue configuration with short backoff delays.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ytdl_queue::{
    CancelToken, FetchError, FetchErrorKind, FetchOutput, FetchRequest, Fetcher,
    ProgressReporter, QueueConfig, QueueManager, QueueSnapshot, RetryPolicy,
};

/// Upper bound for any wait in a test; a hang fails instead of stalling CI.
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);

/// What one fetch call does.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Succeed,
    Fail(FetchErrorKind),
    /// Blocks until the cancel token fires, then reports cancellation.
    Hang,
    /// Reports this percentage, then behaves like [`Step::Hang`].
    Report(f32),
}

/// Fetcher whose per-URL outcomes are scripted in advance. URLs without a
/// script (or whose script ran out) succeed, titled `Title <last url segment>`.
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    honor_cancel: bool,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(10),
            honor_cancel: true,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// How long a non-hanging step takes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keeps running through cancellation, like a fetcher that never checks
    /// its token.
    pub fn ignoring_cancel(mut self) -> Self {
        self.honor_cancel = false;
        self
    }

    pub fn script(self, url: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into_iter().collect());
        self
    }

    /// Every URL fetched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    /// Highest number of fetches that ran at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Succeed)
    }

    async fn wait(&self, cancel: &CancelToken) -> Result<(), FetchError> {
        if !self.honor_cancel {
            tokio::time::sleep(self.delay).await;
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(()),
            () = cancel.cancelled() => Err(FetchError::cancelled()),
        }
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancelToken,
        progress: ProgressReporter,
    ) -> Result<FetchOutput, FetchError> {
        self.calls.lock().unwrap().push(request.url.clone());
        let step = self.next_step(&request.url);

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        match step {
            Step::Hang => {
                cancel.cancelled().await;
                Err(FetchError::cancelled())
            }
            Step::Report(percent) => {
                progress.report(percent);
                cancel.cancelled().await;
                Err(FetchError::cancelled())
            }
            Step::Fail(kind) => {
                self.wait(&cancel).await?;
                Err(FetchError::new(kind, format!("scripted {}", kind.as_str())))
            }
            Step::Succeed => {
                self.wait(&cancel).await?;
                progress.report(100.0);
                let name = request.url.rsplit('/').next().unwrap_or("video");
                Ok(FetchOutput::new(request.destination.join(format!("{name}.mp4")))
                    .with_title(format!("Title {name}")))
            }
        }
    }
}

/// Queue configuration with millisecond backoff and no jitter.
pub fn fast_config(dir: &Path) -> QueueConfig {
    QueueConfig::new(dir.join("archive.txt")).with_retry_policy(fast_retry(3))
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(40),
        2.0,
    )
    .with_jitter(false)
}

/// Waits for the queue to go idle, failing the test after [`TEST_DEADLINE`].
pub async fn wait_idle(queue: &QueueManager) {
    tokio::time::timeout(TEST_DEADLINE, queue.wait_until_idle())
        .await
        .expect("queue did not go idle in time");
}

/// Waits until `predicate` holds for a published snapshot.
pub async fn wait_for(queue: &QueueManager, predicate: impl FnMut(&QueueSnapshot) -> bool) {
    let mut rx = queue.subscribe();
    tokio::time::timeout(TEST_DEADLINE, rx.wait_for(predicate))
        .await
        .expect("condition not reached in time")
        .expect("queue dropped");
}
