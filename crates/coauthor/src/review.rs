//! Chunked review runs: split, fan out, retry, synthesize.
//!
//! A review job walks `Pending → Running → {Completed | Cancelled |
//! Failed}`. Inputs at or below the single-call ceiling run as one
//! generation call with no worker pool and no synthesis. Larger inputs
//! are chunked at the review profile and processed by a bounded pool of
//! workers that pull chunk indices off a shared counter, so no more than
//! `concurrency` calls are ever in flight.
//!
//! Each call gets a timeout; timeouts and upstream failures retry with a
//! linearly growing backoff up to `max_attempts`. A chunk that exhausts
//! its retries fails the job (fail-fast — siblings stop pulling new
//! work). Cancellation is cooperative: no new chunk is scheduled after
//! the request, in-flight calls finish and their results are discarded,
//! and the job reports `Cancelled`, which callers treat as a silent stop
//! rather than an error.
//!
//! Workers race, but synthesis always sees the partial reports in their
//! original chunk order.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use coauthor_core::chunk::chunk_text;
use coauthor_core::clients::{GenerationClient, GenerationParams};
use coauthor_core::models::ReviewKind;
use coauthor_core::prompt::{review_chunk_prompt, synthesis_prompt};

use crate::config::{ChunkProfile, ReviewConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

struct JobInner {
    kind: ReviewKind,
    status: Mutex<JobStatus>,
    total: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicBool,
    failed: AtomicBool,
    error: Mutex<Option<String>>,
    result: Mutex<Option<String>>,
}

/// Shared handle to one review run. Clone freely; progress and
/// cancellation work from any clone while the run drives to completion.
#[derive(Clone)]
pub struct ReviewJob {
    inner: Arc<JobInner>,
}

impl ReviewJob {
    pub fn new(kind: ReviewKind) -> Self {
        Self {
            inner: Arc::new(JobInner {
                kind,
                status: Mutex::new(JobStatus::Pending),
                total: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                error: Mutex::new(None),
                result: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> ReviewKind {
        self.inner.kind
    }

    pub fn status(&self) -> JobStatus {
        *self.inner.status.lock().unwrap()
    }

    /// `(completed, total)` — observable at any point while running.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.inner.completed.load(Ordering::SeqCst),
            self.inner.total.load(Ordering::SeqCst),
        )
    }

    /// Request cancellation. No new chunk calls are scheduled; in-flight
    /// calls finish and are discarded.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn result(&self) -> Option<String> {
        self.inner.result.lock().unwrap().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.error.lock().unwrap().clone()
    }

    fn set_status(&self, status: JobStatus) {
        *self.inner.status.lock().unwrap() = status;
    }

    fn finish(&self, status: JobStatus, result: Option<String>, error: Option<String>) {
        *self.inner.result.lock().unwrap() = result;
        *self.inner.error.lock().unwrap() = error;
        self.set_status(status);
    }
}

/// Drive a review job to a terminal state and return it.
///
/// `rules_preamble` is pre-rendered by the caller (general reviews carry
/// it, proofreading does not use it).
pub async fn run_review(
    job: &ReviewJob,
    generator: Arc<dyn GenerationClient>,
    config: &ReviewConfig,
    profile: &ChunkProfile,
    rules_preamble: &str,
    text: &str,
    temperature: f32,
) -> JobStatus {
    job.set_status(JobStatus::Running);
    let params = GenerationParams { temperature };
    let kind = job.kind();

    // Small inputs: one call, no pool, no synthesis.
    if text.len() <= config.single_call_ceiling {
        job.inner.total.store(1, Ordering::SeqCst);
        let prompt = review_chunk_prompt(kind, rules_preamble, text);
        match call_with_retry(generator.as_ref(), &prompt, &params, config, &job.inner.cancelled)
            .await
        {
            Ok(part) => {
                job.inner.completed.store(1, Ordering::SeqCst);
                job.finish(JobStatus::Completed, Some(part), None);
            }
            Err(e) => {
                if job.inner.cancelled.load(Ordering::SeqCst) {
                    job.finish(JobStatus::Cancelled, None, None);
                } else {
                    job.finish(JobStatus::Failed, None, Some(e.to_string()));
                }
            }
        }
        return job.status();
    }

    let chunks = chunk_text(text, profile.window, profile.overlap);
    let total = chunks.len();
    job.inner.total.store(total, Ordering::SeqCst);
    info!(total, kind = kind.as_str(), "starting chunked review");

    let prompts: Arc<Vec<String>> = Arc::new(
        chunks
            .iter()
            .map(|c| review_chunk_prompt(kind, rules_preamble, &c.content))
            .collect(),
    );
    let results: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(vec![None; total]));
    let next: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

    let worker_count = config.concurrency.min(total);
    let mut handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let generator = generator.clone();
        let config = config.clone();
        let params = params.clone();
        let prompts = prompts.clone();
        let results = results.clone();
        let next = next.clone();
        let inner = job.inner.clone();

        handles.push(tokio::spawn(async move {
            loop {
                if inner.cancelled.load(Ordering::SeqCst) || inner.failed.load(Ordering::SeqCst) {
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                if i >= prompts.len() {
                    break;
                }

                match call_with_retry(
                    generator.as_ref(),
                    &prompts[i],
                    &params,
                    &config,
                    &inner.cancelled,
                )
                .await
                {
                    Ok(part) => {
                        results.lock().unwrap()[i] = Some(part);
                        inner.completed.fetch_add(1, Ordering::SeqCst);
                        debug!(chunk = i, "review chunk done");
                    }
                    Err(e) => {
                        if !inner.cancelled.load(Ordering::SeqCst) {
                            warn!(chunk = i, error = %e, "review chunk failed, aborting job");
                            *inner.error.lock().unwrap() = Some(format!("chunk {}: {e}", i + 1));
                            inner.failed.store(true, Ordering::SeqCst);
                        }
                        break;
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    if job.inner.cancelled.load(Ordering::SeqCst) {
        // Partial results are discarded; cancellation is not a failure.
        job.finish(JobStatus::Cancelled, None, None);
        return job.status();
    }
    if job.inner.failed.load(Ordering::SeqCst) {
        let error = job.inner.error.lock().unwrap().clone();
        job.finish(JobStatus::Failed, None, error);
        return job.status();
    }

    let parts: Vec<String> = {
        let locked = results.lock().unwrap();
        locked.iter().flatten().cloned().collect()
    };
    if parts.len() != total {
        job.finish(
            JobStatus::Failed,
            None,
            Some("internal: missing chunk results".to_string()),
        );
        return job.status();
    }

    // A single part needs no synthesis call.
    let final_result = if parts.len() == 1 {
        Ok(parts.into_iter().next().unwrap())
    } else {
        let prompt = synthesis_prompt(kind, &parts);
        call_with_retry(generator.as_ref(), &prompt, &params, config, &job.inner.cancelled).await
    };

    match final_result {
        Ok(result) => job.finish(JobStatus::Completed, Some(result), None),
        Err(e) => {
            if job.inner.cancelled.load(Ordering::SeqCst) {
                job.finish(JobStatus::Cancelled, None, None);
            } else {
                job.finish(JobStatus::Failed, None, Some(e.to_string()));
            }
        }
    }
    job.status()
}

/// One generation call with timeout, retried with linear backoff.
/// Stops retrying as soon as cancellation is requested.
async fn call_with_retry(
    generator: &dyn GenerationClient,
    prompt: &str,
    params: &GenerationParams,
    config: &ReviewConfig,
    cancelled: &AtomicBool,
) -> Result<String> {
    let timeout = Duration::from_millis(config.call_timeout_ms);
    let mut last_err = None;

    for attempt in 1..=config.max_attempts {
        if cancelled.load(Ordering::SeqCst) {
            return Err(last_err.unwrap_or_else(|| anyhow!("cancelled")));
        }
        if attempt > 1 {
            let backoff = Duration::from_millis(config.backoff_base_ms * (attempt as u64 - 1));
            tokio::time::sleep(backoff).await;
            if cancelled.load(Ordering::SeqCst) {
                return Err(last_err.unwrap_or_else(|| anyhow!("cancelled")));
            }
        }

        match tokio::time::timeout(timeout, generator.generate(prompt, params)).await {
            Ok(Ok(output)) => return output.into_text(),
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => {
                last_err = Some(anyhow!(
                    "generation call timed out after {}ms",
                    config.call_timeout_ms
                ))
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("generation failed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coauthor_core::clients::ModelOutput;

    #[derive(Default)]
    struct StubState {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_first: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    struct StubGenerator {
        state: Arc<StubState>,
        delay: Duration,
    }

    impl StubGenerator {
        fn new(delay_ms: u64) -> Self {
            Self {
                state: Arc::new(StubState::default()),
                delay: Duration::from_millis(delay_ms),
            }
        }

        fn failing_first(delay_ms: u64, failures: usize) -> Self {
            let s = Self::new(delay_ms);
            s.state.fail_first.store(failures, Ordering::SeqCst);
            s
        }

        fn synthesis_calls(&self) -> usize {
            self.state
                .prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.contains("ממצאים חלקיים"))
                .count()
        }
    }

    #[async_trait]
    impl GenerationClient for StubGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> anyhow::Result<ModelOutput> {
            let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.state.calls.fetch_add(1, Ordering::SeqCst);
            self.state.prompts.lock().unwrap().push(prompt.to_string());

            tokio::time::sleep(self.delay).await;
            self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

            let remaining = self.state.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.state.fail_first.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("transient upstream failure");
            }

            Ok(ModelOutput::Text(format!("part: {prompt}")))
        }
    }

    fn fast_config(concurrency: usize) -> ReviewConfig {
        ReviewConfig {
            single_call_ceiling: 100,
            concurrency,
            call_timeout_ms: 5_000,
            max_attempts: 3,
            backoff_base_ms: 5,
        }
    }

    fn profile() -> ChunkProfile {
        ChunkProfile {
            window: 100,
            overlap: 10,
        }
    }

    #[tokio::test]
    async fn test_small_input_single_call_no_synthesis() {
        let stub = Arc::new(StubGenerator::new(1));
        let job = ReviewJob::new(ReviewKind::General);

        let status = run_review(
            &job,
            stub.clone(),
            &fast_config(4),
            &profile(),
            "",
            "short text under ceiling",
            0.4,
        )
        .await;

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(stub.state.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.synthesis_calls(), 0);
        assert_eq!(job.progress(), (1, 1));
        assert!(job.result().is_some());
    }

    #[tokio::test]
    async fn test_large_input_fans_out_and_synthesizes() {
        let stub = Arc::new(StubGenerator::new(5));
        let job = ReviewJob::new(ReviewKind::General);
        let text = "א".repeat(500); // 1000 bytes → several 100-byte chunks

        let status = run_review(&job, stub.clone(), &fast_config(3), &profile(), "", &text, 0.4).await;

        assert_eq!(status, JobStatus::Completed);
        let (done, total) = job.progress();
        assert!(total > 1);
        assert_eq!(done, total);
        assert_eq!(stub.synthesis_calls(), 1);
        assert_eq!(stub.state.calls.load(Ordering::SeqCst), total + 1);
        assert!(stub.state.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_synthesis_preserves_chunk_order() {
        let stub = Arc::new(StubGenerator::new(1));
        let job = ReviewJob::new(ReviewKind::General);
        // Three distinguishable chunks.
        let mut text = String::new();
        text.push_str(&"A".repeat(100));
        text.push_str(&"B".repeat(100));
        text.push_str(&"C".repeat(85));

        let config = ReviewConfig {
            single_call_ceiling: 100,
            concurrency: 3,
            call_timeout_ms: 5_000,
            max_attempts: 1,
            backoff_base_ms: 1,
        };
        let profile = ChunkProfile {
            window: 100,
            overlap: 0,
        };

        run_review(&job, stub.clone(), &config, &profile, "", &text, 0.4).await;

        let prompts = stub.state.prompts.lock().unwrap().clone();
        let synthesis = prompts.iter().find(|p| p.contains("ממצאים חלקיים")).unwrap();
        let a = synthesis.find("AAAA").unwrap();
        let b = synthesis.find("BBBB").unwrap();
        let c = synthesis.find("CCCC").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let stub = Arc::new(StubGenerator::failing_first(1, 2));
        let job = ReviewJob::new(ReviewKind::Proofread);

        let status = run_review(
            &job,
            stub.clone(),
            &fast_config(4),
            &profile(),
            "",
            "small input",
            0.4,
        )
        .await;

        assert_eq!(status, JobStatus::Completed);
        // Two failures, then the successful third attempt.
        assert_eq!(stub.state.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_job() {
        let stub = Arc::new(StubGenerator::failing_first(1, 100));
        let job = ReviewJob::new(ReviewKind::General);

        let status = run_review(
            &job,
            stub.clone(),
            &fast_config(4),
            &profile(),
            "",
            "small input",
            0.4,
        )
        .await;

        assert_eq!(status, JobStatus::Failed);
        assert_eq!(stub.state.calls.load(Ordering::SeqCst), 3);
        assert!(job.error().is_some());
        assert!(job.result().is_none());
    }

    #[tokio::test]
    async fn test_timeout_triggers_retry() {
        let stub = Arc::new(StubGenerator::new(100));
        let job = ReviewJob::new(ReviewKind::General);
        let config = ReviewConfig {
            single_call_ceiling: 100,
            concurrency: 1,
            call_timeout_ms: 10,
            max_attempts: 2,
            backoff_base_ms: 1,
        };

        let status =
            run_review(&job, stub.clone(), &config, &profile(), "", "small input", 0.4).await;

        assert_eq!(status, JobStatus::Failed);
        assert_eq!(stub.state.calls.load(Ordering::SeqCst), 2);
        assert!(job.error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_mid_run() {
        let stub = Arc::new(StubGenerator::new(30));
        let job = ReviewJob::new(ReviewKind::General);
        let text = "ב".repeat(500); // several chunks
        let config = fast_config(2);

        let runner_job = job.clone();
        let runner_stub = stub.clone();
        let prof = profile();
        let handle = tokio::spawn(async move {
            run_review(&runner_job, runner_stub, &config, &prof, "", &text, 0.4).await
        });

        // Wait for some progress, then cancel.
        loop {
            let (done, total) = job.progress();
            if total > 0 && done >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        job.cancel();

        let status = handle.await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(job.status(), JobStatus::Cancelled);
        // No synthesis, result discarded, bounded concurrency held.
        assert_eq!(stub.synthesis_calls(), 0);
        assert!(job.result().is_none());
        assert!(job.error().is_none());
        assert!(stub.state.max_in_flight.load(Ordering::SeqCst) <= 2);
        // Cancellation stopped scheduling before all chunks ran.
        let (done, total) = job.progress();
        assert!(done < total);
    }

    #[tokio::test]
    async fn test_progress_observable_while_running() {
        let stub = Arc::new(StubGenerator::new(20));
        let job = ReviewJob::new(ReviewKind::General);
        let text = "ג".repeat(400);

        let runner_job = job.clone();
        let config = fast_config(2);
        let prof = profile();
        let handle = tokio::spawn(async move {
            run_review(&runner_job, stub, &config, &prof, "", &text, 0.4).await
        });

        let mut saw_partial = false;
        for _ in 0..200 {
            let (done, total) = job.progress();
            if job.status() == JobStatus::Running && total > 0 && done > 0 && done < total {
                saw_partial = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        handle.await.unwrap();
        assert!(saw_partial, "never observed partial progress");
    }
}
