pub mod race;

use crate::config::FallbackConfig;
use crate::error::CanonicalError;
use crate::model::CandidateModel;

pub use race::run_streaming_race;

/// A classified execution error: the underlying error plus whether it is
/// eligible for sequential-fallback advance (provider-retryable) versus a
/// short-circuiting validation/auth failure.
#[derive(Debug)]
pub struct ExecutionError {
    pub error: CanonicalError,
    pub retryable: bool,
}

impl ExecutionError {
    #[must_use]
    pub fn retryable(error: CanonicalError) -> Self {
        Self { error, retryable: true }
    }

    #[must_use]
    pub fn non_retryable(error: CanonicalError) -> Self {
        Self { error, retryable: false }
    }
}

/// Runs a single candidate attempt. Implementations perform the CB
/// pre-check, upstream call, and response handling; `reqId` ties log lines
/// to the inbound request.
#[async_trait::async_trait]
pub trait ExecutionFn: Send + Sync {
    async fn call(&self, candidate: &CandidateModel, req_id: &str) -> Result<(), ExecutionError>;
}

/// Execution mode, mirroring `FallbackConfig.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    Single,
    Sequential,
    Race,
}

impl FallbackMode {
    #[must_use]
    pub fn from_config(mode: &str) -> Self {
        match mode {
            "sequential" => FallbackMode::Sequential,
            "race" => FallbackMode::Race,
            _ => FallbackMode::Single,
        }
    }
}

/// Runs an ordered `[primary, ...alternatives]` list against `exec` until
/// one succeeds or all fail, per the configured mode.
#[derive(Clone, Copy)]
pub struct FallbackExecutor {
    mode: FallbackMode,
    #[allow(dead_code)]
    timeout_ms: u64,
    #[allow(dead_code)]
    max_retries: u32,
}

impl FallbackExecutor {
    #[must_use]
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            mode: FallbackMode::from_config(&config.mode),
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
        }
    }

    /// Unary (non-streaming) execution. For streaming race mode, use
    /// [`race::run_streaming_race`] instead — it must hold the writer mutex
    /// across `ExecutionFn::call`, which this path does not model.
    pub async fn run(
        &self,
        candidates: &[CandidateModel],
        exec: &dyn ExecutionFn,
        req_id: &str,
    ) -> Result<CandidateModel, Vec<CanonicalError>> {
        if candidates.is_empty() {
            return Err(vec![CanonicalError::Internal("no candidates to execute".to_string())]);
        }

        match self.mode {
            FallbackMode::Single => self.run_single(candidates, exec, req_id).await,
            FallbackMode::Sequential => self.run_sequential(candidates, exec, req_id).await,
            FallbackMode::Race => self.run_race(candidates, exec, req_id).await,
        }
    }

    async fn run_single(
        &self,
        candidates: &[CandidateModel],
        exec: &dyn ExecutionFn,
        req_id: &str,
    ) -> Result<CandidateModel, Vec<CanonicalError>> {
        let candidate = &candidates[0];
        match exec.call(candidate, req_id).await {
            Ok(()) => Ok(candidate.clone()),
            Err(err) => Err(vec![err.error]),
        }
    }

    async fn run_sequential(
        &self,
        candidates: &[CandidateModel],
        exec: &dyn ExecutionFn,
        req_id: &str,
    ) -> Result<CandidateModel, Vec<CanonicalError>> {
        if candidates.len() == 1 {
            return self.run_single(candidates, exec, req_id).await;
        }

        let mut errors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match exec.call(candidate, req_id).await {
                Ok(()) => return Ok(candidate.clone()),
                Err(err) => {
                    let retryable = err.retryable;
                    errors.push(err.error);
                    if !retryable {
                        return Err(errors);
                    }
                }
            }
        }
        Err(errors)
    }

    /// Non-streaming race: candidates run concurrently, responses are
    /// buffered so no single-writer constraint applies (unlike the
    /// streaming race in [`race::run_streaming_race`]); first success wins.
    async fn run_race(
        &self,
        candidates: &[CandidateModel],
        exec: &dyn ExecutionFn,
        req_id: &str,
    ) -> Result<CandidateModel, Vec<CanonicalError>> {
        if candidates.len() == 1 {
            return self.run_single(candidates, exec, req_id).await;
        }

        let timeout = tokio::time::Duration::from_millis(self.timeout_ms);
        let mut futures = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            futures.push(race_attempt(exec, candidate, req_id));
        }

        let mut errors = Vec::with_capacity(candidates.len());
        match tokio::time::timeout(timeout, select_first_ok(futures)).await {
            Ok(Ok(winner)) => Ok(winner),
            Ok(Err(errs)) => {
                errors.extend(errs);
                Err(errors)
            }
            Err(_) => {
                errors.push(CanonicalError::Transport("race timed out".to_string()));
                Err(errors)
            }
        }
    }
}

async fn race_attempt<'a>(exec: &'a dyn ExecutionFn, candidate: &'a CandidateModel, req_id: &'a str) -> Result<CandidateModel, CanonicalError> {
    exec.call(candidate, req_id).await.map(|()| candidate.clone()).map_err(|err| err.error)
}

/// Runs futures concurrently, returning the first `Ok`, or all errors if
/// every future fails. Panics inside a future are not possible here since
/// these are plain async blocks, not spawned tasks (spawned-task panic
/// recovery is handled in [`race::run_streaming_race`]).
async fn select_first_ok<F, T>(futures: Vec<F>) -> Result<T, Vec<CanonicalError>>
where
    F: std::future::Future<Output = Result<T, CanonicalError>>,
{
    use futures_util::stream::FuturesUnordered;
    use futures_util::StreamExt;

    let mut pending: FuturesUnordered<F> = futures.into_iter().collect();
    let mut errors = Vec::new();
    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(err) => errors.push(err),
        }
    }
    Err(errors)
}
