use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::CanonicalError;
use crate::model::CandidateModel;

use super::ExecutionFn;

struct RaceState {
    lock: Mutex<()>,
    done: AtomicBool,
}

/// Runs candidates concurrently under a single mutex so exactly one
/// `ExecutionFn::call` ever drives the shared stream writer: every task
/// blocks on the mutex, and whichever acquires it first either streams to
/// completion (marking the race done) or, on a retryable failure, releases
/// it so the next-fastest candidate can try. Candidates that find the race
/// already `done` when they finally acquire the lock skip `call` entirely,
/// so no upstream connection opened after the winner ever reaches the
/// writer.
pub async fn run_streaming_race(
    candidates: &[CandidateModel],
    exec: Arc<dyn ExecutionFn>,
    req_id: &str,
) -> Result<CandidateModel, Vec<CanonicalError>> {
    if candidates.is_empty() {
        return Err(vec![CanonicalError::Internal("no candidates to execute".to_string())]);
    }
    if candidates.len() == 1 {
        let candidate = candidates[0].clone();
        return match exec.call(&candidate, req_id).await {
            Ok(()) => Ok(candidate),
            Err(err) => Err(vec![err.error]),
        };
    }

    let state = Arc::new(RaceState { lock: Mutex::new(()), done: AtomicBool::new(false) });
    let winner: Arc<Mutex<Option<CandidateModel>>> = Arc::new(Mutex::new(None));
    let mut handles = Vec::with_capacity(candidates.len());

    for candidate in candidates.iter().cloned() {
        let state = Arc::clone(&state);
        let exec = Arc::clone(&exec);
        let winner = Arc::clone(&winner);
        let req_id = req_id.to_string();
        handles.push(tokio::spawn(async move {
            let _guard = state.lock.lock().await;
            if state.done.load(Ordering::Acquire) {
                return Ok(());
            }
            match exec.call(&candidate, &req_id).await {
                Ok(()) => {
                    state.done.store(true, Ordering::Release);
                    *winner.lock().await = Some(candidate);
                    Ok(())
                }
                Err(err) => Err(err.error),
            }
        }));
    }

    let mut errors = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errors.push(err),
            Err(join_err) => errors.push(CanonicalError::Internal(format!("race candidate panicked: {join_err}"))),
        }
    }

    let resolved = winner.lock().await.take();
    match resolved {
        Some(candidate) => Ok(candidate),
        None => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSuccess(Arc<AtomicUsize>);
    #[async_trait::async_trait]
    impl ExecutionFn for CountingSuccess {
        async fn call(&self, _candidate: &CandidateModel, _req_id: &str) -> Result<(), super::super::ExecutionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AllFail;
    #[async_trait::async_trait]
    impl ExecutionFn for AllFail {
        async fn call(&self, _candidate: &CandidateModel, _req_id: &str) -> Result<(), super::super::ExecutionError> {
            Err(super::super::ExecutionError::retryable(CanonicalError::Transport("boom".to_string())))
        }
    }

    #[tokio::test]
    async fn only_one_candidate_ever_commits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec: Arc<dyn ExecutionFn> = Arc::new(CountingSuccess(Arc::clone(&calls)));
        let candidates = vec![CandidateModel::new("openai", "gpt-4o"), CandidateModel::new("anthropic", "claude-sonnet-4")];
        let winner = run_streaming_race(&candidates, exec, "req-1").await.expect("one should win");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(candidates.iter().any(|c| c.provider == winner.provider));
    }

    #[tokio::test]
    async fn all_failing_candidates_yield_all_errors() {
        let exec: Arc<dyn ExecutionFn> = Arc::new(AllFail);
        let candidates = vec![CandidateModel::new("openai", "gpt-4o"), CandidateModel::new("anthropic", "claude-sonnet-4")];
        let errs = run_streaming_race(&candidates, exec, "req-1").await.unwrap_err();
        assert_eq!(errs.len(), 2);
    }
}
