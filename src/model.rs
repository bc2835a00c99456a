//! Types shared between the semantic cache, the model router, and the
//! fallback executor — kept out of `protocol` because they describe routing
//! decisions, not wire formats.

use std::sync::Arc;

/// An upstream endpoint + model name pair. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CandidateModel {
    pub provider: Arc<str>,
    pub model: Arc<str>,
}

impl CandidateModel {
    #[must_use]
    pub fn new(provider: impl Into<Arc<str>>, model: impl Into<Arc<str>>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Output of the model router: a primary candidate plus ordered fallbacks.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SelectionResult {
    pub primary: CandidateModel,
    pub alternatives: Vec<CandidateModel>,
}

impl SelectionResult {
    #[must_use]
    pub fn single(candidate: CandidateModel) -> Self {
        Self {
            primary: candidate,
            alternatives: Vec::new(),
        }
    }

    /// `[primary] ++ alternatives` as one ordered list, for iteration by the
    /// fallback executor.
    #[must_use]
    pub fn all_candidates(&self) -> Vec<CandidateModel> {
        let mut all = Vec::with_capacity(1 + self.alternatives.len());
        all.push(self.primary.clone());
        all.extend(self.alternatives.iter().cloned());
        all
    }
}

/// The value stored by the semantic cache: a previous model-selection
/// decision for a given prompt.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedDecision {
    pub primary: CandidateModel,
    pub alternatives: Vec<CandidateModel>,
}

impl From<&SelectionResult> for CachedDecision {
    fn from(result: &SelectionResult) -> Self {
        Self {
            primary: result.primary.clone(),
            alternatives: result.alternatives.clone(),
        }
    }
}

impl From<CachedDecision> for SelectionResult {
    fn from(decision: CachedDecision) -> Self {
        Self {
            primary: decision.primary,
            alternatives: decision.alternatives,
        }
    }
}

/// Where a model-router decision came from, surfaced for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    SemanticExact,
    SemanticSimilar,
    Miss,
}

impl CacheSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CacheSource::SemanticExact => "semantic_exact",
            CacheSource::SemanticSimilar => "semantic_similar",
            CacheSource::Miss => "",
        }
    }
}
