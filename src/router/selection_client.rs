use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::CanonicalError;
use crate::model::{CandidateModel, SelectionResult};
use crate::protocol::canonical::{CanonicalToolChoice, CanonicalToolSpec};

const JWT_EXPIRY_SECS: u64 = 300;
const JWT_SUBJECT: &str = "adaptive-proxy";

#[derive(Serialize)]
struct SelectionClaims<'a> {
    sub: &'a str,
    exp: u64,
}

#[derive(Serialize)]
struct SelectionRequestBody<'a> {
    prompt: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    models: &'a [CandidateModel],
    #[serde(rename = "costBias")]
    cost_bias: f32,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [CanonicalToolSpec],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call: Option<&'a CanonicalToolChoice>,
}

#[derive(Deserialize, Default)]
struct SelectionResponseBody {
    #[serde(default)]
    provider: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    alternatives: Vec<CandidateModel>,
}

/// Client for the remote model-selection service: signs a short-lived HS256
/// JWT and posts the routing request. Guarded by its own dedicated circuit
/// breaker at the call site (see [`super::MODEL_SELECTION_BREAKER_KEY`]).
#[derive(Clone)]
pub struct SelectionServiceClient {
    http: reqwest::Client,
    base_url: String,
    jwt_secret: String,
    timeout: std::time::Duration,
}

impl SelectionServiceClient {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: String, jwt_secret: String, timeout_ms: u64) -> Self {
        Self {
            http,
            base_url,
            jwt_secret,
            timeout: std::time::Duration::from_millis(timeout_ms),
        }
    }

    /// Clones the client with a different call timeout, sharing the
    /// underlying HTTP client and signing key.
    #[must_use]
    pub fn with_timeout_ms(&self, timeout_ms: u64) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            jwt_secret: self.jwt_secret.clone(),
            timeout: std::time::Duration::from_millis(timeout_ms),
        }
    }

    fn sign_token(&self) -> Result<String, CanonicalError> {
        let claims = SelectionClaims {
            sub: JWT_SUBJECT,
            exp: crate::util::unix_now_secs() + JWT_EXPIRY_SECS,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .map_err(|err| CanonicalError::Selection(format!("jwt signing failed: {err}")))
    }

    /// Calls the remote selection service. Returns `Err` on any transport,
    /// timeout, or invalid-response condition (`provider == "" || model ==
    /// ""`), letting the caller fall through to the filtered-candidate or
    /// hardcoded default per spec §4.4.
    pub async fn select(
        &self,
        prompt: &str,
        user_id: &str,
        models: &[CandidateModel],
        cost_bias: f32,
        tools: &[CanonicalToolSpec],
        tool_call: Option<&CanonicalToolChoice>,
    ) -> Result<SelectionResult, CanonicalError> {
        let token = self.sign_token()?;
        let body = SelectionRequestBody {
            prompt,
            user_id,
            models,
            cost_bias,
            tools,
            tool_call,
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.http
                .post(&self.base_url)
                .bearer_auth(token)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| CanonicalError::Selection("model selection service timed out".to_string()))?
        .map_err(|err| CanonicalError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(CanonicalError::Upstream { status, message: "model selection service error".to_string() });
        }

        let parsed: SelectionResponseBody = response
            .json()
            .await
            .map_err(|err| CanonicalError::Selection(format!("invalid selection response: {err}")))?;

        if parsed.provider.is_empty() || parsed.model.is_empty() {
            return Err(CanonicalError::Selection("selection response missing provider or model".to_string()));
        }

        Ok(SelectionResult {
            primary: CandidateModel::new(parsed.provider, parsed.model),
            alternatives: parsed.alternatives,
        })
    }
}
