//! Model resolution and retry.
//!
//! A turn walks a work-list of model identifiers: the preferred model, then the static
//! fallbacks, then whatever discovery turns up after a model-name or capability
//! mismatch. Calls are strictly sequential and each identifier is attempted at most once.
//! Quota exhaustion ends the turn, optionally after one short server-suggested wait.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::GenerationError;
use crate::llmclient::{ModelApi, ModelsResponse};
use crate::message::{extract_text, ChatMessage, GenerateContentRequest, GenerateContentResponse};

pub const GENERATE_METHOD: &str = "generateContent";

/// Longest server-suggested delay the engine is willing to wait out before reporting quota.
pub const MAX_QUOTA_WAIT: Duration = Duration::from_secs(5);

const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";
const TOO_MANY_REQUESTS: u16 = 429;

// Lowercase. Matched against the lowercased error body.
const MODEL_MISMATCH_PHRASES: [&str; 2] = [
    "is not found for api version",
    "is not supported for generatecontent",
];

/// Strips the `models/` prefix the provider uses for fully-qualified names.
pub fn normalize_model(id: &str) -> &str {
    let id = id.trim();
    id.strip_prefix("models/").unwrap_or(id)
}

/// Ordered models still to try, plus every model already tried.
#[derive(Debug, Default)]
pub struct ModelQueue {
    pending: VecDeque<String>,
    seen: HashSet<String>,
    tried: Vec<String>,
}

impl ModelQueue {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut queue = Self::default();
        queue.extend(models);
        queue
    }

    /// Appends models that have not been tried yet. Blank identifiers are ignored.
    pub fn extend<I, S>(&mut self, models: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for model in models {
            let model = normalize_model(model.as_ref());
            if !model.is_empty() && !self.seen.contains(model) {
                self.pending.push_back(model.to_string());
            }
        }
    }

    /// Pops the next untried model and marks it tried.
    pub fn next_untried(&mut self) -> Option<String> {
        while let Some(model) = self.pending.pop_front() {
            if self.seen.insert(model.clone()) {
                self.tried.push(model.clone());
                return Some(model);
            }
            debug!(%model, "Skipping already tried model");
        }
        None
    }

    pub fn tried(&self) -> &[String] {
        &self.tried
    }

    pub fn into_tried(self) -> Vec<String> {
        self.tried
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

/// Structured `{"error": {...}}` body returned on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetailItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorDetailItem {
    #[serde(rename = "@type", default)]
    pub type_url: Option<String>,
    #[serde(rename = "retryDelay", default)]
    pub retry_delay: Option<String>,
}

impl ErrorDetail {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error)
    }

    /// Server-suggested wait from a `RetryInfo` entry. Only whole seconds (`"12s"`) are accepted.
    pub fn retry_delay(&self) -> Option<Duration> {
        let delay = self
            .details
            .iter()
            .find(|item| item.type_url.as_deref() == Some(RETRY_INFO_TYPE))?
            .retry_delay
            .as_deref()?;
        let digits = delay.strip_suffix('s')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs: u64 = digits.parse().ok()?;
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    fn is_resource_exhausted(&self) -> bool {
        self.status.as_deref() == Some(RESOURCE_EXHAUSTED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The model name or its generation capability is not recognised; another model may work.
    ModelMismatch,
    Quota { retry_after: Option<Duration> },
    /// 2xx without usable text.
    Empty,
    Transport,
    Other,
}

/// Outcome of one failed model attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: Option<u16>,
    pub details: String,
    pub kind: FailureKind,
}

impl Failure {
    pub fn should_try_another_model(&self) -> bool {
        self.kind == FailureKind::ModelMismatch
    }
}

/// Classifies a non-2xx response. The body is parsed once.
pub fn classify_failure(status: u16, body: &str) -> Failure {
    let parsed = ErrorDetail::parse(body);

    let details = match &parsed {
        Some(ErrorDetail {
            message: Some(message),
            status: error_status,
            code,
            ..
        }) => {
            let label = error_status
                .clone()
                .unwrap_or_else(|| code.unwrap_or(status).to_string());
            format!("{label} {message}")
        }
        _ => body.to_string(),
    };

    let kind = if status == TOO_MANY_REQUESTS
        || parsed.as_ref().is_some_and(ErrorDetail::is_resource_exhausted)
    {
        FailureKind::Quota {
            retry_after: parsed.as_ref().and_then(ErrorDetail::retry_delay),
        }
    } else {
        let lowered = body.to_lowercase();
        if MODEL_MISMATCH_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            FailureKind::ModelMismatch
        } else {
            FailureKind::Other
        }
    };

    Failure {
        status: Some(status),
        details,
        kind,
    }
}

/// Outermost context plus the root cause, without the intermediate chain.
pub fn transport_details(err: &anyhow::Error) -> String {
    if err.chain().count() > 1 {
        format!("{err}: {}", err.root_cause())
    } else {
        err.to_string()
    }
}

/// Generated text and the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub model_used: String,
}

/// Lists every model advertising `generateContent`, normalised.
///
/// Discovery failures are logged and yield an empty list.
pub async fn list_generation_capable_models(api: &dyn ModelApi) -> Vec<String> {
    let reply = match api.list_models().await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(error = %transport_details(&err), "Model discovery failed");
            return Vec::new();
        }
    };
    if !reply.is_success() {
        warn!(status = reply.status, "Model discovery returned an error status");
        return Vec::new();
    }

    let listing: ModelsResponse = match serde_json::from_str(&reply.body) {
        Ok(listing) => listing,
        Err(err) => {
            warn!(error = %err, "Failed to parse model listing");
            return Vec::new();
        }
    };

    let models: Vec<String> = listing
        .models
        .iter()
        .filter(|model| {
            model
                .supported_generation_methods
                .iter()
                .any(|method| method == GENERATE_METHOD)
        })
        .map(|model| normalize_model(&model.name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    info!(count = models.len(), "Discovered generation-capable models");
    models
}

/// Runs one conversation turn against the provider.
pub async fn generate(
    api: &dyn ModelApi,
    config: &Config,
    history: &[ChatMessage],
    cancel: &CancellationToken,
) -> Result<Reply, GenerationError> {
    let request = GenerateContentRequest::new(history, &config.generation);
    let mut queue = ModelQueue::new(
        std::iter::once(&config.preferred_model).chain(config.fallback_models.iter()),
    );
    let mut last_failure: Option<(String, Failure)> = None;

    while let Some(model) = queue.next_untried() {
        info!(%model, attempt = queue.tried().len(), "Requesting generation");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            outcome = api.generate_content(&model, &request) => outcome,
        };

        let failure = match outcome {
            Ok(reply) if reply.is_success() => {
                let text = match serde_json::from_str::<GenerateContentResponse>(&reply.body) {
                    Ok(payload) => extract_text(&payload),
                    Err(err) => {
                        warn!(%model, error = %err, "Failed to parse generation response");
                        String::new()
                    }
                };
                if !text.is_empty() {
                    info!(%model, chars = text.len(), "Generation succeeded");
                    return Ok(Reply {
                        text,
                        model_used: model,
                    });
                }
                Failure {
                    status: Some(reply.status),
                    details: "empty response".to_string(),
                    kind: FailureKind::Empty,
                }
            }
            Ok(reply) => classify_failure(reply.status, &reply.body),
            Err(err) => Failure {
                status: None,
                details: transport_details(&err),
                kind: FailureKind::Transport,
            },
        };

        warn!(
            %model,
            status = ?failure.status,
            kind = ?failure.kind,
            details = %failure.details,
            "Generation attempt failed"
        );

        if let FailureKind::Quota { retry_after } = failure.kind {
            if let Some(delay) = retry_after.filter(|delay| *delay <= MAX_QUOTA_WAIT) {
                info!(%model, delay_secs = delay.as_secs(), "Waiting out quota delay");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            // Reported even after waiting; the caller decides whether to resend.
            return Err(GenerationError::Quota { retry_after });
        }

        if failure.should_try_another_model() {
            let discovered = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                models = list_generation_capable_models(api) => models,
            };
            queue.extend(discovered);
        }

        last_failure = Some((model, failure));
    }

    let tried = queue.into_tried();
    Err(match last_failure {
        Some((model, Failure { kind: FailureKind::Empty, .. })) => {
            GenerationError::EmptyResponse { model, tried }
        }
        Some((_, failure)) => GenerationError::Exhausted {
            status: failure.status,
            details: failure.details,
            tried,
        },
        None => GenerationError::Exhausted {
            status: None,
            details: "no models configured".to_string(),
            tried,
        },
    })
}

/// Stateless entry point for the chat window: configuration plus a provider handle.
#[derive(Clone)]
pub struct Engine {
    api: Arc<dyn ModelApi>,
    config: Config,
}

impl Engine {
    pub fn new(api: Arc<dyn ModelApi>, config: Config) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Generates the assistant reply for `history`. The caller owns the history.
    pub async fn send_message(
        &self,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<Reply, GenerationError> {
        generate(self.api.as_ref(), &self.config, history, cancel).await
    }

    pub async fn discover_models(&self) -> Vec<String> {
        list_generation_capable_models(self.api.as_ref()).await
    }
}
