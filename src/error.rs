use std::time::Duration;

use thiserror::Error;

pub const RATE_LIMITS_URL: &str = "https://ai.google.dev/gemini-api/docs/rate-limits";

/// Failure of a whole conversation turn. `Display` is shown to the user as is.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(
        "Gemini quota is exhausted for the current API key.{} Check billing and limits: {}",
        retry_hint(.retry_after),
        RATE_LIMITS_URL
    )]
    Quota { retry_after: Option<Duration> },

    #[error("Gemini returned an empty response (model {model}, tried: {})", .tried.join(", "))]
    EmptyResponse { model: String, tried: Vec<String> },

    #[error(
        "Gemini request failed: {} {details} (tried: {})",
        .status.map(|s| s.to_string()).unwrap_or_else(|| "no response".to_string()),
        .tried.join(", ")
    )]
    Exhausted {
        status: Option<u16>,
        details: String,
        tried: Vec<String>,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Every model identifier attempted during the turn, when known.
    pub fn tried(&self) -> &[String] {
        match self {
            Self::EmptyResponse { tried, .. } | Self::Exhausted { tried, .. } => tried,
            Self::Quota { .. } | Self::Cancelled => &[],
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) if !delay.is_zero() => {
            // whole seconds, rounded up
            let secs = delay.as_millis().div_ceil(1000);
            format!(" Try again in {secs} s.")
        }
        _ => String::new(),
    }
}
