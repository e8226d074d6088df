use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by [`crate::provider::WikipediaProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("HTTP {status} {reason} from {url}")]
    UpstreamHttp {
        status: u16,
        reason: String,
        url: String,
    },

    #[error("HTTP {status} from {url} did not carry a Location header")]
    MissingRedirectTarget { status: u16, url: String },

    #[error("endpoint `{0}` is not supported by this client")]
    UnsupportedEndpoint(&'static str),

    #[error("failed to call {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProviderError {
    pub(crate) fn upstream(status: StatusCode, url: &str) -> Self {
        Self::UpstreamHttp {
            status: status.as_u16(),
            reason: reason_phrase(status).to_string(),
            url: url.to_string(),
        }
    }

    /// HTTP status attached to the failure, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamHttp { status, .. } | Self::MissingRedirectTarget { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub(crate) fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown Status")
}
