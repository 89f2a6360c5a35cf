use thiserror::Error;

/// Failures that stop a cloud call chain.
///
/// Transport problems on ordinary requests are not in here: they come back as
/// [`super::client::ApiReply::Transport`] so a single hiccup doesn't abort the caller.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("Tuya token error: {0}")]
    Auth(String),

    #[error("Tuya token request failed: {0}")]
    Transport(String),

    #[error("invalid signing key: {0}")]
    Signing(String),

    #[error("invalid header value for {name}: {source}")]
    InvalidHeader {
        name: &'static str,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },

    #[error("failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
