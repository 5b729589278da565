use thiserror::Error;

/// Failures inside a relay operation.
///
/// Everything except `IngestionValidation` is recovered where it happens:
/// the failing attachment, embed, destination or send is logged and skipped.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to fetch attachment {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("failed to build embed #{index}: {message}")]
    EmbedBuild { index: usize, message: String },

    #[error("destination {destination} could not be resolved: {message}")]
    DestinationResolution { destination: u64, message: String },

    #[error("send to destination {destination} failed: {message}")]
    Send { destination: u64, message: String },

    #[error("invalid inbound event: {message}")]
    IngestionValidation { message: String },
}

impl RelayError {
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn embed_build(index: usize, message: impl std::fmt::Display) -> Self {
        Self::EmbedBuild {
            index,
            message: message.to_string(),
        }
    }

    pub fn destination(destination: u64, message: impl std::fmt::Display) -> Self {
        Self::DestinationResolution {
            destination,
            message: message.to_string(),
        }
    }

    pub fn send(destination: u64, message: impl std::fmt::Display) -> Self {
        Self::Send {
            destination,
            message: message.to_string(),
        }
    }

    pub fn invalid(message: impl std::fmt::Display) -> Self {
        Self::IngestionValidation {
            message: message.to_string(),
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
