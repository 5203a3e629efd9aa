use thiserror::Error;

/// Every way a chat request can fail. The pipeline resolves all failures into
/// one of these kinds; nothing escapes it as a raw transport error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Invalid API URL configuration")]
    InvalidUrlConfiguration,

    #[error("Failed to encode request data")]
    RequestEncoding,

    #[error("Invalid response from server")]
    InvalidServerResponse,

    #[error("Request failed with status code: {0}")]
    HttpError(u16),

    #[error("Failed to decode server response")]
    Decoding,

    #[error("No internet connection available. Please check your network and try again.")]
    NetworkUnavailable,

    #[error("Invalid OpenAI API key. Please check your configuration.")]
    InvalidCredential,

    #[error("Please enter a message or select an image")]
    EmptyInput,

    #[error("Too many requests. Please wait a moment and try again.")]
    RateLimited,

    #[error("Server error ({0}). Please try again later.")]
    ServerError(u16),

    #[error("Image is too large ({size} bytes, limit {limit}). Please select a smaller image.")]
    ImageTooLarge { size: usize, limit: usize },
}

impl ChatError {
    /// Human-readable text for the UI layer.
    pub fn description(&self) -> String {
        self.to_string()
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "Check your internet connection and try again",
            Self::InvalidCredential => "Update your OpenAI API key in the app settings",
            Self::RateLimited => "Wait a few minutes before sending another message",
            Self::ServerError(_) => "The issue is on OpenAI's end. Try again in a few minutes",
            Self::ImageTooLarge { .. } => "Try taking a new photo or selecting a smaller image",
            _ => "Try again or contact support if the problem persists",
        }
    }

    /// Whether the failure came from a local check or from the connection itself
    /// (including a connection lost before or during a retry), not from an HTTP status.
    pub fn is_local_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable
                | Self::InvalidCredential
                | Self::EmptyInput
                | Self::ImageTooLarge { .. }
                | Self::InvalidUrlConfiguration
                | Self::RequestEncoding
        )
    }
}

pub type ChatOutcome = std::result::Result<String, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_carry_status_codes() {
        assert_eq!(
            ChatError::HttpError(418).description(),
            "Request failed with status code: 418"
        );
        assert_eq!(
            ChatError::ServerError(503).description(),
            "Server error (503). Please try again later."
        );
    }

    #[test]
    fn test_recovery_suggestions() {
        assert_eq!(
            ChatError::RateLimited.recovery_suggestion(),
            "Wait a few minutes before sending another message"
        );
        assert_eq!(
            ChatError::Decoding.recovery_suggestion(),
            "Try again or contact support if the problem persists"
        );
    }

    #[test]
    fn test_local_failure_kinds() {
        assert!(ChatError::EmptyInput.is_local_failure());
        assert!(ChatError::NetworkUnavailable.is_local_failure());
        assert!(ChatError::ImageTooLarge { size: 2, limit: 1 }.is_local_failure());
        assert!(!ChatError::RateLimited.is_local_failure());
        assert!(!ChatError::ServerError(500).is_local_failure());
        assert!(!ChatError::InvalidServerResponse.is_local_failure());
        assert!(!ChatError::HttpError(404).is_local_failure());
    }
}
