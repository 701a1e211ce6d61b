use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("API_FAILURE: {0}")]
    Api(String),
    #[error("VALIDATION_FAILED: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("CREDENTIAL_UNAVAILABLE: {0}")]
    Credential(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Human-readable text without the error code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Api(message)
            | Self::Validation(message)
            | Self::NotFound(message)
            | Self::Credential(message)
            | Self::Config(message)
            | Self::Io(message)
            | Self::Internal(message) => message,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Api(format!("Failed to decode response: {}", value))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(value: url::ParseError) -> Self {
        Self::Config(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn message_strips_code_prefix() {
        let error = AppError::Api("Workspace not found".to_string());
        assert_eq!(error.to_string(), "API_FAILURE: Workspace not found");
        assert_eq!(error.message(), "Workspace not found");
    }

    #[test]
    fn json_errors_surface_as_api_failures() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").expect_err("invalid json");
        let error = AppError::from(parse);
        assert!(matches!(error, AppError::Api(_)));
        assert!(error.message().starts_with("Failed to decode response"));
    }
}
