use thiserror::Error;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Failures surfaced by the analytics engine.
///
/// Zero-sample and zero-conversion inputs are not errors: every query defines
/// a neutral result for them instead.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Event data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AnalyticsError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }

    /// Whether the caller supplied bad input, as opposed to a store failure.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, Self::InvalidParameter(_))
    }
}

impl From<config::ConfigError> for AnalyticsError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
