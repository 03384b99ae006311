//! Domain error types.

/// Top-level error type for ruletrader.
#[derive(Debug, thiserror::Error)]
pub enum RuletraderError {
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("{metric} is undefined: {reason}")]
    ComputationUndefined { metric: String, reason: String },

    #[error("step {step} is not supported by this engine")]
    UnsupportedStep { step: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuletraderError {
    pub fn validation(reason: impl Into<String>) -> Self {
        RuletraderError::Validation {
            reason: reason.into(),
        }
    }

    pub fn undefined(metric: &str, reason: impl Into<String>) -> Self {
        RuletraderError::ComputationUndefined {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&RuletraderError> for std::process::ExitCode {
    fn from(err: &RuletraderError) -> Self {
        let code: u8 = match err {
            RuletraderError::Io(_) => 1,
            RuletraderError::ConfigParse { .. }
            | RuletraderError::ConfigMissing { .. }
            | RuletraderError::ConfigInvalid { .. } => 2,
            RuletraderError::Data { .. } => 3,
            RuletraderError::Validation { .. } | RuletraderError::Json(_) => 4,
            RuletraderError::ComputationUndefined { .. }
            | RuletraderError::UnsupportedStep { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
