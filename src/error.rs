//! Error types for Referat.

use crate::stage::StageId;
use thiserror::Error;

/// Which side of a stage contract rejected the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractSide {
    /// Stage input, validated before any LLM call.
    Input,
    /// Primary-path output, parsed from the LLM response.
    Output,
    /// Output produced by the deterministic fallback path.
    Fallback,
}

impl std::fmt::Display for ContractSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractSide::Input => write!(f, "input"),
            ContractSide::Output => write!(f, "output"),
            ContractSide::Fallback => write!(f, "fallback output"),
        }
    }
}

/// Library-level error type for Referat operations.
#[derive(Error, Debug)]
pub enum ReferatError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stage data failed structural validation (missing field, wrong type,
    /// below minimum length).
    #[error("Schema violation in {stage} {side}: {reason}")]
    Schema {
        stage: StageId,
        side: ContractSide,
        reason: String,
    },

    /// The LLM invocation itself failed (network/auth/rate-limit class).
    #[error("LLM call failed: {0}")]
    LlmCall(String),

    /// Terminal failure of one pipeline stage.
    #[error("Stage {stage} failed after {attempts} attempt(s): {source}")]
    Stage {
        stage: StageId,
        attempts: usize,
        #[source]
        source: Box<ReferatError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ReferatError {
    /// Shorthand for a schema violation in a stage contract.
    pub fn schema(stage: StageId, side: ContractSide, reason: impl Into<String>) -> Self {
        ReferatError::Schema {
            stage,
            side,
            reason: reason.into(),
        }
    }

    /// Whether the stage retry loop may re-attempt after this error.
    ///
    /// Transient LLM failures and primary-path output violations are
    /// retryable. Input violations are a caller bug and fallback-path
    /// violations are a degradation bug; neither improves on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReferatError::LlmCall(_) => true,
            ReferatError::Schema { side, .. } => *side == ContractSide::Output,
            _ => false,
        }
    }
}

/// Result type alias for Referat operations.
pub type Result<T> = std::result::Result<T, ReferatError>;
