//! Stage contracts for the five-step analysis pipeline.
//!
//! Each stage module pairs a typed contract (input checks, output checks,
//! normalization) with a deterministic fallback that rebuilds a valid output
//! when the model response cannot be parsed.

pub mod cluster;
pub mod coerce;
pub mod diarize;
pub mod models;
pub mod refine;
pub mod structure;
pub mod synthesize;

pub use cluster::ClusterStage;
pub use diarize::DiarizeStage;
pub use refine::RefineStage;
pub use structure::StructureStage;
pub use synthesize::SynthesizeStage;

use crate::config::Prompts;
use crate::error::{ContractSide, Result};
use serde::{Deserialize, Serialize};

/// Identity of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Refine,
    Diarize,
    Cluster,
    Structure,
    Synthesize,
}

impl StageId {
    /// All stages in execution order.
    pub const PIPELINE: [StageId; 5] = [
        StageId::Refine,
        StageId::Diarize,
        StageId::Cluster,
        StageId::Structure,
        StageId::Synthesize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Refine => "refine",
            StageId::Diarize => "diarize",
            StageId::Cluster => "cluster",
            StageId::Structure => "structure",
            StageId::Synthesize => "synthesize",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "refine" => Ok(StageId::Refine),
            "diarize" => Ok(StageId::Diarize),
            "cluster" => Ok(StageId::Cluster),
            "structure" => Ok(StageId::Structure),
            "synthesize" => Ok(StageId::Synthesize),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Failure to decode a model response into the stage's output schema.
///
/// Always recovered locally through the stage fallback; never surfaced
/// to the orchestrator as an error.
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub reason: String,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Tunable thresholds shared by normalization and fallback heuristics.
#[derive(Debug, Clone, Copy)]
pub struct Heuristics {
    /// Warn when clustered utterances cover less than this share of the input.
    pub coverage_warn_ratio: f64,
    /// Collapse the diarization fallback to one speaker above this alternation share.
    pub alternation_collapse_ratio: f64,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            coverage_warn_ratio: 0.8,
            alternation_collapse_ratio: 0.3,
        }
    }
}

/// Contract of one pipeline stage.
///
/// Implementations are stateless. The runner drives the sequence: input
/// check, LLM call, parse, output check, normalize, with [`StageSpec::fallback`]
/// taking over when the response cannot be parsed.
pub trait StageSpec {
    /// Stage identity used in errors and logs.
    const ID: StageId;

    type Input;
    type Output;

    /// Checks the input contract. Violations are caller bugs and are not retried.
    fn validate_input(&self, input: &Self::Input) -> Result<()>;

    /// System prompt for this stage's LLM call.
    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str;

    /// Composes the user prompt from the stage input.
    fn user_prompt(&self, prompts: &Prompts, input: &Self::Input) -> String;

    /// Decodes the raw model response into the output type.
    fn parse_response(&self, response: &str) -> std::result::Result<Self::Output, ParseFailure>;

    /// Checks the output contract shared by the primary and fallback paths.
    fn validate_output(&self, output: &Self::Output, side: ContractSide) -> Result<()>;

    /// Stricter checks applied only to parsed primary output.
    fn validate_primary(&self, output: &Self::Output) -> Result<()> {
        self.validate_output(output, ContractSide::Output)
    }

    /// Reconciles derived fields and emits quality warnings. Idempotent.
    fn normalize(&self, input: &Self::Input, output: &mut Self::Output, heuristics: &Heuristics);

    /// Rebuilds a valid output from the raw response without another LLM call.
    fn fallback(&self, input: &Self::Input, raw: &str, heuristics: &Heuristics) -> Self::Output;
}

/// Extracts the outermost JSON object from a response that may wrap it in
/// prose or code fences.
pub(crate) fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&response[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_round_trip() {
        for stage in StageId::PIPELINE {
            let parsed: StageId = stage.as_str().parse().unwrap();
            assert_eq!(parsed, stage);
        }
        assert!("transcode".parse::<StageId>().is_err());
    }

    #[test]
    fn test_stage_id_serde_names() {
        assert_eq!(
            serde_json::to_string(&StageId::Synthesize).unwrap(),
            "\"synthesize\""
        );
        let parsed: StageId = serde_json::from_str("\"refine\"").unwrap();
        assert_eq!(parsed, StageId::Refine);
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Here you go:\n```json\n{\"a\": 1}\n```"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json_object("{\"a\": 1}"), Some("{\"a\": 1}"));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }
}
