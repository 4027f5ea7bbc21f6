//! Stage 1: transcript refinement.
//!
//! Cleans the raw transcript (typos, punctuation, fillers) without changing
//! its meaning. The fallback degrades to rule-based cleanup of the raw
//! response, then of the original input.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

use crate::config::Prompts;
use crate::error::{ContractSide, ReferatError, Result};
use crate::stage::models::{RefineInput, RefineOutput};
use crate::stage::{coerce, extract_json_object, Heuristics, ParseFailure, StageId, StageSpec};
use crate::text;

const MIN_TRANSCRIPT_CHARS: usize = 10;
const DEFAULT_NOTE: &str = "정제 완료";
const FALLBACK_NOTE: &str = "JSON 파싱 실패로 인한 폴백 처리";

static RE_FIELD_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\{\s*"refined_transcript"\s*:\s*""#).expect("valid field opener regex")
});
static RE_FIELD_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)",?\s*"processing_notes".*\}?\s*$"#).expect("valid field tail regex")
});
static RE_EDGE_QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"|"$"#).expect("valid edge quote regex"));

/// Lenient deserialization target for the model response.
#[derive(Debug, Deserialize)]
struct RefineWire {
    refined_transcript: String,
    #[serde(default)]
    processing_notes: Option<serde_json::Value>,
}

/// Contract and fallback for transcript refinement.
pub struct RefineStage;

impl StageSpec for RefineStage {
    const ID: StageId = StageId::Refine;

    type Input = RefineInput;
    type Output = RefineOutput;

    fn validate_input(&self, input: &Self::Input) -> Result<()> {
        if input.transcript.trim().is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "transcript is blank",
            ));
        }
        let length = input.transcript.chars().count();
        if length < MIN_TRANSCRIPT_CHARS {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                format!(
                    "transcript must be at least {} characters, got {}",
                    MIN_TRANSCRIPT_CHARS, length
                ),
            ));
        }
        Ok(())
    }

    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str {
        &prompts.refine.system
    }

    fn user_prompt(&self, prompts: &Prompts, input: &Self::Input) -> String {
        let mut vars = HashMap::new();
        vars.insert("transcript".to_string(), input.transcript.clone());
        Prompts::render(&prompts.refine.user, &vars)
    }

    fn parse_response(&self, response: &str) -> std::result::Result<Self::Output, ParseFailure> {
        let json = extract_json_object(response)
            .ok_or_else(|| ParseFailure::new("no JSON object in response"))?;
        let wire: RefineWire =
            serde_json::from_str(json).map_err(|e| ParseFailure::new(e.to_string()))?;

        let processing_notes = wire
            .processing_notes
            .as_ref()
            .and_then(coerce::string_scalar)
            .filter(|notes| !notes.trim().is_empty());

        Ok(RefineOutput {
            refined_transcript: wire.refined_transcript.trim().to_string(),
            processing_notes,
        })
    }

    fn validate_output(&self, output: &Self::Output, side: ContractSide) -> Result<()> {
        if output.refined_transcript.trim().is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "refined_transcript is empty",
            ));
        }
        Ok(())
    }

    fn normalize(&self, input: &Self::Input, output: &mut Self::Output, _heuristics: &Heuristics) {
        output.refined_transcript = output.refined_transcript.trim().to_string();
        if output
            .processing_notes
            .as_deref()
            .map_or(true, |notes| notes.trim().is_empty())
        {
            output.processing_notes = Some(DEFAULT_NOTE.to_string());
        }

        let original_len = input.transcript.chars().count();
        let refined_len = output.refined_transcript.chars().count();
        if original_len > 0 {
            let ratio = refined_len as f64 / original_len as f64;
            if ratio < 0.5 {
                warn!(
                    original_len,
                    refined_len, ratio, "refined transcript shrank below half of the input"
                );
            } else if ratio > 2.0 {
                warn!(
                    original_len,
                    refined_len, ratio, "refined transcript grew past double the input"
                );
            }
        }
    }

    fn fallback(&self, input: &Self::Input, raw: &str, _heuristics: &Heuristics) -> Self::Output {
        let mut cleaned = text::strip_filler_words(&strip_artifacts(raw));
        if cleaned.is_empty() {
            cleaned = text::strip_filler_words(input.transcript.trim());
        }
        if cleaned.is_empty() {
            // Input validation guarantees the trimmed transcript is non-blank.
            cleaned = input.transcript.trim().to_string();
        }

        RefineOutput {
            refined_transcript: cleaned,
            processing_notes: Some(FALLBACK_NOTE.to_string()),
        }
    }
}

/// Strips the remains of a broken JSON wrapper from a raw response.
fn strip_artifacts(raw: &str) -> String {
    let stripped = RE_FIELD_OPEN.replace(raw, "");
    let stripped = RE_FIELD_TAIL.replace(&stripped, "");
    RE_EDGE_QUOTES.replace_all(stripped.trim(), "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(transcript: &str) -> RefineInput {
        RefineInput {
            transcript: transcript.to_string(),
        }
    }

    #[test]
    fn test_validate_input_lengths() {
        let stage = RefineStage;
        assert!(stage
            .validate_input(&input("안녕하세요 어 오늘은 음 날씨에 대해 이야기해볼게요."))
            .is_ok());
        assert!(stage.validate_input(&input("짧다")).is_err());
        assert!(stage.validate_input(&input("             ")).is_err());
    }

    #[test]
    fn test_parse_valid_response() {
        let stage = RefineStage;
        let response = r#"Here is the result:
{"refined_transcript": "  안녕하세요. 오늘은 날씨 이야기입니다.  ", "processing_notes": "간투사 제거"}"#;

        let output = stage.parse_response(response).unwrap();
        assert_eq!(output.refined_transcript, "안녕하세요. 오늘은 날씨 이야기입니다.");
        assert_eq!(output.processing_notes.as_deref(), Some("간투사 제거"));
    }

    #[test]
    fn test_parse_missing_field_is_parse_failure() {
        let stage = RefineStage;
        assert!(stage.parse_response(r#"{"other": 1}"#).is_err());
        assert!(stage.parse_response("plain text, no json").is_err());
        assert!(stage.parse_response(r#"{"refined_transcript": 42}"#).is_err());
    }

    #[test]
    fn test_validate_output_rejects_blank() {
        let stage = RefineStage;
        let output = RefineOutput {
            refined_transcript: "   ".to_string(),
            processing_notes: None,
        };
        let err = stage
            .validate_output(&output, ContractSide::Output)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fallback_strips_artifacts_and_fillers() {
        let stage = RefineStage;
        let raw = r#"{"refined_transcript": "음 안녕하세요 어 오늘은 날씨에 대해 이야기해볼게요"#;
        let output = stage.fallback(
            &input("안녕하세요 어 오늘은 음 날씨에 대해 이야기해볼게요."),
            raw,
            &Heuristics::default(),
        );

        assert!(!output.refined_transcript.contains("{\"refined_transcript\""));
        assert!(!output.refined_transcript.contains("음 "));
        assert!(!output.refined_transcript.contains(" 어 "));
        assert!(output.refined_transcript.contains("안녕하세요"));
        assert_eq!(output.processing_notes.as_deref(), Some(FALLBACK_NOTE));
        assert!(stage
            .validate_output(&output, ContractSide::Fallback)
            .is_ok());
    }

    #[test]
    fn test_fallback_empty_raw_degrades_to_input() {
        let stage = RefineStage;
        let source = input("음 안녕하세요 어 오늘은 날씨에 대해 이야기해볼게요.");
        let output = stage.fallback(&source, "", &Heuristics::default());

        assert!(output.refined_transcript.contains("안녕하세요"));
        assert!(!output.refined_transcript.contains("음 "));
        assert!(stage
            .validate_output(&output, ContractSide::Fallback)
            .is_ok());
    }

    #[test]
    fn test_fallback_filler_only_input_returns_trimmed_input() {
        let stage = RefineStage;
        // Fillers only: rule-based cleanup erases everything, so the fallback
        // has to hand back the trimmed input verbatim.
        let source = input("  음 어 아 그 뭐 저기 이제 막 음 어  ");
        let output = stage.fallback(&source, "", &Heuristics::default());

        assert_eq!(
            output.refined_transcript,
            "음 어 아 그 뭐 저기 이제 막 음 어"
        );
        assert!(stage
            .validate_output(&output, ContractSide::Fallback)
            .is_ok());
    }

    #[test]
    fn test_normalize_fills_notes_and_is_idempotent() {
        let stage = RefineStage;
        let source = input("안녕하세요 어 오늘은 음 날씨에 대해 이야기해볼게요.");
        let mut output = RefineOutput {
            refined_transcript: "  안녕하세요. 오늘은 날씨 이야기입니다.  ".to_string(),
            processing_notes: None,
        };

        stage.normalize(&source, &mut output, &Heuristics::default());
        assert_eq!(output.refined_transcript, "안녕하세요. 오늘은 날씨 이야기입니다.");
        assert_eq!(output.processing_notes.as_deref(), Some(DEFAULT_NOTE));

        let once = output.clone();
        stage.normalize(&source, &mut output, &Heuristics::default());
        assert_eq!(output, once);
    }
}
