//! Stage 2: speaker diarization.
//!
//! Attributes each utterance of the refined transcript to a speaker. The
//! fallback splits the input into sentences and alternates two speaker labels
//! on simple conversational cues, collapsing to one speaker when the
//! alternation rate says the heuristic is unreliable.

use serde::Deserialize;
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::warn;

use crate::config::Prompts;
use crate::error::{ContractSide, ReferatError, Result};
use crate::stage::models::{DiarizeInput, DiarizeOutput, Utterance};
use crate::stage::{coerce, extract_json_object, Heuristics, ParseFailure, StageId, StageSpec};
use crate::text;

const MIN_TRANSCRIPT_CHARS: usize = 50;
const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Sentence-leading markers that suggest the speaker changed.
const SWITCH_MARKERS: [&str; 7] = ["그런데", "하지만", "근데", "아니", "맞습니다", "네", "예"];

/// Lenient deserialization target for the model response.
#[derive(Debug, Deserialize)]
struct DiarizeWire {
    speaker_tagged_transcript: Vec<coerce::UtteranceWire>,
    #[serde(default)]
    detected_speakers: Option<serde_json::Value>,
    #[serde(default)]
    speaker_count: Option<serde_json::Value>,
}

/// Contract and fallback for speaker diarization.
pub struct DiarizeStage;

impl StageSpec for DiarizeStage {
    const ID: StageId = StageId::Diarize;

    type Input = DiarizeInput;
    type Output = DiarizeOutput;

    fn validate_input(&self, input: &Self::Input) -> Result<()> {
        if input.refined_transcript.trim().is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "refined_transcript is blank",
            ));
        }
        let length = input.refined_transcript.chars().count();
        if length < MIN_TRANSCRIPT_CHARS {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                format!(
                    "refined_transcript must be at least {} characters, got {}",
                    MIN_TRANSCRIPT_CHARS, length
                ),
            ));
        }
        Ok(())
    }

    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str {
        &prompts.diarize.system
    }

    fn user_prompt(&self, prompts: &Prompts, input: &Self::Input) -> String {
        let mut vars = HashMap::new();
        vars.insert(
            "refined_transcript".to_string(),
            input.refined_transcript.clone(),
        );
        Prompts::render(&prompts.diarize.user, &vars)
    }

    fn parse_response(&self, response: &str) -> std::result::Result<Self::Output, ParseFailure> {
        let json = extract_json_object(response)
            .ok_or_else(|| ParseFailure::new("no JSON object in response"))?;
        let wire: DiarizeWire =
            serde_json::from_str(json).map_err(|e| ParseFailure::new(e.to_string()))?;

        let mut utterances = Vec::with_capacity(wire.speaker_tagged_transcript.len());
        for (index, entry) in wire.speaker_tagged_transcript.iter().enumerate() {
            utterances.push(coerce::utterance(entry, index)?);
        }
        let actual = distinct_speakers(&utterances);

        let detected_speakers = match wire.detected_speakers.as_ref() {
            Some(value) if value.is_array() => coerce::string_list(Some(value)),
            _ => actual.clone(),
        };
        let speaker_count = coerce::count_or(wire.speaker_count.as_ref(), actual.len());

        Ok(DiarizeOutput {
            speaker_tagged_transcript: utterances,
            detected_speakers,
            speaker_count,
        })
    }

    fn validate_output(&self, output: &Self::Output, side: ContractSide) -> Result<()> {
        if output.speaker_tagged_transcript.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "speaker_tagged_transcript is empty",
            ));
        }
        if output.detected_speakers.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "detected_speakers is empty",
            ));
        }
        if output.speaker_count == 0 {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "speaker_count must be positive",
            ));
        }
        // Declared speaker list and count may still disagree with the
        // utterances here; normalize reconciles them without failing.
        Ok(())
    }

    fn normalize(&self, _input: &Self::Input, output: &mut Self::Output, _heuristics: &Heuristics) {
        let actual = distinct_speakers(&output.speaker_tagged_transcript);

        let declared: HashSet<&str> = output
            .detected_speakers
            .iter()
            .map(String::as_str)
            .collect();
        let actual_set: HashSet<&str> = actual.iter().map(String::as_str).collect();
        if declared != actual_set || output.speaker_count != actual.len() {
            warn!(
                declared_count = output.speaker_count,
                actual_count = actual.len(),
                "declared speakers disagree with utterances, recomputing"
            );
        }

        output.detected_speakers = actual;
        output.speaker_count = output.detected_speakers.len();
    }

    fn fallback(&self, input: &Self::Input, _raw: &str, heuristics: &Heuristics) -> Self::Output {
        let sentences = text::split_sentences(&input.refined_transcript);

        let mut utterances = Vec::with_capacity(sentences.len());
        let mut current = "Speaker A";
        let mut alternations = 0usize;
        for (index, sentence) in sentences.iter().enumerate() {
            if should_switch_speaker(sentence, index) {
                current = if current == "Speaker A" {
                    "Speaker B"
                } else {
                    "Speaker A"
                };
                alternations += 1;
            }
            utterances.push(Utterance::new(current, sentence.clone(), FALLBACK_CONFIDENCE));
        }

        // Too much switching means the heuristic is guessing; treat the
        // transcript as a single speaker instead.
        if alternations as f64 > sentences.len() as f64 * heuristics.alternation_collapse_ratio {
            for utterance in &mut utterances {
                utterance.speaker = "Speaker A".to_string();
            }
        }

        if utterances.is_empty() {
            // Punctuation-only splits can come back empty; the input itself
            // is non-blank, so keep it as one attributed utterance.
            utterances.push(Utterance::new(
                "Speaker A",
                input.refined_transcript.trim(),
                FALLBACK_CONFIDENCE,
            ));
        }

        let detected_speakers = distinct_speakers(&utterances);
        DiarizeOutput {
            speaker_count: detected_speakers.len(),
            detected_speakers,
            speaker_tagged_transcript: utterances,
        }
    }
}

/// Distinct speaker labels in first-appearance order.
fn distinct_speakers(utterances: &[Utterance]) -> Vec<String> {
    let mut speakers: Vec<String> = Vec::new();
    for utterance in utterances {
        if !speakers.iter().any(|s| s == &utterance.speaker) {
            speakers.push(utterance.speaker.clone());
        }
    }
    speakers
}

fn should_switch_speaker(sentence: &str, index: usize) -> bool {
    if sentence.contains('?')
        || sentence.contains("어떻게")
        || sentence.contains("왜")
        || sentence.contains("뭐")
    {
        return true;
    }
    if SWITCH_MARKERS
        .iter()
        .any(|marker| sentence.starts_with(marker))
    {
        return true;
    }
    index > 0 && index % 5 == 0
}
