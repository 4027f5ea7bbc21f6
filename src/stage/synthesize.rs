//! Stage 5: report synthesis.
//!
//! Writes the final Markdown report from the topic clusters and the designed
//! structure. The fallback salvages whatever text the model returned, gives
//! it a heading, and pads it with a notice section up to the minimum length.

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

use crate::config::Prompts;
use crate::error::{ContractSide, ReferatError, Result};
use crate::stage::models::{SynthesizeInput, SynthesizeOutput};
use crate::stage::{extract_json_object, Heuristics, ParseFailure, StageId, StageSpec};
use crate::text;

const STRICT_MIN_CHARS: usize = 500;
const LENIENT_MIN_CHARS: usize = 300;
const THIN_INPUT_UTTERANCES: usize = 5;
const REPETITION_WARN_RATIO: f64 = 0.3;

const FALLBACK_HEADING: &str = "# 종합 분석 보고서";
/// Appended when the salvaged report is under the strict minimum. Long enough
/// that even an empty salvage still clears the lenient length check.
const FALLBACK_NOTICE: &str = "\n\n## 추가 정보\n\n원본 응답 파싱에 실패하여 기본 형태로 제공됩니다. 보다 상세한 분석을 위해서는 재처리가 필요할 수 있습니다. 이 보고서는 모델 응답에서 복구한 텍스트를 기반으로 자동 생성되었으며, 일부 내용이 누락되었거나 순서가 원본과 다를 수 있습니다. 정확한 분석 결과가 필요한 경우 동일한 대본으로 파이프라인을 다시 실행하는 것을 권장합니다. 반복 실행 후에도 같은 문제가 발생한다면 입력 대본의 길이와 형식을 확인해 주세요. 로그에 기록된 경고 메시지를 함께 확인하면 원인 파악에 도움이 됩니다. 본 섹션은 보고서의 형식 요건을 충족하기 위해 시스템이 자동으로 추가한 안내문입니다.";

static RE_FIELD_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\{\s*"final_report"\s*:\s*""#).expect("valid field opener regex")
});
static RE_FIELD_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)",?\s*"report_metadata".*\}?\s*$"#).expect("valid field tail regex")
});
static RE_EDGE_QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"|"$"#).expect("valid edge quotes regex"));

/// Lenient deserialization target for the model response.
#[derive(Debug, Deserialize)]
struct SynthesizeWire {
    final_report: String,
    #[serde(default)]
    report_metadata: Option<serde_json::Value>,
    #[serde(default)]
    word_count: Option<serde_json::Value>,
}

/// Contract and fallback for report synthesis.
pub struct SynthesizeStage;

impl StageSpec for SynthesizeStage {
    const ID: StageId = StageId::Synthesize;

    type Input = SynthesizeInput;
    type Output = SynthesizeOutput;

    fn validate_input(&self, input: &Self::Input) -> Result<()> {
        if input.topic_clusters.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "topic_clusters is empty",
            ));
        }
        if input.report_structure.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "report_structure is empty",
            ));
        }
        if input.content_type.trim().is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "content_type is blank",
            ));
        }

        let total = input.total_utterances();
        if total == 0 {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "topic_clusters carry no utterances",
            ));
        }
        if total < THIN_INPUT_UTTERANCES {
            warn!(
                total_utterances = total,
                "few utterances available, report detail may suffer"
            );
        }
        Ok(())
    }

    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str {
        &prompts.synthesize.system
    }

    fn user_prompt(&self, prompts: &Prompts, input: &Self::Input) -> String {
        let mut structure_guide = format!(
            "**콘텐츠 유형**: {}\n\n**보고서 구조**:\n",
            input.content_type
        );
        for section in &input.report_structure {
            structure_guide.push_str(&format!(
                "{}. **{}**\n",
                section.section_order, section.section_name
            ));
            structure_guide.push_str(&format!("   - 설명: {}\n", section.section_description));
            structure_guide.push_str(&format!(
                "   - 포함할 주제: {}\n\n",
                section.required_topics.join(", ")
            ));
        }

        let mut content_data = String::new();
        for cluster in &input.topic_clusters {
            content_data.push_str(&format!("## 주제: {}\n", cluster.topic_title));
            content_data.push_str(&format!("**요약**: {}\n", cluster.topic_summary));
            content_data.push_str(&format!("**중요도**: {:.1}\n", cluster.importance_score));
            content_data.push_str(&format!(
                "**관련 발화 ({}개)**:\n",
                cluster.related_utterances.len()
            ));
            for (index, utterance) in cluster.related_utterances.iter().enumerate() {
                content_data.push_str(&format!(
                    "{}. [{}] (신뢰도: {:.1}): {}\n",
                    index + 1,
                    utterance.speaker,
                    utterance.confidence,
                    utterance.text
                ));
            }
            content_data.push('\n');
        }

        let mut vars = HashMap::new();
        vars.insert("structure_guide".to_string(), structure_guide);
        vars.insert("content_data".to_string(), content_data);
        Prompts::render(&prompts.synthesize.user, &vars)
    }

    fn parse_response(&self, response: &str) -> std::result::Result<Self::Output, ParseFailure> {
        let json = extract_json_object(response)
            .ok_or_else(|| ParseFailure::new("no JSON object in response"))?;
        let wire: SynthesizeWire =
            serde_json::from_str(json).map_err(|e| ParseFailure::new(e.to_string()))?;

        let final_report = wire.final_report.trim().to_string();

        let report_metadata = match wire.report_metadata {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        let word_count = wire
            .word_count
            .as_ref()
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or_else(|| text::count_words(&final_report));

        Ok(SynthesizeOutput {
            final_report,
            report_metadata,
            word_count,
        })
    }

    fn validate_output(&self, output: &Self::Output, side: ContractSide) -> Result<()> {
        if output.final_report.trim().is_empty() {
            return Err(ReferatError::schema(Self::ID, side, "final_report is blank"));
        }
        let length = output.final_report.chars().count();
        if length < LENIENT_MIN_CHARS {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                format!(
                    "final_report is too short ({} chars, minimum {})",
                    length, LENIENT_MIN_CHARS
                ),
            ));
        }
        if !output.final_report.contains('#') {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "final_report has no heading structure",
            ));
        }
        if output.word_count == 0 {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "word_count must be positive",
            ));
        }
        Ok(())
    }

    fn validate_primary(&self, output: &Self::Output) -> Result<()> {
        self.validate_output(output, ContractSide::Output)?;
        let length = output.final_report.chars().count();
        if length < STRICT_MIN_CHARS {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Output,
                format!(
                    "final_report is too short ({} chars, minimum {})",
                    length, STRICT_MIN_CHARS
                ),
            ));
        }
        Ok(())
    }

    fn normalize(&self, _input: &Self::Input, output: &mut Self::Output, _heuristics: &Heuristics) {
        let trimmed = output.final_report.trim();
        if trimmed.len() != output.final_report.len() {
            output.final_report = trimmed.to_string();
        }

        let report = output.final_report.clone();
        let metadata = &mut output.report_metadata;
        metadata
            .entry("total_sections")
            .or_insert_with(|| json!(text::count_h2_sections(&report)));
        metadata
            .entry("content_type")
            .or_insert_with(|| json!(text::detect_content_type(&report)));
        metadata
            .entry("topics_covered")
            .or_insert_with(|| json!(text::extract_report_topics(&report)));
        metadata
            .entry("word_count_estimate")
            .or_insert_with(|| json!(output.word_count));

        if !output.final_report.starts_with('#') {
            warn!("report does not start with a top-level heading");
        }
        let sections = text::count_h2_sections(&output.final_report);
        if sections < 2 {
            warn!(section_count = sections, "report has few major sections");
        }
        if output.word_count < 1000 {
            warn!(word_count = output.word_count, "report is relatively short");
        } else if output.word_count > 10000 {
            warn!(word_count = output.word_count, "report is quite long");
        }
        let repetition = text::repetition_ratio(&output.final_report);
        if repetition > REPETITION_WARN_RATIO {
            warn!(
                repetition_ratio = repetition,
                "report may contain repetitive content"
            );
        }
    }

    fn fallback(&self, _input: &Self::Input, raw: &str, _heuristics: &Heuristics) -> Self::Output {
        let mut report = strip_artifacts(raw);
        if !report.starts_with('#') {
            report = format!("{}\n\n{}", FALLBACK_HEADING, report);
        }
        if report.chars().count() < STRICT_MIN_CHARS {
            report.push_str(FALLBACK_NOTICE);
        }

        let word_count = text::count_words(&report);
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "total_sections".to_string(),
            json!(text::count_h2_sections(&report)),
        );
        metadata.insert("content_type".to_string(), json!("일반"));
        metadata.insert("topics_covered".to_string(), json!(["주요 내용"]));
        metadata.insert("word_count_estimate".to_string(), json!(word_count));
        metadata.insert(
            "parsing_note".to_string(),
            json!("JSON 파싱 실패로 인한 폴백 처리"),
        );

        SynthesizeOutput {
            final_report: report,
            report_metadata: metadata,
            word_count,
        }
    }
}

/// Strips the JSON field scaffolding a truncated response leaves around the
/// report text and unescapes literal `\n` sequences.
fn strip_artifacts(raw: &str) -> String {
    let stripped = RE_FIELD_OPEN.replace(raw, "");
    let stripped = RE_FIELD_TAIL.replace(&stripped, "");
    let stripped = RE_EDGE_QUOTES.replace_all(stripped.trim(), "");
    stripped.replace("\\n", "\n").trim().to_string()
}

    }
}
