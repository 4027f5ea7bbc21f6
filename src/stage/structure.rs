//! Stage 4: report structure design.
//!
//! Classifies the content type of the video and lays out the sections of the
//! final report. The fallback emits a fixed three-section generic template
//! covering every input topic.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::config::Prompts;
use crate::error::{ContractSide, ReferatError, Result};
use crate::stage::models::{ReportSection, StructureInput, StructureOutput};
use crate::stage::{coerce, extract_json_object, Heuristics, ParseFailure, StageId, StageSpec};

const FALLBACK_RATIONALE: &str = "JSON 파싱 실패로 인해 범용 구조를 적용했습니다.";

/// Lenient deserialization target for the model response.
#[derive(Debug, Deserialize)]
struct StructureWire {
    content_type: serde_json::Value,
    report_structure: Vec<SectionWire>,
    #[serde(default)]
    structure_rationale: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SectionWire {
    section_name: serde_json::Value,
    #[serde(default)]
    section_description: Option<serde_json::Value>,
    #[serde(default)]
    required_topics: Option<serde_json::Value>,
    #[serde(default)]
    section_order: Option<serde_json::Value>,
}

/// Contract and fallback for report structure design.
pub struct StructureStage;

impl StageSpec for StructureStage {
    const ID: StageId = StageId::Structure;

    type Input = StructureInput;
    type Output = StructureOutput;

    fn validate_input(&self, input: &Self::Input) -> Result<()> {
        if input.topic_clusters.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "topic_clusters is empty",
            ));
        }
        Ok(())
    }

    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str {
        &prompts.structure.system
    }

    fn user_prompt(&self, prompts: &Prompts, input: &Self::Input) -> String {
        let mut cluster_summary = String::new();
        for (index, cluster) in input.topic_clusters.iter().enumerate() {
            cluster_summary.push_str(&format!(
                "{}. **{}** (중요도: {:.1}, 발화수: {})\n",
                index + 1,
                cluster.topic_title,
                cluster.importance_score,
                cluster.related_utterances.len()
            ));
            if !cluster.topic_summary.trim().is_empty() {
                cluster_summary.push_str(&format!("   - {}\n", cluster.topic_summary));
            }
            // A few sample utterances give the model enough context to pick
            // a structure without sending the whole transcript again.
            for utterance in cluster.related_utterances.iter().take(3) {
                let snippet: String = utterance.text.chars().take(100).collect();
                cluster_summary.push_str(&format!("   - [{}]: {}...\n", utterance.speaker, snippet));
            }
            cluster_summary.push('\n');
        }

        let mut vars = HashMap::new();
        vars.insert(
            "total_topics".to_string(),
            input.topic_clusters.len().to_string(),
        );
        vars.insert("cluster_summary".to_string(), cluster_summary);
        Prompts::render(&prompts.structure.user, &vars)
    }

    fn parse_response(&self, response: &str) -> std::result::Result<Self::Output, ParseFailure> {
        let json = extract_json_object(response)
            .ok_or_else(|| ParseFailure::new("no JSON object in response"))?;
        let wire: StructureWire =
            serde_json::from_str(json).map_err(|e| ParseFailure::new(e.to_string()))?;

        let content_type = coerce::string_scalar(&wire.content_type)
            .ok_or_else(|| ParseFailure::new("content_type is not a scalar"))?
            .trim()
            .to_string();

        let mut sections = Vec::with_capacity(wire.report_structure.len());
        for (index, item) in wire.report_structure.iter().enumerate() {
            let section_name = coerce::string_scalar(&item.section_name)
                .ok_or_else(|| {
                    ParseFailure::new(format!("section {} has a non-scalar section_name", index))
                })?
                .trim()
                .to_string();

            let section_description = item
                .section_description
                .as_ref()
                .and_then(coerce::string_scalar)
                .map(|d| d.trim().to_string())
                .unwrap_or_default();

            let required_topics = coerce::string_list(item.required_topics.as_ref())
                .into_iter()
                .map(|topic| topic.trim().to_string())
                .collect();

            sections.push(ReportSection {
                section_name,
                section_description,
                required_topics,
                section_order: coerce::section_order(item.section_order.as_ref()),
            });
        }

        let structure_rationale = wire
            .structure_rationale
            .as_ref()
            .and_then(coerce::string_scalar)
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        Ok(StructureOutput {
            content_type,
            report_structure: sections,
            structure_rationale,
        })
    }

    fn validate_output(&self, output: &Self::Output, side: ContractSide) -> Result<()> {
        if output.content_type.trim().is_empty() {
            return Err(ReferatError::schema(Self::ID, side, "content_type is blank"));
        }
        if output.report_structure.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "report_structure is empty",
            ));
        }

        let mut names: HashSet<&str> = HashSet::new();
        for section in &output.report_structure {
            if !names.insert(section.section_name.as_str()) {
                return Err(ReferatError::schema(
                    Self::ID,
                    side,
                    format!("duplicate section name '{}'", section.section_name),
                ));
            }
            if section.section_order == 0 {
                return Err(ReferatError::schema(
                    Self::ID,
                    side,
                    format!(
                        "section '{}' has a non-positive section_order",
                        section.section_name
                    ),
                ));
            }
        }
        Ok(())
    }

    fn normalize(&self, _input: &Self::Input, output: &mut Self::Output, _heuristics: &Heuristics) {
        output
            .report_structure
            .sort_by_key(|section| section.section_order);

        let has_duplicates = output
            .report_structure
            .windows(2)
            .any(|pair| pair[0].section_order == pair[1].section_order);
        if has_duplicates {
            warn!(
                orders = ?output
                    .report_structure
                    .iter()
                    .map(|s| s.section_order)
                    .collect::<Vec<_>>(),
                "duplicate section orders, reassigning sequentially"
            );
            for (index, section) in output.report_structure.iter_mut().enumerate() {
                section.section_order = index as u32 + 1;
            }
        }

        let blank = output
            .structure_rationale
            .as_ref()
            .map(|r| r.trim().is_empty())
            .unwrap_or(true);
        if blank {
            output.structure_rationale = Some(format!(
                "{} 형식으로 분석되어 해당 구조를 적용했습니다.",
                output.content_type
            ));
        }
    }

    fn fallback(&self, input: &Self::Input, _raw: &str, _heuristics: &Heuristics) -> Self::Output {
        let mut topics: Vec<String> = input
            .topic_clusters
            .iter()
            .map(|cluster| cluster.topic_title.clone())
            .collect();
        if topics.is_empty() {
            topics.push("주요 내용".to_string());
        }

        let sections = [
            ("개요", "영상의 전반적인 내용과 핵심 메시지를 요약"),
            ("주요 내용 분석", "각 주제별로 상세한 내용과 논의사항을 정리"),
            ("결론 및 시사점", "영상의 전체적인 결론과 시청자에게 주는 시사점"),
        ];

        StructureOutput {
            content_type: "일반".to_string(),
            report_structure: sections
                .iter()
                .enumerate()
                .map(|(index, (name, description))| ReportSection {
                    section_name: name.to_string(),
                    section_description: description.to_string(),
                    required_topics: topics.clone(),
                    section_order: index as u32 + 1,
                })
                .collect(),
            structure_rationale: Some(FALLBACK_RATIONALE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::models::{TopicCluster, Utterance};

    fn cluster(title: &str) -> TopicCluster {
        TopicCluster {
            topic_title: title.to_string(),
            topic_summary: format!("{}에 대한 논의", title),
            importance_score: 0.7,
            related_utterances: vec![Utterance::new("Speaker A", "관련 발화", 0.9)],
        }
    }

    fn section(name: &str, order: u32) -> ReportSection {
        ReportSection {
            section_name: name.to_string(),
            section_description: "설명".to_string(),
            required_topics: vec!["주제".to_string()],
            section_order: order,
        }
    }

    #[test]
    fn test_validate_input_rejects_empty_clusters() {
        let stage = StructureStage;
        let empty = StructureInput {
            topic_clusters: vec![],
        };
        assert!(stage.validate_input(&empty).is_err());

        let ok = StructureInput {
            topic_clusters: vec![cluster("금리")],
        };
        assert!(stage.validate_input(&ok).is_ok());
    }

    #[test]
    fn test_parse_coerces_section_fields() {
        let stage = StructureStage;
        let response = r#"{"content_type": " 뉴스/브리핑 ", "report_structure": [
            {"section_name": "개요", "section_order": 1},
            {"section_name": "상세", "section_description": "각 주제 분석",
             "required_topics": ["금리", 2024], "section_order": 2}
        ]}"#;

        let output = stage.parse_response(response).unwrap();
        assert_eq!(output.content_type, "뉴스/브리핑");
        assert_eq!(output.report_structure[0].section_description, "");
        assert!(output.report_structure[0].required_topics.is_empty());
        assert_eq!(
            output.report_structure[1].required_topics,
            vec!["금리".to_string(), "2024".to_string()]
        );
        assert!(output.structure_rationale.is_none());
    }

    #[test]
    fn test_parse_non_scalar_section_name_is_parse_failure() {
        let stage = StructureStage;
        let response = r#"{"content_type": "일반", "report_structure": [
            {"section_name": {"ko": "개요"}, "section_order": 1}
        ]}"#;
        assert!(stage.parse_response(response).is_err());
    }

    #[test]
    fn test_validate_output_rejects_duplicates_and_zero_order() {
        let stage = StructureStage;

        let duplicate_names = StructureOutput {
            content_type: "일반".to_string(),
            report_structure: vec![section("개요", 1), section("개요", 2)],
            structure_rationale: None,
        };
        assert!(stage
            .validate_output(&duplicate_names, ContractSide::Output)
            .is_err());

        let zero_order = StructureOutput {
            content_type: "일반".to_string(),
            report_structure: vec![section("개요", 0)],
            structure_rationale: None,
        };
        assert!(stage
            .validate_output(&zero_order, ContractSide::Output)
            .is_err());
    }

    #[test]
    fn test_normalize_sorts_and_reassigns_duplicate_orders() {
        let stage = StructureStage;
        let source = StructureInput {
            topic_clusters: vec![cluster("금리")],
        };
        let mut output = StructureOutput {
            content_type: "패널토론".to_string(),
            report_structure: vec![section("상세", 2), section("개요", 1), section("결론", 2)],
            structure_rationale: None,
        };

        stage.normalize(&source, &mut output, &Heuristics::default());

        let names: Vec<&str> = output
            .report_structure
            .iter()
            .map(|s| s.section_name.as_str())
            .collect();
        let orders: Vec<u32> = output
            .report_structure
            .iter()
            .map(|s| s.section_order)
            .collect();
        assert_eq!(names, vec!["개요", "상세", "결론"]);
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(
            output.structure_rationale.as_deref(),
            Some("패널토론 형식으로 분석되어 해당 구조를 적용했습니다.")
        );

        let once = output.clone();
        stage.normalize(&source, &mut output, &Heuristics::default());
        assert_eq!(output, once);
    }

    #[test]
    fn test_normalize_keeps_existing_rationale() {
        let stage = StructureStage;
        let source = StructureInput {
            topic_clusters: vec![cluster("금리")],
        };
        let mut output = StructureOutput {
            content_type: "일반".to_string(),
            report_structure: vec![section("개요", 1)],
            structure_rationale: Some("모델이 제시한 근거".to_string()),
        };

        stage.normalize(&source, &mut output, &Heuristics::default());
        assert_eq!(
            output.structure_rationale.as_deref(),
            Some("모델이 제시한 근거")
        );
    }

    #[test]
    fn test_fallback_builds_generic_template() {
        let stage = StructureStage;
        let source = StructureInput {
            topic_clusters: vec![cluster("금리 전망"), cluster("부동산 시장")],
        };
        let output = stage.fallback(&source, "", &Heuristics::default());

        assert_eq!(output.content_type, "일반");
        assert_eq!(output.report_structure.len(), 3);
        for section in &output.report_structure {
            assert_eq!(
                section.required_topics,
                vec!["금리 전망".to_string(), "부동산 시장".to_string()]
            );
        }
        assert_eq!(output.report_structure[0].section_order, 1);
        assert!(stage
            .validate_output(&output, ContractSide::Fallback)
            .is_ok());

        let bare = StructureInput {
            topic_clusters: vec![],
        };
        let degraded = stage.fallback(&bare, "", &Heuristics::default());
        assert_eq!(
            degraded.report_structure[0].required_topics,
            vec!["주요 내용".to_string()]
        );
    }
}
