//! Stage 3: topic clustering.
//!
//! Groups diarized utterances into topic clusters regardless of their order
//! in the video. The fallback clusters by keyword membership against a fixed
//! topic list, with a catch-all bucket for utterances matching nothing.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::config::Prompts;
use crate::error::{ContractSide, ReferatError, Result};
use crate::stage::models::{ClusterInput, ClusterOutput, TopicCluster, Utterance};
use crate::stage::{coerce, extract_json_object, Heuristics, ParseFailure, StageId, StageSpec};
use crate::text;

const MIN_UTTERANCES: usize = 2;

/// Lenient deserialization target for the model response.
#[derive(Debug, Deserialize)]
struct ClusterWire {
    topic_clusters: Vec<ClusterItemWire>,
    #[serde(default)]
    total_topics: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ClusterItemWire {
    topic_title: serde_json::Value,
    related_utterances: Vec<coerce::UtteranceWire>,
    #[serde(default)]
    topic_summary: Option<serde_json::Value>,
    #[serde(default)]
    importance_score: Option<serde_json::Value>,
}

/// Contract and fallback for topic clustering.
pub struct ClusterStage;

impl StageSpec for ClusterStage {
    const ID: StageId = StageId::Cluster;

    type Input = ClusterInput;
    type Output = ClusterOutput;

    fn validate_input(&self, input: &Self::Input) -> Result<()> {
        let count = input.speaker_tagged_transcript.len();
        if count == 0 {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                "speaker_tagged_transcript is empty",
            ));
        }
        if count < MIN_UTTERANCES {
            return Err(ReferatError::schema(
                Self::ID,
                ContractSide::Input,
                format!(
                    "at least {} utterances are required for clustering, got {}",
                    MIN_UTTERANCES, count
                ),
            ));
        }
        Ok(())
    }

    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str {
        &prompts.cluster.system
    }

    fn user_prompt(&self, prompts: &Prompts, input: &Self::Input) -> String {
        let mut formatted = String::new();
        for (index, utterance) in input.speaker_tagged_transcript.iter().enumerate() {
            formatted.push_str(&format!(
                "{}. [{}]: {}\n",
                index + 1,
                utterance.speaker,
                utterance.text
            ));
        }
        let mut vars = HashMap::new();
        vars.insert("utterances".to_string(), formatted);
        Prompts::render(&prompts.cluster.user, &vars)
    }

    fn parse_response(&self, response: &str) -> std::result::Result<Self::Output, ParseFailure> {
        let json = extract_json_object(response)
            .ok_or_else(|| ParseFailure::new("no JSON object in response"))?;
        let wire: ClusterWire =
            serde_json::from_str(json).map_err(|e| ParseFailure::new(e.to_string()))?;

        let mut clusters = Vec::with_capacity(wire.topic_clusters.len());
        for (index, item) in wire.topic_clusters.iter().enumerate() {
            let topic_title = coerce::string_scalar(&item.topic_title).ok_or_else(|| {
                ParseFailure::new(format!("cluster {} has a non-scalar topic_title", index))
            })?;

            let mut related = Vec::with_capacity(item.related_utterances.len());
            for (position, entry) in item.related_utterances.iter().enumerate() {
                related.push(coerce::utterance(entry, position)?);
            }

            let topic_summary = item
                .topic_summary
                .as_ref()
                .and_then(coerce::string_scalar)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| format!("{}에 대한 논의", topic_title));

            clusters.push(TopicCluster {
                topic_title,
                topic_summary,
                importance_score: coerce::importance(item.importance_score.as_ref()),
                related_utterances: related,
            });
        }

        let total_topics = coerce::count_or(wire.total_topics.as_ref(), clusters.len());
        Ok(ClusterOutput {
            topic_clusters: clusters,
            total_topics,
        })
    }

    fn validate_output(&self, output: &Self::Output, side: ContractSide) -> Result<()> {
        if output.topic_clusters.is_empty() {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "topic_clusters is empty",
            ));
        }
        for cluster in &output.topic_clusters {
            if cluster.related_utterances.is_empty() {
                return Err(ReferatError::schema(
                    Self::ID,
                    side,
                    format!("topic '{}' has no related utterances", cluster.topic_title),
                ));
            }
        }
        if output.total_topics == 0 {
            return Err(ReferatError::schema(
                Self::ID,
                side,
                "total_topics must be positive",
            ));
        }
        Ok(())
    }

    fn normalize(&self, input: &Self::Input, output: &mut Self::Output, heuristics: &Heuristics) {
        let actual = output.topic_clusters.len();
        if output.total_topics != actual {
            warn!(
                declared_topics = output.total_topics,
                actual_topics = actual,
                "declared topic count disagrees with clusters, recomputing"
            );
            output.total_topics = actual;
        }

        let clustered: usize = output
            .topic_clusters
            .iter()
            .map(|c| c.related_utterances.len())
            .sum();
        let original = input.speaker_tagged_transcript.len();
        if original > 0 && (clustered as f64) < (original as f64) * heuristics.coverage_warn_ratio {
            warn!(
                original_count = original,
                clustered_count = clustered,
                coverage = clustered as f64 / original as f64,
                "a large share of utterances was not assigned to any topic"
            );
        }
    }

    fn fallback(&self, input: &Self::Input, raw: &str, _heuristics: &Heuristics) -> Self::Output {
        let groups = keyword_groups(&input.speaker_tagged_transcript);

        let mut clusters: Vec<TopicCluster> = groups
            .into_iter()
            .enumerate()
            .map(|(index, (keywords, members))| {
                let label = keywords
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
                TopicCluster {
                    topic_title: format!("주제 {}: {}", index + 1, label),
                    topic_summary: format!("{}에 관한 논의", label),
                    importance_score: (members.len() as f64 * 0.2).min(1.0),
                    related_utterances: members,
                }
            })
            .collect();

        if clusters.is_empty() {
            // No input utterances to group; keep one catch-all cluster built
            // from the raw response so downstream stages still get content.
            let snippet: String = raw.chars().take(500).collect();
            clusters.push(TopicCluster {
                topic_title: "전체 내용".to_string(),
                topic_summary: "영상의 전반적인 내용".to_string(),
                importance_score: 1.0,
                related_utterances: vec![Utterance::new("Speaker A", snippet, 0.5)],
            });
        }

        ClusterOutput {
            total_topics: clusters.len(),
            topic_clusters: clusters,
        }
    }
}

/// Groups utterances by their keyword sets, preserving first-appearance
/// order of the groups.
fn keyword_groups(utterances: &[Utterance]) -> Vec<(BTreeSet<String>, Vec<Utterance>)> {
    let mut groups: Vec<(BTreeSet<String>, Vec<Utterance>)> = Vec::new();
    for utterance in utterances {
        let mut keywords = text::extract_keywords(&utterance.text);
        if keywords.is_empty() {
            keywords.insert("일반".to_string());
        }
        match groups.iter_mut().find(|(key, _)| *key == keywords) {
            Some((_, members)) => members.push(utterance.clone()),
            None => groups.push((keywords, vec![utterance.clone()])),
        }
    }
    groups
}
