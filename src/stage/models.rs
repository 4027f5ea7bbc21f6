//! Data models for the analysis pipeline stages.

use serde::{Deserialize, Serialize};

// ============================================================================
// Core Entities
// ============================================================================

/// One attributed unit of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Speaker label ("Speaker A", "Speaker B", ...).
    pub speaker: String,
    /// What was said.
    pub text: String,
    /// Attribution confidence in [0.0, 1.0].
    pub confidence: f64,
}

impl Utterance {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            confidence,
        }
    }
}

/// A group of semantically related utterances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCluster {
    /// Short title of the topic.
    pub topic_title: String,
    /// One-or-two sentence summary of the topic.
    pub topic_summary: String,
    /// Relative importance in [0.1, 1.0].
    pub importance_score: f64,
    /// Utterances belonging to this topic, in conversation order.
    pub related_utterances: Vec<Utterance>,
}

/// One planned section of the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    /// Section heading, unique within a structure.
    pub section_name: String,
    /// What the section should cover.
    pub section_description: String,
    /// Topic titles this section must include.
    pub required_topics: Vec<String>,
    /// Position in the report, unique positive integer after normalization.
    pub section_order: u32,
}

// ============================================================================
// Stage Inputs and Outputs
// ============================================================================

/// Input to the refine stage: the raw transcript as acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineInput {
    pub transcript: String,
}

/// Output of the refine stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineOutput {
    /// Cleaned transcript text.
    pub refined_transcript: String,
    /// The model's note on what changed, or the fallback marker.
    pub processing_notes: Option<String>,
}

/// Input to the diarize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizeInput {
    pub refined_transcript: String,
}

/// Output of the diarize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizeOutput {
    /// All utterances in conversation order.
    pub speaker_tagged_transcript: Vec<Utterance>,
    /// Distinct speaker labels in first-appearance order.
    pub detected_speakers: Vec<String>,
    /// Number of distinct speakers.
    pub speaker_count: usize,
}

/// Input to the cluster stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInput {
    pub speaker_tagged_transcript: Vec<Utterance>,
}

/// Output of the cluster stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutput {
    /// Topic groups covering the input utterances.
    pub topic_clusters: Vec<TopicCluster>,
    /// Declared topic count, reconciled to the actual count on normalize.
    pub total_topics: usize,
}

/// Input to the structure stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureInput {
    pub topic_clusters: Vec<TopicCluster>,
}

/// Output of the structure stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureOutput {
    /// Detected content type (토론, 강의, 인터뷰, ...).
    pub content_type: String,
    /// Planned report sections.
    pub report_structure: Vec<ReportSection>,
    /// Why this structure fits, or a derived default sentence.
    pub structure_rationale: Option<String>,
}

/// Input to the synthesize stage, combined from cluster and structure outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeInput {
    pub topic_clusters: Vec<TopicCluster>,
    pub report_structure: Vec<ReportSection>,
    pub content_type: String,
}

impl SynthesizeInput {
    /// Total utterances across all clusters.
    pub fn total_utterances(&self) -> usize {
        self.topic_clusters
            .iter()
            .map(|c| c.related_utterances.len())
            .sum()
    }
}

/// Output of the synthesize stage: the finished report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeOutput {
    /// Final report in Markdown.
    pub final_report: String,
    /// Report metadata; missing standard keys are filled on normalize.
    pub report_metadata: serde_json::Map<String, serde_json::Value>,
    /// Report length by the shared word-count heuristic.
    pub word_count: usize,
}
