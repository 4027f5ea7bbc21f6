//! Prompt templates for Referat.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates, one pair per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub refine: RefinePrompts,
    pub diarize: DiarizePrompts,
    pub cluster: ClusterPrompts,
    pub structure: StructurePrompts,
    pub synthesize: SynthesizePrompts,
}

/// Prompts for transcript refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinePrompts {
    pub system: String,
    pub user: String,
}

impl Default for RefinePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a transcript refinement specialist. You clean raw video transcripts without changing what was said.

When refining a transcript:
1. Fix typos and obvious mis-transcriptions
2. Add punctuation and sentence boundaries where they are missing
3. Remove filler sounds and verbal tics (음, 어, 아, 그니까 and similar)
4. Keep every statement's meaning and order exactly as spoken
5. Never summarize and never add content that is not in the transcript

Always write the refined transcript in the same language as the original.

Respond with a JSON object:
{"refined_transcript": "the cleaned transcript text", "processing_notes": "one short note on what was changed"}"#.to_string(),

            user: r#"Refine the following raw video transcript:

---
Raw transcript:
{{transcript}}
---

Fix typos, add punctuation, and drop filler words, but do not alter the meaning or drop any content. Respond with the JSON object described in the system prompt."#.to_string(),
        }
    }
}

/// Prompts for speaker diarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiarizePrompts {
    pub system: String,
    pub user: String,
}

impl Default for DiarizePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a speaker diarization specialist. You split a refined transcript into utterances and attribute each one to a speaker.

When separating speakers:
1. Use linguistic style, conversational flow, self-references, and topical consistency
2. Label speakers "Speaker A", "Speaker B", ... in order of first appearance
3. Keep utterances in their original order and preserve their wording
4. Give each utterance a confidence between 0.0 and 1.0
5. If the transcript is a monologue, attribute everything to a single speaker

Keep utterance text in the language of the transcript.

Respond with a JSON object:
{"speaker_tagged_transcript": [{"speaker": "Speaker A", "text": "...", "confidence": 0.9}], "detected_speakers": ["Speaker A"], "speaker_count": 1}"#.to_string(),

            user: r#"Attribute each utterance in this refined transcript to a speaker:

---
Refined transcript:
{{refined_transcript}}
---

Analyze speaking style, dialogue flow, self-referring expressions, and content consistency, then assign a speaker label to every utterance. Respond with the JSON object described in the system prompt."#.to_string(),
        }
    }
}

/// Prompts for topic clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterPrompts {
    pub system: String,
    pub user: String,
}

impl Default for ClusterPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a topic clustering specialist. You group speaker-tagged utterances into coherent topics regardless of when they occur in the recording.

When clustering:
1. Group utterances that belong to the same subject, even when far apart in time
2. Give every cluster a concise title and a one-or-two sentence summary
3. Score each cluster's importance between 0.1 and 1.0 relative to the whole recording
4. Place every input utterance in at least one cluster
5. Prefer a handful of meaningful clusters over many tiny ones

Keep titles and summaries in the language of the utterances.

Respond with a JSON object:
{"topic_clusters": [{"topic_title": "...", "topic_summary": "...", "importance_score": 0.8, "related_utterances": [{"speaker": "Speaker A", "text": "...", "confidence": 0.9}]}], "total_topics": 1}"#.to_string(),

            user: r#"Group these speaker-tagged utterances into topic clusters:

---
Tagged utterances:
{{utterances}}
---

Cluster semantically related utterances regardless of their order, give each topic a title and a summary, and make sure every utterance lands in at least one topic. Respond with the JSON object described in the system prompt."#.to_string(),
        }
    }
}

/// Prompts for report structure design.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructurePrompts {
    pub system: String,
    pub user: String,
}

impl Default for StructurePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a report architect. Given topic clusters extracted from a video, you decide the content type and design the report outline that fits it best.

When designing the structure:
1. Classify the content type (e.g. 토론, 강의, 인터뷰, 뉴스, 리뷰, 브이로그, 일반)
2. Design sections that suit that content type, ordered for a reader
3. Name for each section the topics it must cover, drawn from the cluster titles
4. Use increasing integer section_order values starting at 1
5. Explain your structural choice in one or two sentences

Keep section names and descriptions in the language of the source material.

Respond with a JSON object:
{"content_type": "...", "report_structure": [{"section_name": "...", "section_description": "...", "required_topics": ["..."], "section_order": 1}], "structure_rationale": "..."}"#.to_string(),

            user: r#"Design a report structure for these topic clusters:

---
Topic cluster analysis:
Total topics: {{total_topics}}

{{cluster_summary}}
---

Classify the content type, design the most fitting report outline, and state which topics each section must cover. Respond with the JSON object described in the system prompt."#.to_string(),
        }
    }
}

/// Prompts for final report synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizePrompts {
    pub system: String,
    pub user: String,
}

impl Default for SynthesizePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a report writer. You compose the final analytical report in Markdown from topic clusters and a section outline.

When writing the report:
1. Follow the given section structure and ordering exactly
2. Start with a single `#` title line and use `##` for the sections
3. Cover every required topic of every section using the cluster content
4. Write flowing analytical prose, not bullet-point dumps of the utterances
5. Quote short utterance passages where they strengthen the analysis

Write the report in the language of the source material.

Respond with a JSON object:
{"final_report": "# ...", "report_metadata": {"total_sections": 3, "content_type": "...", "topics_covered": ["..."], "word_count_estimate": 1200}}"#.to_string(),

            user: r#"Write the final report for this analyzed video:

---
{{structure_guide}}
---

Source material by topic:

{{content_data}}
---

Compose a complete Markdown report that follows the structure above and covers all required topics. Respond with the JSON object described in the system prompt."#.to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from defaults, with optional per-stage TOML overrides.
    pub fn load(custom_dir: Option<&str>) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            // Load refine prompts if file exists
            let refine_path = custom_path.join("refine.toml");
            if refine_path.exists() {
                let content = std::fs::read_to_string(&refine_path)?;
                prompts.refine = toml::from_str(&content)?;
            }

            // Load diarize prompts if file exists
            let diarize_path = custom_path.join("diarize.toml");
            if diarize_path.exists() {
                let content = std::fs::read_to_string(&diarize_path)?;
                prompts.diarize = toml::from_str(&content)?;
            }

            // Load cluster prompts if file exists
            let cluster_path = custom_path.join("cluster.toml");
            if cluster_path.exists() {
                let content = std::fs::read_to_string(&cluster_path)?;
                prompts.cluster = toml::from_str(&content)?;
            }

            // Load structure prompts if file exists
            let structure_path = custom_path.join("structure.toml");
            if structure_path.exists() {
                let content = std::fs::read_to_string(&structure_path)?;
                prompts.structure = toml::from_str(&content)?;
            }

            // Load synthesize prompts if file exists
            let synthesize_path = custom_path.join("synthesize.toml");
            if synthesize_path.exists() {
                let content = std::fs::read_to_string(&synthesize_path)?;
                prompts.synthesize = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.refine.system.is_empty());
        assert!(!prompts.synthesize.user.is_empty());
        // Every stage must ask for JSON so the response format constraint holds.
        for system in [
            &prompts.refine.system,
            &prompts.diarize.system,
            &prompts.cluster.system,
            &prompts.structure.system,
            &prompts.synthesize.system,
        ] {
            assert!(system.contains("JSON"));
        }
    }

    #[test]
    fn test_render_template() {
        let template = "Refine {{transcript}} from {{source}}.";
        let mut vars = std::collections::HashMap::new();
        vars.insert("transcript".to_string(), "text".to_string());
        vars.insert("source".to_string(), "video".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Refine text from video.");
    }

    #[test]
    fn test_load_with_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("refine.toml"),
            "system = \"custom refine system\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(Some(dir.path().to_str().unwrap())).unwrap();
        assert_eq!(prompts.refine.system, "custom refine system");
        // Fields missing from the override file keep their defaults.
        assert!(prompts.refine.user.contains("{{transcript}}"));
        // Stages without an override file are untouched.
        assert!(prompts.diarize.system.contains("diarization"));
    }
}
