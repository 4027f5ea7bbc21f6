//! Pipeline orchestration.
//!
//! [`Pipeline`] drives the five analysis stages in order, threading each
//! stage's output into the next stage's input and recording progress in a
//! [`PipelineStatus`]. A run never panics and never returns `Err`: failures
//! are captured in the returned [`PipelineResult`] together with the outputs
//! of every stage that completed before the failure.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::{Prompts, Settings};
use crate::error::Result;
use crate::llm::{ChatModel, OpenAiChat};
use crate::openai::create_client;
use crate::runner::StageRunner;
use crate::stage::models::{
    ClusterInput, ClusterOutput, DiarizeInput, DiarizeOutput, RefineInput, RefineOutput,
    StructureInput, StructureOutput, SynthesizeInput, SynthesizeOutput,
};
use crate::stage::{
    ClusterStage, DiarizeStage, RefineStage, StageId, StageSpec, StructureStage, SynthesizeStage,
};

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Progress bookkeeping for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Where the run is in its lifecycle.
    pub status: RunState,
    /// Stage currently executing. After a failure this stays on the stage
    /// that failed; after success it is cleared.
    pub current_stage: Option<StageId>,
    /// Stages finished so far, in execution order.
    pub completed_stages: Vec<StageId>,
    /// Rendered cause of the failure, if the run failed.
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the whole run, in seconds.
    pub total_processing_time: Option<f64>,
}

/// Orchestrates the full transcript analysis.
pub struct Pipeline {
    runner: StageRunner,
    prompts: Prompts,
}

impl Pipeline {
    /// Creates a pipeline backed by the OpenAI API.
    ///
    /// Reads `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`) from the
    /// environment via the shared client constructor.
    pub fn new(settings: &Settings) -> Result<Self> {
        let chat = OpenAiChat::new(create_client(), settings.llm.temperature);
        Self::with_chat(settings, Arc::new(chat))
    }

    /// Creates a pipeline on top of an arbitrary chat backend.
    pub fn with_chat(settings: &Settings, chat: Arc<dyn ChatModel>) -> Result<Self> {
        let prompts = Prompts::load(settings.prompts.custom_dir.as_deref())?;
        let runner = StageRunner::new(
            chat,
            settings.llm.model.clone(),
            settings.retry_policy(),
            settings.heuristics(),
        );
        Ok(Self { runner, prompts })
    }

    /// Runs all five stages over a raw transcript.
    ///
    /// `title`, `video_id` and `language` describe the source video and are
    /// used for logging only. The returned result always carries the outputs
    /// of every completed stage, even when a later stage failed.
    #[instrument(
        skip(self, transcript, title),
        fields(
            run_id = tracing::field::Empty,
            video_id = %video_id,
            transcript_length = transcript.chars().count(),
        )
    )]
    pub async fn process_full_analysis(
        &self,
        transcript: &str,
        title: &str,
        video_id: &str,
        language: Option<&str>,
    ) -> PipelineResult {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let start = Instant::now();
        let mut result = PipelineResult {
            run_id,
            refine: None,
            diarize: None,
            cluster: None,
            structure: None,
            synthesize: None,
            processing_status: PipelineStatus {
                status: RunState::Processing,
                started_at: Some(Utc::now()),
                ..PipelineStatus::default()
            },
            total_stages: StageId::PIPELINE.len(),
            successful_stages: 0,
        };

        info!(
            title,
            language = language.unwrap_or("unspecified"),
            "starting full analysis"
        );

        let failure = self.run_stages(transcript, &mut result).await.err();

        let elapsed = start.elapsed().as_secs_f64();
        result.successful_stages = result.processing_status.completed_stages.len();
        result.processing_status.completed_at = Some(Utc::now());
        result.processing_status.total_processing_time = Some(elapsed);

        match failure {
            None => {
                result.processing_status.status = RunState::Completed;
                result.processing_status.current_stage = None;
                info!(elapsed_seconds = elapsed, "analysis completed");
            }
            Some(cause) => {
                result.processing_status.status = RunState::Failed;
                result.processing_status.error_message = Some(cause.to_string());
                error!(
                    cause = %cause,
                    stage = result
                        .processing_status
                        .current_stage
                        .map(|s| s.as_str())
                        .unwrap_or("unknown"),
                    "analysis failed"
                );
            }
        }

        result
    }

    async fn run_stages(&self, transcript: &str, result: &mut PipelineResult) -> Result<()> {
        let refine_input = RefineInput {
            transcript: transcript.to_string(),
        };
        let refine = self.run_stage(&RefineStage, &refine_input, result).await?;
        result.refine = Some(refine.clone());

        let diarize_input = DiarizeInput {
            refined_transcript: refine.refined_transcript,
        };
        let diarize = self
            .run_stage(&DiarizeStage, &diarize_input, result)
            .await?;
        result.diarize = Some(diarize.clone());

        let cluster_input = ClusterInput {
            speaker_tagged_transcript: diarize.speaker_tagged_transcript,
        };
        let cluster = self
            .run_stage(&ClusterStage, &cluster_input, result)
            .await?;
        result.cluster = Some(cluster.clone());

        let structure_input = StructureInput {
            topic_clusters: cluster.topic_clusters.clone(),
        };
        let structure = self
            .run_stage(&StructureStage, &structure_input, result)
            .await?;
        result.structure = Some(structure.clone());

        let synthesize_input = SynthesizeInput {
            topic_clusters: cluster.topic_clusters,
            report_structure: structure.report_structure,
            content_type: structure.content_type,
        };
        let synthesize = self
            .run_stage(&SynthesizeStage, &synthesize_input, result)
            .await?;
        result.synthesize = Some(synthesize);

        Ok(())
    }

    async fn run_stage<S: StageSpec>(
        &self,
        stage: &S,
        input: &S::Input,
        result: &mut PipelineResult,
    ) -> Result<S::Output> {
        result.processing_status.current_stage = Some(S::ID);
        let start = Instant::now();

        let output = self.runner.run(stage, &self.prompts, input).await?;

        info!(
            stage = %S::ID,
            elapsed_seconds = start.elapsed().as_secs_f64(),
            "stage completed"
        );
        result.processing_status.completed_stages.push(S::ID);
        Ok(output)
    }
}

/// Everything one run produced.
///
/// Serializable as a single JSON document so a run can be archived next to
/// the rendered report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Refine output, if that stage completed.
    pub refine: Option<RefineOutput>,
    /// Diarize output, if that stage completed.
    pub diarize: Option<DiarizeOutput>,
    /// Cluster output, if that stage completed.
    pub cluster: Option<ClusterOutput>,
    /// Structure output, if that stage completed.
    pub structure: Option<StructureOutput>,
    /// Synthesize output, if that stage completed.
    pub synthesize: Option<SynthesizeOutput>,
    /// Progress and timing of the run.
    pub processing_status: PipelineStatus,
    /// Number of stages in the pipeline.
    pub total_stages: usize,
    /// Number of stages that completed.
    pub successful_stages: usize,
}

impl PipelineResult {
    /// The finished Markdown report, when the final stage completed.
    pub fn final_report(&self) -> Option<&str> {
        self.synthesize.as_ref().map(|s| s.final_report.as_str())
    }

    /// Whether every stage completed.
    pub fn is_completed(&self) -> bool {
        self.processing_status.status == RunState::Completed
    }

    /// Serialize the full result as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReferatError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedChat {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedChat {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, _model: &str, _system: &str, _user: &str) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ReferatError::LlmCall("script exhausted".to_string()))
        }
    }

    const RAW_TRANSCRIPT: &str = "음 오늘은 어 금리 인상 가능성에 대해 이야기해 보겠습니다";

    fn refine_response() -> String {
        r#"{"refined_transcript": "오늘은 금리 인상 가능성에 대해 차분히 짚어 보겠습니다. 시장 유동성과 물가 흐름도 함께 살펴보고 종합적인 전망을 정리하겠습니다.", "processing_notes": "필러 제거"}"#
            .to_string()
    }

    fn diarize_response() -> String {
        r#"{"speaker_tagged_transcript": [
            {"speaker": "Speaker A", "text": "오늘은 금리 인상 가능성에 대해 짚어 보겠습니다.", "confidence": 0.9},
            {"speaker": "Speaker B", "text": "시장 유동성부터 정리해 주시죠.", "confidence": 0.85}
        ], "detected_speakers": ["Speaker A", "Speaker B"], "speaker_count": 2}"#
            .to_string()
    }

    fn cluster_response() -> String {
        r#"{"topic_clusters": [{
            "topic_title": "금리 전망",
            "topic_summary": "금리 인상 가능성에 대한 논의",
            "importance_score": 0.9,
            "related_utterances": [
                {"speaker": "Speaker A", "text": "오늘은 금리 인상 가능성에 대해 짚어 보겠습니다.", "confidence": 0.9},
                {"speaker": "Speaker B", "text": "시장 유동성부터 정리해 주시죠.", "confidence": 0.85}
            ]
        }], "total_topics": 1}"#
            .to_string()
    }

    fn structure_response() -> String {
        r#"{"content_type": "뉴스", "report_structure": [
            {"section_name": "개요", "section_description": "핵심 요약", "required_topics": ["금리 전망"], "section_order": 1},
            {"section_name": "상세 분석", "section_description": "주제별 분석", "required_topics": ["금리 전망"], "section_order": 2}
        ], "structure_rationale": "뉴스 형식에 맞춘 구조"}"#
            .to_string()
    }

    fn synthesize_response() -> String {
        format!(
            r#"{{"final_report": "# 금리 분석 보고서\n\n## 개요\n\n{}", "word_count": 800}}"#,
            "금리 인상 전망과 시장 반응을 차례로 정리한 본문입니다. ".repeat(25)
        )
    }

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.pipeline.retry_base_delay_ms = 1;
        settings
    }

    fn pipeline_with(responses: Vec<String>) -> Pipeline {
        Pipeline::with_chat(&fast_settings(), Arc::new(ScriptedChat::new(responses))).unwrap()
    }

    #[tokio::test]
    async fn test_full_analysis_completes_all_stages() {
        let pipeline = pipeline_with(vec![
            refine_response(),
            diarize_response(),
            cluster_response(),
            structure_response(),
            synthesize_response(),
        ]);

        let result = pipeline
            .process_full_analysis(RAW_TRANSCRIPT, "금리 브리핑", "vid-001", Some("ko"))
            .await;

        assert_eq!(result.processing_status.status, RunState::Completed);
        assert_eq!(result.processing_status.current_stage, None);
        assert_eq!(
            result.processing_status.completed_stages,
            StageId::PIPELINE.to_vec()
        );
        assert_eq!(result.total_stages, 5);
        assert_eq!(result.successful_stages, 5);
        assert!(result.is_completed());
        assert!(result.refine.is_some());
        assert!(result.diarize.is_some());
        assert!(result.cluster.is_some());
        assert!(result.structure.is_some());
        assert!(result.synthesize.is_some());
        assert!(result.processing_status.started_at.is_some());
        assert!(result.processing_status.completed_at.is_some());
        assert!(result.processing_status.total_processing_time.is_some());
        assert!(result.processing_status.error_message.is_none());

        let report = result.final_report().unwrap();
        assert!(report.starts_with("# 금리 분석 보고서"));

        let json = result.to_json().unwrap();
        assert!(json.contains("\"completed\""));
        assert!(json.contains("\"run_id\""));
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_results() {
        // Script ends after diarize, so the cluster stage exhausts its
        // retries against "script exhausted" errors.
        let pipeline = pipeline_with(vec![refine_response(), diarize_response()]);

        let result = pipeline
            .process_full_analysis(RAW_TRANSCRIPT, "금리 브리핑", "vid-002", None)
            .await;

        assert_eq!(result.processing_status.status, RunState::Failed);
        assert_eq!(
            result.processing_status.current_stage,
            Some(StageId::Cluster)
        );
        assert_eq!(
            result.processing_status.completed_stages,
            vec![StageId::Refine, StageId::Diarize]
        );
        assert_eq!(result.successful_stages, 2);
        assert!(!result.is_completed());
        assert!(result.refine.is_some());
        assert!(result.diarize.is_some());
        assert!(result.cluster.is_none());
        assert!(result.structure.is_none());
        assert!(result.synthesize.is_none());
        assert!(result.final_report().is_none());
        assert!(result.processing_status.completed_at.is_some());

        let message = result.processing_status.error_message.unwrap();
        assert!(message.contains("cluster"));
    }

    #[tokio::test]
    async fn test_invalid_transcript_fails_before_any_call() {
        let pipeline = pipeline_with(vec![]);

        let result = pipeline
            .process_full_analysis("짧음", "빈 입력", "vid-003", None)
            .await;

        assert_eq!(result.processing_status.status, RunState::Failed);
        assert_eq!(
            result.processing_status.current_stage,
            Some(StageId::Refine)
        );
        assert!(result.processing_status.completed_stages.is_empty());
        assert_eq!(result.successful_stages, 0);
        assert!(result.refine.is_none());
        assert!(result.processing_status.error_message.is_some());
    }

    #[test]
    fn test_run_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(RunState::Completed).unwrap(),
            serde_json::json!("completed")
        );
        assert_eq!(
            serde_json::to_value(RunState::Failed).unwrap(),
            serde_json::json!("failed")
        );
    }
}
