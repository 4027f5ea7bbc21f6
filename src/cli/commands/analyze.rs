//! Analyze command implementation.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use console::style;
use futures::stream::{self, StreamExt};

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::ReferatError;
use crate::orchestrator::{Pipeline, PipelineResult, RunState};
use crate::stage::StageId;

/// Run the analyze command.
pub async fn run_analyze(
    files: &[String],
    title: Option<String>,
    video_id: Option<String>,
    language: Option<String>,
    model: Option<String>,
    json_out: Option<String>,
    report_out: Option<String>,
    max_concurrent: usize,
    mut settings: Settings,
) -> Result<()> {
    // Pre-flight checks
    if let Err(e) = preflight::check(Operation::Analyze) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    if files.is_empty() {
        Output::error("No input given. Pass transcript file paths, or '-' to read stdin.");
        return Err(ReferatError::InvalidInput("no input files".to_string()).into());
    }

    // Validate flags
    if files.len() > 1 {
        if title.is_some() || video_id.is_some() || json_out.is_some() || report_out.is_some() {
            Output::error(
                "--title, --video-id, --json-out and --report-out only apply to a single input",
            );
            return Err(
                ReferatError::InvalidInput("per-input flags with multiple inputs".to_string())
                    .into(),
            );
        }
        if files.iter().any(|f| f == "-") {
            Output::error("stdin input ('-') cannot be combined with file inputs");
            return Err(
                ReferatError::InvalidInput("stdin mixed with file inputs".to_string()).into(),
            );
        }
    }

    if let Some(model) = model {
        settings.llm.model = model;
    }
    settings.validate()?;

    let pipeline = Arc::new(Pipeline::new(&settings)?);

    if let [input] = files {
        return run_analyze_single(
            &pipeline,
            input,
            title.as_deref(),
            video_id.as_deref(),
            language.as_deref(),
            json_out.as_deref(),
            report_out.as_deref(),
        )
        .await;
    }

    run_analyze_many(&pipeline, files, language.as_deref(), max_concurrent).await
}

/// Analyze a single transcript with full console reporting.
async fn run_analyze_single(
    pipeline: &Pipeline,
    input: &str,
    title: Option<&str>,
    video_id: Option<&str>,
    language: Option<&str>,
    json_out: Option<&str>,
    report_out: Option<&str>,
) -> Result<()> {
    let transcript = read_transcript(input)?;
    let label = input_label(input);
    let title = title.unwrap_or(&label);
    let video_id = video_id.unwrap_or(&label);

    Output::info(&format!("Analyzing: {}", label));

    let spinner = Output::spinner("Running analysis pipeline...");
    let result = pipeline
        .process_full_analysis(&transcript, title, video_id, language)
        .await;
    spinner.finish_and_clear();

    print_summary(&label, &result);

    if let Some(path) = json_out {
        std::fs::write(path, result.to_json()?)?;
        Output::success(&format!("Run result saved to {}", path));
    }

    if let Some(report) = result.final_report() {
        match report_target(input, report_out) {
            Some(path) => {
                std::fs::write(&path, report)?;
                Output::success(&format!("Report saved to {}", path.display()));
            }
            None => {
                println!("\n{}", report);
            }
        }
    }

    if !result.is_completed() {
        if json_out.is_none() {
            Output::warning("Partial stage outputs were discarded. Pass --json-out to keep them.");
        }
        let cause = result
            .processing_status
            .error_message
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(anyhow::anyhow!("analysis failed: {}", cause));
    }

    Ok(())
}

/// Analyze several transcripts concurrently, writing each report next to
/// its input.
async fn run_analyze_many(
    pipeline: &Arc<Pipeline>,
    files: &[String],
    language: Option<&str>,
    max_concurrent: usize,
) -> Result<()> {
    let total = files.len();
    Output::info(&format!("Analyzing {} transcripts", total));

    let pb = Output::progress_bar(total as u64, "Analyzing");

    let mut stream = stream::iter(files.iter().cloned())
        .map(|path| {
            let pipeline = Arc::clone(pipeline);
            let language = language.map(|s| s.to_string());
            async move {
                let outcome = analyze_file(&pipeline, &path, language.as_deref()).await;
                (path, outcome)
            }
        })
        .buffer_unordered(max_concurrent.max(1));

    let mut success_count = 0;
    let mut error_count = 0;

    while let Some((path, outcome)) = stream.next().await {
        pb.inc(1);
        match outcome {
            Ok(report_path) => {
                pb.println(format!(
                    "  {} {} -> {}",
                    style("✓").green(),
                    path,
                    report_path.display()
                ));
                success_count += 1;
            }
            Err(e) => {
                pb.println(format!("  {} {}: {}", style("✗").red(), path, e));
                error_count += 1;
            }
        }
    }

    pb.finish_and_clear();

    println!();
    Output::info(&format!(
        "Batch complete: {} succeeded, {} failed",
        success_count, error_count
    ));

    if error_count > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} transcripts failed",
            error_count,
            total
        ));
    }

    Ok(())
}

/// Analyze one file in batch mode: run the pipeline and write the report
/// to the default path. Returns the report path.
async fn analyze_file(pipeline: &Pipeline, path: &str, language: Option<&str>) -> Result<PathBuf> {
    let transcript = read_transcript(path)?;
    let label = input_label(path);

    let result = pipeline
        .process_full_analysis(&transcript, &label, &label, language)
        .await;

    if !result.is_completed() {
        let cause = result
            .processing_status
            .error_message
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(anyhow::anyhow!(cause));
    }

    let report = result
        .final_report()
        .ok_or_else(|| anyhow::anyhow!("run produced no report"))?;
    let report_path = default_report_path(Path::new(path));
    std::fs::write(&report_path, report)?;
    Ok(report_path)
}

/// Print the per-stage summary for one run.
fn print_summary(label: &str, result: &PipelineResult) {
    Output::header(&format!("Analysis: {}", label));

    for stage in StageId::PIPELINE {
        let icon = if result.processing_status.completed_stages.contains(&stage) {
            style("✓").green()
        } else if result.processing_status.current_stage == Some(stage)
            && result.processing_status.status == RunState::Failed
        {
            style("✗").red()
        } else {
            style("-").dim()
        };
        println!("  {} {}", icon, stage);
    }

    if let Some(structure) = &result.structure {
        Output::kv("content type", &structure.content_type);
        Output::kv("sections", &structure.report_structure.len().to_string());
    }
    if let Some(cluster) = &result.cluster {
        Output::kv("topics", &cluster.total_topics.to_string());
    }
    if let Some(synthesize) = &result.synthesize {
        Output::kv("report words", &synthesize.word_count.to_string());
    }
    if let Some(elapsed) = result.processing_status.total_processing_time {
        Output::kv("elapsed", &format_elapsed(elapsed));
    }

    match result.processing_status.status {
        RunState::Completed => Output::success("Analysis complete"),
        _ => match &result.processing_status.error_message {
            Some(message) => Output::error(&format!("Analysis failed: {}", message)),
            None => Output::error("Analysis failed"),
        },
    }
}

/// Read a transcript from a file, or from stdin when the input is '-'.
fn read_transcript(input: &str) -> Result<String> {
    let transcript = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input)
            .map_err(|e| anyhow::anyhow!("could not read {}: {}", input, e))?
    };

    if transcript.trim().is_empty() {
        return Err(ReferatError::InvalidInput(format!("{} is empty", input)).into());
    }
    Ok(transcript)
}

/// Short display label for an input: file stem, or "stdin" for '-'.
fn input_label(input: &str) -> String {
    if input == "-" {
        return "stdin".to_string();
    }
    Path::new(input)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string())
}

/// Where the report goes: an explicit path, a derived path next to the
/// input, or stdout (None) for stdin input.
fn report_target(input: &str, report_out: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = report_out {
        return Some(PathBuf::from(path));
    }
    if input == "-" {
        return None;
    }
    Some(default_report_path(Path::new(input)))
}

fn default_report_path(input: &Path) -> PathBuf {
    input.with_extension("report.md")
}

fn format_elapsed(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let minutes = total_seconds / 60;
    let secs = total_seconds % 60;

    if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{:.1}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_report_path_replaces_extension() {
        assert_eq!(
            default_report_path(Path::new("talks/episode-12.txt")),
            PathBuf::from("talks/episode-12.report.md")
        );
        assert_eq!(
            default_report_path(Path::new("transcript")),
            PathBuf::from("transcript.report.md")
        );
    }

    #[test]
    fn test_report_target_prefers_explicit_path() {
        assert_eq!(
            report_target("in.txt", Some("out.md")),
            Some(PathBuf::from("out.md"))
        );
        assert_eq!(
            report_target("in.txt", None),
            Some(PathBuf::from("in.report.md"))
        );
        assert_eq!(report_target("-", None), None);
    }

    #[test]
    fn test_input_label() {
        assert_eq!(input_label("talks/episode-12.txt"), "episode-12");
        assert_eq!(input_label("-"), "stdin");
    }

    #[test]
    fn test_read_transcript_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n").unwrap();
        assert!(read_transcript(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(4.26), "4.3s");
        assert_eq!(format_elapsed(96.0), "1m 36s");
    }
}
