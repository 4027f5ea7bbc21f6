//! CLI module for Referat.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Referat - Transcript Analysis Reports
///
/// Turns raw video transcripts into structured analytical reports through a
/// five-stage LLM pipeline: refine, diarize, cluster, structure, synthesize.
#[derive(Parser, Debug)]
#[command(name = "referat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "REFERAT_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze transcripts and produce structured reports
    Analyze {
        /// Transcript file paths, or '-' to read one transcript from stdin
        files: Vec<String>,

        /// Title of the source video (single input only)
        #[arg(short, long)]
        title: Option<String>,

        /// Identifier of the source video (single input only)
        #[arg(long)]
        video_id: Option<String>,

        /// Language hint for the transcript (e.g. "ko")
        #[arg(short, long)]
        language: Option<String>,

        /// LLM model to use (overrides configuration)
        #[arg(short, long, env = "REFERAT_MODEL")]
        model: Option<String>,

        /// Write the full run result as JSON to this path (single input only)
        #[arg(long)]
        json_out: Option<String>,

        /// Write the report here instead of next to the input (single input only)
        #[arg(long)]
        report_out: Option<String>,

        /// Maximum number of transcripts analyzed concurrently
        #[arg(long, default_value = "2")]
        max_concurrent: usize,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}
