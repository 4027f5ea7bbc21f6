//! Referat - Transcript Analysis Reports
//!
//! Turns raw video transcripts into structured analytical reports.
//!
//! # Overview
//!
//! Referat runs a transcript through five LLM stages:
//!
//! 1. `refine` - clean fillers and transcription artifacts
//! 2. `diarize` - split the text into speaker-tagged utterances
//! 3. `cluster` - group utterances into topics
//! 4. `structure` - plan report sections for the detected content type
//! 5. `synthesize` - write the final Markdown report
//!
//! Every stage validates its input and output, retries transient failures
//! with exponential backoff, and recovers from unparseable model responses
//! through deterministic fallbacks, so a run always ends with either a
//! report or a precise error.
//!
//! # Architecture
//!
//! - `config` - settings and prompt templates
//! - `stage` - per-stage contracts: prompts, parsing, validation, fallbacks
//! - `runner` - retry and fallback execution of a single stage
//! - `orchestrator` - the five-stage pipeline
//! - `llm` - chat completion abstraction over the OpenAI client
//! - `text` - Korean-aware text heuristics shared by the fallbacks
//!
//! # Example
//!
//! ```rust,no_run
//! use referat::config::Settings;
//! use referat::orchestrator::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let pipeline = Pipeline::new(&settings)?;
//!
//!     let result = pipeline
//!         .process_full_analysis("정리되지 않은 영상 대본 전체...", "영상 제목", "vid-001", Some("ko"))
//!         .await;
//!     if let Some(report) = result.final_report() {
//!         println!("{}", report);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod openai;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod text;

pub use error::{ReferatError, Result};
