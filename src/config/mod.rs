//! Configuration module for Referat.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{
    ClusterPrompts, DiarizePrompts, Prompts, RefinePrompts, StructurePrompts, SynthesizePrompts,
};
pub use settings::{LlmSettings, PipelineSettings, PromptSettings, Settings};
