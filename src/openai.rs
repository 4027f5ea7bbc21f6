//! OpenAI client configuration.

use async_openai::{config::OpenAIConfig, Client};

/// Create an OpenAI client for pipeline use.
///
/// No request timeout is set: report generation over a long transcript can
/// legitimately run for minutes and must not be cut off.
pub fn create_client() -> Client<OpenAIConfig> {
    let http_client = reqwest::Client::builder()
        .build()
        .expect("Failed to create HTTP client");

    Client::with_config(OpenAIConfig::default()).with_http_client(http_client)
}
