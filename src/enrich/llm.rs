//! LLM provider for translation, summaries and free-form prompts.
//!
//! Speaks the OpenAI-compatible chat completions API, which local servers
//! such as Ollama and vLLM also expose.

use super::{Capability, EnrichmentProvider, EnrichmentStep, EnrichmentValue, ProviderError};
use crate::model::CrawlItem;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default prompt for translation (uses {language} and {content})
pub const DEFAULT_TRANSLATE_PROMPT: &str = r#"Translate the following text into {language}. Keep technical terms, model names and acronyms as they are.

{content}

Respond with ONLY the translation."#;

/// Default prompt for summaries (uses {title} and {content})
pub const DEFAULT_SUMMARIZE_PROMPT: &str = r#"Summarize the following article in 2-3 sentences.

Title: {title}

{content}

Respond with ONLY the summary."#;

/// Default prompt for keyword extraction (uses {title} and {content})
pub const DEFAULT_KEYWORDS_PROMPT: &str = r#"List 3-5 short topic keywords for the following article.

Title: {title}

{content}

Respond with ONLY a comma-separated list of keywords."#;

/// Configuration for the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the API, without `/chat/completions`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key; unset means no auth header
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Language used by translate steps without a `target_language` option
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Maximum characters of item text sent per call
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

fn default_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "qwen2.5:7b".to_string()
}
fn default_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.3
}
fn default_target_language() -> String {
    "Chinese".to_string()
}
fn default_max_content_chars() -> usize {
    6000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            target_language: default_target_language(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

impl LlmConfig {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Enrichment provider backed by a chat completions endpoint
pub struct LlmProvider {
    config: LlmConfig,
    client: Client,
}

impl LlmProvider {
    pub fn new(config: LlmConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Builds the prompt for a step
    ///
    /// A `prompt` option overrides the capability's default template. A
    /// `custom_prompt` step without one is an error.
    pub fn build_prompt(
        &self,
        step: &EnrichmentStep,
        item: &CrawlItem,
    ) -> Result<String, ProviderError> {
        let template = match (step.option("prompt"), step.capability) {
            (Some(prompt), _) => prompt,
            (None, Capability::Translate) => DEFAULT_TRANSLATE_PROMPT,
            (None, Capability::Summarize) => DEFAULT_SUMMARIZE_PROMPT,
            (None, Capability::ExtractKeywords) => DEFAULT_KEYWORDS_PROMPT,
            (None, Capability::CustomPrompt) => {
                return Err(ProviderError::Provider(format!(
                    "step '{}' has no prompt option",
                    step.name
                )))
            }
        };

        let content: String = step
            .target
            .text(item)
            .chars()
            .take(self.config.max_content_chars)
            .collect();
        let language = step
            .option("target_language")
            .unwrap_or(&self.config.target_language);

        Ok(template
            .replace("{title}", &item.title)
            .replace("{language}", language)
            .replace("{content}", &content))
    }

    async fn complete(&self, prompt: String) -> Result<String, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = self.config.api_key() {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Provider(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Quota(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Provider(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Provider(format!("invalid response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::Provider("empty completion".to_string()))?;

        debug!("LLM returned {} chars", content.len());
        Ok(content)
    }
}

/// Splits a comma-separated model reply into keywords
pub fn parse_keyword_list(reply: &str) -> Vec<String> {
    reply
        .split([',', '\n', '，'])
        .map(|k| k.trim().trim_start_matches('-').trim())
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl EnrichmentProvider for LlmProvider {
    async fn apply(
        &self,
        step: &EnrichmentStep,
        item: &CrawlItem,
    ) -> Result<EnrichmentValue, ProviderError> {
        let prompt = self.build_prompt(step, item)?;
        let reply = self.complete(prompt).await?;

        Ok(match step.capability {
            Capability::ExtractKeywords => EnrichmentValue::List(parse_keyword_list(&reply)),
            _ => EnrichmentValue::Text(reply),
        })
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
