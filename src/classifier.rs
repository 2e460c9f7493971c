//! Classification service client
//!
//! The service receives a batch of stripped bookmarks embedded as JSON in a
//! natural-language prompt and answers with the same objects plus a
//! `category` field. Models rarely return clean JSON, so the answer is
//! accepted as a bare array, an array in a fenced code block, or whatever
//! sits between the first `[` and the last `]`.

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bookmarks::ClassificationInput;
use crate::config::AppConfig;
use crate::error::ClassificationBatchError;

const KNOWN_CATEGORIES_HEADER: &str = "\n\n请尽量使用以下已有的分类类别:\n";

const OUTPUT_INSTRUCTIONS: &str = "\n\n书签数据格式如下JSON所示：\n{batch_json}\n\n请输出JSON格式的结果，保留原始书签的所有字段，并添加一个名为\"category\"的字段来表示你分配的类别。\n分类应当尽可能详细且合理。\n只返回JSON格式的结果，不要添加任何其他解释文本。";

/// One element of the service answer, reduced to what the orchestrator needs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassifiedItem {
    pub url: Option<String>,
    pub category: Option<String>,
}

impl ClassifiedItem {
    #[cfg(test)]
    pub fn new(url: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            category: Some(category.into()),
        }
    }

    fn from_value(value: &Value) -> Self {
        Self {
            url: value.get("url").and_then(Value::as_str).map(str::to_string),
            category: value
                .get("category")
                .and_then(Value::as_str)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }
}

/// Anything that can assign categories to one batch
pub trait Classifier {
    async fn classify(
        &self,
        batch: &[ClassificationInput],
        known_categories: &[String],
    ) -> Result<Vec<ClassifiedItem>, ClassificationBatchError>;
}

/// Assemble the prompt: user template, optional known categories, output format with the batch
pub fn build_prompt(
    template: &str,
    batch: &[ClassificationInput],
    known_categories: &[String],
) -> Result<String, ClassificationBatchError> {
    let batch_json = serde_json::to_string_pretty(batch)
        .map_err(|e| ClassificationBatchError::Request(format!("failed to encode batch: {}", e)))?;

    let mut prompt = template.to_string();
    if !known_categories.is_empty() {
        prompt.push_str(KNOWN_CATEGORIES_HEADER);
        prompt.push_str(&known_categories.join("\n"));
    }
    prompt.push_str(OUTPUT_INSTRUCTIONS);

    Ok(prompt.replacen("{batch_json}", &batch_json, 1))
}

/// Matches a fenced code block, capturing its body
pub fn fence_regex() -> Result<Regex, regex::Error> {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```")
}

/// Pull a JSON array out of free-form model output
pub fn extract_json_array(content: &str, fence: &Regex) -> Result<Vec<Value>, ClassificationBatchError> {
    // 1. the whole answer
    if let Ok(items) = serde_json::from_str::<Vec<Value>>(content.trim()) {
        return Ok(items);
    }

    // 2. a fenced code block
    if let Some(block) = fence.captures(content).and_then(|c| c.get(1)) {
        match serde_json::from_str::<Vec<Value>>(block.as_str()) {
            Ok(items) => return Ok(items),
            Err(e) => debug!("Fenced block is not a JSON array: {}", e),
        }
    }

    // 3. first '[' to last ']'
    if let (Some(start), Some(end)) = (content.find('['), content.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<Value>>(&content[start..=end]) {
                return Ok(items);
            }
        }
    }

    Err(ClassificationBatchError::MalformedPayload(truncate(content, 200)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client
pub struct ChatClassifier {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    prompt_template: String,
    max_tokens: u32,
    max_attempts: u32,
    fence: Regex,
}

impl ChatClassifier {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        info!("🤖 Classification service: {} (model: {})", config.api_url, config.model_name);

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
            prompt_template: config.prompt.clone(),
            max_tokens: config.max_tokens,
            max_attempts: config.max_attempts.max(1),
            fence: fence_regex()?,
        })
    }

    async fn request_completion(&self, prompt: &str) -> Result<String, ClassificationBatchError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassificationBatchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationBatchError::Status {
                status,
                body: truncate(&body, 500),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassificationBatchError::MalformedPayload(format!("invalid response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClassificationBatchError::EmptyContent)
    }
}

impl Classifier for ChatClassifier {
    async fn classify(
        &self,
        batch: &[ClassificationInput],
        known_categories: &[String],
    ) -> Result<Vec<ClassifiedItem>, ClassificationBatchError> {
        let prompt = build_prompt(&self.prompt_template, batch, known_categories)?;
        debug!("Prompt for {} bookmarks:\n{}", batch.len(), prompt);

        let mut attempt = 1;
        let content = loop {
            match self.request_completion(&prompt).await {
                Ok(content) => break content,
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    // Exponential backoff: 1s, 2s, 4s, ...
                    let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                    warn!("⚠️  Attempt {}/{} failed: {} (retrying in {:?})", attempt, self.max_attempts, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let items = extract_json_array(&content, &self.fence)?;
        Ok(items.iter().map(ClassifiedItem::from_value).collect())
    }
}
