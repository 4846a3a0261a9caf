use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use crate::estimation::{EstimateError, Estimator};

const MAX_CONTEXT_CHARS: usize = 500;

/// Chat-completions client for the OpenRouter gateway.
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenRouterClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_tokens,
        })
    }
}

#[async_trait]
impl Estimator for OpenRouterClient {
    async fn estimate(
        &self,
        model_id: &str,
        question: &str,
        description: &str,
    ) -> Result<f64, EstimateError> {
        let prompt = build_prompt(question, description);
        let request = ChatRequest {
            model: model_id,
            messages: vec![ChatMessage { role: "user", content: &prompt }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = self.client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://216labs.com")
            .header("X-Title", "CalibratedAI")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EstimateError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let completion: ChatResponse = response.json().await?;
        let text = completion.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(EstimateError::EmptyResponse)?;

        parse_probability(&text).ok_or_else(|| {
            warn!("[{}] Could not parse probability from: {:?}", model_id, text);
            EstimateError::Unparseable(text)
        })
    }
}

pub fn build_prompt(question: &str, description: &str) -> String {
    let context: String = description.chars().take(MAX_CONTEXT_CHARS).collect();
    let context = if context.is_empty() {
        String::new()
    } else {
        format!("\nContext: {}\n", context)
    };

    format!(
        "You are a calibrated probability forecaster. Your task is to estimate the probability \
         that the following prediction market question resolves YES.\n\n\
         Question: {}\n{}\n\
         Respond with ONLY a single decimal number between 0 and 1 (e.g. 0.75). \
         No other text, no explanation.",
        question, context
    )
}

/// Extract a probability from a model reply.
///
/// Accepts a bare decimal in [0, 1], else the first number in the text;
/// numbers in (1, 100] are read as percentages.
pub fn parse_probability(text: &str) -> Option<f64> {
    let text = text.trim();

    if let Ok(direct) = text.parse::<f64>() {
        if (0.0..=1.0).contains(&direct) {
            return Some(direct);
        }
    }

    let re = Regex::new(r"\b(0?\.\d+|\d+\.?\d*)\b").ok()?;
    let captured = re.captures(text)?;
    let extracted: f64 = captured[1].parse().ok()?;

    if (0.0..=1.0).contains(&extracted) {
        Some(extracted)
    } else if extracted > 1.0 && extracted <= 100.0 {
        Some(extracted / 100.0)
    } else {
        None
    }
}
