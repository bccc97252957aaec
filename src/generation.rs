//! Text generation capability and the recommendation pipeline.
//!
//! [`TextGenerator`] is a stateless `generate(system, user) -> text` call;
//! nothing is carried between queries. Two HTTP backends are provided:
//!
//! | Provider | Endpoint | Key |
//! |----------|----------|-----|
//! | `gemini` | `POST {url}/v1beta/models/{model}:generateContent` | `GEMINI_API_KEY` |
//! | `openai` | `POST {url}/chat/completions` (OpenAI-compatible) | `OPENAI_API_KEY` |
//!
//! [`Recommender`] composes index query, candidate assembly, prompt
//! building, and one generation call.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Serialize;

use crate::candidates::{assemble_candidates, prioritize_resolved};
use crate::config::GenerationConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::http;
use crate::index::VectorIndex;
use crate::models::Candidate;

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `"provider:model"`, reported alongside every recommendation.
    fn backend(&self) -> String;
    async fn generate(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

// ============ Gemini ============

pub struct GeminiGenerator {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn backend(&self) -> String {
        format!("gemini:{}", self.model)
    }

    async fn generate(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.url.trim_end_matches('/'),
            self.model
        );
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
        });
        let json = http::send_json("Gemini API", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        parse_gemini_response(&json)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> anyhow::Result<String> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidate content"))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        bail!("Gemini response contained no text");
    }
    Ok(text)
}

// ============ OpenAI-compatible chat ============

pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn backend(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn generate(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let endpoint = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let json = http::send_json("OpenAI API", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> anyhow::Result<String> {
    json.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))
}

/// Build the configured generator, or `None` when generation is disabled.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Option<Arc<dyn TextGenerator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "gemini" => Ok(Some(Arc::new(GeminiGenerator::new(config)?))),
        "openai" => Ok(Some(Arc::new(OpenAIGenerator::new(config)?))),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Prompts ============

const SYSTEM_PROMPT: &str = "\
You assist IT support agents by reading historical tickets and suggesting approaches \
that have worked before. Offer suggestions, not definitive fixes.

How to weigh the candidate tickets:
1. Similarity first: higher scores are closer to the incoming issue.
2. Resolution status next: among comparably similar tickets, prefer ones marked resolved.
3. Recency last: when similarity and status are comparable, prefer newer tickets.

A resolved ticket slightly below an unresolved one in similarity should lead your \
answer. Still mention the unresolved approach and say it was attempted without \
confirmed success.

Reply in this structure:

**Suggested Approach:** one or two sentences drawn from the best resolved match.

**Possible Steps to Try:**
- two or three concrete steps taken from past resolutions

**Confidence:** Low, Medium, or High, with a short reason tied to similarity and ticket quality.

**Reference:** Ticket <ID> (<date>) handled by <agent>

**Other Relevant Approaches:** alternatives, unconfirmed attempts with a caveat, or escalation advice.

Be candid when matches are weak and always flag approaches whose outcome is unconfirmed.";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Numbered candidate list in the order given, one line per ticket.
pub fn build_user_prompt(query: &str, candidates: &[Candidate]) -> String {
    let mut prompt = format!(
        "INCOMING TICKET:\n{}\n\nHISTORICAL CANDIDATE TICKETS (sorted by relevancy):\n",
        query.trim()
    );

    for (i, c) in candidates.iter().enumerate() {
        prompt.push_str(&format!(
            "\n{}) Ticket: {} | Similarity: {:.4} | Date: {} | Resolved: {} | Category: {} | Agent: {} | Problem: {} | Resolution: {}\n",
            i + 1,
            or_na(&c.ticket_id),
            c.score,
            or_na(&c.date),
            c.resolved.label(),
            or_na(&c.category),
            or_na(&c.agent_name),
            c.problem,
            c.resolution,
        ));
    }

    prompt.push_str(&format!(
        "\n{}\nAnalyze the tickets above following the system instructions, \
         weighing similarity, resolved status, and date, and answer in the structured format.",
        "=".repeat(70)
    ));
    prompt
}

fn or_na(value: &str) -> &str {
    if value.trim().is_empty() {
        "N/A"
    } else {
        value
    }
}

// ============ Recommender ============

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub recommendation: String,
    pub candidates: Vec<Candidate>,
    pub backend: String,
}

/// Search, assemble, prompt, generate.
#[derive(Clone)]
pub struct Recommender {
    index: Arc<VectorIndex>,
    embedder: Embedder,
    generator: Arc<dyn TextGenerator>,
    prefer_resolved: bool,
}

impl Recommender {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Embedder,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            prefer_resolved: false,
        }
    }

    pub fn prefer_resolved(mut self, enabled: bool) -> Self {
        self.prefer_resolved = enabled;
        self
    }

    pub fn backend(&self) -> String {
        self.generator.backend()
    }

    pub async fn recommend(&self, query: &str, k: usize) -> Result<Recommendation> {
        let hits = self.index.query(query, &self.embedder, k).await?;
        let mut candidates = assemble_candidates(&hits);
        if self.prefer_resolved {
            prioritize_resolved(&mut candidates);
        }

        let user = build_user_prompt(query, &candidates);
        tracing::debug!(candidates = candidates.len(), backend = %self.backend(), "generating recommendation");
        let recommendation = self.generator.generate(SYSTEM_PROMPT, &user).await?;

        Ok(Recommendation {
            recommendation,
            candidates,
            backend: self.backend(),
        })
    }
}
