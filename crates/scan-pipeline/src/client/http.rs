//! OpenAI-compatible HTTP implementation of the inference client.
//!
//! Sends batch images as base64 data-URL parts to a chat-completions vision
//! endpoint and parses the structured per-pathology verdict JSON out of the
//! reply, tolerating fenced code blocks and stray prose around the object.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use consensus::pathology::Pathology;
use consensus::verdict::PathologyVerdict;

use crate::budget::Usage;
use crate::client::{ConfirmOutcome, ConfirmReason, ConfirmRequest, InferenceClient, ScreenOutcome};
use crate::config::EndpointConfig;
use crate::error::AnalysisError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

/// Chat-completions vision client for the screen and confirm tiers.
pub struct HttpInferenceClient {
    base_url: String,
    api_key: String,
    screen_model: String,
    confirm_model: String,
    client: reqwest::Client,
}

impl HttpInferenceClient {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, AnalysisError> {
        if endpoint.base_url.is_empty() {
            return Err(AnalysisError::Configuration(
                "inference endpoint URL is empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AnalysisError::Configuration(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            screen_model: endpoint.screen_model.clone(),
            confirm_model: endpoint.confirm_model.clone(),
            client,
        })
    }

    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        images: &[Vec<u8>],
        max_tokens: u32,
    ) -> Result<(String, Usage), AnalysisError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let image_parts: Vec<Value> = images
            .iter()
            .map(|payload| {
                serde_json::json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{}", b64.encode(payload))
                    }
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": model,
            "temperature": 0.1,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": image_parts },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::from_http_message(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AnalysisError::RateLimit(format!("HTTP 429 from {model}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::from_http_message(format!(
                "HTTP {status}: {text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Parse(format!("response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AnalysisError::Parse("response had no choices".into()))?;

        let usage = parsed
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                cached_tokens: u
                    .prompt_tokens_details
                    .map(|d| d.cached_tokens)
                    .unwrap_or(0),
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok((content, usage))
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn screen(&self, images: &[Vec<u8>]) -> Result<ScreenOutcome, AnalysisError> {
        let (content, usage) = self
            .complete(&self.screen_model, &screen_prompt(), images, 2000)
            .await?;
        let verdicts = parse_verdicts(&content)?;
        debug!(
            verdicts = verdicts.len(),
            prompt_tokens = usage.prompt_tokens,
            "screen call complete"
        );
        Ok(ScreenOutcome { verdicts, usage })
    }

    async fn confirm(
        &self,
        requests: &[ConfirmRequest],
        images: &[Vec<u8>],
    ) -> Result<ConfirmOutcome, AnalysisError> {
        let (content, usage) = self
            .complete(&self.confirm_model, &confirm_prompt(requests), images, 3000)
            .await?;
        let verdicts = parse_verdicts(&content)?;
        let requested: Vec<Pathology> = requests.iter().map(|r| r.pathology).collect();
        let succeeded = requested.iter().all(|p| verdicts.contains_key(p));
        if !succeeded {
            warn!(
                requested = requested.len(),
                returned = verdicts.len(),
                "confirmation response incomplete"
            );
        }
        Ok(ConfirmOutcome {
            verdicts,
            usage,
            succeeded,
        })
    }
}

fn screen_prompt() -> String {
    let keys: Vec<&str> = Pathology::ALL.iter().map(|p| p.key()).collect();
    format!(
        "You are a thoracic radiologist screening consecutive CT chest slices. \
         Assess ALL of the following pathologies across the provided slices: {}.\n\
         Respond with ONLY a JSON object keyed by those exact pathology names. \
         Each value must be an object with fields: \
         \"present\" (boolean), \"confidence\" (integer 0-100), \
         \"subtype\" (string or null), \
         \"evidence\" (one sentence describing supporting findings), \
         \"contradicting\" (one sentence describing findings against, or empty string).",
        keys.join(", ")
    )
}

fn confirm_prompt(requests: &[ConfirmRequest]) -> String {
    let sections: Vec<String> = requests
        .iter()
        .map(|r| {
            let reason = match r.reason {
                ConfirmReason::PositiveScreen => "screening flagged this as present",
                ConfirmReason::LowConfidence => "screening confidence was too low to trust",
                ConfirmReason::MissingVerdict => "screening returned no verdict",
                ConfirmReason::ThinEvidence => "screening evidence was too thin",
            };
            format!(
                "### {}\nScreening confidence: {}. Reason for re-evaluation: {}.\n\
                 Evaluate this pathology on its own merits only.",
                r.pathology.key(),
                r.screen_confidence,
                reason
            )
        })
        .collect();
    format!(
        "You are a senior thoracic radiologist performing a focused confirmation \
         read of consecutive CT chest slices. Evaluate EACH pathology below \
         independently; do not let the assessment of one influence another.\n\n{}\n\n\
         Respond with ONLY a JSON object keyed by the exact pathology names above, \
         each value an object with fields \"present\" (boolean), \"confidence\" \
         (integer 0-100), \"subtype\" (string or null), \"evidence\" (one sentence), \
         \"contradicting\" (one sentence or empty string).",
        sections.join("\n\n")
    )
}

/// Extract the verdict JSON object from a model reply that may wrap it in a
/// fenced code block or surrounding prose.
fn extract_json(raw: &str) -> Option<&str> {
    let fenced = regex::Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok()?;
    if let Some(caps) = fenced.captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a per-pathology verdict map. Unrecognized keys are skipped with a
/// warning; recognized keys with malformed values fall back to conservative
/// defaults rather than failing the whole response.
fn parse_verdicts(raw: &str) -> Result<HashMap<Pathology, PathologyVerdict>, AnalysisError> {
    let json = extract_json(raw)
        .ok_or_else(|| AnalysisError::Parse("no JSON object in response".into()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| AnalysisError::Parse(format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| AnalysisError::Parse("top-level JSON is not an object".into()))?;

    let mut verdicts = HashMap::new();
    for (key, entry) in object {
        let Some(pathology) = Pathology::from_key(key) else {
            warn!(key = %key, "skipping unrecognized pathology key");
            continue;
        };
        verdicts.insert(pathology, parse_verdict_entry(pathology, entry));
    }
    Ok(verdicts)
}

fn parse_verdict_entry(pathology: Pathology, entry: &Value) -> PathologyVerdict {
    let present = entry
        .get("present")
        .or_else(|| entry.get("detected"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let confidence = parse_confidence(entry.get("confidence"));
    let subtype = entry
        .get("subtype")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string);
    let evidence = entry
        .get("evidence")
        .or_else(|| entry.get("findings"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let contradicting = entry
        .get("contradicting")
        .or_else(|| entry.get("contradicting_evidence"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    PathologyVerdict {
        pathology,
        present,
        confidence,
        subtype,
        evidence,
        contradicting,
    }
}

/// Accept either a 0-100 integer or a 0.0-1.0 fraction.
fn parse_confidence(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::Number(n)) => {
            let f = n.as_f64().unwrap_or(0.0);
            let scaled = if f <= 1.0 { f * 100.0 } else { f };
            scaled.clamp(0.0, 100.0).round() as u8
        }
        Some(Value::String(s)) => s
            .trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .map(|f| {
                let scaled = if f <= 1.0 { f * 100.0 } else { f };
                scaled.clamp(0.0, 100.0).round() as u8
            })
            .unwrap_or(0),
        _ => 0,
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptDetails>,
}

#[derive(Deserialize, Default)]
struct PromptDetails {
    #[serde(default)]
    cached_tokens: u64,
}
