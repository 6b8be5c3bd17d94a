//! LLM chat client for root cause analysis.
//!
//! Talks to an OpenAI-compatible chat completions API. Rate limits (429) are
//! retried with exponential backoff; multiple API keys are rotated
//! round-robin to spread quota. Model output is expected to be a JSON object
//! but models sometimes wrap it in a markdown fence, so parsing unwraps
//! ```` ```json ```` blocks before giving up.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::RcaResult;
use crate::config::{env_or, env_parse};
use crate::signals::IncidentCandidate;

const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Configuration for the LLM client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat completions endpoint (OpenAI-compatible)
    pub api_url: String,
    /// API keys rotated round-robin across requests
    pub api_keys: Vec<String>,
    /// Model identifier
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per analysis before giving up on rate limits
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `base * 2^n`
    pub base_delay: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let api_keys = std::env::var("MENDER_LLM_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string)
            .collect();
        Self {
            api_url: env_or("MENDER_LLM_API_URL", DEFAULT_API_URL),
            api_keys,
            model: env_or("MENDER_LLM_MODEL", DEFAULT_MODEL),
            timeout_secs: env_parse("MENDER_LLM_TIMEOUT_SECS", 30),
            max_retries: env_parse("MENDER_LLM_MAX_RETRIES", 3),
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Failure modes of an analysis request. `RateLimitExhausted` is separated
/// because the caller reports it differently from other failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limit exhausted after retries")]
    RateLimitExhausted,
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed model output: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Model output fields, all optional so a partial answer still yields a
/// usable result.
#[derive(Debug, Deserialize, Serialize)]
struct ParsedAnalysis {
    #[serde(default = "default_root_cause")]
    root_cause: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    contributing_factors: Vec<String>,
    #[serde(default = "default_action")]
    recommended_action: String,
    #[serde(default = "default_rollback")]
    rollback_guidance: String,
    #[serde(default)]
    reasoning: String,
}

fn default_root_cause() -> String {
    "Unknown".to_string()
}
fn default_confidence() -> f64 {
    0.5
}
fn default_action() -> String {
    "escalate".to_string()
}
fn default_rollback() -> String {
    "Monitor after action".to_string()
}

/// Chat client with key rotation and 429 backoff.
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
    key_index: AtomicUsize,
}

impl LlmClient {
    /// Create a new client.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            client,
            key_index: AtomicUsize::new(0),
        }
    }

    /// Whether at least one API key is configured.
    #[must_use]
    pub fn has_keys(&self) -> bool {
        !self.config.api_keys.is_empty()
    }

    fn next_key(&self) -> Option<&str> {
        if self.config.api_keys.is_empty() {
            return None;
        }
        let idx = self.key_index.fetch_add(1, Ordering::Relaxed) % self.config.api_keys.len();
        Some(&self.config.api_keys[idx])
    }

    /// Request a structured analysis for an incident.
    pub async fn request_analysis(&self, incident: &IncidentCandidate) -> Result<RcaResult, LlmError> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_prompt(incident)}
            ],
            "temperature": 0.2,
            "response_format": {"type": "json_object"}
        });

        for attempt in 0..self.config.max_retries {
            let key = self.next_key().unwrap_or_default();
            debug!(id = %incident.id, attempt, "Sending analysis request");

            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(key)
                .json(&payload)
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt + 1 < self.config.max_retries {
                    let wait = self.config.base_delay * 2u32.pow(attempt);
                    warn!(id = %incident.id, wait_ms = wait.as_millis() as u64, "Rate limited - backing off");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                return Err(LlmError::RateLimitExhausted);
            }

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Status { status, body });
            }

            let chat: ChatResponse = response.json().await?;
            let content = chat
                .choices
                .first()
                .map(|c| c.message.content.as_str())
                .ok_or_else(|| LlmError::Malformed("empty choices".to_string()))?;

            let parsed = parse_content(content)?;
            return Ok(RcaResult {
                root_cause: parsed.root_cause,
                confidence: parsed.confidence,
                evidence: parsed.evidence,
                contributing_factors: parsed.contributing_factors,
                recommended_action: parsed.recommended_action,
                rollback_guidance: parsed.rollback_guidance,
                reasoning: parsed.reasoning,
            });
        }

        Err(LlmError::RateLimitExhausted)
    }
}

/// Parse the model's content, unwrapping a markdown JSON fence if present.
fn parse_content(content: &str) -> Result<ParsedAnalysis, LlmError> {
    if let Ok(parsed) = serde_json::from_str(content) {
        return Ok(parsed);
    }
    if let Some(rest) = content.split("```json").nth(1) {
        if let Some(inner) = rest.split("```").next() {
            return serde_json::from_str(inner.trim())
                .map_err(|e| LlmError::Malformed(e.to_string()));
        }
    }
    Err(LlmError::Malformed("content is not a JSON object".to_string()))
}

const SYSTEM_PROMPT: &str = r#"You are an expert SRE performing root cause analysis on a Kubernetes incident.

Respond in strictly valid JSON format. Do not use Markdown notation.

Response Format:
{
    "root_cause": "Clear description of the most likely root cause",
    "confidence": 0.0-1.0,
    "evidence": ["List of evidence supporting this conclusion"],
    "contributing_factors": ["Other factors that may be involved"],
    "recommended_action": "restart_pod|scale_deployment|rollout_restart|escalate",
    "rollback_guidance": "What to do if the action doesn't resolve the issue",
    "reasoning": "Step-by-step explanation of your analysis"
}

## Action Recommendations
- `restart_pod`: For single pod issues (memory leak, stuck process)
- `scale_deployment`: For capacity issues (high load, timeouts)
- `rollout_restart`: For deployment-wide issues
- `escalate`: For complex issues requiring human investigation

## Guidelines
1. Be specific about the root cause
2. Only recommend auto-fix actions for high-confidence (>0.8), reversible issues
3. Recommend escalation for disk issues, multi-service problems, or low confidence
4. Include clear reasoning for your conclusions
"#;

fn build_user_prompt(incident: &IncidentCandidate) -> String {
    let signals: Vec<serde_json::Value> = incident
        .signals
        .iter()
        .map(|s| {
            json!({
                "type": s.signal_type.as_str(),
                "name": s.name,
                "value": s.value.to_string(),
                "severity": s.severity.as_str(),
                "source": s.source,
            })
        })
        .collect();
    let signals_json =
        serde_json::to_string_pretty(&signals).unwrap_or_else(|_| "[]".to_string());

    format!(
        "## Incident Details\n\
         - **Type**: {}\n\
         - **Affected Resource**: {}\n\
         - **Namespace**: {}\n\
         - **Initial Confidence**: {:.2}\n\
         - **Severity**: {}\n\n\
         ## Signals Detected\n\
         ```json\n{signals_json}\n```\n",
        incident.incident_type,
        incident.source,
        incident.namespace,
        incident.confidence,
        incident.severity.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{Signal, SignalSeverity, SignalType};

    #[test]
    fn test_parse_bare_json() {
        let content = r#"{"root_cause": "Leak", "confidence": 0.9, "recommended_action": "restart_pod"}"#;
        let parsed = parse_content(content).expect("parses");
        assert_eq!(parsed.root_cause, "Leak");
        assert_eq!(parsed.recommended_action, "restart_pod");
        // Unspecified fields take their defaults.
        assert_eq!(parsed.rollback_guidance, "Monitor after action");
        assert!(parsed.evidence.is_empty());
    }

    #[test]
    fn test_parse_markdown_fenced_json() {
        let content = "Here is the analysis:\n```json\n{\"root_cause\": \"OOM\"}\n```\ndone";
        let parsed = parse_content(content).expect("parses");
        assert_eq!(parsed.root_cause, "OOM");
        assert_eq!(parsed.confidence, 0.5);
        assert_eq!(parsed.recommended_action, "escalate");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_content("the root cause is probably memory").is_err());
    }

    #[test]
    fn test_key_rotation_round_robin() {
        let client = LlmClient::new(LlmConfig {
            api_keys: vec!["k1".to_string(), "k2".to_string()],
            ..LlmConfig::default()
        });
        assert_eq!(client.next_key(), Some("k1"));
        assert_eq!(client.next_key(), Some("k2"));
        assert_eq!(client.next_key(), Some("k1"));
    }

    #[test]
    fn test_no_keys() {
        let client = LlmClient::new(LlmConfig {
            api_keys: Vec::new(),
            ..LlmConfig::default()
        });
        assert!(!client.has_keys());
        assert_eq!(client.next_key(), None);
    }

    #[test]
    fn test_user_prompt_includes_signal_details() {
        let mut incident = IncidentCandidate::new("INC-1", "memory_leak", "web-1", "prod");
        incident.add_signal(Signal::new(
            SignalType::Metric,
            "web-1",
            "prod",
            "high_memory",
            serde_json::json!(97.5),
            SignalSeverity::Critical,
        ));
        let prompt = build_user_prompt(&incident);
        assert!(prompt.contains("memory_leak"));
        assert!(prompt.contains("high_memory"));
        assert!(prompt.contains("**Namespace**: prod"));
    }
}
