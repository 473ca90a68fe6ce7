//! Text-generation seam
//!
//! The engine never talks to a model directly; it goes through the
//! [`TextGenerator`] trait. Production uses [`HttpGenerator`], a blocking
//! client for any OpenAI-compatible chat-completions endpoint. Tests use
//! [`CannedGenerator`] with fixed responses, so tree advancement and
//! evaluation are testable without network calls.

use crate::config::GeneratorConfig;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// One chat message, role in {system, user, assistant}
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Error type for generation calls
#[derive(Debug)]
pub enum GenError {
    MissingApiKey(String),
    Http(String),
    BadResponse(String),
}

impl std::fmt::Display for GenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenError::MissingApiKey(var) => {
                write!(f, "API key not set (expected env var {})", var)
            }
            GenError::Http(msg) => write!(f, "HTTP error: {}", msg),
            GenError::BadResponse(msg) => write!(f, "Unexpected response shape: {}", msg),
        }
    }
}

impl std::error::Error for GenError {}

impl From<GenError> for crate::error::EngineError {
    fn from(e: GenError) -> Self {
        crate::error::EngineError::Generation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GenError>;

/// `generate(messages) -> text`. No streaming; the response is one string
/// that may or may not contain embedded JSON.
pub trait TextGenerator {
    fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

// ============================================================================
// Production implementation
// ============================================================================

/// Blocking client for an OpenAI-compatible /chat/completions endpoint
pub struct HttpGenerator {
    config: GeneratorConfig,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenError::MissingApiKey(self.config.api_key_env.clone()))
    }
}

impl TextGenerator for HttpGenerator {
    fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let key = self.api_key()?;
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));

        let response = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", key))
            .set("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send_json(serde_json::json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
            }))
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => GenError::Http(format!(
                    "{} from {}: {}",
                    code,
                    url,
                    resp.into_string().unwrap_or_default()
                )),
                ureq::Error::Transport(t) => GenError::Http(t.to_string()),
            })?;

        let body: serde_json::Value = response
            .into_json()
            .map_err(|e| GenError::BadResponse(e.to_string()))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                GenError::BadResponse("missing choices[0].message.content".to_string())
            })
    }
}

// ============================================================================
// Test implementation
// ============================================================================

/// Deterministic generator returning queued canned responses in order.
/// Records every prompt it receives so tests can assert on prompt content
/// and call counts.
#[derive(Default)]
pub struct CannedGenerator {
    responses: Mutex<std::collections::VecDeque<String>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl CannedGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of generate() calls made so far
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Flattened content of the most recent prompt
    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok().and_then(|p| {
            p.last().map(|messages| {
                messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        })
    }
}

impl TextGenerator for CannedGenerator {
    fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| GenError::BadResponse("no canned response queued".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_generator_in_order() {
        let gen = CannedGenerator::new(vec!["first", "second"]);
        let msgs = [ChatMessage::user("hello")];
        assert_eq!(gen.generate(&msgs).unwrap(), "first");
        assert_eq!(gen.generate(&msgs).unwrap(), "second");
        assert!(gen.generate(&msgs).is_err());
        assert_eq!(gen.calls(), 3);
    }

    #[test]
    fn test_canned_generator_records_prompts() {
        let gen = CannedGenerator::new(vec!["ok"]);
        gen.generate(&[
            ChatMessage::system("you are ATC"),
            ChatMessage::user("ratio 0.75"),
        ])
        .unwrap();
        let prompt = gen.last_prompt().unwrap();
        assert!(prompt.contains("you are ATC"));
        assert!(prompt.contains("ratio 0.75"));
    }

    #[test]
    fn test_missing_api_key() {
        let config = GeneratorConfig {
            api_key_env: "CHECKRIDE_TEST_KEY_THAT_IS_UNSET".to_string(),
            ..GeneratorConfig::default()
        };
        let gen = HttpGenerator::new(config);
        assert!(matches!(
            gen.generate(&[ChatMessage::user("x")]),
            Err(GenError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_chat_message_serializes() {
        let msg = ChatMessage::system("hold short");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("\"content\":\"hold short\""));
    }
}
