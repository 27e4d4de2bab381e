//! Generation runtime: prompt in, completion out
//!
//! The OpenAI client is created lazily on first use. A failed init (most
//! often a missing API key) leaves the slot empty so the next call tries
//! again. The slot's mutex is held across the backend call, which keeps at
//! most one generation in flight per runtime.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::LlmConfig;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(String),

    #[error("runtime not initialized")]
    NotInitialized,

    #[error("backend error: {0}")]
    Backend(#[from] OpenAIError),

    #[error("backend returned no completion")]
    EmptyCompletion,
}

#[async_trait]
pub trait GenerationRuntime: Send + Sync {
    /// Complete `prompt`. Deterministic for a given prompt when the backend is.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Initialize eagerly. Safe to call repeatedly.
    async fn warm_up(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    /// Release the backend. The next call initializes again.
    async fn shutdown(&self) {}
}

pub struct OpenAiRuntime {
    settings: LlmConfig,
    key_var: String,
    client: Mutex<Option<Client<OpenAIConfig>>>,
}

impl OpenAiRuntime {
    pub fn new(settings: LlmConfig) -> Self {
        Self::with_key_var(settings, API_KEY_VAR)
    }

    /// Read the API key from `key_var` instead of `OPENAI_API_KEY`.
    pub fn with_key_var(settings: LlmConfig, key_var: impl Into<String>) -> Self {
        Self {
            settings,
            key_var: key_var.into(),
            client: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub async fn is_initialized(&self) -> bool {
        self.client.lock().await.is_some()
    }

    fn ensure<'a>(
        &self,
        slot: &'a mut Option<Client<OpenAIConfig>>,
    ) -> Result<&'a Client<OpenAIConfig>, GenerationError> {
        if slot.is_none() {
            let api_key = std::env::var(&self.key_var)
                .map_err(|_| GenerationError::MissingCredentials(self.key_var.clone()))?;
            let mut openai = OpenAIConfig::new().with_api_key(api_key);
            if let Some(base) = &self.settings.api_base {
                openai = openai.with_api_base(base);
            }
            *slot = Some(Client::with_config(openai));
            tracing::info!(model = %self.settings.model, "Generation runtime initialized");
        }

        slot.as_ref().ok_or(GenerationError::NotInitialized)
    }
}

#[async_trait]
impl GenerationRuntime for OpenAiRuntime {
    #[tracing::instrument(skip(self, prompt), fields(model = %self.settings.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.settings.model.as_str())
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?,
            )])
            .temperature(self.settings.temperature)
            .max_completion_tokens(self.settings.max_tokens)
            .build()?;

        let response = client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(GenerationError::EmptyCompletion)?;

        tracing::debug!(completion_len = content.len(), "Completion received");
        Ok(content)
    }

    async fn warm_up(&self) -> Result<(), GenerationError> {
        let mut slot = self.client.lock().await;
        self.ensure(&mut slot).map(|_| ())
    }

    async fn shutdown(&self) {
        if self.client.lock().await.take().is_some() {
            tracing::info!("Generation runtime shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    fn unique_var() -> String {
        format!("EMPSQL_TEST_KEY_{}", uuid::Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn test_missing_key_leaves_runtime_uninitialized() {
        let var = unique_var();
        let runtime = OpenAiRuntime::with_key_var(LlmConfig::default(), var.clone());

        let err = runtime.complete("SQL Query:").await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingCredentials(ref v) if *v == var));
        assert!(!runtime.is_initialized().await);
    }

    #[tokio::test]
    async fn test_warm_up_retries_after_failure() {
        let var = unique_var();
        let runtime = OpenAiRuntime::with_key_var(LlmConfig::default(), var.clone());

        assert!(runtime.warm_up().await.is_err());

        std::env::set_var(&var, "sk-test");
        runtime.warm_up().await.unwrap();
        runtime.warm_up().await.unwrap();
        assert!(runtime.is_initialized().await);

        runtime.shutdown().await;
        assert!(!runtime.is_initialized().await);
        std::env::remove_var(&var);
    }

    const CANNED_COMPLETION: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"SELECT 1;"},"finish_reason":"stop"}]}"#;

    /// Read one HTTP request: headers, then `content-length` bytes of body.
    async fn read_request(stream: &mut TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + body_len {
                return Ok(());
            }
        }
    }

    #[tokio::test]
    async fn test_generations_never_overlap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let served = Arc::new(AtomicUsize::new(0));

        let backend = {
            let (active, peak, served) = (active.clone(), peak.clone(), served.clone());
            tokio::spawn(async move {
                loop {
                    let (mut stream, _) = listener.accept().await.unwrap();
                    let (active, peak, served) = (active.clone(), peak.clone(), served.clone());
                    tokio::spawn(async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);

                        read_request(&mut stream).await.unwrap();
                        tokio::time::sleep(Duration::from_millis(100)).await;

                        active.fetch_sub(1, Ordering::SeqCst);
                        served.fetch_add(1, Ordering::SeqCst);

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                             Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            CANNED_COMPLETION.len(),
                            CANNED_COMPLETION
                        );
                        stream.write_all(response.as_bytes()).await.unwrap();
                        stream.shutdown().await.ok();
                    });
                }
            })
        };

        let var = unique_var();
        std::env::set_var(&var, "sk-test");
        let settings = LlmConfig {
            api_base: Some(format!("http://{}/v1", addr)),
            ..LlmConfig::default()
        };
        let runtime = OpenAiRuntime::with_key_var(settings, var.clone());

        let (first, second) = tokio::join!(runtime.complete("first"), runtime.complete("second"));
        assert_eq!(first.unwrap(), "SELECT 1;");
        assert_eq!(second.unwrap(), "SELECT 1;");
        assert_eq!(served.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        backend.abort();
        std::env::remove_var(&var);
    }
}
