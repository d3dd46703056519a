//! Chat-completion backends.
//!
//! - **[`OpenAIChat`]**: `POST /v1/chat/completions`; streams via
//!   server-sent events (`data: {...}` lines ending with `data: [DONE]`).
//! - **[`OllamaChat`]**: `POST /api/chat`; streams newline-delimited JSON
//!   objects, the last one carrying `"done": true`.
//!
//! Use [`create_generator`] to build the backend named in the config.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use essay_rag_core::generate::{AnswerGenerator, Prompt, TokenStream};

use crate::config::{env_secret, GenerationConfig};
use crate::http::{self, LineBuffer};

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the generator selected by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn required_model(config: &GenerationConfig) -> Result<String> {
    config.model.clone().ok_or_else(|| {
        anyhow::anyhow!("generation.model required for {} provider", config.provider)
    })
}

fn base_url(config: &GenerationConfig, default: &str) -> String {
    config
        .url
        .clone()
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// What one line of a streamed response means.
#[derive(Debug, PartialEq)]
enum LineEvent {
    Token(String),
    /// Final text chunk; the stream is complete after it.
    Last(String),
    Done,
    Skip,
}

/// Forward the lines of a response `body` through `parse` into a token stream.
///
/// A body that ends without a completion marker is reported as an error,
/// so a dropped connection is never mistaken for a finished answer.
fn line_stream<S, B, E>(body: S, parse: fn(&str) -> Result<LineEvent>) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<String>>(64);
    let mut body = Box::pin(body);

    tokio::spawn(async move {
        let mut lines = LineBuffer::new();
        loop {
            let (batch, ended) = match body.next().await {
                Some(Ok(bytes)) => (lines.push(bytes.as_ref()), false),
                Some(Err(e)) => {
                    let _ = tx.send(Err(anyhow::anyhow!("stream interrupted: {}", e))).await;
                    return;
                }
                None => (lines.finish().into_iter().collect::<Vec<_>>(), true),
            };
            for line in batch {
                match parse(&line) {
                    Ok(LineEvent::Token(text)) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(LineEvent::Last(text)) => {
                        let _ = tx.send(Ok(text)).await;
                        return;
                    }
                    Ok(LineEvent::Done) => return,
                    Ok(LineEvent::Skip) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            if ended {
                let _ = tx
                    .send(Err(anyhow::anyhow!("stream ended before completion")))
                    .await;
                return;
            }
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    temperature: f32,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            temperature: config.temperature,
            base_url: base_url(config, OPENAI_URL),
            api_key: env_secret(&config.api_key_env)?,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
            stream_client: http::streaming_client(config.timeout_secs)?,
        })
    }

    fn body(&self, prompt: &Prompt, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": prompt.messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(prompt, false);
        let response = http::send_with_retry(
            || self.client.post(&url).bearer_auth(&self.api_key).json(&body),
            self.max_retries,
            "OpenAI API",
        )
        .await?;
        let json: Value = response.json().await?;
        let content = parse_openai_completion(&json)?;
        debug!(model = %self.model, chars = content.len(), "chat completion");
        Ok(content)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(prompt, true);
        let response = http::send_with_retry(
            || {
                self.stream_client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            "OpenAI API",
        )
        .await?;
        Ok(line_stream(response.bytes_stream(), parse_openai_sse_line))
    }
}

fn parse_openai_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

fn parse_openai_sse_line(line: &str) -> Result<LineEvent> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` fields.
        return Ok(LineEvent::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }
    let json: Value = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("Invalid OpenAI stream chunk: {}", e))?;
    if let Some(err) = json.get("error") {
        bail!("OpenAI stream error: {}", err);
    }
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(LineEvent::Token(text.to_string())),
        _ => Ok(LineEvent::Skip),
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            temperature: config.temperature,
            url: base_url(config, OLLAMA_URL),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
            stream_client: http::streaming_client(config.timeout_secs)?,
        })
    }

    fn body(&self, prompt: &Prompt, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": prompt.messages,
            "stream": stream,
            "options": { "temperature": self.temperature },
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/api/chat", self.url);
        let body = self.body(prompt, false);
        let response = http::send_with_retry(
            || self.client.post(&url).json(&body),
            self.max_retries,
            "Ollama API",
        )
        .await?;
        let json: Value = response.json().await?;
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
    }

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
        let url = format!("{}/api/chat", self.url);
        let body = self.body(prompt, true);
        let response = http::send_with_retry(
            || self.stream_client.post(&url).json(&body),
            self.max_retries,
            "Ollama API",
        )
        .await?;
        Ok(line_stream(response.bytes_stream(), parse_ollama_line))
    }
}

fn parse_ollama_line(line: &str) -> Result<LineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let json: Value = serde_json::from_str(line)
        .map_err(|e| anyhow::anyhow!("Invalid Ollama stream chunk: {}", e))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama stream error: {}", err);
    }
    let text = json["message"]["content"].as_str().unwrap_or_default();
    if json["done"].as_bool().unwrap_or(false) {
        return Ok(if text.is_empty() {
            LineEvent::Done
        } else {
            LineEvent::Last(text.to_string())
        });
    }
    if text.is_empty() {
        Ok(LineEvent::Skip)
    } else {
        Ok(LineEvent::Token(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essay_rag_core::generate::{collect_tokens, PromptMessage};

    fn config(provider: &str, key_env: &str) -> GenerationConfig {
        GenerationConfig {
            provider: provider.into(),
            model: Some("gpt-4o-mini".into()),
            temperature: 0.0,
            url: None,
            api_key_env: key_env.into(),
            max_retries: 0,
            timeout_secs: 5,
            rewrite: "fast_path".into(),
        }
    }

    #[test]
    fn test_parse_completion() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Hi."}}]});
        assert_eq!(parse_openai_completion(&body).unwrap(), "Hi.");
        assert!(parse_openai_completion(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_openai_sse_line(r#"data: {"choices":[{"delta":{"content":"Gre"}}]}"#).unwrap(),
            LineEvent::Token("Gre".into())
        );
        assert_eq!(
            parse_openai_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            LineEvent::Skip
        );
        assert_eq!(parse_openai_sse_line("data: [DONE]").unwrap(), LineEvent::Done);
        assert_eq!(parse_openai_sse_line("").unwrap(), LineEvent::Skip);
        assert_eq!(parse_openai_sse_line(": keep-alive").unwrap(), LineEvent::Skip);
        assert!(parse_openai_sse_line("data: {not json").is_err());
        assert!(parse_openai_sse_line(r#"data: {"error":{"message":"overloaded"}}"#).is_err());
    }

    #[test]
    fn test_parse_ollama_lines() {
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#)
                .unwrap(),
            LineEvent::Token("Hel".into())
        );
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
                .unwrap(),
            LineEvent::Done
        );
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":"lo."},"done":true}"#)
                .unwrap(),
            LineEvent::Last("lo.".into())
        );
        assert!(parse_ollama_line(r#"{"error":"model not found"}"#).is_err());
    }

    fn body_of(chunks: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> = chunks
            .iter()
            .map(|c| Ok(c.as_bytes().to_vec()))
            .collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_line_stream_final_chunk_with_text() {
        let body = body_of(&[
            "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"mess",
            "age\":{\"content\":\"lo.\"},\"done\":true}\n",
        ]);
        let tokens = line_stream(body, parse_ollama_line);
        assert_eq!(collect_tokens(tokens).await.unwrap(), "Hello.");
    }

    #[tokio::test]
    async fn test_line_stream_without_marker_is_error() {
        let body = body_of(&["data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n"]);
        let tokens = line_stream(body, parse_openai_sse_line);
        let err = collect_tokens(tokens).await.unwrap_err();
        assert!(err.to_string().contains("ended before completion"));

        let body = body_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let tokens = line_stream(body, parse_openai_sse_line);
        assert_eq!(collect_tokens(tokens).await.unwrap(), "Hi");
    }

    /// Answer one HTTP request on a local port with `body`, then close.
    async fn serve_once(content_type: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_ollama_stream_keeps_text_of_final_chunk() {
        let url = serve_once(
            "application/x-ndjson",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n\
             {\"message\":{\"role\":\"assistant\",\"content\":\"lo.\"},\"done\":true}\n",
        )
        .await;
        let mut cfg = config("ollama", "UNUSED");
        cfg.url = Some(url);
        let chat = OllamaChat::new(&cfg).unwrap();

        let prompt = Prompt {
            messages: vec![PromptMessage::user("greet")],
        };
        let tokens = chat.stream(&prompt).await.unwrap();
        assert_eq!(collect_tokens(tokens).await.unwrap(), "Hello.");
    }

    #[test]
    fn test_request_body_carries_roles_and_temperature() {
        let chat = OllamaChat::new(&config("ollama", "UNUSED")).unwrap();
        let prompt = Prompt {
            messages: vec![PromptMessage::system("sys"), PromptMessage::user("q")],
        };
        let body = chat.body(&prompt, true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "q");
        assert_eq!(body["options"]["temperature"], 0.0);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_openai_requires_key() {
        let err = create_generator(&config("openai", "ESSAY_RAG_TEST_NO_SUCH_KEY"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("ESSAY_RAG_TEST_NO_SUCH_KEY"));
    }
}
