//! Anthropic Messages API backend (spec §4.H secondary backend). Ported from
//! the teacher's `AnthropicProvider`, adapted from the Anthropic-shaped
//! `InferenceRequest`/`InferenceResponse` to the canonical `Message` model so
//! it can sit behind the same `ModelBackend` trait as the OpenAI-compatible
//! backend. See DESIGN.md for why both backends are kept.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{CompletionChunk, CompletionRequest, CompletionResponse, FinishReason, ModelBackend};
use crate::error::InferenceError;
use crate::message::{Message, Role, ToolCallRequest};
use crate::types::Usage;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    name: String,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Converts the canonical history into Anthropic's message array, folding
    /// tool results into `user` turns carrying `tool_result` content blocks
    /// (Anthropic has no dedicated `tool` role).
    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        let mut out: Vec<Value> = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => continue,
                Role::User => out.push(json!({ "role": "user", "content": msg.content })),
                Role::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": msg.content }));
                    }
                    for call in &msg.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.args,
                        }));
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
                Role::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id,
                        "content": msg.content,
                        "is_error": msg.is_error(),
                    });
                    match out.last_mut() {
                        Some(last) if last["role"] == "user" && last["content"].is_array() => {
                            last["content"].as_array_mut().unwrap().push(block);
                        }
                        _ => out.push(json!({ "role": "user", "content": [block] })),
                    }
                }
            }
        }
        out
    }

    fn convert_tools(tools: &[Value]) -> Vec<Value> {
        tools.to_vec()
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": Self::convert_messages(&request.messages),
            "stream": stream,
        });
        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&request.tools));
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
    }

    fn parse_content(parsed: &Value) -> (String, Vec<ToolCallRequest>) {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed["content"].as_array().cloned().unwrap_or_default() {
            match block["type"].as_str() {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or("")),
                Some("tool_use") => tool_calls.push(ToolCallRequest {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    args: block["input"].clone(),
                }),
                _ => {}
            }
        }
        (text, tool_calls)
    }

    fn parse_finish_reason(raw: &str) -> FinishReason {
        match raw {
            "end_turn" | "stop_sequence" => FinishReason::EndTurn,
            "tool_use" => FinishReason::ToolCalls,
            "max_tokens" => FinishReason::MaxTokens,
            _ => FinishReason::EndTurn,
        }
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, InferenceError> {
        let body = self.build_body(&request, false);
        let model = request.model.clone();

        let resp = self
            .request_builder("/v1/messages")
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if status == 401 {
            return Err(InferenceError::Authentication(crate::error::AuthenticationError(text)));
        }
        if status == 429 {
            return Err(InferenceError::RateLimit(crate::error::RateLimitError { retry_after: None }));
        }
        if status != 200 {
            return Err(InferenceError::ApiError { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| InferenceError::Parse(e.to_string()))?;
        let (content, tool_calls) = Self::parse_content(&parsed);
        let finish_reason =
            Self::parse_finish_reason(parsed["stop_reason"].as_str().unwrap_or("end_turn"));
        let usage = Usage {
            input_tokens: parsed["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: parsed["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(CompletionResponse { content, tool_calls, usage, model, finish_reason })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::UnboundedReceiver<Result<CompletionChunk, InferenceError>>, InferenceError> {
        let body = self.build_body(&request, true);
        let resp = self
            .request_builder("/v1/messages")
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(InferenceError::ApiError { status, body: text });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(InferenceError::Request(e.to_string())));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let parsed: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = tx.send(Err(InferenceError::Parse(e.to_string())));
                            continue;
                        }
                    };

                    match parsed["type"].as_str() {
                        Some("content_block_delta") => {
                            let delta = &parsed["delta"];
                            let content_delta =
                                delta["text"].as_str().unwrap_or("").to_string();
                            if tx
                                .send(Ok(CompletionChunk { content_delta, ..Default::default() }))
                                .is_err()
                            {
                                return;
                            }
                        }
                        Some("message_delta") => {
                            let usage = parsed.get("usage").map(|u| Usage {
                                input_tokens: 0,
                                output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
                            });
                            if tx.send(Ok(CompletionChunk { usage, ..Default::default() })).is_err() {
                                return;
                            }
                        }
                        Some("message_stop") => {
                            let _ = tx.send(Ok(CompletionChunk { is_final: true, ..Default::default() }));
                            return;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> bool {
        match self
            .request_builder("/v1/messages")
            .json(&json!({ "model": "claude-3-haiku-20240307", "max_tokens": 1, "messages": [] }))
            .send()
            .await
        {
            Ok(resp) => {
                let status = resp.status().as_u16();
                status == 200 || status == 400 || status == 401
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_tool_result_into_preceding_user_turn() {
        let messages = vec![
            Message::assistant(
                "",
                vec![ToolCallRequest { id: "c1".into(), name: "search".into(), args: json!({}) }],
            ),
            Message::tool_result("c1", "search", "found it", false),
        ];
        let converted = AnthropicBackend::convert_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1]["role"], "user");
        assert_eq!(converted[1]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn finish_reason_maps_expected_values() {
        assert_eq!(AnthropicBackend::parse_finish_reason("end_turn"), FinishReason::EndTurn);
        assert_eq!(AnthropicBackend::parse_finish_reason("tool_use"), FinishReason::ToolCalls);
        assert_eq!(AnthropicBackend::parse_finish_reason("max_tokens"), FinishReason::MaxTokens);
    }
}
