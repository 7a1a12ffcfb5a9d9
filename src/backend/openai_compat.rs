//! OpenAI-chat-compatible backend (spec §6): `POST {base_url}/chat/completions`,
//! SSE streaming with `data:` frames terminated by `data: [DONE]`, bearer
//! auth, `GET {base_url}/models` health probe. Ported from the teacher's
//! `OpenAiProvider`, generalized to the canonical `Message` model and the
//! `ModelBackend` trait instead of the Anthropic-shaped `InferenceProvider`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::{CompletionChunk, CompletionRequest, CompletionResponse, FinishReason, ModelBackend};
use crate::error::InferenceError;
use crate::message::{Message, Role, ToolCallRequest};
use crate::types::Usage;

pub struct OpenAiCompatBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn convert_tools(tools: &[Value]) -> Vec<Value> {
        tools
            .iter()
            .filter_map(|tool| {
                let name = tool["name"].as_str()?;
                let description = tool.get("description").cloned().unwrap_or(Value::Null);
                let parameters = tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                Some(json!({
                    "type": "function",
                    "function": { "name": name, "description": description, "parameters": parameters },
                }))
            })
            .collect()
    }

    fn convert_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(sys) = system {
            out.push(json!({ "role": "system", "content": sys }));
        }
        for msg in messages {
            match msg.role {
                Role::System => out.push(json!({ "role": "system", "content": msg.content })),
                Role::User => out.push(json!({ "role": "user", "content": msg.content })),
                Role::Tool => out.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                })),
                Role::Assistant => {
                    let mut assistant_msg = json!({ "role": "assistant", "content": msg.content });
                    if !msg.tool_calls.is_empty() {
                        let calls: Vec<Value> = msg
                            .tool_calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": { "name": c.name, "arguments": c.args.to_string() },
                                })
                            })
                            .collect();
                        assistant_msg["tool_calls"] = Value::Array(calls);
                    }
                    out.push(assistant_msg);
                }
            }
        }
        out
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let messages = Self::convert_messages(request.system.as_deref(), &request.messages);
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&request.tools));
        }
        body
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        req
    }

    fn parse_finish_reason(raw: &str) -> FinishReason {
        match raw {
            "stop" => FinishReason::EndTurn,
            "tool_calls" => FinishReason::ToolCalls,
            "length" => FinishReason::MaxTokens,
            other => {
                debug!(finish_reason = %other, "unknown finish_reason, treating as end_turn");
                FinishReason::EndTurn
            }
        }
    }

    fn parse_tool_calls(value: &Value) -> Vec<ToolCallRequest> {
        value["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| {
                        let id = tc["id"].as_str().unwrap_or("").to_string();
                        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
                        let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
                        let args = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
                        ToolCallRequest { id, name, args }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, InferenceError> {
        let body = self.build_body(&request, false);
        let model = request.model.clone();

        let resp = self
            .request_builder("/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if status == 401 || status == 403 {
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
        let choice = &parsed["choices"][0];
        let finish_reason =
            Self::parse_finish_reason(choice["finish_reason"].as_str().unwrap_or("stop"));
        let message = &choice["message"];
        let content = message["content"].as_str().unwrap_or("").to_string();
        let tool_calls = Self::parse_tool_calls(message);

        let usage = Usage {
            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(CompletionResponse { content, tool_calls, usage, model, finish_reason })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::UnboundedReceiver<Result<CompletionChunk, InferenceError>>, InferenceError> {
        let body = self.build_body(&request, true);
        let resp = self
            .request_builder("/chat/completions")
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
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(CompletionChunk { is_final: true, ..Default::default() }));
                        return;
                    }

                    let parsed: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = tx.send(Err(InferenceError::Parse(e.to_string())));
                            continue;
                        }
                    };
                    let delta = &parsed["choices"][0]["delta"];
                    let content_delta = delta["content"].as_str().unwrap_or("").to_string();
                    let tool_calls_delta = Self::parse_tool_calls(delta);
                    let is_final = parsed["choices"][0]["finish_reason"].is_string();

                    let usage = parsed.get("usage").map(|u| Usage {
                        input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                        output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                    });

                    if tx
                        .send(Ok(CompletionChunk { content_delta, tool_calls_delta, is_final, usage }))
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> bool {
        let mut req = self.client.get(format!("{}/models", self.base_url));
        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                status == 200 || status == 401 || status == 403
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn converts_tool_result_message_to_tool_role() {
        let messages = vec![Message::tool_result("c1", "search", "result text", false)];
        let converted = OpenAiCompatBackend::convert_messages(None, &messages);
        assert_eq!(converted[0]["role"], "tool");
        assert_eq!(converted[0]["tool_call_id"], "c1");
    }

    #[test]
    fn converts_assistant_tool_calls() {
        let messages = vec![Message::assistant(
            "",
            vec![ToolCallRequest { id: "c1".into(), name: "search".into(), args: json!({"q": "x"}) }],
        )];
        let converted = OpenAiCompatBackend::convert_messages(None, &messages);
        assert_eq!(converted[0]["tool_calls"][0]["function"]["name"], "search");
    }

    #[test]
    fn finish_reason_maps_expected_values() {
        assert_eq!(OpenAiCompatBackend::parse_finish_reason("stop"), FinishReason::EndTurn);
        assert_eq!(OpenAiCompatBackend::parse_finish_reason("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(OpenAiCompatBackend::parse_finish_reason("length"), FinishReason::MaxTokens);
        assert_eq!(OpenAiCompatBackend::parse_finish_reason("weird"), FinishReason::EndTurn);
    }
}
