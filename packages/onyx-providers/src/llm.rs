use std::collections::VecDeque;

use color_eyre::{Result, eyre};
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use onyx_config::LlmProviderConfig;

use crate::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
	Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: Role::System, content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: Role::User, content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: Role::Assistant, content: content.into() }
	}
}

/// One piece of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmChunk {
	Text(String),
	ToolCall { name: String, arguments: String },
}

pub async fn invoke(cfg: &LlmProviderConfig, messages: &[ChatMessage]) -> Result<String> {
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let json = endpoint(cfg).post_json(&body).await?;

	parse_completion(&json)
}

pub async fn stream(
	cfg: &LlmProviderConfig,
	messages: &[ChatMessage],
) -> Result<BoxStream<'static, Result<LlmChunk>>> {
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
		"stream": true,
	});
	let res = endpoint(cfg).post(&body).await?;
	let bytes = res.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec())).boxed();
	let state = SseState { bytes, buffer: Vec::new(), pending: VecDeque::new(), done: false };

	Ok(futures::stream::unfold(state, next_chunk).boxed())
}

fn endpoint(cfg: &LlmProviderConfig) -> Endpoint<'_> {
	Endpoint {
		api_base: &cfg.api_base,
		path: &cfg.path,
		api_key: &cfg.api_key,
		timeout_ms: cfg.timeout_ms,
		default_headers: &cfg.default_headers,
	}
}

fn parse_completion(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|message| message.get("content"))
		.and_then(|content| content.as_str())
		.map(str::to_string)
		.ok_or_else(|| eyre::eyre!("Completion response is missing message content."))
}

struct SseState {
	bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
	buffer: Vec<u8>,
	pending: VecDeque<LlmChunk>,
	done: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
	Chunks(Vec<LlmChunk>),
	Done,
	Skip,
}

async fn next_chunk(mut state: SseState) -> Option<(Result<LlmChunk>, SseState)> {
	loop {
		if let Some(chunk) = state.pending.pop_front() {
			return Some((Ok(chunk), state));
		}
		if state.done {
			return None;
		}

		match state.bytes.next().await {
			Some(Ok(bytes)) => {
				state.buffer.extend_from_slice(&bytes);

				while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
					let line: Vec<u8> = state.buffer.drain(..=pos).collect();

					match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
						Ok(SseLine::Chunks(chunks)) => state.pending.extend(chunks),
						Ok(SseLine::Done) => {
							state.done = true;

							break;
						},
						Ok(SseLine::Skip) => {},
						Err(err) => {
							state.done = true;

							return Some((Err(err), state));
						},
					}
				}
			},
			Some(Err(err)) => {
				state.done = true;

				return Some((Err(err.into()), state));
			},
			None => {
				state.done = true;

				let rest = std::mem::take(&mut state.buffer);

				if let Ok(SseLine::Chunks(chunks)) =
					parse_sse_line(String::from_utf8_lossy(&rest).trim())
				{
					state.pending.extend(chunks);
				}
			},
		}
	}
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
	let Some(payload) = line.strip_prefix("data:") else {
		return Ok(SseLine::Skip);
	};
	let payload = payload.trim();

	if payload.is_empty() {
		return Ok(SseLine::Skip);
	}
	if payload == "[DONE]" {
		return Ok(SseLine::Done);
	}

	let json: Value = serde_json::from_str(payload)?;
	let Some(delta) = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("delta"))
	else {
		return Ok(SseLine::Skip);
	};
	let mut chunks = Vec::new();

	if let Some(text) = delta.get("content").and_then(|c| c.as_str())
		&& !text.is_empty()
	{
		chunks.push(LlmChunk::Text(text.to_string()));
	}
	if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
		for call in calls {
			let function = call.get("function");
			let name = function
				.and_then(|f| f.get("name"))
				.and_then(|n| n.as_str())
				.unwrap_or_default()
				.to_string();
			let arguments = function
				.and_then(|f| f.get("arguments"))
				.and_then(|a| a.as_str())
				.unwrap_or_default()
				.to_string();

			chunks.push(LlmChunk::ToolCall { name, arguments });
		}
	}

	Ok(SseLine::Chunks(chunks))
}
