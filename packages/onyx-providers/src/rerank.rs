use color_eyre::{Result, eyre};
use serde_json::Value;

use onyx_config::ProviderConfig;

use crate::Endpoint;

/// Scores `docs` against `query`; the result is aligned with `docs` by index.
pub async fn rerank(cfg: &ProviderConfig, query: &str, docs: &[String]) -> Result<Vec<f32>> {
	if docs.is_empty() {
		return Ok(Vec::new());
	}

	let endpoint = Endpoint {
		api_base: &cfg.api_base,
		path: &cfg.path,
		api_key: &cfg.api_key,
		timeout_ms: cfg.timeout_ms,
		default_headers: &cfg.default_headers,
	};
	let body = serde_json::json!({
		"model": cfg.model,
		"query": query,
		"documents": docs,
		"return_documents": false,
	});
	let json = endpoint.post_json(&body).await?;

	parse_rerank_response(&json, docs.len())
}

fn parse_rerank_response(json: &Value, doc_count: usize) -> Result<Vec<f32>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| eyre::eyre!("Rerank response is missing results array."))?;
	let mut scores: Vec<Option<f32>> = vec![None; doc_count];

	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| eyre::eyre!("Rerank result missing index."))? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| eyre::eyre!("Rerank result missing score."))? as f32;

		if let Some(slot) = scores.get_mut(index) {
			*slot = Some(score);
		}
	}

	if scores.iter().any(Option::is_none) {
		return Err(eyre::eyre!("Rerank response did not score every document."));
	}

	Ok(scores.into_iter().map(|score| score.unwrap_or_default()).collect())
}
