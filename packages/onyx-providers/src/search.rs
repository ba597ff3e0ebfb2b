use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use onyx_config::SearchProviderConfig;

use crate::Endpoint;

/// Retrieval filters forwarded to the document index.
///
/// `access_control_list` carries the permission entries synced from source connectors; the index
/// only returns chunks readable by one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
	pub access_control_list: Option<Vec<String>>,
	#[serde(default)]
	pub source_types: Vec<String>,
	#[serde(default)]
	pub document_sets: Vec<String>,
	/// Unix seconds; older documents are excluded.
	pub time_cutoff: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest<'a> {
	pub query: &'a str,
	pub filters: &'a SearchFilters,
	pub rerank: bool,
	pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
	pub document_id: String,
	pub chunk_id: u32,
	pub content: String,
	pub score: Option<f32>,
	#[serde(default)]
	pub semantic_identifier: String,
	pub link: Option<String>,
	pub source_type: Option<String>,
	/// Unix seconds.
	pub updated_at: Option<i64>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
	#[serde(default)]
	results: Vec<SearchHit>,
}

pub async fn search(
	cfg: &SearchProviderConfig,
	req: &SearchRequest<'_>,
) -> Result<Vec<SearchHit>> {
	let endpoint = Endpoint {
		api_base: &cfg.api_base,
		path: &cfg.path,
		api_key: &cfg.api_key,
		timeout_ms: cfg.timeout_ms,
		default_headers: &cfg.default_headers,
	};
	let json = endpoint.post_json(req).await?;
	let mut hits = serde_json::from_value::<SearchResponse>(json)?.results;

	hits.truncate(req.limit as usize);

	Ok(hits)
}
