use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub providers: Providers,
	#[serde(default)]
	pub storage: Storage,
	#[serde(default)]
	pub tokens: Tokens,
	#[serde(default)]
	pub agent: Agent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
	pub postgres: Option<Postgres>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub llm_primary: LlmProviderConfig,
	pub llm_fast: LlmProviderConfig,
	pub rerank: Option<ProviderConfig>,
	pub search: SearchProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	/// Context window of the model, prompt and completion included.
	pub max_input_tokens: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tokens {
	/// Hugging Face repository of the tokenizer used for prompt budgeting. Word boundaries are
	/// counted when unset.
	pub tokenizer_repo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Agent {
	pub allow_refinement: bool,
	pub exploratory_search: bool,
	pub retrieval: AgentRetrieval,
	pub rerank: AgentRerank,
	pub answer: AgentAnswer,
}
impl Default for Agent {
	fn default() -> Self {
		Self {
			allow_refinement: true,
			exploratory_search: true,
			retrieval: AgentRetrieval::default(),
			rerank: AgentRerank::default(),
			answer: AgentAnswer::default(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentRetrieval {
	pub max_results_per_query: u32,
	pub max_expanded_queries: u32,
	pub exploratory_max_results: u32,
}
impl Default for AgentRetrieval {
	fn default() -> Self {
		Self { max_results_per_query: 15, max_expanded_queries: 3, exploratory_max_results: 10 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentRerank {
	/// Upper bound on passages kept after reranking.
	pub max_results: u32,
	pub min_docs: u32,
	pub compute_stats: bool,
}
impl Default for AgentRerank {
	fn default() -> Self {
		Self { max_results: 50, min_docs: 1, compute_stats: true }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentAnswer {
	pub max_answer_context_docs: u32,
	/// Tokens held back from the input budget for the completion.
	pub max_output_tokens: u32,
	pub persona: Option<String>,
}
impl Default for AgentAnswer {
	fn default() -> Self {
		Self { max_answer_context_docs: 10, max_output_tokens: 1_024, persona: None }
	}
}
