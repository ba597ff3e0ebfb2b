pub mod accumulate;
pub mod answer;
pub mod audit;
pub mod compare;
pub mod context;
pub mod decomposition;
pub mod entities;
pub mod events;
pub mod expansion;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod prompts;
pub mod rerank;
pub mod routing;
pub mod state;
pub mod sub_answer;
pub mod verification;

mod error;

pub use audit::{AuditSink, NoopAuditSink, PgAuditSink, SessionKeys};
pub use error::{Error, Result};
pub use events::{AgentEvent, EventSink, StreamKind};
pub use models::{
	BranchResult, Entity, EntityRelationshipTermExtraction, FitScores, GENERIC_FAILURE_ANSWER,
	PassageId, PassageMetadata, QueryExpansionResult, Question, QuestionId, Relationship,
	RetrievalFitStats, RetrievedPassage, SubQuestionAnswerResult, Term, ToolChoice, UNKNOWN_ANSWER,
};
pub use onyx_providers::{
	llm::{ChatMessage, LlmChunk, Role},
	search::SearchFilters,
};
pub use orchestrator::{Node, RunRequest, run};
pub use policy::{DefaultPolicy, QualityPolicy};
pub use state::GraphRunState;

use std::{future::Future, pin::Pin, sync::Arc};

use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use onyx_config::{Config, LlmProviderConfig, ProviderConfig, SearchProviderConfig};
use onyx_providers::{llm, rerank as rerank_client, search};
use onyx_tokens::TokenCounter;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type LlmStream = BoxStream<'static, color_eyre::Result<LlmChunk>>;

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn invoke<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, color_eyre::Result<String>>;

	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, color_eyre::Result<LlmStream>>;
}

pub trait SearchProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a SearchProviderConfig,
		query: &'a str,
		filters: &'a SearchFilters,
		want_rerank: bool,
		max_results: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RetrievedPassage>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>>;
}

/// Runs a non-search tool picked by the upstream tool-selection step.
pub trait ToolExecutor
where
	Self: Send + Sync,
{
	fn run<'a>(&'a self, name: &'a str, arguments: &'a Value)
	-> BoxFuture<'a, color_eyre::Result<Value>>;
}

/// Which configured chat model a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
	Primary,
	Fast,
}

#[derive(Clone)]
pub struct Providers {
	pub llm: Arc<dyn LlmProvider>,
	pub search: Arc<dyn SearchProvider>,
	pub rerank: Arc<dyn RerankProvider>,
}
impl Providers {
	pub fn new(
		llm: Arc<dyn LlmProvider>,
		search: Arc<dyn SearchProvider>,
		rerank: Arc<dyn RerankProvider>,
	) -> Self {
		Self { llm, search, rerank }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { llm: provider.clone(), search: provider.clone(), rerank: provider }
	}
}

/// Everything a run needs, shared read-only by every stage and branch.
pub struct AgentContext {
	pub cfg: Config,
	pub providers: Providers,
	pub tokens: Arc<dyn TokenCounter>,
	pub audit: Arc<dyn AuditSink>,
	pub policy: Arc<dyn QualityPolicy>,
	pub tools: Option<Arc<dyn ToolExecutor>>,
	pub session: SessionKeys,
	pub filters: SearchFilters,
	pub history: String,
	pub cancel: CancellationToken,
}
impl AgentContext {
	pub fn new(cfg: Config, providers: Providers, tokens: Arc<dyn TokenCounter>) -> Self {
		Self {
			cfg,
			providers,
			tokens,
			audit: Arc::new(NoopAuditSink),
			policy: Arc::new(DefaultPolicy),
			tools: None,
			session: SessionKeys::new(),
			filters: SearchFilters::default(),
			history: String::new(),
			cancel: CancellationToken::new(),
		}
	}

	pub fn with_audit(mut self, audit: Arc<dyn AuditSink>, session: SessionKeys) -> Self {
		self.audit = audit;
		self.session = session;

		self
	}

	pub fn with_policy(mut self, policy: Arc<dyn QualityPolicy>) -> Self {
		self.policy = policy;

		self
	}

	pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
		self.tools = Some(tools);

		self
	}

	pub fn with_filters(mut self, filters: SearchFilters) -> Self {
		self.filters = filters;

		self
	}

	pub fn with_history(mut self, history: impl Into<String>) -> Self {
		self.history = history.into();

		self
	}

	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;

		self
	}

	pub fn llm_config(&self, model: Model) -> &LlmProviderConfig {
		match model {
			Model::Primary => &self.cfg.providers.llm_primary,
			Model::Fast => &self.cfg.providers.llm_fast,
		}
	}

	pub fn persona(&self) -> &str {
		self.cfg.agent.answer.persona.as_deref().unwrap_or_default()
	}

	pub(crate) fn ensure_active(&self) -> Result<()> {
		if self.cancel.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
	}

	pub(crate) async fn invoke(
		&self,
		model: Model,
		messages: &[ChatMessage],
		stage: &'static str,
	) -> Result<String> {
		self.ensure_active()?;

		self.providers
			.llm
			.invoke(self.llm_config(model), messages)
			.await
			.map_err(|err| Error::upstream(stage, err))
	}

	/// Streams a completion, handing each text chunk to `on_token` as it arrives.
	pub(crate) async fn stream<F>(
		&self,
		model: Model,
		messages: &[ChatMessage],
		stage: &'static str,
		mut on_token: F,
	) -> Result<String>
	where
		F: FnMut(&str),
	{
		self.ensure_active()?;

		let mut chunks = self
			.providers
			.llm
			.stream(self.llm_config(model), messages)
			.await
			.map_err(|err| Error::upstream(stage, err))?;
		let mut text = String::new();

		while let Some(chunk) = chunks.next().await {
			self.ensure_active()?;

			match chunk.map_err(|err| Error::upstream(stage, err))? {
				LlmChunk::Text(token) => {
					on_token(&token);
					text.push_str(&token);
				},
				LlmChunk::ToolCall { name, .. } => {
					tracing::debug!(stage, tool = %name, "Ignoring tool call chunk in answer stream.");
				},
			}
		}

		Ok(text)
	}
}

struct DefaultProviders;
impl LlmProvider for DefaultProviders {
	fn invoke<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(llm::invoke(cfg, messages))
	}

	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, color_eyre::Result<LlmStream>> {
		Box::pin(llm::stream(cfg, messages))
	}
}
impl SearchProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a SearchProviderConfig,
		query: &'a str,
		filters: &'a SearchFilters,
		want_rerank: bool,
		max_results: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RetrievedPassage>>> {
		Box::pin(async move {
			let request =
				search::SearchRequest { query, filters, rerank: want_rerank, limit: max_results };
			let hits = search::search(cfg, &request).await?;

			Ok(hits.into_iter().map(passage_from_hit).collect())
		})
	}
}
impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>> {
		Box::pin(rerank_client::rerank(cfg, query, docs))
	}
}

/// Verdict parsing shared by every yes/no judgment: affirmative iff the reply mentions "yes".
pub(crate) fn is_affirmative(response: &str) -> bool {
	response.to_lowercase().contains("yes")
}

fn passage_from_hit(hit: search::SearchHit) -> RetrievedPassage {
	RetrievedPassage {
		id: PassageId { document_id: hit.document_id, chunk_id: hit.chunk_id },
		content: hit.content,
		relevance_score: hit.score,
		metadata: PassageMetadata {
			semantic_identifier: hit.semantic_identifier,
			link: hit.link,
			source_type: hit.source_type,
			updated_at: hit.updated_at,
			extra: hit.metadata,
		},
	}
}
