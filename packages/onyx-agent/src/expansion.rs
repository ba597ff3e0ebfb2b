use std::collections::HashSet;

use futures::future;

use crate::{
	AgentContext, AgentEvent, ChatMessage, EventSink, Model, QueryExpansionResult, Question,
	Result, RetrievedPassage, accumulate, prompts,
};

const STAGE: &str = "expansion";

/// Per-query results plus the deduplicated union of their passages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionOutcome {
	pub results: Vec<QueryExpansionResult>,
	pub passages: Vec<RetrievedPassage>,
}

/// Rewrites `question` into search queries, runs them concurrently and merges what they return.
///
/// With `expansions` supplied no rewriting call is made. The original question text always joins
/// the query set. The base search reports its queries under ordinal 0 and skips the audit trail.
pub async fn expand_and_retrieve(
	ctx: &AgentContext,
	events: &EventSink,
	question: &Question,
	expansions: Option<Vec<String>>,
	is_base_search: bool,
) -> Result<ExpansionOutcome> {
	ctx.ensure_active()?;

	if question.text.trim().is_empty() {
		return Ok(ExpansionOutcome::default());
	}

	let max_queries = ctx.cfg.agent.retrieval.max_expanded_queries as usize;
	let rewritten = match expansions {
		Some(expansions) => expansions,
		None => rewrite_queries(ctx, &question.text, max_queries).await?,
	};
	let queries = normalize_queries(rewritten, &question.text, max_queries);
	let ordinal = if is_base_search { 0 } else { question.id.ordinal };

	for (query_index, query) in queries.iter().enumerate() {
		events.emit(AgentEvent::SubQueryToken {
			level: question.id.level,
			ordinal,
			query_index,
			token: query.clone(),
		});
	}

	if !is_base_search
		&& let Err(err) = ctx.audit.record_sub_queries(ctx.session, question.id, &queries).await
	{
		tracing::warn!(error = %err, question = %question.id, "Failed to record sub-queries.");
	}

	let max_results = ctx.cfg.agent.retrieval.max_results_per_query;
	let searches = queries.iter().map(|query| search_query(ctx, query, max_results));
	let mut results = Vec::with_capacity(queries.len());

	for result in future::join_all(searches).await {
		results.push(result?);
	}

	let passages = accumulate::dedup_passages(
		results.iter().flat_map(|result| result.passages.iter().cloned()),
	);

	tracing::debug!(
		question = %question.id,
		query_count = results.len(),
		passage_count = passages.len(),
		"Expanded retrieval finished."
	);

	Ok(ExpansionOutcome { results, passages })
}

/// One search call with backend reranking disabled. Blank queries return nothing without a call.
pub async fn search_query(
	ctx: &AgentContext,
	query: &str,
	max_results: u32,
) -> Result<QueryExpansionResult> {
	ctx.ensure_active()?;

	if query.trim().is_empty() {
		return Ok(QueryExpansionResult {
			query: query.to_string(),
			passages: Vec::new(),
			stats: None,
		});
	}

	let passages = ctx
		.providers
		.search
		.search(&ctx.cfg.providers.search, query, &ctx.filters, false, max_results)
		.await
		.map_err(|err| crate::Error::upstream(STAGE, err))?;

	Ok(QueryExpansionResult { query: query.to_string(), passages, stats: None })
}

async fn rewrite_queries(
	ctx: &AgentContext,
	question: &str,
	max_queries: usize,
) -> Result<Vec<String>> {
	let messages = [
		ChatMessage::system(prompts::REWRITE_SYSTEM),
		ChatMessage::user(format!(
			"Write at most {max_queries} search queries for this question.\n\nQuestion:\n{question}"
		)),
	];
	let raw = ctx.invoke(Model::Fast, &messages, STAGE).await?;

	Ok(parse_lines(&raw))
}

/// Splits LLM output into trimmed lines, dropping blanks and list markers.
pub fn parse_lines(raw: &str) -> Vec<String> {
	raw.lines().map(strip_list_marker).filter(|line| !line.is_empty()).map(str::to_string).collect()
}

/// Caps rewritten queries at `max_queries`, then appends the original. Case-insensitive duplicates
/// and blanks are dropped.
pub fn normalize_queries(
	rewritten: Vec<String>,
	original: &str,
	max_queries: usize,
) -> Vec<String> {
	let mut out = Vec::new();
	let mut seen = HashSet::new();

	for query in rewritten {
		if out.len() >= max_queries {
			break;
		}

		push_query(&mut out, &mut seen, &query);
	}

	push_query(&mut out, &mut seen, original);

	out
}

pub(crate) fn strip_list_marker(line: &str) -> &str {
	let line = line.trim();
	let without_bullet = line.trim_start_matches(['-', '*', '•']).trim_start();

	if without_bullet.len() != line.len() {
		return without_bullet;
	}

	let digits = line.chars().take_while(char::is_ascii_digit).count();

	if digits > 0 {
		let rest = &line[digits..];

		if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
			return rest.trim_start();
		}
	}

	line
}

fn push_query(out: &mut Vec<String>, seen: &mut HashSet<String>, value: &str) {
	let trimmed = value.trim();

	if trimmed.is_empty() {
		return;
	}
	if seen.insert(trimmed.to_lowercase()) {
		out.push(trimmed.to_string());
	}
}
