use crate::{AgentContext, Error, FitScores, Result, RetrievalFitStats, RetrievedPassage};

const STAGE: &str = "rerank";
const RANK_SHIFT_WINDOW: usize = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RerankOutcome {
	pub passages: Vec<RetrievedPassage>,
	pub stats: Option<RetrievalFitStats>,
}

/// Re-scores verified passages with the configured rerank model and truncates the list.
///
/// Empty and singleton lists, lists under `min_docs`, and runs without a rerank provider pass
/// through unchanged before truncation. A rerank backend failure is returned to the caller.
pub async fn rerank_passages(
	ctx: &AgentContext,
	question: &str,
	verified: Vec<RetrievedPassage>,
) -> Result<RerankOutcome> {
	ctx.ensure_active()?;

	let cfg = &ctx.cfg.agent.rerank;
	let max_results = cfg.max_results as usize;
	let mut passages = verified.clone();

	if let Some(provider_cfg) = ctx.cfg.providers.rerank.as_ref()
		&& passages.len() > 1
		&& passages.len() >= cfg.min_docs as usize
		&& max_results > 0
	{
		let docs: Vec<String> = passages.iter().map(|passage| passage.content.clone()).collect();
		let scores = ctx
			.providers
			.rerank
			.rerank(provider_cfg, question, &docs)
			.await
			.map_err(|err| Error::upstream(STAGE, err))?;

		if scores.len() != passages.len() {
			return Err(Error::upstream(
				STAGE,
				format!("expected {} scores, got {}", passages.len(), scores.len()),
			));
		}

		for (passage, score) in passages.iter_mut().zip(scores) {
			passage.relevance_score = Some(score);
		}

		passages.sort_by(|a, b| score_of(b).total_cmp(&score_of(a)));
	}

	passages.truncate(max_results);

	let stats = (cfg.compute_stats && !verified.is_empty())
		.then(|| retrieval_fit_stats(&verified, &passages));

	Ok(RerankOutcome { passages, stats })
}

/// `top_k` is the sum of the first `k` scores divided by `k`; missing scores count as zero.
pub fn fit_scores(passages: &[RetrievedPassage]) -> FitScores {
	let top = |k: usize| passages.iter().take(k).map(score_of).sum::<f64>() / k as f64;
	let (top_1, top_5, top_10) = (top(1), top(5), top(10));

	FitScores { top_1, top_5, top_10, fit_score: (top_1 + top_5 + top_10) / 3.0 }
}

pub fn retrieval_fit_stats(
	pre: &[RetrievedPassage],
	post: &[RetrievedPassage],
) -> RetrievalFitStats {
	let initial = fit_scores(pre);
	let reranked = fit_scores(post);
	let fit_score_lift =
		(initial.fit_score != 0.0).then(|| reranked.fit_score / initial.fit_score);

	RetrievalFitStats { fit_score_lift, rerank_effect: rerank_effect(pre, post), initial, reranked }
}

/// Mean rank displacement over the first twenty pre-rerank passages.
///
/// Each passage contributes `|r1 - r2| / ln(1 + r1 * r2)` with 1-based ranks. Passages missing from
/// `post` take `post.len()` as their rank; a non-positive denominator contributes zero.
pub fn rerank_effect(pre: &[RetrievedPassage], post: &[RetrievedPassage]) -> f64 {
	let window = pre.len().min(RANK_SHIFT_WINDOW);

	if window == 0 {
		return 0.0;
	}

	let total: f64 = pre
		.iter()
		.take(window)
		.enumerate()
		.map(|(idx, passage)| {
			let r1 = (idx + 1) as f64;
			let r2 = post
				.iter()
				.position(|other| other.id == passage.id)
				.map_or(post.len(), |pos| pos + 1) as f64;
			let denominator = (1.0 + r1 * r2).ln();

			if denominator > 0.0 { (r1 - r2).abs() / denominator } else { 0.0 }
		})
		.sum();

	total / window as f64
}

fn score_of(passage: &RetrievedPassage) -> f64 {
	passage.relevance_score.map_or(0.0, f64::from)
}
