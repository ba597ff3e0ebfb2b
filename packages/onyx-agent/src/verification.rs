use futures::future;

use onyx_tokens::{available_budget, trim_to_budget};

use crate::{
	AgentContext, ChatMessage, Error, Model, Result, RetrievedPassage, is_affirmative, prompts,
};

const STAGE: &str = "verification";

/// Asks the fast model whether `passage` helps answer `question`.
///
/// An upstream failure drops the passage with a warning; only cancellation is returned as an error.
pub async fn verify_passage(
	ctx: &AgentContext,
	question: &str,
	passage: &RetrievedPassage,
) -> Result<bool> {
	ctx.ensure_active()?;

	let messages = build_messages(ctx, question, &passage.content);

	match ctx.invoke(Model::Fast, &messages, STAGE).await {
		Ok(response) => Ok(is_affirmative(&response)),
		Err(Error::Cancelled) => Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(
				error = %err,
				document_id = %passage.id.document_id,
				chunk_id = passage.id.chunk_id,
				"Verification failed; dropping passage."
			);

			Ok(false)
		},
	}
}

/// Verifies every passage concurrently. Survivors keep their retrieval order.
pub async fn verify_passages(
	ctx: &AgentContext,
	question: &str,
	passages: Vec<RetrievedPassage>,
) -> Result<Vec<RetrievedPassage>> {
	let verdicts =
		future::join_all(passages.iter().map(|passage| verify_passage(ctx, question, passage)))
			.await;
	let mut verified = Vec::new();

	for (passage, verdict) in passages.into_iter().zip(verdicts) {
		if verdict? {
			verified.push(passage);
		}
	}

	tracing::debug!(passage_count = verified.len(), "Verification finished.");

	Ok(verified)
}

pub(crate) fn build_messages(
	ctx: &AgentContext,
	question: &str,
	content: &str,
) -> Vec<ChatMessage> {
	let reserved = format!("{}\n{}", prompts::VERIFY_SYSTEM, render_user(question, ""));
	let budget = available_budget(
		ctx.tokens.as_ref(),
		ctx.cfg.providers.llm_fast.max_input_tokens,
		&reserved,
		0,
	);
	let document = trim_to_budget(ctx.tokens.as_ref(), content, budget);

	vec![
		ChatMessage::system(prompts::VERIFY_SYSTEM),
		ChatMessage::user(render_user(question, &document)),
	]
}

fn render_user(question: &str, document: &str) -> String {
	format!("Question:\n{question}\n\nDocument:\n{document}")
}
