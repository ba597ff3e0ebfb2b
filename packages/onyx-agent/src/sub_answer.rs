use onyx_tokens::available_budget;

use crate::{
	AgentContext, AgentEvent, ChatMessage, Error, EventSink, Model, QueryExpansionResult, Question,
	Result, RetrievalFitStats, RetrievedPassage, StreamKind, SubQuestionAnswerResult, UNKNOWN_ANSWER,
	context, is_affirmative, prompts,
};

const STAGE: &str = "sub_answer";
const GRADE_STAGE: &str = "sub_answer_grade";

/// Evidence gathered for one sub-question by the branch that answers it.
#[derive(Debug, Clone)]
pub struct SubAnswerInput<'a> {
	pub question: &'a Question,
	pub original_question: &'a str,
	pub verified_passages: Vec<RetrievedPassage>,
	/// Verified passages after reranking and truncation.
	pub context_passages: Vec<RetrievedPassage>,
	pub expanded_queries: Vec<QueryExpansionResult>,
	pub retrieval_stats: Option<RetrievalFitStats>,
}

/// Streams an answer for one sub-question and grades it.
///
/// Without context passages the answer is `UNKNOWN_ANSWER`, graded low quality, and no LLM call is
/// made. Grading failures count as low quality.
pub async fn generate_sub_answer(
	ctx: &AgentContext,
	events: &EventSink,
	input: SubAnswerInput<'_>,
) -> Result<SubQuestionAnswerResult> {
	ctx.ensure_active()?;

	let SubAnswerInput {
		question,
		original_question,
		verified_passages,
		context_passages,
		expanded_queries,
		retrieval_stats,
	} = input;
	let (level, ordinal) = (question.id.level, question.id.ordinal);

	if context_passages.is_empty() {
		events.emit(AgentEvent::SubAnswerToken { level, ordinal, token: UNKNOWN_ANSWER.to_string() });
		events.finish(StreamKind::SubAnswer { level, ordinal });

		return Ok(SubQuestionAnswerResult {
			question: question.clone(),
			answer: UNKNOWN_ANSWER.to_string(),
			verified_high_quality: false,
			verified_passages,
			context_passages,
			cited_passages: Vec::new(),
			expanded_queries,
			retrieval_stats,
		});
	}

	let system = prompts::with_persona(prompts::SUB_ANSWER_SYSTEM, ctx.persona());
	let reserved = format!("{system}\n{}", render_user(&question.text, original_question, ""));
	let budget = available_budget(
		ctx.tokens.as_ref(),
		ctx.cfg.providers.llm_primary.max_input_tokens,
		&reserved,
		ctx.cfg.agent.answer.max_output_tokens,
	);
	let (documents, _) = context::format_context(ctx.tokens.as_ref(), &context_passages, budget);
	let messages = [
		ChatMessage::system(system),
		ChatMessage::user(render_user(&question.text, original_question, &documents)),
	];
	let answer = ctx
		.stream(Model::Primary, &messages, STAGE, |token| {
			events.emit(AgentEvent::SubAnswerToken { level, ordinal, token: token.to_string() });
		})
		.await?;

	events.finish(StreamKind::SubAnswer { level, ordinal });

	let verified_high_quality = grade_answer(ctx, &question.text, &answer).await?;
	let cited_passages = context::cited_passages(&answer, &context_passages);

	Ok(SubQuestionAnswerResult {
		question: question.clone(),
		answer,
		verified_high_quality,
		verified_passages,
		context_passages,
		cited_passages,
		expanded_queries,
		retrieval_stats,
	})
}

/// Yes/no quality check on a sub-answer. The unknown sentinel grades false without a call.
pub async fn grade_answer(ctx: &AgentContext, question: &str, answer: &str) -> Result<bool> {
	if answer.trim().is_empty() || answer == UNKNOWN_ANSWER {
		return Ok(false);
	}

	let messages = [
		ChatMessage::system(prompts::GRADE_SYSTEM),
		ChatMessage::user(format!("Question:\n{question}\n\nProposed answer:\n{answer}")),
	];

	match ctx.invoke(Model::Fast, &messages, GRADE_STAGE).await {
		Ok(response) => Ok(is_affirmative(&response)),
		Err(Error::Cancelled) => Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Sub-answer grading failed; marking answer low quality.");

			Ok(false)
		},
	}
}

fn render_user(sub_question: &str, original_question: &str, documents: &str) -> String {
	format!(
		"Documents:\n{documents}\n\nSub-question:\n{sub_question}\n\nIt is part of answering:\n{original_question}"
	)
}
