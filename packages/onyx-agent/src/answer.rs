use onyx_tokens::available_budget;

use crate::{
	AgentContext, AgentEvent, ChatMessage, EventSink, Model, Question, Result, RetrievedPassage,
	StreamKind, SubQuestionAnswerResult, UNKNOWN_ANSWER, accumulate, context, prompts,
};

const STAGE: &str = "answer";
const DIRECT_STAGE: &str = "direct_answer";

/// Evidence for one answer synthesis.
#[derive(Debug, Clone, Copy)]
pub struct AnswerInput<'a> {
	pub question: &'a Question,
	/// 0 for the initial answer, 1 for the refined answer.
	pub level: u32,
	pub passages: &'a [RetrievedPassage],
	pub sub_answers: &'a [SubQuestionAnswerResult],
	/// Set when synthesizing the refined answer.
	pub initial_answer: Option<&'a str>,
}

/// Original-question passages merged with the context of every sub-answer, best scores first,
/// capped at `max_answer_context_docs`.
pub fn answer_context(
	ctx: &AgentContext,
	original: &[RetrievedPassage],
	sub_answers: &[SubQuestionAnswerResult],
) -> Vec<RetrievedPassage> {
	let mut passages =
		accumulate::merge_passages(original, &accumulate::sub_answer_evidence(sub_answers));

	passages.sort_by(|a, b| {
		let score = |p: &RetrievedPassage| p.relevance_score.map_or(f32::NEG_INFINITY, |s| s);

		score(b).total_cmp(&score(a))
	});
	passages.truncate(ctx.cfg.agent.answer.max_answer_context_docs as usize);

	passages
}

/// Streams an answer over documents and sub-answers as `AnswerToken` events.
///
/// With no documents and no informative sub-answer the result is `UNKNOWN_ANSWER` without an LLM
/// call.
pub async fn generate_answer(
	ctx: &AgentContext,
	events: &EventSink,
	input: AnswerInput<'_>,
) -> Result<String> {
	ctx.ensure_active()?;

	let level = input.level;
	let sub_answers = render_sub_answers(input.sub_answers);

	if input.passages.is_empty() && sub_answers.is_empty() {
		events.emit(AgentEvent::AnswerToken { level, token: UNKNOWN_ANSWER.to_string() });
		events.finish(StreamKind::Answer { level });

		return Ok(UNKNOWN_ANSWER.to_string());
	}

	let system = prompts::with_persona(prompts::ANSWER_SYSTEM, ctx.persona());
	let render = |documents: &str| {
		let mut user = format!("Question:\n{}", input.question.text);

		if !sub_answers.is_empty() {
			user.push_str(&format!("\n\nSub-question answers:\n{sub_answers}"));
		}
		if let Some(initial) = input.initial_answer {
			user.push_str(&format!("\n\nInitial answer to improve on:\n{initial}"));
		}

		format!("Documents:\n{documents}\n\n{user}")
	};
	let reserved = format!("{system}\n{}", render(""));
	let budget = available_budget(
		ctx.tokens.as_ref(),
		ctx.cfg.providers.llm_primary.max_input_tokens,
		&reserved,
		ctx.cfg.agent.answer.max_output_tokens,
	);
	let (documents, _) = context::format_context(ctx.tokens.as_ref(), input.passages, budget);
	let messages = [ChatMessage::system(system), ChatMessage::user(render(&documents))];
	let answer = ctx
		.stream(Model::Primary, &messages, STAGE, |token| {
			events.emit(AgentEvent::AnswerToken { level, token: token.to_string() });
		})
		.await?;

	events.finish(StreamKind::Answer { level });

	Ok(answer)
}

/// Answers without retrieval, for runs routed to `direct_llm_answer`.
pub async fn generate_direct_answer(
	ctx: &AgentContext,
	events: &EventSink,
	question: &Question,
) -> Result<String> {
	let system = prompts::with_persona(prompts::DIRECT_ANSWER_SYSTEM, ctx.persona());
	let messages = [ChatMessage::system(system), ChatMessage::user(question.text.clone())];
	let answer = ctx
		.stream(Model::Primary, &messages, DIRECT_STAGE, |token| {
			events.emit(AgentEvent::AnswerToken { level: 0, token: token.to_string() });
		})
		.await?;

	events.finish(StreamKind::Answer { level: 0 });

	Ok(answer)
}

fn render_sub_answers(results: &[SubQuestionAnswerResult]) -> String {
	let mut sorted: Vec<&SubQuestionAnswerResult> =
		results.iter().filter(|result| !result.is_unknown()).collect();

	sorted.sort_by_key(|result| result.question.id);

	sorted
		.iter()
		.map(|result| format!("Sub-question: {}\nAnswer: {}", result.question.text, result.answer))
		.collect::<Vec<_>>()
		.join("\n\n")
}
