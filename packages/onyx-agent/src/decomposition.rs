use onyx_tokens::available_budget;

use crate::{
	AgentContext, AgentEvent, ChatMessage, EntityRelationshipTermExtraction, Error, EventSink,
	Model, Question, QuestionId, Result, RetrievedPassage, StreamKind, SubQuestionAnswerResult,
	context, entities, expansion, prompts,
};

const STAGE: &str = "decomposition";

/// Everything the refinement round knows when it asks for new sub-questions.
#[derive(Debug, Clone, Copy)]
pub struct RefinedDecompositionInput<'a> {
	pub question: &'a Question,
	pub initial_answer: &'a str,
	pub extraction: &'a EntityRelationshipTermExtraction,
	pub answered: &'a [SubQuestionAnswerResult],
}

/// First-round decomposition at level 0. `exploratory` passages, when present, give the model a
/// feel for what the index holds.
pub async fn decompose_initial(
	ctx: &AgentContext,
	events: &EventSink,
	question: &Question,
	exploratory: &[RetrievedPassage],
) -> Result<Vec<Question>> {
	let mut user = format!("Question:\n{}", question.text);

	if !ctx.history.trim().is_empty() {
		user = format!("Conversation so far:\n{}\n\n{user}", ctx.history);
	}

	let reserved = format!("{}\n{user}", prompts::DECOMPOSE_SYSTEM);
	let budget = available_budget(
		ctx.tokens.as_ref(),
		ctx.cfg.providers.llm_primary.max_input_tokens,
		&reserved,
		ctx.cfg.agent.answer.max_output_tokens,
	);
	let (sample, numbered) = context::format_context(ctx.tokens.as_ref(), exploratory, budget);

	if numbered > 0 {
		user = format!("Sample documents from the index:\n{sample}\n\n{user}");
	}

	let messages = [ChatMessage::system(prompts::DECOMPOSE_SYSTEM), ChatMessage::user(user)];

	decompose(ctx, events, question, 0, &messages).await
}

/// Refinement-round decomposition at level 1.
pub async fn decompose_refined(
	ctx: &AgentContext,
	events: &EventSink,
	input: RefinedDecompositionInput<'_>,
) -> Result<Vec<Question>> {
	let (good, weak): (Vec<_>, Vec<_>) = input
		.answered
		.iter()
		.partition(|result| result.verified_high_quality && !result.is_unknown());
	let list = |results: Vec<&SubQuestionAnswerResult>| {
		if results.is_empty() {
			"(none)".to_string()
		} else {
			let lines: Vec<String> =
				results.iter().map(|result| format!("- {}", result.question.text)).collect();

			lines.join("\n")
		}
	};
	let mut user = format!(
		"Question:\n{}\n\nInitial answer:\n{}\n\nExtracted entities, relationships and terms:\n{}\n\n\
Sub-questions answered well:\n{}\n\nSub-questions answered poorly:\n{}",
		input.question.text,
		input.initial_answer,
		entities::format_extraction(input.extraction),
		list(good),
		list(weak),
	);

	if !ctx.history.trim().is_empty() {
		user = format!("Conversation so far:\n{}\n\n{user}", ctx.history);
	}

	let messages = [ChatMessage::system(prompts::REFINED_DECOMPOSE_SYSTEM), ChatMessage::user(user)];

	decompose(ctx, events, input.question, 1, &messages).await
}

/// Turns the decomposition text into questions `(level, 1..)` parented to `parent`.
pub fn parse_sub_questions(raw: &str, level: u32, parent: QuestionId) -> Vec<Question> {
	expansion::parse_lines(raw)
		.into_iter()
		.enumerate()
		.map(|(idx, text)| Question::sub_question(text, QuestionId::new(level, idx as u32 + 1), parent))
		.collect()
}

async fn decompose(
	ctx: &AgentContext,
	events: &EventSink,
	question: &Question,
	level: u32,
	messages: &[ChatMessage],
) -> Result<Vec<Question>> {
	let streamed = ctx
		.stream(Model::Primary, messages, STAGE, |token| {
			events.emit(AgentEvent::SubQuestionToken { level, token: token.to_string() });
		})
		.await;
	let raw = match streamed {
		Ok(raw) => raw,
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			events.finish(StreamKind::SubQuestions { level });

			return Err(err);
		},
	};

	events.finish(StreamKind::SubQuestions { level });

	let questions = parse_sub_questions(&raw, level, question.id);

	tracing::debug!(level, sub_question_count = questions.len(), "Decomposition finished.");

	if !questions.is_empty()
		&& let Err(err) = ctx.audit.record_sub_questions(ctx.session, &questions).await
	{
		tracing::warn!(error = %err, level, "Failed to record sub-questions.");
	}

	Ok(questions)
}
