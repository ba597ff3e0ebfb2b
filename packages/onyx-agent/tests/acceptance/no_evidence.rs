use std::sync::Arc;

use onyx_agent::{
	AgentEvent, EventSink, Question, QuestionId, RunRequest, UNKNOWN_ANSWER, prompts, run,
	sub_answer::{self, SubAnswerInput},
};

use super::{
	OrderedRerank, ScriptedLlm, ScriptedSearch, context, count_marker, drain, plain_agent, text,
	total_calls,
};

#[tokio::test]
async fn sub_question_without_passages_answers_unknown() {
	let llm = Arc::new(
		ScriptedLlm::new()
			.on(prompts::DECOMPOSE_SYSTEM, text("What is the population of Atlantis?"))
			.on(prompts::REWRITE_SYSTEM, text("Atlantis population"))
			.on(prompts::SUB_ANSWER_SYSTEM, text("Millions."))
			.on(prompts::GRADE_SYSTEM, text("Yes"))
			.on(prompts::ANSWER_SYSTEM, text("Millions.")),
	);
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
	let (events, rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("Tell me about Atlantis."))
		.await
		.expect("run failed");
	let result = &state.sub_question_results()[0];

	assert_eq!(result.answer, UNKNOWN_ANSWER);
	assert!(!result.verified_high_quality);
	assert!(result.context_passages.is_empty());
	assert!(result.cited_passages.is_empty());
	assert_eq!(count_marker(&calls, prompts::SUB_ANSWER_SYSTEM), 0);
	assert_eq!(count_marker(&calls, prompts::GRADE_SYSTEM), 0);
	assert_eq!(count_marker(&calls, prompts::VERIFY_SYSTEM), 0);
	// Nothing to synthesize from, so the top-level answer is the sentinel too.
	assert_eq!(count_marker(&calls, prompts::ANSWER_SYSTEM), 0);
	assert_eq!(state.initial_answer(), Some(UNKNOWN_ANSWER));

	drop(events);

	let events = drain(rx);

	assert!(events.contains(&AgentEvent::SubAnswerToken {
		level: 0,
		ordinal: 1,
		token: UNKNOWN_ANSWER.to_string(),
	}));
}

#[tokio::test]
async fn empty_context_makes_no_llm_call() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::SUB_ANSWER_SYSTEM, text("Guess.")));
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let question = Question::sub_question(
		"Who discovered Atlantis?",
		QuestionId::new(0, 1),
		QuestionId::ROOT,
	);
	let result = sub_answer::generate_sub_answer(
		&ctx,
		&events,
		SubAnswerInput {
			question: &question,
			original_question: "Tell me about Atlantis.",
			verified_passages: Vec::new(),
			context_passages: Vec::new(),
			expanded_queries: Vec::new(),
			retrieval_stats: None,
		},
	)
	.await
	.expect("sub-answer failed");

	assert_eq!(result.answer, UNKNOWN_ANSWER);
	assert!(!result.verified_high_quality);
	assert_eq!(total_calls(&calls), 0);
}

#[tokio::test]
async fn grading_the_sentinel_makes_no_llm_call() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::GRADE_SYSTEM, text("Yes")));
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());

	assert!(!sub_answer::grade_answer(&ctx, "q", UNKNOWN_ANSWER).await.expect("grade failed"));
	assert!(!sub_answer::grade_answer(&ctx, "q", "   ").await.expect("grade failed"));
	assert!(sub_answer::grade_answer(&ctx, "q", "Paris.").await.expect("grade failed"));
	assert_eq!(total_calls(&calls), 1);
}
