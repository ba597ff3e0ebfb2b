use std::sync::Arc;

use onyx_agent::{
	BranchResult, EventSink, Question, QuestionId, RunRequest, orchestrator, prompts, run,
};

use super::{
	Hits, OrderedRerank, ScriptedLlm, ScriptedSearch, context, count_marker, passage, plain_agent,
	text, total_calls,
};

fn paris_search() -> ScriptedSearch {
	ScriptedSearch::new().on(
		"paris",
		Hits::Passages(vec![passage("paris.md", "Paris is the capital of France.", 0.9)]),
	)
}

fn llm_with_decomposition(decomposition: &str) -> ScriptedLlm {
	ScriptedLlm::new()
		.on(prompts::DECOMPOSE_SYSTEM, text(decomposition))
		.on(prompts::REWRITE_SYSTEM, text(""))
		.on(prompts::VERIFY_SYSTEM, text("Yes"))
		.on(prompts::SUB_ANSWER_SYSTEM, text("Paris [D1]."))
		.on(prompts::GRADE_SYSTEM, text("Yes"))
		.on(prompts::ANSWER_SYSTEM, text("Paris [D1]."))
}

#[tokio::test]
async fn no_sub_questions_still_reports_one_fan_in_result() {
	let llm = Arc::new(llm_with_decomposition(""));
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, paris_search(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let state =
		run(&ctx, &events, RunRequest::search("Is Paris in France?")).await.expect("run failed");

	assert!(state.sub_questions().is_empty());
	assert!(state.sub_question_results().is_empty());
	assert_eq!(state.rounds()[0].received, 1);
	assert_eq!(state.rounds()[0].answered, 0);
	assert_eq!(count_marker(&calls, prompts::SUB_ANSWER_SYSTEM), 0);
	// The answer still draws on the original question's documents.
	assert_eq!(state.original_passages().len(), 1);
	assert_eq!(state.initial_answer(), Some("Paris [D1]."));
}

#[tokio::test]
async fn every_sub_question_gets_its_own_branch() {
	let llm = Arc::new(llm_with_decomposition(
		"1. Where is Paris?\n2. How big is Paris?\n3. How old is Paris?",
	));
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, paris_search(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let state =
		run(&ctx, &events, RunRequest::search("Tell me about Paris.")).await.expect("run failed");
	let ids: Vec<QuestionId> =
		state.sub_question_results().iter().map(|result| result.question.id).collect();

	assert_eq!(state.rounds()[0].received, 3);
	assert_eq!(state.rounds()[0].answered, 3);
	assert_eq!(count_marker(&calls, prompts::SUB_ANSWER_SYSTEM), 3);

	for ordinal in 1..=3 {
		assert!(ids.contains(&QuestionId::new(0, ordinal)), "missing branch {ordinal}");
	}
}

#[tokio::test]
async fn empty_fan_out_yields_a_single_placeholder() {
	let llm = Arc::new(ScriptedLlm::new());
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let branches = orchestrator::fan_out(&ctx, &events, "Is Paris in France?", &[])
		.await
		.expect("fan-out failed");

	assert_eq!(branches.len(), 1);
	assert!(matches!(branches[0], BranchResult::NoSubQuestions));
	assert_eq!(total_calls(&calls), 0);
}

#[tokio::test]
async fn fan_out_returns_one_result_per_question() {
	let llm = Arc::new(llm_with_decomposition(""));
	let ctx = context(plain_agent(), llm, paris_search(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let questions: Vec<Question> = ["Where is Paris?", "How big is Paris?"]
		.into_iter()
		.enumerate()
		.map(|(idx, text)| {
			Question::sub_question(text, QuestionId::new(0, idx as u32 + 1), QuestionId::ROOT)
		})
		.collect();
	let branches = orchestrator::fan_out(&ctx, &events, "Tell me about Paris.", &questions)
		.await
		.expect("fan-out failed");

	assert_eq!(branches.len(), 2);
	assert!(branches.iter().all(|branch| matches!(branch, BranchResult::Answered(_))));
}
