use std::sync::Arc;

use onyx_agent::{
	AgentEvent, EventSink, GraphRunState, Node, QualityPolicy, QuestionId, RunRequest, compare,
	prompts, run,
};
use onyx_config::Agent;

use super::{
	Hits, OrderedRerank, Reply, ScriptedLlm, ScriptedSearch, context, count_marker, drain, passage,
	text,
};

const INITIAL: &str = "Paris [D1].";
const REFINED: &str = "Paris is the capital of France and sits on the Seine [D1][D2].";
const EXTRACTION: &str = r#"```json
{"entities":[{"entity_name":"Paris","entity_type":"city"}],"relationships":[],"terms":[]}
```"#;

fn refining_agent() -> Agent {
	Agent { allow_refinement: true, exploratory_search: false, ..Default::default() }
}

fn refining_llm(compare: Reply) -> ScriptedLlm {
	ScriptedLlm::new()
		.on(prompts::DECOMPOSE_SYSTEM, text("What city is the capital of France?"))
		.on(prompts::REFINED_DECOMPOSE_SYSTEM, text("What river flows through Paris?"))
		.on(prompts::REWRITE_SYSTEM, text(""))
		.on_when(prompts::VERIFY_SYSTEM, "Lyon", text("No"))
		.on(prompts::VERIFY_SYSTEM, text("Yes"))
		.on(prompts::SUB_ANSWER_SYSTEM, text("Paris [D1]."))
		.on(prompts::GRADE_SYSTEM, text("Yes"))
		.on(prompts::ENTITY_SYSTEM, text(EXTRACTION))
		.on_when(prompts::ANSWER_SYSTEM, "Initial answer to improve on", text(REFINED))
		.on(prompts::ANSWER_SYSTEM, text(INITIAL))
		.on(prompts::COMPARE_SYSTEM, compare)
}

fn refining_search() -> ScriptedSearch {
	ScriptedSearch::new()
		.on(
			"river",
			Hits::Passages(vec![passage("seine.md", "The Seine flows through Paris.", 0.8)]),
		)
		.on(
			"capital",
			Hits::Passages(vec![
				passage("france.md", "Paris is the capital and largest city of France.", 0.9),
				passage("lyon.md", "Lyon is known for its cuisine.", 0.3),
			]),
		)
}

async fn refine(compare: Reply) -> (GraphRunState, Vec<AgentEvent>) {
	let llm = Arc::new(refining_llm(compare));
	let ctx = context(refining_agent(), llm, refining_search(), OrderedRerank::default());
	let (events, rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("What is the capital of France?"))
		.await
		.expect("run failed");

	drop(events);

	(state, drain(rx))
}

#[tokio::test]
async fn improved_refinement_becomes_the_final_answer() {
	let (state, events) = refine(text("Yes, the refined answer adds the river.")).await;

	assert_eq!(state.initial_answer(), Some(INITIAL));
	assert_eq!(state.refined_answer(), Some(REFINED));
	assert_eq!(state.refined_answer_improvement(), Some(true));
	assert_eq!(state.final_answer(), Some(REFINED));
	assert_eq!(state.refined_sub_questions().len(), 1);
	assert_eq!(state.refined_sub_questions()[0].id, QuestionId::new(1, 1));
	assert_eq!(state.refined_sub_question_results().len(), 1);
	assert_eq!(state.all_sub_question_results().len(), 2);
	assert_eq!(state.extraction().map(|extraction| extraction.entities.len()), Some(1));
	assert!(state.path().ends_with(&[
		Node::ExtractEntities,
		Node::CreateRefinedSubQuestions,
		Node::AnswerRefinedSubQuestions,
		Node::GenerateRefinedAnswer,
		Node::ValidateRefinedAnswer,
		Node::CompareAnswers,
		Node::TerminalLog,
	]));
	assert!(events.contains(&AgentEvent::RefinedAnswerImprovement { improved: true }));

	let refined: String = events
		.iter()
		.filter_map(|event| match event {
			AgentEvent::AnswerToken { level: 1, token } => Some(token.as_str()),
			_ => None,
		})
		.collect();

	assert_eq!(refined, REFINED);
}

#[tokio::test]
async fn unimproved_refinement_keeps_the_initial_answer() {
	let (state, events) = refine(text("No, the original answer was already complete.")).await;

	assert_eq!(state.refined_answer(), Some(REFINED));
	assert_eq!(state.refined_answer_improvement(), Some(false));
	assert_eq!(state.final_answer(), Some(INITIAL));
	assert!(events.contains(&AgentEvent::RefinedAnswerImprovement { improved: false }));
}

#[tokio::test]
async fn failed_comparison_counts_as_no_improvement() {
	let (state, events) = refine(Reply::Fail).await;

	assert_eq!(state.refined_answer_improvement(), Some(false));
	assert_eq!(state.final_answer(), Some(INITIAL));
	assert!(events.contains(&AgentEvent::RefinedAnswerImprovement { improved: false }));
}

#[tokio::test]
async fn compare_reads_yes_as_improvement() {
	for (reply, improved) in [
		("Yes, the refined answer adds the river.", true),
		("No, the original answer was already complete.", false),
	] {
		let llm = Arc::new(ScriptedLlm::new().on(prompts::COMPARE_SYSTEM, text(reply)));
		let ctx = context(refining_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
		let verdict = compare::compare_answers(&ctx, "Capital of France?", INITIAL, REFINED)
			.await
			.expect("compare failed");

		assert_eq!(verdict, improved, "reply: {reply}");
	}
}

struct NeverRefine;
impl QualityPolicy for NeverRefine {
	fn decide_refinement(&self, _state: &GraphRunState) -> bool {
		false
	}
}

#[tokio::test]
async fn policy_can_veto_refinement() {
	let llm = Arc::new(refining_llm(text("Yes")));
	let calls = llm.calls();
	let ctx = context(refining_agent(), llm, refining_search(), OrderedRerank::default())
		.with_policy(Arc::new(NeverRefine));
	let (events, _rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("What is the capital of France?"))
		.await
		.expect("run failed");

	assert_eq!(state.require_refinement(), Some(false));
	assert_eq!(state.final_answer(), Some(INITIAL));
	assert_eq!(count_marker(&calls, prompts::ENTITY_SYSTEM), 0);
	assert_eq!(count_marker(&calls, prompts::REFINED_DECOMPOSE_SYSTEM), 0);
}

#[tokio::test]
async fn failed_initial_answer_skips_refinement() {
	let llm = Arc::new(
		ScriptedLlm::new()
			.on(prompts::DECOMPOSE_SYSTEM, text(""))
			.on(prompts::VERIFY_SYSTEM, text("Yes"))
			.on(prompts::ANSWER_SYSTEM, Reply::Fail),
	);
	let calls = llm.calls();
	let ctx = context(refining_agent(), llm, refining_search(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("What is the capital of France?"))
		.await
		.expect("run failed");

	assert_eq!(state.initial_answer(), Some(onyx_agent::GENERIC_FAILURE_ANSWER));
	assert_eq!(state.require_refinement(), Some(false));
	assert_eq!(count_marker(&calls, prompts::ENTITY_SYSTEM), 0);
}
