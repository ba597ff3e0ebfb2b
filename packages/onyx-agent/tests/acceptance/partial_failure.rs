use std::sync::Arc;

use onyx_agent::{
	AgentEvent, EventSink, QuestionId, RunRequest, StreamKind, accumulate, prompts, run,
};

use super::{
	Hits, OrderedRerank, Reply, ScriptedLlm, ScriptedSearch, context, count_marker, drain,
	passage, plain_agent, text,
};

fn three_branch_llm() -> ScriptedLlm {
	ScriptedLlm::new()
		.on(
			prompts::DECOMPOSE_SYSTEM,
			text(
				"Who founded Paris?\n\
				 What is the population of Paris?\n\
				 What river flows through Paris?",
			),
		)
		.on(prompts::REWRITE_SYSTEM, text(""))
		.on(prompts::VERIFY_SYSTEM, text("Yes"))
		.on(prompts::SUB_ANSWER_SYSTEM, text("See [D1]."))
		.on(prompts::GRADE_SYSTEM, text("Yes"))
		.on(prompts::ANSWER_SYSTEM, text("Paris was founded by the Parisii on the Seine [D1]."))
}

fn search_failing_on_population() -> ScriptedSearch {
	ScriptedSearch::new()
		.on("population", Hits::Fail)
		.on(
			"founded",
			Hits::Passages(vec![passage("history.md", "The Parisii founded Paris.", 0.7)]),
		)
		.on(
			"river",
			Hits::Passages(vec![passage("seine.md", "The Seine flows through Paris.", 0.8)]),
		)
		.on(
			"paris",
			Hits::Passages(vec![passage("paris.md", "Paris is a city in France.", 0.5)]),
		)
}

#[tokio::test]
async fn one_failed_branch_does_not_fail_the_run() {
	let llm = Arc::new(three_branch_llm());
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, search_failing_on_population(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("Tell me about Paris."))
		.await
		.expect("run failed");
	let round = &state.rounds()[0];

	assert_eq!(state.sub_questions().len(), 3);
	assert_eq!(round.received, 3);
	assert_eq!(round.answered, 2);
	assert_eq!(round.failed, vec![QuestionId::new(0, 2)]);

	let answered: Vec<QuestionId> =
		state.sub_question_results().iter().map(|result| result.question.id).collect();

	assert!(answered.contains(&QuestionId::new(0, 1)));
	assert!(answered.contains(&QuestionId::new(0, 3)));
	assert!(!accumulate::sub_answer_evidence(state.sub_question_results()).is_empty());
	assert_eq!(count_marker(&calls, prompts::SUB_ANSWER_SYSTEM), 2);
	assert_eq!(
		state.initial_answer(),
		Some("Paris was founded by the Parisii on the Seine [D1].")
	);
}

fn finished(events: &[AgentEvent]) -> Vec<StreamKind> {
	events
		.iter()
		.filter_map(|event| match event {
			AgentEvent::StreamFinished(kind) => Some(*kind),
			_ => None,
		})
		.collect()
}

#[tokio::test]
async fn failed_retrieval_still_closes_the_sub_answer_stream() {
	let llm = Arc::new(three_branch_llm());
	let ctx = context(plain_agent(), llm, search_failing_on_population(), OrderedRerank::default());
	let (events, rx) = EventSink::channel();

	run(&ctx, &events, RunRequest::search("Tell me about Paris.")).await.expect("run failed");

	let finished = finished(&drain(rx));

	for ordinal in 1..=3 {
		let kind = StreamKind::SubAnswer { level: 0, ordinal };

		assert_eq!(
			finished.iter().filter(|seen| **seen == kind).count(),
			1,
			"sub-answer stream {ordinal} not closed exactly once"
		);
	}
}

#[tokio::test]
async fn failed_sub_answer_stream_is_closed() {
	let llm = Arc::new(
		ScriptedLlm::new()
			.on_when(prompts::SUB_ANSWER_SYSTEM, "What river", Reply::Fail)
			.on(
				prompts::DECOMPOSE_SYSTEM,
				text("Who founded Paris?\nWhat river flows through Paris?"),
			)
			.on(prompts::REWRITE_SYSTEM, text(""))
			.on(prompts::VERIFY_SYSTEM, text("Yes"))
			.on(prompts::SUB_ANSWER_SYSTEM, text("See [D1]."))
			.on(prompts::GRADE_SYSTEM, text("Yes"))
			.on(prompts::ANSWER_SYSTEM, text("Paris [D1].")),
	);
	let ctx = context(plain_agent(), llm, search_failing_on_population(), OrderedRerank::default());
	let (events, rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("Tell me about Paris."))
		.await
		.expect("run failed");
	let finished = finished(&drain(rx));

	assert_eq!(state.rounds()[0].failed, vec![QuestionId::new(0, 2)]);
	assert!(finished.contains(&StreamKind::SubAnswer { level: 0, ordinal: 1 }));
	assert!(finished.contains(&StreamKind::SubAnswer { level: 0, ordinal: 2 }));
	assert_eq!(finished.last(), Some(&StreamKind::Run));
}

#[tokio::test]
async fn failed_decomposition_closes_the_sub_question_stream() {
	let llm = Arc::new(
		ScriptedLlm::new()
			.on(prompts::DECOMPOSE_SYSTEM, Reply::Fail)
			.on(prompts::REWRITE_SYSTEM, text(""))
			.on(prompts::VERIFY_SYSTEM, text("Yes"))
			.on(prompts::ANSWER_SYSTEM, text("Paris [D1].")),
	);
	let ctx = context(plain_agent(), llm, search_failing_on_population(), OrderedRerank::default());
	let (events, rx) = EventSink::channel();
	let state = run(&ctx, &events, RunRequest::search("Tell me about Paris."))
		.await
		.expect("run failed");
	let finished = finished(&drain(rx));

	assert!(state.sub_questions().is_empty());
	assert_eq!(
		finished.iter().filter(|kind| **kind == StreamKind::SubQuestions { level: 0 }).count(),
		1
	);
	assert_eq!(finished.last(), Some(&StreamKind::Run));
}
