use std::sync::{Arc, atomic::Ordering};

use onyx_agent::{
	AgentEvent, Error, EventSink, Question, QuestionId, entities, expansion, prompts, rerank,
	verification,
};
use onyx_config::{Agent, AgentRerank};
use onyx_tokens::{TokenCounter, WordCounter};

use super::{
	FAST_MODEL, Hits, LookupRerank, OrderedRerank, Reply, ScriptedLlm, ScriptedSearch, SpyAudit,
	context, drain, passage, plain_agent, text, total_calls,
};

fn sub_question(text: &str) -> Question {
	Question::sub_question(text, QuestionId::new(0, 2), QuestionId::ROOT)
}

#[tokio::test]
async fn blank_question_expands_to_nothing() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::REWRITE_SYSTEM, text("anything")));
	let calls = llm.calls();
	let search = ScriptedSearch::new();
	let queries = search.queries();
	let ctx = context(plain_agent(), llm, search, OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let outcome = expansion::expand_and_retrieve(&ctx, &events, &sub_question("  "), None, false)
		.await
		.expect("expansion failed");

	assert!(outcome.results.is_empty());
	assert!(outcome.passages.is_empty());
	assert_eq!(total_calls(&calls), 0);
	assert!(queries.lock().expect("queries lock poisoned").is_empty());
}

#[tokio::test]
async fn rewrite_failure_fails_the_branch() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::REWRITE_SYSTEM, Reply::Fail));
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let question = sub_question("Where is Paris?");
	let err = expansion::expand_and_retrieve(&ctx, &events, &question, None, false)
		.await
		.expect_err("expansion succeeded");

	assert!(matches!(err, Error::UpstreamCall { stage: "expansion", .. }));
}

#[tokio::test]
async fn search_failure_fails_the_branch() {
	let llm = Arc::new(ScriptedLlm::new());
	let search = ScriptedSearch::new().on("paris", Hits::Fail);
	let ctx = context(plain_agent(), llm, search, OrderedRerank::default());
	let (events, _rx) = EventSink::channel();
	let err = expansion::expand_and_retrieve(
		&ctx,
		&events,
		&sub_question("Where is Paris?"),
		Some(vec!["Paris location".to_string()]),
		false,
	)
	.await
	.expect_err("expansion succeeded");

	assert!(matches!(err, Error::UpstreamCall { stage: "expansion", .. }));
}

#[tokio::test]
async fn supplied_expansions_skip_rewriting_and_keep_the_original() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::REWRITE_SYSTEM, text("ignored")));
	let calls = llm.calls();
	let search = ScriptedSearch::new()
		.on("location", Hits::Passages(vec![passage("a.md", "Paris is in France.", 0.4)]))
		.on(
			"where",
			Hits::Passages(vec![
				passage("a.md", "Paris is in France.", 0.7),
				passage("b.md", "Paris lies on the Seine.", 0.5),
			]),
		);
	let audit = Arc::new(SpyAudit::default());
	let audited = audit.sub_queries.clone();
	let ctx = context(plain_agent(), llm, search, OrderedRerank::default())
		.with_audit(audit, Default::default());
	let (events, rx) = EventSink::channel();
	let outcome = expansion::expand_and_retrieve(
		&ctx,
		&events,
		&sub_question("Where is Paris?"),
		Some(vec!["Paris location".to_string(), "where is paris?".to_string()]),
		false,
	)
	.await
	.expect("expansion failed");
	let queries: Vec<&str> = outcome.results.iter().map(|result| result.query.as_str()).collect();

	assert_eq!(total_calls(&calls), 0);
	assert_eq!(queries, vec!["Paris location", "where is paris?"]);
	// Duplicate hits collapse to one passage carrying the best score.
	assert_eq!(outcome.passages.len(), 2);
	assert_eq!(outcome.passages[0].id.document_id, "a.md");
	assert_eq!(outcome.passages[0].relevance_score, Some(0.7));
	assert_eq!(audited.lock().expect("audit lock poisoned").len(), 1);

	drop(events);

	let tokens: Vec<AgentEvent> = drain(rx);

	assert_eq!(
		tokens,
		vec![
			AgentEvent::SubQueryToken {
				level: 0,
				ordinal: 2,
				query_index: 0,
				token: "Paris location".to_string(),
			},
			AgentEvent::SubQueryToken {
				level: 0,
				ordinal: 2,
				query_index: 1,
				token: "where is paris?".to_string(),
			},
		]
	);
}

#[tokio::test]
async fn base_search_uses_ordinal_zero_and_skips_the_audit() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::REWRITE_SYSTEM, text("French capital")));
	let audit = Arc::new(SpyAudit::default());
	let audited = audit.sub_queries.clone();
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default())
		.with_audit(audit, Default::default());
	let (events, rx) = EventSink::channel();

	expansion::expand_and_retrieve(
		&ctx,
		&events,
		&Question::root("What is the capital of France?"),
		None,
		true,
	)
	.await
	.expect("expansion failed");
	drop(events);

	let events = drain(rx);

	assert_eq!(events.len(), 2);
	assert!(
		events.iter().all(|event| matches!(event, AgentEvent::SubQueryToken { ordinal: 0, .. }))
	);
	assert!(audited.lock().expect("audit lock poisoned").is_empty());
}

#[tokio::test]
async fn blank_query_makes_no_search_call() {
	let search = ScriptedSearch::new();
	let queries = search.queries();
	let ctx = context(plain_agent(), Arc::new(ScriptedLlm::new()), search, OrderedRerank::default());
	let result = expansion::search_query(&ctx, " \t", 10).await.expect("search failed");

	assert!(result.passages.is_empty());
	assert!(queries.lock().expect("queries lock poisoned").is_empty());
}

#[tokio::test]
async fn verification_error_drops_only_that_passage() {
	let llm = Arc::new(
		ScriptedLlm::new()
			.on_when(prompts::VERIFY_SYSTEM, "Lyon", Reply::Fail)
			.on_when(prompts::VERIFY_SYSTEM, "Marseille", text("No"))
			.on(prompts::VERIFY_SYSTEM, text("Yes")),
	);
	let calls = llm.calls();
	let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
	let passages = vec![
		passage("paris.md", "Paris is the capital of France.", 0.9),
		passage("lyon.md", "Lyon is a French city.", 0.8),
		passage("marseille.md", "Marseille is a port.", 0.7),
		passage("seine.md", "The Seine flows through Paris.", 0.6),
	];
	let verified = verification::verify_passages(&ctx, "What is the capital of France?", passages)
		.await
		.expect("verification failed");
	let ids: Vec<&str> = verified.iter().map(|p| p.id.document_id.as_str()).collect();

	assert_eq!(ids, vec!["paris.md", "seine.md"]);

	let calls = calls.lock().expect("calls lock poisoned");

	assert_eq!(calls.len(), 4);
	assert!(calls.iter().all(|call| call.model == FAST_MODEL && !call.streamed));
}

#[tokio::test]
async fn verification_prompt_fits_the_fast_model_window() {
	let llm = Arc::new(ScriptedLlm::new().on(prompts::VERIFY_SYSTEM, text("Yes")));
	let calls = llm.calls();
	let mut ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());

	ctx.cfg.providers.llm_fast.max_input_tokens = 80;

	let long = "Paris ".repeat(500);
	let doc = passage("paris.md", long.trim_end(), 0.9);

	assert!(
		verification::verify_passage(&ctx, "Where is Paris?", &doc).await.expect("verify failed")
	);

	let calls = calls.lock().expect("calls lock poisoned");
	let call = &calls[0];
	let used = WordCounter.count(&call.system) + WordCounter.count(&call.user);

	assert!(used <= 80, "prompt used {used} tokens");
	assert!(call.user.contains("Paris"));
}

#[tokio::test]
async fn rerank_reorders_and_truncates() {
	let agent = Agent {
		rerank: AgentRerank { max_results: 2, min_docs: 1, compute_stats: true },
		..plain_agent()
	};
	let rerank_provider =
		LookupRerank { scores: vec![("Seine", 0.95), ("capital", 0.5), ("Lyon", 0.1)] };
	let ctx = context(agent, Arc::new(ScriptedLlm::new()), ScriptedSearch::new(), rerank_provider);
	let verified = vec![
		passage("lyon.md", "Lyon is a French city.", 0.9),
		passage("paris.md", "Paris is the capital of France.", 0.8),
		passage("seine.md", "The Seine flows through Paris.", 0.7),
	];
	let outcome = rerank::rerank_passages(&ctx, "Tell me about Paris.", verified)
		.await
		.expect("rerank failed");
	let ids: Vec<&str> = outcome.passages.iter().map(|p| p.id.document_id.as_str()).collect();

	assert_eq!(ids, vec!["seine.md", "paris.md"]);
	assert_eq!(outcome.passages[0].relevance_score, Some(0.95));

	let stats = outcome.stats.expect("stats missing");

	assert!(stats.rerank_effect > 0.0);
	assert!(stats.fit_score_lift.is_some());
}

#[tokio::test]
async fn singleton_passes_through_without_a_rerank_call() {
	let provider = OrderedRerank::default();
	let rerank_calls = provider.calls.clone();
	let ctx = context(plain_agent(), Arc::new(ScriptedLlm::new()), ScriptedSearch::new(), provider);
	let verified = vec![passage("paris.md", "Paris is the capital of France.", 0.4)];
	let outcome = rerank::rerank_passages(&ctx, "q", verified.clone()).await.expect("rerank failed");

	assert_eq!(outcome.passages, verified);
	assert_eq!(rerank_calls.load(Ordering::SeqCst), 0);

	let outcome = rerank::rerank_passages(&ctx, "q", Vec::new()).await.expect("rerank failed");

	assert!(outcome.passages.is_empty());
	assert!(outcome.stats.is_none());
	assert_eq!(rerank_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_rerank_provider_keeps_retrieval_order() {
	let provider = OrderedRerank::default();
	let rerank_calls = provider.calls.clone();
	let mut ctx =
		context(plain_agent(), Arc::new(ScriptedLlm::new()), ScriptedSearch::new(), provider);

	ctx.cfg.providers.rerank = None;

	let verified = vec![
		passage("a.md", "first", 0.1),
		passage("b.md", "second", 0.9),
	];
	let outcome = rerank::rerank_passages(&ctx, "q", verified.clone()).await.expect("rerank failed");

	assert_eq!(outcome.passages, verified);
	assert_eq!(rerank_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rerank_failure_is_returned() {
	let provider = OrderedRerank { fail: true, ..Default::default() };
	let ctx = context(plain_agent(), Arc::new(ScriptedLlm::new()), ScriptedSearch::new(), provider);
	let verified = vec![passage("a.md", "first", 0.1), passage("b.md", "second", 0.9)];
	let err = rerank::rerank_passages(&ctx, "q", verified).await.expect_err("rerank succeeded");

	assert!(matches!(err, Error::UpstreamCall { stage: "rerank", .. }));
}

#[tokio::test]
async fn entity_extraction_degrades_to_empty() {
	for reply in [Reply::Fail, text("not json at all")] {
		let llm = Arc::new(ScriptedLlm::new().on(prompts::ENTITY_SYSTEM, reply));
		let ctx = context(plain_agent(), llm, ScriptedSearch::new(), OrderedRerank::default());
		let passages = vec![passage("paris.md", "Paris is the capital of France.", 0.9)];
		let extraction = entities::extract_entities(&ctx, "Tell me about Paris.", &passages)
			.await
			.expect("extraction failed");

		assert!(extraction.is_empty());
	}
}
