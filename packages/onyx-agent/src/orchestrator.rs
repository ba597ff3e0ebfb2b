//! The agent search state machine.
//!
//! `run` walks a fixed graph of [`Node`]s. Each node reads and writes the [`GraphRunState`], and
//! [`transition`] picks the next node from the state alone. Fan-out nodes answer sub-questions
//! concurrently and rejoin before the state is touched.

use futures::future;
use serde::Serialize;
use serde_json::Value;

use crate::{
	AgentContext, AgentEvent, BranchResult, Error, EventSink, GENERIC_FAILURE_ANSWER, Question,
	Result, RetrievedPassage, StreamKind, SubQuestionAnswerResult, ToolChoice, accumulate,
	answer::{self, AnswerInput},
	compare,
	decomposition::{self, RefinedDecompositionInput},
	entities,
	expansion::{self, ExpansionOutcome},
	policy,
	rerank::{self, RerankOutcome},
	routing::{self, RouteDecision, ToolRoute},
	state::GraphRunState,
	sub_answer::{self, SubAnswerInput},
	verification,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
	Start,
	RouteToolChoice,
	ToolCall,
	ExploratorySearch,
	RouteDecision,
	DirectAnswer,
	InitialSearchAndDecompose,
	GenerateInitialAnswer,
	ValidateInitialAnswer,
	DecideRefinement,
	ExtractEntities,
	CreateRefinedSubQuestions,
	AnswerRefinedSubQuestions,
	GenerateRefinedAnswer,
	ValidateRefinedAnswer,
	CompareAnswers,
	TerminalLog,
	End,
}

/// One top-level question.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
	pub question: String,
	/// Tool picked upstream. `None` makes the run a no-op that only logs.
	pub tool_choice: Option<ToolChoice>,
}
impl RunRequest {
	pub fn search(question: impl Into<String>) -> Self {
		Self { question: question.into(), tool_choice: Some(ToolChoice::search()) }
	}
}

/// Next node after `node`, decided from what `node` left in `state`.
pub fn transition(node: Node, state: &GraphRunState, cfg: &onyx_config::Agent) -> Node {
	match node {
		Node::Start => Node::RouteToolChoice,
		Node::RouteToolChoice => match state.tool_route() {
			Some(ToolRoute::Search) if cfg.exploratory_search => Node::ExploratorySearch,
			Some(ToolRoute::Search) => Node::InitialSearchAndDecompose,
			Some(ToolRoute::Tool) => Node::ToolCall,
			Some(ToolRoute::NoTool) | None => Node::TerminalLog,
		},
		Node::ExploratorySearch => Node::RouteDecision,
		Node::RouteDecision => match state.route() {
			Some(RouteDecision::DirectLlmAnswer) => Node::DirectAnswer,
			Some(RouteDecision::AgentSearch) | None => Node::InitialSearchAndDecompose,
		},
		Node::InitialSearchAndDecompose => Node::GenerateInitialAnswer,
		Node::GenerateInitialAnswer => Node::ValidateInitialAnswer,
		Node::ValidateInitialAnswer => Node::DecideRefinement,
		Node::DecideRefinement =>
			if state.require_refinement() == Some(true) {
				Node::ExtractEntities
			} else {
				Node::TerminalLog
			},
		Node::ExtractEntities => Node::CreateRefinedSubQuestions,
		Node::CreateRefinedSubQuestions => Node::AnswerRefinedSubQuestions,
		Node::AnswerRefinedSubQuestions => Node::GenerateRefinedAnswer,
		Node::GenerateRefinedAnswer => Node::ValidateRefinedAnswer,
		Node::ValidateRefinedAnswer => Node::CompareAnswers,
		Node::CompareAnswers | Node::ToolCall | Node::DirectAnswer => Node::TerminalLog,
		Node::TerminalLog | Node::End => Node::End,
	}
}

/// Runs one question to completion and returns the final state.
///
/// Cancellation aborts the run with `Error::Cancelled` at the next boundary; nothing after that
/// point is committed.
pub async fn run(
	ctx: &AgentContext,
	events: &EventSink,
	request: RunRequest,
) -> Result<GraphRunState> {
	if request.question.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "question must be non-empty.".to_string() });
	}

	let mut state = GraphRunState::new(Question::root(request.question), request.tool_choice);
	let mut node = Node::Start;

	while node != Node::End {
		if let Err(err) = ctx.ensure_active() {
			tracing::warn!(node = ?node, "Agent run cancelled.");

			return Err(err);
		}

		tracing::debug!(node = ?node, "Entering node.");
		state.enter(node);

		if let Err(err) = execute(ctx, events, node, &mut state).await {
			if err.is_cancelled() {
				tracing::warn!(node = ?node, "Agent run cancelled.");
			}

			return Err(err);
		}

		node = transition(node, &state, &ctx.cfg.agent);
	}

	Ok(state)
}

async fn execute(
	ctx: &AgentContext,
	events: &EventSink,
	node: Node,
	state: &mut GraphRunState,
) -> Result<()> {
	match node {
		Node::Start | Node::End => Ok(()),
		Node::RouteToolChoice => {
			let route = routing::route_initial_tool_choice(state.tool_choice());

			state.set_tool_route(route)
		},
		Node::ToolCall => tool_call(ctx, events, state).await,
		Node::ExploratorySearch => exploratory_search(ctx, state).await,
		Node::RouteDecision => {
			let route =
				routing::decide_route(ctx, &state.question().text, state.exploratory_passages())
					.await?;

			state.log(format!("route decision: {route:?}"));
			state.set_route(route)
		},
		Node::DirectAnswer => direct_answer(ctx, events, state).await,
		Node::InitialSearchAndDecompose => initial_search_and_decompose(ctx, events, state).await,
		Node::GenerateInitialAnswer => generate_initial_answer(ctx, events, state).await,
		Node::ValidateInitialAnswer => {
			let valid = ctx.policy.validate_initial_answer(state);

			state.set_initial_answer_quality(valid)
		},
		Node::DecideRefinement => {
			let refine = policy::should_refine(&ctx.cfg.agent, ctx.policy.as_ref(), state);

			state.log(format!("refinement needed: {refine}"));
			state.set_require_refinement(refine)
		},
		Node::ExtractEntities => extract_entities(ctx, state).await,
		Node::CreateRefinedSubQuestions => create_refined_sub_questions(ctx, events, state).await,
		Node::AnswerRefinedSubQuestions => {
			let questions = state.refined_sub_questions().to_vec();
			let branches = fan_out(ctx, events, &state.question().text, &questions).await?;

			state.ingest_fan_in(1, accumulate::collect_branch_results(branches));

			Ok(())
		},
		Node::GenerateRefinedAnswer => generate_refined_answer(ctx, events, state).await,
		Node::ValidateRefinedAnswer => {
			if state.refined_answer().is_none() {
				return Ok(());
			}

			let valid = ctx.policy.validate_refined_answer(state);

			state.set_refined_answer_quality(valid)
		},
		Node::CompareAnswers => compare_answers(ctx, events, state).await,
		Node::TerminalLog => {
			terminal_log(state);
			events.finish(StreamKind::Run);

			Ok(())
		},
	}
}

/// Expansion, verification, rerank and answer for one sub-question.
pub async fn answer_sub_question(
	ctx: &AgentContext,
	events: &EventSink,
	question: &Question,
	original_question: &str,
) -> Result<SubQuestionAnswerResult> {
	let Retrieval { expansion, verified, reranked } =
		retrieve_verified(ctx, events, question, None, false).await?;

	sub_answer::generate_sub_answer(
		ctx,
		events,
		SubAnswerInput {
			question,
			original_question,
			verified_passages: verified,
			context_passages: reranked.passages,
			expanded_queries: expansion.results,
			retrieval_stats: reranked.stats,
		},
	)
	.await
}

/// Answers every question concurrently and joins before returning.
///
/// An empty list yields exactly one `NoSubQuestions` result. A failed branch becomes
/// `BranchResult::Failed` and its sub-answer stream is closed; cancellation in any branch cancels
/// the whole fan-out.
pub async fn fan_out(
	ctx: &AgentContext,
	events: &EventSink,
	original_question: &str,
	questions: &[Question],
) -> Result<Vec<BranchResult>> {
	if questions.is_empty() {
		return Ok(vec![BranchResult::NoSubQuestions]);
	}

	let answers =
		questions.iter().map(|question| answer_sub_question(ctx, events, question, original_question));
	let outcomes = future::join_all(answers).await;
	let mut branches = Vec::with_capacity(outcomes.len());

	for (question, outcome) in questions.iter().zip(outcomes) {
		match outcome {
			Ok(result) => branches.push(BranchResult::Answered(Box::new(result))),
			Err(Error::Cancelled) => return Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(
					error = %err,
					question = %question.id,
					"Sub-question branch failed; continuing with its siblings."
				);

				events.finish(StreamKind::SubAnswer {
					level: question.id.level,
					ordinal: question.id.ordinal,
				});

				let message = err.to_string();

				branches.push(BranchResult::Failed { question: question.id, message });
			},
		}
	}

	Ok(branches)
}

struct Retrieval {
	expansion: ExpansionOutcome,
	verified: Vec<RetrievedPassage>,
	reranked: RerankOutcome,
}

async fn retrieve_verified(
	ctx: &AgentContext,
	events: &EventSink,
	question: &Question,
	expansions: Option<Vec<String>>,
	is_base_search: bool,
) -> Result<Retrieval> {
	let expansion =
		expansion::expand_and_retrieve(ctx, events, question, expansions, is_base_search).await?;
	let verified =
		verification::verify_passages(ctx, &question.text, expansion.passages.clone()).await?;
	let reranked = rerank::rerank_passages(ctx, &question.text, verified.clone()).await?;

	Ok(Retrieval { expansion, verified, reranked })
}

async fn tool_call(ctx: &AgentContext, events: &EventSink, state: &mut GraphRunState) -> Result<()> {
	let Some(choice) = state.tool_choice().cloned() else {
		return Ok(());
	};
	let response = match ctx.tools.as_ref() {
		Some(tools) => match tools.run(&choice.name, &choice.arguments).await {
			Ok(response) => response,
			Err(err) => {
				tracing::warn!(error = %err, tool = %choice.name, "Tool call failed.");

				serde_json::json!({ "error": err.to_string() })
			},
		},
		None => {
			tracing::warn!(tool = %choice.name, "No tool executor configured.");

			serde_json::json!({ "error": format!("No executor for tool {}.", choice.name) })
		},
	};

	events.emit(AgentEvent::ToolResponse { name: choice.name.clone(), response: response.clone() });
	state.set_tool_response(response)
}

async fn exploratory_search(ctx: &AgentContext, state: &mut GraphRunState) -> Result<()> {
	let max_results = ctx.cfg.agent.retrieval.exploratory_max_results;

	match expansion::search_query(ctx, &state.question().text, max_results).await {
		Ok(result) => {
			state.merge_exploratory_passages(&result.passages);
			state.log(format!("exploratory search returned {} passages", result.passages.len()));
		},
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Exploratory search failed; continuing without it.");
		},
	}

	Ok(())
}

async fn direct_answer(
	ctx: &AgentContext,
	events: &EventSink,
	state: &mut GraphRunState,
) -> Result<()> {
	let answer = match answer::generate_direct_answer(ctx, events, state.question()).await {
		Ok(answer) => answer,
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Direct answer failed.");

			GENERIC_FAILURE_ANSWER.to_string()
		},
	};

	state.set_initial_answer(answer)
}

async fn initial_search_and_decompose(
	ctx: &AgentContext,
	events: &EventSink,
	state: &mut GraphRunState,
) -> Result<()> {
	let root = state.question().clone();
	let exploratory = state.exploratory_passages().to_vec();
	let original_docs = async {
		match retrieve_verified(ctx, events, &root, None, true).await {
			Ok(retrieval) => Ok(Some(retrieval)),
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Original question retrieval failed.");

				Ok(None)
			},
		}
	};
	let sub_questions = async {
		let decomposed = decomposition::decompose_initial(ctx, events, &root, &exploratory).await;
		let questions = match decomposed {
			Ok(questions) => questions,
			Err(Error::Cancelled) => return Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(
					error = %err,
					"Initial decomposition failed; answering without sub-questions."
				);

				Vec::new()
			},
		};
		let branches = fan_out(ctx, events, &root.text, &questions).await?;

		Ok::<_, Error>((questions, branches))
	};
	let (original, decomposed) = tokio::join!(original_docs, sub_questions);
	let (questions, branches) = decomposed?;

	if let Some(Retrieval { expansion, reranked, .. }) = original? {
		state.merge_original_passages(&reranked.passages);
		state.append_expanded_queries(expansion.results);
	}

	state.append_sub_questions(0, questions);
	state.ingest_fan_in(0, accumulate::collect_branch_results(branches));

	Ok(())
}

async fn generate_initial_answer(
	ctx: &AgentContext,
	events: &EventSink,
	state: &mut GraphRunState,
) -> Result<()> {
	let passages =
		answer::answer_context(ctx, state.original_passages(), state.sub_question_results());
	let input = AnswerInput {
		question: state.question(),
		level: 0,
		passages: &passages,
		sub_answers: state.sub_question_results(),
		initial_answer: None,
	};
	let answer = match answer::generate_answer(ctx, events, input).await {
		Ok(answer) => answer,
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Initial answer generation failed.");
			events.finish(StreamKind::Answer { level: 0 });

			GENERIC_FAILURE_ANSWER.to_string()
		},
	};

	state.set_initial_answer(answer)
}

async fn extract_entities(ctx: &AgentContext, state: &mut GraphRunState) -> Result<()> {
	let passages = if state.exploratory_passages().is_empty() {
		state.original_passages().to_vec()
	} else {
		state.exploratory_passages().to_vec()
	};
	let extraction = entities::extract_entities(ctx, &state.question().text, &passages).await?;

	state.log(format!(
		"extracted {} entities, {} relationships, {} terms",
		extraction.entities.len(),
		extraction.relationships.len(),
		extraction.terms.len()
	));
	state.set_extraction(extraction)
}

async fn create_refined_sub_questions(
	ctx: &AgentContext,
	events: &EventSink,
	state: &mut GraphRunState,
) -> Result<()> {
	let extraction = state.extraction().cloned().unwrap_or_default();
	let input = RefinedDecompositionInput {
		question: state.question(),
		initial_answer: state.initial_answer().unwrap_or_default(),
		extraction: &extraction,
		answered: state.sub_question_results(),
	};
	let questions = match decomposition::decompose_refined(ctx, events, input).await {
		Ok(questions) => questions,
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Refined decomposition failed; no refined sub-questions.");

			Vec::new()
		},
	};

	state.append_sub_questions(1, questions);

	Ok(())
}

async fn generate_refined_answer(
	ctx: &AgentContext,
	events: &EventSink,
	state: &mut GraphRunState,
) -> Result<()> {
	let sub_answers = state.all_sub_question_results();
	let passages = answer::answer_context(ctx, state.original_passages(), &sub_answers);
	let input = AnswerInput {
		question: state.question(),
		level: 1,
		passages: &passages,
		sub_answers: &sub_answers,
		initial_answer: state.initial_answer(),
	};

	match answer::generate_answer(ctx, events, input).await {
		Ok(answer) => state.set_refined_answer(answer),
		Err(Error::Cancelled) => Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(
				error = %err,
				"Refined answer generation failed; keeping the initial answer."
			);
			events.finish(StreamKind::Answer { level: 1 });

			Ok(())
		},
	}
}

async fn compare_answers(
	ctx: &AgentContext,
	events: &EventSink,
	state: &mut GraphRunState,
) -> Result<()> {
	let (Some(initial), Some(refined)) = (state.initial_answer(), state.refined_answer()) else {
		return Ok(());
	};
	let compared = compare::compare_answers(ctx, &state.question().text, initial, refined).await;
	let improved = match compared {
		Ok(improved) => improved,
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Answer comparison failed; counting it as no improvement.");

			false
		},
	};

	events.emit(AgentEvent::RefinedAnswerImprovement { improved });
	state.set_refined_answer_improvement(improved)
}

fn terminal_log(state: &mut GraphRunState) {
	let failed_branches: usize = state.rounds().iter().map(|round| round.failed.len()).sum();
	let path = Value::Array(
		state.path().iter().filter_map(|node| serde_json::to_value(node).ok()).collect(),
	);

	tracing::info!(
		sub_questions = state.sub_questions().len(),
		refined_sub_questions = state.refined_sub_questions().len(),
		failed_branches,
		refined = state.refined_answer().is_some(),
		improved = ?state.refined_answer_improvement(),
		%path,
		"Agent run finished."
	);
	state.log("run finished");
}
