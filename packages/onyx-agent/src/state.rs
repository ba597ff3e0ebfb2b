//! Accumulator for one run.
//!
//! Scalar fields are written by exactly one node; a second write is a `StateConflict`. List fields
//! only grow through the merge functions in `accumulate`, so the order sibling branches finish in
//! does not change the final state.

use serde_json::Value;

use crate::{
	EntityRelationshipTermExtraction, Error, Node, QueryExpansionResult, Question, QuestionId,
	Result, RetrievedPassage, SubQuestionAnswerResult, ToolChoice,
	accumulate::{self, FanIn},
	routing::{RouteDecision, ToolRoute},
};

/// What one fan-in saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
	pub level: u32,
	pub received: usize,
	pub answered: usize,
	pub failed: Vec<QuestionId>,
}

#[derive(Debug, Clone)]
pub struct GraphRunState {
	question: Question,
	tool_choice: Option<ToolChoice>,
	tool_route: Option<ToolRoute>,
	route: Option<RouteDecision>,
	tool_response: Option<Value>,
	exploratory_passages: Vec<RetrievedPassage>,
	original_passages: Vec<RetrievedPassage>,
	expanded_queries: Vec<QueryExpansionResult>,
	sub_questions: Vec<Question>,
	sub_question_results: Vec<SubQuestionAnswerResult>,
	refined_sub_questions: Vec<Question>,
	refined_sub_question_results: Vec<SubQuestionAnswerResult>,
	rounds: Vec<RoundSummary>,
	initial_answer: Option<String>,
	initial_answer_quality: Option<bool>,
	require_refinement: Option<bool>,
	extraction: Option<EntityRelationshipTermExtraction>,
	refined_answer: Option<String>,
	refined_answer_quality: Option<bool>,
	refined_answer_improvement: Option<bool>,
	path: Vec<Node>,
	log_messages: Vec<String>,
}
impl GraphRunState {
	pub fn new(question: Question, tool_choice: Option<ToolChoice>) -> Self {
		Self {
			question,
			tool_choice,
			tool_route: None,
			route: None,
			tool_response: None,
			exploratory_passages: Vec::new(),
			original_passages: Vec::new(),
			expanded_queries: Vec::new(),
			sub_questions: Vec::new(),
			sub_question_results: Vec::new(),
			refined_sub_questions: Vec::new(),
			refined_sub_question_results: Vec::new(),
			rounds: Vec::new(),
			initial_answer: None,
			initial_answer_quality: None,
			require_refinement: None,
			extraction: None,
			refined_answer: None,
			refined_answer_quality: None,
			refined_answer_improvement: None,
			path: Vec::new(),
			log_messages: Vec::new(),
		}
	}

	pub fn question(&self) -> &Question {
		&self.question
	}

	pub fn tool_choice(&self) -> Option<&ToolChoice> {
		self.tool_choice.as_ref()
	}

	pub fn tool_route(&self) -> Option<ToolRoute> {
		self.tool_route
	}

	pub fn route(&self) -> Option<RouteDecision> {
		self.route
	}

	pub fn tool_response(&self) -> Option<&Value> {
		self.tool_response.as_ref()
	}

	pub fn exploratory_passages(&self) -> &[RetrievedPassage] {
		&self.exploratory_passages
	}

	pub fn original_passages(&self) -> &[RetrievedPassage] {
		&self.original_passages
	}

	pub fn expanded_queries(&self) -> &[QueryExpansionResult] {
		&self.expanded_queries
	}

	pub fn sub_questions(&self) -> &[Question] {
		&self.sub_questions
	}

	pub fn sub_question_results(&self) -> &[SubQuestionAnswerResult] {
		&self.sub_question_results
	}

	pub fn refined_sub_questions(&self) -> &[Question] {
		&self.refined_sub_questions
	}

	pub fn refined_sub_question_results(&self) -> &[SubQuestionAnswerResult] {
		&self.refined_sub_question_results
	}

	/// Every sub-question result from both rounds.
	pub fn all_sub_question_results(&self) -> Vec<SubQuestionAnswerResult> {
		accumulate::merge_sub_question_results(
			self.sub_question_results.clone(),
			self.refined_sub_question_results.iter().cloned(),
		)
	}

	pub fn rounds(&self) -> &[RoundSummary] {
		&self.rounds
	}

	pub fn initial_answer(&self) -> Option<&str> {
		self.initial_answer.as_deref()
	}

	pub fn initial_answer_quality(&self) -> Option<bool> {
		self.initial_answer_quality
	}

	pub fn require_refinement(&self) -> Option<bool> {
		self.require_refinement
	}

	pub fn extraction(&self) -> Option<&EntityRelationshipTermExtraction> {
		self.extraction.as_ref()
	}

	pub fn refined_answer(&self) -> Option<&str> {
		self.refined_answer.as_deref()
	}

	pub fn refined_answer_quality(&self) -> Option<bool> {
		self.refined_answer_quality
	}

	pub fn refined_answer_improvement(&self) -> Option<bool> {
		self.refined_answer_improvement
	}

	/// Nodes visited, in order.
	pub fn path(&self) -> &[Node] {
		&self.path
	}

	pub fn log_messages(&self) -> &[String] {
		&self.log_messages
	}

	/// The refined answer when comparison judged it an improvement, otherwise the initial answer.
	pub fn final_answer(&self) -> Option<&str> {
		match (self.refined_answer.as_deref(), self.refined_answer_improvement) {
			(Some(refined), Some(true)) => Some(refined),
			_ => self.initial_answer.as_deref(),
		}
	}

	pub fn set_tool_route(&mut self, route: ToolRoute) -> Result<()> {
		write_once(&mut self.tool_route, "tool_route", route)
	}

	pub fn set_route(&mut self, route: RouteDecision) -> Result<()> {
		write_once(&mut self.route, "route", route)
	}

	pub fn set_tool_response(&mut self, response: Value) -> Result<()> {
		write_once(&mut self.tool_response, "tool_response", response)
	}

	pub fn set_initial_answer(&mut self, answer: String) -> Result<()> {
		write_once(&mut self.initial_answer, "initial_answer", answer)
	}

	pub fn set_initial_answer_quality(&mut self, quality: bool) -> Result<()> {
		write_once(&mut self.initial_answer_quality, "initial_answer_quality", quality)
	}

	pub fn set_require_refinement(&mut self, refine: bool) -> Result<()> {
		write_once(&mut self.require_refinement, "require_refinement", refine)
	}

	pub fn set_extraction(&mut self, extraction: EntityRelationshipTermExtraction) -> Result<()> {
		write_once(&mut self.extraction, "extraction", extraction)
	}

	pub fn set_refined_answer(&mut self, answer: String) -> Result<()> {
		write_once(&mut self.refined_answer, "refined_answer", answer)
	}

	pub fn set_refined_answer_quality(&mut self, quality: bool) -> Result<()> {
		write_once(&mut self.refined_answer_quality, "refined_answer_quality", quality)
	}

	pub fn set_refined_answer_improvement(&mut self, improved: bool) -> Result<()> {
		write_once(&mut self.refined_answer_improvement, "refined_answer_improvement", improved)
	}

	pub fn merge_exploratory_passages(&mut self, passages: &[RetrievedPassage]) {
		self.exploratory_passages = accumulate::merge_passages(&self.exploratory_passages, passages);
	}

	pub fn merge_original_passages(&mut self, passages: &[RetrievedPassage]) {
		self.original_passages = accumulate::merge_passages(&self.original_passages, passages);
	}

	pub fn append_expanded_queries(&mut self, results: Vec<QueryExpansionResult>) {
		self.expanded_queries.extend(results);
	}

	pub fn append_sub_questions(&mut self, level: u32, questions: Vec<Question>) {
		if level == 0 {
			self.sub_questions.extend(questions);
		} else {
			self.refined_sub_questions.extend(questions);
		}
	}

	/// Applies one fan-in: sub-question results merge by id and their queries are appended.
	pub fn ingest_fan_in(&mut self, level: u32, fan_in: FanIn) {
		let FanIn { received, answered, failed } = fan_in;

		self.rounds.push(RoundSummary { level, received, answered: answered.len(), failed });

		for result in &answered {
			self.expanded_queries.extend(result.expanded_queries.iter().cloned());
		}

		let target = if level == 0 {
			&mut self.sub_question_results
		} else {
			&mut self.refined_sub_question_results
		};

		*target = accumulate::merge_sub_question_results(std::mem::take(target), answered);
	}

	pub(crate) fn enter(&mut self, node: Node) {
		self.path.push(node);
	}

	pub(crate) fn log(&mut self, message: impl Into<String>) {
		self.log_messages.push(message.into());
	}
}

fn write_once<T>(slot: &mut Option<T>, field: &'static str, value: T) -> Result<()> {
	if slot.is_some() {
		return Err(Error::StateConflict { field });
	}

	*slot = Some(value);

	Ok(())
}
