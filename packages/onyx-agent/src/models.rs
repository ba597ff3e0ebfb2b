use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Answer used whenever a question has no surviving evidence.
pub const UNKNOWN_ANSWER: &str = "I do not have enough information to answer this question.";
/// Answer returned when the initial answer could not be generated at all.
pub const GENERIC_FAILURE_ANSWER: &str =
	"Something went wrong while generating the answer. Please try again.";

/// Position of a question in the run. Level 0 holds the root and first-round sub-questions, level 1
/// holds refinement-round sub-questions. The root is `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionId {
	pub level: u32,
	pub ordinal: u32,
}
impl QuestionId {
	pub const ROOT: Self = Self { level: 0, ordinal: 0 };

	pub fn new(level: u32, ordinal: u32) -> Self {
		Self { level, ordinal }
	}
}
impl fmt::Display for QuestionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}_{}", self.level, self.ordinal)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
	pub text: String,
	pub id: QuestionId,
	pub parent: Option<QuestionId>,
}
impl Question {
	pub fn root(text: impl Into<String>) -> Self {
		Self { text: text.into(), id: QuestionId::ROOT, parent: None }
	}

	pub fn sub_question(text: impl Into<String>, id: QuestionId, parent: QuestionId) -> Self {
		Self { text: text.into(), id, parent: Some(parent) }
	}
}

/// Identity of a retrieved chunk. Every merge keys on this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassageId {
	pub document_id: String,
	pub chunk_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
	pub semantic_identifier: String,
	pub link: Option<String>,
	pub source_type: Option<String>,
	pub updated_at: Option<i64>,
	#[serde(default)]
	pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
	pub id: PassageId,
	pub content: String,
	pub relevance_score: Option<f32>,
	pub metadata: PassageMetadata,
}
impl RetrievedPassage {
	pub fn new(
		document_id: impl Into<String>,
		chunk_id: u32,
		content: impl Into<String>,
		relevance_score: Option<f32>,
	) -> Self {
		let document_id = document_id.into();

		Self {
			metadata: PassageMetadata {
				semantic_identifier: document_id.clone(),
				..Default::default()
			},
			id: PassageId { document_id, chunk_id },
			content: content.into(),
			relevance_score,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpansionResult {
	pub query: String,
	pub passages: Vec<RetrievedPassage>,
	pub stats: Option<RetrievalFitStats>,
}

/// Average scores at fixed cutoffs of a ranked list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitScores {
	pub top_1: f64,
	pub top_5: f64,
	pub top_10: f64,
	pub fit_score: f64,
}

/// Retrieval quality diagnostics. Never used for control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalFitStats {
	/// `None` when the initial fit score is zero.
	pub fit_score_lift: Option<f64>,
	pub rerank_effect: f64,
	pub initial: FitScores,
	pub reranked: FitScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionAnswerResult {
	pub question: Question,
	pub answer: String,
	pub verified_high_quality: bool,
	pub verified_passages: Vec<RetrievedPassage>,
	pub context_passages: Vec<RetrievedPassage>,
	pub cited_passages: Vec<RetrievedPassage>,
	pub expanded_queries: Vec<QueryExpansionResult>,
	pub retrieval_stats: Option<RetrievalFitStats>,
}
impl SubQuestionAnswerResult {
	pub fn is_unknown(&self) -> bool {
		self.answer == UNKNOWN_ANSWER
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
	#[serde(alias = "entity_name")]
	pub name: String,
	#[serde(alias = "entity_type", default)]
	pub entity_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
	#[serde(alias = "relationship_name")]
	pub name: String,
	#[serde(alias = "relationship_type", default)]
	pub relationship_type: String,
	#[serde(alias = "relationship_entities", default)]
	pub entities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
	#[serde(alias = "term_name")]
	pub name: String,
	#[serde(alias = "term_type", default)]
	pub term_type: String,
	#[serde(alias = "term_similar_to", default)]
	pub similar_to: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelationshipTermExtraction {
	#[serde(default)]
	pub entities: Vec<Entity>,
	#[serde(default)]
	pub relationships: Vec<Relationship>,
	#[serde(default)]
	pub terms: Vec<Term>,
}
impl EntityRelationshipTermExtraction {
	pub fn is_empty(&self) -> bool {
		self.entities.is_empty() && self.relationships.is_empty() && self.terms.is_empty()
	}
}

/// What one fan-out branch hands to its fan-in node.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchResult {
	Answered(Box<SubQuestionAnswerResult>),
	Failed { question: QuestionId, message: String },
	/// Sent once when decomposition produced nothing to fan out over.
	NoSubQuestions,
}

/// Tool picked by the upstream tool-selection step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
	pub name: String,
	#[serde(default)]
	pub arguments: Value,
}
impl ToolChoice {
	pub const SEARCH: &'static str = "run_search";

	pub fn search() -> Self {
		Self { name: Self::SEARCH.to_string(), arguments: Value::Null }
	}

	pub fn is_search(&self) -> bool {
		self.name == Self::SEARCH
	}
}
