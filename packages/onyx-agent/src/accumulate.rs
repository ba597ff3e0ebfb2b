//! Merge operations applied at fan-in points.
//!
//! Passages merge by `(document_id, chunk_id)` keeping the highest score, with `None` ranked
//! lowest. Sub-question results merge by question id and the first writer wins. Both merges are
//! idempotent and insensitive to the order branches finished in, up to list order.

use std::collections::{HashMap, HashSet};

use crate::{BranchResult, PassageId, QuestionId, RetrievedPassage, SubQuestionAnswerResult};

/// Counts and payloads gathered by one fan-in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanIn {
	pub received: usize,
	pub answered: Vec<SubQuestionAnswerResult>,
	pub failed: Vec<QuestionId>,
}

pub fn dedup_passages<I>(passages: I) -> Vec<RetrievedPassage>
where
	I: IntoIterator<Item = RetrievedPassage>,
{
	let mut out: Vec<RetrievedPassage> = Vec::new();
	let mut index: HashMap<PassageId, usize> = HashMap::new();

	for passage in passages {
		match index.get(&passage.id) {
			Some(&slot) =>
				if outranks(passage.relevance_score, out[slot].relevance_score) {
					out[slot] = passage;
				},
			None => {
				index.insert(passage.id.clone(), out.len());
				out.push(passage);
			},
		}
	}

	out
}

pub fn merge_passages(
	left: &[RetrievedPassage],
	right: &[RetrievedPassage],
) -> Vec<RetrievedPassage> {
	dedup_passages(left.iter().chain(right).cloned())
}

pub fn merge_sub_question_results<I>(
	existing: Vec<SubQuestionAnswerResult>,
	incoming: I,
) -> Vec<SubQuestionAnswerResult>
where
	I: IntoIterator<Item = SubQuestionAnswerResult>,
{
	let mut seen: HashSet<QuestionId> = existing.iter().map(|result| result.question.id).collect();
	let mut out = existing;

	for result in incoming {
		if seen.insert(result.question.id) {
			out.push(result);
		}
	}

	out
}

/// Folds the branch results of one fan-out. Failed branches count as received and add no evidence.
pub fn collect_branch_results(results: Vec<BranchResult>) -> FanIn {
	let mut fan_in = FanIn { received: results.len(), ..Default::default() };
	let mut answered = Vec::new();

	for result in results {
		match result {
			BranchResult::Answered(result) => answered.push(*result),
			BranchResult::Failed { question, .. } => fan_in.failed.push(question),
			BranchResult::NoSubQuestions => {},
		}
	}

	fan_in.answered = merge_sub_question_results(Vec::new(), answered);
	fan_in.failed.sort();

	fan_in
}

/// Every passage the sub-answers of a round relied on, merged.
pub fn sub_answer_evidence(results: &[SubQuestionAnswerResult]) -> Vec<RetrievedPassage> {
	dedup_passages(results.iter().flat_map(|result| result.context_passages.iter().cloned()))
}

/// NaN scores rank with `None`, below every real score.
fn outranks(candidate: Option<f32>, current: Option<f32>) -> bool {
	match (ranked(candidate), ranked(current)) {
		(Some(candidate), Some(current)) => candidate > current,
		(Some(_), None) => true,
		(None, _) => false,
	}
}

fn ranked(score: Option<f32>) -> Option<f32> {
	score.filter(|score| !score.is_nan())
}
