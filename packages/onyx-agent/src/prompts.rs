//! System prompts for every LLM call the agent makes.

pub const REWRITE_SYSTEM: &str = "Rewrite the question into short search queries for a document \
index. Each query must target a different phrasing or aspect of the question. Output one query per \
line with no numbering and no commentary.";

pub const VERIFY_SYSTEM: &str = "Is the document relevant to the question? Consider only whether \
the document contains information that helps answer the question. Reply with yes or no.";

pub const SUB_ANSWER_SYSTEM: &str = "Answer the sub-question using only the numbered documents. \
Cite the documents you rely on as [D1], [D2] and so on. If the documents do not contain the answer, \
say that you do not know.";

pub const GRADE_SYSTEM: &str = "Does the proposed answer address the question adequately and stay \
consistent with the documents? Reply with yes or no.";

pub const DECOMPOSE_SYSTEM: &str = "Decompose the question into narrower sub-questions that can each \
be answered independently by searching a document index. Output one sub-question per line with no \
commentary. Output nothing if the question needs no decomposition.";

pub const REFINED_DECOMPOSE_SYSTEM: &str = "Write refined sub-questions that fill the gaps left by \
the initial answer. Use the extracted entities, relationships and terms, and avoid repeating \
sub-questions that were already answered well. Output one sub-question per line with no commentary.";

pub const ANSWER_SYSTEM: &str = "Write the final answer to the question using the numbered documents \
and the sub-question answers. Cite documents as [D1], [D2] and so on. Do not invent facts that the \
documents do not support.";

pub const DIRECT_ANSWER_SYSTEM: &str = "Write the final answer to the question from your own \
knowledge. Keep it concise and say so when you are unsure.";

pub const ENTITY_SYSTEM: &str = "Extract entities, relationships and terms from the documents that \
matter for the question. Return JSON with the keys entities, relationships and terms. Each entity \
has name and entity_type, each relationship has name, relationship_type and entities, and each term \
has name, term_type and similar_to.";

pub const COMPARE_SYSTEM: &str = "Compare the two answers to the question. Reply yes if the refined \
answer is a substantial improvement over the initial answer, otherwise reply no.";

pub const ROUTE_SYSTEM: &str = "Decide whether the question needs a document search. Reply with \
agent_search if the documents are needed, or direct_llm_answer if the question can be answered \
without them.";

/// Appends the persona to a system prompt when one is configured.
pub fn with_persona(system: &str, persona: &str) -> String {
	if persona.trim().is_empty() {
		system.to_string()
	} else {
		format!("{system}\n\n{persona}")
	}
}
