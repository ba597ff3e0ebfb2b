use serde::Deserialize;

use onyx_tokens::available_budget;

use crate::{
	AgentContext, ChatMessage, EntityRelationshipTermExtraction, Error, Model, Result,
	RetrievedPassage, context, prompts,
};

const STAGE: &str = "entity_extraction";

/// Some models wrap the payload in an outer object.
#[derive(Deserialize)]
struct Wrapped {
	retrieved_entities_relationships: EntityRelationshipTermExtraction,
}

/// Extracts entities, relationships and terms from `passages`.
///
/// Upstream failures and output that does not parse yield an empty extraction with a warning.
pub async fn extract_entities(
	ctx: &AgentContext,
	question: &str,
	passages: &[RetrievedPassage],
) -> Result<EntityRelationshipTermExtraction> {
	let reserved = format!("{}\nQuestion:\n{question}\n\nDocuments:\n", prompts::ENTITY_SYSTEM);
	let budget = available_budget(
		ctx.tokens.as_ref(),
		ctx.cfg.providers.llm_fast.max_input_tokens,
		&reserved,
		ctx.cfg.agent.answer.max_output_tokens,
	);
	let (documents, _) = context::format_context(ctx.tokens.as_ref(), passages, budget);
	let messages = [
		ChatMessage::system(prompts::ENTITY_SYSTEM),
		ChatMessage::user(format!("Question:\n{question}\n\nDocuments:\n{documents}")),
	];
	let raw = match ctx.invoke(Model::Fast, &messages, STAGE).await {
		Ok(raw) => raw,
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Entity extraction failed; continuing without entities.");

			return Ok(EntityRelationshipTermExtraction::default());
		},
	};

	Ok(parse_extraction(&raw).unwrap_or_else(|| {
		tracing::warn!("Entity extraction returned malformed JSON; continuing without entities.");

		EntityRelationshipTermExtraction::default()
	}))
}

/// Parses extraction JSON, tolerating a Markdown code fence and the wrapped form.
pub fn parse_extraction(raw: &str) -> Option<EntityRelationshipTermExtraction> {
	let body = strip_code_fence(raw);

	if let Ok(wrapped) = serde_json::from_str::<Wrapped>(body) {
		return Some(wrapped.retrieved_entities_relationships);
	}

	serde_json::from_str(body).ok()
}

/// Text form used in refinement prompts.
pub fn format_extraction(extraction: &EntityRelationshipTermExtraction) -> String {
	if extraction.is_empty() {
		return "(none)".to_string();
	}

	let mut lines = Vec::new();

	if !extraction.entities.is_empty() {
		lines.push("Entities:".to_string());
		lines.extend(
			extraction
				.entities
				.iter()
				.map(|entity| format!("- {} ({})", entity.name, entity.entity_type)),
		);
	}
	if !extraction.relationships.is_empty() {
		lines.push("Relationships:".to_string());
		lines.extend(extraction.relationships.iter().map(|relationship| {
			format!(
				"- {} ({}): {}",
				relationship.name,
				relationship.relationship_type,
				relationship.entities.join(", ")
			)
		}));
	}
	if !extraction.terms.is_empty() {
		lines.push("Terms:".to_string());
		lines.extend(extraction.terms.iter().map(|term| {
			if term.similar_to.is_empty() {
				format!("- {} ({})", term.name, term.term_type)
			} else {
				let similar = term.similar_to.join(", ");

				format!("- {} ({}), similar to {similar}", term.name, term.term_type)
			}
		}));
	}

	lines.join("\n")
}

fn strip_code_fence(raw: &str) -> &str {
	let trimmed = raw.trim();
	let Some(rest) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let rest = rest.strip_prefix("json").unwrap_or(rest);

	rest.strip_suffix("```").unwrap_or(rest).trim()
}
