use serde::Serialize;

use crate::{
	AgentContext, ChatMessage, Error, Model, Result, RetrievedPassage, ToolChoice, context, prompts,
};

const STAGE: &str = "route_decision";
const DIRECT_MARKER: &str = "direct_llm_answer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRoute {
	/// Nothing was chosen; the run is a no-op.
	NoTool,
	Search,
	Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
	AgentSearch,
	DirectLlmAnswer,
}

pub fn route_initial_tool_choice(choice: Option<&ToolChoice>) -> ToolRoute {
	match choice {
		None => ToolRoute::NoTool,
		Some(choice) if choice.is_search() => ToolRoute::Search,
		Some(_) => ToolRoute::Tool,
	}
}

/// Asks the fast model whether exploratory results make retrieval worthwhile. Anything other than
/// an explicit `direct_llm_answer`, including a failed call, keeps the agent search path.
pub async fn decide_route(
	ctx: &AgentContext,
	question: &str,
	exploratory: &[RetrievedPassage],
) -> Result<RouteDecision> {
	let (sample, _) = context::format_context(
		ctx.tokens.as_ref(),
		exploratory,
		(ctx.cfg.providers.llm_fast.max_input_tokens / 2) as usize,
	);
	let messages = [
		ChatMessage::system(prompts::ROUTE_SYSTEM),
		ChatMessage::user(format!("Question:\n{question}\n\nSearch results:\n{sample}")),
	];

	match ctx.invoke(Model::Fast, &messages, STAGE).await {
		Ok(response) => Ok(parse_route(&response)),
		Err(Error::Cancelled) => Err(Error::Cancelled),
		Err(err) => {
			tracing::warn!(error = %err, "Route decision failed; using agent search.");

			Ok(RouteDecision::AgentSearch)
		},
	}
}

pub fn parse_route(response: &str) -> RouteDecision {
	if response.to_lowercase().contains(DIRECT_MARKER) {
		RouteDecision::DirectLlmAnswer
	} else {
		RouteDecision::AgentSearch
	}
}
