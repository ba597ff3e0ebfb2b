use crate::{AgentContext, ChatMessage, Model, Result, is_affirmative, prompts};

const STAGE: &str = "compare";

/// Whether the refined answer is a real improvement on the initial one. Upstream failures are
/// returned; the orchestrator decides how to treat them.
pub async fn compare_answers(
	ctx: &AgentContext,
	question: &str,
	initial_answer: &str,
	refined_answer: &str,
) -> Result<bool> {
	let messages = [
		ChatMessage::system(prompts::COMPARE_SYSTEM),
		ChatMessage::user(format!(
			"Question:\n{question}\n\nInitial answer:\n{initial_answer}\n\nRefined answer:\n{refined_answer}"
		)),
	];
	let response = ctx.invoke(Model::Fast, &messages, STAGE).await?;

	Ok(is_affirmative(&response))
}
