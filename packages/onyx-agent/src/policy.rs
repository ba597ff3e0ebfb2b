//! Quality gates consulted by the orchestrator.

use onyx_config::Agent;

use crate::{GENERIC_FAILURE_ANSWER, GraphRunState};

/// Hooks for answer validation and the refinement decision. Every default approves.
pub trait QualityPolicy
where
	Self: Send + Sync,
{
	fn validate_initial_answer(&self, _state: &GraphRunState) -> bool {
		true
	}

	fn validate_refined_answer(&self, _state: &GraphRunState) -> bool {
		true
	}

	fn decide_refinement(&self, _state: &GraphRunState) -> bool {
		true
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;
impl QualityPolicy for DefaultPolicy {}

/// The policy is only asked once `allow_refinement` is set and the initial answer is usable.
pub fn should_refine(cfg: &Agent, policy: &dyn QualityPolicy, state: &GraphRunState) -> bool {
	cfg.allow_refinement
		&& state.initial_answer().is_some_and(|answer| answer != GENERIC_FAILURE_ANSWER)
		&& policy.decide_refinement(state)
}
