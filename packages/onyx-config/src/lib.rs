mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Agent, AgentAnswer, AgentRerank, AgentRetrieval, Config, LlmProviderConfig, Postgres,
	ProviderConfig, Providers, SearchProviderConfig, Service, Storage, Tokens,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::invalid("service.log_level", "must be non-empty."));
	}

	for (label, llm) in [
		("providers.llm_primary", &cfg.providers.llm_primary),
		("providers.llm_fast", &cfg.providers.llm_fast),
	] {
		if llm.api_key.trim().is_empty() {
			return Err(Error::invalid(format!("{label}.api_key"), "must be non-empty."));
		}
		if llm.model.trim().is_empty() {
			return Err(Error::invalid(format!("{label}.model"), "must be non-empty."));
		}
		if !llm.temperature.is_finite() || !(0.0..=2.0).contains(&llm.temperature) {
			return Err(Error::invalid(
				format!("{label}.temperature"),
				"must be a finite number in the range 0.0-2.0.",
			));
		}
		if llm.max_input_tokens <= cfg.agent.answer.max_output_tokens {
			return Err(Error::invalid(
				format!("{label}.max_input_tokens"),
				"must be greater than agent.answer.max_output_tokens.",
			));
		}
	}

	if let Some(rerank) = cfg.providers.rerank.as_ref()
		&& rerank.api_key.trim().is_empty()
	{
		return Err(Error::invalid("providers.rerank.api_key", "must be non-empty."));
	}
	if cfg.providers.search.api_base.trim().is_empty() {
		return Err(Error::invalid("providers.search.api_base", "must be non-empty."));
	}
	if let Some(postgres) = cfg.storage.postgres.as_ref() {
		if postgres.dsn.trim().is_empty() {
			return Err(Error::invalid("storage.postgres.dsn", "must be non-empty."));
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::invalid(
				"storage.postgres.pool_max_conns",
				"must be greater than zero.",
			));
		}
	}

	let agent = &cfg.agent;

	for (key, value) in [
		("agent.retrieval.max_results_per_query", agent.retrieval.max_results_per_query),
		("agent.retrieval.max_expanded_queries", agent.retrieval.max_expanded_queries),
		("agent.rerank.max_results", agent.rerank.max_results),
		("agent.answer.max_answer_context_docs", agent.answer.max_answer_context_docs),
	] {
		if value == 0 {
			return Err(Error::invalid(key, "must be greater than zero."));
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.tokens.tokenizer_repo.as_deref().map(|repo| repo.trim().is_empty()).unwrap_or(false) {
		cfg.tokens.tokenizer_repo = None;
	}
	if cfg.agent.answer.persona.as_deref().map(|persona| persona.trim().is_empty()).unwrap_or(false)
	{
		cfg.agent.answer.persona = None;
	}

	cfg.service.log_level = cfg.service.log_level.trim().to_string();
}
