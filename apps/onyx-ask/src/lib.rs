use std::{fs, path::PathBuf, sync::Arc};

use clap::Parser;
use color_eyre::eyre;
use serde_json::Value;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use onyx_agent::{
	AgentContext, AgentEvent, EventSink, GraphRunState, PgAuditSink, Providers, RunRequest,
	SessionKeys, ToolChoice,
};
use onyx_config::Config;
use onyx_storage::db::Db;
use onyx_tokens::{HfCounter, TokenCounter, WordCounter};

#[derive(Debug, Parser)]
#[command(
	version = onyx_cli::VERSION,
	rename_all = "kebab",
	styles = onyx_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// The question to answer.
	#[arg(value_name = "QUESTION")]
	pub question: String,
	/// Tool picked upstream, `run_search` when omitted. Any other tool goes through the tool path.
	#[arg(long, value_name = "NAME")]
	pub tool: Option<String>,
	/// JSON arguments for a non-search tool.
	#[arg(long, value_name = "JSON")]
	pub tool_args: Option<String>,
	/// Run with no tool chosen; the agent only logs.
	#[arg(long, conflicts_with_all = ["tool", "tool_args"])]
	pub no_tool: bool,
	/// Prior conversation, as plain text, given to decomposition.
	#[arg(long, value_name = "FILE")]
	pub history: Option<PathBuf>,
	#[arg(long)]
	pub no_refinement: bool,
	/// Print every agent event to stdout as a JSON line.
	#[arg(long)]
	pub events: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let mut config = onyx_config::load(&args.config)?;

	onyx_cli::init_tracing(&config.service.log_level);

	if args.no_refinement {
		config.agent.allow_refinement = false;
	}

	let request = build_request(&args)?;
	let ctx = build_context(config, &args).await?;
	let cancel = ctx.cancel.clone();
	let interrupt = tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("Interrupt received; cancelling the run.");
			cancel.cancel();
		}
	});
	let (events, rx) = EventSink::channel();
	let printer = spawn_printer(rx, args.events);
	let outcome = onyx_agent::run(&ctx, &events, request).await;

	drop(events);
	interrupt.abort();
	printer.await??;

	let state = outcome?;

	print_outcome(&state);

	Ok(())
}

pub fn build_request(args: &Args) -> color_eyre::Result<RunRequest> {
	if args.no_tool {
		return Ok(RunRequest { question: args.question.clone(), tool_choice: None });
	}

	let arguments = match args.tool_args.as_deref() {
		Some(raw) => serde_json::from_str(raw)
			.map_err(|err| eyre::eyre!("--tool-args must be valid JSON: {err}."))?,
		None => Value::Null,
	};

	Ok(RunRequest {
		question: args.question.clone(),
		tool_choice: Some(ToolChoice {
			name: args.tool.clone().unwrap_or_else(|| ToolChoice::SEARCH.to_string()),
			arguments,
		}),
	})
}

async fn build_context(config: Config, args: &Args) -> color_eyre::Result<AgentContext> {
	let tokens = token_counter(&config)?;
	let postgres = config.storage.postgres.clone();
	let mut ctx = AgentContext::new(config, Providers::default(), tokens);

	if let Some(path) = args.history.as_ref() {
		ctx = ctx.with_history(fs::read_to_string(path)?);
	}
	if let Some(postgres) = postgres {
		let db = Db::connect(&postgres).await?;

		db.ensure_schema().await?;

		let session = SessionKeys::new();

		tracing::info!(
			chat_session_id = %session.chat_session_id,
			primary_message_id = %session.primary_message_id,
			"Recording sub-questions to Postgres."
		);

		ctx = ctx.with_audit(Arc::new(PgAuditSink::new(db)), session);
	}

	Ok(ctx)
}

fn token_counter(config: &Config) -> color_eyre::Result<Arc<dyn TokenCounter>> {
	match config.tokens.tokenizer_repo.as_deref() {
		Some(repo) => {
			let counter = HfCounter::from_pretrained(repo).map_err(|err| eyre::eyre!(err))?;

			Ok(Arc::new(counter))
		},
		None => Ok(Arc::new(WordCounter)),
	}
}

fn spawn_printer(
	mut rx: UnboundedReceiver<AgentEvent>,
	print: bool,
) -> JoinHandle<serde_json::Result<()>> {
	tokio::spawn(async move {
		while let Some(event) = rx.recv().await {
			if print {
				println!("{}", serde_json::to_string(&event)?);
			}
		}

		Ok(())
	})
}

fn print_outcome(state: &GraphRunState) {
	if let Some(response) = state.tool_response() {
		println!("{response}");
	}
	if let Some(answer) = state.final_answer() {
		println!("{answer}");
	}
}
