use clap::Parser;

use onyx_ask::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	onyx_ask::run(args).await
}
