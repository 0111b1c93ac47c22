use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = kb_worker::Args::parse();

	kb_worker::run(args).await
}
