use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = kb_admin::Args::parse();

	kb_admin::run(args).await
}
