use clap::Parser;
use radiocast_lib::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    radiocast_lib::utils::logging::init_logging();

    radiocast_lib::run(cli).await
}
