use anyhow::Context;
use clap::Parser;
use socker_cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let code = runtime.block_on(socker_cli::run_main(cli));
    // The monitor may still be running if it overran its grace period.
    runtime.shutdown_background();
    std::process::exit(code);
}
