use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;

use sales_rollup::{run, Config};

#[derive(Parser)]
#[command(
    version,
    about = "Organizes sales spreadsheets into monthly folders and writes a consolidated report per month"
)]
struct Args {
    /// Directory containing the sales .xlsx/.xls files
    #[arg(short, long, default_value = "./Input")]
    input: PathBuf,
    /// Directory in which to create the year/month folders and reports
    #[arg(short, long, default_value = "./Output")]
    output: PathBuf,
    /// Log debug detail as well
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose {
        "sales_rollup=debug"
    } else {
        "sales_rollup=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .without_time()
        .init();

    let config = Config {
        input_dir: args.input,
        output_dir: args.output,
    };
    let summary = run(&config).inspect_err(|e| error!("run failed: {e:#}"))?;
    info!(
        "{} files found, {} skipped, {} of {} months reported",
        summary.files_found,
        summary.files_skipped,
        summary.reports().len(),
        summary.months.len()
    );
    info!("process finished");
    Ok(())
}
