use anyhow::Result;
use clap::Parser;
use pdf_extractor::cli;
use tracing::error;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    match cli::dispatch(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    }
}
