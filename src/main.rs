use anyhow::Result;
use tracing::{error, info};

use trawler::cli;
use trawler::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    logging::init_logging(args.verbose, args.log_file.as_deref())?;
    info!("Starting trawler v{}", env!("CARGO_PKG_VERSION"));

    match cli::process_command(args).await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e)
        }
    }
}
