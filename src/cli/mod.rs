pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file in addition to stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a site starting from its base URL
    Crawl {
        /// Base URL to start crawling from
        #[arg(required = true)]
        url: String,

        /// Configuration profile to use
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Override the number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Check the status of a crawl job
    Status {
        /// Job ID to check status for
        #[arg(required = true)]
        job_id: String,
    },

    /// Search crawled pages
    Search {
        /// Query matched against page URLs, titles, and content
        #[arg(required = true)]
        query: String,

        /// Restrict the search to one site's base URL
        #[arg(short, long)]
        site: Option<String>,

        /// Result page, starting at 1
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Results per page
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// List crawled pages for a site
    Pages {
        /// Base URL of the site
        #[arg(required = true)]
        site: String,

        /// Result page, starting at 1
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Results per page
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// Show store-wide crawling statistics and recent activity
    Stats,

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { url, profile, workers } => {
            info!("Starting crawl on {} with profile {}", url, profile);
            commands::crawl(url, profile, workers).await
        }
        Commands::Status { job_id } => commands::status(job_id).await,
        Commands::Search {
            query,
            site,
            page,
            per_page,
        } => commands::search(query, site, page, per_page).await,
        Commands::Pages {
            site,
            page,
            per_page,
        } => commands::pages(site, page, per_page).await,
        Commands::Stats => commands::stats().await,
        Commands::Config { profile, list } => {
            if list {
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                commands::manage_profile(profile_name)
            } else {
                commands::show_config()
            }
        }
    }
}
