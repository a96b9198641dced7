//! CLI for the relayfetch relay transport.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relayfetch_core::config;

use commands::{run_config, run_fetch, FetchArgs};

/// Top-level CLI for relayfetch.
#[derive(Debug, Parser)]
#[command(name = "relayfetch")]
#[command(about = "relayfetch: send HTTP requests through relay front-ends", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch a URL through the configured relays and print the response body.
    Fetch {
        /// Target HTTP/HTTPS URL.
        url: String,

        /// Request method.
        #[arg(short = 'X', long, default_value = "GET", value_name = "METHOD")]
        method: String,

        /// Extra request header, e.g. -H 'Accept: text/plain'. May be repeated.
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// Request body.
        #[arg(short = 'd', long, value_name = "DATA")]
        data: Option<String>,

        /// Print the status line and response headers before the body.
        #[arg(short = 'i', long)]
        include: bool,

        /// Relay endpoint to use instead of the configured list. May be repeated.
        #[arg(long = "relay", value_name = "URL")]
        relays: Vec<String>,
    },

    /// Show the config file location and the effective retry settings.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                url,
                method,
                headers,
                data,
                include,
                relays,
            } => {
                let args = FetchArgs {
                    url,
                    method,
                    headers,
                    data,
                    include,
                    relays,
                };
                run_fetch(&cfg, args).await?;
            }
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
