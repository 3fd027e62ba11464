//! Command-line interface definitions.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. Global options may also be supplied through environment variables.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::models::ListingKind;
use crate::store::ListingQuery;

/// Command-line arguments for the opportunity aggregator.
///
/// # Examples
///
/// ```sh
/// # Run forever: one cycle now, then every few hours
/// opportunity_aggregator --webdriver-url http://localhost:9515
///
/// # A single cycle against a custom registry
/// opportunity_aggregator --sources ./my_sources.yaml once
///
/// # Source health as Markdown
/// opportunity_aggregator status --markdown ./status.md
///
/// # Browse the catalog
/// opportunity_aggregator list --kind hackathon --skill python --limit 10
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a config.yaml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the catalog snapshot
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// WebDriver endpoint used for rendered sources
    #[arg(long, env = "WEBDRIVER_URL", global = true)]
    pub webdriver_url: Option<String>,

    /// Source registry YAML replacing the built-in one
    #[arg(long, env = "SOURCES_FILE", global = true)]
    pub sources: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The subcommand to run; `serve` when none is given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a cycle now, then keep refreshing on the configured cadence until Ctrl-C
    Serve,
    /// Run a single cycle and exit
    Once,
    /// Run a single retention pass and exit
    Retention,
    /// Print catalog totals and per-source health
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Also write a Markdown dashboard to this path
        #[arg(long)]
        markdown: Option<PathBuf>,
    },
    /// Print the source registry
    Sources,
    /// Query the catalog
    List(ListArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ListArgs {
    #[arg(long)]
    pub kind: Option<ListingKind>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub organization: Option<String>,

    /// Match any of these skills (repeatable)
    #[arg(long = "skill")]
    pub skills: Vec<String>,

    /// Free-text search over title, organization and description
    #[arg(short = 'q', long)]
    pub text: Option<String>,

    /// Include inactive listings
    #[arg(long)]
    pub all: bool,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Print JSON instead of one line per listing
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn to_query(&self) -> ListingQuery {
        ListingQuery {
            kind: self.kind,
            category: self.category.clone(),
            organization: self.organization.clone(),
            skills: self.skills.clone(),
            text: self.text.clone(),
            active_only: !self.all,
            offset: self.offset,
            limit: Some(self.limit),
        }
    }
}
