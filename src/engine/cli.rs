//! DuoDB CLI Module
//! Command-line interface for querying, importing into and serving both stores

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::import::ImportKind;
use crate::engine::query::Target;
use crate::engine::relational::SqlDialect;

#[derive(Parser, Debug)]
#[command(name = "duodb")]
#[command(author = "DuoDB Team")]
#[command(version)]
#[command(about = "One query shape, executed against a relational and a graph store", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides the config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Execute a query request file against one or both stores
    Query {
        /// JSON query request
        request: PathBuf,

        /// Both, Relational or Graph
        #[arg(short, long, default_value = "both", value_parser = parse_target)]
        targets: Target,
    },

    /// Print the SQL and Cypher a query request translates to
    Explain {
        /// JSON query request
        request: PathBuf,

        /// SQL dialect to render
        #[arg(short, long, default_value = "sqlite", value_parser = parse_dialect)]
        dialect: SqlDialect,
    },

    /// Import a JSON batch
    Import {
        /// JSON batch: a full setup object, or an array of one entity kind
        batch: PathBuf,

        /// Entity kind of an array batch
        #[arg(short, long, value_parser = parse_kind)]
        kind: Option<ImportKind>,

        /// Both, Relational or Graph
        #[arg(short, long, default_value = "both", value_parser = parse_target)]
        targets: Target,
    },

    /// Load the deterministic demo dataset
    Seed {
        /// Both, Relational or Graph
        #[arg(short, long, default_value = "both", value_parser = parse_target)]
        targets: Target,
    },

    /// Search articles in the relational store
    Search {
        /// JSON search request
        request: PathBuf,
    },

    /// Show row and node counts of both stores
    Status,
}

fn parse_target(s: &str) -> Result<Target, String> {
    s.parse()
}

fn parse_dialect(s: &str) -> Result<SqlDialect, String> {
    SqlDialect::from_str(s).ok_or_else(|| format!("unknown dialect '{}'", s))
}

fn parse_kind(s: &str) -> Result<ImportKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "articles" => Ok(ImportKind::Articles),
        "users" => Ok(ImportKind::Users),
        "orders" => Ok(ImportKind::Orders),
        "social-graph" | "socialgraph" | "follows" => Ok(ImportKind::SocialGraph),
        other => Err(format!("unknown import kind '{}'", other)),
    }
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
