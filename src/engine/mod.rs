// DuoDB Engine - Core module structure
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod reachability;
pub mod relational;
pub mod graph;
pub mod normalize;
pub mod executor;
pub mod import;
pub mod search;
pub mod seed;
pub mod database;
pub mod api;
pub mod cli;
pub mod logging;

pub use config::Config;
pub use database::DuoDb;
pub use executor::DualExecutor;
pub use import::ImportPipeline;
