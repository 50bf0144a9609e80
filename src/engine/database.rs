//! DuoDB store context
//! Opens the relational and graph stores for a project and hands out the
//! executor and import pipeline wired to them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::config::{Config, ConfigError};
use crate::engine::error::{StoreError, StoreResult};
use crate::engine::executor::DualExecutor;
use crate::engine::graph::{GraphStore, MemoryGraph};
use crate::engine::import::{BatchSizes, ImportPipeline};
use crate::engine::model::StoreStats;
use crate::engine::relational::{RelationalStore, SqliteStore};

const MEMORY_PATH: &str = ":memory:";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct DuoDb {
    config: Arc<Config>,
    project_dir: PathBuf,
    relational: Arc<SqliteStore>,
    graph: Arc<MemoryGraph>,
}

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}

impl DuoDb {
    pub fn open(project_dir: &Path, config: Config) -> Result<Self, DatabaseError> {
        let relational = if config.relational.path == Path::new(MEMORY_PATH) {
            SqliteStore::in_memory()?
        } else {
            SqliteStore::open(
                &resolve(project_dir, &config.relational.path),
                config.relational.pool_size,
            )?
        };
        let graph = match &config.graph.snapshot {
            Some(path) => MemoryGraph::with_snapshot(&resolve(project_dir, path))?,
            None => MemoryGraph::new(),
        };
        info!(
            project = %config.project.name,
            relational = %relational.path().display(),
            "Stores ready"
        );

        Ok(Self {
            config: Arc::new(config),
            project_dir: project_dir.to_path_buf(),
            relational: Arc::new(relational),
            graph: Arc::new(graph),
        })
    }

    /// Open with the project's config file, or the defaults when it has none
    pub fn open_project(project_dir: &Path) -> Result<Self, DatabaseError> {
        let config = Config::load_or_default(project_dir)?;
        Self::open(project_dir, config)
    }

    /// Both stores in memory
    pub fn ephemeral() -> Result<Self, DatabaseError> {
        Self::open(Path::new("."), Config::ephemeral("duodb"))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn sqlite(&self) -> &SqliteStore {
        &self.relational
    }

    pub fn relational(&self) -> Arc<dyn RelationalStore> {
        self.relational.clone()
    }

    pub fn graph(&self) -> Arc<dyn GraphStore> {
        self.graph.clone()
    }

    pub fn executor(&self) -> DualExecutor {
        DualExecutor::new(
            self.relational(),
            self.graph(),
            self.config.query.limits(),
            Duration::from_millis(self.config.query.timeout_ms.max(1)),
        )
    }

    pub fn importer(&self) -> ImportPipeline {
        ImportPipeline::new(
            self.relational(),
            self.graph(),
            BatchSizes::from(&self.config.import),
        )
    }

    /// Row counts of the relational store and node/edge counts of the graph
    pub async fn stats(
        &self,
        cancel: &CancellationToken,
    ) -> (StoreResult<StoreStats>, StoreResult<StoreStats>) {
        futures_util::future::join(
            RelationalStore::stats(self.relational.as_ref(), cancel),
            GraphStore::stats(self.graph.as_ref(), cancel),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_stores_start_empty() {
        let db = DuoDb::ephemeral().unwrap();
        let (relational, graph) = db.stats(&CancellationToken::new()).await;
        assert_eq!(relational.unwrap(), StoreStats::default());
        assert_eq!(graph.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_project_paths_resolve_under_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = DuoDb::open_project(dir.path()).unwrap();
        assert_eq!(db.sqlite().path(), dir.path().join("./data/duodb.db"));
        assert!(dir.path().join("data").join("duodb.db").exists());
    }
}
