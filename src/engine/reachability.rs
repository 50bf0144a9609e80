//! Reachability Computer
//!
//! Bounded breadth-first expansion over the follow relation. One batched
//! followee fetch per level.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::engine::error::{StoreError, StoreResult};

/// Minimal store capability: direct followees of a batch of users
#[async_trait]
pub trait FolloweeSource: Send + Sync {
    async fn followees(&self, ids: &[Uuid], cancel: &CancellationToken) -> StoreResult<Vec<Uuid>>;
}

pub struct ReachabilityComputer<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S: FolloweeSource + ?Sized> ReachabilityComputer<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Ids reachable from `anchor` within `hop_bound` follow edges, anchor included.
    /// Any fetch failure fails the whole computation.
    pub async fn reachable(
        &self,
        anchor: Uuid,
        hop_bound: u32,
        cancel: &CancellationToken,
    ) -> StoreResult<BTreeSet<Uuid>> {
        let mut visited = BTreeSet::from([anchor]);
        let mut frontier = vec![anchor];

        for level in 1..=hop_bound {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let next: Vec<Uuid> = self
                .source
                .followees(&frontier, cancel)
                .await?
                .into_iter()
                .filter(|id| visited.insert(*id))
                .collect();

            debug!(level, discovered = next.len(), "Reachability level expanded");
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(visited)
    }
}
