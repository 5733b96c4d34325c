//! A minimal read surface shared by the emulation and the controller
//! adapter so the convergence loop can compare the two without caring
//! which side it is looking at.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view query failed: {0}")]
    Query(String),
}

/// Counted projection of one side's topology knowledge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewCounts {
    pub hosts: usize,
    pub switches: usize,
    pub links: usize,
}

#[async_trait]
pub trait TopologyView: Send + Sync {
    /// Current host/switch/link counts as this side sees them.
    async fn counts(&self) -> Result<ViewCounts, ViewError>;
}
