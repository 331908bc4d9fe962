//! The package-manager capability consumed by the execution engine.
//!
//! Mutating operations return an [`OperationHandle`] that streams progress and
//! ends with exactly one completion. A handle whose channel closes without a
//! completion is an interface-level failure.

pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

use crate::error::CapabilityError;

pub use simulated::{Fault, SimulatedPackageManager};

pub type GenerationId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub id: GenerationId,
    pub created_at: DateTime<Utc>,
    pub current: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Upgraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub package: String,
    pub change: ChangeKind,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
}

/// What the capability reports about the live system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub current_generation: Option<GenerationId>,
    pub previous_generation: Option<GenerationId>,
    pub installed: BTreeSet<String>,
    /// Running service -> package providing it.
    pub running_services: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Generation the system is on after the operation.
    pub generation: Option<GenerationId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationUpdate {
    Progress { percent: Option<f32>, message: String },
    Finished(Result<OperationOutcome, CapabilityError>),
}

/// Receiving side of a running operation.
#[derive(Debug)]
pub struct OperationHandle {
    rx: mpsc::Receiver<OperationUpdate>,
}

/// Sending side, held by the capability while the operation runs.
#[derive(Debug, Clone)]
pub struct OperationReporter {
    tx: mpsc::Sender<OperationUpdate>,
}

impl OperationHandle {
    pub fn channel(buffer: usize) -> (OperationReporter, OperationHandle) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (OperationReporter { tx }, OperationHandle { rx })
    }

    /// A handle that is already finished.
    pub fn finished(result: Result<OperationOutcome, CapabilityError>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: this cannot fail.
        let _ = tx.try_send(OperationUpdate::Finished(result));
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<OperationUpdate> {
        self.rx.recv().await
    }
}

impl OperationReporter {
    pub async fn progress(&self, percent: Option<f32>, message: impl Into<String>) {
        let _ = self
            .tx
            .send(OperationUpdate::Progress {
                percent,
                message: message.into(),
            })
            .await;
    }

    pub async fn finish(self, result: Result<OperationOutcome, CapabilityError>) {
        let _ = self.tx.send(OperationUpdate::Finished(result)).await;
    }
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(&self, package: &str) -> Result<OperationHandle, CapabilityError>;

    async fn remove(&self, package: &str) -> Result<OperationHandle, CapabilityError>;

    /// `None` updates the whole system.
    async fn update(&self, packages: Option<&[String]>) -> Result<OperationHandle, CapabilityError>;

    async fn rollback(&self, generation: GenerationId) -> Result<OperationHandle, CapabilityError>;

    async fn list_generations(&self) -> Result<Vec<GenerationMeta>, CapabilityError>;

    async fn diff(&self, from: GenerationId, to: GenerationId) -> Result<Vec<ChangeRecord>, CapabilityError>;

    async fn search(&self, query: &str) -> Result<Vec<PackageMeta>, CapabilityError>;

    async fn snapshot(&self) -> Result<SystemState, CapabilityError>;
}
