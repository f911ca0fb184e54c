//! In-memory controller, for local runs without a real SDN controller

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::controller::Controller;
use crate::errors::EnvError;

/// Controller that keeps installed flows in memory
///
/// Installs of payloads registered with [`MemoryController::reject_install`]
/// and removals of ids registered with [`MemoryController::reject_removal`]
/// fail, which makes partial failures reproducible.
pub struct MemoryController {
    next_id: AtomicU64,
    installed: RwLock<BTreeMap<String, (u64, serde_json::Value)>>,
    rejected_installs: RwLock<Vec<serde_json::Value>>,
    rejected_removals: RwLock<HashSet<String>>,
    latency: Option<Duration>,
}

impl MemoryController {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            installed: RwLock::new(BTreeMap::new()),
            rejected_installs: RwLock::new(Vec::new()),
            rejected_removals: RwLock::new(HashSet::new()),
            latency: None,
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make installs of this exact payload fail
    pub fn reject_install(&self, flow: serde_json::Value) {
        let mut rejected = self.rejected_installs.write().unwrap_or_else(|e| e.into_inner());
        rejected.push(flow);
    }

    /// Make removals of this flow id fail
    pub fn reject_removal(&self, flow_id: &str) {
        let mut rejected = self.rejected_removals.write().unwrap_or_else(|e| e.into_inner());
        rejected.insert(flow_id.to_string());
    }

    /// Clear every registered failure
    pub fn heal(&self) {
        self.rejected_installs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.rejected_removals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Flow ids installed for an environment, in id order
    pub fn installed(&self, environment_id: u64) -> Vec<String> {
        let installed = self.installed.read().unwrap_or_else(|e| e.into_inner());
        installed
            .iter()
            .filter(|(_, (env, _))| *env == environment_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Controller for MemoryController {
    async fn install(
        &self,
        environment_id: u64,
        flow: &serde_json::Value,
    ) -> Result<String, EnvError> {
        self.simulate_latency().await;

        let rejected = {
            let rejected = self.rejected_installs.read().unwrap_or_else(|e| e.into_inner());
            rejected.contains(flow)
        };
        if rejected {
            return Err(EnvError::Upstream(format!(
                "controller rejected flow on environment {}",
                environment_id
            )));
        }

        let flow_id = format!("flow-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut installed = self.installed.write().unwrap_or_else(|e| e.into_inner());
        installed.insert(flow_id.clone(), (environment_id, flow.clone()));
        debug!("Installed {} on environment {}", flow_id, environment_id);
        Ok(flow_id)
    }

    async fn remove(&self, environment_id: u64, flow_id: &str) -> Result<(), EnvError> {
        self.simulate_latency().await;

        let rejected = {
            let rejected = self.rejected_removals.read().unwrap_or_else(|e| e.into_inner());
            rejected.contains(flow_id)
        };
        if rejected {
            return Err(EnvError::Upstream(format!(
                "controller refused to remove {} on environment {}",
                flow_id, environment_id
            )));
        }

        let mut installed = self.installed.write().unwrap_or_else(|e| e.into_inner());
        installed.remove(flow_id);
        debug!("Removed {} on environment {}", flow_id, environment_id);
        Ok(())
    }
}
