//! In-memory environment store with an optional JSON snapshot

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::environment::search::{self, SearchParams, SearchResult};
use crate::errors::EnvError;
use crate::filesys::file::File;
use crate::models::environment::{
    environment_name, BaseEnvironment, BaseKind, Environment, EnvironmentConfig,
    EnvironmentPayload, IpVersion, NewBaseEnvironment,
};
use crate::models::flow::FlowRule;

/// Flow persistence as seen by the orchestrator
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Look up an environment, `NotFound` if it does not exist
    async fn resolve(&self, environment_id: u64) -> Result<Environment, EnvError>;

    /// Stored flows of an environment in insertion order
    async fn list_flows(&self, environment_id: u64) -> Result<Vec<FlowRule>, EnvError>;

    /// Add a flow, or replace the one with the same id
    async fn persist_flow(&self, environment_id: u64, flow: FlowRule) -> Result<(), EnvError>;

    async fn remove_flow(&self, environment_id: u64, flow_id: &str) -> Result<(), EnvError>;

    /// Persist the current state, if the store is backed by a file.
    ///
    /// Failures are logged; the in-memory state stays authoritative.
    async fn checkpoint(&self) {}
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct NextIds {
    logic: u64,
    l3: u64,
    dc: u64,
    environment: u64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    next_ids: NextIds,
    #[serde(default)]
    logic: BTreeMap<u64, BaseEnvironment>,
    #[serde(default)]
    l3: BTreeMap<u64, BaseEnvironment>,
    #[serde(default)]
    dc: BTreeMap<u64, BaseEnvironment>,
    #[serde(default)]
    environments: BTreeMap<u64, Environment>,
    #[serde(default)]
    flows: BTreeMap<u64, Vec<FlowRule>>,
}

type EnvironmentKey = (u64, u64, u64);

fn key_of(grupo_l3: u64, ambiente_logico: u64, divisao_dc: u64) -> EnvironmentKey {
    (grupo_l3, ambiente_logico, divisao_dc)
}

impl StoreData {
    fn bases(&self, kind: BaseKind) -> &BTreeMap<u64, BaseEnvironment> {
        match kind {
            BaseKind::Logic => &self.logic,
            BaseKind::L3 => &self.l3,
            BaseKind::Dc => &self.dc,
        }
    }

    fn bases_mut(&mut self, kind: BaseKind) -> &mut BTreeMap<u64, BaseEnvironment> {
        match kind {
            BaseKind::Logic => &mut self.logic,
            BaseKind::L3 => &mut self.l3,
            BaseKind::Dc => &mut self.dc,
        }
    }

    fn next_id(&mut self, kind: Option<BaseKind>) -> u64 {
        let counter = match kind {
            Some(BaseKind::Logic) => &mut self.next_ids.logic,
            Some(BaseKind::L3) => &mut self.next_ids.l3,
            Some(BaseKind::Dc) => &mut self.next_ids.dc,
            None => &mut self.next_ids.environment,
        };
        *counter += 1;
        *counter
    }

    fn base_name(&self, kind: BaseKind, id: u64) -> Result<&str, EnvError> {
        self.bases(kind)
            .get(&id)
            .map(|b| b.name.as_str())
            .ok_or_else(|| EnvError::NotFound(format!("{} {} not found", kind, id)))
    }

    fn environment(&self, id: u64) -> Result<&Environment, EnvError> {
        self.environments
            .get(&id)
            .ok_or_else(|| EnvError::NotFound(format!("environment {} not found", id)))
    }

    /// Check references and attribute ranges, returning the derived name
    fn validate(&self, payload: &EnvironmentPayload, self_id: Option<u64>) -> Result<String, EnvError> {
        let dc = self.base_name(BaseKind::Dc, payload.divisao_dc)?;
        let logic = self.base_name(BaseKind::Logic, payload.ambiente_logico)?;
        let l3 = self.base_name(BaseKind::L3, payload.grupo_l3)?;

        if let Some(father) = payload.father_environment {
            if Some(father) == self_id {
                return Err(EnvError::ValidationError(format!(
                    "environment {} cannot be its own father",
                    father
                )));
            }
            self.environment(father)?;

            // Walk up the chain so an update cannot close a loop
            let mut seen = HashSet::new();
            let mut cursor = Some(father);
            while let Some(id) = cursor {
                if Some(id) == self_id || !seen.insert(id) {
                    return Err(EnvError::ValidationError(format!(
                        "father environment {} would create a cycle",
                        father
                    )));
                }
                cursor = self.environments.get(&id).and_then(|e| e.father_environment);
            }
        }

        check_vlan_range(payload.min_num_vlan_1, payload.max_num_vlan_1, 1)?;
        check_vlan_range(payload.min_num_vlan_2, payload.max_num_vlan_2, 2)?;
        for config in &payload.configs {
            check_config(config)?;
        }

        Ok(environment_name(dc, logic, l3))
    }

    fn children_of(&self, id: u64) -> Vec<u64> {
        self.environments
            .values()
            .filter(|e| e.father_environment == Some(id))
            .map(|e| e.id)
            .collect()
    }
}

fn check_vlan_range(min: Option<u32>, max: Option<u32>, range: u8) -> Result<(), EnvError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(EnvError::ValidationError(format!(
                "min_num_vlan_{} ({}) is greater than max_num_vlan_{} ({})",
                range, min, range, max
            )));
        }
    }
    Ok(())
}

fn check_config(config: &EnvironmentConfig) -> Result<(), EnvError> {
    let family_matches = matches!(
        (&config.subnet, config.ip_version),
        (IpNet::V4(_), IpVersion::V4) | (IpNet::V6(_), IpVersion::V6)
    );
    if !family_matches {
        return Err(EnvError::ValidationError(format!(
            "subnet {} does not match its declared type",
            config.subnet
        )));
    }
    if config.new_prefix < config.subnet.prefix_len()
        || config.new_prefix > config.subnet.max_prefix_len()
    {
        return Err(EnvError::ValidationError(format!(
            "new_prefix {} is out of range for subnet {}",
            config.new_prefix, config.subnet
        )));
    }
    Ok(())
}

fn reference(id: u64, name: &str) -> Value {
    json!({ "id": id, "name": name })
}

/// Environment hierarchy and the flows owned by each environment
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    data: RwLock<StoreData>,
    snapshot: Option<File>,
    saving: Mutex<()>,
}

impl EnvironmentStore {
    /// Empty store without a snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store, loading the snapshot file when it exists
    pub async fn open(snapshot: Option<File>) -> Result<Self, EnvError> {
        let mut data = StoreData::default();
        if let Some(file) = &snapshot {
            if file.exists().await {
                data = file.read_json().await?;
                info!(
                    "Loaded {} environments from snapshot {:?}",
                    data.environments.len(),
                    file.path()
                );
            }
        }

        Ok(Self {
            data: RwLock::new(data),
            snapshot,
            saving: Mutex::new(()),
        })
    }

    /// Write the snapshot file, if one is configured
    pub async fn save(&self) -> Result<(), EnvError> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let _saving = self.saving.lock().await;
        let data = self.data.read().await;
        file.write_json_atomic(&*data).await?;
        debug!("Saved environment snapshot to {:?}", file.path());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Base environments
    // ------------------------------------------------------------------

    /// Create a batch of base environments; names are unique per kind
    pub async fn create_base(
        &self,
        kind: BaseKind,
        batch: Vec<NewBaseEnvironment>,
    ) -> Result<Vec<u64>, EnvError> {
        let mut data = self.data.write().await;

        let mut taken: HashSet<String> = data
            .bases(kind)
            .values()
            .map(|b| b.name.to_lowercase())
            .collect();
        let mut names = Vec::with_capacity(batch.len());
        for item in batch {
            let name = item.name.trim().to_string();
            if name.is_empty() {
                return Err(EnvError::ValidationError(format!("{} name is empty", kind)));
            }
            if !taken.insert(name.to_lowercase()) {
                return Err(EnvError::Conflict(format!("{} {} already exists", kind, name)));
            }
            names.push(name);
        }

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = data.next_id(Some(kind));
            data.bases_mut(kind).insert(id, BaseEnvironment { id, name });
            ids.push(id);
        }
        debug!("Created {} {}(s): {:?}", ids.len(), kind, ids);
        drop(data);
        self.checkpoint().await;
        Ok(ids)
    }

    pub async fn get_base(&self, kind: BaseKind, id: u64) -> Result<BaseEnvironment, EnvError> {
        let data = self.data.read().await;
        let name = data.base_name(kind, id)?;
        Ok(BaseEnvironment {
            id,
            name: name.to_string(),
        })
    }

    pub async fn search_base(
        &self,
        kind: BaseKind,
        params: &SearchParams,
    ) -> Result<SearchResult<BaseEnvironment>, EnvError> {
        let records: Vec<BaseEnvironment> = self.data.read().await.bases(kind).values().cloned().collect();
        search::apply(records, params)
    }

    /// Detail-only fields of base environments: the composites using them
    pub async fn base_details(&self, kind: BaseKind, bases: &[BaseEnvironment]) -> Vec<Map<String, Value>> {
        let data = self.data.read().await;
        bases
            .iter()
            .map(|base| {
                let users: Vec<u64> = data
                    .environments
                    .values()
                    .filter(|e| {
                        let referenced = match kind {
                            BaseKind::Logic => e.ambiente_logico,
                            BaseKind::L3 => e.grupo_l3,
                            BaseKind::Dc => e.divisao_dc,
                        };
                        referenced == base.id
                    })
                    .map(|e| e.id)
                    .collect();
                let mut details = Map::new();
                details.insert("environments".into(), json!(users));
                details
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Composite environments
    // ------------------------------------------------------------------

    pub async fn search_environments(
        &self,
        params: &SearchParams,
    ) -> Result<SearchResult<Environment>, EnvError> {
        let records: Vec<Environment> = self.data.read().await.environments.values().cloned().collect();
        search::apply(records, params)
    }

    /// Fetch environments by id, in the order requested
    pub async fn get_environments(&self, ids: &[u64]) -> Result<Vec<Environment>, EnvError> {
        let data = self.data.read().await;
        ids.iter().map(|id| data.environment(*id).cloned()).collect()
    }

    /// Create a batch of environments; nothing is stored if any element fails
    pub async fn create_environments(
        &self,
        batch: Vec<EnvironmentPayload>,
    ) -> Result<Vec<u64>, EnvError> {
        let mut data = self.data.write().await;

        let mut keys: HashSet<EnvironmentKey> = data
            .environments
            .values()
            .map(|e| key_of(e.grupo_l3, e.ambiente_logico, e.divisao_dc))
            .collect();
        let mut staged = Vec::with_capacity(batch.len());
        for payload in batch {
            let name = data.validate(&payload, None)?;
            if !keys.insert(key_of(payload.grupo_l3, payload.ambiente_logico, payload.divisao_dc)) {
                return Err(EnvError::Conflict(format!("environment {} already exists", name)));
            }
            staged.push((payload, name));
        }

        let mut ids = Vec::with_capacity(staged.len());
        for (payload, name) in staged {
            let id = data.next_id(None);
            data.environments.insert(id, payload.into_environment(id, name));
            ids.push(id);
        }
        info!("Created environments {:?}", ids);
        drop(data);
        self.checkpoint().await;
        Ok(ids)
    }

    /// Replace a batch of environments; nothing changes if any element fails
    pub async fn update_environments(
        &self,
        batch: Vec<EnvironmentPayload>,
    ) -> Result<Vec<u64>, EnvError> {
        let mut data = self.data.write().await;

        let mut batch_ids = HashSet::new();
        for payload in &batch {
            let id = payload
                .id
                .ok_or_else(|| EnvError::ValidationError("environment id is required".into()))?;
            if !batch_ids.insert(id) {
                return Err(EnvError::ValidationError(format!(
                    "environment {} appears twice in the batch",
                    id
                )));
            }
            data.environment(id)?;
        }

        let mut keys: HashSet<EnvironmentKey> = data
            .environments
            .values()
            .filter(|e| !batch_ids.contains(&e.id))
            .map(|e| key_of(e.grupo_l3, e.ambiente_logico, e.divisao_dc))
            .collect();
        let mut staged = Vec::with_capacity(batch.len());
        for payload in batch {
            let id = payload.id.unwrap_or_default();
            let name = data.validate(&payload, Some(id))?;
            if !keys.insert(key_of(payload.grupo_l3, payload.ambiente_logico, payload.divisao_dc)) {
                return Err(EnvError::Conflict(format!("environment {} already exists", name)));
            }
            staged.push((id, payload, name));
        }

        let mut ids = Vec::with_capacity(staged.len());
        for (id, payload, name) in staged {
            data.environments.insert(id, payload.into_environment(id, name));
            ids.push(id);
        }
        info!("Updated environments {:?}", ids);
        drop(data);
        self.checkpoint().await;
        Ok(ids)
    }

    /// Delete environments that own no flows, VIP associations or children
    pub async fn delete_environments(&self, ids: &[u64]) -> Result<(), EnvError> {
        let mut data = self.data.write().await;
        let doomed: HashSet<u64> = ids.iter().copied().collect();

        for id in &doomed {
            let environment = data.environment(*id)?;
            let flows = data.flows.get(id).map_or(0, Vec::len);
            if flows > 0 {
                return Err(EnvError::Conflict(format!(
                    "environment {} still has {} flow(s)",
                    id, flows
                )));
            }
            if !environment.environment_vips.is_empty() {
                return Err(EnvError::Conflict(format!(
                    "environment {} is associated with VIP environments {:?}",
                    id, environment.environment_vips
                )));
            }
            let children: Vec<u64> = data
                .children_of(*id)
                .into_iter()
                .filter(|child| !doomed.contains(child))
                .collect();
            if !children.is_empty() {
                return Err(EnvError::Conflict(format!(
                    "environment {} is the father of {:?}",
                    id, children
                )));
            }
        }

        for id in &doomed {
            data.environments.remove(id);
            data.flows.remove(id);
        }
        info!("Deleted environments {:?}", ids);
        drop(data);
        self.checkpoint().await;
        Ok(())
    }

    /// Environments associated with one VIP environment, or with any
    pub async fn environments_by_vip(&self, vip_id: Option<u64>) -> Vec<Environment> {
        let data = self.data.read().await;
        data.environments
            .values()
            .filter(|e| match vip_id {
                Some(vip) => e.environment_vips.contains(&vip),
                None => !e.environment_vips.is_empty(),
            })
            .cloned()
            .collect()
    }

    /// Expanded references and detail-only fields for each environment
    pub async fn environment_details(&self, environments: &[Environment]) -> Vec<Map<String, Value>> {
        let data = self.data.read().await;
        let name_of = |kind: BaseKind, id: u64| data.base_name(kind, id).unwrap_or_default().to_string();

        environments
            .iter()
            .map(|env| {
                let mut details = Map::new();
                details.insert(
                    "grupo_l3".into(),
                    reference(env.grupo_l3, &name_of(BaseKind::L3, env.grupo_l3)),
                );
                details.insert(
                    "ambiente_logico".into(),
                    reference(env.ambiente_logico, &name_of(BaseKind::Logic, env.ambiente_logico)),
                );
                details.insert(
                    "divisao_dc".into(),
                    reference(env.divisao_dc, &name_of(BaseKind::Dc, env.divisao_dc)),
                );
                let father = env
                    .father_environment
                    .and_then(|id| data.environments.get(&id))
                    .map(|f| reference(f.id, &f.name))
                    .unwrap_or(Value::Null);
                details.insert("father_environment".into(), father);
                details.insert("children".into(), json!(data.children_of(env.id)));
                let flows: Vec<&str> = data
                    .flows
                    .get(&env.id)
                    .map(|flows| flows.iter().filter_map(|f| f.id.as_deref()).collect())
                    .unwrap_or_default();
                details.insert("flows".into(), json!(flows));
                details
            })
            .collect()
    }

    /// Record counts, reported by the health endpoint
    pub async fn counts(&self) -> HashMap<&'static str, usize> {
        let data = self.data.read().await;
        HashMap::from([
            ("logic_environments", data.logic.len()),
            ("l3_environments", data.l3.len()),
            ("environments_dc", data.dc.len()),
            ("environments", data.environments.len()),
            ("flows", data.flows.values().map(Vec::len).sum()),
        ])
    }
}

#[async_trait]
impl FlowStore for EnvironmentStore {
    async fn resolve(&self, environment_id: u64) -> Result<Environment, EnvError> {
        self.data.read().await.environment(environment_id).cloned()
    }

    async fn list_flows(&self, environment_id: u64) -> Result<Vec<FlowRule>, EnvError> {
        let data = self.data.read().await;
        data.environment(environment_id)?;
        Ok(data.flows.get(&environment_id).cloned().unwrap_or_default())
    }

    async fn persist_flow(&self, environment_id: u64, flow: FlowRule) -> Result<(), EnvError> {
        let mut data = self.data.write().await;
        data.environment(environment_id)?;
        let Some(flow_id) = flow.id.clone() else {
            return Err(EnvError::Internal(
                "cannot persist a flow without a controller id".into(),
            ));
        };

        let flows = data.flows.entry(environment_id).or_default();
        match flows.iter_mut().find(|f| f.id.as_deref() == Some(flow_id.as_str())) {
            Some(existing) => *existing = flow,
            None => flows.push(flow),
        }
        Ok(())
    }

    async fn remove_flow(&self, environment_id: u64, flow_id: &str) -> Result<(), EnvError> {
        let mut data = self.data.write().await;
        data.environment(environment_id)?;
        let missing = || {
            EnvError::NotFound(format!(
                "flow {} not found in environment {}",
                flow_id, environment_id
            ))
        };
        let flows = data.flows.get_mut(&environment_id).ok_or_else(missing)?;
        let position = flows
            .iter()
            .position(|f| f.id.as_deref() == Some(flow_id))
            .ok_or_else(missing)?;
        flows.remove(position);
        if flows.is_empty() {
            data.flows.remove(&environment_id);
        }
        Ok(())
    }

    async fn checkpoint(&self) {
        if let Err(e) = self.save().await {
            warn!("Failed to save environment snapshot: {}", e);
        }
    }
}
