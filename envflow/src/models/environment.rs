//! Environment models

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Kind of base environment referenced by a composite environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseKind {
    Logic,
    L3,
    Dc,
}

impl BaseKind {
    /// Field holding the batch in create payloads
    pub fn batch_field(&self) -> &'static str {
        match self {
            BaseKind::Logic => "logic",
            BaseKind::L3 => "l3",
            BaseKind::Dc => "dc",
        }
    }

    /// Main property used when rendering search results
    pub fn main_property(&self) -> &'static str {
        match self {
            BaseKind::Logic => "logic_environments",
            BaseKind::L3 => "l3_environments",
            BaseKind::Dc => "environments_dc",
        }
    }
}

impl std::fmt::Display for BaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BaseKind::Logic => "logic environment",
            BaseKind::L3 => "l3 environment",
            BaseKind::Dc => "dc environment",
        };
        write!(f, "{}", name)
    }
}

/// Logical, L3 or datacenter environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEnvironment {
    pub id: u64,
    pub name: String,
}

/// Create payload for a base environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBaseEnvironment {
    pub name: String,
}

/// IP version of an environment network config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

/// Network block allocatable inside an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub subnet: IpNet,
    pub new_prefix: u8,
    #[serde(rename = "type")]
    pub ip_version: IpVersion,
}

/// Composite environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: u64,
    pub name: String,
    pub grupo_l3: u64,
    pub ambiente_logico: u64,
    pub divisao_dc: u64,
    pub filter: Option<u64>,
    pub acl_path: Option<String>,
    pub ipv4_template: Option<String>,
    pub ipv6_template: Option<String>,
    pub link: Option<String>,
    pub min_num_vlan_1: Option<u32>,
    pub max_num_vlan_1: Option<u32>,
    pub min_num_vlan_2: Option<u32>,
    pub max_num_vlan_2: Option<u32>,
    pub vrf: Option<String>,
    pub default_vrf: Option<u64>,
    pub father_environment: Option<u64>,
    #[serde(default)]
    pub environment_vips: Vec<u64>,
    #[serde(default)]
    pub configs: Vec<EnvironmentConfig>,
}

/// Create or replace payload for a composite environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentPayload {
    /// Required on update, ignored on create
    #[serde(default)]
    pub id: Option<u64>,
    pub grupo_l3: u64,
    pub ambiente_logico: u64,
    pub divisao_dc: u64,
    #[serde(default)]
    pub filter: Option<u64>,
    #[serde(default)]
    pub acl_path: Option<String>,
    #[serde(default)]
    pub ipv4_template: Option<String>,
    #[serde(default)]
    pub ipv6_template: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub min_num_vlan_1: Option<u32>,
    #[serde(default)]
    pub max_num_vlan_1: Option<u32>,
    #[serde(default)]
    pub min_num_vlan_2: Option<u32>,
    #[serde(default)]
    pub max_num_vlan_2: Option<u32>,
    #[serde(default)]
    pub vrf: Option<String>,
    #[serde(default)]
    pub default_vrf: Option<u64>,
    #[serde(default)]
    pub father_environment: Option<u64>,
    #[serde(default)]
    pub environment_vips: Vec<u64>,
    #[serde(default)]
    pub configs: Vec<EnvironmentConfig>,
}

impl EnvironmentPayload {
    /// Build the stored record once references have been resolved
    pub fn into_environment(self, id: u64, name: String) -> Environment {
        Environment {
            id,
            name,
            grupo_l3: self.grupo_l3,
            ambiente_logico: self.ambiente_logico,
            divisao_dc: self.divisao_dc,
            filter: self.filter,
            acl_path: self.acl_path,
            ipv4_template: self.ipv4_template,
            ipv6_template: self.ipv6_template,
            link: self.link,
            min_num_vlan_1: self.min_num_vlan_1,
            max_num_vlan_1: self.max_num_vlan_1,
            min_num_vlan_2: self.min_num_vlan_2,
            max_num_vlan_2: self.max_num_vlan_2,
            vrf: self.vrf,
            default_vrf: self.default_vrf,
            father_environment: self.father_environment,
            environment_vips: self.environment_vips,
            configs: self.configs,
        }
    }
}

/// Display name of a composite environment
pub fn environment_name(dc: &str, logic: &str, l3: &str) -> String {
    format!("{} - {} - {}", dc, logic, l3)
}
