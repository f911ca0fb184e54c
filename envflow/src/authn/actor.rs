//! API actors and their capabilities

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EnvError;
use crate::storage::settings::ActorSettings;
use crate::utils::sha256_hash;

/// What an actor may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Read => write!(f, "read"),
            Capability::Write => write!(f, "write"),
        }
    }
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl Actor {
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Credentials presented in the `Authorization` header
#[derive(Debug)]
pub enum Credentials {
    /// `Basic base64(name:token)`
    Basic { name: String, token: SecretString },

    /// `Bearer token`
    Bearer(SecretString),
}

impl Credentials {
    /// Parse an `Authorization` header value
    pub fn parse(header: &str) -> Result<Self, EnvError> {
        let (scheme, value) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| EnvError::Unauthenticated("malformed authorization header".into()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "bearer" => Ok(Credentials::Bearer(SecretString::from(value.trim().to_string()))),
            "basic" => {
                let decoded = STANDARD
                    .decode(value.trim())
                    .map_err(|_| EnvError::Unauthenticated("malformed basic credentials".into()))?;
                let decoded = String::from_utf8(decoded)
                    .map_err(|_| EnvError::Unauthenticated("malformed basic credentials".into()))?;
                let (name, token) = decoded
                    .split_once(':')
                    .ok_or_else(|| EnvError::Unauthenticated("malformed basic credentials".into()))?;
                Ok(Credentials::Basic {
                    name: name.to_string(),
                    token: SecretString::from(token.to_string()),
                })
            }
            other => Err(EnvError::Unauthenticated(format!(
                "unsupported authorization scheme: {}",
                other
            ))),
        }
    }
}

/// Authenticator trait for testability
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve credentials to an actor
    async fn authenticate(&self, credentials: &Credentials) -> Result<Actor, EnvError>;
}

/// Actors configured in the settings file, keyed by token digest
pub struct ActorDirectory {
    by_digest: HashMap<String, Actor>,
}

impl ActorDirectory {
    pub fn new(actors: &[ActorSettings]) -> Self {
        let by_digest = actors
            .iter()
            .map(|a| {
                let actor = Actor {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    capabilities: a.capabilities.clone(),
                };
                (a.token_sha256.to_ascii_lowercase(), actor)
            })
            .collect();
        Self { by_digest }
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    fn lookup(&self, token: &SecretString) -> Option<&Actor> {
        let digest = sha256_hash(token.expose_secret().as_bytes());
        self.by_digest.get(&digest)
    }
}

#[async_trait]
impl Authenticator for ActorDirectory {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Actor, EnvError> {
        let actor = match credentials {
            Credentials::Bearer(token) => self.lookup(token),
            Credentials::Basic { name, token } => self.lookup(token).filter(|a| &a.name == name),
        };

        match actor {
            Some(actor) => {
                debug!("Authenticated actor {}", actor.name);
                Ok(actor.clone())
            }
            None => Err(EnvError::Unauthenticated("invalid credentials".into())),
        }
    }
}
