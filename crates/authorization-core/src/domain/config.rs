//! Configuration (§3, §6): bunker/proxy/kill-switch/global-policy state.
//! A single committed value cached in memory and mirrored to the
//! `KeyValueStore` port on every mutation, so readers always see the
//! latest committed value without a store round-trip.

use authority_types::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::errors::{CoreError, CoreResult};

const MAX_RELAYS: usize = 8;
const CONFIG_KEY: &[u8] = b"config:state";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalSignPolicy {
    AskEveryTime,
    AskPerApp,
    AskPerKind,
    ManualApproval,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    const LOOPBACK_HOSTS: [&'static str; 3] = ["127.0.0.1", "::1", "localhost"];

    fn validate(&self) -> CoreResult<()> {
        if !Self::LOOPBACK_HOSTS.contains(&self.host.as_str()) {
            return Err(CoreError::InvalidInput {
                reason: "proxy host must be a loopback literal".to_string(),
            });
        }
        if self.port == 0 {
            return Err(CoreError::InvalidInput {
                reason: "proxy port must be 1-65535".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigurationState {
    pub bunker_enabled: bool,
    pub bunker_relays: Vec<String>,
    pub proxy: Option<ProxyConfig>,
    pub kill_switch_enabled: bool,
    pub global_sign_policy: GlobalSignPolicy,
}

impl Default for ConfigurationState {
    fn default() -> Self {
        Self {
            bunker_enabled: false,
            bunker_relays: Vec::new(),
            proxy: None,
            kill_switch_enabled: false,
            global_sign_policy: GlobalSignPolicy::AskPerApp,
        }
    }
}

pub struct Configuration {
    store: Arc<dyn KeyValueStore>,
    cached: parking_lot::RwLock<ConfigurationState>,
}

impl Configuration {
    pub fn new(store: Arc<dyn KeyValueStore>) -> CoreResult<Self> {
        let cached = match store.get(CONFIG_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| CoreError::DependencyUnavailable {
                reason: e.to_string(),
            })?,
            None => ConfigurationState::default(),
        };
        Ok(Self {
            store,
            cached: parking_lot::RwLock::new(cached),
        })
    }

    pub fn get(&self) -> ConfigurationState {
        self.cached.read().clone()
    }

    fn commit(&self, state: ConfigurationState) -> CoreResult<()> {
        let bytes = serde_json::to_vec(&state).map_err(|e| CoreError::DependencyUnavailable {
            reason: e.to_string(),
        })?;
        self.store.put(CONFIG_KEY, &bytes)?;
        *self.cached.write() = state;
        Ok(())
    }

    pub fn set_kill_switch(&self, enabled: bool) -> CoreResult<()> {
        let mut state = self.get();
        state.kill_switch_enabled = enabled;
        self.commit(state)
    }

    pub fn set_bunker_enabled(&self, enabled: bool) -> CoreResult<()> {
        let mut state = self.get();
        state.bunker_enabled = enabled;
        self.commit(state)
    }

    pub fn set_relays(&self, relays: Vec<String>) -> CoreResult<()> {
        if relays.len() > MAX_RELAYS {
            return Err(CoreError::InvalidInput {
                reason: format!("at most {MAX_RELAYS} relays are allowed"),
            });
        }
        for relay in &relays {
            if !relay.starts_with("wss://") {
                return Err(CoreError::InvalidInput {
                    reason: "relay URLs must use wss://".to_string(),
                });
            }
        }
        let mut state = self.get();
        state.bunker_relays = relays;
        self.commit(state)
    }

    pub fn set_proxy(&self, proxy: Option<ProxyConfig>) -> CoreResult<()> {
        if let Some(cfg) = &proxy {
            cfg.validate()?;
        }
        let mut state = self.get();
        state.proxy = proxy;
        self.commit(state)
    }

    pub fn set_global_sign_policy(&self, policy: GlobalSignPolicy) -> CoreResult<()> {
        let mut state = self.get();
        state.global_sign_policy = policy;
        self.commit(state)
    }
}
