// Secret Retrieval - credential lookup for the live feed

use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of named credentials
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, name: &str) -> Option<String>;

    fn has_secret(&self, name: &str) -> bool {
        self.get_secret(name).is_some()
    }
}

/// Reads `name` upper-cased from the process environment
/// (`twelve_data_api_key` -> `TWELVE_DATA_API_KEY`). Blank values count as missing.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }

    pub fn var_name(name: &str) -> String {
        name.to_uppercase()
    }
}

impl SecretStore for EnvSecretStore {
    fn get_secret(&self, name: &str) -> Option<String> {
        std::env::var(Self::var_name(name))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// In-memory store that can be written at runtime, e.g. by a key-configuration endpoint
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(name: &str, value: &str) -> Self {
        let store = Self::new();
        store.set_secret(name, value);
        store
    }

    pub fn set_secret(&self, name: &str, value: &str) {
        self.secrets.write().insert(name.to_string(), value.to_string());
    }

    pub fn remove_secret(&self, name: &str) -> bool {
        self.secrets.write().remove(name).is_some()
    }
}

impl SecretStore for StaticSecretStore {
    fn get_secret(&self, name: &str) -> Option<String> {
        self.secrets.read().get(name).filter(|v| !v.trim().is_empty()).cloned()
    }
}
