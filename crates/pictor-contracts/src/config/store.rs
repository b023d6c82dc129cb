use std::env;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::settings::{Configuration, GenerationMode, ImageSize, Quality, Style};
use super::validate::{validate, ValidationError};
use crate::storage::{LocalStore, StorageError};

pub const CONFIG_KEY: &str = "azureOpenAIConfig";

pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_CREDENTIAL: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";

/// Values supplied by the deployment environment at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectedSecrets {
    pub endpoint: Option<String>,
    pub credential: Option<String>,
    pub deployment: Option<String>,
}

impl InjectedSecrets {
    pub fn from_env() -> Self {
        Self {
            endpoint: non_empty_env(ENV_ENDPOINT),
            credential: non_empty_env(ENV_CREDENTIAL),
            deployment: non_empty_env(ENV_DEPLOYMENT),
        }
    }

    /// Overwrites only the fields this source actually provides. Returns the
    /// names of the fields that were applied.
    pub fn apply(&self, config: &mut Configuration) -> Vec<&'static str> {
        let mut applied = Vec::new();
        if let Some(endpoint) = non_blank(self.endpoint.as_deref()) {
            config.endpoint = endpoint;
            applied.push("endpoint");
        }
        if let Some(credential) = non_blank(self.credential.as_deref()) {
            config.credential = credential;
            applied.push("credential");
        }
        if let Some(deployment) = non_blank(self.deployment.as_deref()) {
            config.deployment = deployment;
            applied.push("deployment");
        }
        applied
    }
}

/// Persisted record, decoded one field at a time so a blank count or an
/// unknown choice only drops that field.
struct StoredConfiguration(Map<String, Value>);

impl StoredConfiguration {
    fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn choice<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.0.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(choice) => Some(choice),
            Err(err) => {
                warn!(field = key, error = %err, "ignoring unreadable saved value");
                None
            }
        }
    }

    fn count(&self, key: &str) -> Option<u32> {
        let count = match self.0.get(key)? {
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(text) => text.trim().parse::<u32>().ok(),
            _ => None,
        };
        if count.is_none() {
            debug!(field = key, "ignoring unreadable saved count");
        }
        count.filter(|n| *n > 0)
    }

    fn merge_into(self, config: &mut Configuration) {
        let text_fields = [
            ("apiEndpoint", &mut config.endpoint),
            ("apiKey", &mut config.credential),
            ("deploymentName", &mut config.deployment),
            ("apiVersion", &mut config.api_version),
            ("prompt", &mut config.prompt),
            ("customStyle", &mut config.custom_style),
        ];
        for (key, target) in text_fields {
            if let Some(value) = self.text(key) {
                *target = value;
            }
        }
        if let Some(size) = self.choice::<ImageSize>("size") {
            config.size = size;
        }
        if let Some(quality) = self.choice::<Quality>("quality") {
            config.quality = quality;
        }
        if let Some(style) = self.choice::<Style>("style") {
            config.style = style;
        }
        if let Some(n) = self.count("numImages") {
            config.n = n;
        }
        if let Some(mode) = self.choice::<GenerationMode>("generationMode") {
            config.mode = mode;
        }
    }
}

/// Live configuration plus its persisted copy.
#[derive(Debug)]
pub struct ConfigStore {
    store: LocalStore,
    current: Configuration,
}

impl ConfigStore {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            current: Configuration::default(),
        }
    }

    /// Startup sequence: restore persisted values, then let the injected
    /// source override whatever it provides.
    pub fn open(store: LocalStore, secrets: &InjectedSecrets) -> Self {
        let mut config_store = Self::new(store);
        config_store.load();
        let applied = secrets.apply(&mut config_store.current);
        if !applied.is_empty() {
            info!(fields = ?applied, "applied injected configuration");
        }
        config_store
    }

    /// Merges the persisted record into the live configuration. Returns
    /// `false` and leaves everything untouched when nothing usable is stored.
    pub fn load(&mut self) -> bool {
        let Some(record) = self.store.load_json::<Map<String, Value>>(CONFIG_KEY) else {
            debug!("no saved configuration found");
            return false;
        };
        StoredConfiguration(record).merge_into(&mut self.current);
        debug!(config = ?self.current, "configuration loaded");
        true
    }

    pub fn save(&mut self, config: &Configuration) -> Result<(), StorageError> {
        self.store.save_json(CONFIG_KEY, config)?;
        self.current = config.clone();
        info!("configuration saved");
        Ok(())
    }

    pub fn current(&self) -> Configuration {
        self.current.clone()
    }

    /// Applies edits from the presentation layer to the live configuration.
    pub fn update(&mut self, edit: impl FnOnce(&mut Configuration)) {
        edit(&mut self.current);
    }

    pub fn validate(&self, config: &Configuration) -> Result<(), ValidationError> {
        validate(config)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    non_blank(env::var(key).ok().as_deref())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
