//! Global and per-customer configuration records kept in a blob store.
//!
//! The layout is `main_config.json` for the shared base column catalog and
//! one `customer_config/<name>.json` per customer. Records written through
//! [`ConfigStore::save_customer`] are normalized first, so names are
//! lower-cased and container prefixes end with `/`.

use std::{collections::BTreeMap, sync::OnceLock};

use log::{error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    columns::ColumnCatalog,
    customer::CustomerConfig,
    error::{PipelineError, Result},
    io_utils::resolve_encoding,
    storage::BlobStorage,
};

pub const MAIN_CONFIG_BLOB: &str = "main_config.json";
pub const CUSTOMER_CONFIG_PREFIX: &str = "customer_config/";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Settings shared by every customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default)]
    pub base_columns: ColumnCatalog,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
}

/// Storage container naming rule: 3 to 63 characters, lowercase letters,
/// digits and single hyphens, starting and ending with a letter or digit.
pub fn is_valid_container_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    if !(3..=63).contains(&name.len()) || name.contains("--") {
        return false;
    }
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

/// Parses a comma-separated list of concern ids. Blank tokens are ignored.
pub fn parse_concern_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<i64>().map_err(|_| {
                PipelineError::Configuration(format!(
                    "Invalid concern id '{token}'; only numeric values are accepted"
                ))
            })
        })
        .collect()
}

/// Parses a comma-separated e-mail list; at least one address is required.
pub fn parse_email_list(raw: &str) -> Result<Vec<String>> {
    let emails: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();
    if emails.is_empty() {
        return Err(PipelineError::Configuration(
            "Email list cannot be empty".to_string(),
        ));
    }
    Ok(emails)
}

/// Lower-cases a container prefix and makes it end with a single `/`.
/// Empty input stays empty.
pub fn normalize_container(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/').to_lowercase();
    if trimmed.is_empty() {
        trimmed
    } else {
        format!("{trimmed}/")
    }
}

/// Validates and normalizes a customer record before it is stored.
pub fn normalize_customer(mut config: CustomerConfig) -> Result<CustomerConfig> {
    config.name = config.name.trim().to_lowercase();
    if config.name.is_empty() {
        return Err(PipelineError::Configuration(
            "Customer name cannot be empty".to_string(),
        ));
    }
    if config.name.contains('/') {
        return Err(PipelineError::Configuration(format!(
            "Customer name '{}' cannot contain '/'",
            config.name
        )));
    }

    config.source_container = normalize_container(&config.source_container);
    config.destination_container = normalize_container(&config.destination_container);
    let destination = config.destination_container.trim_end_matches('/');
    if !destination.is_empty() && !is_valid_container_name(destination) {
        return Err(PipelineError::Configuration(format!(
            "Invalid destination container name '{destination}'"
        )));
    }

    config.file_encoding = config.file_encoding.trim().to_lowercase();
    resolve_encoding(Some(config.file_encoding.as_str()))?;
    Ok(config)
}

/// Reads and writes configuration records in a blob store.
pub struct ConfigStore<S> {
    storage: S,
}

impl<S: BlobStorage> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        ConfigStore { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn customer_blob(name: &str) -> String {
        format!("{CUSTOMER_CONFIG_PREFIX}{name}.json")
    }

    pub fn load_main(&self) -> Result<MainConfig> {
        let raw = match self.storage.download(MAIN_CONFIG_BLOB) {
            Ok(raw) => raw,
            Err(PipelineError::BlobNotFound(_)) => Vec::new(),
            Err(err) => return Err(err),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(PipelineError::Configuration(format!(
                "{MAIN_CONFIG_BLOB} is empty or not found in the storage"
            )));
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save_main(&self, config: &MainConfig) -> Result<()> {
        let data = serde_json::to_vec_pretty(config)?;
        self.storage
            .upload(MAIN_CONFIG_BLOB, &data, JSON_CONTENT_TYPE)
    }

    /// Every stored customer record, sorted by name, together with the
    /// records that could not be read. Failures are keyed by the record's
    /// blob name without prefix and extension.
    pub fn list_customers(&self) -> Result<(Vec<CustomerConfig>, Vec<(String, PipelineError)>)> {
        let mut configs = Vec::new();
        let mut failures = Vec::new();
        for entry in self.storage.list(CUSTOMER_CONFIG_PREFIX)? {
            let Some(stem) = entry
                .name
                .strip_prefix(CUSTOMER_CONFIG_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let parsed = self
                .storage
                .download(&entry.name)
                .and_then(|raw| Ok(serde_json::from_slice::<CustomerConfig>(&raw)?));
            match parsed {
                Ok(config) => configs.push(config),
                Err(err) => {
                    error!("Failed to parse customer configuration '{}': {err}", entry.name);
                    failures.push((stem.to_string(), err));
                }
            }
        }
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        Ok((configs, failures))
    }

    pub fn load_customer(&self, name: &str) -> Result<CustomerConfig> {
        let raw = self
            .storage
            .download(&Self::customer_blob(&name.trim().to_lowercase()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Stores `config`. With `original_name` set and different from the new
    /// name, the record is renamed. Creating or renaming onto an existing
    /// record is refused.
    pub fn save_customer(
        &self,
        config: CustomerConfig,
        original_name: Option<&str>,
    ) -> Result<CustomerConfig> {
        let config = normalize_customer(config)?;
        let original = original_name.map(|n| n.trim().to_lowercase());
        let renaming = original.as_deref().is_some_and(|o| o != config.name);
        let target = Self::customer_blob(&config.name);

        if (original.is_none() || renaming) && self.storage.exists(&target)? {
            return Err(PipelineError::Configuration(format!(
                "Configuration for customer '{}' already exists",
                config.name
            )));
        }

        info!("Uploading configuration for customer '{}'", config.name);
        let data = serde_json::to_vec_pretty(&config)?;
        self.storage.upload(&target, &data, JSON_CONTENT_TYPE)?;

        if let Some(old) = original.filter(|_| renaming) {
            self.storage.delete(&Self::customer_blob(&old))?;
            info!("Renamed customer '{old}' to '{}'", config.name);
        }
        Ok(config)
    }

    pub fn delete_customer(&self, name: &str) -> Result<()> {
        let name = name.trim().to_lowercase();
        self.storage.delete(&Self::customer_blob(&name))?;
        info!("Deleted configuration for customer '{name}'");
        Ok(())
    }

    /// Sets the enabled flag of each listed customer. Every entry is
    /// attempted; failures are reported together afterwards.
    pub fn update_enabled(&self, statuses: &BTreeMap<String, bool>) -> Result<()> {
        let mut failed = Vec::new();
        for (name, enabled) in statuses {
            let result = self.load_customer(name).and_then(|mut config| {
                config.enabled = *enabled;
                let data = serde_json::to_vec_pretty(&config)?;
                self.storage
                    .upload(&Self::customer_blob(&config.name), &data, JSON_CONTENT_TYPE)
            });
            if let Err(err) = result {
                warn!("Failed to update enabled flag for '{name}': {err}");
                failed.push(name.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(format!(
                "Failed to update: {}",
                failed.join(", ")
            )))
        }
    }
}
