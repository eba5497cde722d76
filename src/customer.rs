//! Customer configuration records and their resolved column mappings.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    columns::{ColumnCatalog, ColumnMapping},
    error::{PipelineError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "json" => Ok(FileFormat::Json),
            other => Err(PipelineError::Configuration(format!(
                "Invalid file format: {other}"
            ))),
        }
    }
}

/// One customer's configuration record as stored in
/// `customer_config/<name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerConfig {
    pub name: String,
    #[serde(rename = "konserni")]
    pub concern_ids: BTreeSet<i64>,
    pub source_container: String,
    pub destination_container: String,
    pub file_format: FileFormat,
    pub file_encoding: String,
    #[serde(default)]
    pub extra_columns: Option<ColumnCatalog>,
    #[serde(default)]
    pub exclude_columns: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CustomerConfig {
    pub fn excluded_keys(&self) -> &[String] {
        self.exclude_columns.as_deref().unwrap_or_default()
    }
}

/// A customer whose configuration has been resolved against the base column
/// catalog.
///
/// Two mappings are kept. The *full* mapping ignores exclusions and drives the
/// editor and the history store, so stored rows always carry every column.
/// The *publish* mapping applies exclusions and drives the published extract.
/// An excluded base key that the extra columns redefine resolves to the extra
/// definition in both.
#[derive(Debug, Clone)]
pub struct Customer {
    pub config: CustomerConfig,
    full_mapping: ColumnMapping,
    publish_mapping: ColumnMapping,
}

impl Customer {
    pub fn new(config: CustomerConfig, base_columns: &ColumnCatalog) -> Result<Self> {
        let empty = ColumnCatalog::new();
        let extra = config.extra_columns.as_ref().unwrap_or(&empty);
        let publish_mapping = ColumnMapping::build(base_columns, extra, config.excluded_keys())?;
        let redefined: Vec<String> = config
            .excluded_keys()
            .iter()
            .filter(|key| extra.contains_key(key))
            .cloned()
            .collect();
        let full_mapping = ColumnMapping::build(base_columns, extra, &redefined)?;
        Ok(Customer {
            config,
            full_mapping,
            publish_mapping,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.full_mapping
    }

    pub fn publish_mapping(&self) -> &ColumnMapping {
        &self.publish_mapping
    }

    /// Display names of the excluded base columns, as they appear in a
    /// processed frame.
    pub fn excluded_display_names(&self) -> Vec<String> {
        self.config
            .excluded_keys()
            .iter()
            .filter(|key| !self.publish_mapping.is_allowed_source(key))
            .filter_map(|key| self.full_mapping.display_name(key))
            .map(str::to_string)
            .collect()
    }
}
