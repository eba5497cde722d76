//! Column catalog and mapping resolution.
//!
//! A [`ColumnCatalog`] is the ordered `source_key -> {name, dtype, decimals?,
//! length?}` table found in the global configuration (base columns) and in
//! each customer record (extra columns). [`ColumnMapping::build`] resolves a
//! customer's effective column set into the rename, dtype, decimals, and
//! allowed-column maps consumed by the editor and the serializers.
//!
//! Catalog order is significant: it defines output column order, so the
//! catalog deserializes JSON objects in document order instead of going
//! through a hash map.

use std::{collections::BTreeMap, fmt};

use log::{info, warn};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::error::{PipelineError, Result};

/// Declared type of a column, resolved once from the configured dtype label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Int,
    Float { decimals: Option<u32> },
    String { length: Option<u32> },
}

impl DataType {
    /// Resolves a dtype label by prefix (`int64` is `Int`, `float32` is
    /// `Float`). Unknown labels are treated as string passthrough.
    pub fn resolve(label: &str, decimals: Option<u32>, length: Option<u32>) -> DataType {
        let normalized = label.trim().to_ascii_lowercase();
        if normalized.starts_with("float") {
            DataType::Float { decimals }
        } else if normalized.starts_with("int") {
            DataType::Int
        } else {
            if !normalized.starts_with("string") {
                warn!("Unrecognized dtype '{label}', values are passed through as text");
            }
            DataType::String { length }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Int => "int",
            DataType::Float { .. } => "float",
            DataType::String { .. } => "string",
        }
    }

    pub fn decimals(&self) -> Option<u32> {
        match self {
            DataType::Float { decimals } => *decimals,
            _ => None,
        }
    }

    pub fn length(&self) -> Option<u32> {
        match self {
            DataType::String { length } => *length,
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Float {
                decimals: Some(decimals),
            } => write!(f, "float({decimals})"),
            DataType::String {
                length: Some(length),
            } => write!(f, "string({length})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// One logical column: where it comes from, what it is called on output, and
/// what type it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub source_key: String,
    pub display_name: String,
    pub data_type: DataType,
    dtype_label: String,
}

impl ColumnSpec {
    pub fn new(source_key: &str, display_name: &str, data_type: DataType) -> Self {
        ColumnSpec {
            source_key: source_key.to_string(),
            display_name: display_name.to_string(),
            dtype_label: data_type.as_str().to_string(),
            data_type,
        }
    }

    pub fn dtype_label(&self) -> &str {
        &self.dtype_label
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnDefinition {
    name: String,
    dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decimals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u32>,
}

impl ColumnDefinition {
    fn into_spec(self, source_key: String) -> ColumnSpec {
        let data_type = DataType::resolve(&self.dtype, self.decimals, self.length);
        ColumnSpec {
            source_key,
            display_name: self.name,
            data_type,
            dtype_label: self.dtype,
        }
    }

    fn from_spec(spec: &ColumnSpec) -> Self {
        ColumnDefinition {
            name: spec.display_name.clone(),
            dtype: spec.dtype_label.clone(),
            decimals: spec.data_type.decimals(),
            length: spec.data_type.length(),
        }
    }
}

/// Insertion-ordered set of column specs keyed by source key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnCatalog {
    columns: Vec<ColumnSpec>,
}

impl ColumnCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_key: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.source_key == source_key)
    }

    pub fn contains_key(&self, source_key: &str) -> bool {
        self.get(source_key).is_some()
    }

    /// Adds `spec`, replacing an existing entry with the same source key in
    /// place.
    pub fn insert(&mut self, spec: ColumnSpec) {
        match self
            .columns
            .iter_mut()
            .find(|c| c.source_key == spec.source_key)
        {
            Some(existing) => *existing = spec,
            None => self.columns.push(spec),
        }
    }

    pub fn remove(&mut self, source_key: &str) -> Option<ColumnSpec> {
        let pos = self
            .columns
            .iter()
            .position(|c| c.source_key == source_key)?;
        Some(self.columns.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<ColumnSpec> for ColumnCatalog {
    fn from_iter<T: IntoIterator<Item = ColumnSpec>>(iter: T) -> Self {
        let mut catalog = ColumnCatalog::new();
        for spec in iter {
            catalog.insert(spec);
        }
        catalog
    }
}

impl Serialize for ColumnCatalog {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for spec in &self.columns {
            map.serialize_entry(&spec.source_key, &ColumnDefinition::from_spec(spec))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnCatalog {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CatalogVisitor;

        impl<'de> Visitor<'de> for CatalogVisitor {
            type Value = ColumnCatalog;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of source column keys to column definitions")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut catalog = ColumnCatalog::new();
                while let Some((key, definition)) =
                    access.next_entry::<String, ColumnDefinition>()?
                {
                    catalog.insert(definition.into_spec(key));
                }
                Ok(catalog)
            }

            fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ColumnCatalog::new())
            }

            fn visit_none<E>(self) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ColumnCatalog::new())
            }
        }

        deserializer.deserialize_any(CatalogVisitor)
    }
}

/// Derived, immutable view of one customer's effective column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: Vec<ColumnSpec>,
    rename_map: BTreeMap<String, String>,
    dtype_map: BTreeMap<String, DataType>,
    decimals_map: BTreeMap<String, u32>,
    allowed_columns: Vec<(String, String)>,
}

impl ColumnMapping {
    /// Resolves `base` minus `excluded`, merged with `extra`. Base entries
    /// take precedence over extra entries with the same key.
    pub fn build(
        base: &ColumnCatalog,
        extra: &ColumnCatalog,
        excluded: &[String],
    ) -> Result<Self> {
        let mut filtered = base.clone();
        if !excluded.is_empty() {
            info!("Excluding from base columns: {excluded:?}");
        }
        for key in excluded {
            if filtered.remove(key).is_none() {
                return Err(PipelineError::Configuration(format!(
                    "Excluded column '{key}' is not defined in base columns"
                )));
            }
        }

        let mut combined = filtered;
        for spec in extra.iter() {
            if combined.contains_key(&spec.source_key) {
                info!(
                    "Duplicate key '{}' found in extra columns, skipping.",
                    spec.source_key
                );
                continue;
            }
            combined.insert(spec.clone());
        }

        let mut rename_map = BTreeMap::new();
        let mut dtype_map = BTreeMap::new();
        let mut decimals_map = BTreeMap::new();
        let mut allowed_columns = Vec::with_capacity(combined.len());
        for spec in combined.iter() {
            if dtype_map
                .insert(spec.display_name.clone(), spec.data_type.clone())
                .is_some()
            {
                return Err(PipelineError::Configuration(format!(
                    "Display name '{}' is used by more than one column",
                    spec.display_name
                )));
            }
            rename_map.insert(spec.source_key.clone(), spec.display_name.clone());
            if let Some(decimals) = spec.data_type.decimals() {
                decimals_map.insert(spec.display_name.clone(), decimals);
            }
            allowed_columns.push((spec.source_key.clone(), spec.display_name.clone()));
        }

        Ok(ColumnMapping {
            columns: combined.iter().cloned().collect(),
            rename_map,
            dtype_map,
            decimals_map,
            allowed_columns,
        })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rename_map(&self) -> &BTreeMap<String, String> {
        &self.rename_map
    }

    pub fn dtype_map(&self) -> &BTreeMap<String, DataType> {
        &self.dtype_map
    }

    pub fn decimals_map(&self) -> &BTreeMap<String, u32> {
        &self.decimals_map
    }

    /// Ordered `(source_key, display_name)` pairs.
    pub fn allowed_columns(&self) -> &[(String, String)] {
        &self.allowed_columns
    }

    pub fn is_allowed_source(&self, source_key: &str) -> bool {
        self.rename_map.contains_key(source_key)
    }

    pub fn display_names(&self) -> impl Iterator<Item = &str> {
        self.allowed_columns.iter().map(|(_, display)| display.as_str())
    }

    pub fn display_name(&self, source_key: &str) -> Option<&str> {
        self.rename_map.get(source_key).map(String::as_str)
    }
}
