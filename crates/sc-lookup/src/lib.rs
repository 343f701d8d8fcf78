#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use sc_frame::Frame;
use sc_io::{read_csv_path, IoError};
use sc_types::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup table '{path}' needs an id column '{key}' and a display column")]
    MalformedTable { path: PathBuf, key: String },
    #[error(transparent)]
    Io(#[from] IoError),
}

/// Identifier of a product or store as it appears in the data. Integer ids
/// stay integers; everything else keys by its text rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityId {
    Int64(i64),
    Utf8(String),
}

impl EntityId {
    /// Key a data cell. Missing cells have no identity.
    #[must_use]
    pub fn from_scalar(value: &Scalar) -> Option<Self> {
        match value {
            Scalar::Int64(v) => Some(Self::Int64(*v)),
            Scalar::Utf8(v) => Some(Self::Utf8(v.clone())),
            other => other.display_string().map(Self::Utf8),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// Column layout of one lookup table and the prefix used when an id has no
/// entry.
#[derive(Debug, Clone, Copy)]
pub struct LookupSchema {
    pub key_column: &'static str,
    pub display_column: &'static str,
    pub fallback_prefix: &'static str,
}

pub const PRODUCT_LOOKUP: LookupSchema = LookupSchema {
    key_column: "product_id",
    display_column: "product_name",
    fallback_prefix: "Product",
};

pub const CITY_LOOKUP: LookupSchema = LookupSchema {
    key_column: "store_id",
    display_column: "city",
    fallback_prefix: "Store",
};

/// An id → display-name table. Resolution never fails: unmapped ids get a
/// deterministic `"{prefix} {id}"` label.
#[derive(Debug, Clone)]
pub struct LookupTable {
    names: HashMap<EntityId, String>,
    fallback_prefix: String,
}

impl LookupTable {
    pub fn load(path: impl AsRef<Path>, schema: LookupSchema) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let frame = read_csv_path(path)?;
        Self::from_frame(&frame, schema).ok_or_else(|| LookupError::MalformedTable {
            path: path.to_path_buf(),
            key: schema.key_column.to_owned(),
        })
    }

    /// Build from an in-memory frame. `None` when the key column is absent
    /// or there is no second column to fall back to for display names.
    #[must_use]
    pub fn from_frame(frame: &Frame, schema: LookupSchema) -> Option<Self> {
        let keys = frame.column(schema.key_column)?;
        let display = frame
            .column(schema.display_column)
            .or_else(|| frame.column(frame.column_names().get(1)?))?;

        let mut names = HashMap::with_capacity(keys.len());
        for (key_cell, display_cell) in keys.iter().zip(display) {
            let Some(id) = EntityId::from_scalar(key_cell) else {
                continue;
            };
            let Some(name) = display_cell.display_string() else {
                continue;
            };
            // Duplicate ids keep the last occurrence.
            names.insert(id, name);
        }

        Some(Self {
            names,
            fallback_prefix: schema.fallback_prefix.to_owned(),
        })
    }

    #[must_use]
    pub fn from_entries(
        entries: impl IntoIterator<Item = (EntityId, String)>,
        fallback_prefix: impl Into<String>,
    ) -> Self {
        Self {
            names: entries.into_iter().collect(),
            fallback_prefix: fallback_prefix.into(),
        }
    }

    #[must_use]
    pub fn display_name(&self, id: &EntityId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    #[must_use]
    pub fn resolve(&self, id: &EntityId) -> String {
        match self.names.get(id) {
            Some(name) => name.clone(),
            None => format!("{} {}", self.fallback_prefix, id),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The two support tables the pipeline needs, loaded eagerly up front and
/// passed into the aggregator as one immutable value.
#[derive(Debug, Clone)]
pub struct SalesLookups {
    pub products: LookupTable,
    pub cities: LookupTable,
}

impl SalesLookups {
    pub fn load(
        products_path: impl AsRef<Path>,
        cities_path: impl AsRef<Path>,
    ) -> Result<Self, LookupError> {
        Ok(Self {
            products: LookupTable::load(products_path, PRODUCT_LOOKUP)?,
            cities: LookupTable::load(cities_path, CITY_LOOKUP)?,
        })
    }

    #[must_use]
    pub fn from_tables(products: LookupTable, cities: LookupTable) -> Self {
        Self { products, cities }
    }
}
