use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::record::ParcelRecord;

/// What makes two records "the same parcel" within one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// Exact WKT of the (possibly repaired) geometry.
    #[default]
    GeometryWkt,
    /// The registry's cadastral id.
    CadastralId,
}

impl DedupKey {
    pub fn key_for(self, record: &ParcelRecord) -> String {
        match self {
            Self::GeometryWkt => record.wkt(),
            Self::CadastralId => record.cadastral_id().to_string(),
        }
    }
}

/// Per-run set of records already accepted.
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    key: DedupKey,
    seen: AHashSet<String>,
}

impl DedupSet {
    pub fn new(key: DedupKey) -> Self {
        Self {
            key,
            seen: AHashSet::new(),
        }
    }

    pub const fn key(&self) -> DedupKey {
        self.key
    }

    /// Remember `record`; returns `false` if an equal one was already seen.
    pub fn insert(&mut self, record: &ParcelRecord) -> bool {
        self.insert_key(self.key.key_for(record))
    }

    pub fn insert_key(&mut self, key: String) -> bool {
        self.seen.insert(key)
    }

    pub fn contains(&self, record: &ParcelRecord) -> bool {
        self.contains_key(&self.key.key_for(record))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
