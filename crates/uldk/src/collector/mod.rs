//! Deduplicating writer of parcel records into a host vector layer.
//!
//! The collector owns the per-run [`DedupSet`]: adding a record whose key was already
//! seen is silently skipped. Edits go through the layer's edit session and are
//! committed in batches. A layer that already carries uncommitted edits is never
//! touched; the caller has to save or discard them first.

use ahash::AHashSet;
use itertools::Itertools;
use tracing::{debug, info, instrument, warn};

mod dedup;
mod layer;

pub use dedup::{DedupKey, DedupSet};
pub use error::CollectorError;
use error::Result;
pub use layer::{Feature, LayerError, MemoryLayer, VectorLayer};

use crate::config::CollectorConfig;
use crate::record::{ParcelField, ParcelRecord, parse_parcel_row};

/// Outcome of one [`ResultCollector::add`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub added: usize,
    pub duplicates: usize,
}

/// Writes parcel records into `L`, skipping duplicates within the run.
#[derive(Debug)]
pub struct ResultCollector<L: VectorLayer> {
    layer: L,
    mapping: Vec<(ParcelField, String)>,
    extra_mapping: Vec<(usize, String)>,
    missing: Vec<ParcelField>,
    dedup: DedupSet,
    batch_size: usize,
}

impl<L: VectorLayer> ResultCollector<L> {
    /// Collector for a layer built with the default parcel schema.
    ///
    /// Fails with [`CollectorError::SchemaMismatch`] if any default field is absent.
    pub fn with_default_fields(layer: L, config: &CollectorConfig) -> Result<Self> {
        let collector = Self::build(layer, config, |field| field.default_name().to_string());
        if collector.missing.is_empty() {
            Ok(collector)
        } else {
            Err(CollectorError::SchemaMismatch {
                layer: collector.layer.name().to_string(),
                missing: collector.missing,
            })
        }
    }

    /// Collector for an arbitrary existing layer, matching fields by name.
    ///
    /// Names come from `config.field_names`, falling back to the defaults, and match
    /// case-insensitively. Semantic fields with no target are reported by
    /// [`ResultCollector::missing_fields`] and left out of written features.
    pub fn map_by_name(layer: L, config: &CollectorConfig) -> Self {
        let collector = Self::build(layer, config, |field| {
            config
                .field_names
                .get(&field)
                .cloned()
                .unwrap_or_else(|| field.default_name().to_string())
        });
        if !collector.missing.is_empty() {
            warn!(
                layer = collector.layer.name(),
                missing = %collector.missing.iter().join(", "),
                "Some parcel attributes have no matching layer field"
            );
        }
        collector
    }

    fn build(layer: L, config: &CollectorConfig, wanted: impl Fn(ParcelField) -> String) -> Self {
        let layer_fields = layer.field_names();
        let find = |name: &str| {
            layer_fields
                .iter()
                .find(|f| f.eq_ignore_ascii_case(name))
                .cloned()
        };

        let mut mapping = Vec::new();
        let mut missing = Vec::new();
        for field in ParcelField::ALL {
            match find(&wanted(field)) {
                Some(target) => mapping.push((field, target)),
                None => missing.push(field),
            }
        }
        let extra_mapping = config
            .extra_fields
            .iter()
            .enumerate()
            .filter_map(|(i, name)| find(name).map(|target| (i, target)))
            .collect();

        Self {
            layer,
            mapping,
            extra_mapping,
            missing,
            dedup: DedupSet::new(config.dedup_key),
            batch_size: config.batch_size.max(1),
        }
    }

    pub const fn layer(&self) -> &L {
        &self.layer
    }

    pub fn into_layer(self) -> L {
        self.layer
    }

    /// Semantic fields that could not be mapped onto the layer.
    pub fn missing_fields(&self) -> &[ParcelField] {
        &self.missing
    }

    pub const fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    /// Start a new run: forget which records were already added.
    pub fn reset(&mut self) {
        self.dedup.clear();
    }

    fn to_feature(&self, record: &ParcelRecord) -> Feature {
        let mut feature = Feature::new(record.geometry.clone());
        for (field, target) in &self.mapping {
            feature.attributes.insert(target.clone(), record.value(*field));
        }
        for (index, target) in &self.extra_mapping {
            if let Some(value) = record.extra.get(*index) {
                feature.attributes.insert(target.clone(), value.clone().into());
            }
        }
        feature
    }

    /// Add records, skipping any already added in this run.
    #[instrument(name = "Collect parcels", skip_all, fields(layer = self.layer.name(), records = records.len()), level = "debug")]
    pub fn add(&mut self, records: &[ParcelRecord]) -> Result<AddSummary> {
        if self.layer.is_editing() && self.layer.is_modified() {
            return Err(CollectorError::PendingChanges(self.layer.name().to_string()));
        }

        let mut summary = AddSummary::default();
        let mut batch_keys = AHashSet::new();
        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            let key = self.dedup.key().key_for(record);
            if self.dedup.contains_key(&key) || !batch_keys.insert(key.clone()) {
                debug!(cadastral_id = record.cadastral_id(), "Skipping duplicate parcel");
                summary.duplicates += 1;
            } else {
                pending.push((key, self.to_feature(record)));
            }
        }
        if pending.is_empty() {
            return Ok(summary);
        }

        // Keys are only remembered once their chunk is committed
        let was_editing = self.layer.is_editing();
        for chunk in &pending.into_iter().chunks(self.batch_size) {
            let (keys, features): (Vec<String>, Vec<Feature>) = chunk.unzip();
            if let Err(e) = self.write_batch(features) {
                if let Err(rollback) = self.layer.rollback() {
                    warn!(layer = self.layer.name(), error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
            summary.added += keys.len();
            for key in keys {
                self.dedup.insert_key(key);
            }
        }
        if was_editing && !self.layer.is_editing() {
            self.layer.start_editing()?;
        }

        info!(
            layer = self.layer.name(),
            added = summary.added,
            duplicates = summary.duplicates,
            "Parcels added"
        );
        Ok(summary)
    }

    fn write_batch(&mut self, features: Vec<Feature>) -> Result<()> {
        if !self.layer.is_editing() {
            self.layer.start_editing()?;
        }
        self.layer.add_features(features)?;
        self.layer.commit_changes()?;
        Ok(())
    }

    /// Parse a single registry row and add it. Returns the parsed record even when it
    /// turned out to be a duplicate.
    pub fn add_one(&mut self, row: &str) -> Result<ParcelRecord> {
        let record = parse_parcel_row(row, &[])?;
        self.add(std::slice::from_ref(&record))?;
        Ok(record)
    }
}

mod error {
    use thiserror::Error;

    use super::LayerError;
    use crate::record::{ParcelField, RecordError};

    #[derive(Error, Debug)]
    pub enum CollectorError {
        #[error("Layer '{0}' has unsaved changes; save or discard them first")]
        PendingChanges(String),
        #[error("Layer '{layer}' is missing parcel fields: {missing:?}")]
        SchemaMismatch {
            layer: String,
            missing: Vec<ParcelField>,
        },
        #[error("Layer error: {0}")]
        Layer(#[from] LayerError),
        #[error("Record error: {0}")]
        Record(#[from] RecordError),
    }

    pub type Result<T> = std::result::Result<T, CollectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    fn row(geometry: &str, id: &str) -> String {
        format!("{geometry}|mazowieckie|miński|Mińsk|Osiedle|12|{id}")
    }

    const SQUARE: &str = "POLYGON((0 0,10 0,10 10,0 10,0 0))";
    const OTHER: &str = "POLYGON((20 0,30 0,30 10,20 10,20 0))";

    fn default_collector() -> ResultCollector<MemoryLayer> {
        ResultCollector::with_default_fields(
            MemoryLayer::with_default_fields("parcels"),
            &CollectorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_same_record_twice_adds_once() {
        let mut collector = default_collector();
        let record = parse_parcel_row(&row(SQUARE, "1.2.3"), &[]).unwrap();

        let first = collector.add(&[record.clone()]).unwrap();
        let second = collector.add(&[record]).unwrap();

        assert_eq!(first, AddSummary { added: 1, duplicates: 0 });
        assert_eq!(second, AddSummary { added: 0, duplicates: 1 });
        assert_eq!(collector.layer().feature_count(), 1);
    }

    #[test]
    fn test_duplicates_within_one_call() {
        let mut collector = default_collector();
        let a = parse_parcel_row(&row(SQUARE, "1.2.3"), &[]).unwrap();
        let b = parse_parcel_row(&row(OTHER, "1.2.4"), &[]).unwrap();
        let summary = collector.add(&[a.clone(), b, a]).unwrap();
        assert_eq!(summary, AddSummary { added: 2, duplicates: 1 });
        assert_eq!(collector.layer().features().len(), 2);
    }

    #[test]
    fn test_add_one_writes_default_fields() {
        let mut collector = default_collector();
        let record = collector.add_one(&row(SQUARE, "141201_1.0001.AR_1.12")).unwrap();
        assert_eq!(record.attributes.sheet.as_deref(), Some("AR_1"));

        let feature = &collector.layer().features()[0];
        assert_eq!(
            feature.get("teryt"),
            Some(&FieldValue::Text("141201_1.0001.AR_1.12".into()))
        );
        assert_eq!(feature.get("arkusz"), Some(&FieldValue::Text("AR_1".into())));
        assert_eq!(feature.get("pole_pow"), Some(&FieldValue::Number(100.0)));
    }

    #[test]
    fn test_add_one_bad_row() {
        let mut collector = default_collector();
        let err = collector.add_one("a|b|c").unwrap_err();
        assert!(matches!(err, CollectorError::Record(_)));
        assert_eq!(collector.layer().feature_count(), 0);
    }

    #[test]
    fn test_pending_changes_are_not_discarded() {
        let mut layer = MemoryLayer::with_default_fields("parcels");
        layer.start_editing().unwrap();
        layer
            .add_features(vec![Feature::new(
                parse_parcel_row(&row(OTHER, "user"), &[]).unwrap().geometry,
            )])
            .unwrap();

        let mut collector =
            ResultCollector::with_default_fields(layer, &CollectorConfig::default()).unwrap();
        let record = parse_parcel_row(&row(SQUARE, "1.2.3"), &[]).unwrap();
        let err = collector.add(&[record.clone()]).unwrap_err();
        assert!(matches!(err, CollectorError::PendingChanges(_)));
        assert_eq!(collector.layer().pending().len(), 1, "user edit must survive");
        assert!(
            !collector.dedup().contains(&record),
            "rejected records must not count as added"
        );
    }

    #[test]
    fn test_open_unmodified_session_is_kept_open() {
        let mut layer = MemoryLayer::with_default_fields("parcels");
        layer.start_editing().unwrap();
        let mut collector =
            ResultCollector::with_default_fields(layer, &CollectorConfig::default()).unwrap();
        collector
            .add(&[parse_parcel_row(&row(SQUARE, "1.2.3"), &[]).unwrap()])
            .unwrap();
        assert!(collector.layer().is_editing());
        assert_eq!(collector.layer().features().len(), 1);
    }

    #[test]
    fn test_batches_commit_separately() {
        let config = CollectorConfig {
            batch_size: 1,
            ..CollectorConfig::default()
        };
        let mut collector =
            ResultCollector::with_default_fields(MemoryLayer::with_default_fields("p"), &config)
                .unwrap();
        let records = vec![
            parse_parcel_row(&row(SQUARE, "1"), &[]).unwrap(),
            parse_parcel_row(&row(OTHER, "2"), &[]).unwrap(),
        ];
        let summary = collector.add(&records).unwrap();
        assert_eq!(summary.added, 2);
        assert!(!collector.layer().is_editing());
        assert_eq!(collector.layer().features().len(), 2);
    }

    #[test]
    fn test_default_fields_requires_schema() {
        let err = ResultCollector::with_default_fields(
            MemoryLayer::new("custom", ["teryt"]),
            &CollectorConfig::default(),
        )
        .unwrap_err();
        match err {
            CollectorError::SchemaMismatch { layer, missing } => {
                assert_eq!(layer, "custom");
                assert_eq!(missing.len(), ParcelField::ALL.len() - 1);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_map_by_name_reports_missing_fields() {
        let mut config = CollectorConfig::default();
        config
            .field_names
            .insert(ParcelField::CadastralId, "ID_DZIALKI".to_string());
        config.extra_fields = vec!["uwagi".to_string()];

        let layer = MemoryLayer::new("custom", ["id_dzialki", "GMINA", "uwagi"]);
        let mut collector = ResultCollector::map_by_name(layer, &config);

        assert!(collector.missing_fields().contains(&ParcelField::Province));
        assert!(!collector.missing_fields().contains(&ParcelField::CadastralId));
        assert!(!collector.missing_fields().contains(&ParcelField::Municipality));

        let record =
            parse_parcel_row(&row(SQUARE, "1.2.3"), &["note".to_string()]).unwrap();
        collector.add(&[record]).unwrap();

        let feature = &collector.layer().features()[0];
        assert_eq!(feature.get("id_dzialki"), Some(&FieldValue::Text("1.2.3".into())));
        assert_eq!(feature.get("GMINA"), Some(&FieldValue::Text("Mińsk".into())));
        assert_eq!(feature.get("uwagi"), Some(&FieldValue::Text("note".into())));
        assert_eq!(feature.attributes.len(), 3);
    }

    /// Memory layer whose next `add_features` call fails.
    struct FailOnceLayer {
        inner: MemoryLayer,
        fail_next: bool,
    }

    impl VectorLayer for FailOnceLayer {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn field_names(&self) -> Vec<String> {
            self.inner.field_names()
        }

        fn is_editing(&self) -> bool {
            self.inner.is_editing()
        }

        fn is_modified(&self) -> bool {
            self.inner.is_modified()
        }

        fn start_editing(&mut self) -> std::result::Result<(), LayerError> {
            self.inner.start_editing()
        }

        fn add_features(&mut self, features: Vec<Feature>) -> std::result::Result<(), LayerError> {
            if std::mem::take(&mut self.fail_next) {
                return Err(LayerError::NotEditable(self.inner.name().to_string()));
            }
            self.inner.add_features(features)
        }

        fn commit_changes(&mut self) -> std::result::Result<(), LayerError> {
            self.inner.commit_changes()
        }

        fn rollback(&mut self) -> std::result::Result<(), LayerError> {
            self.inner.rollback()
        }

        fn feature_count(&self) -> usize {
            self.inner.feature_count()
        }
    }

    #[test]
    fn test_failed_write_can_be_retried() {
        let layer = FailOnceLayer {
            inner: MemoryLayer::with_default_fields("parcels"),
            fail_next: true,
        };
        let mut collector =
            ResultCollector::with_default_fields(layer, &CollectorConfig::default()).unwrap();
        let record = parse_parcel_row(&row(SQUARE, "1.2.3"), &[]).unwrap();

        let err = collector.add(&[record.clone()]).unwrap_err();
        assert!(matches!(err, CollectorError::Layer(_)));
        assert!(!collector.layer().is_editing(), "Failed batch must be rolled back");
        assert!(
            !collector.dedup().contains(&record),
            "Unwritten records must not count as seen"
        );

        let retry = collector.add(&[record]).unwrap();
        assert_eq!(retry, AddSummary { added: 1, duplicates: 0 });
        assert_eq!(collector.layer().inner.features().len(), 1);
    }

    #[test]
    fn test_cadastral_dedup_key() {
        let config = CollectorConfig {
            dedup_key: DedupKey::CadastralId,
            ..CollectorConfig::default()
        };
        let mut collector =
            ResultCollector::with_default_fields(MemoryLayer::with_default_fields("p"), &config)
                .unwrap();
        let a = parse_parcel_row(&row(SQUARE, "1.2.3"), &[]).unwrap();
        let noisy = parse_parcel_row(&row("POLYGON((0 0,10.0000001 0,10 10,0 10,0 0))", "1.2.3"), &[])
            .unwrap();
        collector.add(&[a, noisy]).unwrap();
        assert_eq!(collector.layer().feature_count(), 1);
    }
}
