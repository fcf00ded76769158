//! The host application's vector layer, reduced to what the collector needs.

use ahash::AHashMap;
use geo::MultiPolygon;

use crate::record::{FieldValue, ParcelField};

pub use error::LayerError;
use error::Result;

/// A feature ready to be written into a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: MultiPolygon<f64>,
    pub attributes: AHashMap<String, FieldValue>,
}

impl Feature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            attributes: AHashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.attributes.get(name)
    }
}

/// Editable vector layer with edit-session semantics.
///
/// Features added during a session are pending until [`VectorLayer::commit_changes`].
pub trait VectorLayer {
    fn name(&self) -> &str;

    fn field_names(&self) -> Vec<String>;

    fn is_editing(&self) -> bool;

    /// Whether the open session holds uncommitted edits.
    fn is_modified(&self) -> bool;

    fn start_editing(&mut self) -> Result<()>;

    fn add_features(&mut self, features: Vec<Feature>) -> Result<()>;

    /// Commit pending edits and close the session.
    fn commit_changes(&mut self) -> Result<()>;

    /// Drop pending edits and close the session.
    fn rollback(&mut self) -> Result<()>;

    /// Committed plus pending features.
    fn feature_count(&self) -> usize;
}

/// In-memory layer for headless use.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayer {
    name: String,
    fields: Vec<String>,
    committed: Vec<Feature>,
    pending: Vec<Feature>,
    editing: bool,
    read_only: bool,
}

impl MemoryLayer {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Layer whose schema is the default parcel field set.
    pub fn with_default_fields(name: impl Into<String>) -> Self {
        Self::new(name, ParcelField::ALL.iter().map(|f| f.default_name()))
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Committed features only.
    pub fn features(&self) -> &[Feature] {
        &self.committed
    }

    pub fn pending(&self) -> &[Feature] {
        &self.pending
    }
}

impl VectorLayer for MemoryLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn is_editing(&self) -> bool {
        self.editing
    }

    fn is_modified(&self) -> bool {
        self.editing && !self.pending.is_empty()
    }

    fn start_editing(&mut self) -> Result<()> {
        if self.read_only {
            return Err(LayerError::NotEditable(self.name.clone()));
        }
        self.editing = true;
        Ok(())
    }

    fn add_features(&mut self, features: Vec<Feature>) -> Result<()> {
        if !self.editing {
            return Err(LayerError::NotEditing(self.name.clone()));
        }
        for feature in &features {
            if let Some(unknown) = feature.attributes.keys().find(|k| !self.fields.contains(k)) {
                return Err(LayerError::UnknownField {
                    layer: self.name.clone(),
                    field: unknown.clone(),
                });
            }
        }
        self.pending.extend(features);
        Ok(())
    }

    fn commit_changes(&mut self) -> Result<()> {
        if !self.editing {
            return Err(LayerError::NotEditing(self.name.clone()));
        }
        self.committed.append(&mut self.pending);
        self.editing = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        self.editing = false;
        Ok(())
    }

    fn feature_count(&self) -> usize {
        self.committed.len() + self.pending.len()
    }
}

mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum LayerError {
        #[error("Layer '{0}' cannot be edited")]
        NotEditable(String),
        #[error("Layer '{0}' is not in an editing session")]
        NotEditing(String),
        #[error("Layer '{layer}' has no field '{field}'")]
        UnknownField { layer: String, field: String },
    }

    pub type Result<T> = std::result::Result<T, LayerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> MultiPolygon<f64> {
        use geo::polygon;
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]])
    }

    #[test]
    fn test_edit_session_lifecycle() {
        let mut layer = MemoryLayer::with_default_fields("parcels");
        assert!(layer.add_features(vec![Feature::new(unit_square())]).is_err());

        layer.start_editing().unwrap();
        layer
            .add_features(vec![
                Feature::new(unit_square()).with_attribute("teryt", "1.2.3".to_string().into()),
            ])
            .unwrap();
        assert!(layer.is_modified());
        assert_eq!(layer.features().len(), 0);

        layer.commit_changes().unwrap();
        assert!(!layer.is_editing());
        assert_eq!(layer.features().len(), 1);
        assert_eq!(
            layer.features()[0].get("teryt"),
            Some(&FieldValue::Text("1.2.3".into()))
        );
    }

    #[test]
    fn test_rollback_discards_pending() {
        let mut layer = MemoryLayer::new("l", ["a"]);
        layer.start_editing().unwrap();
        layer.add_features(vec![Feature::new(unit_square())]).unwrap();
        layer.rollback().unwrap();
        assert_eq!(layer.feature_count(), 0);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut layer = MemoryLayer::new("l", ["a"]);
        layer.start_editing().unwrap();
        let err = layer
            .add_features(vec![Feature::new(unit_square()).with_attribute("b", FieldValue::Null)])
            .unwrap_err();
        assert_eq!(
            err,
            LayerError::UnknownField {
                layer: "l".into(),
                field: "b".into()
            }
        );
    }

    #[test]
    fn test_read_only_layer() {
        let mut layer = MemoryLayer::new("l", ["a"]).read_only();
        assert_eq!(
            layer.start_editing(),
            Err(LayerError::NotEditable("l".into()))
        );
    }
}
