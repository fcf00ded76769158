//! Parsed registry records.
//!
//! A parcel row arrives as seven pipe-delimited fields: the geometry (WKT, optionally
//! with an EWKT `SRID=nnnn;` prefix) followed by province, county, municipality,
//! precinct, plot number and the full cadastral id. [`parse_parcel_row`] turns such a
//! row into a [`ParcelRecord`], repairing invalid geometry once.

use std::fmt;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use wkt::ToWkt;

mod parse;

pub(crate) use error::Result;
pub use error::RecordError;
pub use parse::{
    PARCEL_FIELD_COUNT, parse_admin_row, parse_admin_rows, parse_parcel_row, strip_srid,
};

/// Semantic attribute of a parcel record, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelField {
    Province,
    County,
    Municipality,
    Precinct,
    Sheet,
    PlotId,
    CadastralId,
    Area,
}

impl ParcelField {
    pub const ALL: [Self; 8] = [
        Self::Province,
        Self::County,
        Self::Municipality,
        Self::Precinct,
        Self::Sheet,
        Self::PlotId,
        Self::CadastralId,
        Self::Area,
    ];

    /// Field name used by layers created with the default parcel schema.
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Province => "wojewodztwo",
            Self::County => "powiat",
            Self::Municipality => "gmina",
            Self::Precinct => "obreb",
            Self::Sheet => "arkusz",
            Self::PlotId => "numer",
            Self::CadastralId => "teryt",
            Self::Area => "pole_pow",
        }
    }
}

impl fmt::Display for ParcelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// A single attribute value as stored in a layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Null,
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Administrative attributes of a parcel, as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParcelAttributes {
    pub province: String,
    pub county: String,
    pub municipality: String,
    pub precinct: String,
    /// Map sheet, present only for four-segment cadastral ids
    pub sheet: Option<String>,
    pub plot_id: String,
    /// Unique administrative code, e.g. `141201_1.0001.123/4`
    pub cadastral_id: String,
}

/// A parcel with valid geometry in the registry's coordinate system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParcelRecord {
    #[serde(skip)]
    pub geometry: MultiPolygon<f64>,
    #[serde(flatten)]
    pub attributes: ParcelAttributes,
    /// Computed from `geometry`
    pub area: f64,
    /// SRID from an EWKT prefix, when the registry sent one
    pub srid: Option<u32>,
    /// Caller-supplied values carried alongside the record
    pub extra: Vec<String>,
}

impl ParcelRecord {
    pub fn cadastral_id(&self) -> &str {
        &self.attributes.cadastral_id
    }

    pub fn wkt(&self) -> String {
        self.geometry.wkt_string()
    }

    pub fn value(&self, field: ParcelField) -> FieldValue {
        let a = &self.attributes;
        match field {
            ParcelField::Province => a.province.clone().into(),
            ParcelField::County => a.county.clone().into(),
            ParcelField::Municipality => a.municipality.clone().into(),
            ParcelField::Precinct => a.precinct.clone().into(),
            ParcelField::Sheet => a.sheet.clone().into(),
            ParcelField::PlotId => a.plot_id.clone().into(),
            ParcelField::CadastralId => a.cadastral_id.clone().into(),
            ParcelField::Area => self.area.into(),
        }
    }

    /// All schema values followed by the extra attributes.
    pub fn attribute_values(&self) -> Vec<FieldValue> {
        ParcelField::ALL
            .iter()
            .map(|field| self.value(*field))
            .chain(self.extra.iter().cloned().map(FieldValue::Text))
            .collect()
    }
}

/// An administrative unit from a TERYT listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUnit {
    pub name: String,
    pub teryt: String,
}

impl fmt::Display for AdminUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.teryt)
    }
}

mod error {
    use geo::MultiPolygon;
    use thiserror::Error;

    use super::ParcelAttributes;

    #[derive(Error, Debug, Clone)]
    pub enum RecordError {
        #[error("Malformed response row: expected {expected} fields, found {found}")]
        ResponseData { expected: usize, found: usize },
        /// Geometry that could not be parsed or repaired. Carries what was built so far.
        #[error("Unrepairable geometry for parcel '{}'", .attributes.cadastral_id)]
        BadGeometry {
            attributes: Box<ParcelAttributes>,
            geometry: Option<MultiPolygon<f64>>,
        },
    }

    pub type Result<T> = std::result::Result<T, RecordError>;
}
