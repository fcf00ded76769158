//! Query parameters understood by the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in a registry-understood coordinate system.
///
/// Coordinates are sent verbatim as `xy=x,y,srid`; transforming into the registry's
/// planar system (EPSG:2180) is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UldkPoint {
    pub x: f64,
    pub y: f64,
    pub srid: u32,
}

impl UldkPoint {
    pub const fn new(x: f64, y: f64, srid: u32) -> Self {
        Self { x, y, srid }
    }

    /// Value of the `xy` query parameter.
    pub fn xy_param(&self) -> String {
        format!("{},{},{}", self.x, self.y, self.srid)
    }
}

impl fmt::Display for UldkPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) [EPSG:{}]", self.x, self.y, self.srid)
    }
}

/// Kind of registry object a client asks for (`obiekt` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    #[serde(rename = "dzialka")]
    Parcel,
    #[serde(rename = "wojewodztwo")]
    Province,
    #[serde(rename = "powiat")]
    County,
    #[serde(rename = "gmina")]
    Municipality,
    #[serde(rename = "obreb")]
    Precinct,
}

impl ObjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parcel => "dzialka",
            Self::Province => "wojewodztwo",
            Self::County => "powiat",
            Self::Municipality => "gmina",
            Self::Precinct => "obreb",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single registry lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// List administrative units under a TERYT prefix.
    Teryt(String),
    /// Look a parcel up by its full cadastral id.
    Id(String),
    /// Find the parcel under a point.
    Point(UldkPoint),
}

impl Query {
    /// Value of the `request` parameter. Administrative listings send none.
    pub const fn request(&self) -> Option<&'static str> {
        match self {
            Self::Teryt(_) => None,
            Self::Id(_) => Some("GetParcelById"),
            Self::Point(_) => Some("GetParcelByXY"),
        }
    }

    /// The operation-specific parameter as a `(name, value)` pair.
    pub fn param(&self) -> (&'static str, String) {
        match self {
            Self::Teryt(teryt) => ("teryt", teryt.clone()),
            Self::Id(id) => ("id", id.clone()),
            Self::Point(point) => ("xy", point.xy_param()),
        }
    }

    /// Whether the registry answers this query with exactly one record.
    pub const fn is_single(&self) -> bool {
        !matches!(self, Self::Teryt(_))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Teryt(teryt) => write!(f, "teryt={teryt}"),
            Self::Id(id) => write!(f, "id={id}"),
            Self::Point(point) => write!(f, "xy={}", point.xy_param()),
        }
    }
}

impl From<UldkPoint> for Query {
    fn from(point: UldkPoint) -> Self {
        Self::Point(point)
    }
}

/// Opaque identifier of one query within a batch.
pub type QueryKey = u64;

/// Insertion-ordered mapping from [`QueryKey`] to [`Query`].
///
/// Inserting an existing key replaces its query in place, keeping the original
/// position.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    entries: Vec<(QueryKey, Query)>,
    next_key: QueryKey,
}

impl QueryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch of parcel-id lookups keyed `0..n` in iteration order.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut batch = Self::new();
        for id in ids {
            batch.push(Query::Id(id.into()));
        }
        batch
    }

    /// Batch of point lookups keyed `0..n` in iteration order.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = UldkPoint>,
    {
        let mut batch = Self::new();
        for point in points {
            batch.push(Query::Point(point));
        }
        batch
    }

    /// Append a query under the next free key and return that key.
    pub fn push(&mut self, query: Query) -> QueryKey {
        let key = self.next_key;
        self.insert(key, query);
        key
    }

    pub fn insert(&mut self, key: QueryKey, query: Query) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = query;
        } else {
            self.entries.push((key, query));
        }
        self.next_key = self.next_key.max(key.saturating_add(1));
    }

    pub fn get(&self, key: QueryKey) -> Option<&Query> {
        self.entries
            .iter()
            .find_map(|(k, q)| (*k == key).then_some(q))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueryKey, &Query)> {
        self.entries.iter().map(|(k, q)| (*k, q))
    }
}

impl IntoIterator for QueryBatch {
    type Item = (QueryKey, Query);
    type IntoIter = std::vec::IntoIter<(QueryKey, Query)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(QueryKey, Query)> for QueryBatch {
    fn from_iter<T: IntoIterator<Item = (QueryKey, Query)>>(iter: T) -> Self {
        let mut batch = Self::new();
        for (key, query) in iter {
            batch.insert(key, query);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_param_format() {
        let point = UldkPoint::new(500_000.0, 600_000.5, 2180);
        assert_eq!(point.xy_param(), "500000,600000.5,2180");
        assert_eq!(
            Query::Point(point).param(),
            ("xy", "500000,600000.5,2180".to_string())
        );
    }

    #[test]
    fn test_request_names() {
        assert_eq!(Query::Teryt("02".into()).request(), None);
        assert_eq!(Query::Id("x".into()).request(), Some("GetParcelById"));
        assert_eq!(
            Query::Point(UldkPoint::new(0.0, 0.0, 2180)).request(),
            Some("GetParcelByXY")
        );
        assert!(!Query::Teryt("02".into()).is_single());
    }

    #[test]
    fn test_object_kind_wire_names() {
        assert_eq!(ObjectKind::Parcel.as_str(), "dzialka");
        assert_eq!(ObjectKind::Precinct.to_string(), "obreb");

        let kind: ObjectKind = serde_json::from_str("\"gmina\"").unwrap();
        assert_eq!(kind, ObjectKind::Municipality);
    }

    #[test]
    fn test_batch_keeps_insertion_order() {
        let mut batch = QueryBatch::new();
        batch.insert(7, Query::Id("a".into()));
        batch.insert(2, Query::Id("b".into()));
        let pushed = batch.push(Query::Id("c".into()));
        assert_eq!(pushed, 8, "push should use the key after the largest one");

        batch.insert(7, Query::Id("replaced".into()));

        let keys: Vec<_> = batch.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![7, 2, 8]);
        assert_eq!(batch.get(7), Some(&Query::Id("replaced".into())));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_batch_from_ids() {
        let batch = QueryBatch::from_ids(["141201_1.0001.1", "141201_1.0001.2"]);
        let collected: Vec<_> = batch.into_iter().collect();
        assert_eq!(
            collected,
            vec![
                (0, Query::Id("141201_1.0001.1".into())),
                (1, Query::Id("141201_1.0001.2".into())),
            ]
        );
    }
}
