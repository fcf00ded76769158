use geo::{Area, BooleanOps, Geometry, MultiPolygon, Validation};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, trace, warn};
use wkt::TryFromWkt;

use super::{AdminUnit, ParcelAttributes, ParcelRecord, RecordError, Result};

/// Number of fields in a parcel row.
pub const PARCEL_FIELD_COUNT: usize = 7;

static SRID_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*SRID=(\d+);").expect("SRID prefix pattern is valid"));

/// Split an optional EWKT `SRID=nnnn;` prefix off a geometry string.
pub fn strip_srid(geometry: &str) -> (Option<u32>, &str) {
    SRID_PREFIX.captures(geometry).map_or((None, geometry), |caps| {
        let srid = caps.get(1).and_then(|m| m.as_str().parse().ok());
        (srid, &geometry[caps[0].len()..])
    })
}

/// Sheet number: the third segment of a four-segment cadastral id.
fn sheet_from_cadastral_id(cadastral_id: &str) -> Option<String> {
    let segments: Vec<&str> = cadastral_id.split('.').collect();
    (segments.len() == 4).then(|| segments[2].to_string())
}

fn polygons_from_wkt(wkt: &str) -> Option<MultiPolygon<f64>> {
    match Geometry::<f64>::try_from_wkt_str(wkt.trim()) {
        Ok(Geometry::Polygon(polygon)) => Some(MultiPolygon::new(vec![polygon])),
        Ok(Geometry::MultiPolygon(multi)) => Some(multi),
        Ok(other) => {
            debug!(geometry = ?other, "Registry geometry is not polygonal");
            None
        }
        Err(e) => {
            debug!(error = %e, "Could not parse registry WKT");
            None
        }
    }
}

/// Resolve self-intersections by overlaying the geometry with nothing.
fn repair(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    geometry.union(&MultiPolygon::new(Vec::new()))
}

/// Parse one parcel row.
///
/// `extra_attributes` are copied onto the record unchanged. A wrong field count is a
/// [`RecordError::ResponseData`]; geometry that is unparseable, non-polygonal, empty,
/// or still invalid after one repair is a [`RecordError::BadGeometry`].
pub fn parse_parcel_row(row: &str, extra_attributes: &[String]) -> Result<ParcelRecord> {
    let fields: Vec<&str> = row.split('|').collect();
    let Ok([geometry, province, county, municipality, precinct, plot_id, cadastral_id]) =
        <[&str; PARCEL_FIELD_COUNT]>::try_from(fields.as_slice())
    else {
        return Err(RecordError::ResponseData {
            expected: PARCEL_FIELD_COUNT,
            found: fields.len(),
        });
    };

    let attributes = ParcelAttributes {
        province: province.to_string(),
        county: county.to_string(),
        municipality: municipality.to_string(),
        precinct: precinct.to_string(),
        sheet: sheet_from_cadastral_id(cadastral_id),
        plot_id: plot_id.to_string(),
        cadastral_id: cadastral_id.to_string(),
    };

    let (srid, wkt) = strip_srid(geometry);
    let Some(mut geometry) = polygons_from_wkt(wkt) else {
        return Err(RecordError::BadGeometry {
            attributes: Box::new(attributes),
            geometry: None,
        });
    };

    if !geometry.is_valid() {
        trace!(cadastral_id, "Repairing invalid parcel geometry");
        geometry = repair(&geometry);
        if !geometry.is_valid() {
            warn!(cadastral_id, "Parcel geometry still invalid after repair");
            return Err(RecordError::BadGeometry {
                attributes: Box::new(attributes),
                geometry: Some(geometry),
            });
        }
    }
    if geometry.0.is_empty() {
        return Err(RecordError::BadGeometry {
            attributes: Box::new(attributes),
            geometry: Some(geometry),
        });
    }

    Ok(ParcelRecord {
        area: geometry.unsigned_area(),
        geometry,
        attributes,
        srid,
        extra: extra_attributes.to_vec(),
    })
}

/// Parse one `name|teryt` administrative-unit row.
pub fn parse_admin_row(row: &str) -> Result<AdminUnit> {
    match row.split('|').collect::<Vec<_>>().as_slice() {
        [name, teryt] => Ok(AdminUnit {
            name: name.trim().to_string(),
            teryt: teryt.trim().to_string(),
        }),
        fields => Err(RecordError::ResponseData {
            expected: 2,
            found: fields.len(),
        }),
    }
}

/// Parse a whole administrative listing, failing on the first malformed row.
pub fn parse_admin_rows(rows: &[String]) -> Result<Vec<AdminUnit>> {
    rows.par_iter().map(|row| parse_admin_row(row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, ParcelField};

    const SQUARE: &str = "POLYGON((0 0,10 0,10 10,0 10,0 0))";

    fn row(geometry: &str, cadastral_id: &str) -> String {
        format!("{geometry}|mazowieckie|miński|Mińsk Mazowiecki|Osiedle|123/4|{cadastral_id}")
    }

    #[test]
    fn test_parse_valid_row() {
        let record = parse_parcel_row(&row(SQUARE, "141201_1.0001.123/4"), &[]).unwrap();

        assert_eq!(record.attributes.province, "mazowieckie");
        assert_eq!(record.attributes.county, "miński");
        assert_eq!(record.attributes.municipality, "Mińsk Mazowiecki");
        assert_eq!(record.attributes.precinct, "Osiedle");
        assert_eq!(record.attributes.plot_id, "123/4");
        assert_eq!(record.cadastral_id(), "141201_1.0001.123/4");
        assert_eq!(record.attributes.sheet, None);
        assert!((record.area - 100.0).abs() < 1e-9, "area comes from geometry");
        assert_eq!(record.srid, None);
    }

    #[test]
    fn test_attribute_count_matches_schema() {
        let extra = vec!["from-csv".to_string()];
        let record = parse_parcel_row(&row(SQUARE, "141201_1.0001.123/4"), &extra).unwrap();
        let values = record.attribute_values();
        assert_eq!(values.len(), ParcelField::ALL.len() + extra.len());
        assert_eq!(values.last(), Some(&FieldValue::Text("from-csv".into())));
    }

    #[test]
    fn test_sheet_from_four_segment_id() {
        let record = parse_parcel_row(&row(SQUARE, "141201_1.0001.AR_2.123/4"), &[]).unwrap();
        assert_eq!(record.attributes.sheet.as_deref(), Some("AR_2"));

        let record = parse_parcel_row(&row(SQUARE, "141201_1.0001.x.y.123"), &[]).unwrap();
        assert_eq!(record.attributes.sheet, None, "only exactly four segments");
    }

    #[test]
    fn test_ewkt_prefix_is_stripped() {
        let record =
            parse_parcel_row(&row(&format!("SRID=2180;{SQUARE}"), "1.2.3"), &[]).unwrap();
        assert_eq!(record.srid, Some(2180));
        assert!((record.area - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_strip_srid_without_prefix() {
        assert_eq!(strip_srid(SQUARE), (None, SQUARE));
        assert_eq!(strip_srid("SRID=4326;POINT(1 2)"), (Some(4326), "POINT(1 2)"));
    }

    #[test]
    fn test_multipolygon_row() {
        let geometry = "MULTIPOLYGON(((0 0,1 0,1 1,0 1,0 0)),((5 5,7 5,7 7,5 7,5 5)))";
        let record = parse_parcel_row(&row(geometry, "1.2.3"), &[]).unwrap();
        assert_eq!(record.geometry.0.len(), 2);
        assert!((record.area - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_field_count_is_response_data_error() {
        for bad in ["a|b|c|d|e", "", "1|2|3|4|5|6|7|8"] {
            match parse_parcel_row(bad, &[]) {
                Err(RecordError::ResponseData { expected, found }) => {
                    assert_eq!(expected, 7);
                    assert_eq!(found, bad.split('|').count());
                }
                other => panic!("expected ResponseData for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_self_intersecting_geometry_is_repaired() {
        let bowtie = "POLYGON((0 0,10 10,10 0,0 10,0 0))";
        let record = parse_parcel_row(&row(bowtie, "1.2.3"), &[]).unwrap();
        assert!(record.geometry.is_valid());
        assert!(
            (record.area - 50.0).abs() < 1e-6,
            "repaired bowtie should be two triangles, got area {}",
            record.area
        );
    }

    #[test]
    fn test_non_polygon_geometry_is_bad_geometry() {
        match parse_parcel_row(&row("POINT(1 2)", "1.2.3"), &[]) {
            Err(RecordError::BadGeometry {
                attributes,
                geometry,
            }) => {
                assert_eq!(attributes.cadastral_id, "1.2.3");
                assert!(geometry.is_none());
            }
            other => panic!("expected BadGeometry, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_geometry_is_bad_geometry() {
        let err = parse_parcel_row(&row("not wkt at all", "9.9.9"), &[]).unwrap_err();
        assert!(matches!(err, RecordError::BadGeometry { .. }));
        assert!(err.to_string().contains("9.9.9"));
    }

    #[test]
    fn test_admin_rows() {
        let rows = vec!["mazowieckie|14".to_string(), "śląskie|24".to_string()];
        let units = parse_admin_rows(&rows).unwrap();
        assert_eq!(units[0].name, "mazowieckie");
        assert_eq!(units[1].teryt, "24");

        assert!(matches!(
            parse_admin_row("only-one-field"),
            Err(RecordError::ResponseData {
                expected: 2,
                found: 1
            })
        ));
    }
}
