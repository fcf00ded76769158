//! Grid/fishnet search for every parcel covering an area or a line.
//!
//! The registry only answers "which parcel is under this point", so covering a region
//! means probing points and subtracting whatever each probe explains. A hit removes
//! the (slightly buffered) parcel from the remaining geometry; a miss removes a small
//! disk around the probe. Every probe therefore shrinks what is left, and the run ends
//! when nothing meaningful remains or a budget runs out.
//!
//! Coverage is best-effort: parcels smaller than the grid spacing that no probe
//! happens to land in can be missed.

use std::time::{Duration, Instant};

use geo::{Buffer, Geometry, MultiLineString, MultiPolygon, Point};
use tracing::{debug, info};
use uldk_registry::{Query, RegistrySearch, UldkPoint};
use wkt::TryFromWkt;

mod line;
mod polygon;
mod shapes;

pub use error::CoverageError;
pub use shapes::{densify, disk, total_length};

use crate::collector::DedupSet;
use crate::config::CoverageConfig;
use crate::record::{ParcelRecord, parse_parcel_row};
use crate::worker::{CancelToken, ItemError, WorkerHandle};

/// Geometry to cover.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageTarget {
    Area(MultiPolygon<f64>),
    Line(MultiLineString<f64>),
}

impl CoverageTarget {
    pub fn from_wkt(wkt: &str) -> Result<Self, CoverageError> {
        let geometry = Geometry::<f64>::try_from_wkt_str(wkt.trim())
            .map_err(|e| CoverageError::InvalidWkt(e.to_string()))?;
        Self::try_from(geometry)
    }

    /// Area for polygons, length for lines.
    pub fn measure(&self) -> f64 {
        use geo::Area;
        match self {
            Self::Area(area) => area.unsigned_area(),
            Self::Line(line) => total_length(line),
        }
    }
}

impl TryFrom<Geometry<f64>> for CoverageTarget {
    type Error = CoverageError;

    fn try_from(geometry: Geometry<f64>) -> Result<Self, Self::Error> {
        match geometry {
            Geometry::Polygon(p) => Ok(Self::Area(MultiPolygon::new(vec![p]))),
            Geometry::MultiPolygon(mp) => Ok(Self::Area(mp)),
            Geometry::Rect(r) => Ok(Self::Area(MultiPolygon::new(vec![r.to_polygon()]))),
            Geometry::LineString(ls) => Ok(Self::Line(MultiLineString::new(vec![ls]))),
            Geometry::MultiLineString(mls) => Ok(Self::Line(mls)),
            Geometry::Line(l) => Ok(Self::Line(MultiLineString::new(vec![l.into()]))),
            other => Err(CoverageError::UnsupportedGeometry(geometry_name(&other))),
        }
    }
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Triangle(_) => "Triangle",
        _ => "Geometry",
    }
}

/// What a single probe turned up.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// First sighting of this parcel in the run
    NewParcel(String),
    /// Parcel already found earlier in the run
    Duplicate(String),
    /// No usable parcel; carries the error message
    Miss(String),
}

#[derive(Debug)]
pub enum CoverageEvent {
    Probe {
        point: Point<f64>,
        outcome: ProbeOutcome,
        /// Remaining area or length after this probe
        remaining: f64,
    },
    /// A parcel not seen before in this run
    Found(ParcelRecord),
    Finished(Box<CoverageReport>),
    Interrupted(Box<CoverageReport>),
    Failed(String),
}

impl CoverageEvent {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished(_) | Self::Interrupted(_) | Self::Failed(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageOutcome {
    /// Remaining geometry fell below the minimum size
    Exhausted,
    /// Every candidate was probed but some geometry is left
    Residual,
    /// Probe or time budget ran out
    BudgetExhausted,
    Interrupted,
}

/// Summary of a finished coverage run.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    /// Distinct parcels in discovery order
    pub found: Vec<ParcelRecord>,
    pub probes: usize,
    pub misses: usize,
    /// Remaining area (or length) at the start and after every probe
    pub history: Vec<f64>,
    pub remaining: CoverageTarget,
    pub outcome: CoverageOutcome,
    pub elapsed: Duration,
}

impl CoverageReport {
    pub fn remaining_measure(&self) -> f64 {
        self.history.last().copied().unwrap_or_default()
    }
}

/// Bookkeeping of one run.
struct Walk {
    dedup: DedupSet,
    found: Vec<ParcelRecord>,
    probes: usize,
    misses: usize,
    history: Vec<f64>,
    started: Instant,
}

impl Walk {
    fn new(config: &CoverageConfig, initial: f64) -> Self {
        Self {
            dedup: DedupSet::new(config.dedup_key),
            found: Vec::new(),
            probes: 0,
            misses: 0,
            history: vec![initial],
            started: Instant::now(),
        }
    }

    fn finish(self, remaining: CoverageTarget, outcome: CoverageOutcome) -> CoverageReport {
        info!(
            found = self.found.len(),
            probes = self.probes,
            misses = self.misses,
            ?outcome,
            "Coverage run ended"
        );
        CoverageReport {
            found: self.found,
            probes: self.probes,
            misses: self.misses,
            history: self.history,
            remaining,
            outcome,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Result of one probe: what to remove from the remaining geometry.
struct Visit {
    point: Point<f64>,
    outcome: ProbeOutcome,
    cutter: MultiPolygon<f64>,
    new_record: Option<ParcelRecord>,
}

/// Covers areas and lines with point probes against a registry.
#[derive(Debug)]
pub struct GridSearch<S> {
    search: S,
    config: CoverageConfig,
}

impl<S: RegistrySearch> GridSearch<S> {
    pub fn new(search: S, config: CoverageConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { search, config })
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// Cover `target` on the current thread, reporting each probe through `emit`.
    ///
    /// Terminal events are not emitted; the returned report carries the outcome.
    pub fn run(
        &self,
        target: &CoverageTarget,
        cancel: &CancelToken,
        emit: &mut dyn FnMut(CoverageEvent),
    ) -> CoverageReport {
        match target {
            CoverageTarget::Area(region) => self.cover_area(region, cancel, emit),
            CoverageTarget::Line(line) => self.cover_line(line, cancel, emit),
        }
    }

    fn probe(&self, point: Point<f64>) -> Result<ParcelRecord, ItemError> {
        let query = Query::Point(UldkPoint::new(point.x(), point.y(), self.config.srid));
        let row = self.search.search_one(&query)?;
        Ok(parse_parcel_row(&row, &[])?)
    }

    fn skip_disk(&self, point: Point<f64>) -> MultiPolygon<f64> {
        disk(point, self.config.skip_radius, self.config.disk_segments)
    }

    /// Cancellation or an expired time budget. Cheap enough to check per candidate.
    fn interruption(&self, walk: &Walk, cancel: &CancelToken) -> Option<CoverageOutcome> {
        if cancel.is_cancelled() {
            return Some(CoverageOutcome::Interrupted);
        }
        if self
            .config
            .time_budget()
            .is_some_and(|budget| walk.started.elapsed() >= budget)
        {
            debug!("Time budget exhausted");
            return Some(CoverageOutcome::BudgetExhausted);
        }
        None
    }

    fn stop_reason(&self, walk: &Walk, cancel: &CancelToken) -> Option<CoverageOutcome> {
        self.interruption(walk, cancel).or_else(|| {
            (walk.probes >= self.config.max_probes).then(|| {
                debug!(probes = walk.probes, "Probe budget exhausted");
                CoverageOutcome::BudgetExhausted
            })
        })
    }

    fn visit(&self, point: Point<f64>, walk: &mut Walk) -> Visit {
        walk.probes += 1;
        match self.probe(point) {
            Ok(record) => {
                let cutter = if self.config.parcel_buffer > 0.0 {
                    record.geometry.buffer(self.config.parcel_buffer)
                } else {
                    record.geometry.clone()
                };
                let id = record.cadastral_id().to_string();
                if walk.dedup.insert(&record) {
                    Visit {
                        point,
                        outcome: ProbeOutcome::NewParcel(id),
                        cutter,
                        new_record: Some(record),
                    }
                } else {
                    Visit {
                        point,
                        outcome: ProbeOutcome::Duplicate(id),
                        cutter,
                        new_record: None,
                    }
                }
            }
            Err(error) => {
                walk.misses += 1;
                debug!(x = point.x(), y = point.y(), %error, "Probe found no parcel");
                Visit {
                    point,
                    outcome: ProbeOutcome::Miss(error.to_string()),
                    cutter: self.skip_disk(point),
                    new_record: None,
                }
            }
        }
    }

    fn settle(
        &self,
        visit: Visit,
        remaining: f64,
        walk: &mut Walk,
        emit: &mut dyn FnMut(CoverageEvent),
    ) {
        walk.history.push(remaining);
        emit(CoverageEvent::Probe {
            point: visit.point,
            outcome: visit.outcome,
            remaining,
        });
        if let Some(record) = visit.new_record {
            emit(CoverageEvent::Found(record.clone()));
            walk.found.push(record);
        }
    }
}

impl<S: RegistrySearch + 'static> GridSearch<S> {
    /// Cover `target` on a background thread.
    ///
    /// The last event is `Finished` or `Interrupted` carrying the report, or `Failed`
    /// if the thread panicked.
    pub fn spawn(self, target: CoverageTarget) -> std::io::Result<WorkerHandle<CoverageEvent>> {
        WorkerHandle::spawn("uldk-coverage", CoverageEvent::Failed, move |tx, cancel| {
            let report = self.run(&target, &cancel, &mut |event| {
                let _ = tx.send(event);
            });
            let terminal = if report.outcome == CoverageOutcome::Interrupted {
                CoverageEvent::Interrupted(Box::new(report))
            } else {
                CoverageEvent::Finished(Box::new(report))
            };
            let _ = tx.send(terminal);
        })
    }
}

mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum CoverageError {
        #[error("Invalid WKT: {0}")]
        InvalidWkt(String),
        #[error("Cannot cover a {0}; expected a polygon or a line")]
        UnsupportedGeometry(&'static str),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use geo::{Area, Contains, Intersects, Polygon, Rect, coord};
    use uldk_registry::{FnSearch, RegistryError, search_fn};
    use wkt::ToWkt;

    use super::*;

    /// Fake registry answering point queries from a fixed set of parcels.
    pub(crate) fn parcel_registry(
        parcels: Vec<(Polygon<f64>, &'static str)>,
    ) -> FnSearch<impl Fn(&Query) -> uldk_registry::Result<Vec<String>> + Send + Sync> {
        search_fn(move |query: &Query| {
            let Query::Point(p) = query else {
                return Err(RegistryError::Registry("-1 unsupported".into()));
            };
            let point = Point::new(p.x, p.y);
            parcels
                .iter()
                .find(|(polygon, _)| polygon.intersects(&point))
                .map(|(polygon, id)| {
                    vec![format!(
                        "{}|pomorskie|gdański|Pruszcz|Obręb 1|{}|{}",
                        polygon.wkt_string(),
                        id.rsplit('.').next().unwrap_or(id),
                        id
                    )]
                })
                .ok_or_else(|| RegistryError::Registry("-1 brak wyników".into()))
        })
    }

    pub(crate) fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    #[test]
    fn test_target_from_wkt() {
        let area = CoverageTarget::from_wkt("POLYGON((0 0,4 0,4 5,0 5,0 0))").unwrap();
        assert_eq!(area.measure(), 20.0);
        let line = CoverageTarget::from_wkt("LINESTRING(0 0,3 4)").unwrap();
        assert_eq!(line.measure(), 5.0);
        assert_eq!(
            CoverageTarget::from_wkt("POINT(1 1)"),
            Err(CoverageError::UnsupportedGeometry("Point"))
        );
        assert!(matches!(
            CoverageTarget::from_wkt("POLYGON((0 0"),
            Err(CoverageError::InvalidWkt(_))
        ));
    }

    #[test]
    fn test_found_parcel_is_buffered_before_subtraction() {
        let search = parcel_registry(vec![(rect(0.0, 0.0, 10.0, 10.0), "220401_1.0001.3")]);
        let config = CoverageConfig::builder().parcel_buffer(0.5).build();
        let grid = GridSearch::new(search, config).unwrap();
        let mut walk = Walk::new(grid.config(), 100.0);

        let visit = grid.visit(Point::new(5.0, 5.0), &mut walk);

        assert_eq!(visit.outcome, ProbeOutcome::NewParcel("220401_1.0001.3".into()));
        let area = visit.cutter.unsigned_area();
        assert!(
            area > 120.0 && area < 121.0,
            "Buffered parcel area should be about 120.8, got {area}"
        );
        assert!(visit.cutter.contains(&Point::new(10.3, 5.0)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoverageConfig::builder().grid_step(0.0).build();
        assert!(GridSearch::new(parcel_registry(Vec::new()), config).is_err());
    }

    #[test]
    fn test_spawned_area_search_finishes_with_report() {
        let search = parcel_registry(vec![(rect(-5.0, -5.0, 15.0, 15.0), "220401_1.0001.1")]);
        let grid = GridSearch::new(search, CoverageConfig::default()).unwrap();
        let target = CoverageTarget::Area(MultiPolygon::new(vec![rect(0.0, 0.0, 10.0, 10.0)]));
        let mut handle = grid.spawn(target).unwrap();
        handle.join();

        let events = handle.poll(usize::MAX);
        let Some(CoverageEvent::Finished(report)) = events.last() else {
            panic!("Expected a Finished event last, got {:?}", events.last());
        };
        assert_eq!(report.found.len(), 1);
        assert_eq!(report.outcome, CoverageOutcome::Exhausted);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, CoverageEvent::Found(_)))
                .count(),
            1
        );
        assert!(report.found[0].geometry.contains(&Point::new(5.0, 5.0)));
    }

    #[test]
    fn test_cancelled_search_is_interrupted() {
        let search = parcel_registry(Vec::new());
        let grid = GridSearch::new(search, CoverageConfig::default()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let target = CoverageTarget::Area(MultiPolygon::new(vec![rect(0.0, 0.0, 50.0, 50.0)]));
        let report = grid.run(&target, &cancel, &mut |_| {});
        assert_eq!(report.outcome, CoverageOutcome::Interrupted);
        assert_eq!(report.probes, 0);
    }
}
