use geo::{
    Area, BooleanOps, BoundingRect, Contains, Coord, InteriorPoint, MultiPolygon, Point, Rect,
};
use tracing::{debug, info, instrument};
use uldk_registry::RegistrySearch;

use super::{CoverageEvent, CoverageOutcome, CoverageReport, CoverageTarget, GridSearch, Walk};
use crate::worker::CancelToken;

impl<S: RegistrySearch> GridSearch<S> {
    /// Probe grid cell centres inside the remaining area, then each leftover fragment
    /// once.
    #[instrument(name = "Area coverage", skip_all, level = "debug")]
    pub fn cover_area(
        &self,
        region: &MultiPolygon<f64>,
        cancel: &CancelToken,
        emit: &mut dyn FnMut(CoverageEvent),
    ) -> CoverageReport {
        let mut remaining = region.clone();
        let mut area = remaining.unsigned_area();
        let mut walk = Walk::new(&self.config, area);
        info!(area, "Starting area coverage");

        let bbox = match remaining.bounding_rect() {
            Some(bbox) if area > 0.0 => bbox,
            _ => return walk.finish(CoverageTarget::Area(remaining), CoverageOutcome::Exhausted),
        };

        // One grid for the whole region, walked part by part so the empty space
        // between distant parts is never scanned
        let step = self.config.grid_step;
        let origin = bbox.min();
        let parts: Vec<Rect<f64>> = remaining
            .0
            .iter()
            .filter_map(BoundingRect::bounding_rect)
            .collect();
        debug!(parts = parts.len(), "Grid laid out");
        let candidates = parts
            .into_iter()
            .flat_map(move |part| cell_centres(origin, step, part));

        for point in candidates {
            if self.is_exhausted(&walk, area) {
                break;
            }
            if let Some(outcome) = self.interruption(&walk, cancel) {
                return walk.finish(CoverageTarget::Area(remaining), outcome);
            }
            if !remaining.contains(&point) {
                continue;
            }
            if let Some(outcome) = self.stop_reason(&walk, cancel) {
                return walk.finish(CoverageTarget::Area(remaining), outcome);
            }
            area = self.probe_area(point, &mut remaining, &mut walk, emit);
        }

        if !self.is_exhausted(&walk, area) {
            let fragments: Vec<Point<f64>> = remaining
                .0
                .iter()
                .filter(|fragment| fragment.unsigned_area() > self.config.min_fragment_area)
                .filter_map(InteriorPoint::interior_point)
                .collect();
            debug!(fragments = fragments.len(), "Probing leftover fragments");

            for point in fragments {
                // An earlier fragment's parcel may already have covered this one
                if !remaining.contains(&point) {
                    continue;
                }
                if let Some(outcome) = self.stop_reason(&walk, cancel) {
                    return walk.finish(CoverageTarget::Area(remaining), outcome);
                }
                area = self.probe_area(point, &mut remaining, &mut walk, emit);
            }
        }

        let outcome = if self.is_exhausted(&walk, area) || area <= 0.0 {
            CoverageOutcome::Exhausted
        } else {
            CoverageOutcome::Residual
        };
        walk.finish(CoverageTarget::Area(remaining), outcome)
    }

    fn is_exhausted(&self, walk: &Walk, area: f64) -> bool {
        walk.probes > 0 && area < self.config.min_area
    }

    fn probe_area(
        &self,
        point: Point<f64>,
        remaining: &mut MultiPolygon<f64>,
        walk: &mut Walk,
        emit: &mut dyn FnMut(CoverageEvent),
    ) -> f64 {
        let visit = self.visit(point, walk);
        *remaining = remaining.difference(&visit.cutter);
        // The probe point must leave the remaining area whatever the registry answered
        if remaining.contains(&point) {
            *remaining = remaining.difference(&self.skip_disk(point));
        }
        let area = remaining.unsigned_area();
        self.settle(visit, area, walk, emit);
        area
    }
}

/// Centres of the cells of the grid anchored at `origin` that overlap `part`.
///
/// Cell centres stay off the region's outer edges.
fn cell_centres(
    origin: Coord<f64>,
    step: f64,
    part: Rect<f64>,
) -> impl Iterator<Item = Point<f64>> {
    let span = |from: f64, to: f64, anchor: f64| {
        let first = ((from - anchor) / step).floor().max(0.0) as usize;
        let last = ((to - anchor) / step).ceil().max(0.0) as usize;
        first..last.max(first + 1)
    };
    let columns = span(part.min().x, part.max().x, origin.x);
    let rows = span(part.min().y, part.max().y, origin.y);
    rows.flat_map(move |row| {
        columns.clone().map(move |column| {
            Point::new(
                origin.x + (column as f64 + 0.5) * step,
                origin.y + (row as f64 + 0.5) * step,
            )
        })
    })
}
