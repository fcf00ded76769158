use geo::{BooleanOps, MultiLineString};
use tracing::{debug, info, instrument};
use uldk_registry::RegistrySearch;

use super::shapes::{densify, drop_degenerate, first_point, total_length};
use super::{CoverageEvent, CoverageOutcome, CoverageReport, CoverageTarget, GridSearch, Walk};
use crate::worker::CancelToken;

const LENGTH_EPSILON: f64 = 1e-6;

impl<S: RegistrySearch> GridSearch<S> {
    /// Walk the line from its start, probing the first remaining vertex each time.
    #[instrument(name = "Line coverage", skip_all, level = "debug")]
    pub fn cover_line(
        &self,
        line: &MultiLineString<f64>,
        cancel: &CancelToken,
        emit: &mut dyn FnMut(CoverageEvent),
    ) -> CoverageReport {
        let mut remaining = drop_degenerate(densify(line, self.config.line_spacing), 0.0);
        let mut length = total_length(&remaining);
        let mut walk = Walk::new(&self.config, length);
        info!(length, parts = remaining.0.len(), "Starting line coverage");

        let mut attempts = 0usize;
        let outcome = loop {
            if length <= self.config.min_line_length {
                break CoverageOutcome::Exhausted;
            }
            let Some(point) = first_point(&remaining) else {
                break CoverageOutcome::Exhausted;
            };
            if attempts >= self.config.max_line_attempts {
                debug!(attempts, "Line attempt budget exhausted");
                break CoverageOutcome::BudgetExhausted;
            }
            if let Some(outcome) = self.stop_reason(&walk, cancel) {
                break outcome;
            }
            attempts += 1;

            let visit = self.visit(point, &mut walk);
            let mut next = drop_degenerate(visit.cutter.clip(&remaining, true), 0.0);
            // A parcel that misses the probe point would leave the line unchanged
            if first_point(&next) == Some(point) || total_length(&next) > length - LENGTH_EPSILON
            {
                next = drop_degenerate(self.skip_disk(point).clip(&next, true), 0.0);
            }
            remaining = next;
            length = total_length(&remaining);
            self.settle(visit, length, &mut walk, emit);
        };

        walk.finish(CoverageTarget::Line(remaining), outcome)
    }
}
