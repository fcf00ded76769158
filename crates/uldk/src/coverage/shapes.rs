use std::f64::consts::TAU;

use geo::{Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon};

/// Regular polygon approximating a disk around `center`.
pub fn disk(center: Point<f64>, radius: f64, segments: usize) -> MultiPolygon<f64> {
    let segments = segments.max(3);
    let ring: Vec<Coord<f64>> = (0..=segments)
        .map(|i| {
            let angle = TAU * (i % segments) as f64 / segments as f64;
            Coord {
                x: center.x() + radius * angle.cos(),
                y: center.y() + radius * angle.sin(),
            }
        })
        .collect();
    MultiPolygon::new(vec![Polygon::new(LineString::new(ring), Vec::new())])
}

pub fn line_length(line: &LineString<f64>) -> f64 {
    line.lines().map(|l| l.dx().hypot(l.dy())).sum()
}

pub fn total_length(lines: &MultiLineString<f64>) -> f64 {
    lines.0.iter().map(line_length).sum()
}

/// Insert vertices so no segment is longer than `spacing`.
pub fn densify(lines: &MultiLineString<f64>, spacing: f64) -> MultiLineString<f64> {
    lines
        .0
        .iter()
        .map(|line| {
            let mut coords = Vec::with_capacity(line.0.len());
            for segment in line.lines() {
                let length = segment.dx().hypot(segment.dy());
                let pieces = (length / spacing).ceil().max(1.0) as usize;
                coords.extend((0..pieces).map(|i| {
                    let t = i as f64 / pieces as f64;
                    Coord {
                        x: segment.start.x + t * segment.dx(),
                        y: segment.start.y + t * segment.dy(),
                    }
                }));
            }
            if let Some(last) = line.0.last() {
                coords.push(*last);
            }
            LineString::new(coords)
        })
        .collect()
}

/// Drop parts that no longer describe a line.
pub fn drop_degenerate(lines: MultiLineString<f64>, min_length: f64) -> MultiLineString<f64> {
    lines
        .into_iter()
        .filter(|line| line.0.len() >= 2 && line_length(line) > min_length)
        .collect()
}

/// First vertex of the first non-empty part.
pub fn first_point(lines: &MultiLineString<f64>) -> Option<Point<f64>> {
    lines
        .0
        .iter()
        .find(|line| line.0.len() >= 2)
        .map(|line| Point::from(line.0[0]))
}

#[cfg(test)]
mod tests {
    use geo::{Area, Contains, line_string};

    use super::*;

    #[test]
    fn test_disk_area_close_to_circle() {
        let disk = disk(Point::new(5.0, 5.0), 10.0, 64);
        let circle = std::f64::consts::PI * 100.0;
        assert!((disk.unsigned_area() - circle).abs() / circle < 0.01);
        assert!(disk.contains(&Point::new(5.0, 5.0)));
        assert!(!disk.contains(&Point::new(16.0, 5.0)));
    }

    #[test]
    fn test_densify_keeps_shape_and_length() {
        let lines = MultiLineString::new(vec![line_string![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 5.0),
        ]]);
        let dense = densify(&lines, 1.0);
        assert_eq!(dense.0[0].0.len(), 16);
        assert!((total_length(&dense) - 15.0).abs() < 1e-9);
        assert_eq!(dense.0[0].0.last(), Some(&Coord { x: 10.0, y: 5.0 }));
    }

    #[test]
    fn test_drop_degenerate_and_first_point() {
        let lines = MultiLineString::new(vec![
            LineString::new(vec![Coord { x: 1.0, y: 1.0 }]),
            line_string![(x: 2.0, y: 2.0), (x: 2.0, y: 2.0)],
            line_string![(x: 3.0, y: 3.0), (x: 4.0, y: 3.0)],
        ]);
        assert_eq!(first_point(&lines), Some(Point::new(2.0, 2.0)));
        let cleaned = drop_degenerate(lines, 0.0);
        assert_eq!(cleaned.0.len(), 1);
        assert_eq!(first_point(&cleaned), Some(Point::new(3.0, 3.0)));
    }
}
