//! 延长算法依赖的平面几何原语：反射、缓冲边界与折线求交、折线合并。

use crate::errors::GeometryError;
use crate::geometry::{BufferRegion, MultiPolyline, Point2, Polyline, Vector2, tolerance_for};

/// 单轴反射：`center` 是 `intersect` 与返回值的中点。
#[inline]
pub fn opposite_coordinate(center: f64, intersect: f64) -> f64 {
    2.0 * center - intersect
}

/// 将 `intersect` 关于 `center` 做点反射，两轴独立计算。
#[inline]
pub fn reflect_point(center: Point2, intersect: Point2) -> Point2 {
    Point2::new(
        opposite_coordinate(center.x(), intersect.x()),
        opposite_coordinate(center.y(), intersect.y()),
    )
}

/// 缓冲区边界与折线的交点，输出仅限点；共享顶点等重合交点只保留一个。
pub fn intersect_points(
    buffer: &BufferRegion,
    line: &Polyline,
) -> Result<Vec<Point2>, GeometryError> {
    buffer
        .spatial_reference()
        .ensure_same(line.spatial_reference())?;

    let mut points: Vec<Point2> = Vec::new();
    for (start, end) in line.segments() {
        for point in segment_circle_intersections(start, end, buffer.center(), buffer.radius()) {
            if !points.iter().any(|existing| existing.approx_eq(point)) {
                points.push(point);
            }
        }
    }
    Ok(points)
}

fn segment_circle_intersections(
    start: Point2,
    end: Point2,
    center: Point2,
    radius: f64,
) -> Vec<Point2> {
    let direction = Vector2::from_points(start, end);
    let offset = Vector2::from_points(center, start);
    let a = direction.length_squared();
    if a <= f64::EPSILON {
        return Vec::new();
    }
    let b = 2.0 * offset.dot(direction);
    let c = offset.length_squared() - radius * radius;
    let discriminant = b * b - 4.0 * a * c;

    let scale = b * b + (4.0 * a * c).abs();
    let tangent_slack = scale.max(1.0) * 1e-12;
    let roots = if discriminant.abs() <= tangent_slack {
        vec![-b / (2.0 * a)]
    } else if discriminant < 0.0 {
        Vec::new()
    } else {
        let root = discriminant.sqrt();
        vec![(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
    };

    // 参数允许越界一个距离容差，落在顶点上的交点不会因舍入丢失
    let extent = start.magnitude().max(end.magnitude()).max(radius);
    let slack = tolerance_for(extent) / a.sqrt();
    roots
        .into_iter()
        .filter(|t| (-slack..=1.0 + slack).contains(t))
        .map(|t| start.translate(direction.scaled(t.clamp(0.0, 1.0))))
        .collect()
}

/// 合并折线：已被覆盖的线段跳过，与部件端点相接的线段并入该部件，其余成为新部件。
/// 对同一线段重复合并不会改变结果。
pub fn union(base: &MultiPolyline, other: &Polyline) -> Result<MultiPolyline, GeometryError> {
    base.spatial_reference()
        .ensure_same(other.spatial_reference())?;
    let reference = base.spatial_reference();

    let mut parts: Vec<Vec<Point2>> = base
        .parts()
        .iter()
        .map(|part| part.points().to_vec())
        .collect();

    for (start, end) in other.segments() {
        if start.approx_eq(end) || is_covered(&parts, start, end) {
            continue;
        }
        attach(&mut parts, start, end);
    }

    let parts = parts
        .into_iter()
        .map(|points| Polyline::new(points, reference))
        .collect::<Result<Vec<_>, _>>()?;
    MultiPolyline::from_parts(parts)
}

fn attach(parts: &mut Vec<Vec<Point2>>, start: Point2, end: Point2) {
    for part in parts.iter_mut() {
        let first = part[0];
        let last = part[part.len() - 1];
        if last.approx_eq(start) {
            part.push(end);
        } else if last.approx_eq(end) {
            part.push(start);
        } else if first.approx_eq(end) {
            part.insert(0, start);
        } else if first.approx_eq(start) {
            part.insert(0, end);
        } else {
            continue;
        }
        return;
    }
    parts.push(vec![start, end]);
}

/// 判断线段 `start→end` 是否完全落在现有几何上：收集与之共线的线段在其参数轴上的投影区间，
/// 检查区间并集是否覆盖 [0, 1]。
fn is_covered(parts: &[Vec<Point2>], start: Point2, end: Point2) -> bool {
    let direction = Vector2::from_points(start, end);
    let length_squared = direction.length_squared();
    let length = length_squared.sqrt();
    let tolerance = tolerance_for(start.magnitude().max(end.magnitude()).max(length));

    let mut intervals: Vec<(f64, f64)> = Vec::new();
    for part in parts {
        for pair in part.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let off_a = direction.perp_dot(Vector2::from_points(start, a)).abs() / length;
            let off_b = direction.perp_dot(Vector2::from_points(start, b)).abs() / length;
            if off_a > tolerance || off_b > tolerance {
                continue;
            }
            let ta = direction.dot(Vector2::from_points(start, a)) / length_squared;
            let tb = direction.dot(Vector2::from_points(start, b)) / length_squared;
            let (low, high) = if ta <= tb { (ta, tb) } else { (tb, ta) };
            if high >= 0.0 && low <= 1.0 {
                intervals.push((low.max(0.0), high.min(1.0)));
            }
        }
    }

    intervals.sort_by(|lhs, rhs| lhs.0.total_cmp(&rhs.0));
    let gap = tolerance / length;
    let mut reached = 0.0_f64;
    for (low, high) in intervals {
        if low > reached + gap {
            return false;
        }
        reached = reached.max(high);
    }
    reached >= 1.0 - gap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SpatialReference;

    fn sr() -> SpatialReference {
        SpatialReference::from_wkid(3857).unwrap()
    }

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|(x, y)| Point2::new(*x, *y)), sr()).unwrap()
    }

    #[test]
    fn reflection_places_center_at_midpoint() {
        let cases = [
            ((0.0, 0.0), (2.0, 0.0)),
            ((10.0, -4.0), (7.5, 1.25)),
            ((-3.0, 8.0), (-3.0, 8.0)),
            ((512_345.25, 4_100_200.5), (512_347.0, 4_100_199.0)),
        ];
        for ((cx, cy), (px, py)) in cases {
            let center = Point2::new(cx, cy);
            let intersect = Point2::new(px, py);
            let reflected = reflect_point(center, intersect);
            let midpoint = Point2::from_vec((reflected.as_vec2() + intersect.as_vec2()) * 0.5);
            assert!(midpoint.approx_eq(center), "{midpoint:?} != {center:?}");
            assert!((reflected.distance(center) - intersect.distance(center)).abs() < 1e-6);
        }
        assert_eq!(opposite_coordinate(3.0, 5.0), 1.0);
    }

    #[test]
    fn buffer_boundary_crosses_straight_line_once() {
        let buffer = BufferRegion::around(Point2::new(0.0, 0.0), 2.0, sr()).unwrap();
        let points = intersect_points(&buffer, &line(&[(0.0, 0.0), (10.0, 0.0)])).unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].approx_eq(Point2::new(2.0, 0.0)));
    }

    #[test]
    fn crossing_at_shared_vertex_is_reported_once() {
        let buffer = BufferRegion::around(Point2::new(0.0, 0.0), 5.0, sr()).unwrap();
        let points =
            intersect_points(&buffer, &line(&[(0.0, 0.0), (5.0, 0.0), (9.0, 3.0)])).unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].approx_eq(Point2::new(5.0, 0.0)));
    }

    #[test]
    fn small_radius_on_long_segment_crosses_once() {
        let buffer = BufferRegion::around(Point2::new(0.0, 0.0), 1e-5, sr()).unwrap();
        let points = intersect_points(&buffer, &line(&[(0.0, 0.0), (100_000.0, 0.0)])).unwrap();
        assert_eq!(points.len(), 1, "{points:?}");
        assert!(points[0].approx_eq(Point2::new(1e-5, 0.0)));
    }

    #[test]
    fn short_line_has_no_crossing_and_hairpin_has_two() {
        let buffer = BufferRegion::around(Point2::new(0.0, 0.0), 20.0, sr()).unwrap();
        let short = intersect_points(&buffer, &line(&[(0.0, 0.0), (10.0, 0.0)])).unwrap();
        assert!(short.is_empty());

        let buffer = BufferRegion::around(Point2::new(0.0, 0.0), 5.0, sr()).unwrap();
        let hairpin = line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 1.0), (0.0, 1.0)]);
        assert_eq!(intersect_points(&buffer, &hairpin).unwrap().len(), 2);
    }

    #[test]
    fn intersection_rejects_mixed_references() {
        let utm = SpatialReference::from_wkid(32610).unwrap();
        let buffer = BufferRegion::around(Point2::new(0.0, 0.0), 2.0, utm).unwrap();
        let err = intersect_points(&buffer, &line(&[(0.0, 0.0), (10.0, 0.0)])).unwrap_err();
        assert_eq!(
            err,
            GeometryError::SpatialReferenceMismatch {
                expected: 32610,
                found: 3857
            }
        );
    }

    #[test]
    fn union_joins_segments_at_matching_endpoints() {
        let base = MultiPolyline::from(line(&[(0.0, 0.0), (10.0, 0.0)]));
        let with_start = union(&base, &line(&[(-2.0, 0.0), (0.0, 0.0)])).unwrap();
        let extended = union(&with_start, &line(&[(13.0, 0.0), (10.0, 0.0)])).unwrap();

        assert!(extended.is_single_part());
        let part = &extended.parts()[0];
        assert!(part.start().approx_eq(Point2::new(-2.0, 0.0)));
        assert!(part.end().approx_eq(Point2::new(13.0, 0.0)));
        assert!((extended.length() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn union_is_idempotent() {
        let start = line(&[(-2.0, 0.0), (0.0, 0.0)]);
        let end = line(&[(13.0, 0.0), (10.0, 0.0)]);
        let base = MultiPolyline::from(line(&[(0.0, 0.0), (10.0, 0.0)]));
        let once = union(&union(&base, &start).unwrap(), &end).unwrap();
        let twice = union(&union(&once, &start).unwrap(), &end).unwrap();
        assert_eq!(once, twice);

        // 落在原线内部的线段同样视为已覆盖
        let inner = union(&base, &line(&[(3.0, 0.0), (6.0, 0.0)])).unwrap();
        assert_eq!(inner, base);
    }

    #[test]
    fn union_keeps_disjoint_segment_as_new_part() {
        let base = MultiPolyline::from(line(&[(0.0, 0.0), (10.0, 0.0)]));
        let merged = union(&base, &line(&[(0.0, 5.0), (10.0, 5.0)])).unwrap();
        assert_eq!(merged.parts().len(), 2);
    }

    #[test]
    fn union_ignores_zero_length_segments() {
        let base = MultiPolyline::from(line(&[(0.0, 0.0), (10.0, 0.0)]));
        let merged = union(&base, &line(&[(0.0, 0.0), (0.0, 0.0)])).unwrap();
        assert_eq!(merged, base);
    }
}
