//! Exact area of overlap between a pixel and a circle or ellipse.
//!
//! Circles are handled by splitting the pixel into quadrant-aligned pieces
//! and summing arc and triangle areas. Ellipses are mapped onto the unit
//! circle, where the (now skewed) pixel is cut into two triangles that are
//! each clipped against the circle.

use std::f64::consts::PI;

/// Sentinel coordinate for "no intersection".
const NONE: f64 = 2.0;
const TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

const NO_POINT: Point = Point { x: NONE, y: NONE };

/// Area of the circular segment cut by the chord between two points.
fn area_arc(x1: f64, y1: f64, x2: f64, y2: f64, r: f64) -> f64 {
    let chord = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
    let theta = 2.0 * (0.5 * chord / r).min(1.0).asin();
    0.5 * r * r * (theta - theta.sin())
}

fn area_arc_unit(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    area_arc(x1, y1, x2, y2, 1.0)
}

fn area_triangle(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> f64 {
    0.5 * (x1 * (y2 - y3) + x2 * (y3 - y1) + x3 * (y1 - y2)).abs()
}

/// Overlap of a circle of radius `r` at the origin with the rectangle
/// `[xmin, xmax] × [ymin, ymax]` lying in the first quadrant.
fn circoverlap_core(xmin: f64, ymin: f64, xmax: f64, ymax: f64, r: f64) -> f64 {
    let r2 = r * r;
    if xmin * xmin + ymin * ymin > r2 {
        return 0.0;
    }
    if xmax * xmax + ymax * ymax < r2 {
        return (xmax - xmin) * (ymax - ymin);
    }

    let lower_right_in = xmax * xmax + ymin * ymin < r2;
    let upper_left_in = xmin * xmin + ymax * ymax < r2;
    match (lower_right_in, upper_left_in) {
        (true, true) => {
            let (x1, y1) = ((r2 - ymax * ymax).sqrt(), ymax);
            let (x2, y2) = (xmax, (r2 - xmax * xmax).sqrt());
            (xmax - xmin) * (ymax - ymin) - area_triangle(x1, y1, x2, y2, xmax, ymax)
                + area_arc(x1, y1, x2, y2, r)
        }
        (true, false) => {
            let (x1, y1) = (xmin, (r2 - xmin * xmin).sqrt());
            let (x2, y2) = (xmax, (r2 - xmax * xmax).sqrt());
            area_arc(x1, y1, x2, y2, r)
                + area_triangle(x1, y1, x1, ymin, xmax, ymin)
                + area_triangle(x1, y1, x2, ymin, x2, y2)
        }
        (false, true) => {
            let (x1, y1) = ((r2 - ymin * ymin).sqrt(), ymin);
            let (x2, y2) = ((r2 - ymax * ymax).sqrt(), ymax);
            area_arc(x1, y1, x2, y2, r)
                + area_triangle(x1, y1, xmin, y1, xmin, ymax)
                + area_triangle(x1, y1, xmin, y2, x2, y2)
        }
        (false, false) => {
            let (x1, y1) = ((r2 - ymin * ymin).sqrt(), ymin);
            let (x2, y2) = (xmin, (r2 - xmin * xmin).sqrt());
            area_arc(x1, y1, x2, y2, r) + area_triangle(x1, y1, x2, y2, xmin, ymin)
        }
    }
}

/// Exact overlap of the rectangle `[xmin, xmax] × [ymin, ymax]` with a
/// circle of radius `r` centred on the origin.
pub fn circoverlap(xmin: f64, ymin: f64, xmax: f64, ymax: f64, r: f64) -> f64 {
    if r <= 0.0 {
        return 0.0;
    }
    // Fold every piece into the first quadrant
    let split = |lo: f64, hi: f64| -> [(f64, f64); 2] {
        if lo >= 0.0 {
            [(lo, hi), (0.0, 0.0)]
        } else if hi <= 0.0 {
            [(-hi, -lo), (0.0, 0.0)]
        } else {
            [(0.0, -lo), (0.0, hi)]
        }
    };
    let mut area = 0.0;
    for (x0, x1) in split(xmin, xmax) {
        if x1 <= x0 {
            continue;
        }
        for (y0, y1) in split(ymin, ymax) {
            if y1 <= y0 {
                continue;
            }
            area += circoverlap_core(x0, y0, x1, y1, r);
        }
    }
    area
}

/// Both intersections of the line through two points with the unit circle.
fn circle_line(x1: f64, y1: f64, x2: f64, y2: f64) -> (Point, Point) {
    let (dx, dy) = (x2 - x1, y2 - y1);
    if dx.abs() < TOLERANCE && dy.abs() < TOLERANCE {
        return (NO_POINT, NO_POINT);
    }
    if dx.abs() > dy.abs() {
        let a = dy / dx;
        let b = y1 - a * x1;
        let delta = 1.0 + a * a - b * b;
        if delta <= 0.0 {
            return (NO_POINT, NO_POINT);
        }
        let delta = delta.sqrt();
        let px1 = (-a * b - delta) / (1.0 + a * a);
        let px2 = (-a * b + delta) / (1.0 + a * a);
        (
            Point {
                x: px1,
                y: a * px1 + b,
            },
            Point {
                x: px2,
                y: a * px2 + b,
            },
        )
    } else {
        let a = dx / dy;
        let b = x1 - a * y1;
        let delta = 1.0 + a * a - b * b;
        if delta <= 0.0 {
            return (NO_POINT, NO_POINT);
        }
        let delta = delta.sqrt();
        let py1 = (-a * b - delta) / (1.0 + a * a);
        let py2 = (-a * b + delta) / (1.0 + a * a);
        (
            Point {
                x: a * py1 + b,
                y: py1,
            },
            Point {
                x: a * py2 + b,
                y: py2,
            },
        )
    }
}

/// Intersections of the segment between two points with the unit circle.
/// Misses are returned as [`NO_POINT`], with any hit first.
fn circle_segment(x1: f64, y1: f64, x2: f64, y2: f64) -> (Point, Point) {
    let (p1, p2) = circle_line(x1, y1, x2, y2);
    let on_segment = |p: Point| {
        !((p.x > x1 && p.x > x2)
            || (p.x < x1 && p.x < x2)
            || (p.y > y1 && p.y > y2)
            || (p.y < y1 && p.y < y2))
    };
    let p1 = if on_segment(p1) { p1 } else { NO_POINT };
    let p2 = if on_segment(p2) { p2 } else { NO_POINT };
    if p1.x > 1.0 && p2.x < NONE {
        (p2, p1)
    } else {
        (p1, p2)
    }
}

/// The intersection of the line with the unit circle closest to `(x2, y2)`.
fn circle_segment_single2(x1: f64, y1: f64, x2: f64, y2: f64) -> Point {
    let (p1, p2) = circle_line(x1, y1, x2, y2);
    let (dx1, dy1) = ((p1.x - x2).abs(), (p1.y - y2).abs());
    let (dx2, dy2) = ((p2.x - x2).abs(), (p2.y - y2).abs());
    let second_closer = if dx1 > dy1 { dx1 > dx2 } else { dy1 > dy2 };
    if second_closer {
        p2
    } else {
        p1
    }
}

/// Whether the origin lies inside the triangle, by ray crossing.
fn origin_in_triangle(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> bool {
    let crosses = |xa: f64, ya: f64, xb: f64, yb: f64| {
        (ya > 0.0) != (yb > 0.0) && 0.0 < (xb - xa) * (0.0 - ya) / (yb - ya) + xa
    };
    let c = crosses(x1, y1, x2, y2) as u8
        + crosses(x2, y2, x3, y3) as u8
        + crosses(x3, y3, x1, y1) as u8;
    c % 2 == 1
}

/// Overlap of a triangle with the unit circle at the origin.
fn overlap_area_triangle_unit_circle(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    x3: f64,
    y3: f64,
) -> f64 {
    // Sort vertices by distance from the origin
    let mut v = [
        (x1, y1, x1 * x1 + y1 * y1),
        (x2, y2, x2 * x2 + y2 * y2),
        (x3, y3, x3 * x3 + y3 * y3),
    ];
    v.sort_by(|a, b| a.2.total_cmp(&b.2));
    let [(x1, y1, d1), (x2, y2, d2), (x3, y3, d3)] = v;

    let (in1, in2, in3) = (d1 < 1.0, d2 < 1.0, d3 < 1.0);
    let on1 = (d1 - 1.0).abs() < TOLERANCE;
    let on2 = (d2 - 1.0).abs() < TOLERANCE;
    let on3 = (d3 - 1.0).abs() < TOLERANCE;

    if on3 || in3 {
        return area_triangle(x1, y1, x2, y2, x3, y3);
    }

    if in2 || on2 {
        // A vertex on the circle only cuts when the edge heads inward
        let intersect13 = !on1 || x1 * (x3 - x1) + y1 * (y3 - y1) < 0.0;
        let intersect23 = !on2 || x2 * (x3 - x2) + y2 * (y3 - y2) < 0.0;
        return if intersect13 && intersect23 && !on2 {
            let p1 = circle_segment_single2(x1, y1, x3, y3);
            let p2 = circle_segment_single2(x2, y2, x3, y3);
            area_triangle(x1, y1, x2, y2, p1.x, p1.y)
                + area_triangle(x2, y2, p1.x, p1.y, p2.x, p2.y)
                + area_arc_unit(p1.x, p1.y, p2.x, p2.y)
        } else if intersect13 {
            let p1 = circle_segment_single2(x1, y1, x3, y3);
            area_triangle(x1, y1, x2, y2, p1.x, p1.y) + area_arc_unit(x2, y2, p1.x, p1.y)
        } else if intersect23 {
            let p2 = circle_segment_single2(x2, y2, x3, y3);
            area_triangle(x1, y1, x2, y2, p2.x, p2.y) + area_arc_unit(x1, y1, p2.x, p2.y)
        } else {
            area_arc_unit(x1, y1, x2, y2)
        };
    }

    if on1 {
        return 0.0;
    }

    if in1 {
        let (mut p1, mut p2) = circle_segment(x2, y2, x3, y3);
        let p3 = circle_segment_single2(x1, y1, x2, y2);
        let p4 = circle_segment_single2(x1, y1, x3, y3);
        if p1.x > 1.0 {
            // The arc between p3 and p4 spans more than half the circle when
            // the origin and vertex 1 lie on opposite sides of the chord
            let left = |x: f64, y: f64| (y - p3.y) * (p4.x - p3.x) > (p4.y - p3.y) * (x - p3.x);
            let base = area_triangle(x1, y1, p3.x, p3.y, p4.x, p4.y);
            return if left(0.0, 0.0) != left(x1, y1) {
                base + PI - area_arc_unit(p3.x, p3.y, p4.x, p4.y)
            } else {
                base + area_arc_unit(p3.x, p3.y, p4.x, p4.y)
            };
        }
        if (p2.x - x2).powi(2) + (p2.y - y2).powi(2) < (p1.x - x2).powi(2) + (p1.y - y2).powi(2) {
            std::mem::swap(&mut p1, &mut p2);
        }
        return area_triangle(x1, y1, p3.x, p3.y, p1.x, p1.y)
            + area_triangle(x1, y1, p1.x, p1.y, p2.x, p2.y)
            + area_triangle(x1, y1, p2.x, p2.y, p4.x, p4.y)
            + area_arc_unit(p1.x, p1.y, p3.x, p3.y)
            + area_arc_unit(p2.x, p2.y, p4.x, p4.y);
    }

    // All vertices outside: split at the midpoint of any chord the edges cut
    let (p1, p2) = circle_segment(x1, y1, x2, y2);
    let (p3, p4) = circle_segment(x2, y2, x3, y3);
    let (p5, p6) = circle_segment(x3, y3, x1, y1);
    if p1.x <= 1.0 {
        let (xp, yp) = (0.5 * (p1.x + p2.x), 0.5 * (p1.y + p2.y));
        overlap_area_triangle_unit_circle(x1, y1, x3, y3, xp, yp)
            + overlap_area_triangle_unit_circle(x2, y2, x3, y3, xp, yp)
    } else if p3.x <= 1.0 {
        let (xp, yp) = (0.5 * (p3.x + p4.x), 0.5 * (p3.y + p4.y));
        overlap_area_triangle_unit_circle(x3, y3, x1, y1, xp, yp)
            + overlap_area_triangle_unit_circle(x2, y2, x1, y1, xp, yp)
    } else if p5.x <= 1.0 {
        let (xp, yp) = (0.5 * (p5.x + p6.x), 0.5 * (p5.y + p6.y));
        overlap_area_triangle_unit_circle(x1, y1, x2, y2, xp, yp)
            + overlap_area_triangle_unit_circle(x3, y3, x2, y2, xp, yp)
    } else if origin_in_triangle(x1, y1, x2, y2, x3, y3) {
        PI
    } else {
        0.0
    }
}

/// Exact overlap of the rectangle `[xmin, xmax] × [ymin, ymax]` with the
/// ellipse of semi-axes `rx`, `ry` rotated by `theta`, centred on the origin.
pub fn ellipoverlap(
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    rx: f64,
    ry: f64,
    theta: f64,
) -> f64 {
    if rx <= 0.0 || ry <= 0.0 {
        return 0.0;
    }
    let (sin, cos) = (-theta).sin_cos();
    let to_unit = |x: f64, y: f64| ((x * cos - y * sin) / rx, (x * sin + y * cos) / ry);
    let (x1, y1) = to_unit(xmin, ymin);
    let (x2, y2) = to_unit(xmax, ymin);
    let (x3, y3) = to_unit(xmax, ymax);
    let (x4, y4) = to_unit(xmin, ymax);
    (overlap_area_triangle_unit_circle(x1, y1, x2, y2, x3, y3)
        + overlap_area_triangle_unit_circle(x1, y1, x4, y4, x3, y3))
        * rx
        * ry
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Sum of pixel overlaps over a grid covering the whole shape.
    fn total<F: Fn(f64, f64, f64, f64) -> f64>(center: (f64, f64), extent: i64, overlap: F) -> f64 {
        let mut sum = 0.0;
        for iy in -extent..=extent {
            for ix in -extent..=extent {
                let dx = ix as f64 - center.0;
                let dy = iy as f64 - center.1;
                sum += overlap(dx - 0.5, dy - 0.5, dx + 0.5, dy + 0.5);
            }
        }
        sum
    }

    #[test]
    fn test_circle_pixel_limits() {
        // Pixel well inside
        assert_relative_eq!(circoverlap(-0.5, -0.5, 0.5, 0.5, 5.0), 1.0, epsilon = 1e-12);
        // Pixel well outside
        assert_eq!(circoverlap(10.0, 10.0, 11.0, 11.0, 2.0), 0.0);
        // Quarter of a small circle in each quadrant
        assert_relative_eq!(
            circoverlap(0.0, 0.0, 1.0, 1.0, 0.5),
            PI * 0.25 / 4.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_circle_total_area() {
        for &(r, cx, cy) in &[(3.0, 0.0, 0.0), (2.7, 0.3, -0.2), (5.5, 0.5, 0.5)] {
            let area = total((cx, cy), 8, |x0, y0, x1, y1| circoverlap(x0, y0, x1, y1, r));
            assert_relative_eq!(area, PI * r * r, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_ellipse_matches_circle() {
        for &(x0, y0) in &[(0.2, 0.3), (-1.5, 0.7), (2.1, -2.4)] {
            let c = circoverlap(x0, y0, x0 + 1.0, y0 + 1.0, 2.5);
            let e = ellipoverlap(x0, y0, x0 + 1.0, y0 + 1.0, 2.5, 2.5, 0.4);
            assert_relative_eq!(c, e, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_ellipse_total_area() {
        for &(a, b, theta) in &[(4.0, 2.0, 0.0), (3.3, 1.2, 0.7), (5.0, 4.5, -1.2)] {
            let area = total((0.15, -0.35), 8, |x0, y0, x1, y1| {
                ellipoverlap(x0, y0, x1, y1, a, b, theta)
            });
            assert_relative_eq!(area, PI * a * b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_tiny_ellipse_inside_pixel() {
        let area = ellipoverlap(-0.5, -0.5, 0.5, 0.5, 0.3, 0.1, 0.5);
        assert_relative_eq!(area, PI * 0.03, epsilon = 1e-9);
    }
}
