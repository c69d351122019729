//! Natural cubic splines on a uniform, unit-spaced grid of nodes.
//!
//! Background maps are sampled on a regular grid of tile centres, so the
//! general irregular-grid machinery is not needed here: every segment has
//! unit length in node coordinates and the tridiagonal system collapses to
//! `M[i-1] + 4 M[i] + M[i+1] = 6 (y[i+1] - 2 y[i] + y[i-1])`.
//!
//! Second derivatives are solved once (typically at model build time) and
//! evaluation is then O(1) per query.
//!
//! # Examples
//!
//! ```rust
//! use skymath::spline::{natural_second_derivatives, evaluate};
//!
//! let nodes = vec![0.0_f64, 1.0, 4.0, 9.0];
//! let d2 = natural_second_derivatives(&nodes);
//! let mid = evaluate(&nodes, &d2, 1.5);
//! assert!(mid > 1.0 && mid < 4.0);
//! ```

use num_traits::Float;

/// Solve the natural-spline second derivatives for unit-spaced `y`.
///
/// The end points have zero curvature. Fewer than three nodes yield all-zero
/// derivatives (the spline degenerates to linear interpolation).
pub fn natural_second_derivatives<T: Float>(y: &[T]) -> Vec<T> {
    let n = y.len();
    let mut d2 = vec![T::zero(); n];
    if n < 3 {
        return d2;
    }

    let four = T::from(4.0).unwrap_or_else(T::one);
    let six = T::from(6.0).unwrap_or_else(T::one);

    // Thomas algorithm on the interior nodes
    let mut c_prime = vec![T::zero(); n];
    let mut rhs = vec![T::zero(); n];
    for i in 1..n - 1 {
        let r = six * (y[i + 1] - y[i] - y[i] + y[i - 1]);
        let denom = four - c_prime[i - 1];
        c_prime[i] = T::one() / denom;
        rhs[i] = (r - rhs[i - 1]) / denom;
    }

    for i in (1..n - 1).rev() {
        d2[i] = rhs[i] - c_prime[i] * d2[i + 1];
    }

    d2
}

/// Locate the segment for node coordinate `t` and return `(index, offset)`.
///
/// The index is clamped to a valid segment so that coordinates before the
/// first or after the last node extrapolate the end segments.
pub fn segment<T: Float>(t: T, n: usize) -> (usize, T) {
    if n < 2 {
        return (0, T::zero());
    }
    let last = T::from(n - 2).unwrap_or_else(T::zero);
    let floor = t.floor().max(T::zero()).min(last);
    let index = floor.to_usize().unwrap_or(0);
    (index, t - floor)
}

/// Cubic-spline value between nodes `i` and `i + 1` at offset `dt`.
#[inline]
pub fn evaluate_segment<T: Float>(y0: T, y1: T, d0: T, d1: T, dt: T) -> T {
    let six = T::from(6.0).unwrap_or_else(T::one);
    let cdt = T::one() - dt;
    y0 * cdt + y1 * dt + ((cdt * cdt * cdt - cdt) * d0 + (dt * dt * dt - dt) * d1) / six
}

/// Evaluate the spline through `y` (second derivatives `d2`) at node
/// coordinate `t`.
pub fn evaluate<T: Float>(y: &[T], d2: &[T], t: T) -> T {
    match y.len() {
        0 => T::zero(),
        1 => y[0],
        n => {
            let (i, dt) = segment(t, n);
            evaluate_segment(y[i], y[i + 1], d2[i], d2[i + 1], dt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_passes_through_nodes() {
        let y = vec![1.0_f64, 3.0, 2.0, 5.0, 4.0];
        let d2 = natural_second_derivatives(&y);
        for (i, &v) in y.iter().enumerate() {
            assert_relative_eq!(evaluate(&y, &d2, i as f64), v, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_natural_end_conditions() {
        let y = vec![0.0_f64, 2.0, 1.0, 7.0];
        let d2 = natural_second_derivatives(&y);
        assert_eq!(d2[0], 0.0);
        assert_eq!(d2[3], 0.0);
        // Interior equations hold
        for i in 1..3 {
            let lhs = d2[i - 1] + 4.0 * d2[i] + d2[i + 1];
            let rhs = 6.0 * (y[i + 1] - 2.0 * y[i] + y[i - 1]);
            assert_relative_eq!(lhs, rhs, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_linear_data_is_reproduced() {
        let y: Vec<f64> = (0..6).map(|i| 2.0 * i as f64 + 1.0).collect();
        let d2 = natural_second_derivatives(&y);
        assert!(d2.iter().all(|d| d.abs() < 1e-12));
        assert_relative_eq!(evaluate(&y, &d2, 2.25), 5.5, epsilon = 1e-12);
        // Extrapolation continues the end segment
        assert_relative_eq!(evaluate(&y, &d2, -0.5), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_node_is_constant() {
        let y = vec![3.5_f32];
        let d2 = natural_second_derivatives(&y);
        assert_eq!(evaluate(&y, &d2, 10.0), 3.5);
    }

    #[test]
    fn test_two_nodes_interpolate_linearly() {
        let y = vec![1.0_f32, 3.0];
        let d2 = natural_second_derivatives(&y);
        assert_relative_eq!(evaluate(&y, &d2, 0.5), 2.0, epsilon = 1e-6);
    }
}
