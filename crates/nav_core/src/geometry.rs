//! Fixed-point geometry on oriented squares.
//!
//! A square is described by its centre, two orthonormal axes `u` and `v`, and
//! half extents along each axis. Functions that take a bare `point` expect it
//! relative to the square's centre.

use serde::{Deserialize, Serialize};

use crate::math::{sin_cos, Fixed, Vec2Fixed};

/// An oriented rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Square {
    /// Centre in world space.
    pub center: Vec2Fixed,
    /// First axis (unit length).
    pub u: Vec2Fixed,
    /// Second axis (unit length, perpendicular to `u`).
    pub v: Vec2Fixed,
    /// Half extents along `u` and `v`.
    pub half: Vec2Fixed,
}

impl Square {
    /// Square rotated by `angle`, with `u = (cos, -sin)` and `v = (sin, cos)`.
    #[must_use]
    pub fn from_angle(center: Vec2Fixed, angle: Fixed, hw: Fixed, hh: Fixed) -> Self {
        let (s, c) = sin_cos(angle);
        Self {
            center,
            u: Vec2Fixed::new(c, -s),
            v: Vec2Fixed::new(s, c),
            half: Vec2Fixed::new(hw, hh),
        }
    }

    /// Axis-aligned square.
    #[must_use]
    pub fn axis_aligned(center: Vec2Fixed, hw: Fixed, hh: Fixed) -> Self {
        Self {
            center,
            u: Vec2Fixed::new(Fixed::ONE, Fixed::ZERO),
            v: Vec2Fixed::new(Fixed::ZERO, Fixed::ONE),
            half: Vec2Fixed::new(hw, hh),
        }
    }

    /// Whether `u`/`v` are exactly the world axes.
    #[must_use]
    pub fn is_axis_aligned(&self) -> bool {
        (self.u.x.abs() == Fixed::ONE && self.u.y == Fixed::ZERO)
            || (self.u.x == Fixed::ZERO && self.u.y.abs() == Fixed::ONE)
    }

    /// The four corners in world space, counter-clockwise from `+u +v`.
    #[must_use]
    pub fn corners(&self) -> [Vec2Fixed; 4] {
        let hu = self.u * self.half.x;
        let hv = self.v * self.half.y;
        [
            self.center + hu + hv,
            self.center - hu + hv,
            self.center - hu - hv,
            self.center + hu - hv,
        ]
    }

    /// Grow both half extents by `delta`.
    #[must_use]
    pub fn expanded(&self, delta: Fixed) -> Self {
        Self {
            half: Vec2Fixed::new(self.half.x + delta, self.half.y + delta),
            ..*self
        }
    }
}

/// Half-open run of grid cells `[i0, i1)` on row `j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First column.
    pub i0: i32,
    /// One past the last column.
    pub i1: i32,
    /// Row.
    pub j: i32,
}

/// Whether `point` (relative to centre) lies inside or on the square.
#[must_use]
pub fn point_is_in_square(point: Vec2Fixed, u: Vec2Fixed, v: Vec2Fixed, half: Vec2Fixed) -> bool {
    point.dot(u).abs() <= half.x && point.dot(v).abs() <= half.y
}

/// Half extents of the axis-aligned bounding box of an oriented square.
#[must_use]
pub fn half_bounding_box(u: Vec2Fixed, v: Vec2Fixed, half: Vec2Fixed) -> Vec2Fixed {
    Vec2Fixed::new(
        (u.x * half.x).abs() + (v.x * half.y).abs(),
        (u.y * half.x).abs() + (v.y * half.y).abs(),
    )
}

/// Distance from `point` (relative to centre) to the square's boundary.
///
/// Points inside return zero when `count_inside_as_zero`, otherwise the
/// distance to the nearest edge.
#[must_use]
pub fn distance_to_square(
    point: Vec2Fixed,
    u: Vec2Fixed,
    v: Vec2Fixed,
    half: Vec2Fixed,
    count_inside_as_zero: bool,
) -> Fixed {
    let du = point.dot(u).abs();
    let dv = point.dot(v).abs();
    let (hw, hh) = (half.x, half.y);

    if du < hw {
        if dv < hh {
            if count_inside_as_zero {
                Fixed::ZERO
            } else {
                (hw - du).min(hh - dv)
            }
        } else {
            dv - hh
        }
    } else if dv < hh {
        du - hw
    } else {
        Vec2Fixed::new(du - hw, dv - hh).length()
    }
}

/// Distance from `point` (relative to centre) to the square's farthest corner.
///
/// Points inside return zero when `count_inside_as_zero`.
#[must_use]
pub fn max_distance_to_square(
    point: Vec2Fixed,
    u: Vec2Fixed,
    v: Vec2Fixed,
    half: Vec2Fixed,
    count_inside_as_zero: bool,
) -> Fixed {
    let du = point.dot(u).abs();
    let dv = point.dot(v).abs();
    if count_inside_as_zero && du < half.x && dv < half.y {
        return Fixed::ZERO;
    }
    Vec2Fixed::new(du + half.x, dv + half.y).length()
}

/// Nearest point on the square's boundary to `point`, both relative to centre.
#[must_use]
pub fn nearest_point_on_square(
    point: Vec2Fixed,
    u: Vec2Fixed,
    v: Vec2Fixed,
    half: Vec2Fixed,
) -> Vec2Fixed {
    let du = point.dot(u);
    let dv = point.dot(v);
    let (hw, hh) = (half.x, half.y);
    let side = |d: Fixed, h: Fixed| if d > Fixed::ZERO { h } else { -h };

    if -hw < du && du < hw {
        if -hh < dv && dv < hh {
            // Inside: snap to whichever edge is closer.
            if hw - du.abs() < hh - dv.abs() {
                u * side(du, hw) + v * dv
            } else {
                u * du + v * side(dv, hh)
            }
        } else {
            u * du + v * side(dv, hh)
        }
    } else if -hh < dv && dv < hh {
        u * side(du, hw) + v * dv
    } else {
        u * side(du, hw) + v * side(dv, hh)
    }
}

/// Whether segment `a`-`b` (relative to centre) touches the oriented square.
#[must_use]
pub fn test_ray_square(
    a: Vec2Fixed,
    b: Vec2Fixed,
    u: Vec2Fixed,
    v: Vec2Fixed,
    half: Vec2Fixed,
) -> bool {
    let (hw, hh) = (half.x, half.y);

    let (au, av) = (a.dot(u), a.dot(v));
    if -hw <= au && au <= hw && -hh <= av && av <= hh {
        return true;
    }
    let (bu, bv) = (b.dot(u), b.dot(v));
    if -hw <= bu && bu <= hw && -hh <= bv && bv <= hh {
        return true;
    }

    let abp = (b - a).perpendicular();
    let s0 = abp.dot(u * hw + v * hh - a);
    let s1 = abp.dot(u * -hw + v * hh - a);
    let s2 = abp.dot(u * -hw + v * -hh - a);
    let s3 = abp.dot(u * hw + v * -hh - a);
    let signs = [s0, s1, s2, s3];
    if signs.iter().any(|s| *s == Fixed::ZERO) {
        return true;
    }
    if signs.iter().all(|s| *s > Fixed::ZERO) || signs.iter().all(|s| *s < Fixed::ZERO) {
        return false;
    }

    // The infinite line crosses the square; reject segments wholly on one side.
    !((au < -hw && bu < -hw)
        || (au > hw && bu > hw)
        || (av < -hh && bv < -hh)
        || (av > hh && bv > hh))
}

/// [`test_ray_square`] for an axis-aligned square.
#[must_use]
pub fn test_ray_aa_square(a: Vec2Fixed, b: Vec2Fixed, half: Vec2Fixed) -> bool {
    test_ray_square(
        a,
        b,
        Vec2Fixed::new(Fixed::ONE, Fixed::ZERO),
        Vec2Fixed::new(Fixed::ZERO, Fixed::ONE),
        half,
    )
}

fn projected_radius(sq: &Square, axis: Vec2Fixed) -> Fixed {
    sq.half.x * sq.u.dot(axis).abs() + sq.half.y * sq.v.dot(axis).abs()
}

/// Separating-axis overlap test between two oriented squares. Touching counts.
#[must_use]
pub fn test_square_square(a: &Square, b: &Square) -> bool {
    let offset = b.center - a.center;
    for axis in [a.u, a.v, b.u, b.v] {
        let dist = offset.dot(axis).abs();
        if dist > projected_radius(a, axis) + projected_radius(b, axis) {
            return false;
        }
    }
    true
}

/// Smallest distance between two oriented squares (zero when they overlap).
#[must_use]
pub fn distance_square_to_square(a: &Square, b: &Square) -> Fixed {
    if test_square_square(a, b) {
        return Fixed::ZERO;
    }

    let from_a = a
        .corners()
        .into_iter()
        .map(|c| distance_to_square(c - b.center, b.u, b.v, b.half, true));
    let from_b = b
        .corners()
        .into_iter()
        .map(|c| distance_to_square(c - a.center, a.u, a.v, a.half, true));

    from_a.chain(from_b).min().unwrap_or(Fixed::ZERO)
}

/// Largest distance between a point of `a` and a point of `b`.
#[must_use]
pub fn max_distance_square_to_square(a: &Square, b: &Square) -> Fixed {
    b.corners()
        .into_iter()
        .map(|c| max_distance_to_square(c - a.center, a.u, a.v, a.half, false))
        .max()
        .unwrap_or(Fixed::ZERO)
}

/// Grid cells (of side `cell_size`) lying entirely within `clearance` of the square.
#[must_use]
pub fn rasterize_rect_with_clearance(sq: &Square, clearance: Fixed, cell_size: Fixed) -> Vec<Span> {
    let expanded = Vec2Fixed::new(sq.half.x + clearance, sq.half.y + clearance);
    let bbox = half_bounding_box(sq.u, sq.v, expanded);

    let i0 = ((sq.center.x - bbox.x) / cell_size).floor().to_num::<i32>();
    let j0 = ((sq.center.y - bbox.y) / cell_size).floor().to_num::<i32>();
    let i1 = ((sq.center.x + bbox.x) / cell_size).ceil().to_num::<i32>();
    let j1 = ((sq.center.y + bbox.y) / cell_size).ceil().to_num::<i32>();

    let within = |i: i32, j: i32| {
        let corner = Vec2Fixed::new(Fixed::from_num(i) * cell_size, Fixed::from_num(j) * cell_size);
        distance_to_square(corner - sq.center, sq.u, sq.v, sq.half, true) <= clearance
    };

    let mut spans = Vec::new();
    for j in j0..j1 {
        let mut span_i0 = i32::MAX;
        let mut span_i1 = i32::MIN;
        for i in i0..i1 {
            if within(i, j) && within(i + 1, j) && within(i, j + 1) && within(i + 1, j + 1) {
                span_i0 = span_i0.min(i);
                span_i1 = span_i1.max(i + 1);
            }
        }
        if span_i0 < span_i1 {
            spans.push(Span {
                i0: span_i0,
                i1: span_i1,
                j,
            });
        }
    }
    spans
}
