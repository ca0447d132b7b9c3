//! Collision and range queries against the registry.

use super::{ObstructionFilter, ObstructionRegistry, Tag};
use crate::geometry::{
    distance_square_to_square, distance_to_square, half_bounding_box, max_distance_square_to_square,
    max_distance_to_square, point_is_in_square, rasterize_rect_with_clearance, test_ray_aa_square,
    test_ray_square, test_square_square, Span, Square,
};
use crate::grid::NAVCELL_SIZE;
use crate::math::{fixed_sqrt, Fixed, Vec2Fixed};
use crate::{EntityId, INVALID_ENTITY};

/// Max range meaning "any distance".
pub const ALWAYS_IN_RANGE: Fixed = Fixed::from_bits(-(1 << 32));
/// Max range meaning "never in range".
pub const NEVER_IN_RANGE: Fixed = Fixed::from_bits(-(2 << 32));

/// Slack applied to both ends of a range check.
const RANGE_TOLERANCE: Fixed = Fixed::from_bits(429_497);

/// Units are shrunk by this much when `relax_clearance_for_units` is set.
const UNIT_RELAX: Fixed = Fixed::from_bits(1 << 31);

/// Navcells a non-strict "on obstruction" test shaves off unit clearance.
const CLEARANCE_EXTENSION_RADIUS: Fixed = Fixed::ONE;

impl ObstructionRegistry {
    fn segment_bounds(a: Vec2Fixed, b: Vec2Fixed, r: Fixed) -> (Vec2Fixed, Vec2Fixed) {
        (
            Vec2Fixed::new(a.x.min(b.x) - r, a.y.min(b.y) - r),
            Vec2Fixed::new(a.x.max(b.x) + r, a.y.max(b.y) + r),
        )
    }

    fn unit_line_hit<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        a: Vec2Fixed,
        b: Vec2Fixed,
        r: Fixed,
        relax_clearance_for_units: bool,
    ) -> bool {
        let unit_r = if relax_clearance_for_units { r - UNIT_RELAX } else { r };
        let (min, max) = Self::segment_bounds(a, b, r);

        self.unit_subdivision
            .get_in_range(min, max)
            .into_iter()
            .filter_map(|id| self.unit_shapes.get(&id).map(|s| (id, s)))
            .filter(|(id, s)| filter.test_shape(Tag::unit(*id), s.flags, s.group, INVALID_ENTITY))
            .any(|(_, s)| {
                let half = s.clearance + unit_r;
                test_ray_aa_square(a - s.position, b - s.position, Vec2Fixed::new(half, half))
            })
    }

    /// Whether a circle of radius `r` moving from `a` to `b` hits any shape accepted by `filter`.
    ///
    /// Segments with an endpoint closer than `r` to the world edge always collide.
    pub fn test_line<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        a: Vec2Fixed,
        b: Vec2Fixed,
        r: Fixed,
        relax_clearance_for_units: bool,
    ) -> bool {
        if !self.is_in_world(a, r) || !self.is_in_world(b, r) {
            return true;
        }
        if self.unit_line_hit(filter, a, b, r, relax_clearance_for_units) {
            return true;
        }

        let (min, max) = Self::segment_bounds(a, b, r);
        self.static_subdivision
            .get_in_range(min, max)
            .into_iter()
            .filter_map(|id| self.static_shapes.get(&id).map(|s| (id, s)))
            .filter(|(id, s)| filter.test_shape(Tag::static_shape(*id), s.flags, s.group, s.group2))
            .any(|(_, s)| {
                let sq = &s.square;
                let half = Vec2Fixed::new(sq.half.x + r, sq.half.y + r);
                test_ray_square(a - sq.center, b - sq.center, sq.u, sq.v, half)
            })
    }

    /// [`Self::test_line`] restricted to unit shapes.
    pub fn test_unit_line<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        a: Vec2Fixed,
        b: Vec2Fixed,
        r: Fixed,
        relax_clearance_for_units: bool,
    ) -> bool {
        if !self.is_in_world(a, r) || !self.is_in_world(b, r) {
            return true;
        }
        self.unit_line_hit(filter, a, b, r, relax_clearance_for_units)
    }

    /// Entities whose shapes overlap a would-be static shape of full size `width` x `depth`.
    ///
    /// A footprint reaching outside the world reports [`INVALID_ENTITY`] first.
    pub fn test_static_shape<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        center: Vec2Fixed,
        angle: Fixed,
        width: Fixed,
        depth: Fixed,
    ) -> Vec<EntityId> {
        let square = self.get_static_shape_obstruction(center, angle, width, depth);
        let mut out = Vec::new();

        let world = |p: Vec2Fixed| {
            Fixed::ZERO <= p.x && p.x <= self.world_x1 && Fixed::ZERO <= p.y && p.y <= self.world_z1
        };
        if !square.corners().into_iter().all(world) {
            out.push(INVALID_ENTITY);
        }

        let hbox = half_bounding_box(square.u, square.v, square.half);
        let (min, max) = (center - hbox, center + hbox);

        for id in self.unit_subdivision.get_in_range(min, max) {
            let Some(s) = self.unit_shapes.get(&id) else {
                continue;
            };
            if !filter.test_shape(Tag::unit(id), s.flags, s.group, INVALID_ENTITY) {
                continue;
            }
            let half = Vec2Fixed::new(square.half.x + s.clearance, square.half.y + s.clearance);
            if point_is_in_square(s.position - center, square.u, square.v, half) {
                out.push(s.entity);
            }
        }

        for id in self.static_subdivision.get_in_range(min, max) {
            let Some(s) = self.static_shapes.get(&id) else {
                continue;
            };
            if !filter.test_shape(Tag::static_shape(id), s.flags, s.group, s.group2) {
                continue;
            }
            if test_square_square(&square, &s.square) {
                out.push(s.entity);
            }
        }
        out
    }

    /// Entities whose shapes overlap a would-be unit of `clearance` at `center`.
    ///
    /// A footprint reaching outside the world reports [`INVALID_ENTITY`] first.
    pub fn test_unit_shape<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        center: Vec2Fixed,
        clearance: Fixed,
    ) -> Vec<EntityId> {
        let mut out = Vec::new();
        if !self.is_in_world(center, clearance) {
            out.push(INVALID_ENTITY);
        }

        let half = Vec2Fixed::new(clearance, clearance);
        let (min, max) = (center - half, center + half);

        for id in self.unit_subdivision.get_in_range(min, max) {
            let Some(s) = self.unit_shapes.get(&id) else {
                continue;
            };
            if !filter.test_shape(Tag::unit(id), s.flags, s.group, INVALID_ENTITY) {
                continue;
            }
            let c = s.clearance;
            let separated = s.position.x + c < min.x
                || s.position.x - c > max.x
                || s.position.y + c < min.y
                || s.position.y - c > max.y;
            if !separated {
                out.push(s.entity);
            }
        }

        for id in self.static_subdivision.get_in_range(min, max) {
            let Some(s) = self.static_shapes.get(&id) else {
                continue;
            };
            if !filter.test_shape(Tag::static_shape(id), s.flags, s.group, s.group2) {
                continue;
            }
            let sq = &s.square;
            let grown = Vec2Fixed::new(sq.half.x + clearance, sq.half.y + clearance);
            if point_is_in_square(sq.center - center, sq.u, sq.v, grown) {
                out.push(s.entity);
            }
        }
        out
    }

    /// Footprints of unit shapes overlapping the box `[min, max]`.
    pub fn get_unit_obstructions_in_range<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        min: Vec2Fixed,
        max: Vec2Fixed,
    ) -> Vec<Square> {
        debug_assert!(min.x <= max.x && min.y <= max.y);
        self.unit_subdivision
            .get_in_range(min, max)
            .into_iter()
            .filter_map(|id| self.unit_shapes.get(&id).map(|s| (id, s)))
            .filter(|(id, s)| filter.test_shape(Tag::unit(*id), s.flags, s.group, INVALID_ENTITY))
            .filter(|(_, s)| {
                let c = s.clearance;
                !(s.position.x + c < min.x
                    || s.position.x - c > max.x
                    || s.position.y + c < min.y
                    || s.position.y - c > max.y)
            })
            .map(|(_, s)| s.square())
            .collect()
    }

    /// Footprints of static shapes whose conservative bounds overlap the box `[min, max]`.
    pub fn get_static_obstructions_in_range<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        min: Vec2Fixed,
        max: Vec2Fixed,
    ) -> Vec<Square> {
        debug_assert!(min.x <= max.x && min.y <= max.y);
        self.static_subdivision
            .get_in_range(min, max)
            .into_iter()
            .filter_map(|id| self.static_shapes.get(&id).map(|s| (id, s)))
            .filter(|(id, s)| filter.test_shape(Tag::static_shape(*id), s.flags, s.group, s.group2))
            .filter(|(_, s)| {
                let c = s.square.center;
                let r = s.square.half.x + s.square.half.y;
                !(c.x + r < min.x || c.x - r > max.x || c.y + r < min.y || c.y - r > max.y)
            })
            .map(|(_, s)| s.square)
            .collect()
    }

    /// Unit then static footprints overlapping the box `[min, max]`.
    pub fn get_obstructions_in_range<F: ObstructionFilter + ?Sized>(
        &self,
        filter: &F,
        min: Vec2Fixed,
        max: Vec2Fixed,
    ) -> Vec<Square> {
        let mut squares = self.get_unit_obstructions_in_range(filter, min, max);
        squares.extend(self.get_static_obstructions_in_range(filter, min, max));
        squares
    }

    /// Units standing on a navcell the square would block for their clearance.
    ///
    /// Non-strict mode shrinks the clearance by one navcell so builders next to a
    /// foundation are not reported.
    pub fn get_units_on_obstruction<F: ObstructionFilter + ?Sized>(
        &self,
        square: &Square,
        filter: &F,
        strict: bool,
    ) -> Vec<EntityId> {
        let hbox = half_bounding_box(square.u, square.v, square.half);
        let expanded = Vec2Fixed::new(hbox.x + self.max_clearance, hbox.y + self.max_clearance);
        let candidates = self
            .unit_subdivision
            .get_in_range(square.center - expanded, square.center + expanded);

        let mut rasterized: Vec<(Fixed, Vec<Span>)> = Vec::new();
        let mut out = Vec::new();

        for id in candidates {
            let Some(s) = self.unit_shapes.get(&id) else {
                continue;
            };
            if !filter.test_shape(Tag::unit(id), s.flags, s.group, INVALID_ENTITY) {
                continue;
            }

            let spans_idx = match rasterized.iter().position(|(c, _)| *c == s.clearance) {
                Some(idx) => idx,
                None => {
                    let clearance = if strict {
                        s.clearance
                    } else {
                        s.clearance - CLEARANCE_EXTENSION_RADIUS
                    };
                    rasterized.push((
                        s.clearance,
                        rasterize_rect_with_clearance(square, clearance, NAVCELL_SIZE),
                    ));
                    rasterized.len() - 1
                }
            };

            let i = (s.position.x / NAVCELL_SIZE).floor().to_num::<i32>();
            let j = (s.position.y / NAVCELL_SIZE).floor().to_num::<i32>();
            if rasterized[spans_idx]
                .1
                .iter()
                .any(|span| span.j == j && span.i0 <= i && i < span.i1)
            {
                out.push(s.entity);
            }
        }
        out
    }

    /// Static shapes overlapping the square.
    pub fn get_static_obstructions_on_obstruction<F: ObstructionFilter + ?Sized>(
        &self,
        square: &Square,
        filter: &F,
    ) -> Vec<EntityId> {
        let hbox = half_bounding_box(square.u, square.v, square.half);
        self.static_subdivision
            .get_in_range(square.center - hbox, square.center + hbox)
            .into_iter()
            .filter_map(|id| self.static_shapes.get(&id).map(|s| (id, s)))
            .filter(|(id, s)| filter.test_shape(Tag::static_shape(*id), s.flags, s.group, s.group2))
            .filter(|(_, s)| test_square_square(square, &s.square))
            .map(|(_, s)| s.entity)
            .collect()
    }
}

/// A zero-size footprint at `position`, for range checks against bare points.
#[must_use]
pub fn point_square(position: Vec2Fixed) -> Square {
    Square::axis_aligned(position, Fixed::ZERO, Fixed::ZERO)
}

/// Edge-to-edge distance between two footprints.
///
/// Footprints with zero `half.y` are treated as circles of radius `half.x`.
#[must_use]
pub fn distance_between_shapes(source: &Square, target: &Square) -> Fixed {
    let source_round = source.half.y == Fixed::ZERO;
    let target_round = target.half.y == Fixed::ZERO;

    if source_round && target_round {
        return (target.center - source.center).length() - source.half.x - target.half.x;
    }
    if !source_round && !target_round {
        return distance_square_to_square(source, target);
    }
    let (sq, circle) = if source_round {
        (target, source)
    } else {
        (source, target)
    };
    distance_to_square(circle.center - sq.center, sq.u, sq.v, sq.half, true) - circle.half.x
}

/// Distance between the farthest points of two footprints.
#[must_use]
pub fn max_distance_between_shapes(source: &Square, target: &Square) -> Fixed {
    let source_round = source.half.y == Fixed::ZERO;
    let target_round = target.half.y == Fixed::ZERO;

    if source_round && target_round {
        return (target.center - source.center).length() + source.half.x + target.half.x;
    }
    if !source_round && !target_round {
        return max_distance_square_to_square(source, target);
    }
    let (sq, circle) = if source_round {
        (target, source)
    } else {
        (source, target)
    };
    max_distance_to_square(circle.center - sq.center, sq.u, sq.v, sq.half, true) + circle.half.x
}

/// Edge-to-edge distance from a footprint to a bare point.
#[must_use]
pub fn distance_to_point(source: &Square, point: Vec2Fixed) -> Fixed {
    distance_between_shapes(source, &point_square(point))
}

/// Edge-to-edge distance from a footprint to a target's footprint.
#[must_use]
pub fn distance_to_target(source: &Square, target: &Square) -> Fixed {
    distance_between_shapes(source, target)
}

fn in_range(dist: Fixed, far: Fixed, min_range: Fixed, max_range: Fixed) -> bool {
    max_range != NEVER_IN_RANGE
        && (dist <= max_range + RANGE_TOLERANCE || max_range == ALWAYS_IN_RANGE)
        && far >= min_range - RANGE_TOLERANCE
}

/// Whether the footprints are within `[min_range, max_range]` of each other.
///
/// With `opposite`, the minimum is measured to the far side of the target.
#[must_use]
pub fn are_shapes_in_range(
    source: &Square,
    target: &Square,
    min_range: Fixed,
    max_range: Fixed,
    opposite: bool,
) -> bool {
    let dist = distance_between_shapes(source, target);
    let far = if opposite {
        max_distance_between_shapes(source, target)
    } else {
        dist
    };
    in_range(dist, far, min_range, max_range)
}

/// Whether the footprint is within range of a point.
#[must_use]
pub fn is_in_point_range(
    source: &Square,
    point: Vec2Fixed,
    min_range: Fixed,
    max_range: Fixed,
    opposite: bool,
) -> bool {
    are_shapes_in_range(source, &point_square(point), min_range, max_range, opposite)
}

/// Whether two footprints are within range of each other.
#[must_use]
pub fn is_in_target_range(
    source: &Square,
    target: &Square,
    min_range: Fixed,
    max_range: Fixed,
    opposite: bool,
) -> bool {
    are_shapes_in_range(source, target, min_range, max_range, opposite)
}

/// Whether two bare points are within range of each other.
#[must_use]
pub fn is_point_in_point_range(
    a: Vec2Fixed,
    b: Vec2Fixed,
    min_range: Fixed,
    max_range: Fixed,
) -> bool {
    let dist = (a - b).length();
    in_range(dist, dist, min_range, max_range)
}

/// Horizontal reach of a ballistic attack of range `max_range` fired from
/// `elevation` above the target.
///
/// Returns [`NEVER_IN_RANGE`] when the target is too far above the source.
#[must_use]
pub fn effective_parabolic_range(max_range: Fixed, elevation: Fixed) -> Fixed {
    if max_range == ALWAYS_IN_RANGE || max_range == NEVER_IN_RANGE {
        return max_range;
    }
    let two = Fixed::from_num(2);
    if elevation < -max_range / two {
        return NEVER_IN_RANGE;
    }
    let squared = max_range
        .saturating_mul(max_range)
        .saturating_add(two.saturating_mul(max_range).saturating_mul(elevation));
    fixed_sqrt(squared)
}

/// [`is_in_target_range`] with the max range extended by elevation.
#[must_use]
pub fn is_in_target_parabolic_range(
    source: &Square,
    target: &Square,
    min_range: Fixed,
    max_range: Fixed,
    elevation: Fixed,
    opposite: bool,
) -> bool {
    let effective = effective_parabolic_range(max_range, elevation);
    is_in_target_range(source, target, min_range, effective, opposite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstruction::{
        ControlGroupMovementFilter, NullFilter, ObstructionFlags, StationaryOnlyFilter,
    };
    use crate::math::FRAC_PI_2;

    fn fx(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    fn v2(x: i32, y: i32) -> Vec2Fixed {
        Vec2Fixed::from_ints(x, y)
    }

    fn blocking() -> ObstructionFlags {
        ObstructionFlags::BLOCK_MOVEMENT | ObstructionFlags::BLOCK_PATHFINDING
    }

    fn world() -> ObstructionRegistry {
        let mut reg = ObstructionRegistry::new();
        reg.set_bounds(fx(128), fx(128), fx(2));
        reg
    }

    #[test]
    fn test_line_hits_static_shape() {
        let mut reg = world();
        reg.add_static_shape(1, v2(50, 50), Fixed::ZERO, fx(10), fx(10), blocking(), 1, 0);

        assert!(reg.test_line(&NullFilter, v2(30, 50), v2(70, 50), Fixed::ONE, false));
        assert!(!reg.test_line(&NullFilter, v2(30, 60), v2(70, 60), Fixed::ONE, false));
        // Clearance brings the parallel line into contact; touching does not count.
        let y = Fixed::from_num(111) / 2;
        assert!(reg.test_line(&NullFilter, Vec2Fixed::new(fx(30), y), Vec2Fixed::new(fx(70), y), Fixed::ONE, false));
        assert!(!reg.test_line(&NullFilter, v2(30, 56), v2(70, 56), Fixed::ONE, false));
    }

    #[test]
    fn test_line_outside_world_always_collides() {
        let reg = world();
        assert!(reg.test_line(&NullFilter, v2(0, 10), v2(20, 10), Fixed::ONE, false));
        assert!(!reg.test_line(&NullFilter, v2(2, 10), v2(20, 10), Fixed::ONE, false));
    }

    #[test]
    fn test_line_respects_filter() {
        let mut reg = world();
        let tag = reg.add_unit_shape(5, v2(50, 50), Fixed::ONE, blocking(), 5);
        reg.set_unit_moving_flag(tag, true);

        assert!(reg.test_line(&NullFilter, v2(40, 50), v2(60, 50), Fixed::ONE, false));
        assert!(!reg.test_line(&StationaryOnlyFilter, v2(40, 50), v2(60, 50), Fixed::ONE, false));
        assert!(!reg.test_line(
            &ControlGroupMovementFilter::new(true, 5),
            v2(40, 50),
            v2(60, 50),
            Fixed::ONE,
            false
        ));
    }

    #[test]
    fn test_unit_line_ignores_statics() {
        let mut reg = world();
        reg.add_static_shape(1, v2(50, 50), Fixed::ZERO, fx(10), fx(10), blocking(), 1, 0);
        assert!(!reg.test_unit_line(&NullFilter, v2(30, 50), v2(70, 50), Fixed::ONE, false));
    }

    #[test]
    fn test_static_shape_reports_overlaps() {
        let mut reg = world();
        reg.add_static_shape(1, v2(50, 50), Fixed::ZERO, fx(10), fx(10), blocking(), 1, 0);
        reg.add_unit_shape(2, v2(60, 60), Fixed::ONE, blocking(), 2);

        let hits = reg.test_static_shape(&NullFilter, v2(58, 58), Fixed::ZERO, fx(6), fx(6));
        assert_eq!(hits, vec![2, 1]);

        let clear = reg.test_static_shape(&NullFilter, v2(90, 90), FRAC_PI_2, fx(4), fx(4));
        assert!(clear.is_empty());

        let edge = reg.test_static_shape(&NullFilter, v2(1, 90), Fixed::ZERO, fx(4), fx(4));
        assert_eq!(edge, vec![INVALID_ENTITY]);
    }

    #[test]
    fn test_unit_shape_touching_counts() {
        let mut reg = world();
        reg.add_unit_shape(3, v2(20, 20), Fixed::ONE, blocking(), 3);
        assert_eq!(reg.test_unit_shape(&NullFilter, v2(22, 20), Fixed::ONE), vec![3]);
        assert!(reg.test_unit_shape(&NullFilter, v2(23, 20), Fixed::ONE).is_empty());
    }

    #[test]
    fn test_obstructions_in_range() {
        let mut reg = world();
        reg.add_static_shape(1, v2(50, 50), Fixed::ZERO, fx(4), fx(4), blocking(), 1, 0);
        reg.add_unit_shape(2, v2(10, 10), Fixed::ONE, blocking(), 2);

        let near = reg.get_obstructions_in_range(&NullFilter, v2(40, 40), v2(60, 60));
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].center, v2(50, 50));

        let all = reg.get_obstructions_in_range(&NullFilter, v2(0, 0), v2(127, 127));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].center, v2(10, 10));
    }

    #[test]
    fn test_units_on_obstruction() {
        let mut reg = world();
        reg.add_unit_shape(7, Vec2Fixed::new(Fixed::from_num(50.5), Fixed::from_num(50.5)), Fixed::ONE, blocking(), 7);
        reg.add_unit_shape(8, Vec2Fixed::new(Fixed::from_num(80.5), Fixed::from_num(80.5)), Fixed::ONE, blocking(), 8);

        let foundation = Square::axis_aligned(v2(50, 50), fx(4), fx(4));
        assert_eq!(reg.get_units_on_obstruction(&foundation, &NullFilter, true), vec![7]);
        assert_eq!(reg.get_units_on_obstruction(&foundation, &NullFilter, false), vec![7]);
    }

    #[test]
    fn test_static_obstructions_on_obstruction() {
        let mut reg = world();
        reg.add_static_shape(4, v2(50, 50), Fixed::ZERO, fx(4), fx(4), blocking(), 4, 0);
        let footprint = Square::axis_aligned(v2(53, 50), fx(2), fx(2));
        assert_eq!(reg.get_static_obstructions_on_obstruction(&footprint, &NullFilter), vec![4]);
        let far = Square::axis_aligned(v2(70, 50), fx(2), fx(2));
        assert!(reg.get_static_obstructions_on_obstruction(&far, &NullFilter).is_empty());
    }

    #[test]
    fn test_distance_between_shapes() {
        let circle_a = Square::axis_aligned(v2(0, 0), fx(1), Fixed::ZERO);
        let circle_b = Square::axis_aligned(v2(10, 0), fx(2), Fixed::ZERO);
        assert_eq!(distance_between_shapes(&circle_a, &circle_b), fx(7));
        assert_eq!(max_distance_between_shapes(&circle_a, &circle_b), fx(13));

        let square = Square::axis_aligned(v2(10, 0), fx(2), fx(2));
        assert_eq!(distance_between_shapes(&circle_a, &square), fx(7));
        assert_eq!(distance_between_shapes(&square, &circle_a), fx(7));
        assert_eq!(distance_to_target(&square, &circle_b), distance_between_shapes(&square, &circle_b));
        assert_eq!(distance_to_point(&square, v2(15, 0)), fx(3));
    }

    #[test]
    fn test_range_sentinels() {
        let a = v2(0, 0);
        let b = v2(100, 0);
        assert!(is_point_in_point_range(a, b, Fixed::ZERO, ALWAYS_IN_RANGE));
        assert!(!is_point_in_point_range(a, b, Fixed::ZERO, NEVER_IN_RANGE));
        assert!(is_point_in_point_range(a, b, Fixed::ZERO, fx(100)));
        assert!(!is_point_in_point_range(a, b, Fixed::ZERO, fx(99)));
        assert!(!is_point_in_point_range(a, b, fx(101), ALWAYS_IN_RANGE));
    }

    #[test]
    fn test_opposite_uses_far_side() {
        let unit = Square::axis_aligned(v2(0, 0), fx(1), fx(1));
        let building = Square::axis_aligned(v2(10, 0), fx(4), fx(4));
        // Near edge is 5 away; far side is well beyond 10.
        assert!(!is_in_target_range(&unit, &building, fx(10), fx(20), false));
        assert!(is_in_target_range(&unit, &building, fx(10), fx(20), true));
        assert!(is_in_point_range(&unit, v2(5, 0), Fixed::ZERO, fx(4), false));
    }

    #[test]
    fn test_parabolic_range_grows_with_elevation() {
        assert_eq!(effective_parabolic_range(fx(10), Fixed::ZERO), fx(10));
        assert!(effective_parabolic_range(fx(10), fx(5)) > fx(10));
        assert_eq!(effective_parabolic_range(fx(10), fx(-6)), NEVER_IN_RANGE);
        assert_eq!(effective_parabolic_range(ALWAYS_IN_RANGE, fx(5)), ALWAYS_IN_RANGE);

        let unit = point_square(v2(0, 0));
        let target = point_square(v2(12, 0));
        assert!(!is_in_target_parabolic_range(&unit, &target, Fixed::ZERO, fx(10), Fixed::ZERO, false));
        assert!(is_in_target_parabolic_range(&unit, &target, Fixed::ZERO, fx(10), fx(5), false));
    }
}
