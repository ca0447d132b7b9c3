//! Path goals and waypoint paths.
//!
//! A goal is a region rather than a point: any position inside it counts as
//! arrival. The inverted kinds describe "anywhere outside this shape" and are
//! how minimum attack ranges are expressed.
//!
//! Paths are stored back to front: the last waypoint is the next one to walk
//! towards, so consuming a waypoint is a `pop`.

use serde::{Deserialize, Serialize};

use crate::geometry::{
    distance_to_square, nearest_point_on_square, point_is_in_square, test_square_square, Square,
};
use crate::grid::{navcell_center, NAVCELL_SIZE};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// Shape of a [`PathGoal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalKind {
    /// A single point; only its navcell counts as reached.
    Point,
    /// Inside a circle of radius `hw`.
    Circle,
    /// Outside a circle of radius `hw`.
    InvertedCircle,
    /// Inside an oriented rectangle.
    Square,
    /// Outside an oriented rectangle.
    InvertedSquare,
}

/// Destination region for a path request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathGoal {
    /// Goal shape.
    pub kind: GoalKind,
    /// Centre of the shape.
    pub center: Vec2Fixed,
    /// Radius, or half width along `u`.
    #[serde(with = "fixed_serde")]
    pub hw: Fixed,
    /// Half height along `v` (squares only).
    #[serde(with = "fixed_serde")]
    pub hh: Fixed,
    /// First square axis.
    pub u: Vec2Fixed,
    /// Second square axis.
    pub v: Vec2Fixed,
    /// Maximum spacing between consecutive long-path waypoints; zero means unbounded.
    #[serde(with = "fixed_serde")]
    pub maxdist: Fixed,
}

impl PathGoal {
    /// Goal at a single point.
    #[must_use]
    pub fn point(center: Vec2Fixed) -> Self {
        Self {
            kind: GoalKind::Point,
            center,
            hw: Fixed::ZERO,
            hh: Fixed::ZERO,
            u: Vec2Fixed::new(Fixed::ONE, Fixed::ZERO),
            v: Vec2Fixed::new(Fixed::ZERO, Fixed::ONE),
            maxdist: Fixed::ZERO,
        }
    }

    /// Goal anywhere inside a circle.
    #[must_use]
    pub fn circle(center: Vec2Fixed, radius: Fixed) -> Self {
        Self {
            kind: GoalKind::Circle,
            hw: radius,
            ..Self::point(center)
        }
    }

    /// Goal anywhere inside an oriented square.
    #[must_use]
    pub fn square(sq: &Square) -> Self {
        Self {
            kind: GoalKind::Square,
            center: sq.center,
            hw: sq.half.x,
            hh: sq.half.y,
            u: sq.u,
            v: sq.v,
            maxdist: Fixed::ZERO,
        }
    }

    fn half(&self) -> Vec2Fixed {
        Vec2Fixed::new(self.hw, self.hh)
    }

    /// The goal's rectangle, for square kinds.
    #[must_use]
    pub fn as_square(&self) -> Square {
        Square {
            center: self.center,
            u: self.u,
            v: self.v,
            half: self.half(),
        }
    }

    /// Whether the point lies inside the goal region.
    #[must_use]
    pub fn contains_point(&self, pos: Vec2Fixed) -> bool {
        let d = pos - self.center;
        match self.kind {
            GoalKind::Point => d.is_zero(),
            GoalKind::Circle => d.compare_length(self.hw).is_le(),
            GoalKind::InvertedCircle => d.compare_length(self.hw).is_ge(),
            GoalKind::Square => point_is_in_square(d, self.u, self.v, self.half()),
            GoalKind::InvertedSquare => !point_is_in_square(d, self.u, self.v, self.half()),
        }
    }

    /// Whether the centre of navcell `(i, j)` satisfies the goal.
    ///
    /// A point goal is only satisfied by the navcell it lies in.
    #[must_use]
    pub fn navcell_contains_goal(&self, i: u16, j: u16) -> bool {
        if self.kind == GoalKind::Point {
            let gi = (self.center.x / NAVCELL_SIZE).floor().to_num::<i32>();
            let gj = (self.center.y / NAVCELL_SIZE).floor().to_num::<i32>();
            return gi == i32::from(i) && gj == i32::from(j);
        }
        self.contains_point(navcell_center(i, j))
    }

    /// First navcell in the inclusive rectangle `(i0, j0)..=(i1, j1)` that
    /// contains the goal, scanning from `(i0, j0)` towards `(i1, j1)`.
    #[must_use]
    pub fn navcell_rect_contains_goal(
        &self,
        i0: u16,
        j0: u16,
        i1: u16,
        j1: u16,
    ) -> Option<(u16, u16)> {
        let step = |a: u16, b: u16| -> Vec<u16> {
            if a <= b {
                (a..=b).collect()
            } else {
                (b..=a).rev().collect()
            }
        };
        let cols = step(i0, i1);
        for j in step(j0, j1) {
            for &i in &cols {
                if self.navcell_contains_goal(i, j) {
                    return Some((i, j));
                }
            }
        }
        None
    }

    /// Whether any point of the axis-aligned rectangle satisfies the goal.
    #[must_use]
    pub fn rect_contains_goal(&self, min: Vec2Fixed, max: Vec2Fixed) -> bool {
        let corners = [
            min,
            Vec2Fixed::new(max.x, min.y),
            max,
            Vec2Fixed::new(min.x, max.y),
        ];
        match self.kind {
            GoalKind::Point => {
                min.x <= self.center.x
                    && self.center.x <= max.x
                    && min.y <= self.center.y
                    && self.center.y <= max.y
            }
            GoalKind::Circle => {
                let nearest = Vec2Fixed::new(
                    self.center.x.clamp(min.x, max.x),
                    self.center.y.clamp(min.y, max.y),
                );
                (nearest - self.center).compare_length(self.hw).is_le()
            }
            GoalKind::InvertedCircle => corners
                .iter()
                .any(|&c| (c - self.center).compare_length(self.hw).is_ge()),
            GoalKind::Square => {
                let half = (max - min) / Fixed::from_num(2);
                let rect = Square::axis_aligned(min + half, half.x, half.y);
                test_square_square(&rect, &self.as_square())
            }
            GoalKind::InvertedSquare => corners
                .iter()
                .any(|&c| !point_is_in_square(c - self.center, self.u, self.v, self.half())),
        }
    }

    /// Distance from the point to the goal's boundary.
    #[must_use]
    pub fn distance_to_point(&self, pos: Vec2Fixed) -> Fixed {
        let d = pos - self.center;
        match self.kind {
            GoalKind::Point => d.length(),
            GoalKind::Circle | GoalKind::InvertedCircle => (d.length() - self.hw).abs(),
            GoalKind::Square | GoalKind::InvertedSquare => {
                distance_to_square(d, self.u, self.v, self.half(), false)
            }
        }
    }

    /// Closest point to `pos` that satisfies the goal. Points already inside are returned unchanged.
    #[must_use]
    pub fn nearest_point_on_goal(&self, pos: Vec2Fixed) -> Vec2Fixed {
        let d = pos - self.center;
        match self.kind {
            GoalKind::Point => self.center,
            GoalKind::Circle => {
                if d.compare_length(self.hw).is_le() {
                    pos
                } else {
                    self.center + d.normalize_to(self.hw)
                }
            }
            GoalKind::InvertedCircle => {
                if d.compare_length(self.hw).is_ge() {
                    return pos;
                }
                let dir = if d.is_zero() {
                    Vec2Fixed::new(Fixed::ONE, Fixed::ZERO)
                } else {
                    d
                };
                self.center + dir.normalize_to(self.hw)
            }
            GoalKind::Square => {
                if point_is_in_square(d, self.u, self.v, self.half()) {
                    pos
                } else {
                    self.center + nearest_point_on_square(d, self.u, self.v, self.half())
                }
            }
            GoalKind::InvertedSquare => {
                if point_is_in_square(d, self.u, self.v, self.half()) {
                    self.center + nearest_point_on_square(d, self.u, self.v, self.half())
                } else {
                    pos
                }
            }
        }
    }
}

/// Ordered waypoints, consumed from the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaypointPath {
    /// Waypoints; the last element is the next target.
    pub waypoints: Vec<Vec2Fixed>,
}

impl WaypointPath {
    /// A path from waypoints already in back-to-front order.
    #[must_use]
    pub fn new(waypoints: Vec<Vec2Fixed>) -> Self {
        Self { waypoints }
    }

    /// A path from waypoints in walking order.
    #[must_use]
    pub fn from_walk_order(mut waypoints: Vec<Vec2Fixed>) -> Self {
        waypoints.reverse();
        Self { waypoints }
    }

    /// No waypoints left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Number of waypoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// The waypoint to walk towards next.
    #[must_use]
    pub fn next(&self) -> Option<Vec2Fixed> {
        self.waypoints.last().copied()
    }

    /// The waypoint after [`Self::next`].
    #[must_use]
    pub fn after_next(&self) -> Option<Vec2Fixed> {
        let n = self.waypoints.len();
        (n >= 2).then(|| self.waypoints[n - 2])
    }

    /// The final destination.
    #[must_use]
    pub fn destination(&self) -> Option<Vec2Fixed> {
        self.waypoints.first().copied()
    }

    /// Drop the next waypoint.
    pub fn pop(&mut self) -> Option<Vec2Fixed> {
        self.waypoints.pop()
    }

    /// Make `point` the next waypoint.
    pub fn push(&mut self, point: Vec2Fixed) {
        self.waypoints.push(point);
    }

    /// Remove every waypoint.
    pub fn clear(&mut self) {
        self.waypoints.clear();
    }

    /// Waypoints in walking order.
    pub fn walk_order(&self) -> impl Iterator<Item = Vec2Fixed> + '_ {
        self.waypoints.iter().rev().copied()
    }
}
