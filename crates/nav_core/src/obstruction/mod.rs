//! Obstruction registry.
//!
//! Owns every obstruction shape in the world and answers the geometric
//! questions pathfinding and motion ask about them. Three kinds of shape
//! exist:
//!
//! - **unit** shapes: axis-aligned squares of half size `clearance`, one per
//!   mobile entity. Units may carry [`ObstructionFlags::MOVING`].
//! - **static** shapes: oriented rectangles (buildings, trees, walls).
//! - **cluster** shapes: a static bounding shape that blocks nothing on its
//!   own plus static sub-shapes placed relative to it.
//!
//! Shapes are addressed by [`Tag`]s that are never reused. Using a tag after
//! [`ObstructionRegistry::remove_shape`] is a programming error and panics.
//!
//! Every mutation records which parts of the rasterized grid it invalidated,
//! so [`ObstructionRegistry::rasterize`] can redraw only those parts.

mod filter;
mod query;
mod rasterize;
mod subdivision;

use std::collections::BTreeMap;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

use crate::geometry::{half_bounding_box, Square};
use crate::grid::{nearest_navcell, Grid, GridUpdateInformation, NAVCELL_SIZE};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::{EntityId, INVALID_ENTITY};

pub use filter::{
    ControlGroupMovementFilter, NullFilter, ObstructionFilter, SkipControlGroupsRequireFlagFilter,
    SkipTagAndControlGroupFilter, SkipTagFilter, SkipTagRequireControlGroupsAndFlagFilter,
    SkipTagRequireFlagsFilter, StaticShapesFilter, StationaryOnlyFilter,
};
pub use query::{
    are_shapes_in_range, distance_between_shapes, distance_to_point, distance_to_target,
    effective_parabolic_range, is_in_point_range, is_in_target_parabolic_range, is_in_target_range,
    is_point_in_point_range, max_distance_between_shapes, point_square, ALWAYS_IN_RANGE,
    NEVER_IN_RANGE,
};
pub use subdivision::{SpatialSubdivision, SUBDIVISION_SIZE};

/// Handle to a registered shape.
///
/// The low bit distinguishes static (1) from unit (0) shapes; the remaining
/// bits hold the registry index. Index 0 is never allocated, so the zero tag
/// is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tag(u32);

impl Tag {
    /// The tag that refers to nothing.
    pub const INVALID: Tag = Tag(0);

    /// Tag of the unit shape with registry index `index`.
    #[must_use]
    pub const fn unit(index: u32) -> Self {
        Tag(index << 1)
    }

    /// Tag of the static shape with registry index `index`.
    #[must_use]
    pub const fn static_shape(index: u32) -> Self {
        Tag((index << 1) | 1)
    }

    /// Whether the tag could refer to a shape.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Whether the tag refers to a unit shape.
    #[must_use]
    pub fn is_unit(self) -> bool {
        self.is_valid() && self.0 & 1 == 0
    }

    /// Whether the tag refers to a static shape.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.0 & 1 == 1
    }

    /// Registry index encoded in the tag.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0 >> 1
    }
}

/// Bitset describing what a shape blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObstructionFlags(u8);

impl ObstructionFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Blocks unit movement.
    pub const BLOCK_MOVEMENT: Self = Self(1);
    /// Blocks placement of building foundations.
    pub const BLOCK_FOUNDATION: Self = Self(2);
    /// Blocks construction of a placed foundation.
    pub const BLOCK_CONSTRUCTION: Self = Self(4);
    /// Rasterized into the pathfinding grid.
    pub const BLOCK_PATHFINDING: Self = Self(8);
    /// The owning unit is currently moving.
    pub const MOVING: Self = Self(16);
    /// The owning entity is removed when a building is constructed on top of it.
    pub const DELETE_UPON_CONSTRUCTION: Self = Self(32);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Whether every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set or clear the flags of `other`.
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for ObstructionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObstructionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ObstructionFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl Not for ObstructionFlags {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

/// A mobile entity's footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitShape {
    /// Owning entity.
    pub entity: EntityId,
    /// Centre.
    pub position: Vec2Fixed,
    /// Half size of the square footprint.
    #[serde(with = "fixed_serde")]
    pub clearance: Fixed,
    /// Blocking flags.
    pub flags: ObstructionFlags,
    /// Control group.
    pub group: EntityId,
}

impl UnitShape {
    fn bounds(&self) -> (Vec2Fixed, Vec2Fixed) {
        let half = Vec2Fixed::new(self.clearance, self.clearance);
        (self.position - half, self.position + half)
    }

    /// Footprint as an axis-aligned square.
    #[must_use]
    pub fn square(&self) -> Square {
        Square::axis_aligned(self.position, self.clearance, self.clearance)
    }
}

/// A building-like footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticShape {
    /// Owning entity.
    pub entity: EntityId,
    /// Oriented footprint.
    pub square: Square,
    /// Blocking flags.
    pub flags: ObstructionFlags,
    /// Primary control group.
    pub group: EntityId,
    /// Secondary control group, or [`INVALID_ENTITY`].
    pub group2: EntityId,
}

impl StaticShape {
    fn bounds(&self) -> (Vec2Fixed, Vec2Fixed) {
        let hbox = half_bounding_box(self.square.u, self.square.v, self.square.half);
        (self.square.center - hbox, self.square.center + hbox)
    }
}

/// One part of a cluster, relative to the cluster's origin and facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPart {
    /// Offset along the cluster's local x axis.
    #[serde(with = "fixed_serde")]
    pub dx: Fixed,
    /// Offset along the cluster's local z axis.
    #[serde(with = "fixed_serde")]
    pub dz: Fixed,
    /// Rotation relative to the cluster.
    #[serde(with = "fixed_serde")]
    pub da: Fixed,
    /// Full width.
    #[serde(with = "fixed_serde")]
    pub width: Fixed,
    /// Full depth.
    #[serde(with = "fixed_serde")]
    pub depth: Fixed,
    /// Blocking flags of this part.
    pub flags: ObstructionFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cluster {
    parts: Vec<(ClusterPart, Tag)>,
}

/// Registry of every obstruction shape in the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstructionRegistry {
    unit_shapes: BTreeMap<u32, UnitShape>,
    static_shapes: BTreeMap<u32, StaticShape>,
    clusters: BTreeMap<u32, Cluster>,
    next_unit: u32,
    next_static: u32,

    #[serde(with = "fixed_serde")]
    world_x1: Fixed,
    #[serde(with = "fixed_serde")]
    world_z1: Fixed,
    #[serde(with = "fixed_serde")]
    max_clearance: Fixed,
    passability_circular: bool,

    #[serde(skip)]
    unit_subdivision: SpatialSubdivision,
    #[serde(skip)]
    static_subdivision: SpatialSubdivision,
    #[serde(skip)]
    update_informations: GridUpdateInformation,
    #[serde(skip)]
    dirty_static_shapes: Vec<u32>,
    #[serde(skip)]
    dirty_unit_shapes: Vec<u32>,
}

impl Default for ObstructionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObstructionRegistry {
    /// Create an empty registry with zero-sized bounds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            unit_shapes: BTreeMap::new(),
            static_shapes: BTreeMap::new(),
            clusters: BTreeMap::new(),
            next_unit: 1,
            next_static: 1,
            world_x1: Fixed::ZERO,
            world_z1: Fixed::ZERO,
            max_clearance: Fixed::ZERO,
            passability_circular: false,
            unit_subdivision: SpatialSubdivision::default(),
            static_subdivision: SpatialSubdivision::default(),
            update_informations: GridUpdateInformation::default(),
            dirty_static_shapes: Vec::new(),
            dirty_unit_shapes: Vec::new(),
        }
    }

    /// Set the world to `[0, x1] x [0, z1]` and the largest class clearance.
    ///
    /// Everything previously rasterized becomes invalid.
    pub fn set_bounds(&mut self, x1: Fixed, z1: Fixed, max_clearance: Fixed) {
        self.world_x1 = x1;
        self.world_z1 = z1;
        self.max_clearance = max_clearance;
        self.reset_subdivisions();

        let size = (x1 / NAVCELL_SIZE).ceil().to_num::<i32>().clamp(0, i32::from(u16::MAX)) as u16;
        self.update_informations.dirtiness_grid = Grid::new(size, size);
        self.make_dirty_all();
    }

    /// World extent along x.
    #[must_use]
    pub fn world_width(&self) -> Fixed {
        self.world_x1
    }

    /// World extent along z.
    #[must_use]
    pub fn world_depth(&self) -> Fixed {
        self.world_z1
    }

    /// Largest clearance of any passability class.
    #[must_use]
    pub fn max_clearance(&self) -> Fixed {
        self.max_clearance
    }

    /// Restrict passability to the circle inscribed in the world.
    pub fn set_passability_circular(&mut self, enabled: bool) {
        self.passability_circular = enabled;
        self.make_dirty_all();
    }

    /// Whether passability is restricted to the inscribed circle.
    #[must_use]
    pub fn passability_circular(&self) -> bool {
        self.passability_circular
    }

    /// Rebuild state that is not serialized. Call after deserializing.
    pub fn rebuild_after_load(&mut self) {
        self.reset_subdivisions();
        let size = (self.world_x1 / NAVCELL_SIZE)
            .ceil()
            .to_num::<i32>()
            .clamp(0, i32::from(u16::MAX)) as u16;
        self.update_informations.dirtiness_grid = Grid::new(size, size);
        self.make_dirty_all();
    }

    fn reset_subdivisions(&mut self) {
        self.unit_subdivision.reset(self.world_x1, self.world_z1);
        self.static_subdivision.reset(self.world_x1, self.world_z1);
        for (&id, shape) in &self.unit_shapes {
            let (min, max) = shape.bounds();
            self.unit_subdivision.add(id, min, max);
        }
        for (&id, shape) in &self.static_shapes {
            let (min, max) = shape.bounds();
            self.static_subdivision.add(id, min, max);
        }
    }

    /// Register a unit footprint.
    pub fn add_unit_shape(
        &mut self,
        entity: EntityId,
        position: Vec2Fixed,
        clearance: Fixed,
        flags: ObstructionFlags,
        group: EntityId,
    ) -> Tag {
        let shape = UnitShape {
            entity,
            position,
            clearance,
            flags,
            group,
        };
        let id = self.next_unit;
        self.next_unit += 1;
        self.unit_shapes.insert(id, shape);

        let (min, max) = shape.bounds();
        self.unit_subdivision.add(id, min, max);
        self.make_dirty_unit(id, &shape);

        Tag::unit(id)
    }

    /// Register a static footprint of full size `width` x `depth` rotated by `angle`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_static_shape(
        &mut self,
        entity: EntityId,
        center: Vec2Fixed,
        angle: Fixed,
        width: Fixed,
        depth: Fixed,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> Tag {
        let two = Fixed::from_num(2);
        let shape = StaticShape {
            entity,
            square: Square::from_angle(center, angle, width / two, depth / two),
            flags,
            group,
            group2,
        };
        let id = self.next_static;
        self.next_static += 1;
        self.static_shapes.insert(id, shape);

        let (min, max) = shape.bounds();
        self.static_subdivision.add(id, min, max);
        self.make_dirty_static(id, &shape);

        Tag::static_shape(id)
    }

    /// Register a cluster: a bounding shape that blocks neither movement nor
    /// pathfinding, plus one static shape per part.
    ///
    /// Returns the tag of the bounding shape; moving or removing it moves or
    /// removes every part.
    #[allow(clippy::too_many_arguments)]
    pub fn add_cluster_shapes(
        &mut self,
        entity: EntityId,
        center: Vec2Fixed,
        angle: Fixed,
        width: Fixed,
        depth: Fixed,
        flags: ObstructionFlags,
        parts: &[ClusterPart],
        group: EntityId,
        group2: EntityId,
    ) -> Tag {
        let mut main_flags = flags;
        main_flags.set(
            ObstructionFlags::BLOCK_MOVEMENT | ObstructionFlags::BLOCK_PATHFINDING,
            false,
        );
        let main = self.add_static_shape(entity, center, angle, width, depth, main_flags, group, group2);

        let mut placed = Vec::with_capacity(parts.len());
        for part in parts {
            let offset = Vec2Fixed::new(part.dx, part.dz).rotate(angle);
            let tag = self.add_static_shape(
                entity,
                center + offset,
                angle + part.da,
                part.width,
                part.depth,
                part.flags,
                group,
                group2,
            );
            placed.push((*part, tag));
        }
        self.clusters.insert(main.index(), Cluster { parts: placed });
        main
    }

    /// Tags of the parts of the cluster whose bounding shape is `tag`.
    #[must_use]
    pub fn cluster_parts(&self, tag: Tag) -> Vec<Tag> {
        if !tag.is_static() {
            return Vec::new();
        }
        self.clusters
            .get(&tag.index())
            .map(|c| c.parts.iter().map(|(_, t)| *t).collect())
            .unwrap_or_default()
    }

    fn unit(&self, tag: Tag) -> &UnitShape {
        assert!(tag.is_unit(), "{tag:?} is not a unit tag");
        self.unit_shapes
            .get(&tag.index())
            .unwrap_or_else(|| panic!("use of removed obstruction {tag:?}"))
    }

    fn unit_mut(&mut self, tag: Tag) -> &mut UnitShape {
        assert!(tag.is_unit(), "{tag:?} is not a unit tag");
        self.unit_shapes
            .get_mut(&tag.index())
            .unwrap_or_else(|| panic!("use of removed obstruction {tag:?}"))
    }

    fn static_shape(&self, tag: Tag) -> &StaticShape {
        assert!(tag.is_static(), "{tag:?} is not a static tag");
        self.static_shapes
            .get(&tag.index())
            .unwrap_or_else(|| panic!("use of removed obstruction {tag:?}"))
    }

    /// Whether the tag refers to a live shape.
    #[must_use]
    pub fn contains(&self, tag: Tag) -> bool {
        if tag.is_unit() {
            self.unit_shapes.contains_key(&tag.index())
        } else if tag.is_static() {
            self.static_shapes.contains_key(&tag.index())
        } else {
            false
        }
    }

    /// Move a shape. `angle` is ignored for unit shapes, which are always axis-aligned.
    ///
    /// # Panics
    ///
    /// Panics if the tag was removed.
    pub fn move_shape(&mut self, tag: Tag, position: Vec2Fixed, angle: Fixed) {
        assert!(tag.is_valid(), "move of invalid obstruction tag");
        let id = tag.index();

        if tag.is_unit() {
            let old = *self.unit(tag);
            self.make_dirty_unit(id, &old);

            let mut moved = old;
            moved.position = position;
            let (from_min, from_max) = old.bounds();
            let (to_min, to_max) = moved.bounds();
            self.unit_subdivision
                .move_item(id, from_min, from_max, to_min, to_max);
            self.unit_shapes.insert(id, moved);

            self.make_dirty_unit(id, &moved);
        } else {
            let old = *self.static_shape(tag);
            self.make_dirty_static(id, &old);

            let mut moved = old;
            moved.square = Square::from_angle(position, angle, old.square.half.x, old.square.half.y);
            let (from_min, from_max) = old.bounds();
            let (to_min, to_max) = moved.bounds();
            self.static_subdivision
                .move_item(id, from_min, from_max, to_min, to_max);
            self.static_shapes.insert(id, moved);

            self.make_dirty_static(id, &moved);

            let parts: Vec<(ClusterPart, Tag)> = self
                .clusters
                .get(&id)
                .map(|c| c.parts.clone())
                .unwrap_or_default();
            for (part, part_tag) in parts {
                let offset = Vec2Fixed::new(part.dx, part.dz).rotate(angle);
                self.move_shape(part_tag, position + offset, angle + part.da);
            }
        }
    }

    /// Set or clear the moving flag of a unit shape.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is not a live unit tag.
    pub fn set_unit_moving_flag(&mut self, tag: Tag, moving: bool) {
        self.unit_mut(tag).flags.set(ObstructionFlags::MOVING, moving);
    }

    /// Change a unit shape's control group.
    pub fn set_unit_control_group(&mut self, tag: Tag, group: EntityId) {
        self.unit_mut(tag).group = group;
    }

    /// Change a static shape's control groups, including every cluster part.
    pub fn set_static_control_group(&mut self, tag: Tag, group: EntityId, group2: EntityId) {
        assert!(tag.is_static(), "{tag:?} is not a static tag");
        let shape = self
            .static_shapes
            .get_mut(&tag.index())
            .unwrap_or_else(|| panic!("use of removed obstruction {tag:?}"));
        shape.group = group;
        shape.group2 = group2;
        for part in self.cluster_parts(tag) {
            self.set_static_control_group(part, group, group2);
        }
    }

    /// Remove a shape (and its cluster parts). The tag must not be used again.
    ///
    /// # Panics
    ///
    /// Panics if the tag was already removed.
    pub fn remove_shape(&mut self, tag: Tag) {
        assert!(tag.is_valid(), "removal of invalid obstruction tag");
        let id = tag.index();

        if tag.is_unit() {
            let shape = *self.unit(tag);
            let (min, max) = shape.bounds();
            self.unit_subdivision.remove(id, min, max);
            self.make_dirty_unit(id, &shape);
            self.unit_shapes.remove(&id);
        } else {
            let shape = *self.static_shape(tag);
            let (min, max) = shape.bounds();
            self.static_subdivision.remove(id, min, max);
            self.make_dirty_static(id, &shape);
            self.static_shapes.remove(&id);

            if let Some(cluster) = self.clusters.remove(&id) {
                for (_, part) in cluster.parts {
                    self.remove_shape(part);
                }
            }
        }
    }

    /// The shape's footprint. Unit shapes are axis-aligned squares of half size `clearance`.
    ///
    /// # Panics
    ///
    /// Panics if the tag was removed.
    #[must_use]
    pub fn get_obstruction(&self, tag: Tag) -> Square {
        if tag.is_unit() {
            self.unit(tag).square()
        } else {
            self.static_shape(tag).square
        }
    }

    /// Flags of a live shape.
    #[must_use]
    pub fn flags(&self, tag: Tag) -> ObstructionFlags {
        if tag.is_unit() {
            self.unit(tag).flags
        } else {
            self.static_shape(tag).flags
        }
    }

    /// Owning entity of a live shape.
    #[must_use]
    pub fn entity(&self, tag: Tag) -> EntityId {
        if tag.is_unit() {
            self.unit(tag).entity
        } else {
            self.static_shape(tag).entity
        }
    }

    /// Control groups `(group, group2)` of a live shape.
    #[must_use]
    pub fn control_groups(&self, tag: Tag) -> (EntityId, EntityId) {
        if tag.is_unit() {
            (self.unit(tag).group, INVALID_ENTITY)
        } else {
            let s = self.static_shape(tag);
            (s.group, s.group2)
        }
    }

    /// Footprint a unit of `clearance` would have at `position`.
    #[must_use]
    pub fn get_unit_shape_obstruction(&self, position: Vec2Fixed, clearance: Fixed) -> Square {
        Square::axis_aligned(position, clearance, clearance)
    }

    /// Footprint a static shape of full size `width` x `depth` would have.
    #[must_use]
    pub fn get_static_shape_obstruction(
        &self,
        center: Vec2Fixed,
        angle: Fixed,
        width: Fixed,
        depth: Fixed,
    ) -> Square {
        let two = Fixed::from_num(2);
        Square::from_angle(center, angle, width / two, depth / two)
    }

    /// Number of live shapes.
    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.unit_shapes.len() + self.static_shapes.len()
    }

    /// Pass the accumulated grid dirtiness to a consumer and reset it.
    pub fn update_informations(&mut self, into: &mut GridUpdateInformation) {
        let own = &self.update_informations.dirtiness_grid;
        if (into.dirtiness_grid.width(), into.dirtiness_grid.height()) != (own.width(), own.height()) {
            into.dirtiness_grid = Grid::new(own.width(), own.height());
        }
        if self.update_informations.dirty {
            into.merge_and_clear(&mut self.update_informations);
        }
    }

    /// Queue navcells `[i0, i1) x [j0, j1)` for redrawing, e.g. after the
    /// terrain under them was re-baked. Shapes reaching into the box are
    /// redrawn with them.
    ///
    /// Returns `false` when no dirtiness grid exists yet, in which case the
    /// caller has to fall back to a full update.
    pub fn mark_navcells_dirty(&mut self, i0: u16, j0: u16, i1: u16, j1: u16) -> bool {
        let (w, h) = (
            self.update_informations.dirtiness_grid.width(),
            self.update_informations.dirtiness_grid.height(),
        );
        if w == 0 || h == 0 {
            return false;
        }
        if self.update_informations.globally_dirty || i0 >= i1 || j0 >= j1 {
            return true;
        }

        self.update_informations.dirty = true;
        for j in j0..j1.min(h) {
            for i in i0..i1.min(w) {
                self.update_informations.dirtiness_grid.set(i, j, true);
            }
        }

        let margin = self.neighbour_margin();
        let min = Vec2Fixed::new(NAVCELL_SIZE * i64::from(i0) - margin, NAVCELL_SIZE * i64::from(j0) - margin);
        let max = Vec2Fixed::new(NAVCELL_SIZE * i64::from(i1) + margin, NAVCELL_SIZE * i64::from(j1) + margin);
        self.push_dirty_neighbours(min, max);
        true
    }

    /// Whether the world is `[0, x1] x [0, z1]` with at least `r` of margin around the point.
    fn is_in_world(&self, p: Vec2Fixed, r: Fixed) -> bool {
        r <= p.x && p.x <= self.world_x1 - r && r <= p.y && p.y <= self.world_z1 - r
    }

    fn make_dirty_all(&mut self) {
        self.update_informations.dirty = true;
        self.update_informations.globally_dirty = true;
        self.update_informations.dirtiness_grid.reset();
    }

    fn mark_dirtiness_grid(&mut self, center: Vec2Fixed, hbox: Vec2Fixed) {
        let grid = &mut self.update_informations.dirtiness_grid;
        let (w, h) = (grid.width(), grid.height());
        if w == 0 || h == 0 {
            return;
        }
        let (i0, j0) = nearest_navcell(center - hbox, w, h);
        let (i1, j1) = nearest_navcell(center + hbox, w, h);
        for j in j0..=j1 {
            for i in i0..=i1 {
                grid.set(i, j, true);
            }
        }
    }

    fn push_dirty_neighbours(&mut self, min: Vec2Fixed, max: Vec2Fixed) {
        for id in self.static_subdivision.get_in_range(min, max) {
            if !self.dirty_static_shapes.contains(&id) {
                self.dirty_static_shapes.push(id);
            }
        }
        for id in self.unit_subdivision.get_in_range(min, max) {
            if !self.dirty_unit_shapes.contains(&id) {
                self.dirty_unit_shapes.push(id);
            }
        }
    }

    /// Neighbour search margin: every shape whose rasterized footprint can
    /// reach into the dirtied cells.
    fn neighbour_margin(&self) -> Fixed {
        self.max_clearance * Fixed::from_num(2) + NAVCELL_SIZE * Fixed::from_num(2)
    }

    fn make_dirty_static(&mut self, id: u32, shape: &StaticShape) {
        if self.update_informations.globally_dirty {
            return;
        }
        if !shape
            .flags
            .intersects(ObstructionFlags::BLOCK_PATHFINDING | ObstructionFlags::BLOCK_FOUNDATION)
        {
            return;
        }
        self.update_informations.dirty = true;
        if !self.dirty_static_shapes.contains(&id) {
            self.dirty_static_shapes.push(id);
        }

        let center = shape.square.center;
        let hbox = half_bounding_box(shape.square.u, shape.square.v, shape.square.half);
        let margin = self.neighbour_margin();
        let search = Vec2Fixed::new(hbox.x + margin, hbox.y + margin);
        self.push_dirty_neighbours(center - search, center + search);

        let expand = Vec2Fixed::new(hbox.x + self.max_clearance, hbox.y + self.max_clearance);
        self.mark_dirtiness_grid(center, expand);
    }

    fn make_dirty_unit(&mut self, id: u32, shape: &UnitShape) {
        if self.update_informations.globally_dirty {
            return;
        }
        if !shape
            .flags
            .intersects(ObstructionFlags::BLOCK_PATHFINDING | ObstructionFlags::BLOCK_FOUNDATION)
        {
            return;
        }
        self.update_informations.dirty = true;
        if !self.dirty_unit_shapes.contains(&id) {
            self.dirty_unit_shapes.push(id);
        }

        let range = shape.clearance + self.neighbour_margin();
        let search = Vec2Fixed::new(range, range);
        self.push_dirty_neighbours(shape.position - search, shape.position + search);

        let r = shape.clearance + self.max_clearance;
        self.mark_dirtiness_grid(shape.position, Vec2Fixed::new(r, r));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FRAC_PI_2;

    fn fx(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    fn v2(x: i32, y: i32) -> Vec2Fixed {
        Vec2Fixed::from_ints(x, y)
    }

    fn blocking() -> ObstructionFlags {
        ObstructionFlags::BLOCK_MOVEMENT
            | ObstructionFlags::BLOCK_PATHFINDING
            | ObstructionFlags::BLOCK_FOUNDATION
    }

    fn registry() -> ObstructionRegistry {
        let mut reg = ObstructionRegistry::new();
        reg.set_bounds(fx(128), fx(128), fx(2));
        reg
    }

    #[test]
    fn test_tags_encode_kind_and_index() {
        let unit = Tag::unit(5);
        let building = Tag::static_shape(5);
        assert!(unit.is_unit() && !unit.is_static());
        assert!(building.is_static() && !building.is_unit());
        assert_eq!(unit.index(), 5);
        assert_eq!(building.index(), 5);
        assert!(!Tag::INVALID.is_valid());
        assert!(!Tag::INVALID.is_unit());
    }

    #[test]
    fn test_tags_are_never_reused() {
        let mut reg = registry();
        let a = reg.add_unit_shape(1, v2(10, 10), Fixed::ONE, blocking(), 1);
        reg.remove_shape(a);
        let b = reg.add_unit_shape(2, v2(10, 10), Fixed::ONE, blocking(), 2);
        assert_ne!(a, b);
        assert!(!reg.contains(a));
        assert!(reg.contains(b));
    }

    #[test]
    #[should_panic(expected = "removed obstruction")]
    fn test_removed_tag_panics() {
        let mut reg = registry();
        let tag = reg.add_static_shape(1, v2(10, 10), Fixed::ZERO, fx(4), fx(4), blocking(), 1, 0);
        reg.remove_shape(tag);
        let _ = reg.get_obstruction(tag);
    }

    #[test]
    fn test_move_shape_round_trips() {
        let mut reg = registry();
        let building =
            reg.add_static_shape(1, v2(10, 10), Fixed::ZERO, fx(4), fx(2), blocking(), 1, 0);
        reg.move_shape(building, v2(40, 30), FRAC_PI_2);
        let sq = reg.get_obstruction(building);
        assert_eq!(sq, Square::from_angle(v2(40, 30), FRAC_PI_2, fx(2), fx(1)));

        let unit = reg.add_unit_shape(2, v2(5, 5), Fixed::ONE, blocking(), 2);
        reg.move_shape(unit, v2(7, 9), FRAC_PI_2);
        let sq = reg.get_obstruction(unit);
        assert_eq!(sq.center, v2(7, 9));
        assert!(sq.is_axis_aligned());
    }

    #[test]
    fn test_moving_flag_and_groups() {
        let mut reg = registry();
        let unit = reg.add_unit_shape(3, v2(5, 5), Fixed::ONE, blocking(), 3);
        reg.set_unit_moving_flag(unit, true);
        assert!(reg.flags(unit).contains(ObstructionFlags::MOVING));
        reg.set_unit_moving_flag(unit, false);
        assert!(!reg.flags(unit).contains(ObstructionFlags::MOVING));

        reg.set_unit_control_group(unit, 99);
        assert_eq!(reg.control_groups(unit), (99, INVALID_ENTITY));
    }

    #[test]
    fn test_cluster_parts_follow_main_shape() {
        let mut reg = registry();
        let part = ClusterPart {
            dx: fx(3),
            dz: Fixed::ZERO,
            da: Fixed::ZERO,
            width: fx(2),
            depth: fx(2),
            flags: blocking(),
        };
        let main = reg.add_cluster_shapes(
            7,
            v2(20, 20),
            Fixed::ZERO,
            fx(10),
            fx(10),
            blocking(),
            &[part],
            7,
            INVALID_ENTITY,
        );
        assert!(!reg.flags(main).contains(ObstructionFlags::BLOCK_MOVEMENT));
        let parts = reg.cluster_parts(main);
        assert_eq!(parts.len(), 1);
        assert_eq!(reg.get_obstruction(parts[0]).center, v2(23, 20));

        reg.move_shape(main, v2(50, 50), Fixed::ZERO);
        assert_eq!(reg.get_obstruction(parts[0]).center, v2(53, 50));

        reg.set_static_control_group(main, 8, 9);
        assert_eq!(reg.control_groups(parts[0]), (8, 9));

        reg.remove_shape(main);
        assert!(!reg.contains(parts[0]));
        assert_eq!(reg.shape_count(), 0);
    }

    #[test]
    fn test_dirtiness_tracks_local_changes() {
        let mut reg = registry();
        let mut info = GridUpdateInformation::default();
        reg.update_informations(&mut info);
        assert!(info.globally_dirty);

        reg.add_static_shape(1, v2(64, 64), Fixed::ZERO, fx(4), fx(4), blocking(), 1, 0);
        let mut info = GridUpdateInformation::default();
        reg.update_informations(&mut info);
        assert!(info.dirty);
        assert!(!info.globally_dirty);
        assert!(info.dirtiness_grid.get(64, 64));
        assert!(!info.dirtiness_grid.get(10, 10));
    }

    #[test]
    fn test_non_blocking_shapes_do_not_dirty() {
        let mut reg = registry();
        reg.update_informations.clean();
        reg.add_unit_shape(1, v2(10, 10), Fixed::ONE, ObstructionFlags::BLOCK_MOVEMENT, 1);
        assert!(!reg.update_informations.dirty);
    }

    #[test]
    fn test_serde_round_trip_rebuilds_subdivisions() {
        let mut reg = registry();
        let tag = reg.add_static_shape(1, v2(30, 30), Fixed::ZERO, fx(4), fx(4), blocking(), 1, 0);
        let bytes = bincode::serialize(&reg).expect("serialize");
        let mut restored: ObstructionRegistry = bincode::deserialize(&bytes).expect("deserialize");
        restored.rebuild_after_load();
        assert_eq!(restored.get_obstruction(tag), reg.get_obstruction(tag));
        let found = restored.get_static_obstructions_in_range(&NullFilter, v2(25, 25), v2(35, 35));
        assert_eq!(found.len(), 1);
    }
}
