//! Shape filters for obstruction queries.
//!
//! Every collision and range query takes a filter and only considers shapes
//! for which [`ObstructionFilter::test_shape`] returns `true`. Filters are
//! pure predicates and never touch registry state.

use super::{ObstructionFlags, Tag};
use crate::{EntityId, INVALID_ENTITY};

/// Predicate over `(tag, flags, group, group2)` deciding whether a shape counts.
pub trait ObstructionFilter {
    /// Whether the shape should be considered by the query.
    fn test_shape(&self, tag: Tag, flags: ObstructionFlags, group: EntityId, group2: EntityId)
        -> bool;
}

impl<F> ObstructionFilter for F
where
    F: Fn(Tag, ObstructionFlags, EntityId, EntityId) -> bool,
{
    fn test_shape(
        &self,
        tag: Tag,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> bool {
        self(tag, flags, group, group2)
    }
}

/// Accepts every shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFilter;

impl ObstructionFilter for NullFilter {
    fn test_shape(&self, _: Tag, _: ObstructionFlags, _: EntityId, _: EntityId) -> bool {
        true
    }
}

/// Accepts shapes that are not currently moving.
#[derive(Debug, Clone, Copy, Default)]
pub struct StationaryOnlyFilter;

impl ObstructionFilter for StationaryOnlyFilter {
    fn test_shape(&self, _: Tag, flags: ObstructionFlags, _: EntityId, _: EntityId) -> bool {
        !flags.contains(ObstructionFlags::MOVING)
    }
}

/// Movement blockers outside `group`, optionally ignoring moving units.
#[derive(Debug, Clone, Copy)]
pub struct ControlGroupMovementFilter {
    /// Whether moving shapes still block.
    pub avoid_moving: bool,
    /// Control group to ignore.
    pub group: EntityId,
}

impl ControlGroupMovementFilter {
    /// Create the filter.
    #[must_use]
    pub fn new(avoid_moving: bool, group: EntityId) -> Self {
        Self {
            avoid_moving,
            group,
        }
    }
}

impl ObstructionFilter for ControlGroupMovementFilter {
    fn test_shape(
        &self,
        _: Tag,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> bool {
        if group == self.group || (group2 != INVALID_ENTITY && group2 == self.group) {
            return false;
        }
        if !flags.contains(ObstructionFlags::BLOCK_MOVEMENT) {
            return false;
        }
        if flags.contains(ObstructionFlags::MOVING) && !self.avoid_moving {
            return false;
        }
        true
    }
}

/// Skips two control groups and requires (or, when `exclude`, forbids) any flag of `mask`.
#[derive(Debug, Clone, Copy)]
pub struct SkipControlGroupsRequireFlagFilter {
    exclude: bool,
    group: EntityId,
    group2: EntityId,
    mask: ObstructionFlags,
}

impl SkipControlGroupsRequireFlagFilter {
    /// Create the filter. `group` must be a valid entity.
    #[must_use]
    pub fn new(exclude: bool, group: EntityId, group2: EntityId, mask: ObstructionFlags) -> Self {
        assert!(group != INVALID_ENTITY, "filter needs a valid control group");
        let group2 = if group2 == INVALID_ENTITY { group } else { group2 };
        Self {
            exclude,
            group,
            group2,
            mask,
        }
    }
}

impl ObstructionFilter for SkipControlGroupsRequireFlagFilter {
    fn test_shape(
        &self,
        _: Tag,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> bool {
        if group == self.group
            || group == self.group2
            || (group2 != INVALID_ENTITY && (group2 == self.group || group2 == self.group2))
        {
            return false;
        }
        if self.exclude {
            !flags.intersects(self.mask)
        } else {
            flags.intersects(self.mask)
        }
    }
}

/// Skips one tag and requires both control groups (in either order) plus a flag of `mask`.
#[derive(Debug, Clone, Copy)]
pub struct SkipTagRequireControlGroupsAndFlagFilter {
    tag: Tag,
    group: EntityId,
    group2: EntityId,
    mask: ObstructionFlags,
}

impl SkipTagRequireControlGroupsAndFlagFilter {
    /// Create the filter. `group` must be a valid entity.
    #[must_use]
    pub fn new(tag: Tag, group: EntityId, group2: EntityId, mask: ObstructionFlags) -> Self {
        assert!(group != INVALID_ENTITY, "filter needs a valid control group");
        Self {
            tag,
            group,
            group2,
            mask,
        }
    }
}

impl ObstructionFilter for SkipTagRequireControlGroupsAndFlagFilter {
    fn test_shape(
        &self,
        tag: Tag,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> bool {
        tag != self.tag
            && flags.intersects(self.mask)
            && ((group == self.group && group2 == self.group2)
                || (group2 == self.group && group == self.group2))
    }
}

/// Accepts everything except one tag.
#[derive(Debug, Clone, Copy)]
pub struct SkipTagFilter(pub Tag);

impl ObstructionFilter for SkipTagFilter {
    fn test_shape(&self, tag: Tag, _: ObstructionFlags, _: EntityId, _: EntityId) -> bool {
        tag != self.0
    }
}

/// Movement blockers other than one tag and one control group.
#[derive(Debug, Clone, Copy)]
pub struct SkipTagAndControlGroupFilter {
    /// Tag to ignore.
    pub tag: Tag,
    /// Whether moving shapes still block.
    pub avoid_moving: bool,
    /// Control group to ignore.
    pub group: EntityId,
}

impl ObstructionFilter for SkipTagAndControlGroupFilter {
    fn test_shape(
        &self,
        tag: Tag,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> bool {
        if tag == self.tag {
            return false;
        }
        if group == self.group || (group2 != INVALID_ENTITY && group2 == self.group) {
            return false;
        }
        if flags.contains(ObstructionFlags::MOVING) && !self.avoid_moving {
            return false;
        }
        flags.contains(ObstructionFlags::BLOCK_MOVEMENT)
    }
}

/// Accepts shapes other than one tag that carry a flag of `mask`.
#[derive(Debug, Clone, Copy)]
pub struct SkipTagRequireFlagsFilter {
    /// Tag to ignore.
    pub tag: Tag,
    /// Required flags (any of).
    pub mask: ObstructionFlags,
}

impl ObstructionFilter for SkipTagRequireFlagsFilter {
    fn test_shape(&self, tag: Tag, flags: ObstructionFlags, _: EntityId, _: EntityId) -> bool {
        tag != self.tag && flags.intersects(self.mask)
    }
}

/// Static movement blockers outside `group`; unit shapes are ignored.
#[derive(Debug, Clone, Copy)]
pub struct StaticShapesFilter {
    /// Control group to ignore.
    pub group: EntityId,
}

impl ObstructionFilter for StaticShapesFilter {
    fn test_shape(
        &self,
        tag: Tag,
        flags: ObstructionFlags,
        group: EntityId,
        group2: EntityId,
    ) -> bool {
        tag.is_static()
            && flags.contains(ObstructionFlags::BLOCK_MOVEMENT)
            && group != self.group
            && (group2 == INVALID_ENTITY || group2 != self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: Tag = Tag::unit(1);
    const BUILDING: Tag = Tag::static_shape(1);

    fn blocking() -> ObstructionFlags {
        ObstructionFlags::BLOCK_MOVEMENT | ObstructionFlags::BLOCK_PATHFINDING
    }

    #[test]
    fn test_control_group_movement_filter() {
        let filter = ControlGroupMovementFilter::new(false, 10);
        assert!(!filter.test_shape(UNIT, blocking(), 10, INVALID_ENTITY));
        assert!(filter.test_shape(UNIT, blocking(), 11, INVALID_ENTITY));
        assert!(!filter.test_shape(UNIT, blocking() | ObstructionFlags::MOVING, 11, 0));
        assert!(!filter.test_shape(UNIT, ObstructionFlags::BLOCK_FOUNDATION, 11, 0));

        let avoid = ControlGroupMovementFilter::new(true, 10);
        assert!(avoid.test_shape(UNIT, blocking() | ObstructionFlags::MOVING, 11, 0));
    }

    #[test]
    fn test_skip_control_groups_require_flag() {
        let filter = SkipControlGroupsRequireFlagFilter::new(
            false,
            5,
            INVALID_ENTITY,
            ObstructionFlags::BLOCK_FOUNDATION,
        );
        assert!(!filter.test_shape(BUILDING, ObstructionFlags::BLOCK_FOUNDATION, 5, 0));
        assert!(filter.test_shape(BUILDING, ObstructionFlags::BLOCK_FOUNDATION, 6, 0));
        assert!(!filter.test_shape(BUILDING, ObstructionFlags::BLOCK_MOVEMENT, 6, 0));

        let exclude = SkipControlGroupsRequireFlagFilter::new(
            true,
            5,
            INVALID_ENTITY,
            ObstructionFlags::BLOCK_FOUNDATION,
        );
        assert!(exclude.test_shape(BUILDING, ObstructionFlags::BLOCK_MOVEMENT, 6, 0));
    }

    #[test]
    fn test_skip_tag_filters() {
        assert!(!SkipTagFilter(UNIT).test_shape(UNIT, blocking(), 1, 0));
        assert!(SkipTagFilter(UNIT).test_shape(BUILDING, blocking(), 1, 0));

        let filter = SkipTagRequireFlagsFilter {
            tag: UNIT,
            mask: ObstructionFlags::BLOCK_PATHFINDING,
        };
        assert!(filter.test_shape(BUILDING, blocking(), 1, 0));
        assert!(!filter.test_shape(BUILDING, ObstructionFlags::BLOCK_MOVEMENT, 1, 0));
    }

    #[test]
    fn test_require_control_groups_either_order() {
        let filter = SkipTagRequireControlGroupsAndFlagFilter::new(
            UNIT,
            3,
            4,
            ObstructionFlags::BLOCK_FOUNDATION,
        );
        assert!(filter.test_shape(BUILDING, ObstructionFlags::BLOCK_FOUNDATION, 4, 3));
        assert!(!filter.test_shape(BUILDING, ObstructionFlags::BLOCK_FOUNDATION, 4, 5));
    }

    #[test]
    fn test_static_movement_filter_ignores_units() {
        let filter = StaticShapesFilter { group: 9 };
        assert!(!filter.test_shape(UNIT, blocking(), 1, 0));
        assert!(filter.test_shape(BUILDING, blocking(), 1, 0));
        assert!(!filter.test_shape(BUILDING, blocking(), 9, 0));
    }

    #[test]
    fn test_closure_filter() {
        let only_units = |tag: Tag, _: ObstructionFlags, _: EntityId, _: EntityId| tag.is_unit();
        assert!(only_units.test_shape(UNIT, blocking(), 1, 0));
        assert!(!only_units.test_shape(BUILDING, blocking(), 1, 0));
    }
}
