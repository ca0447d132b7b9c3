//! Drawing obstruction shapes onto the passability grid.
//!
//! A navcell is only blocked when it lies entirely inside a shape's
//! clearance-expanded footprint, so the geometric boundary of a shape is
//! always reachable.

use std::collections::BTreeMap;

use super::{ObstructionFlags, ObstructionRegistry};
use crate::geometry::rasterize_rect_with_clearance;
use crate::grid::{nearest_navcell, Grid, NavcellData, NAVCELL_SIZE};
use crate::math::{Fixed, Vec2Fixed};
use crate::passability::{ObstructionHandling, PassClass, PassabilityClass};

impl ObstructionRegistry {
    /// OR every shape's blocked navcells into `grid`.
    ///
    /// With `full_update == false` only shapes touched since the previous call
    /// are drawn; the caller is expected to have restored the dirtied cells
    /// beforehand. Either way the dirty shape lists are cleared.
    pub fn rasterize(
        &mut self,
        grid: &mut Grid<NavcellData>,
        classes: &[PassabilityClass],
        full_update: bool,
    ) {
        let mut pathfinding_masks: BTreeMap<Fixed, PassClass> = BTreeMap::new();
        let mut foundation_mask: PassClass = 0;
        for class in classes {
            match class.obstructions {
                ObstructionHandling::Pathfinding => {
                    *pathfinding_masks.entry(class.clearance).or_insert(0) |= class.mask;
                }
                ObstructionHandling::Foundation => foundation_mask |= class.mask,
                ObstructionHandling::None => {}
            }
        }

        for (&clearance, &mask) in &pathfinding_masks {
            self.rasterize_helper(grid, ObstructionFlags::BLOCK_PATHFINDING, full_update, mask, clearance);
        }
        if foundation_mask != 0 {
            self.rasterize_helper(
                grid,
                ObstructionFlags::BLOCK_FOUNDATION,
                full_update,
                foundation_mask,
                Fixed::ZERO,
            );
        }

        tracing::trace!(
            full_update,
            statics = self.dirty_static_shapes.len(),
            units = self.dirty_unit_shapes.len(),
            "rasterized obstructions"
        );
        self.dirty_static_shapes.clear();
        self.dirty_unit_shapes.clear();
    }

    fn rasterize_helper(
        &self,
        grid: &mut Grid<NavcellData>,
        require: ObstructionFlags,
        full_update: bool,
        applied: PassClass,
        clearance: Fixed,
    ) {
        let (w, h) = (i32::from(grid.width()), i32::from(grid.height()));
        if w == 0 || h == 0 {
            return;
        }

        for (id, shape) in &self.static_shapes {
            if !shape.flags.intersects(require) {
                continue;
            }
            if !full_update && !self.dirty_static_shapes.contains(id) {
                continue;
            }
            for span in rasterize_rect_with_clearance(&shape.square, clearance, NAVCELL_SIZE) {
                if span.j < 0 || span.j >= h {
                    continue;
                }
                let j = span.j as u16;
                for i in span.i0.max(0)..span.i1.min(w) {
                    *grid.get_mut(i as u16, j) |= applied;
                }
            }
        }

        for (id, shape) in &self.unit_shapes {
            if !shape.flags.intersects(require) {
                continue;
            }
            if !full_update && !self.dirty_unit_shapes.contains(id) {
                continue;
            }
            let r = shape.clearance + clearance;
            let reach = Vec2Fixed::new(r, r);
            let (i0, j0) = nearest_navcell(shape.position - reach, grid.width(), grid.height());
            let (i1, j1) = nearest_navcell(shape.position + reach, grid.width(), grid.height());
            for j in (j0 + 1)..j1 {
                for i in (i0 + 1)..i1 {
                    *grid.get_mut(i, j) |= applied;
                }
            }
        }
    }
}
