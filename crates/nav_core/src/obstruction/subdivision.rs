//! Uniform bucket grid for broad-phase shape lookups.
//!
//! Each item is registered in every bucket its bounding box touches, so a
//! range query only visits nearby buckets. Query results are sorted and
//! deduplicated, keeping iteration order independent of insertion history.

use crate::math::{Fixed, Vec2Fixed};

/// Bucket side length in world units.
pub const SUBDIVISION_SIZE: i32 = 32;

/// Axis-aligned buckets of item ids covering `[0, width) x [0, height)`.
#[derive(Debug, Clone, Default)]
pub struct SpatialSubdivision {
    div_size: Fixed,
    divs_w: u32,
    divs_h: u32,
    buckets: Vec<Vec<u32>>,
}

impl SpatialSubdivision {
    /// Create buckets covering a world of the given size.
    #[must_use]
    pub fn new(width: Fixed, height: Fixed) -> Self {
        let mut sub = Self::default();
        sub.reset(width, height);
        sub
    }

    /// Drop all items and resize for a world of the given size.
    pub fn reset(&mut self, width: Fixed, height: Fixed) {
        self.div_size = Fixed::from_num(SUBDIVISION_SIZE);
        self.divs_w = (width / self.div_size).ceil().to_num::<i32>().max(1) as u32;
        self.divs_h = (height / self.div_size).ceil().to_num::<i32>().max(1) as u32;
        self.buckets = vec![Vec::new(); (self.divs_w * self.divs_h) as usize];
    }

    fn bucket_range(&self, min: Vec2Fixed, max: Vec2Fixed) -> (u32, u32, u32, u32) {
        let clamp = |v: Fixed, limit: u32| -> u32 {
            let idx = (v / self.div_size).floor().to_num::<i32>();
            idx.clamp(0, limit as i32 - 1) as u32
        };
        (
            clamp(min.x, self.divs_w),
            clamp(min.y, self.divs_h),
            clamp(max.x, self.divs_w),
            clamp(max.y, self.divs_h),
        )
    }

    /// Register `id` in every bucket overlapping the box.
    pub fn add(&mut self, id: u32, min: Vec2Fixed, max: Vec2Fixed) {
        let (i0, j0, i1, j1) = self.bucket_range(min, max);
        for j in j0..=j1 {
            for i in i0..=i1 {
                self.buckets[(j * self.divs_w + i) as usize].push(id);
            }
        }
    }

    /// Unregister `id` from the buckets overlapping the box it was added with.
    pub fn remove(&mut self, id: u32, min: Vec2Fixed, max: Vec2Fixed) {
        let (i0, j0, i1, j1) = self.bucket_range(min, max);
        for j in j0..=j1 {
            for i in i0..=i1 {
                let bucket = &mut self.buckets[(j * self.divs_w + i) as usize];
                if let Some(pos) = bucket.iter().position(|&x| x == id) {
                    bucket.swap_remove(pos);
                }
            }
        }
    }

    /// Move `id` between boxes, skipping the work when the buckets are unchanged.
    pub fn move_item(
        &mut self,
        id: u32,
        from_min: Vec2Fixed,
        from_max: Vec2Fixed,
        to_min: Vec2Fixed,
        to_max: Vec2Fixed,
    ) {
        if self.bucket_range(from_min, from_max) == self.bucket_range(to_min, to_max) {
            return;
        }
        self.remove(id, from_min, from_max);
        self.add(id, to_min, to_max);
    }

    /// Ids whose buckets overlap the box, sorted and unique.
    #[must_use]
    pub fn get_in_range(&self, min: Vec2Fixed, max: Vec2Fixed) -> Vec<u32> {
        let (i0, j0, i1, j1) = self.bucket_range(min, max);
        let mut out = Vec::new();
        for j in j0..=j1 {
            for i in i0..=i1 {
                out.extend_from_slice(&self.buckets[(j * self.divs_w + i) as usize]);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Ids whose buckets overlap the square of half size `range` around `pos`.
    #[must_use]
    pub fn get_near(&self, pos: Vec2Fixed, range: Fixed) -> Vec<u32> {
        let r = Vec2Fixed::new(range, range);
        self.get_in_range(pos - r, pos + r)
    }
}
