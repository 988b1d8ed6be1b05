// ============================================================================
// TILE GRID: deterministic row-major partition of a render region
// ============================================================================
//
// The grid is a pure function of (region, tile size): tile `i` is always the
// same rectangle, so workers select work by index alone. Worker `w` of `W`
// renders tiles `w, w + W, w + 2W, …` with no shared cursor.
// ============================================================================

use crate::geometry::RectI;

/// One disjoint piece of the render region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub index: usize,
    pub bounds: RectI,
}

impl Tile {
    pub fn x(&self) -> i32 {
        self.bounds.x
    }

    pub fn y(&self) -> i32 {
        self.bounds.y
    }

    pub fn width(&self) -> i32 {
        self.bounds.width
    }

    pub fn height(&self) -> i32 {
        self.bounds.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    region: RectI,
    tile_width: u32,
    tile_height: u32,
    columns: usize,
    rows: usize,
}

impl TileGrid {
    /// Partition `region` into `tile_width × tile_height` tiles.
    /// Zero tile dimensions are treated as 1 and oversized ones are clamped
    /// to the region. An empty region yields no tiles.
    pub fn new(region: RectI, tile_width: u32, tile_height: u32) -> Self {
        let tile_width = tile_width.clamp(1, region.width.max(1) as u32);
        let tile_height = tile_height.clamp(1, region.height.max(1) as u32);
        let (columns, rows) = if region.is_empty() {
            (0, 0)
        } else {
            (
                (region.width as u32).div_ceil(tile_width) as usize,
                (region.height as u32).div_ceil(tile_height) as usize,
            )
        };
        Self {
            region,
            tile_width,
            tile_height,
            columns,
            rows,
        }
    }

    /// A grid with exactly one tile covering the whole region, for
    /// transforms that cannot be split.
    pub fn single(region: RectI) -> Self {
        let w = region.width.max(1) as u32;
        let h = region.height.max(1) as u32;
        Self::new(region, w, h)
    }

    pub fn region(&self) -> RectI {
        self.region
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tile at `index`, clipped to the region's right/bottom edge.
    pub fn tile(&self, index: usize) -> Option<Tile> {
        if index >= self.len() {
            return None;
        }
        let col = (index % self.columns) as i32;
        let row = (index / self.columns) as i32;
        let x = self.region.x + col * self.tile_width as i32;
        let y = self.region.y + row * self.tile_height as i32;
        let w = (self.tile_width as i32).min(self.region.right() - x);
        let h = (self.tile_height as i32).min(self.region.bottom() - y);
        Some(Tile {
            index,
            bounds: RectI::new(x, y, w, h),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.len()).filter_map(move |i| self.tile(i))
    }

    /// Tile indices assigned to `worker` out of `worker_count` workers.
    pub fn worker_indices(
        &self,
        worker: usize,
        worker_count: usize,
    ) -> impl Iterator<Item = usize> + use<> {
        (worker..self.len()).step_by(worker_count.max(1))
    }
}
