use itertools::iproduct;

use super::BatchDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub query_tile: usize,
    pub head: usize,
    pub batch: usize,
}

/// Grid of independent `(query_tile, head, batch)` work units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub num_query_tiles: usize,
    pub num_heads: usize,
    pub batch_size: usize,
    pub block_m: usize,
}

impl TileGrid {
    pub fn new(
        max_q_seqlen: usize,
        num_heads: usize,
        batch_size: usize,
        block_m: usize,
    ) -> Self {
        Self {
            num_query_tiles: max_q_seqlen.div_ceil(block_m.max(1)),
            num_heads,
            batch_size,
            block_m,
        }
    }

    pub fn len(&self) -> usize {
        self.num_query_tiles * self.num_heads * self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileIndex> + use<> {
        iproduct!(0..self.batch_size, 0..self.num_heads, 0..self.num_query_tiles).map(|(batch, head, query_tile)| {
            TileIndex {
                query_tile,
                head,
                batch,
            }
        })
    }

    /// A tile starting at or past the end of its sequence is a no-op.
    pub fn is_active(
        &self,
        tile: TileIndex,
        q_seqlen: usize,
    ) -> bool {
        tile.query_tile * self.block_m < q_seqlen
    }

    pub fn active_tiles<'a>(
        &self,
        batch: &'a BatchDescriptor,
    ) -> impl Iterator<Item = TileIndex> + 'a {
        let grid = *self;
        self.tiles().filter(move |tile| grid.is_active(*tile, batch.q_seqlens()[tile.batch]))
    }

    /// Query rows `[start, end)` of the tile, relative to its sequence.
    pub fn row_range(
        &self,
        tile: TileIndex,
        q_seqlen: usize,
    ) -> (usize, usize) {
        let start = tile.query_tile * self.block_m;
        (start, (start + self.block_m).min(q_seqlen))
    }
}
