//! Tile transfer from the input descriptor into scratch slots.

use crate::descriptor::LseInput;
use crate::sync::PhaseCounter;

/// Position of a tile inside the input descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCoord {
    /// Chunk index (outer dimension).
    pub chunk: usize,
    /// First row of the tile (inner dimension).
    pub row: usize,
}

impl TileCoord {
    /// Tile covering chunk `chunk` from row zero.
    pub fn chunk(chunk: usize) -> Self {
        Self { chunk, row: 0 }
    }
}

/// Copy engine used by the transfer role.
///
/// An implementation copies `dst.len()` rows starting at `coord` into `dst`,
/// filling every element outside the source's logical bounds with `padding`,
/// and signals `arrival` once the copy is visible to readers. `dst` is only
/// borrowed for the duration of the call, so the copy must be complete and
/// `arrival` signalled before it returns. A panicking engine is caught by the
/// ring, which signals the arrival in its place.
pub trait TransferEngine: Send + Sync {
    /// Issue the load of one tile.
    fn async_load(
        &self,
        dst: &mut [f32],
        source: &LseInput<'_>,
        coord: TileCoord,
        arrival: &PhaseCounter,
        padding: f32,
    );
}

/// Host memcpy engine. Loads complete before `async_load` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTransferEngine;

impl TransferEngine for HostTransferEngine {
    fn async_load(
        &self,
        dst: &mut [f32],
        source: &LseInput<'_>,
        coord: TileCoord,
        arrival: &PhaseCounter,
        padding: f32,
    ) {
        match source.chunk(coord.chunk) {
            Some(chunk) => {
                let start = coord.row.min(chunk.len());
                let avail = &chunk[start..];
                let n = avail.len().min(dst.len());
                dst[..n].copy_from_slice(&avail[..n]);
                dst[n..].fill(padding);
            }
            None => dst.fill(padding),
        }
        arrival.signal(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_pads_rows_past_bound() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let input = LseInput::new(&data, 2, 3).unwrap();
        let arrival = PhaseCounter::new(1);
        let mut dst = vec![0.0f32; 5];

        HostTransferEngine.async_load(
            &mut dst,
            &input,
            TileCoord::chunk(1),
            &arrival,
            f32::NEG_INFINITY,
        );

        assert_eq!(&dst[..3], &[4.0, 5.0, 6.0]);
        assert!(dst[3..].iter().all(|v| *v == f32::NEG_INFINITY));
        assert!(arrival.try_wait(0));
    }

    #[test]
    fn test_load_pads_chunk_past_bound() {
        let data = vec![1.0, 2.0];
        let input = LseInput::new(&data, 1, 2).unwrap();
        let arrival = PhaseCounter::new(1);
        let mut dst = vec![0.0f32; 2];

        HostTransferEngine.async_load(
            &mut dst,
            &input,
            TileCoord::chunk(3),
            &arrival,
            f32::NEG_INFINITY,
        );

        assert!(dst.iter().all(|v| *v == f32::NEG_INFINITY));
    }

    #[test]
    fn test_load_with_row_offset() {
        let data = vec![1.0, 2.0, 3.0];
        let input = LseInput::new(&data, 1, 3).unwrap();
        let arrival = PhaseCounter::new(1);
        let mut dst = vec![0.0f32; 2];

        HostTransferEngine.async_load(
            &mut dst,
            &input,
            TileCoord { chunk: 0, row: 2 },
            &arrival,
            -1.0,
        );

        assert_eq!(dst, vec![3.0, -1.0]);
    }
}
