//! Input and output descriptors.
//!
//! The input is a borrowed `[num_chunks, rows]` array of partial LSE values,
//! row-major per chunk. The output is a `[rows]` vector that every row may be
//! stored to exactly once per kernel invocation.

use crate::error::{LseError, Result};

/// Partial LSE values, one per `(chunk, row)`.
#[derive(Debug, Clone, Copy)]
pub struct LseInput<'a> {
    data: &'a [f32],
    num_chunks: usize,
    rows: usize,
}

impl<'a> LseInput<'a> {
    /// Wrap a row-major `[num_chunks, rows]` slice.
    ///
    /// # Errors
    ///
    /// Returns [`LseError::ShapeMismatch`] if `data.len() != num_chunks * rows`,
    /// or [`LseError::InvalidConfig`] if that product overflows `usize`.
    pub fn new(data: &'a [f32], num_chunks: usize, rows: usize) -> Result<Self> {
        let expected = num_chunks.checked_mul(rows).ok_or_else(|| {
            LseError::InvalidConfig(format!(
                "[{}, {}] partials overflow the address space",
                num_chunks, rows
            ))
        })?;
        if data.len() != expected {
            return Err(LseError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            num_chunks,
            rows,
        })
    }

    /// Number of chunks to combine.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Logical row count.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Logical shape `[num_chunks, rows]`.
    pub fn shape(&self) -> [usize; 2] {
        [self.num_chunks, self.rows]
    }

    /// Value at `(chunk, row)`, or `None` outside the logical bounds.
    #[inline]
    pub fn get(&self, chunk: usize, row: usize) -> Option<f32> {
        if chunk < self.num_chunks && row < self.rows {
            Some(self.data[chunk * self.rows + row])
        } else {
            None
        }
    }

    /// All rows of one chunk, or `None` past the last chunk.
    pub fn chunk(&self, chunk: usize) -> Option<&'a [f32]> {
        if chunk < self.num_chunks {
            let start = chunk * self.rows;
            Some(&self.data[start..start + self.rows])
        } else {
            None
        }
    }
}

/// Final values for a set of rows, stored in one combined write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    rows: Vec<usize>,
    values: Vec<f32>,
}

impl RowBatch {
    /// Create an empty batch with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append the final value of `row`.
    pub fn push(&mut self, row: usize, value: f32) {
        self.rows.push(row);
        self.values.push(value);
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate `(row, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.rows.iter().copied().zip(self.values.iter().copied())
    }

    /// Merge another batch into this one.
    pub fn extend(&mut self, other: RowBatch) {
        self.rows.extend(other.rows);
        self.values.extend(other.values);
    }
}

/// Write-once output vector of final LSE values.
#[derive(Debug, Clone)]
pub struct LseOutput {
    values: Vec<f32>,
    writes: Vec<u32>,
}

impl LseOutput {
    /// Allocate an output of `rows` rows. Unwritten rows read as `NaN`.
    pub fn new(rows: usize) -> Self {
        Self {
            values: vec![f32::NAN; rows],
            writes: vec![0; rows],
        }
    }

    /// Logical row count.
    pub fn rows(&self) -> usize {
        self.values.len()
    }

    /// Store every row of `batch`, touching no other row.
    ///
    /// The whole batch is checked before anything is written, so a rejected
    /// batch leaves the output untouched.
    pub fn store(&mut self, batch: &RowBatch) -> Result<()> {
        let rows = self.rows();
        let mut sorted = batch.rows.clone();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(LseError::RowWrittenTwice(pair[0]));
        }
        for &row in &sorted {
            if row >= rows {
                return Err(LseError::RowOutOfBounds { row, rows });
            }
            if self.writes[row] > 0 {
                return Err(LseError::RowWrittenTwice(row));
            }
        }

        for (row, value) in batch.iter() {
            self.values[row] = value;
            self.writes[row] += 1;
        }
        Ok(())
    }

    /// Final values, indexed by row.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// How many times each row has been stored.
    pub fn write_counts(&self) -> &[u32] {
        &self.writes
    }

    /// True once every row has been stored exactly once.
    pub fn is_complete(&self) -> bool {
        self.writes.iter().all(|&w| w == 1)
    }

    /// Consume the descriptor, returning the values.
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_shape_checked() {
        let data = vec![0.0f32; 6];
        assert!(LseInput::new(&data, 2, 3).is_ok());
        assert!(matches!(
            LseInput::new(&data, 2, 4),
            Err(LseError::ShapeMismatch { expected: 8, actual: 6 })
        ));
    }

    #[test]
    fn test_input_shape_overflow_rejected() {
        let huge = usize::MAX / 2 + 1;
        assert!(matches!(
            LseInput::new(&[], huge, 2),
            Err(LseError::InvalidConfig(_))
        ));
        assert!(matches!(
            LseInput::new(&[], 2, huge),
            Err(LseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_input_get_bounds() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let input = LseInput::new(&data, 2, 3).unwrap();
        assert_eq!(input.get(1, 0), Some(4.0));
        assert_eq!(input.get(0, 3), None);
        assert_eq!(input.get(2, 0), None);
        assert_eq!(input.chunk(1), Some(&data[3..6]));
        assert_eq!(input.chunk(2), None);
    }

    #[test]
    fn test_store_is_row_scoped() {
        let mut out = LseOutput::new(4);

        let mut first = RowBatch::default();
        first.push(1, 0.5);
        out.store(&first).unwrap();

        let mut second = RowBatch::default();
        second.push(0, 1.5);
        second.push(3, 2.5);
        out.store(&second).unwrap();

        let values = out.as_slice();
        assert_eq!(values[0], 1.5);
        assert_eq!(values[1], 0.5);
        assert!(values[2].is_nan());
        assert_eq!(values[3], 2.5);
        assert_eq!(out.write_counts(), &[1, 1, 0, 1]);
        assert!(!out.is_complete());
    }

    #[test]
    fn test_store_rejects_rewrite_and_out_of_bounds() {
        let mut out = LseOutput::new(2);
        let mut batch = RowBatch::default();
        batch.push(0, 1.0);
        out.store(&batch).unwrap();
        assert!(matches!(out.store(&batch), Err(LseError::RowWrittenTwice(0))));

        let mut far = RowBatch::default();
        far.push(2, 1.0);
        assert!(matches!(
            out.store(&far),
            Err(LseError::RowOutOfBounds { row: 2, rows: 2 })
        ));
        assert_eq!(out.write_counts(), &[1, 0]);
    }
}
