use tracing::warn;

use crate::error::{RecError, Result};

/// Rows whose norm differs from one by more than this are renormalized.
pub const NORM_TOLERANCE: f32 = 1e-6;

/// Dense row-major `rows x dims` matrix of `f32` embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dims: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn from_flat(rows: usize, dims: usize, data: Vec<f32>) -> Result<Self> {
        if rows.checked_mul(dims) != Some(data.len()) {
            return Err(RecError::DimensionMismatch(format!(
                "expected {rows}x{dims} values, got {}",
                data.len()
            )));
        }
        Ok(Self { rows, dims, data })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dims = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dims);
        for (index, row) in rows.iter().enumerate() {
            if row.len() != dims {
                return Err(RecError::DimensionMismatch(format!(
                    "row {index} has {} values, expected {dims}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            dims,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on zero; a zero-width matrix has no meaningful rows anyway
        self.data.chunks_exact(self.dims.max(1)).take(self.rows)
    }

    /// Dot product of every row with `query`.
    pub fn dot_all(&self, query: &[f32]) -> Vec<f32> {
        self.iter_rows().map(|row| dot(row, query)).collect()
    }

    pub fn is_normalized(&self) -> bool {
        self.iter_rows().all(|row| {
            let norm = l2_norm(row);
            norm == 0.0 || (norm - 1.0).abs() <= NORM_TOLERANCE
        })
    }

    /// Scales every row to unit L2 norm and returns how many rows were touched.
    /// All-zero rows cannot be normalized and are left as they are.
    pub fn normalize_rows(&mut self) -> usize {
        let dims = self.dims.max(1);
        let mut touched = 0;
        let mut zero_rows = 0;
        for row in self.data.chunks_exact_mut(dims) {
            let norm = l2_norm(row);
            if norm == 0.0 {
                zero_rows += 1;
                continue;
            }
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                normalize(row, norm);
                touched += 1;
            }
        }
        if zero_rows > 0 {
            warn!(zero_rows, "embedding matrix contains all-zero rows");
        }
        touched
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    // accumulate in f64 so long rows do not drift past the tolerance
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt() as f32
}

fn normalize(vector: &mut [f32], norm: f32) {
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
