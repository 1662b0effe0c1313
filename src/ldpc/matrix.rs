//! Sparse binary matrices in CSR form with GF(2) arithmetic. The decoder
//! only needs row iteration and elementwise parity sums, so values are
//! implicit: every stored index is a 1.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SparseBinaryMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
}

impl SparseBinaryMatrix {
    /// Build from per-row column index lists. Indices within a row must be
    /// unique; order is normalized to ascending.
    pub fn from_rows(row_lists: Vec<Vec<u32>>, cols: usize) -> Self {
        let rows = row_lists.len();
        let mut indptr = Vec::with_capacity(rows + 1);
        let mut indices = Vec::new();
        indptr.push(0);
        for mut row in row_lists {
            row.sort_unstable();
            debug_assert!(row.windows(2).all(|w| w[0] != w[1]));
            debug_assert!(row.last().map_or(true, |&c| (c as usize) < cols));
            indices.extend_from_slice(&row);
            indptr.push(indices.len());
        }
        Self {
            rows,
            cols,
            indptr,
            indices,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn density(&self) -> f64 {
        if self.rows == 0 || self.cols == 0 {
            0.0
        } else {
            self.nnz() as f64 / (self.rows * self.cols) as f64
        }
    }

    /// Column indices of the 1-entries in row `i`.
    pub fn row(&self, i: usize) -> &[u32] {
        &self.indices[self.indptr[i]..self.indptr[i + 1]]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[u32]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    /// Number of 1-entries per column.
    pub fn column_weights(&self) -> Vec<u32> {
        let mut weights = vec![0u32; self.cols];
        for &idx in &self.indices {
            weights[idx as usize] += 1;
        }
        weights
    }

    /// GF(2) matrix-vector product: `out[i]` is the parity of `x` over the
    /// 1-positions of row `i`.
    pub fn mul_vec(&self, x: &[u8]) -> Vec<u8> {
        assert_eq!(x.len(), self.cols);
        let mut out = vec![0u8; self.rows];
        for (i, row) in self.iter_rows().enumerate() {
            let mut parity = 0u8;
            for &j in row {
                parity ^= x[j as usize] & 1;
            }
            out[i] = parity;
        }
        out
    }

    /// Parity of `x` over a single row without materializing the product.
    pub fn row_parity(&self, i: usize, x: &[u8]) -> u8 {
        let mut parity = 0u8;
        for &j in self.row(i) {
            parity ^= x[j as usize] & 1;
        }
        parity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_layout_round_trip() {
        let m = SparseBinaryMatrix::from_rows(vec![vec![2, 0], vec![1], vec![]], 3);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.row(0), &[0, 2]);
        assert_eq!(m.row(1), &[1]);
        assert_eq!(m.row(2), &[] as &[u32]);
        assert_eq!(m.column_weights(), vec![1, 1, 1]);
    }

    #[test]
    fn gf2_mat_vec_product() {
        // H = [1 1 0; 0 1 1]
        let h = SparseBinaryMatrix::from_rows(vec![vec![0, 1], vec![1, 2]], 3);
        assert_eq!(h.mul_vec(&[1, 1, 0]), vec![0, 1]);
        assert_eq!(h.mul_vec(&[1, 0, 1]), vec![1, 1]);
        assert_eq!(h.mul_vec(&[0, 0, 0]), vec![0, 0]);
        assert_eq!(h.row_parity(1, &[1, 0, 1]), 1);
    }
}
