//! LDPC code construction and the bounded matrix cache.
//!
//! The parity-check matrix H is a row-regular random sparse matrix. The
//! generator G is derived from H by GF(2) Gaussian elimination: a column
//! permutation moves the pivot columns to the back so that G = [I_k | Aᵀ] is
//! systematic and `H · Gᵀ = 0` holds exactly. Construction is deterministic
//! in the code parameters, so both ends of the link derive identical
//! matrices from the shared (rate, block length) pair.

use crate::config::LdpcConfig;
use crate::error::CodecError;
use crate::ldpc::matrix::SparseBinaryMatrix;
use crate::telemetry;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Cache holds at most this many (G, H) pairs; eviction is LRU.
pub const MATRIX_CACHE_CAP: usize = 5;

const GENERATION_ATTEMPTS: usize = 32;

/// Active LDPC code parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CodeParameters {
    /// k/n, strictly between 0 and 1.
    pub code_rate: f64,
    /// Codeword length n in bits.
    pub block_length: usize,
    pub max_iterations: usize,
    pub syndrome_threshold: f64,
}

impl CodeParameters {
    pub fn new(code_rate: f64, block_length: usize) -> Self {
        Self {
            code_rate,
            block_length,
            max_iterations: 50,
            syndrome_threshold: 1e-6,
        }
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if !(self.code_rate > 0.0 && self.code_rate < 1.0) {
            return Err(CodecError::InvalidInput(
                "code_rate must be between 0 and 1".into(),
            ));
        }
        if self.block_length == 0 {
            return Err(CodecError::InvalidInput(
                "block_length must be positive".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(CodecError::InvalidInput(
                "max_iterations must be positive".into(),
            ));
        }
        if self.info_bits() == 0 || self.parity_bits() == 0 {
            return Err(CodecError::InvalidInput(
                "code leaves no information or parity bits".into(),
            ));
        }
        Ok(())
    }

    /// Information bits per block: k = ⌊n · rate⌋.
    pub fn info_bits(&self) -> usize {
        (self.block_length as f64 * self.code_rate).floor() as usize
    }

    pub fn parity_bits(&self) -> usize {
        self.block_length - self.info_bits()
    }
}

impl From<&LdpcConfig> for CodeParameters {
    fn from(config: &LdpcConfig) -> Self {
        Self {
            code_rate: config.code_rate,
            block_length: config.block_length,
            max_iterations: config.max_iterations,
            syndrome_threshold: config.syndrome_threshold,
        }
    }
}

/// A generator/parity-check pair for one (rate, block length) key.
/// Read-only after construction and shared behind an `Arc`.
#[derive(Debug)]
pub struct LdpcMatrices {
    pub generator: SparseBinaryMatrix,
    pub parity_check: SparseBinaryMatrix,
    pub info_bits: usize,
    pub block_length: usize,
}

/// Dense bit vector backing the elimination; one u64 word per 64 columns.
#[derive(Clone)]
struct BitRow {
    words: Vec<u64>,
}

impl BitRow {
    fn from_indices(indices: &[u32], bits: usize) -> Self {
        let mut words = vec![0u64; (bits + 63) / 64];
        for &i in indices {
            words[i as usize / 64] |= 1u64 << (i as usize % 64);
        }
        Self { words }
    }

    fn get(&self, i: usize) -> bool {
        self.words[i / 64] >> (i % 64) & 1 == 1
    }

    fn xor_assign(&mut self, other: &BitRow) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a ^= b;
        }
    }
}

fn construction_seed(params: &CodeParameters) -> u64 {
    params
        .code_rate
        .to_bits()
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ params.block_length as u64
}

/// Per-row neighbor count: max(3, ⌊√n / 2⌋), clamped to the column count.
fn row_weight(n: usize) -> usize {
    let weight = ((n as f64).sqrt() / 2.0) as usize;
    weight.max(3).min(n)
}

/// Build (G, H) for the given parameters, failing before allocation when the
/// dense working-set estimate exceeds `memory_limit` bytes.
pub fn generate_matrices(
    params: &CodeParameters,
    memory_limit: usize,
) -> Result<LdpcMatrices, CodecError> {
    params.validate()?;
    let n = params.block_length;
    let k = params.info_bits();
    let m = params.parity_bits();

    let required = 8 * (n * k + n * m);
    if required > memory_limit {
        return Err(CodecError::OutOfBudget {
            required,
            limit: memory_limit,
        });
    }

    let started = Instant::now();
    let weight = row_weight(n);
    let mut rng = StdRng::seed_from_u64(construction_seed(params));

    for attempt in 1..=GENERATION_ATTEMPTS {
        let h_rows: Vec<Vec<u32>> = (0..m)
            .map(|_| {
                rand::seq::index::sample(&mut rng, n, weight)
                    .into_iter()
                    .map(|c| c as u32)
                    .collect()
            })
            .collect();

        match systematize(&h_rows, n, k, m) {
            Some(matrices) => {
                telemetry::MATRIX_GENERATIONS.inc();
                let zero_cols = matrices
                    .parity_check
                    .column_weights()
                    .iter()
                    .filter(|&&w| w == 0)
                    .count();
                if zero_cols > 0 {
                    warn!("{} codeword positions unprotected by any check", zero_cols);
                }
                info!(
                    "generated LDPC matrices H({}x{}) G({}x{}), H density {:.4}, in {:?}",
                    m,
                    n,
                    k,
                    n,
                    matrices.parity_check.density(),
                    started.elapsed()
                );
                return Ok(matrices);
            }
            None => {
                debug!(
                    "rank-deficient parity draw for n={} rate={} (attempt {})",
                    n, params.code_rate, attempt
                );
            }
        }
    }
    Err(CodecError::Generation(format!(
        "no full-rank parity matrix after {} attempts (n={}, rate={})",
        GENERATION_ATTEMPTS, n, params.code_rate
    )))
}

/// Gaussian elimination over GF(2). Returns the permuted sparse H together
/// with the systematic G, or `None` when the draw is rank deficient.
fn systematize(h_rows: &[Vec<u32>], n: usize, k: usize, m: usize) -> Option<LdpcMatrices> {
    let mut reduced: Vec<BitRow> = h_rows
        .iter()
        .map(|row| BitRow::from_indices(row, n))
        .collect();

    let mut pivot_cols: Vec<usize> = Vec::with_capacity(m);
    let mut is_pivot = vec![false; n];
    let mut rank = 0;
    for col in 0..n {
        if rank == m {
            break;
        }
        let Some(sel) = (rank..m).find(|&i| reduced[i].get(col)) else {
            continue;
        };
        reduced.swap(rank, sel);
        let pivot_row = reduced[rank].clone();
        for (i, row) in reduced.iter_mut().enumerate() {
            if i != rank && row.get(col) {
                row.xor_assign(&pivot_row);
            }
        }
        pivot_cols.push(col);
        is_pivot[col] = true;
        rank += 1;
    }
    if rank < m {
        return None;
    }

    // Permutation: information (non-pivot) columns first, pivot columns last.
    let info_cols: Vec<usize> = (0..n).filter(|&c| !is_pivot[c]).collect();
    debug_assert_eq!(info_cols.len(), k);
    let mut position = vec![0u32; n];
    for (i, &c) in info_cols.iter().enumerate() {
        position[c] = i as u32;
    }
    for (r, &c) in pivot_cols.iter().enumerate() {
        position[c] = (k + r) as u32;
    }

    let permuted_h: Vec<Vec<u32>> = h_rows
        .iter()
        .map(|row| row.iter().map(|&c| position[c as usize]).collect())
        .collect();

    // G = [I_k | Aᵀ]: parity r participates in information bit i exactly when
    // the reduced row r covers that information column.
    let g_rows: Vec<Vec<u32>> = (0..k)
        .map(|i| {
            let original_col = info_cols[i];
            let mut row = vec![i as u32];
            for (r, reduced_row) in reduced.iter().enumerate() {
                if reduced_row.get(original_col) {
                    row.push((k + r) as u32);
                }
            }
            row
        })
        .collect();

    Some(LdpcMatrices {
        generator: SparseBinaryMatrix::from_rows(g_rows, n),
        parity_check: SparseBinaryMatrix::from_rows(permuted_h, n),
        info_bits: k,
        block_length: n,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    rate_bits: u64,
    block_length: usize,
}

impl CacheKey {
    fn of(params: &CodeParameters) -> Self {
        Self {
            rate_bits: params.code_rate.to_bits(),
            block_length: params.block_length,
        }
    }
}

struct CacheSlot {
    matrices: Arc<LdpcMatrices>,
    last_access: Instant,
}

/// Bounded LRU cache of constructed (G, H) pairs, keyed by (rate, length).
pub struct MatrixCache {
    entries: HashMap<CacheKey, CacheSlot>,
    memory_limit: usize,
}

impl MatrixCache {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            memory_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Drop every cached pair, forcing regeneration on next use.
    pub fn invalidate(&mut self) {
        self.entries.clear();
        telemetry::MATRIX_CACHE_ENTRIES.set(0);
    }

    fn lookup(&mut self, params: &CodeParameters) -> Option<Arc<LdpcMatrices>> {
        let slot = self.entries.get_mut(&CacheKey::of(params))?;
        slot.last_access = Instant::now();
        Some(Arc::clone(&slot.matrices))
    }

    fn store(&mut self, params: &CodeParameters, matrices: Arc<LdpcMatrices>) {
        if self.entries.len() >= MATRIX_CACHE_CAP {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| *key)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            CacheKey::of(params),
            CacheSlot {
                matrices,
                last_access: Instant::now(),
            },
        );
        telemetry::MATRIX_CACHE_ENTRIES.set(self.entries.len() as i64);
    }
}

/// Fetch matrices for `params`, generating on a miss. The cache mutex is
/// never held across generation: the handle is cloned out, the lock released,
/// and the finished pair stored afterwards.
pub fn fetch_matrices(
    cache: &Mutex<MatrixCache>,
    params: &CodeParameters,
) -> Result<Arc<LdpcMatrices>, CodecError> {
    let (hit, limit) = {
        let mut cache = cache.lock().unwrap();
        (cache.lookup(params), cache.memory_limit())
    };
    if let Some(matrices) = hit {
        return Ok(matrices);
    }
    let matrices = Arc::new(generate_matrices(params, limit)?);
    cache.lock().unwrap().store(params, Arc::clone(&matrices));
    Ok(matrices)
}
