//! Systematic Reed-Solomon erasure codec over GF(2^8).
//!
//! A block is `k` source shards followed by `m` repair shards. Repair shard
//! `i` is the Vandermonde combination `sum_j g^(i*j) * source_j`, so repair
//! row 0 is plain XOR parity and rows stay independent for small `m`.
//! Decoding solves the erasures by Gaussian elimination over the received
//! equations; a singular system reports failure, never panics.

use super::gf256;

/// Reed-Solomon block codec with fixed geometry.
#[derive(Debug, Clone, Copy)]
pub struct ReedSolomon8 {
    // ---
    k: usize,
    m: usize,
}

impl ReedSolomon8 {
    // ---
    /// Creates a codec for `k` source and `m` repair shards.
    ///
    /// Geometry is validated at config time; this constructor only guards
    /// the field-size invariant.
    pub fn new(k: usize, m: usize) -> Option<Self> {
        // ---
        if k == 0 || m == 0 || k + m > 255 {
            return None;
        }
        Some(Self { k, m })
    }

    fn coef(&self, repair_row: usize, source_col: usize) -> u8 {
        // ---
        gf256::exp(repair_row * source_col)
    }

    /// Encodes `m` repair shards from `k` equally sized source shards.
    ///
    /// Used by the sender side of tests; the receiver only decodes.
    pub fn encode(&self, source: &[&[u8]]) -> Vec<Vec<u8>> {
        // ---
        assert_eq!(source.len(), self.k, "encode expects k source shards");
        let len = source.first().map_or(0, |s| s.len());

        (0..self.m)
            .map(|row| {
                let mut repair = vec![0u8; len];
                for (col, shard) in source.iter().enumerate() {
                    gf256::addmul_slice(&mut repair, shard, self.coef(row, col));
                }
                repair
            })
            .collect()
    }

    /// Fills in missing source shards in place.
    ///
    /// `shards` holds `k` source entries then `m` repair entries; `None`
    /// marks an erasure. Returns `true` when every source shard is present
    /// afterwards. Present shards must share one length.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> bool {
        // ---
        assert_eq!(shards.len(), self.k + self.m, "shard count mismatch");

        let missing: Vec<usize> = (0..self.k).filter(|&j| shards[j].is_none()).collect();
        if missing.is_empty() {
            return true;
        }

        let len = match shards.iter().flatten().map(|s| s.len()).next() {
            Some(len) if shards.iter().flatten().all(|s| s.len() == len) => len,
            _ => return false,
        };

        // One equation per received repair shard: rhs starts as the repair
        // bytes minus the contribution of every known source shard.
        let mut rows: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for row in 0..self.m {
            let repair = match &shards[self.k + row] {
                Some(r) => r,
                None => continue,
            };

            let mut rhs = repair.clone();
            for col in 0..self.k {
                if let Some(src) = &shards[col] {
                    gf256::addmul_slice(&mut rhs, src, self.coef(row, col));
                }
            }

            let coefs = missing.iter().map(|&j| self.coef(row, j)).collect();
            rows.push((coefs, rhs));
        }

        if rows.len() < missing.len() {
            return false;
        }

        // Gauss-Jordan over the missing columns.
        let n = missing.len();
        for col in 0..n {
            let pivot = match (col..rows.len()).find(|&r| rows[r].0[col] != 0) {
                Some(p) => p,
                None => return false,
            };
            rows.swap(col, pivot);

            let inv = gf256::inv(rows[col].0[col]);
            gf256::scale_slice(&mut rows[col].0, inv);
            gf256::scale_slice(&mut rows[col].1, inv);

            for r in 0..rows.len() {
                if r == col || rows[r].0[col] == 0 {
                    continue;
                }
                let factor = rows[r].0[col];
                let (pivot_coefs, pivot_rhs) = (rows[col].0.clone(), rows[col].1.clone());
                gf256::addmul_slice(&mut rows[r].0, &pivot_coefs, factor);
                gf256::addmul_slice(&mut rows[r].1, &pivot_rhs, factor);
            }
        }

        for (idx, &j) in missing.iter().enumerate() {
            debug_assert_eq!(rows[idx].1.len(), len);
            shards[j] = Some(std::mem::take(&mut rows[idx].1));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn make_source(k: usize, len: usize) -> Vec<Vec<u8>> {
        // ---
        (0..k)
            .map(|i| (0..len).map(|b| (i * 37 + b * 11 + 1) as u8).collect())
            .collect()
    }

    fn shard_set(source: &[Vec<u8>], repair: &[Vec<u8>]) -> Vec<Option<Vec<u8>>> {
        // ---
        source
            .iter()
            .chain(repair.iter())
            .map(|s| Some(s.clone()))
            .collect()
    }

    #[test]
    fn repair_row_zero_is_xor_parity() {
        // ---
        let codec = ReedSolomon8::new(4, 1).unwrap();
        let source = make_source(4, 16);
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        let mut xor = vec![0u8; 16];
        for s in &source {
            for (x, &b) in xor.iter_mut().zip(s.iter()) {
                *x ^= b;
            }
        }
        assert_eq!(repair[0], xor);
    }

    #[test]
    fn recovers_single_erasure() {
        // ---
        let codec = ReedSolomon8::new(8, 2).unwrap();
        let source = make_source(8, 64);
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        let mut shards = shard_set(&source, &repair);
        shards[3] = None;

        assert!(codec.reconstruct(&mut shards));
        assert_eq!(shards[3].as_deref(), Some(source[3].as_slice()));
    }

    #[test]
    fn recovers_double_erasure() {
        // ---
        let codec = ReedSolomon8::new(8, 2).unwrap();
        let source = make_source(8, 32);
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        let mut shards = shard_set(&source, &repair);
        shards[0] = None;
        shards[7] = None;

        assert!(codec.reconstruct(&mut shards));
        assert_eq!(shards[0].as_deref(), Some(source[0].as_slice()));
        assert_eq!(shards[7].as_deref(), Some(source[7].as_slice()));
    }

    #[test]
    fn recovers_with_one_repair_also_lost() {
        // ---
        let codec = ReedSolomon8::new(8, 2).unwrap();
        let source = make_source(8, 32);
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        let mut shards = shard_set(&source, &repair);
        shards[5] = None;
        shards[8] = None; // first repair gone; second must carry it

        assert!(codec.reconstruct(&mut shards));
        assert_eq!(shards[5].as_deref(), Some(source[5].as_slice()));
    }

    #[test]
    fn too_many_erasures_fail_cleanly() {
        // ---
        let codec = ReedSolomon8::new(8, 2).unwrap();
        let source = make_source(8, 32);
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        let mut shards = shard_set(&source, &repair);
        shards[1] = None;
        shards[2] = None;
        shards[3] = None;

        assert!(!codec.reconstruct(&mut shards));
    }

    #[test]
    fn nothing_missing_is_a_no_op() {
        // ---
        let codec = ReedSolomon8::new(4, 2).unwrap();
        let source = make_source(4, 8);
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        let mut shards = shard_set(&source, &repair);
        assert!(codec.reconstruct(&mut shards));
    }

    #[test]
    fn mismatched_shard_lengths_fail_cleanly() {
        // ---
        let codec = ReedSolomon8::new(2, 1).unwrap();
        let mut shards = vec![Some(vec![1, 2, 3]), None, Some(vec![4, 5])];
        assert!(!codec.reconstruct(&mut shards));
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        // ---
        assert!(ReedSolomon8::new(0, 2).is_none());
        assert!(ReedSolomon8::new(2, 0).is_none());
        assert!(ReedSolomon8::new(200, 56).is_none());
        assert!(ReedSolomon8::new(200, 55).is_some());
    }
}
