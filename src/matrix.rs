//! The public combine matrix `M` used by key derivation (C7): a process-wide `(sc-1) × n × n`
//! array of field elements that every party can derive independently, with the property that the
//! the shares produced from any subset of `mks` (size `n-t`) dealers remain a valid sharing of a
//! fresh combined secret.
//!
//! No single teacher file grounds this module — the spec explicitly treats `M` as an externally
//! supplied "super-invertible or hyper-invertible matrix" (§3) without mandating a construction.
//! This crate uses the standard MPC technique for building such a matrix without any setup
//! ceremony: a Cauchy matrix `M[i][j] = 1/(α_i - β_j)` over pairwise-distinct field elements,
//! which is well known to have every square submatrix invertible (see e.g. the hyper-invertible
//! matrix constructions in Beerliová-Hirt/Damgård-Nielsen-style MPC protocols). `α`/`β` here are
//! plain small-integer field elements offset per slot `s`, so distinctness (and hence
//! well-definedness of every `1/(α_i - β_j)`) holds by construction rather than by a
//! collision-probability argument.

use crate::group::{FieldElement, Scalar};

/// Builds the single `n × n` Cauchy matrix for combiner slot `s`.
fn build_matrix(s: usize, n: usize) -> Vec<Vec<Scalar>> {
    let base = (s as u64) * 2 * (n as u64);
    let alphas: Vec<Scalar> = (0..n).map(|i| Scalar::from_u64(base + i as u64 + 1)).collect();
    let betas: Vec<Scalar> = (0..n).map(|j| Scalar::from_u64(base + n as u64 + j as u64 + 1)).collect();

    alphas
        .iter()
        .map(|alpha| {
            betas
                .iter()
                .map(|beta| (*alpha - *beta).invert().expect("alpha and beta are pairwise distinct by construction"))
                .collect()
        })
        .collect()
}

/// Builds the full `(sc-1) × n × n` matrix array.
pub fn build_matrices(sc_minus_one: usize, n: usize) -> Vec<Vec<Vec<Scalar>>> {
    (0..sc_minus_one).map(|s| build_matrix(s, n)).collect()
}

/// `⟨row, values⟩ = Σ_j row[j] * values[j]`.
pub fn inner_product(row: &[Scalar], values: &[Scalar]) -> Scalar {
    assert_eq!(row.len(), values.len());
    row.iter().zip(values.iter()).map(|(a, b)| *a * *b).fold(Scalar::zero(), |acc, x| acc + x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrices_are_deterministic_and_well_defined() {
        let n = 5;
        let m1 = build_matrices(2, n);
        let m2 = build_matrices(2, n);
        assert_eq!(m1, m2);
        assert_eq!(m1.len(), 2);
        for slot in &m1 {
            assert_eq!(slot.len(), n);
            for row in slot {
                assert_eq!(row.len(), n);
            }
        }
    }

    #[test]
    fn distinct_slots_produce_distinct_matrices() {
        let n = 4;
        let m = build_matrices(2, n);
        assert_ne!(m[0], m[1]);
    }

    #[test]
    fn inner_product_matches_direct_sum() {
        let row = vec![Scalar::from_u64(1), Scalar::from_u64(2), Scalar::from_u64(3)];
        let values = vec![Scalar::from_u64(10), Scalar::from_u64(20), Scalar::from_u64(30)];
        assert_eq!(inner_product(&row, &values), Scalar::from_u64(1 * 10 + 2 * 20 + 3 * 30));
    }
}
