//! Feldman and Pedersen polynomial commitments over `(g, h)`.
//!
//! Mirrors the commitment/verification idiom in `client/keygen/keygen_detail.rs`
//! (`CoefficientCommitments`, `validate_commitments`) generalized from a single Feldman
//! commitment per party to the per-slot Feldman-then-Pedersen scheme ACSS uses.

use crate::group::{generator_g, generator_h, FieldElement, GroupElement, Point, Scalar};
use crate::poly::Polynomial;

/// Evaluates a vector of per-coefficient commitments `[C_0, …, C_deg]` at `x` via Horner's method
/// in the exponent: `C_0 + x·C_1 + x^2·C_2 + … = Σ C_k x^k`.
fn eval_commitment(commits: &[Point], x: Scalar) -> Point {
    let mut acc = Point::identity();
    for c in commits.iter().rev() {
        acc = acc.mul(&x) + *c;
    }
    acc
}

/// A unary Feldman commitment to a polynomial: `commits[k] = g^{a_k}`, no blinding.
pub fn feldman_commit(poly: &Polynomial) -> Vec<Point> {
    poly.coeffs().iter().map(|a| generator_g().mul(a)).collect()
}

/// Verifies that `value = phi(x)` against a Feldman commitment: `g^{phi(x)} = Σ_k commits[k]·x^k`.
pub fn feldman_verify(commits: &[Point], x: Scalar, value: Scalar) -> bool {
    generator_g().mul(&value) == eval_commitment(commits, x)
}

/// A Pedersen commitment to a pair of polynomials `(phi, phi_hat)`: `commits[k] = g^{a_k} ·
/// h^{b_k}`, hiding in addition to binding.
pub fn pedersen_commit(poly: &Polynomial, poly_hat: &Polynomial) -> Vec<Point> {
    assert_eq!(poly.coeffs().len(), poly_hat.coeffs().len());
    poly.coeffs()
        .iter()
        .zip(poly_hat.coeffs().iter())
        .map(|(a, b)| generator_g().mul(a) + generator_h().mul(b))
        .collect()
}

/// Verifies `(value, value_hat) = (phi(x), phi_hat(x))` against a Pedersen commitment:
/// `g^{phi(x)} · h^{phi_hat(x)} = Σ_k commits[k]·x^k`.
pub fn pedersen_verify(commits: &[Point], x: Scalar, value: Scalar, value_hat: Scalar) -> bool {
    generator_g().mul(&value) + generator_h().mul(&value_hat) == eval_commitment(commits, x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn feldman_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let secret = Scalar::from_u64(42);
        let phi = Polynomial::random_with_constant(2, secret, &mut rng);
        let commits = feldman_commit(&phi);

        for i in 0..5 {
            let x = Scalar::from_u64(i + 1);
            let v = phi.evaluate(x);
            assert!(feldman_verify(&commits, x, v));
            assert!(!feldman_verify(&commits, x, v + Scalar::one()));
        }
    }

    #[test]
    fn pedersen_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let phi = Polynomial::random_with_constant(3, Scalar::from_u64(7), &mut rng);
        let phi_hat = Polynomial::random_with_constant(3, Scalar::from_u64(9), &mut rng);
        let commits = pedersen_commit(&phi, &phi_hat);

        let x = Scalar::from_u64(5);
        let (v, v_hat) = (phi.evaluate(x), phi_hat.evaluate(x));
        assert!(pedersen_verify(&commits, x, v, v_hat));
        assert!(!pedersen_verify(&commits, x, v, v_hat + Scalar::one()));
        assert!(!pedersen_verify(&commits, x, v + Scalar::one(), v_hat));
    }
}
