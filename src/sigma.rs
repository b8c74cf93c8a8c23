//! Sigma protocols: Schnorr proof-of-knowledge of a discrete log, and a Chaum–Pedersen proof that
//! two discrete logs (w.r.t. independent generators) are equal.
//!
//! Challenge derivation binds every public input, following the same pattern as this crate's
//! `generate_dkg_challenge`/`generate_zkp_of_secret` (`client/keygen/keygen_detail.rs`), just
//! generalized from the single fixed generator used there to the `b ∈ {g, h}` parameter the ADKG
//! key-derivation phase needs.

use crate::group::{FieldElement, GroupElement, Point, Scalar};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// A Schnorr proof of knowledge of `alpha` such that `y = base^alpha`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrProof {
    pub e: Scalar,
    pub z: Scalar,
}

fn schnorr_challenge(base: &Point, y: &Point, a: &Point) -> Scalar {
    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(&base.to_bytes());
    buf.extend_from_slice(&y.to_bytes());
    buf.extend_from_slice(&a.to_bytes());
    Scalar::hash(&buf)
}

/// Proves knowledge of `alpha` for `y = base^alpha`.
pub fn prove_schnorr(
    base: &Point,
    y: &Point,
    alpha: &Scalar,
    rng: &mut (impl RngCore + CryptoRng),
) -> SchnorrProof {
    let w = Scalar::random(rng);
    let a = base.mul(&w);
    let e = schnorr_challenge(base, y, &a);
    let z = w - e * *alpha;
    SchnorrProof { e, z }
}

/// Verifies a Schnorr proof: recomputes `a' = y^e · base^z` and checks `H(base ‖ y ‖ a') = e`.
pub fn verify_schnorr(base: &Point, y: &Point, proof: &SchnorrProof) -> bool {
    let a_prime = y.mul(&proof.e) + base.mul(&proof.z);
    schnorr_challenge(base, y, &a_prime) == proof.e
}

/// A Chaum–Pedersen DLEQ proof that `x = g^alpha` and `y = h^alpha` share the same exponent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DleqProof {
    pub e: Scalar,
    pub z: Scalar,
}

fn dleq_challenge(x: &Point, y: &Point, a1: &Point, a2: &Point) -> Scalar {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(&x.to_bytes());
    buf.extend_from_slice(&y.to_bytes());
    buf.extend_from_slice(&a1.to_bytes());
    buf.extend_from_slice(&a2.to_bytes());
    Scalar::hash(&buf)
}

/// Proves that `x = g^alpha` and `y = h^alpha` for the same `alpha`, without revealing it.
pub fn prove_dleq(
    g: &Point,
    h: &Point,
    x: &Point,
    y: &Point,
    alpha: &Scalar,
    rng: &mut (impl RngCore + CryptoRng),
) -> DleqProof {
    let w = Scalar::random(rng);
    let a1 = g.mul(&w);
    let a2 = h.mul(&w);
    let e = dleq_challenge(x, y, &a1, &a2);
    let z = w - e * *alpha;
    DleqProof { e, z }
}

/// Verifies a DLEQ proof by recomputing `a1' = x^e · g^z`, `a2' = y^e · h^z`.
pub fn verify_dleq(g: &Point, h: &Point, x: &Point, y: &Point, proof: &DleqProof) -> bool {
    let a1_prime = x.mul(&proof.e) + g.mul(&proof.z);
    let a2_prime = y.mul(&proof.e) + h.mul(&proof.z);
    dleq_challenge(x, y, &a1_prime, &a2_prime) == proof.e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{generator_g, generator_h};

    #[test]
    fn schnorr_accepts_honest_proof() {
        let mut rng = rand::thread_rng();
        let g = generator_g();
        let alpha = Scalar::from_u64(7);
        let y = g.mul(&alpha);
        let proof = prove_schnorr(&g, &y, &alpha, &mut rng);
        assert!(verify_schnorr(&g, &y, &proof));
    }

    #[test]
    fn schnorr_rejects_tampered_response() {
        let mut rng = rand::thread_rng();
        let g = generator_g();
        let alpha = Scalar::from_u64(7);
        let y = g.mul(&alpha);
        let mut proof = prove_schnorr(&g, &y, &alpha, &mut rng);
        proof.z = proof.z + Scalar::one();
        assert!(!verify_schnorr(&g, &y, &proof));
    }

    #[test]
    fn schnorr_rejects_wrong_witness() {
        let mut rng = rand::thread_rng();
        let g = generator_g();
        let alpha = Scalar::from_u64(7);
        let wrong = Scalar::from_u64(8);
        let y = g.mul(&wrong);
        let proof = prove_schnorr(&g, &y, &alpha, &mut rng);
        assert!(!verify_schnorr(&g, &y, &proof));
    }

    #[test]
    fn dleq_accepts_honest_proof_and_rejects_mismatched_exponents() {
        let mut rng = rand::thread_rng();
        let g = generator_g();
        let h = generator_h();
        let alpha = Scalar::from_u64(123);
        let x = g.mul(&alpha);
        let y = h.mul(&alpha);
        let proof = prove_dleq(&g, &h, &x, &y, &alpha, &mut rng);
        assert!(verify_dleq(&g, &h, &x, &y, &proof));

        let other = Scalar::from_u64(124);
        let y_bad = h.mul(&other);
        let proof_bad = prove_dleq(&g, &h, &x, &y_bad, &alpha, &mut rng);
        assert!(!verify_dleq(&g, &h, &x, &y_bad, &proof_bad));
    }
}
