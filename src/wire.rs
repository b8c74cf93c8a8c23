//! Fixed-width wire encoding (C2): group elements, field elements, and subset bitmaps.
//!
//! Follows this crate's own `bincode`-based `serialize_for_version` idiom
//! (`client/common/broadcast.rs`) for the bulk message framing, plus small fixed-width codecs for
//! the batches of points/scalars ACSS and key derivation need to pack densely on the wire.

use crate::group::{FieldElement, GroupElement, Point, Scalar};

pub const G_SIZE: usize = 32;
pub const F_SIZE: usize = 32;

/// A bitmap over `n` parties, packed little-endian into `ceil(n/8)` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    bits: Vec<u8>,
    n: usize,
}

impl Bitmap {
    pub fn new(n: usize) -> Self {
        Bitmap { bits: vec![0u8; n.div_ceil(8)], n }
    }

    pub fn from_indices(n: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bm = Bitmap::new(n);
        for i in indices {
            bm.set(i);
        }
        bm
    }

    pub fn set(&mut self, i: usize) {
        assert!(i < self.n);
        self.bits[i / 8] |= 1 << (i % 8);
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.n);
        (self.bits[i / 8] >> (i % 8)) & 1 == 1
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn count(&self) -> usize {
        (0..self.n).filter(|&i| self.get(i)).count()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n).filter(|&i| self.get(i))
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn from_bytes(n: usize, bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), n.div_ceil(8));
        Bitmap { bits: bytes.to_vec(), n }
    }
}

pub fn serialize_points(points: &[Point]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * G_SIZE);
    for p in points {
        out.extend_from_slice(&p.to_bytes());
    }
    out
}

pub fn deserialize_points(bytes: &[u8], count: usize) -> Option<Vec<Point>> {
    if bytes.len() != count * G_SIZE {
        return None;
    }
    bytes
        .chunks_exact(G_SIZE)
        .map(|chunk| Point::from_bytes(chunk.try_into().unwrap()))
        .collect()
}

pub fn serialize_scalars(scalars: &[Scalar]) -> Vec<u8> {
    let mut out = Vec::with_capacity(scalars.len() * F_SIZE);
    for s in scalars {
        out.extend_from_slice(&s.to_bytes());
    }
    out
}

pub fn deserialize_scalars(bytes: &[u8], count: usize) -> Option<Vec<Scalar>> {
    use crate::group::FieldElement;
    if bytes.len() != count * F_SIZE {
        return None;
    }
    Some(
        bytes
            .chunks_exact(F_SIZE)
            .map(|chunk| Scalar::from_bytes_mod_order(chunk.try_into().unwrap()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::FieldElement;

    #[test]
    fn bitmap_round_trips_via_bytes() {
        let bm = Bitmap::from_indices(10, [0, 3, 9]);
        let bytes = bm.to_bytes().to_vec();
        let bm2 = Bitmap::from_bytes(10, &bytes);
        assert_eq!(bm, bm2);
        assert_eq!(bm2.indices().collect::<Vec<_>>(), vec![0, 3, 9]);
        assert_eq!(bm2.count(), 3);
    }

    #[test]
    fn point_and_scalar_batches_round_trip() {
        let mut rng = rand::thread_rng();
        let scalars: Vec<Scalar> = (0..4).map(|_| Scalar::random(&mut rng)).collect();
        let points: Vec<Point> = scalars.iter().map(|s| crate::group::generator_g().mul(s)).collect();

        let sbytes = serialize_scalars(&scalars);
        assert_eq!(deserialize_scalars(&sbytes, 4).unwrap(), scalars);

        let pbytes = serialize_points(&points);
        assert_eq!(deserialize_points(&pbytes, 4).unwrap(), points);
    }
}
