//! The `(k, n)` erasure codec (C1) used beneath every RBC instance.
//!
//! The padding scheme is taken byte-for-byte from `original_source/adkg/broadcast/qrbc.py`'s
//! `encode`/`decode` (itself wrapping `zfec`): append `padlen = k - (|m| mod k)` copies of the
//! byte `k - padlen`, so that on decode the padding length is recovered as `k - m[-1]`. The
//! erasure coding itself is delegated to `reed-solomon-erasure`, a real systematic Reed–Solomon
//! implementation, rather than a hand-rolled Vandermonde solver — grounded on
//! `other_examples/manifests/kigawas-hbbft/Cargo.toml`, a HoneyBadgerBFT-style asynchronous BFT
//! implementation that leans on the same crate for its own erasure-coded broadcast.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("need at least {k} stripes to reconstruct, only {got} available")]
    InsufficientShares { k: usize, got: usize },
    #[error("stripes have inconsistent lengths")]
    LengthMismatch,
    #[error("k must be in 1..=256, got {0}")]
    InvalidK(usize),
    #[error("erasure coding backend error: {0}")]
    Backend(String),
    #[error("reconstructed message is empty")]
    EmptyMessage,
    #[error("corrupt padding")]
    CorruptPadding,
}

impl From<reed_solomon_erasure::Error> for CodecError {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        CodecError::Backend(format!("{e:?}"))
    }
}

/// Erasure-encodes `m` into `n` equal-length stripes, any `k` of which reconstruct `m` exactly.
pub fn encode(k: usize, n: usize, m: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    if k == 0 || k > 256 || k > n {
        return Err(CodecError::InvalidK(k));
    }

    let padlen = k - (m.len() % k);
    let pad_byte = (k - padlen) as u8;
    let mut padded = Vec::with_capacity(m.len() + padlen);
    padded.extend_from_slice(m);
    padded.extend(std::iter::repeat(pad_byte).take(padlen));

    let step = padded.len() / k;
    let mut shards: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            if i < k {
                padded[i * step..(i + 1) * step].to_vec()
            } else {
                vec![0u8; step]
            }
        })
        .collect();

    if n > k {
        let rs = ReedSolomon::new(k, n - k)?;
        rs.encode(&mut shards)?;
    }

    Ok(shards)
}

/// Reconstructs `m` from `n` stripes, of which at least `k` must be present (`Some`) and all
/// present stripes must share one length.
pub fn decode(k: usize, n: usize, stripes: &[Option<Vec<u8>>]) -> Result<Vec<u8>, CodecError> {
    if k == 0 || k > 256 || k > n {
        return Err(CodecError::InvalidK(k));
    }
    if stripes.len() != n {
        return Err(CodecError::LengthMismatch);
    }

    let present = stripes.iter().filter(|s| s.is_some()).count();
    if present < k {
        return Err(CodecError::InsufficientShares { k, got: present });
    }

    let stripe_len = stripes
        .iter()
        .find_map(|s| s.as_ref().map(Vec::len))
        .ok_or(CodecError::EmptyMessage)?;
    for s in stripes.iter().flatten() {
        if s.len() != stripe_len {
            return Err(CodecError::LengthMismatch);
        }
    }

    let mut shards: Vec<Option<Vec<u8>>> = stripes.to_vec();
    if n > k {
        let rs = ReedSolomon::new(k, n - k)?;
        rs.reconstruct(&mut shards)?;
    }

    let mut m = Vec::with_capacity(stripe_len * k);
    for shard in shards.iter().take(k) {
        m.extend_from_slice(shard.as_ref().expect("reconstruct fills all data shards"));
    }

    let last = *m.last().ok_or(CodecError::EmptyMessage)?;
    if last as usize >= k {
        return Err(CodecError::CorruptPadding);
    }
    let padlen = k - last as usize;
    if padlen == 0 || padlen > m.len() {
        return Err(CodecError::CorruptPadding);
    }
    m.truncate(m.len() - padlen);
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_all_stripes() {
        let stripes = encode(2, 4, b"hello").unwrap();
        let opt: Vec<Option<Vec<u8>>> = stripes.into_iter().map(Some).collect();
        assert_eq!(decode(2, 4, &opt).unwrap(), b"hello");
    }

    #[test]
    fn s4_scenario_blanking_two_stripes() {
        // S4: encode(2, 4, "hello") then blank stripes 0 and 2; decode returns "hello".
        let stripes = encode(2, 4, b"hello").unwrap();
        let mut opt: Vec<Option<Vec<u8>>> = stripes.into_iter().map(Some).collect();
        opt[0] = None;
        opt[2] = None;
        assert_eq!(decode(2, 4, &opt).unwrap(), b"hello");
    }

    #[test]
    fn insufficient_shares_errors() {
        let stripes = encode(3, 6, b"a longer message here").unwrap();
        let mut opt: Vec<Option<Vec<u8>>> = stripes.into_iter().map(Some).collect();
        opt[0] = None;
        opt[1] = None;
        opt[2] = None;
        opt[3] = None;
        assert!(matches!(decode(3, 6, &opt), Err(CodecError::InsufficientShares { .. })));
    }

    #[test]
    fn length_mismatch_errors() {
        let mut stripes: Vec<Option<Vec<u8>>> = encode(2, 4, b"hello").unwrap().into_iter().map(Some).collect();
        stripes[1] = Some(vec![0u8; 1]);
        assert_eq!(decode(2, 4, &stripes), Err(CodecError::LengthMismatch));
    }

    #[test]
    fn round_trip_across_many_sizes() {
        for k in [1usize, 2, 3, 5, 8] {
            for n in [k, k + 1, k + 3] {
                for msg in [&b""[..], b"x", b"exactly k bytes?", b"a rather longer message to pad awkwardly"] {
                    let stripes = encode(k, n, msg).unwrap();
                    let opt: Vec<Option<Vec<u8>>> =
                        stripes.into_iter().enumerate().map(|(i, s)| if i < k { Some(s) } else { None }).collect();
                    assert_eq!(decode(k, n, &opt).unwrap(), msg, "k={k} n={n}");
                }
            }
        }
    }
}
