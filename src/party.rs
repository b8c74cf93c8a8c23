//! Party identity, roster, and the static PKI used for ACSS recipient key-agreement.
//!
//! `PartyId` plays the role this crate's reference model gives `AuthorityCount`/`AccountId` pairs
//! via `client/utils.rs`'s `PartyIdxMapping`, simplified to a dense `0..n` index space since ADKG
//! has no notion of an externally assigned validator set — the roster *is* the index space.

use crate::group::{generator_g, FieldElement, GroupElement, Point, Scalar};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub type PartyId = usize;

/// Threshold parameters for one ADKG run: `n` parties, up to `t` Byzantine, `deg = 2t` the degree
/// of the final shared secret, `sc` the number of slots dealt per ACSS instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    pub n: usize,
    pub t: usize,
}

impl Params {
    pub fn new(n: usize, t: usize) -> Self {
        assert!(n >= 3 * t + 1, "ADKG requires n >= 3t+1, got n={n} t={t}");
        Params { n, t }
    }

    pub fn deg(&self) -> usize {
        2 * self.t
    }

    /// `sc = ceil((deg+1)/(t+1)) + 1`.
    pub fn sc(&self) -> usize {
        (self.deg() + 1).div_ceil(self.t + 1) + 1
    }

    pub fn mks_size(&self) -> usize {
        self.n - self.t
    }
}

/// A party's long-term private key, zeroized on drop since it is used to derive every ACSS
/// recipient's shared key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Scalar);

impl PrivateKey {
    pub fn scalar(&self) -> Scalar {
        self.0
    }
}

/// The (static, for this tutorial-scale deployment) public-key roster and each party's own
/// private key, derived deterministically from the party index — adequate for one protocol run;
/// a production deployment would plug in a real PKI behind the same interface.
pub struct Roster {
    pub params: Params,
    pub public_keys: Vec<Point>,
    my_id: PartyId,
    my_private_key: PrivateKey,
}

impl Roster {
    /// `sk_i = F::hash(str(i))`, `pk_i = g^{sk_i}`, published to the full roster.
    pub fn static_pki(params: Params, my_id: PartyId) -> Self {
        assert!(my_id < params.n);
        let public_keys: Vec<Point> = (0..params.n)
            .map(|i| generator_g().mul(&Scalar::hash(i.to_string().as_bytes())))
            .collect();
        let my_private_key = PrivateKey(Scalar::hash(my_id.to_string().as_bytes()));
        Roster { params, public_keys, my_id, my_private_key }
    }

    pub fn n(&self) -> usize {
        self.params.n
    }

    pub fn t(&self) -> usize {
        self.params.t
    }

    pub fn my_id(&self) -> PartyId {
        self.my_id
    }

    pub fn my_private_key(&self) -> &PrivateKey {
        &self.my_private_key
    }

    pub fn public_key(&self, id: PartyId) -> Point {
        self.public_keys[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_pki_is_consistent_across_parties() {
        let params = Params::new(4, 1);
        let rosters: Vec<Roster> = (0..4).map(|i| Roster::static_pki(params, i)).collect();
        for i in 0..4 {
            for r in &rosters {
                assert_eq!(r.public_key(i), rosters[i].public_keys[i]);
            }
        }
        assert_eq!(rosters[0].public_key(2), generator_g().mul(&rosters[2].my_private_key().scalar()));
    }

    #[test]
    fn sc_matches_formula() {
        // n=4, t=1: deg=2t=2, sc = ceil((deg+1)/(t+1)) + 1 = ceil(3/2) + 1 = 3.
        let p = Params::new(4, 1);
        assert_eq!(p.deg(), 2);
        assert_eq!(p.sc(), 3);
    }
}
