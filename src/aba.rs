//! Asynchronous binary agreement (C9).
//!
//! Marked an external collaborator in this document's distilled form ("assumed available with
//! its standard ABA contract"); a runnable crate still needs one concrete implementation behind
//! that contract. This is a standard Mostefaoui–Moumen–Raynal / Ben-Or style binary agreement:
//! each round broadcasts `EST`, derives `bin_values` once `2t+1` matching estimates are seen,
//! broadcasts `AUX`, and resolves the round via a pluggable [`CommonCoin`] once `n-t` valid `AUX`
//! messages are in. Exposed behind the [`CommonCoin`] trait so the combine-matrix-keyed coin
//! described alongside C6 is swappable without touching the agreement loop itself.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::{
    commit::feldman_verify,
    error::AdkgError,
    group::{FieldElement, GroupElement, Point, Scalar},
    party::PartyId,
    poly::interpolate_at_zero,
    transport::Transport,
};

/// Supplies the unbiased, unpredictable-in-advance bit each ABA round falls back to when
/// estimates don't converge on their own.
#[async_trait]
pub trait CommonCoin: Send + Sync {
    async fn toss(&self, transport: &dyn Transport, tag: &str, round: u64) -> Result<bool, AdkgError>;
}

#[derive(Clone, Debug)]
enum AbaMessage {
    Est { round: u64, bit: bool },
    Aux { round: u64, values: HashSet<bool> },
}

impl AbaMessage {
    fn encode(&self) -> Vec<u8> {
        match self {
            AbaMessage::Est { round, bit } => {
                let mut buf = vec![1u8];
                buf.extend_from_slice(&round.to_le_bytes());
                buf.push(*bit as u8);
                buf
            }
            AbaMessage::Aux { round, values } => {
                let mut buf = vec![2u8];
                buf.extend_from_slice(&round.to_le_bytes());
                let mut mask = 0u8;
                if values.contains(&false) {
                    mask |= 1;
                }
                if values.contains(&true) {
                    mask |= 2;
                }
                buf.push(mask);
                buf
            }
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        let round = u64::from_le_bytes(bytes[1..9].try_into().ok()?);
        match bytes[0] {
            1 => Some(AbaMessage::Est { round, bit: bytes[9] != 0 }),
            2 => {
                let mask = bytes[9];
                let mut values = HashSet::new();
                if mask & 1 != 0 {
                    values.insert(false);
                }
                if mask & 2 != 0 {
                    values.insert(true);
                }
                Some(AbaMessage::Aux { round, values })
            }
            _ => None,
        }
    }
}

/// Runs one ABA instance to completion, deciding a single bit.
pub async fn run_aba(
    transport: &dyn Transport,
    tag: &str,
    t: usize,
    input: bool,
    coin: &dyn CommonCoin,
) -> Result<bool, AdkgError> {
    let n = transport.n();
    let mut rx = transport.subscribe(tag);

    let mut current_round: u64 = 0;
    let mut est_votes: HashMap<u64, [HashSet<PartyId>; 2]> = HashMap::new();
    let mut est_sent: HashMap<u64, [bool; 2]> = HashMap::new();
    let mut aux_votes: HashMap<u64, HashMap<PartyId, HashSet<bool>>> = HashMap::new();
    let mut bin_values: HashMap<u64, HashSet<bool>> = HashMap::new();
    let mut aux_sent: HashMap<u64, bool> = HashMap::new();
    let mut prev_singleton: Option<bool> = None;
    let mut decided: Option<bool> = None;

    let send_est = |round: u64, bit: bool| {
        transport.broadcast(tag, AbaMessage::Est { round, bit }.encode());
    };
    let send_aux = |round: u64, values: &HashSet<bool>| {
        transport.broadcast(tag, AbaMessage::Aux { round, values: values.clone() }.encode());
    };

    send_est(0, input);
    est_sent.entry(0).or_insert([false, false])[input as usize] = true;

    loop {
        if let Some(b) = decided {
            return Ok(b);
        }

        let (sender, payload) = rx.recv().await.ok_or(AdkgError::Cancelled)?;
        let Some(msg) = AbaMessage::decode(&payload) else { continue };

        match msg {
            AbaMessage::Est { round, bit } => {
                let votes = est_votes.entry(round).or_insert_with(|| [HashSet::new(), HashSet::new()]);
                votes[bit as usize].insert(sender);
                let count = votes[bit as usize].len();

                if count >= t + 1 {
                    let sent = est_sent.entry(round).or_insert([false, false]);
                    if !sent[bit as usize] {
                        sent[bit as usize] = true;
                        send_est(round, bit);
                    }
                }

                if count >= 2 * t + 1 {
                    let bv = bin_values.entry(round).or_default();
                    let was_empty = bv.is_empty();
                    bv.insert(bit);
                    if was_empty && round == current_round && !*aux_sent.entry(round).or_insert(false) {
                        aux_sent.insert(round, true);
                        let snapshot = bv.clone();
                        send_aux(round, &snapshot);
                    }
                }
            }
            AbaMessage::Aux { round, values } => {
                aux_votes.entry(round).or_default().insert(sender, values);

                if round != current_round {
                    continue;
                }
                let Some(bv) = bin_values.get(&round).filter(|bv| !bv.is_empty()) else { continue };

                let entry = &aux_votes[&round];
                let valid_count = entry.values().filter(|vs| vs.is_subset(bv)).count();
                if valid_count < n - t {
                    continue;
                }

                let values_seen: HashSet<bool> =
                    entry.values().filter(|vs| vs.is_subset(bv)).flatten().copied().collect();

                let next_est = if values_seen.len() == 1 {
                    let b = *values_seen.iter().next().unwrap();
                    if prev_singleton == Some(b) {
                        decided = Some(b);
                    }
                    prev_singleton = Some(b);
                    b
                } else {
                    prev_singleton = None;
                    coin.toss(transport, tag, current_round).await?
                };

                current_round += 1;
                est_sent.entry(current_round).or_insert([false, false])[next_est as usize] = true;
                send_est(current_round, next_est);

                // A faster peer's EST for `current_round` may have already pushed our own
                // `bin_values(current_round)` past the threshold while we were still finishing
                // the previous round; send AUX for it right away instead of waiting for another
                // EST to retrigger the check.
                if let Some(bv) = bin_values.get(&current_round) {
                    if !bv.is_empty() && !*aux_sent.entry(current_round).or_insert(false) {
                        aux_sent.insert(current_round, true);
                        let snapshot = bv.clone();
                        send_aux(current_round, &snapshot);
                    }
                }
            }
        }
    }
}

/// The common coin described alongside C6: each round, every party contributes its share of an
/// affine combination (fixed, round-derived public coefficients) of the already Feldman-committed
/// ACSS secrets of a fixed set of dealers. The combination is itself a valid degree-`t` Shamir
/// sharing, so once `t+1` contributions verify against the homomorphically combined commitment,
/// interpolating at `x=0` and hashing the result yields a bit no party could have predicted before
/// contributing.
pub struct AlgebraicCoin {
    my_id: PartyId,
    t: usize,
    /// `(dealer id, my share of that dealer's secret, that dealer's Feldman commitment)`.
    entries: Vec<(PartyId, Scalar, Vec<Point>)>,
}

impl AlgebraicCoin {
    pub fn new(my_id: PartyId, t: usize, entries: Vec<(PartyId, Scalar, Vec<Point>)>) -> Self {
        assert!(!entries.is_empty(), "a coin needs at least one dealer's secret to combine");
        AlgebraicCoin { my_id, t, entries }
    }

    fn round_coefficient(dealer: PartyId, round: u64) -> Scalar {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(b"adkg-coin-coeff");
        buf.extend_from_slice(&(dealer as u64).to_le_bytes());
        buf.extend_from_slice(&round.to_le_bytes());
        Scalar::hash(&buf)
    }

    fn combined_commit(&self, round: u64) -> Vec<Point> {
        let deg1 = self.entries[0].2.len();
        (0..deg1)
            .map(|k| {
                self.entries
                    .iter()
                    .map(|(dealer, _, commit)| commit[k].mul(&Self::round_coefficient(*dealer, round)))
                    .fold(Point::identity(), |a, b| a + b)
            })
            .collect()
    }

    fn my_contribution(&self, round: u64) -> Scalar {
        self.entries
            .iter()
            .map(|(dealer, share, _)| *share * Self::round_coefficient(*dealer, round))
            .fold(Scalar::zero(), |a, b| a + b)
    }
}

#[async_trait]
impl CommonCoin for AlgebraicCoin {
    async fn toss(&self, transport: &dyn Transport, tag: &str, round: u64) -> Result<bool, AdkgError> {
        let t = self.t;
        let coin_tag = format!("{tag}/COIN/{round}");
        let mut rx = transport.subscribe(&coin_tag);

        let combined_commit = self.combined_commit(round);
        let my_contribution = self.my_contribution(round);

        let mut payload = Vec::with_capacity(32);
        payload.extend_from_slice(&my_contribution.to_bytes());
        transport.broadcast(&coin_tag, payload);

        let mut contributions: HashMap<PartyId, Scalar> = HashMap::new();
        contributions.insert(self.my_id, my_contribution);

        loop {
            if contributions.len() > t {
                let points: Vec<(PartyId, Scalar)> = contributions.iter().map(|(s, v)| (*s, *v)).collect();
                let secret = interpolate_at_zero(&points);
                let bit = secret.to_bytes()[0] & 1 == 1;
                return Ok(bit);
            }

            let (sender, payload) = rx.recv().await.ok_or(AdkgError::Cancelled)?;
            if contributions.contains_key(&sender) {
                continue;
            }
            let Ok(bytes): Result<[u8; 32], _> = payload.as_slice().try_into() else { continue };
            let value = Scalar::from_bytes_mod_order(&bytes);
            let x = Scalar::from_u64((sender + 1) as u64);
            if feldman_verify(&combined_commit, x, value) {
                contributions.insert(sender, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessTransport;
    use rand::SeedableRng;

    /// A coin that's biased to a fixed value, for exercising the EST/AUX state machine without
    /// the combine-matrix machinery.
    struct FixedCoin(bool);

    #[async_trait]
    impl CommonCoin for FixedCoin {
        async fn toss(&self, _transport: &dyn Transport, _tag: &str, _round: u64) -> Result<bool, AdkgError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn s7_all_honest_with_mixed_inputs_decide_the_same_bit() {
        let net = InProcessTransport::new_network(4);
        let inputs = [true, true, false, false];
        let mut handles = Vec::new();
        for (transport, input) in net.into_iter().zip(inputs) {
            handles.push(tokio::spawn(async move {
                run_aba(&transport, "aba", 1, input, &FixedCoin(true)).await
            }));
        }
        let mut decisions = Vec::new();
        for h in handles {
            decisions.push(h.await.unwrap().unwrap());
        }
        assert!(decisions.iter().all(|&d| d == decisions[0]));
    }

    #[tokio::test]
    async fn unanimous_input_decides_immediately_without_needing_the_coin() {
        let net = InProcessTransport::new_network(4);
        let mut handles = Vec::new();
        for transport in net.into_iter() {
            handles.push(tokio::spawn(async move {
                run_aba(&transport, "aba-unanimous", 1, true, &FixedCoin(false)).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().unwrap());
        }
    }

    #[tokio::test]
    async fn algebraic_coin_produces_same_bit_once_quorum_is_verified() {
        let n = 4;
        let t = 1;
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let secret = Scalar::from_u64(77);
        let phi = crate::poly::Polynomial::random_with_constant(t, secret, &mut rng);
        let commit = crate::commit::feldman_commit(&phi);

        let net = InProcessTransport::new_network(n);
        let mut handles = Vec::new();
        for (i, transport) in net.into_iter().enumerate() {
            let share = phi.evaluate(Scalar::from_u64((i + 1) as u64));
            let coin = AlgebraicCoin::new(i, t, vec![(0, share, commit.clone())]);
            handles.push(tokio::spawn(async move { coin.toss(&transport, "coin-test", 0).await }));
        }
        let mut bits = Vec::new();
        for h in handles {
            bits.push(h.await.unwrap().unwrap());
        }
        assert!(bits.iter().all(|&b| b == bits[0]));
    }
}
