//! High-threshold asynchronous complete secret sharing (C5): one dealer disperses `sc` secrets at
//! once (a "packed" sharing), every recipient verifies its own share against public commitments
//! over the already-delivered dealer proposal, and a recipient whose share fails verification
//! recovers it from `t+1` honest peers instead of stalling the whole run.
//!
//! Ported from `original_source/adkg/acss_ht.py`'s `ACSS_HT` class (the dealer/recipient/
//! implicate/share-recovery state machine) onto this crate's `rbc`/`transport` primitives, with
//! the commitment verification idiom taken from `client/keygen/keygen_detail.rs`
//! (`validate_commitments`/`is_valid_zkp`).

use std::collections::{HashMap, HashSet};

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::{
    commit::{feldman_commit, feldman_verify, pedersen_commit, pedersen_verify},
    error::AdkgError,
    group::{generator_g, FieldElement, GroupElement, Point, Scalar},
    party::{PartyId, Roster},
    poly::{interpolate_at, Polynomial},
    rbc::{run_rbc, RbcPredicate},
    transport::Transport,
    wire::{self, G_SIZE},
};
use async_trait::async_trait;
use tracing::warn;

/// This party's evaluation of every dealt polynomial at its own index: `msg[k] = phi_k(my_id+1)`
/// for `k ∈ [0, sc)`, `rand[k] = phi_hat_{k+1}(my_id+1)` for `k ∈ [0, sc-1)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shares {
    pub msg: Vec<Scalar>,
    pub rand: Vec<Scalar>,
}

/// The output of one completed ACSS instance, cached by the ACS/key-derivation phases.
#[derive(Clone, Debug)]
pub struct AcssOutput {
    pub dealer: PartyId,
    pub shares: Shares,
    pub commits_feldman0: Vec<Point>,
    pub commits_pedersen: Vec<Vec<Point>>,
}

fn aead_key(shared: &Point) -> chacha20poly1305::Key {
    let digest = Sha256::digest(shared.to_bytes());
    *chacha20poly1305::Key::from_slice(&digest)
}

fn aead_encrypt(shared: &Point, plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(&aead_key(shared));
    let nonce = chacha20poly1305::Nonce::from_slice(&[0u8; 12]);
    cipher.encrypt(nonce, plaintext).expect("encryption under a freshly derived key cannot fail")
}

fn aead_decrypt(shared: &Point, ciphertext: &[u8]) -> Option<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(&aead_key(shared));
    let nonce = chacha20poly1305::Nonce::from_slice(&[0u8; 12]);
    cipher.decrypt(nonce, ciphertext).ok()
}

/// Sanity cap on wire-supplied `n`/`sc` fields, well above any realistic party count, so a
/// malicious dealer's PROPOSE can't force recipients into unbounded allocation/looping before the
/// real roster-size check in `AcssPredicate::check` even runs.
const MAX_PARTIES: usize = 1 << 16;

fn write_u32(buf: &mut Vec<u8>, x: u32) {
    buf.extend_from_slice(&x.to_le_bytes());
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let chunk: [u8; 4] = bytes.get(*pos..*pos + 4)?.try_into().ok()?;
    *pos += 4;
    Some(u32::from_le_bytes(chunk))
}

/// The broadcast proposal a dealer disperses through RBC: flattened commitments, one ciphertext
/// per recipient (all the same length), and the ephemeral DH public key.
#[derive(Clone, Debug)]
struct DealerProposal {
    sc: usize,
    n: usize,
    t: usize,
    commits_feldman0: Vec<Point>,
    commits_pedersen: Vec<Vec<Point>>,
    ciphertexts: Vec<Vec<u8>>,
    epk: Point,
}

impl DealerProposal {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32(&mut buf, self.sc as u32);
        write_u32(&mut buf, self.n as u32);
        write_u32(&mut buf, self.t as u32);
        buf.extend(wire::serialize_points(&self.commits_feldman0));
        for row in &self.commits_pedersen {
            buf.extend(wire::serialize_points(row));
        }
        let ct_len = self.ciphertexts.first().map(Vec::len).unwrap_or(0);
        write_u32(&mut buf, ct_len as u32);
        for ct in &self.ciphertexts {
            buf.extend_from_slice(ct);
        }
        buf.extend_from_slice(&self.epk.to_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0;
        let sc = read_u32(bytes, &mut pos)? as usize;
        let n = read_u32(bytes, &mut pos)? as usize;
        let t = read_u32(bytes, &mut pos)? as usize;
        if sc > MAX_PARTIES || n > MAX_PARTIES || t > MAX_PARTIES {
            return None;
        }
        let deg1 = t + 1;
        let points_len = deg1 * G_SIZE;

        let commits_feldman0 = wire::deserialize_points(bytes.get(pos..pos + points_len)?, deg1)?;
        pos += points_len;

        let mut commits_pedersen = Vec::with_capacity(sc.saturating_sub(1));
        for _ in 0..sc.saturating_sub(1) {
            let row = wire::deserialize_points(bytes.get(pos..pos + points_len)?, deg1)?;
            pos += points_len;
            commits_pedersen.push(row);
        }

        let ct_len = read_u32(bytes, &mut pos)? as usize;
        let mut ciphertexts = Vec::with_capacity(n);
        for _ in 0..n {
            ciphertexts.push(bytes.get(pos..pos + ct_len)?.to_vec());
            pos += ct_len;
        }

        let epk = Point::from_bytes(bytes.get(pos..pos + G_SIZE)?.try_into().ok()?)?;
        Some(DealerProposal { sc, n, t, commits_feldman0, commits_pedersen, ciphertexts, epk })
    }
}

/// Samples `sc` degree-`t` polynomials (one Feldman-committed, `sc-1` Pedersen-committed) with the
/// given constants, and disperses their evaluations to every recipient under `pk_i^esk`.
fn deal(
    n: usize,
    t: usize,
    recipient_pks: &[Point],
    values: &[Scalar],
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<u8> {
    let sc = values.len();
    assert!(sc >= 1);
    assert_eq!(recipient_pks.len(), n);

    let phi0 = Polynomial::random_with_constant(t, values[0], rng);
    let commits_feldman0 = feldman_commit(&phi0);

    let mut phis = vec![phi0];
    let mut phi_hats = Vec::new();
    let mut commits_pedersen = Vec::new();
    for &v in &values[1..] {
        let phik = Polynomial::random_with_constant(t, v, rng);
        let phihat = Polynomial::random_with_constant(t, Scalar::random(rng), rng);
        commits_pedersen.push(pedersen_commit(&phik, &phihat));
        phis.push(phik);
        phi_hats.push(phihat);
    }

    let esk = Scalar::random(rng);
    let epk = generator_g().mul(&esk);

    let ciphertexts = (0..n)
        .map(|j| {
            let shared = recipient_pks[j].mul(&esk);
            let x = Scalar::from_u64((j + 1) as u64);
            let mut scalars = Vec::with_capacity(2 * sc - 1);
            scalars.extend(phis.iter().map(|p| p.evaluate(x)));
            scalars.extend(phi_hats.iter().map(|p| p.evaluate(x)));
            aead_encrypt(&shared, &wire::serialize_scalars(&scalars))
        })
        .collect();

    DealerProposal { sc, n, t, commits_feldman0, commits_pedersen, ciphertexts, epk }.encode()
}

/// Decrypts `proposal`'s ciphertext for `recipient` under `shared_key` and verifies the result
/// against the public commitments, returning the verified shares on success.
fn decrypt_and_verify(proposal: &DealerProposal, recipient: PartyId, shared_key: &Point) -> Option<Shares> {
    let ciphertext = proposal.ciphertexts.get(recipient)?;
    let plaintext = aead_decrypt(shared_key, ciphertext)?;
    let sc = proposal.sc;
    let scalars = wire::deserialize_scalars(&plaintext, 2 * sc - 1)?;
    let msg = scalars[0..sc].to_vec();
    let rand = scalars[sc..].to_vec();

    let x = Scalar::from_u64((recipient + 1) as u64);
    if !feldman_verify(&proposal.commits_feldman0, x, msg[0]) {
        return None;
    }
    for k in 1..sc {
        if !pedersen_verify(&proposal.commits_pedersen[k - 1], x, msg[k], rand[k - 1]) {
            return None;
        }
    }
    Some(Shares { msg, rand })
}

struct AcssPredicate {
    my_id: PartyId,
    my_sk: Scalar,
}

#[async_trait]
impl RbcPredicate for AcssPredicate {
    async fn check(&self, message: &[u8]) -> bool {
        let Some(proposal) = DealerProposal::decode(message) else { return false };
        if self.my_id >= proposal.n {
            return false;
        }
        let shared_key = proposal.epk.mul(&self.my_sk);
        decrypt_and_verify(&proposal, self.my_id, &shared_key).is_some()
    }
}

/// Runs one ACSS instance to completion: `values` must be `Some` iff `roster.my_id() == dealer`.
pub async fn run_acss(
    transport: &dyn Transport,
    roster: &Roster,
    dealer: PartyId,
    values: Option<Vec<Scalar>>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<AcssOutput, AdkgError> {
    let proposal_override = values.map(|v| deal(roster.n(), roster.t(), &roster.public_keys, &v, rng));
    run_acss_inner(transport, roster, dealer, proposal_override).await
}

async fn run_acss_inner(
    transport: &dyn Transport,
    roster: &Roster,
    dealer: PartyId,
    proposal_bytes: Option<Vec<u8>>,
) -> Result<AcssOutput, AdkgError> {
    let n = roster.n();
    let t = roster.t();
    let my_id = roster.my_id();
    let my_sk = roster.my_private_key().scalar();

    let base = format!("ACSS/{dealer}");
    let rbc_tag = format!("{base}/RBC");
    let ok_tag = format!("{base}/OK");
    let implicate_tag = format!("{base}/IMPLICATE");
    let kdi_tag = format!("{base}/KDI");

    let predicate = AcssPredicate { my_id, my_sk };
    let delivered = run_rbc(transport, &rbc_tag, t, dealer, proposal_bytes, &predicate).await?;
    let proposal = DealerProposal::decode(&delivered).ok_or(AdkgError::Deserialize)?;
    if proposal.n != n || proposal.t != t {
        return Err(AdkgError::Deserialize);
    }
    let sc = proposal.sc;

    let mut ok_rx = transport.subscribe(&ok_tag);
    let mut implicate_rx = transport.subscribe(&implicate_tag);
    let mut kdi_rx = transport.subscribe(&kdi_tag);

    let my_shared_key = proposal.epk.mul(&my_sk);
    let mut my_shares = decrypt_and_verify(&proposal, my_id, &my_shared_key);
    let mut in_recovery = false;

    if my_shares.is_some() {
        transport.broadcast(&ok_tag, Vec::new());
    } else {
        in_recovery = true;
        transport.broadcast(&implicate_tag, my_sk.to_bytes().to_vec());
    }

    let mut ok_senders: HashSet<PartyId> = HashSet::new();
    let mut saved: HashMap<PartyId, Shares> = HashMap::new();

    loop {
        if my_shares.is_some() && ok_senders.len() >= 2 * t + 1 {
            let shares = my_shares.expect("checked above");
            return Ok(AcssOutput {
                dealer,
                shares,
                commits_feldman0: proposal.commits_feldman0,
                commits_pedersen: proposal.commits_pedersen,
            });
        }

        tokio::select! {
            msg = ok_rx.recv() => {
                let Some((sender, _payload)) = msg else { return Err(AdkgError::Cancelled) };
                ok_senders.insert(sender);
            }
            msg = implicate_rx.recv() => {
                let Some((sender, payload)) = msg else { return Err(AdkgError::Cancelled) };
                if in_recovery || sender >= n {
                    continue;
                }
                let Ok(sk_bytes): Result<[u8; 32], _> = payload.as_slice().try_into() else { continue };
                let sk_j = Scalar::from_bytes_mod_order(&sk_bytes);
                if roster.public_key(sender) != generator_g().mul(&sk_j) {
                    warn!(dealer, sender, "IMPLICATE claimed a private key not matching the roster");
                    continue;
                }
                let shared_j = proposal.epk.mul(&sk_j);
                let valid_implication = decrypt_and_verify(&proposal, sender, &shared_j).is_none();
                if valid_implication {
                    in_recovery = true;
                    if my_shares.is_some() {
                        transport.broadcast(&kdi_tag, my_shared_key.to_bytes().to_vec());
                    }
                } else {
                    warn!(dealer, sender, "IMPLICATE's own share decrypts fine; ignoring false claim");
                }
            }
            msg = kdi_rx.recv() => {
                let Some((sender, payload)) = msg else { return Err(AdkgError::Cancelled) };
                if my_shares.is_some() || saved.contains_key(&sender) || sender >= n {
                    continue;
                }
                let Ok(key_bytes): Result<[u8; 32], _> = payload.as_slice().try_into() else { continue };
                let Some(k_s) = Point::from_bytes(&key_bytes) else { continue };
                let Some(shares) = decrypt_and_verify(&proposal, sender, &k_s) else { continue };
                saved.insert(sender, shares);

                if saved.len() >= t + 1 {
                    let my_x = Scalar::from_u64((my_id + 1) as u64);
                    let msg_at_me: Vec<Scalar> = (0..sc)
                        .map(|k| {
                            let points: Vec<(usize, Scalar)> =
                                saved.iter().map(|(s, sh)| (*s, sh.msg[k])).collect();
                            interpolate_at(&points, my_x)
                        })
                        .collect();
                    let rand_at_me: Vec<Scalar> = (0..sc.saturating_sub(1))
                        .map(|k| {
                            let points: Vec<(usize, Scalar)> =
                                saved.iter().map(|(s, sh)| (*s, sh.rand[k])).collect();
                            interpolate_at(&points, my_x)
                        })
                        .collect();
                    my_shares = Some(Shares { msg: msg_at_me, rand: rand_at_me });
                    transport.broadcast(&ok_tag, Vec::new());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::Params;
    use crate::transport::InProcessTransport;

    fn rosters(n: usize, t: usize) -> Vec<Roster> {
        let params = Params::new(n, t);
        (0..n).map(|i| Roster::static_pki(params, i)).collect()
    }

    #[tokio::test]
    async fn all_honest_dealer_and_recipients_produce_consistent_shares() {
        let rosters = rosters(4, 1);
        let net = InProcessTransport::new_network(4);
        let dealer = 0;
        let values = vec![Scalar::from_u64(11), Scalar::from_u64(22), Scalar::from_u64(33)];

        let mut handles = Vec::new();
        for (transport, roster) in net.into_iter().zip(rosters) {
            let values = if roster.my_id() == dealer { Some(values.clone()) } else { None };
            handles.push(tokio::spawn(async move {
                let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::from_entropy();
                run_acss(&transport, &roster, dealer, values, &mut rng).await
            }));
        }

        let mut outputs = Vec::new();
        for h in handles {
            outputs.push(h.await.unwrap().unwrap());
        }

        assert_eq!(outputs.len(), 4);
        for out in &outputs {
            assert_eq!(out.commits_feldman0, outputs[0].commits_feldman0);
            assert_eq!(out.commits_pedersen, outputs[0].commits_pedersen);
        }

        // Every honest party's own share verifies against the published commitments.
        for (i, out) in outputs.iter().enumerate() {
            let x = Scalar::from_u64((i + 1) as u64);
            assert!(feldman_verify(&out.commits_feldman0, x, out.shares.msg[0]));
            for k in 1..out.shares.msg.len() {
                assert!(pedersen_verify(&out.commits_pedersen[k - 1], x, out.shares.msg[k], out.shares.rand[k - 1]));
            }
        }

        // deg=t=1 means any 2 shares reconstruct each dealt secret.
        let points: Vec<(usize, Scalar)> =
            outputs.iter().enumerate().take(2).map(|(i, o)| (i, o.shares.msg[0])).collect();
        assert_eq!(crate::poly::interpolate_at_zero(&points), values[0]);
    }

    #[tokio::test]
    async fn s3_corrupted_ciphertext_triggers_implicate_and_recovery() {
        let rosters = rosters(4, 1);
        let dealer = 0;
        let victim = 2;
        let values = vec![Scalar::from_u64(5), Scalar::from_u64(6)];

        let mut rng = rand::thread_rng();
        let mut proposal_bytes = deal(4, 1, &rosters[dealer].public_keys, &values, &mut rng);
        let mut proposal = DealerProposal::decode(&proposal_bytes).unwrap();
        // Corrupt party `victim`'s ciphertext so decryption fails for it specifically.
        proposal.ciphertexts[victim] = vec![0xAAu8; proposal.ciphertexts[victim].len()];
        proposal_bytes = proposal.encode();

        let net = InProcessTransport::new_network(4);
        let mut handles = Vec::new();
        for (transport, roster) in net.into_iter().zip(rosters) {
            let override_bytes = if roster.my_id() == dealer { Some(proposal_bytes.clone()) } else { None };
            handles.push(tokio::spawn(async move { run_acss_inner(&transport, &roster, dealer, override_bytes).await }));
        }

        let mut outputs = Vec::new();
        for h in handles {
            outputs.push(h.await.unwrap().unwrap());
        }

        let out = &outputs[victim];
        let x = Scalar::from_u64((victim + 1) as u64);
        assert!(feldman_verify(&out.commits_feldman0, x, out.shares.msg[0]));
        assert!(pedersen_verify(&out.commits_pedersen[0], x, out.shares.msg[1], out.shares.rand[0]));
    }
}
