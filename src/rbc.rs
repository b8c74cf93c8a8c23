//! Validated reliable broadcast (C4): one leader per instance, an external async predicate, and
//! erasure-coded ECHO/READY stripes.
//!
//! Ported from `original_source/adkg/broadcast/qrbc.py`'s `qrbc` coroutine, with the leader-path
//! termination check following this document's own clarified prose (§4.4) rather than the
//! reference implementation literally: the reference's final `else` branch returns the
//! function-local `m`, which is only ever bound by a party that itself processed a valid
//! `PROPOSE` — a party that reaches `output_threshold` purely via `READY` stripes (the entire
//! point of distributed decoding) would hit an unbound variable there. This crate returns the
//! freshly decoded message in that branch instead, and checks the *incoming* `READY`'s digest
//! field against both paths rather than a possibly-stale locally adopted one, matching the
//! totality property RBC is supposed to provide. The task/channel wiring follows
//! `client/common/ceremony_stage.rs`'s stage-owns-its-state idiom rather than the source's
//! cooperative single-thread loop, per §9's event-loop-to-task translation note.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{codec, error::AdkgError, party::PartyId, transport::Transport};

/// The external, possibly-suspending predicate an RBC instance validates its leader's proposal
/// against (e.g. ACSS's recipient-side decrypt-and-verify in §4.5).
#[async_trait]
pub trait RbcPredicate: Send + Sync {
    async fn check(&self, message: &[u8]) -> bool;
}

/// A predicate that accepts everything — useful for RBC instances with no external validation
/// requirement (e.g. wrapping an already-authenticated payload).
pub struct AcceptAll;

#[async_trait]
impl RbcPredicate for AcceptAll {
    async fn check(&self, _message: &[u8]) -> bool {
        true
    }
}

fn digest(m: &[u8]) -> [u8; 32] {
    Sha256::digest(m).into()
}

#[derive(Clone, Debug)]
enum RbcWireMessage {
    Propose(Vec<u8>),
    Echo { digest: [u8; 32], stripe: Vec<u8> },
    Ready { digest: [u8; 32], stripe: Vec<u8> },
}

impl RbcWireMessage {
    fn encode(&self) -> Vec<u8> {
        match self {
            RbcWireMessage::Propose(m) => {
                let mut buf = Vec::with_capacity(1 + m.len());
                buf.push(1);
                buf.extend_from_slice(m);
                buf
            }
            RbcWireMessage::Echo { digest, stripe } => {
                let mut buf = Vec::with_capacity(33 + stripe.len());
                buf.push(2);
                buf.extend_from_slice(digest);
                buf.extend_from_slice(stripe);
                buf
            }
            RbcWireMessage::Ready { digest, stripe } => {
                let mut buf = Vec::with_capacity(33 + stripe.len());
                buf.push(3);
                buf.extend_from_slice(digest);
                buf.extend_from_slice(stripe);
                buf
            }
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            1 => Some(RbcWireMessage::Propose(bytes[1..].to_vec())),
            2 if bytes.len() >= 33 => {
                Some(RbcWireMessage::Echo { digest: bytes[1..33].try_into().ok()?, stripe: bytes[33..].to_vec() })
            }
            3 if bytes.len() >= 33 => {
                Some(RbcWireMessage::Ready { digest: bytes[1..33].try_into().ok()?, stripe: bytes[33..].to_vec() })
            }
            _ => None,
        }
    }
}

/// Runs one validated RBC instance to completion and returns the agreed-upon message.
///
/// `tag` must already be namespaced by the caller (dealer/instance/role) so concurrent RBC
/// instances sharing one transport never cross-talk (§9).
pub async fn run_rbc(
    transport: &dyn Transport,
    tag: &str,
    f: usize,
    leader: PartyId,
    input: Option<Vec<u8>>,
    predicate: &(dyn RbcPredicate),
) -> Result<Vec<u8>, AdkgError> {
    let n = transport.n();
    let my_id = transport.my_id();
    assert!(n >= 3 * f + 1);
    assert!(leader < n);

    let k = f + 1;
    let echo_threshold = 2 * f + 1;
    let ready_threshold = f + 1;
    let output_threshold = 2 * f + 1;

    let mut rx = transport.subscribe(tag);

    if my_id == leader {
        let m = input.expect("the leader must supply the message being broadcast");
        transport.broadcast(tag, RbcWireMessage::Propose(m).encode());
    }

    let mut echo_counter: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut echo_senders: HashSet<PartyId> = HashSet::new();
    let mut ready_senders: HashSet<PartyId> = HashSet::new();
    let mut ready_tables: HashMap<[u8; 32], Vec<Option<Vec<u8>>>> = HashMap::new();
    let mut ready_sent = false;
    let mut ready_digest: Option<[u8; 32]> = None;
    let mut ready_stripe: Option<Vec<u8>> = None;
    let mut from_leader: Option<[u8; 32]> = None;
    let mut known_message: Option<Vec<u8>> = None;

    loop {
        let (sender, payload) = rx.recv().await.ok_or(AdkgError::Cancelled)?;
        let Some(msg) = RbcWireMessage::decode(&payload) else {
            warn!(tag, sender, "dropping malformed RBC message");
            continue;
        };

        match msg {
            RbcWireMessage::Propose(m) => {
                if from_leader.is_some() || sender != leader {
                    continue;
                }
                if !predicate.check(&m).await {
                    warn!(tag, leader, "RBC predicate rejected leader's PROPOSE");
                    continue;
                }
                let d = digest(&m);
                let stripes = codec::encode(k, n, &m)?;
                from_leader = Some(d);
                known_message = Some(m);
                for (i, stripe) in stripes.into_iter().enumerate() {
                    transport.send(i, tag, RbcWireMessage::Echo { digest: d, stripe }.encode());
                }
            }
            RbcWireMessage::Echo { digest: d, stripe } => {
                if !echo_senders.insert(sender) {
                    continue;
                }
                let count = echo_counter.entry(stripe.clone()).or_insert(0);
                *count += 1;
                if *count >= f + 1 {
                    ready_digest = Some(d);
                    ready_stripe = Some(stripe);
                }
                if echo_senders.len() >= echo_threshold && !ready_sent {
                    if let (Some(d), Some(s)) = (ready_digest, ready_stripe.clone()) {
                        ready_sent = true;
                        transport.broadcast(tag, RbcWireMessage::Ready { digest: d, stripe: s }.encode());
                    }
                }
            }
            RbcWireMessage::Ready { digest: d, stripe } => {
                if !ready_senders.insert(sender) {
                    continue;
                }
                let table = ready_tables.entry(d).or_insert_with(|| vec![None; n]);
                table[sender] = Some(stripe);

                if ready_senders.len() >= ready_threshold && !ready_sent {
                    if let (Some(rd), Some(rs)) = (ready_digest, ready_stripe.clone()) {
                        ready_sent = true;
                        transport.broadcast(tag, RbcWireMessage::Ready { digest: rd, stripe: rs }.encode());
                    }
                }

                if ready_senders.len() >= output_threshold {
                    if from_leader == Some(d) {
                        return Ok(known_message.clone().expect("from_leader implies known_message"));
                    }
                    if let Some(table) = ready_tables.get(&d) {
                        if let Ok(mp) = codec::decode(k, n, table) {
                            if digest(&mp) == d {
                                return Ok(mp);
                            }
                        }
                    }
                }
            }
        }
    }
}
