//! Asynchronous common subset (C6): `n` concurrent reliable broadcasts of each party's locally
//! observed ACSS-completion bitmap, gated into a final subset by `n` concurrent binary agreements.
//!
//! Ported from `original_source/adkg/adkg.py`'s `commonsubset`/`agreement` coroutines onto this
//! crate's `rbc`/`aba` tasks, using the `CeremonyManager`-style "own a shared map, communicate via
//! channels" idiom from `client/ceremony_manager.rs` for the cross-task `acss_outputs` state.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tracing::warn;

use crate::{
    aba::{run_aba, CommonCoin},
    acss::AcssOutput,
    error::AdkgError,
    group::{FieldElement, Point, Scalar},
    party::{PartyId, Roster},
    rbc::{run_rbc, RbcPredicate},
    transport::Transport,
    wire::Bitmap,
};

/// Blocks until `acss_outputs` contains `dealer`, without missing a notification that arrives
/// between the check and the wait (the `Notify`ed-before-checking pattern `tokio::sync::Notify`'s
/// own docs recommend).
pub(crate) async fn wait_for_dealer(
    acss_outputs: &Mutex<HashMap<PartyId, AcssOutput>>,
    acss_signal: &Notify,
    dealer: PartyId,
) {
    loop {
        let notified = acss_signal.notified();
        if acss_outputs.lock().await.contains_key(&dealer) {
            return;
        }
        notified.await;
    }
}

/// Blocks until at least `t+1` ACSS instances have completed locally, then returns this party's
/// proposal bitmap over every dealer completed so far (possibly more than `t+1`).
async fn wait_for_local_subset(
    acss_outputs: &Mutex<HashMap<PartyId, AcssOutput>>,
    acss_signal: &Notify,
    t: usize,
    n: usize,
) -> Vec<u8> {
    loop {
        let notified = acss_signal.notified();
        {
            let outputs = acss_outputs.lock().await;
            if outputs.len() >= t + 1 {
                return Bitmap::from_indices(n, outputs.keys().copied()).to_bytes().to_vec();
            }
        }
        notified.await;
    }
}

struct SubsetPredicate {
    acss_outputs: Arc<Mutex<HashMap<PartyId, AcssOutput>>>,
    acss_signal: Arc<Notify>,
    t: usize,
    n: usize,
}

#[async_trait]
impl RbcPredicate for SubsetPredicate {
    async fn check(&self, message: &[u8]) -> bool {
        if message.len() != self.n.div_ceil(8) {
            return false;
        }
        let bitmap = Bitmap::from_bytes(self.n, message);
        if bitmap.count() < self.t + 1 {
            return false;
        }
        for dealer in bitmap.indices() {
            wait_for_dealer(&self.acss_outputs, &self.acss_signal, dealer).await;
        }
        true
    }
}

/// A common coin keyed lazily by a subset whose membership is itself only known once its RBC
/// delivers — `toss` blocks on that delivery before it can even build the combined commitment.
struct LazyCoin {
    my_id: PartyId,
    t: usize,
    n: usize,
    rbc_result: watch::Receiver<Option<Vec<u8>>>,
    acss_outputs: Arc<Mutex<HashMap<PartyId, AcssOutput>>>,
}

#[async_trait]
impl CommonCoin for LazyCoin {
    async fn toss(&self, transport: &dyn Transport, tag: &str, round: u64) -> Result<bool, AdkgError> {
        let mut rx = self.rbc_result.clone();
        let bytes = loop {
            if let Some(b) = rx.borrow().clone() {
                break b;
            }
            rx.changed().await.map_err(|_| AdkgError::Cancelled)?;
        };
        if bytes.len() != self.n.div_ceil(8) {
            return Err(AdkgError::Deserialize);
        }
        let bitmap = Bitmap::from_bytes(self.n, &bytes);
        let outputs = self.acss_outputs.lock().await;
        let entries: Vec<(PartyId, Scalar, Vec<Point>)> = bitmap
            .indices()
            .filter_map(|d| outputs.get(&d).map(|o| (d, o.shares.msg[0], o.commits_feldman0.clone())))
            .collect();
        drop(outputs);
        if entries.is_empty() {
            // Every dealer in this subset was, by construction, locally complete for whoever
            // proposed it; a party still missing all of them here has fallen far enough behind
            // that this round's coin cannot be built. Surfacing an error here is preferable to
            // silently returning a fixed bit, which would break the coin's unpredictability.
            warn!(my_id = self.my_id, round, "common coin has no locally cached dealer for this subset");
            return Err(AdkgError::Deserialize);
        }
        let coin = crate::aba::AlgebraicCoin::new(self.my_id, self.t, entries);
        coin.toss(transport, tag, round).await
    }
}

/// Runs the common-subset phase to completion and returns `mks`: the sorted, deduplicated union
/// of every ABA-approved proposal, truncated to `n-t` entries in ascending dealer-id order so
/// every honest party computes the identical set.
pub async fn run_acs(
    transport: Arc<dyn Transport>,
    roster: Arc<Roster>,
    acss_outputs: Arc<Mutex<HashMap<PartyId, AcssOutput>>>,
    acss_signal: Arc<Notify>,
) -> Result<Vec<PartyId>, AdkgError> {
    let n = roster.n();
    let t = roster.t();
    let my_id = roster.my_id();

    let mut rbc_watch_tx = Vec::with_capacity(n);
    let mut rbc_watch_rx = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = watch::channel(None);
        rbc_watch_tx.push(tx);
        rbc_watch_rx.push(rx);
    }

    let (rbc_done_tx, mut rbc_done_rx) = mpsc::unbounded_channel::<(PartyId, Option<Vec<u8>>)>();
    for j in 0..n {
        let transport = transport.clone();
        let acss_outputs = acss_outputs.clone();
        let acss_signal = acss_signal.clone();
        let rbc_done_tx = rbc_done_tx.clone();
        let watch_tx = rbc_watch_tx[j].clone();
        tokio::spawn(async move {
            let predicate =
                SubsetPredicate { acss_outputs: acss_outputs.clone(), acss_signal: acss_signal.clone(), t, n };
            let input =
                if j == my_id { Some(wait_for_local_subset(&acss_outputs, &acss_signal, t, n).await) } else { None };
            let tag = format!("ACS/RBC/{j}");
            match run_rbc(transport.as_ref(), &tag, t, j, input, &predicate).await {
                Ok(bytes) => {
                    let _ = watch_tx.send(Some(bytes.clone()));
                    let _ = rbc_done_tx.send((j, Some(bytes)));
                }
                Err(_) => {
                    let _ = rbc_done_tx.send((j, None));
                }
            }
        });
    }
    drop(rbc_done_tx);

    let mut aba_input_txs: Vec<Option<oneshot::Sender<bool>>> = Vec::with_capacity(n);
    let (aba_done_tx, mut aba_done_rx) = mpsc::unbounded_channel::<(PartyId, Option<bool>)>();
    for j in 0..n {
        let (input_tx, input_rx) = oneshot::channel::<bool>();
        aba_input_txs.push(Some(input_tx));

        let transport = transport.clone();
        let acss_outputs = acss_outputs.clone();
        let rbc_watch = rbc_watch_rx[j].clone();
        let aba_done_tx = aba_done_tx.clone();
        tokio::spawn(async move {
            let Ok(input) = input_rx.await else {
                let _ = aba_done_tx.send((j, None));
                return;
            };
            let coin = LazyCoin { my_id, t, n, rbc_result: rbc_watch, acss_outputs };
            let tag = format!("ACS/ABA/{j}");
            let result = run_aba(transport.as_ref(), &tag, t, input, &coin).await;
            let _ = aba_done_tx.send((j, result.ok()));
        });
    }
    drop(aba_done_tx);

    let mut given_input = vec![false; n];
    let mut decisions: Vec<Option<bool>> = vec![None; n];
    let mut decided_count = 0;

    while decided_count < n {
        tokio::select! {
            msg = rbc_done_rx.recv() => {
                let Some((j, bytes)) = msg else { return Err(AdkgError::Cancelled) };
                if bytes.is_some() && !given_input[j] {
                    given_input[j] = true;
                    if let Some(tx) = aba_input_txs[j].take() {
                        let _ = tx.send(true);
                    }
                }
            }
            msg = aba_done_rx.recv() => {
                let Some((j, decision)) = msg else { return Err(AdkgError::Cancelled) };
                if decisions[j].is_some() {
                    continue;
                }
                let decision = decision.unwrap_or(false);
                decisions[j] = Some(decision);
                decided_count += 1;
                if decision {
                    for k in 0..n {
                        if !given_input[k] {
                            given_input[k] = true;
                            if let Some(tx) = aba_input_txs[k].take() {
                                let _ = tx.send(false);
                            }
                        }
                    }
                }
            }
        }
    }

    let mut mks: Vec<PartyId> = Vec::new();
    for j in 0..n {
        if decisions[j] != Some(true) {
            continue;
        }
        // This party may have decided `1` on `j` via the coin path without ever locally
        // delivering `j`'s RBC (e.g. it fed ABA `j` input `false`); block for the delivery rather
        // than skipping `j`, or honest parties could disagree on `mks`.
        let mut rx = rbc_watch_rx[j].clone();
        let bytes = loop {
            if let Some(b) = rx.borrow().clone() {
                break b;
            }
            if rx.changed().await.is_err() {
                return Err(AdkgError::Cancelled);
            }
        };
        let bitmap = Bitmap::from_bytes(n, &bytes);
        for d in bitmap.indices() {
            if !mks.contains(&d) {
                mks.push(d);
            }
        }
    }
    mks.sort_unstable();
    mks.truncate(roster.params.mks_size());
    Ok(mks)
}
