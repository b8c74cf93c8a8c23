//! Top-level ADKG instance (C11): owns the `n` ACSS dealer tasks, the ACS coordinator, and the
//! key-derivation phase, wired together with a `CancellationToken` per §5's cooperative-teardown
//! model.
//!
//! Task spawning and `tracing` instrumentation follow `client/ceremony_manager.rs`'s
//! `CeremonyManager` (one `tokio::spawn` per ceremony instance, each wrapped in its own
//! `info_span`); the CancellationToken teardown order (demultiplexer, ACSS tasks, ACS sub-tasks,
//! then the driver itself) is this crate's reference model's `task_scope` idiom re-expressed with
//! `tokio_util::sync::CancellationToken`, since `task_scope`'s own `utilities` crate is
//! Substrate-specific and was dropped (see `DESIGN.md`).

use std::{collections::HashMap, sync::Arc};

use rand::SeedableRng;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::{
    acs::{run_acs, wait_for_dealer},
    acss::{run_acss, AcssOutput},
    error::AdkgError,
    group::{FieldElement, Scalar},
    keyderive::{run_key_derivation, KeyDerivationOutput},
    party::{PartyId, Roster},
    transport::Transport,
};

/// A handle to a running ADKG instance, letting the caller request cooperative cancellation
/// without waiting on [`run_adkg`] to return.
#[derive(Clone)]
pub struct AdkgHandle {
    cancel: CancellationToken,
}

impl AdkgHandle {
    /// Cancels every task this instance spawned. Already-completed work (e.g. a dealer's own ACSS
    /// output) is not undone; in-flight `.await`s observe the cancellation at their next
    /// suspension point and return [`AdkgError::Cancelled`].
    pub fn kill(&self) {
        self.cancel.cancel();
    }
}

/// Spawns one ACSS task per dealer `0..n`, this party dealing `sc` fresh random values as dealer
/// `my_id` and verifying every other dealer's proposal as a recipient. Completions are written
/// into `acss_outputs` and announced on `acss_signal` for `acs::run_acs` to consume.
fn spawn_acss_tasks(
    transport: Arc<dyn Transport>,
    roster: Arc<Roster>,
    acss_outputs: Arc<Mutex<HashMap<PartyId, AcssOutput>>>,
    acss_signal: Arc<Notify>,
    cancel: &CancellationToken,
) {
    let n = roster.n();
    let sc = roster.params.sc();
    let my_id = roster.my_id();

    for dealer in 0..n {
        let transport = transport.clone();
        let roster = roster.clone();
        let acss_outputs = acss_outputs.clone();
        let acss_signal = acss_signal.clone();
        let cancel = cancel.child_token();

        let values =
            if dealer == my_id { Some((0..sc).map(|_| Scalar::random(&mut rand::thread_rng())).collect()) } else { None };

        let span = info_span!("acss", dealer, my_id);
        tokio::spawn(
            async move {
                let mut rng = rand::rngs::StdRng::from_entropy();
                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    r = run_acss(transport.as_ref(), roster.as_ref(), dealer, values, &mut rng) => r,
                };
                match result {
                    Ok(out) => {
                        acss_outputs.lock().await.insert(dealer, out);
                        acss_signal.notify_waiters();
                    }
                    Err(error) => warn!(dealer, %error, "ACSS instance failed"),
                }
            }
            .instrument(span),
        );
    }
}

/// Runs one complete ADKG instance: deals and verifies ACSS for every party, agrees on a common
/// dealer subset `mks`, and derives the combined public key and this party's scalar share of the
/// secret behind it.
///
/// Returns `(handle, result)`; the handle is live for the duration of the run and can be used by a
/// concurrently-held reference to cancel the instance early (e.g. on process shutdown), though by
/// the time this function returns the instance has already torn itself down normally.
pub async fn run_adkg(
    transport: Arc<dyn Transport>,
    roster: Arc<Roster>,
) -> (AdkgHandle, Result<KeyDerivationOutput, AdkgError>) {
    let cancel = CancellationToken::new();
    let handle = AdkgHandle { cancel: cancel.clone() };
    let result = run_adkg_inner(transport, roster, &cancel).await;
    cancel.cancel();
    (handle, result)
}

async fn run_adkg_inner(
    transport: Arc<dyn Transport>,
    roster: Arc<Roster>,
    cancel: &CancellationToken,
) -> Result<KeyDerivationOutput, AdkgError> {
    let acss_outputs: Arc<Mutex<HashMap<PartyId, AcssOutput>>> = Arc::new(Mutex::new(HashMap::new()));
    let acss_signal = Arc::new(Notify::new());

    spawn_acss_tasks(transport.clone(), roster.clone(), acss_outputs.clone(), acss_signal.clone(), cancel);

    let acs_span = info_span!("acs", my_id = roster.my_id());
    let mks = tokio::select! {
        _ = cancel.cancelled() => return Err(AdkgError::Cancelled),
        r = run_acs(transport.clone(), roster.clone(), acss_outputs.clone(), acss_signal.clone()).instrument(acs_span) => r?,
    };

    // Every dealer named in `mks` was, by `acs::SubsetPredicate`'s own guarantee, locally ACSS-
    // complete for whichever party's RBC this party validated directly; a party that instead
    // recovered a proposal via erasure decoding has no such guarantee yet, so wait here rather
    // than risk handing key derivation a `mks` entry it hasn't cached.
    for &dealer in &mks {
        tokio::select! {
            _ = cancel.cancelled() => return Err(AdkgError::Cancelled),
            _ = wait_for_dealer(&acss_outputs, &acss_signal, dealer) => {}
        }
    }

    let snapshot = acss_outputs.lock().await.clone();
    let mut rng = rand::rngs::StdRng::from_entropy();
    let keyderive_span = info_span!("keyderive", my_id = roster.my_id());
    tokio::select! {
        _ = cancel.cancelled() => Err(AdkgError::Cancelled),
        r = run_key_derivation(transport.as_ref(), roster.as_ref(), &mks, &snapshot, &mut rng).instrument(keyderive_span) => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{generator_g, GroupElement};
    use crate::party::Params;
    use crate::transport::InProcessTransport;

    #[tokio::test]
    async fn s1_all_honest_end_to_end_run_produces_one_shared_public_key() {
        let n = 4;
        let t = 1;
        let params = Params::new(n, t);
        let rosters: Vec<Arc<Roster>> = (0..n).map(|i| Arc::new(Roster::static_pki(params, i))).collect();
        let net = InProcessTransport::new_network(n);

        let mut handles = Vec::new();
        for (transport, roster) in net.into_iter().zip(rosters) {
            let transport: Arc<dyn Transport> = Arc::new(transport);
            handles.push(tokio::spawn(async move { run_adkg(transport, roster).await.1 }));
        }

        let mut outputs = Vec::new();
        for h in handles {
            outputs.push(h.await.unwrap().unwrap());
        }

        for out in &outputs {
            assert_eq!(out.pk, outputs[0].pk);
            assert_eq!(out.mks.len(), n - t);
        }
        let deg = params.deg();
        let share_points: Vec<(PartyId, Scalar)> =
            outputs.iter().enumerate().take(deg + 1).map(|(i, out)| (i, out.sk_share)).collect();
        let reconstructed = crate::poly::interpolate_at_zero(&share_points);
        assert_eq!(generator_g().mul(&reconstructed), outputs[0].pk);
    }
}
