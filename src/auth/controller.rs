use std::time::Duration;

use super::apdu::{
    CONTROL_ATTESTATION_CLOSE, CONTROL_FAILURE, CONTROL_SUCCESS, CommandApdu, HOMEKEY_AID,
};
use super::context::AuthContext;
use super::standard::StandardOutcome;
use super::transport::{Link, NfcTransport};
use super::{AuthError, AuthSuccess, KeyFlow, attestation, fast, standard, unix_now};
use crate::config::{APDU_TIMEOUT_MS, MAX_ENDPOINTS_PER_ISSUER, SESSION_BUDGET_MS};
use crate::crypto::hex;
use crate::store::{Endpoint, Enrollment, EnrollmentKind, ReaderStore};

#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub preferred_flow: KeyFlow,
    pub apdu_timeout: Duration,
    pub session_budget: Duration,
    /// Send `80 3C 00 00` when a HomeKey tap fails.
    pub send_failure_status: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            preferred_flow: KeyFlow::Fast,
            apdu_timeout: Duration::from_millis(APDU_TIMEOUT_MS),
            session_budget: Duration::from_millis(SESSION_BUDGET_MS),
            send_failure_status: true,
        }
    }
}

/// Run one tap against the selected target: applet select, Auth0, then
/// FAST / STANDARD / ATTESTATION per `opts.preferred_flow`. The store is
/// only mutated once the endpoint has acknowledged the final control APDU.
pub fn authenticate(
    store: &mut ReaderStore,
    transport: &mut dyn NfcTransport,
    opts: &AuthOptions,
) -> Result<AuthSuccess, AuthError> {
    let mut link = Link::new(transport, opts.session_budget, opts.apdu_timeout);
    let result = run_flows(store, &mut link, opts);

    match &result {
        Ok(success) => {
            tracing::info!(
                flow = %success.flow,
                issuer = %hex(&success.issuer_id),
                endpoint = %hex(&success.endpoint_id),
                "HomeKey authentication succeeded"
            );
        }
        Err(AuthError::AppletNotSelected(sw)) => {
            tracing::debug!(sw = format!("{sw:04X}"), "Target is not a HomeKey endpoint");
        }
        Err(e) => {
            tracing::info!(kind = ?e.kind(), error = %e, "HomeKey authentication failed");
            if opts.send_failure_status && !matches!(e, AuthError::Transport(_)) {
                if let Err(e) = link.exchange("CONTROL", &CommandApdu::control_flow(CONTROL_FAILURE)) {
                    tracing::debug!(error = %e, "Failure status not delivered");
                }
            }
        }
    }
    result
}

fn run_flows(
    store: &mut ReaderStore,
    link: &mut Link<'_>,
    opts: &AuthOptions,
) -> Result<AuthSuccess, AuthError> {
    let select = link.exchange("SELECT", &CommandApdu::select(&HOMEKEY_AID))?;
    if !select.is_success() {
        return Err(AuthError::AppletNotSelected(select.sw));
    }

    let ctx = AuthContext::new(&store.data().identity);
    let body = link.exchange_ok("AUTH0", &ctx.auth0_command()?)?;
    let transcript = ctx.accept_auth0(&body)?;

    // FAST
    if opts.preferred_flow == KeyFlow::Fast {
        if let Some(r) = fast::find_endpoint_by_cryptogram(store.data(), &transcript)? {
            let (issuer, endpoint) = store.data().endpoint(r).ok_or(AuthError::NotFound("endpoint"))?;
            let success = AuthSuccess {
                flow: KeyFlow::Fast,
                issuer_id: issuer.issuer_id,
                endpoint_id: endpoint.endpoint_id,
            };
            link.exchange_ok("CONTROL", &CommandApdu::control_flow(CONTROL_SUCCESS))?;
            return Ok(success);
        }
        tracing::debug!("No endpoint matches the FAST cryptogram");
    }

    // STANDARD
    let (keys, mut secure, device, issuer_hint) = match standard::run(store.data(), &transcript, link)? {
        StandardOutcome::Success { endpoint, keys, .. } if opts.preferred_flow != KeyFlow::Attestation => {
            link.exchange_ok("CONTROL", &CommandApdu::control_flow(CONTROL_SUCCESS))?;
            let (issuer, ep) = store.data().endpoint(endpoint).ok_or(AuthError::NotFound("endpoint"))?;
            let success = AuthSuccess {
                flow: KeyFlow::Standard,
                issuer_id: issuer.issuer_id,
                endpoint_id: ep.endpoint_id,
            };
            let persistent_key = *keys.persistent_key;
            commit_logged(store, |data| {
                if let Some(ep) = data.endpoint_mut(endpoint) {
                    ep.persistent_key = persistent_key;
                    ep.last_used_at = unix_now();
                    ep.counter = ep.counter.wrapping_add(1);
                }
            });
            return Ok(success);
        }
        StandardOutcome::Success { endpoint, keys, secure, device } => {
            (keys, secure, device, Some(endpoint.issuer))
        }
        StandardOutcome::Upgrade { keys, secure, device, issuer_hint } => {
            (keys, secure, device, issuer_hint)
        }
    };

    // ATTESTATION
    if let Some(hint) = issuer_hint.and_then(|i| store.data().issuers.get(i)) {
        tracing::debug!(issuer = %hex(&hint.issuer_id), "Attesting, probable issuer");
    }
    let verified = attestation::run(store.data(), &transcript, &mut secure, &device, link)?;

    let mut endpoint = Endpoint::new(&verified.device_public_key)?;
    let now = unix_now();
    endpoint.persistent_key = *keys.persistent_key;
    endpoint.last_used_at = now;
    endpoint.counter = 1;
    endpoint.enrollments.push(Enrollment {
        kind: EnrollmentKind::Attestation,
        unix_time: now,
        payload_hash: verified.document_hash,
        issuer_id: verified.issuer_id,
    });
    // Re-attestation keeps the endpoint's history.
    let existing = store.data().find_endpoint(&verified.endpoint_id);
    if let Some((_, prev)) = existing.and_then(|r| store.data().endpoint(r)) {
        let mut history = prev.enrollments.clone();
        history.append(&mut endpoint.enrollments);
        endpoint.enrollments = history;
        endpoint.key_type = prev.key_type;
        endpoint.counter = prev.counter.wrapping_add(1);
    }

    // Staged before the close so a full issuer fails the tap.
    let issuer = verified.issuer;
    let owner = store.data().issuers.get(issuer).ok_or(AuthError::NotFound("issuer"))?;
    let moves_in = existing.is_none_or(|r| r.issuer != issuer);
    if moves_in && owner.endpoints.len() >= MAX_ENDPOINTS_PER_ISSUER {
        return Err(AuthError::OutOfResources);
    }
    let mut next = store.data().clone();
    if let Some(r) = existing.filter(|r| r.issuer != issuer) {
        next.remove_endpoint(r);
    }
    next.upsert_endpoint(issuer, endpoint).ok_or(AuthError::NotFound("issuer"))?;

    link.exchange_ok("CONTROL", &CommandApdu::control_flow(CONTROL_ATTESTATION_CLOSE))?;
    commit_logged(store, |data| *data = next);

    Ok(AuthSuccess {
        flow: KeyFlow::Attestation,
        issuer_id: verified.issuer_id,
        endpoint_id: verified.endpoint_id,
    })
}

fn commit_logged<F>(store: &mut ReaderStore, f: F)
where
    F: FnOnce(&mut crate::store::ReaderData),
{
    if let Err(e) = store.commit(f) {
        tracing::error!(error = %e, "Failed to persist reader data; in-memory copy kept");
    }
}
