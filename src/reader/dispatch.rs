use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{MgmtEvent, NfcEvent, TagInfo, ecp};
use crate::auth::{self, AuthError, AuthOptions, AuthSuccess, NfcTransport};
use crate::hap;
use crate::notify::{AuthEvent, Notifier, ReaderEvent};
use crate::store::{ReaderStore, StoreError};

/// The reader's core task. Taps are handled one at a time in arrival order;
/// a management command that arrives during a tap waits in its queue until
/// the tap has finished.
pub async fn run_reader_loop(
    mut nfc_rx: mpsc::Receiver<NfcEvent>,
    mut mgmt_rx: mpsc::Receiver<MgmtEvent>,
    transport: Box<dyn NfcTransport>,
    store: Arc<Mutex<ReaderStore>>,
    notifier: Notifier,
    opts: AuthOptions,
) {
    let mut transport = transport;
    refresh_polling_frame(transport.as_mut(), &store);
    tracing::info!("Reader loop running");

    let mut nfc_open = true;
    let mut mgmt_open = true;
    while nfc_open || mgmt_open {
        tokio::select! {
            biased;
            event = nfc_rx.recv(), if nfc_open => match event {
                Some(NfcEvent::TagSelected(tag)) => {
                    match handle_tap(transport, &store, tag, &opts).await {
                        Some((t, event)) => {
                            transport = t;
                            notifier.publish(event);
                        }
                        None => return,
                    }
                }
                Some(NfcEvent::FieldUp) => tracing::debug!("Field up"),
                Some(NfcEvent::FieldDown) => tracing::debug!("Field down"),
                None => nfc_open = false,
            },
            event = mgmt_rx.recv(), if mgmt_open => match event {
                Some(event) => handle_mgmt(event, transport.as_mut(), &store),
                None => mgmt_open = false,
            },
        }
    }
    tracing::info!("Reader loop exiting (queues closed)");
}

/// Run one tap on a blocking thread. Returns the transport back together
/// with the event to publish, or `None` if the worker died with it.
async fn handle_tap(
    transport: Box<dyn NfcTransport>,
    store: &Arc<Mutex<ReaderStore>>,
    tag: TagInfo,
    opts: &AuthOptions,
) -> Option<(Box<dyn NfcTransport>, ReaderEvent)> {
    tracing::debug!(uid = %crate::crypto::hex(&tag.uid), "Tag selected");
    let store = store.clone();
    let opts = opts.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut transport = transport;
        let outcome = match store.lock() {
            Ok(mut guard) => {
                let result = auth::authenticate(&mut guard, transport.as_mut(), &opts);
                result.map(|s| (s, guard.data().identity.group_identifier))
            }
            Err(_) => Err(AuthError::Store(StoreError::Poisoned)),
        };
        (transport, outcome)
    })
    .await;

    let (transport, outcome) = match joined {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Tap worker failed, NFC transport lost");
            return None;
        }
    };
    Some((transport, tap_event(outcome, tag)))
}

fn tap_event(outcome: Result<(AuthSuccess, [u8; 8]), AuthError>, tag: TagInfo) -> ReaderEvent {
    match outcome {
        Ok((success, reader_id)) => ReaderEvent::HomeKeyAuth(AuthEvent {
            issuer_id: success.issuer_id,
            endpoint_id: success.endpoint_id,
            reader_id,
            flow: success.flow,
        }),
        Err(AuthError::AppletNotSelected(_)) => ReaderEvent::TagTap(tag),
        Err(_) => ReaderEvent::HomeKeyFailed,
    }
}

fn handle_mgmt(event: MgmtEvent, transport: &mut dyn NfcTransport, store: &Arc<Mutex<ReaderStore>>) {
    match event {
        MgmtEvent::ControlPoint { request, reply } => {
            let response = match store.lock() {
                Ok(mut guard) => hap::handle_control_point(&mut guard, &request),
                Err(_) => {
                    tracing::error!("Reader store lock poisoned, dropping control-point request");
                    return;
                }
            };
            refresh_polling_frame(transport, store);
            if reply.send(response).is_err() {
                tracing::debug!("Control-point requester went away");
            }
        }
        MgmtEvent::SupportedConfiguration { reply } => {
            if reply.send(hap::supported_configuration()).is_err() {
                tracing::debug!("Supported-configuration requester went away");
            }
        }
    }
}

fn refresh_polling_frame(transport: &mut dyn NfcTransport, store: &Arc<Mutex<ReaderStore>>) {
    let group = match store.lock() {
        Ok(guard) => guard.data().identity.group_identifier,
        Err(_) => {
            tracing::error!("Reader store lock poisoned, polling frame not updated");
            return;
        }
    };
    transport.update_polling_frame(&ecp::ecp_frame(&group));
}
