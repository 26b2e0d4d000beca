use super::types::{
    ControlPointRequest, ControlPointResponse, DeviceCredentialRequest, DeviceCredentialResponse,
    Opcode, ReaderKeyResponse, Status,
};
use crate::auth::unix_now;
use crate::config::{MAX_ENDPOINTS_PER_ISSUER, MAX_ISSUERS};
use crate::crypto::{self, hex};
use crate::store::{Endpoint, EndpointRef, Enrollment, EnrollmentKind, Issuer, ReaderData, ReaderIdentity, ReaderStore};
use crate::tlv::Tlv8Encoder;

const SUPPORTED_MAX_ISSUERS: u8 = 0x01;
const SUPPORTED_MAX_ENDPOINTS: u8 = 0x02;

/// Value of the read-only supported-configuration characteristic.
pub fn supported_configuration() -> Vec<u8> {
    Tlv8Encoder::new()
        .add_u8(SUPPORTED_MAX_ISSUERS, MAX_ISSUERS as u8)
        .add_u8(SUPPORTED_MAX_ENDPOINTS, MAX_ENDPOINTS_PER_ISSUER as u8)
        .build()
}

/// Handle one control-point write and return the TLV8 response. Changes
/// are computed on a copy of the store and committed in one piece; only
/// the status byte reaches the controller.
pub fn handle_control_point(store: &mut ReaderStore, request: &[u8]) -> Vec<u8> {
    let request = match ControlPointRequest::parse(request) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed control-point request");
            let opcode = request.get(2).copied().unwrap_or(0);
            return ControlPointResponse::status_only(opcode, Status::NotSupported).encode();
        }
    };

    let mut next = store.data().clone();
    let response = apply(&mut next, &request);
    tracing::info!(
        opcode = request.opcode,
        status = ?response.status,
        "Control-point request handled"
    );

    if next != *store.data() {
        if let Err(e) = store.commit(|data| *data = next) {
            tracing::error!(error = %e, "Failed to persist reader data; in-memory copy kept");
        }
    }
    response.encode()
}

/// Apply `request` to `data`, returning the response to send.
pub fn apply(data: &mut ReaderData, request: &ControlPointRequest) -> ControlPointResponse {
    let Some(op) = Opcode::from_byte(request.opcode) else {
        return ControlPointResponse::status_only(request.opcode, Status::NotSupported);
    };
    match op {
        Opcode::GetReaderKey => get_reader_key(data, request.opcode),
        Opcode::SetReaderKey => set_reader_key(data, request),
        Opcode::RemoveReaderKey => {
            *data = ReaderData::generate();
            tracing::info!("Reader key removed, HomeKey state reset");
            ControlPointResponse::status_only(request.opcode, Status::Success)
        }
        Opcode::AddDeviceCredential => add_device_credentials(data, request),
        Opcode::ListDevices => list_devices(data, request),
        Opcode::RemoveDevice => remove_devices(data, request),
        Opcode::DeviceCredentialResponse => {
            ControlPointResponse::status_only(request.opcode, Status::NotSupported)
        }
    }
}

fn get_reader_key(data: &ReaderData, opcode: u8) -> ControlPointResponse {
    ControlPointResponse {
        reader_response: Some(ReaderKeyResponse {
            key_identifier: Some(data.identity.group_identifier),
            status: None,
            public_key: Some(data.identity.public_key.clone()),
        }),
        ..ControlPointResponse::status_only(opcode, Status::Success)
    }
}

fn install_reader_key(data: &mut ReaderData, request: &ControlPointRequest) -> Status {
    let Some(req) = &request.reader_request else {
        return Status::NotSupported;
    };
    let Some(private_key) = &req.private_key else {
        return Status::NotSupported;
    };
    let unique_identifier = req
        .unique_identifier
        .unwrap_or(data.identity.unique_identifier);
    let identity =
        match ReaderIdentity::from_private_key(private_key, req.group_identifier, unique_identifier) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected reader key");
                return Status::NotSupported;
            }
        };
    if data.identity.provisioned {
        // Installed key may be re-sent, not replaced.
        return if identity.public_key == data.identity.public_key {
            Status::Success
        } else {
            Status::Duplicate
        };
    }
    tracing::info!(group = %hex(&identity.group_identifier), "Reader key installed");
    data.identity = identity;
    Status::Success
}

fn set_reader_key(data: &mut ReaderData, request: &ControlPointRequest) -> ControlPointResponse {
    let status = install_reader_key(data, request);
    ControlPointResponse {
        reader_response: Some(ReaderKeyResponse {
            key_identifier: Some(data.identity.group_identifier),
            status: Some(status),
            public_key: None,
        }),
        ..ControlPointResponse::status_only(request.opcode, status)
    }
}

fn is_issuer_key(key: &[u8]) -> bool {
    match key.len() {
        32 => true,
        33 => matches!(key[0], 0x02 | 0x03),
        65 => key[0] == 0x04,
        _ => false,
    }
}

fn add_one(data: &mut ReaderData, req: &DeviceCredentialRequest, raw: Vec<u8>) -> DeviceCredentialResponse {
    let Some(public_key) = &req.public_key else {
        return DeviceCredentialResponse {
            key_identifier: None,
            issuer_key_identifier: req.issuer_key_identifier,
            status: Status::NotSupported,
        };
    };

    // Issuer key
    let Some(issuer_id) = req.issuer_key_identifier else {
        let issuer_id = crypto::issuer_id_of(public_key);
        let status = if !is_issuer_key(public_key) {
            Status::NotSupported
        } else if data.find_issuer(&issuer_id).is_some() {
            Status::Duplicate
        } else if data.issuers.len() >= MAX_ISSUERS {
            Status::OutOfResources
        } else {
            data.issuers.push(Issuer::new(public_key));
            tracing::info!(issuer = %hex(&issuer_id), "Issuer added");
            Status::Success
        };
        return DeviceCredentialResponse {
            key_identifier: Some(issuer_id.to_vec()),
            issuer_key_identifier: None,
            status,
        };
    };

    // Endpoint key under a known issuer
    let mut response = DeviceCredentialResponse {
        key_identifier: None,
        issuer_key_identifier: Some(issuer_id),
        status: Status::Success,
    };
    let Some(issuer) = data.find_issuer(&issuer_id) else {
        response.status = Status::DoesNotExist;
        return response;
    };
    let mut endpoint = match Endpoint::new(public_key) {
        Ok(e) => e,
        Err(_) => {
            response.status = Status::NotSupported;
            return response;
        }
    };
    response.key_identifier = Some(endpoint.endpoint_id.to_vec());
    let owner = &data.issuers[issuer];
    response.status = if data.find_endpoint(&endpoint.endpoint_id).is_some() {
        Status::Duplicate
    } else if owner.endpoints.len() >= MAX_ENDPOINTS_PER_ISSUER {
        Status::OutOfResources
    } else {
        endpoint.key_type = req.key_type.unwrap_or(0);
        endpoint.enrollments.push(Enrollment {
            kind: EnrollmentKind::Hap,
            unix_time: unix_now(),
            payload_hash: crypto::sha256(&raw),
            issuer_id,
        });
        tracing::info!(
            issuer = %hex(&issuer_id),
            endpoint = %hex(&endpoint.endpoint_id),
            "Endpoint added"
        );
        data.upsert_endpoint(issuer, endpoint);
        Status::Success
    };
    response
}

/// First failing item status, or success. A batch is applied only when
/// every item succeeds.
fn overall(items: &[DeviceCredentialResponse]) -> Status {
    items
        .iter()
        .map(|r| r.status)
        .find(|s| *s != Status::Success)
        .unwrap_or(Status::Success)
}

fn add_device_credentials(data: &mut ReaderData, request: &ControlPointRequest) -> ControlPointResponse {
    if request.device_requests.is_empty() {
        return ControlPointResponse::status_only(request.opcode, Status::NotSupported);
    }
    let mut scratch = data.clone();
    let items: Vec<DeviceCredentialResponse> = request
        .device_requests
        .iter()
        .map(|req| add_one(&mut scratch, req, req.encode()))
        .collect();
    let status = overall(&items);
    if status == Status::Success {
        *data = scratch;
    }
    let opcode = if status == Status::Success {
        Opcode::DeviceCredentialResponse as u8
    } else {
        request.opcode
    };
    ControlPointResponse {
        device_responses: items,
        ..ControlPointResponse::status_only(opcode, status)
    }
}

fn list_devices(data: &ReaderData, request: &ControlPointRequest) -> ControlPointResponse {
    let filter = request
        .device_requests
        .first()
        .and_then(|r| r.issuer_key_identifier);
    if let Some(id) = filter {
        if data.find_issuer(&id).is_none() {
            return ControlPointResponse::status_only(request.opcode, Status::DoesNotExist);
        }
    }

    let mut items = Vec::new();
    for issuer in data
        .issuers
        .iter()
        .filter(|i| filter.is_none_or(|id| i.issuer_id == id))
    {
        if issuer.endpoints.is_empty() {
            items.push(DeviceCredentialResponse {
                key_identifier: None,
                issuer_key_identifier: Some(issuer.issuer_id),
                status: Status::Success,
            });
        }
        items.extend(issuer.endpoints.iter().map(|e| DeviceCredentialResponse {
            key_identifier: Some(e.endpoint_id.to_vec()),
            issuer_key_identifier: Some(issuer.issuer_id),
            status: Status::Success,
        }));
    }
    ControlPointResponse {
        device_responses: items,
        ..ControlPointResponse::status_only(request.opcode, Status::Success)
    }
}

fn remove_one(data: &mut ReaderData, req: &DeviceCredentialRequest) -> DeviceCredentialResponse {
    let mut response = DeviceCredentialResponse {
        key_identifier: req.key_identifier.clone(),
        issuer_key_identifier: req.issuer_key_identifier,
        status: Status::DoesNotExist,
    };
    match (&req.key_identifier, req.issuer_key_identifier) {
        // Issuer removal only when no endpoint id is given.
        (Some(endpoint_id), _) if endpoint_id.len() != 6 => response.status = Status::NotSupported,
        (Some(endpoint_id), scope) => {
            let found: Option<EndpointRef> = data
                .endpoints()
                .find(|(_, issuer, e)| {
                    e.endpoint_id[..] == endpoint_id[..] && scope.is_none_or(|id| issuer.issuer_id == id)
                })
                .map(|(r, _, _)| r);
            if let Some(r) = found {
                data.remove_endpoint(r);
                tracing::info!(endpoint = %hex(endpoint_id), "Endpoint removed");
                response.status = Status::Success;
            }
        }
        (None, Some(issuer_id)) => {
            if data.remove_issuer(&issuer_id).is_some() {
                tracing::info!(issuer = %hex(&issuer_id), "Issuer removed");
                response.status = Status::Success;
            }
        }
        (None, None) => response.status = Status::NotSupported,
    }
    response
}

fn remove_devices(data: &mut ReaderData, request: &ControlPointRequest) -> ControlPointResponse {
    if request.device_requests.is_empty() {
        return ControlPointResponse::status_only(request.opcode, Status::NotSupported);
    }
    let mut scratch = data.clone();
    let items: Vec<DeviceCredentialResponse> = request
        .device_requests
        .iter()
        .map(|req| remove_one(&mut scratch, req))
        .collect();
    let status = overall(&items);
    if status == Status::Success {
        *data = scratch;
    }
    ControlPointResponse {
        status,
        device_responses: items,
        ..ControlPointResponse::status_only(request.opcode, Status::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hap::types::ReaderKeyRequest;
    use crate::store::MemoryStorage;

    fn store() -> ReaderStore {
        ReaderStore::load(Box::new(MemoryStorage::new())).unwrap()
    }

    fn request(opcode: u8, device_requests: Vec<DeviceCredentialRequest>) -> Vec<u8> {
        ControlPointRequest { opcode, device_requests, reader_request: None }.encode()
    }

    fn add_issuer(key: &[u8]) -> DeviceCredentialRequest {
        DeviceCredentialRequest { public_key: Some(key.to_vec()), ..Default::default() }
    }

    fn add_endpoint(key: &[u8], issuer: [u8; 8]) -> DeviceCredentialRequest {
        DeviceCredentialRequest {
            key_type: Some(1),
            public_key: Some(key.to_vec()),
            issuer_key_identifier: Some(issuer),
            ..Default::default()
        }
    }

    fn send(store: &mut ReaderStore, bytes: &[u8]) -> ControlPointResponse {
        ControlPointResponse::parse(&handle_control_point(store, bytes)).unwrap()
    }

    #[test]
    fn test_supported_configuration() {
        assert_eq!(supported_configuration(), [0x01, 0x01, 16, 0x02, 0x01, 16]);
    }

    #[test]
    fn test_get_reader_key() {
        let mut store = store();
        let resp = send(&mut store, &request(0x01, vec![]));
        assert_eq!(resp.status, Status::Success);
        let reader = resp.reader_response.unwrap();
        assert_eq!(reader.key_identifier, Some(store.data().identity.group_identifier));
        assert_eq!(reader.public_key.unwrap(), store.data().identity.public_key);
    }

    #[test]
    fn test_set_reader_key_first_time_only() {
        let mut store = store();
        let key = crypto::generate_ephemeral_keypair();
        let set = |private: &[u8]| {
            ControlPointRequest {
                opcode: 0x02,
                device_requests: vec![],
                reader_request: Some(ReaderKeyRequest {
                    key_type: Some(2),
                    private_key: Some(private.to_vec()),
                    unique_identifier: Some([0xAB; 8]),
                    group_identifier: None,
                }),
            }
            .encode()
        };
        assert_eq!(send(&mut store, &set(key.private.as_slice())).status, Status::Success);
        assert!(store.data().identity.provisioned);
        assert_eq!(store.data().identity.public_key, key.public);
        assert_eq!(store.data().identity.group_identifier, crypto::hash_identifier(&key.public, true));

        // Same key again is accepted, a different one is not.
        assert_eq!(send(&mut store, &set(key.private.as_slice())).status, Status::Success);
        let other = crypto::generate_ephemeral_keypair();
        assert_eq!(send(&mut store, &set(other.private.as_slice())).status, Status::Duplicate);
        assert_eq!(store.data().identity.public_key, key.public);
    }

    #[test]
    fn test_invalid_reader_key() {
        let mut store = store();
        let bytes = ControlPointRequest {
            opcode: 0x02,
            device_requests: vec![],
            reader_request: Some(ReaderKeyRequest {
                private_key: Some(vec![0; 32]),
                ..Default::default()
            }),
        }
        .encode();
        assert_eq!(send(&mut store, &bytes).status, Status::NotSupported);
        assert!(!store.data().identity.provisioned);
    }

    #[test]
    fn test_add_issuer_twice_is_duplicate() {
        let mut store = store();
        let key = crypto::generate_ephemeral_keypair().public;
        let resp = send(&mut store, &request(0x04, vec![add_issuer(&key)]));
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.opcode, 0x05);
        assert_eq!(resp.device_responses[0].key_identifier.as_deref(), Some(&crypto::issuer_id_of(&key)[..]));

        let before = store.data().clone();
        let resp = send(&mut store, &request(0x04, vec![add_issuer(&key)]));
        assert_eq!(resp.status, Status::Duplicate);
        assert_eq!(*store.data(), before);
    }

    #[test]
    fn test_add_endpoint_requires_issuer() {
        let mut store = store();
        let endpoint = crypto::generate_ephemeral_keypair().public;
        let resp = send(&mut store, &request(0x04, vec![add_endpoint(&endpoint, [1; 8])]));
        assert_eq!(resp.status, Status::DoesNotExist);
        assert_eq!(store.endpoint_count(), 0);
    }

    #[test]
    fn test_add_issuer_and_endpoint_in_one_request() {
        let mut store = store();
        let issuer_key = [7u8; 32];
        let issuer_id = crypto::issuer_id_of(&issuer_key);
        let endpoint = crypto::generate_ephemeral_keypair().public;
        let resp = send(
            &mut store,
            &request(0x04, vec![add_issuer(&issuer_key), add_endpoint(&endpoint, issuer_id)]),
        );
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.device_responses.len(), 2);
        let (_, _, ep) = store.data().endpoints().next().unwrap();
        assert!(!ep.is_provisioned());
        assert_eq!(ep.key_type, 1);
        assert_eq!(ep.enrollments[0].kind, EnrollmentKind::Hap);
    }

    #[test]
    fn test_issuer_limit() {
        let mut data = ReaderData::generate();
        for i in 0..MAX_ISSUERS {
            data.issuers.push(Issuer::new(&[i as u8 + 1; 32]));
        }
        let req = ControlPointRequest {
            opcode: 0x04,
            device_requests: vec![add_issuer(&[0xEE; 32])],
            reader_request: None,
        };
        assert_eq!(apply(&mut data, &req).status, Status::OutOfResources);
        assert_eq!(data.issuers.len(), MAX_ISSUERS);
    }

    #[test]
    fn test_list_and_remove() {
        let mut store = store();
        let issuer_key = [7u8; 32];
        let issuer_id = crypto::issuer_id_of(&issuer_key);
        let endpoint = crypto::generate_ephemeral_keypair().public;
        let endpoint_id = crypto::endpoint_id_of(&endpoint);
        send(&mut store, &request(0x04, vec![add_issuer(&issuer_key), add_endpoint(&endpoint, issuer_id)]));

        let listed = send(&mut store, &request(0x06, vec![]));
        assert_eq!(listed.device_responses.len(), 1);
        assert_eq!(listed.device_responses[0].key_identifier.as_deref(), Some(&endpoint_id[..]));

        let remove = DeviceCredentialRequest { key_identifier: Some(endpoint_id.to_vec()), ..Default::default() };
        assert_eq!(send(&mut store, &request(0x07, vec![remove.clone()])).status, Status::Success);
        assert_eq!(send(&mut store, &request(0x07, vec![remove])).status, Status::DoesNotExist);

        // Issuer without endpoints is still listed.
        let listed = send(&mut store, &request(0x06, vec![]));
        assert_eq!(listed.device_responses.len(), 1);
        assert_eq!(listed.device_responses[0].key_identifier, None);

        let remove_issuer = DeviceCredentialRequest { issuer_key_identifier: Some(issuer_id), ..Default::default() };
        assert_eq!(send(&mut store, &request(0x07, vec![remove_issuer])).status, Status::Success);
        assert_eq!(store.issuer_count(), 0);
    }

    #[test]
    fn test_list_unknown_issuer_filter() {
        let mut store = store();
        let filter = DeviceCredentialRequest { issuer_key_identifier: Some([5; 8]), ..Default::default() };
        assert_eq!(send(&mut store, &request(0x06, vec![filter])).status, Status::DoesNotExist);
    }

    #[test]
    fn test_remove_reader_key_resets_identity() {
        let mut store = store();
        send(&mut store, &request(0x04, vec![add_issuer(&[7u8; 32])]));
        let group = store.data().identity.group_identifier;
        assert_eq!(send(&mut store, &request(0x03, vec![])).status, Status::Success);
        assert_eq!(store.issuer_count(), 0);
        assert_ne!(store.data().identity.group_identifier, group);
    }

    #[test]
    fn test_malformed_and_unknown() {
        let mut store = store();
        let resp = send(&mut store, &[0x01, 0x05]);
        assert_eq!(resp.status, Status::NotSupported);
        let resp = send(&mut store, &request(0x09, vec![]));
        assert_eq!((resp.opcode, resp.status), (0x09, Status::NotSupported));
    }

    #[test]
    fn test_remove_with_malformed_endpoint_id_keeps_issuer() {
        let mut store = store();
        let issuer_key = [7u8; 32];
        let issuer_id = crypto::issuer_id_of(&issuer_key);
        let endpoint = crypto::generate_ephemeral_keypair().public;
        send(&mut store, &request(0x04, vec![add_issuer(&issuer_key), add_endpoint(&endpoint, issuer_id)]));
        let before = store.data().clone();

        let remove = DeviceCredentialRequest {
            key_identifier: Some(vec![1; 8]),
            issuer_key_identifier: Some(issuer_id),
            ..Default::default()
        };
        let resp = send(&mut store, &request(0x07, vec![remove]));
        assert_eq!(resp.status, Status::NotSupported);
        assert_eq!(store.issuer_count(), 1);
        assert_eq!(store.endpoint_count(), 1);
        assert_eq!(*store.data(), before);
    }

    #[test]
    fn test_failed_add_batch_applies_nothing() {
        let mut store = store();
        let endpoint = crypto::generate_ephemeral_keypair().public;
        let before = store.data().clone();
        let resp = send(
            &mut store,
            &request(0x04, vec![add_issuer(&[7u8; 32]), add_endpoint(&endpoint, [9; 8])]),
        );
        assert_eq!(resp.status, Status::DoesNotExist);
        assert_eq!(resp.opcode, 0x04);
        assert_eq!(resp.device_responses.len(), 2);
        assert_eq!(store.issuer_count(), 0);
        assert_eq!(*store.data(), before);
    }

    #[test]
    fn test_failed_remove_batch_applies_nothing() {
        let mut store = store();
        let issuer_key = [7u8; 32];
        let issuer_id = crypto::issuer_id_of(&issuer_key);
        let endpoint = crypto::generate_ephemeral_keypair().public;
        let endpoint_id = crypto::endpoint_id_of(&endpoint);
        send(&mut store, &request(0x04, vec![add_issuer(&issuer_key), add_endpoint(&endpoint, issuer_id)]));

        let known = DeviceCredentialRequest { key_identifier: Some(endpoint_id.to_vec()), ..Default::default() };
        let unknown = DeviceCredentialRequest { key_identifier: Some(vec![0xEE; 6]), ..Default::default() };
        let resp = send(&mut store, &request(0x07, vec![known, unknown]));
        assert_eq!(resp.status, Status::DoesNotExist);
        assert_eq!(store.endpoint_count(), 1);
    }

    #[test]
    fn test_commit_failure_still_reports_success() {
        let storage = MemoryStorage::new();
        let mut store = ReaderStore::load(Box::new(storage.clone())).unwrap();
        storage.fail_writes(true);
        let resp = send(&mut store, &request(0x04, vec![add_issuer(&[7u8; 32])]));
        assert_eq!(resp.status, Status::Success);
        assert_eq!(store.issuer_count(), 1);
    }
}
