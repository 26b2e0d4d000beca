use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::crypto::{self, CryptoError, KeyPair};

pub const STORE_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderIdentity {
    pub group_identifier:  [u8; 8],
    pub unique_identifier: [u8; 8],
    pub private_key:       Vec<u8>,     // secp256r1 scalar, 32 bytes
    pub public_key:        Vec<u8>,     // uncompressed SEC1 point, 65 bytes
    pub key_x:             [u8; 32],
    pub provisioned:       bool,        // key installed over the control point
}

impl ReaderIdentity {
    /// Fresh random identity for a reader that has never been provisioned.
    pub fn generate() -> Self {
        let pair = crypto::generate_ephemeral_keypair();
        let mut group_identifier = [0u8; 8];
        let mut unique_identifier = [0u8; 8];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut group_identifier);
        rng.fill_bytes(&mut unique_identifier);
        Self {
            group_identifier,
            unique_identifier,
            private_key: pair.private.to_vec(),
            public_key: pair.public.to_vec(),
            key_x: pair.x(),
            provisioned: false,
        }
    }

    /// Identity installed by a HomeKit controller. Without an explicit group
    /// identifier the hash identifier of the public key is used.
    pub fn from_private_key(
        private_key: &[u8],
        group_identifier: Option<[u8; 8]>,
        unique_identifier: [u8; 8],
    ) -> Result<Self, CryptoError> {
        let pair = KeyPair::from_private(private_key)?;
        Ok(Self {
            group_identifier: group_identifier
                .unwrap_or_else(|| crypto::hash_identifier(&pair.public, true)),
            unique_identifier,
            private_key: pair.private.to_vec(),
            public_key: pair.public.to_vec(),
            key_x: pair.x(),
            provisioned: true,
        })
    }

    /// `group_identifier ‖ unique_identifier`, the transcript identifier.
    pub fn reader_identifier(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.group_identifier);
        out[8..].copy_from_slice(&self.unique_identifier);
        out
    }

    fn validate(&self) -> Result<(), StoreError> {
        let pair = KeyPair::from_private(&self.private_key)
            .map_err(|e| StoreError::Corrupt(format!("reader key: {e}")))?;
        if pair.public[..] != self.public_key[..] || pair.x() != self.key_x {
            return Err(StoreError::Corrupt("reader public key does not match".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentKind {
    Hap,
    Attestation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub kind:         EnrollmentKind,
    pub unix_time:    u64,
    pub payload_hash: [u8; 32],
    pub issuer_id:    [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub endpoint_id:    [u8; 6],    // SHA-1(public_key)[..6]
    pub public_key:     Vec<u8>,    // uncompressed SEC1 point, 65 bytes
    pub key_x:          [u8; 32],
    pub persistent_key: [u8; 32],   // all-zero until STANDARD/ATTESTATION succeeds
    pub key_type:       u8,
    pub last_used_at:   u64,        // Unix timestamp
    pub counter:        u32,
    pub enrollments:    Vec<Enrollment>,
}

impl Endpoint {
    pub fn new(public_key: &[u8]) -> Result<Self, CryptoError> {
        let key_x = crypto::point_x(public_key)?;
        Ok(Self {
            endpoint_id: crypto::endpoint_id_of(public_key),
            public_key: public_key.to_vec(),
            key_x,
            persistent_key: [0u8; 32],
            key_type: 0,
            last_used_at: 0,
            counter: 0,
            enrollments: Vec::new(),
        })
    }

    pub fn is_provisioned(&self) -> bool {
        self.persistent_key != [0u8; 32]
    }

    fn validate(&self) -> Result<(), StoreError> {
        if crypto::endpoint_id_of(&self.public_key) != self.endpoint_id {
            return Err(StoreError::Corrupt("endpoint id not derived from its key".into()));
        }
        match crypto::point_x(&self.public_key) {
            Ok(x) if x == self.key_x => Ok(()),
            _ => Err(StoreError::Corrupt("endpoint key_x mismatch".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub issuer_id:  [u8; 8],      // SHA-256("key-identifier" ‖ public_key)[..8]
    pub public_key: Vec<u8>,      // Ed25519 (32) or SEC1 point (33/65)
    pub endpoints:  Vec<Endpoint>,
}

impl Issuer {
    pub fn new(public_key: &[u8]) -> Self {
        Self {
            issuer_id: crypto::issuer_id_of(public_key),
            public_key: public_key.to_vec(),
            endpoints: Vec::new(),
        }
    }

    pub fn find_endpoint(&self, endpoint_id: &[u8]) -> Option<usize> {
        self.endpoints.iter().position(|e| e.endpoint_id[..] == *endpoint_id)
    }
}

/// Arena position of an endpoint: issuer index, endpoint index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointRef {
    pub issuer: usize,
    pub endpoint: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderData {
    pub version:  u8,
    pub identity: ReaderIdentity,
    pub issuers:  Vec<Issuer>,
}

impl ReaderData {
    pub fn generate() -> Self {
        Self {
            version: STORE_VERSION,
            identity: ReaderIdentity::generate(),
            issuers: Vec::new(),
        }
    }

    pub fn find_issuer(&self, issuer_id: &[u8]) -> Option<usize> {
        self.issuers.iter().position(|i| i.issuer_id[..] == *issuer_id)
    }

    pub fn find_endpoint(&self, endpoint_id: &[u8]) -> Option<EndpointRef> {
        self.endpoints()
            .find(|(_, _, e)| e.endpoint_id[..] == *endpoint_id)
            .map(|(r, _, _)| r)
    }

    pub fn endpoint(&self, r: EndpointRef) -> Option<(&Issuer, &Endpoint)> {
        let issuer = self.issuers.get(r.issuer)?;
        Some((issuer, issuer.endpoints.get(r.endpoint)?))
    }

    pub fn endpoint_mut(&mut self, r: EndpointRef) -> Option<&mut Endpoint> {
        self.issuers.get_mut(r.issuer)?.endpoints.get_mut(r.endpoint)
    }

    /// Every endpoint together with its owning issuer.
    pub fn endpoints(&self) -> impl Iterator<Item = (EndpointRef, &Issuer, &Endpoint)> + '_ {
        self.issuers.iter().enumerate().flat_map(|(i, issuer)| {
            issuer.endpoints.iter().enumerate().map(move |(e, endpoint)| {
                (EndpointRef { issuer: i, endpoint: e }, issuer, endpoint)
            })
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.issuers.iter().map(|i| i.endpoints.len()).sum()
    }

    /// Insert or replace (same id) an endpoint under `issuer`.
    pub fn upsert_endpoint(&mut self, issuer: usize, endpoint: Endpoint) -> Option<EndpointRef> {
        let owner = self.issuers.get_mut(issuer)?;
        let index = match owner.find_endpoint(&endpoint.endpoint_id) {
            Some(index) => {
                owner.endpoints[index] = endpoint;
                index
            }
            None => {
                owner.endpoints.push(endpoint);
                owner.endpoints.len() - 1
            }
        };
        Some(EndpointRef { issuer, endpoint: index })
    }

    pub fn remove_endpoint(&mut self, r: EndpointRef) -> Option<Endpoint> {
        let issuer = self.issuers.get_mut(r.issuer)?;
        (r.endpoint < issuer.endpoints.len()).then(|| issuer.endpoints.remove(r.endpoint))
    }

    pub fn remove_issuer(&mut self, issuer_id: &[u8]) -> Option<Issuer> {
        let index = self.find_issuer(issuer_id)?;
        Some(self.issuers.remove(index))
    }

    /// Check the structural invariants a decoded blob must satisfy.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.version != STORE_VERSION {
            return Err(StoreError::Corrupt(format!("unsupported version {}", self.version)));
        }
        self.identity.validate()?;
        for (i, issuer) in self.issuers.iter().enumerate() {
            if crypto::issuer_id_of(&issuer.public_key) != issuer.issuer_id {
                return Err(StoreError::Corrupt("issuer id not derived from its key".into()));
            }
            if self.issuers[..i].iter().any(|o| o.issuer_id == issuer.issuer_id) {
                return Err(StoreError::Corrupt("duplicate issuer".into()));
            }
            for (e, endpoint) in issuer.endpoints.iter().enumerate() {
                endpoint.validate()?;
                if issuer.endpoints[..e].iter().any(|o| o.endpoint_id == endpoint.endpoint_id) {
                    return Err(StoreError::Corrupt("duplicate endpoint within issuer".into()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new(&crypto::generate_ephemeral_keypair().public).unwrap()
    }

    #[test]
    fn test_generated_identity_is_consistent() {
        let data = ReaderData::generate();
        data.validate().unwrap();
        assert_eq!(data.identity.reader_identifier().len(), 16);
        assert_eq!(&data.identity.reader_identifier()[..8], &data.identity.group_identifier);
        assert!(!data.identity.provisioned);
    }

    #[test]
    fn test_identity_from_private_key_defaults_group() {
        let pair = crypto::generate_ephemeral_keypair();
        let id = ReaderIdentity::from_private_key(pair.private.as_slice(), None, [7; 8]).unwrap();
        assert_eq!(id.group_identifier, crypto::hash_identifier(&pair.public, true));
        assert_eq!(id.public_key, pair.public);
        assert!(id.provisioned);
    }

    #[test]
    fn test_new_endpoint_not_provisioned() {
        let ep = endpoint();
        assert!(!ep.is_provisioned());
        assert_eq!(ep.endpoint_id, crypto::endpoint_id_of(&ep.public_key));
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let mut data = ReaderData::generate();
        data.issuers.push(Issuer::new(&[1u8; 32]));
        let mut ep = endpoint();
        let r1 = data.upsert_endpoint(0, ep.clone()).unwrap();
        ep.persistent_key = [9; 32];
        let r2 = data.upsert_endpoint(0, ep).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(data.endpoint_count(), 1);
        assert!(data.endpoint(r1).unwrap().1.is_provisioned());
        assert!(data.upsert_endpoint(5, endpoint()).is_none());
    }

    #[test]
    fn test_endpoints_iterator_pairs_owner() {
        let mut data = ReaderData::generate();
        data.issuers.push(Issuer::new(&[1u8; 32]));
        data.issuers.push(Issuer::new(&[2u8; 32]));
        data.upsert_endpoint(1, endpoint()).unwrap();
        data.upsert_endpoint(0, endpoint()).unwrap();
        data.upsert_endpoint(1, endpoint()).unwrap();
        let owners: Vec<usize> = data.endpoints().map(|(r, _, _)| r.issuer).collect();
        assert_eq!(owners, vec![0, 1, 1]);
        for (r, issuer, ep) in data.endpoints() {
            assert_eq!(data.issuers[r.issuer].issuer_id, issuer.issuer_id);
            assert_eq!(data.find_endpoint(&ep.endpoint_id), Some(r));
        }
    }

    #[test]
    fn test_validate_rejects_forged_ids() {
        let mut data = ReaderData::generate();
        let mut issuer = Issuer::new(&[1u8; 32]);
        issuer.issuer_id = [0; 8];
        data.issuers.push(issuer);
        assert!(matches!(data.validate(), Err(StoreError::Corrupt(_))));

        let mut data = ReaderData::generate();
        data.issuers.push(Issuer::new(&[1u8; 32]));
        let mut ep = endpoint();
        ep.endpoint_id = [0; 6];
        data.issuers[0].endpoints.push(ep);
        assert!(matches!(data.validate(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_validate_rejects_mismatched_reader_key() {
        let mut data = ReaderData::generate();
        data.identity.public_key = crypto::generate_ephemeral_keypair().public.to_vec();
        assert!(data.validate().is_err());
    }
}
