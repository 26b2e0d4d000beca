use super::{BlobStorage, ReaderData, StoreError, disk};
use crate::config::STORE_KEY;

/// The reader's credential store: one in-memory tree persisted whole under
/// [`STORE_KEY`] on every commit.
pub struct ReaderStore {
    storage: Box<dyn BlobStorage>,
    data: ReaderData,
}

impl ReaderStore {
    /// Load the blob, or create and persist a fresh reader identity when the
    /// blob is absent or malformed.
    pub fn load(mut storage: Box<dyn BlobStorage>) -> Result<Self, StoreError> {
        let existing = match storage.read(STORE_KEY)? {
            Some(bytes) => match disk::decode(&bytes) {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed reader data");
                    None
                }
            },
            None => None,
        };

        let data = match existing {
            Some(data) => data,
            None => {
                let data = ReaderData::generate();
                storage.write(STORE_KEY, &disk::encode(&data)?)?;
                tracing::info!(
                    group = %crate::crypto::hex(&data.identity.group_identifier),
                    "Created new reader identity"
                );
                data
            }
        };
        Ok(Self { storage, data })
    }

    pub fn data(&self) -> &ReaderData {
        &self.data
    }

    /// Apply `f` to a copy of the tree and persist it. The copy replaces the
    /// in-memory tree even if the blob write fails; the error is returned so
    /// the caller can report it.
    pub fn commit<F>(&mut self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ReaderData),
    {
        let mut next = self.data.clone();
        f(&mut next);
        let blob = disk::encode(&next)?;
        let written = self.storage.write(STORE_KEY, &blob);
        self.data = next;
        written
    }

    /// Drop the persisted blob. The in-memory tree is left as is.
    pub fn erase(&mut self) -> Result<bool, StoreError> {
        self.storage.erase(STORE_KEY)
    }

    pub fn issuer_count(&self) -> usize {
        self.data.issuers.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.data.endpoint_count()
    }
}
