use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{ReaderData, StoreError};

/// Named-blob persistence (the NVS namespace on a device).
pub trait BlobStorage: Send {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Replace the blob under `key`. Either the old or the new blob is
    /// observable afterwards, never a partial one.
    fn write(&mut self, key: &str, blob: &[u8]) -> Result<(), StoreError>;
    fn erase(&mut self, key: &str) -> Result<bool, StoreError>;
}

pub(crate) fn encode(data: &ReaderData) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(data, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<ReaderData, StoreError> {
    let data: ReaderData = ciborium::from_reader(bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    data.validate()?;
    Ok(data)
}

/// One file per key in `dir`; writes go to a temp file that is renamed
/// over the previous blob.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BlobStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        let tmp = self.dir.join(format!("{key}.tmp"));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(blob)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }

    fn erase(&mut self, key: &str) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory storage. Clones share the same blobs, so a clone survives a
/// simulated reboot of the store that owned the original.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail before anything is stored, as if
    /// power was lost before the commit reached flash.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, blob: &[u8]) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), blob.to_vec());
        }
    }
}

impl BlobStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(blobs.get(key).cloned())
    }

    fn write(&mut self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected write failure")));
        }
        let mut blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        blobs.insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn erase(&mut self, key: &str) -> Result<bool, StoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(blobs.remove(key).is_some())
    }
}
