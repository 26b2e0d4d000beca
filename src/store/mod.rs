pub mod disk;
pub mod index;
pub mod model;

pub use disk::{BlobStorage, FileStorage, MemoryStorage};
pub use index::ReaderStore;
pub use model::{
    Endpoint, EndpointRef, Enrollment, EnrollmentKind, Issuer, ReaderData, ReaderIdentity,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("Store lock poisoned")]
    Poisoned,
}
