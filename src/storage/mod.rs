//! Blob storage abstraction

mod checksum;
mod factory;
mod filesystem;
mod traits;

pub use checksum::ChecksumStream;
pub use factory::{BackendBuilder, FilesystemBuilder, StorageFactory, StorageRegistry};
pub use filesystem::FilesystemBackend;
pub use traits::{
    BlobInfo, ByteRange, ByteStream, SaveOptions, StorageBackend, StorageError,
};
