//! Backend registry and per-file storage resolution.
//!
//! Backend names are resolved through an explicit table built at startup —
//! config maps a string id to a concrete builder, and locations carry the
//! id of the backend that serves them.

use super::filesystem::FilesystemBackend;
use super::traits::{BlobInfo, StorageBackend};
use crate::errors::{Error, Result};
use crate::models::{FileInstance, Location};
use crate::types::{make_blob_path, DigestAlgo};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds per-blob backend handles from `(uri, size)`.
pub trait BackendBuilder: Send + Sync {
    fn build(&self, uri: &str, size: Option<u64>) -> Box<dyn StorageBackend>;
}

/// Builder for the filesystem backend (`fs`).
pub struct FilesystemBuilder {
    pub algo: DigestAlgo,
}

impl BackendBuilder for FilesystemBuilder {
    fn build(&self, uri: &str, size: Option<u64>) -> Box<dyn StorageBackend> {
        Box::new(FilesystemBackend::new(uri, size, self.algo))
    }
}

/// Name → builder table.
#[derive(Default)]
pub struct StorageRegistry {
    backends: HashMap<String, Arc<dyn BackendBuilder>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends (`fs`).
    pub fn builtin(algo: DigestAlgo) -> Self {
        let mut registry = Self::new();
        registry.register("fs", Arc::new(FilesystemBuilder { algo }));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, builder: Arc<dyn BackendBuilder>) {
        self.backends.insert(name.into(), builder);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendBuilder>> {
        self.backends.get(name).cloned()
    }
}

/// Resolves a backend + URI for file instances.
pub struct StorageFactory {
    registry: StorageRegistry,
    path_dimensions: usize,
    split_length: usize,
}

impl StorageFactory {
    pub fn new(registry: StorageRegistry, path_dimensions: usize, split_length: usize) -> Self {
        Self {
            registry,
            path_dimensions,
            split_length,
        }
    }

    /// Backend handle for an existing file, or `None` when the file has no
    /// backend or URI recorded yet.
    pub fn for_file(&self, file: &FileInstance) -> Option<Box<dyn StorageBackend>> {
        let backend_name = file.storage_backend.as_deref()?;
        let uri = file.uri.as_deref()?;
        let builder = self.registry.get(backend_name)?;
        Some(builder.build(uri, Some(file.size)))
    }

    /// Suggested blob URI for a file stored under `location`:
    /// `<location.uri>/<split(id)>/data`.
    pub fn suggested_uri(&self, location: &Location, file: &FileInstance) -> String {
        make_blob_path(
            &location.uri,
            &file.id.to_string(),
            "data",
            self.path_dimensions,
            self.split_length,
        )
    }

    /// Bind a new file to `location`: stamps `storage_backend` and a
    /// suggested URI onto the instance and returns a backend handle. Does
    /// not touch storage — `save` will create the blob.
    pub fn for_new_file(
        &self,
        file: &mut FileInstance,
        location: &Location,
    ) -> Result<Box<dyn StorageBackend>> {
        if file.storage_backend.is_some() {
            return self
                .for_file(file)
                .ok_or_else(|| Error::InvalidOperation("Unknown storage backend".to_string()));
        }
        let builder = self.registry.get(&location.storage_backend).ok_or_else(|| {
            Error::InvalidOperation(format!(
                "Location {:?} references unknown storage backend {:?}",
                location.name, location.storage_backend
            ))
        })?;
        let uri = self.suggested_uri(location, file);
        file.storage_backend = Some(location.storage_backend.clone());
        file.uri = Some(uri.clone());
        Ok(builder.build(&uri, None))
    }

    /// Bind a new file to `location` and create its blob truncated to
    /// `size` (the multipart preallocation path).
    pub async fn initialize(
        &self,
        file: &mut FileInstance,
        size: u64,
        location: &Location,
    ) -> Result<(Box<dyn StorageBackend>, BlobInfo)> {
        let backend = self.for_new_file(file, location)?;
        if !backend.supports_in_place_merge() {
            return Err(Error::InvalidOperation(
                "Storage backend does not support offset writes".to_string(),
            ));
        }
        let info = backend.initialize(size).await.map_err(Error::from)?;
        file.size = size;
        Ok((backend, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileInstance;

    fn test_location(uri: &str) -> Location {
        Location {
            id: 1,
            name: "default".to_string(),
            uri: uri.to_string(),
            default: true,
            storage_backend: "fs".to_string(),
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_for_file_requires_backend_and_uri() {
        let factory = StorageFactory::new(StorageRegistry::builtin(DigestAlgo::Md5), 2, 2);
        let mut file = FileInstance::fresh(None);
        assert!(factory.for_file(&file).is_none());

        file.storage_backend = Some("fs".to_string());
        assert!(factory.for_file(&file).is_none());

        file.uri = Some("/data/ab/cd/x/data".to_string());
        assert!(factory.for_file(&file).is_some());
    }

    #[test]
    fn test_for_new_file_stamps_backend_and_uri() {
        let factory = StorageFactory::new(StorageRegistry::builtin(DigestAlgo::Md5), 2, 2);
        let mut file = FileInstance::fresh(None);
        let location = test_location("/data");

        let backend = factory.for_new_file(&mut file, &location).unwrap();
        assert_eq!(file.storage_backend.as_deref(), Some("fs"));
        let uri = file.uri.clone().unwrap();
        assert!(uri.starts_with("/data/"));
        assert!(uri.ends_with("/data"));
        assert_eq!(backend.uri(), uri);

        // First two path levels are 2-character id chunks.
        let rel: Vec<&str> = uri.trim_start_matches("/data/").split('/').collect();
        assert_eq!(rel[0].len(), 2);
        assert_eq!(rel[1].len(), 2);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let factory = StorageFactory::new(StorageRegistry::builtin(DigestAlgo::Md5), 2, 2);
        let mut file = FileInstance::fresh(None);
        let mut location = test_location("/data");
        location.storage_backend = "tape".to_string();
        assert!(factory.for_new_file(&mut file, &location).is_err());
    }
}
