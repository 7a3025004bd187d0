//! File IO seam between the planner and storage.
//!
//! The planner only ever opens manifests for reading, so the contract is tiny: resolve a path to
//! an [`InputFile`] and read it. Two implementations are provided: [`LocalFileIO`] over `std::fs`
//! for tests and local tables, and [`ObjectStoreFileIO`] over any [`object_store::ObjectStore`].
//! Retries and timeouts are the store's concern, not ours.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::executor::block_on;
use object_store::ObjectStore;
use url::Url;

use crate::FloeResult;

/// Opens readable handles by path.
pub trait FileIO: Send + Sync {
    fn new_input_file(&self, path: &str) -> FloeResult<Box<dyn InputFile>>;
}

/// A readable file handle. `read` returns the full contents; manifests are small enough that
/// ranged reads are not worth the interface surface.
pub trait InputFile: Send {
    fn path(&self) -> &str;

    fn len(&self) -> FloeResult<u64>;

    fn read(&self) -> FloeResult<Bytes>;
}

/// `std::fs`-backed [`FileIO`].
#[derive(Debug, Default, Clone)]
pub struct LocalFileIO;

impl FileIO for LocalFileIO {
    fn new_input_file(&self, path: &str) -> FloeResult<Box<dyn InputFile>> {
        Ok(Box::new(LocalInputFile {
            path: path.to_string(),
        }))
    }
}

struct LocalInputFile {
    path: String,
}

impl InputFile for LocalInputFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn len(&self) -> FloeResult<u64> {
        Ok(std::fs::metadata(PathBuf::from(&self.path))?.len())
    }

    fn read(&self) -> FloeResult<Bytes> {
        Ok(Bytes::from(std::fs::read(PathBuf::from(&self.path))?))
    }
}

/// [`FileIO`] over any [`ObjectStore`]. The store's async calls are driven to completion on the
/// calling thread; planning threads are expected to block on IO.
#[derive(Clone)]
pub struct ObjectStoreFileIO {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreFileIO {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Paths may be bare (`a/b/manifest.json`) or carry a scheme (`s3://bucket/a/b/...`); either
    /// way only the key below the store's root is handed to the store.
    fn store_path(path: &str) -> FloeResult<object_store::path::Path> {
        match Url::parse(path) {
            Ok(url) => object_store::path::Path::from_url_path(url.path())
                .map_err(|source| object_store::Error::InvalidPath { source }.into()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(object_store::path::Path::from(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct ObjectStoreInputFile {
    store: Arc<dyn ObjectStore>,
    path: String,
    location: object_store::path::Path,
}

impl FileIO for ObjectStoreFileIO {
    fn new_input_file(&self, path: &str) -> FloeResult<Box<dyn InputFile>> {
        Ok(Box::new(ObjectStoreInputFile {
            store: self.store.clone(),
            path: path.to_string(),
            location: Self::store_path(path)?,
        }))
    }
}

impl InputFile for ObjectStoreInputFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn len(&self) -> FloeResult<u64> {
        let meta = block_on(self.store.head(&self.location))?;
        Ok(meta.size)
    }

    fn read(&self) -> FloeResult<Bytes> {
        let result = block_on(self.store.get(&self.location))?;
        Ok(block_on(result.bytes())?)
    }
}
