//! Blob storage for uploaded documents. Locations are opaque to callers.

use std::{
	collections::HashMap,
	io::ErrorKind,
	path::PathBuf,
	sync::{Mutex, MutexGuard, PoisonError},
};

use uuid::Uuid;

use crate::{Error, Result, store::BoxFuture};

pub trait ObjectStore
where
	Self: Send + Sync,
{
	fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<String>>;

	/// Fails with `NotFound` when nothing is stored at `location`.
	fn get<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Content-addressed files under a root directory. Two puts of the same bytes land in distinct
/// files.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
	root: PathBuf,
}
impl FsObjectStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn path_for(&self, location: &str) -> Result<PathBuf> {
		let Some((shard, name)) = location.split_once('/') else {
			return Err(Error::InvalidArgument(format!("Malformed blob location {location:?}.")));
		};
		let valid = |part: &str| {
			!part.is_empty() && part.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
		};

		if shard.len() != 2 || !valid(shard) || !valid(name) {
			return Err(Error::InvalidArgument(format!("Malformed blob location {location:?}.")));
		}

		Ok(self.root.join(shard).join(name))
	}
}

impl ObjectStore for FsObjectStore {
	fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<String>> {
		Box::pin(async move {
			let hash = blake3::hash(&bytes).to_hex();
			let shard = &hash[..2];
			let location = format!("{shard}/{hash}-{}", Uuid::new_v4().simple());
			let path = self.path_for(&location)?;

			if let Some(parent) = path.parent() {
				tokio::fs::create_dir_all(parent).await?;
			}

			tokio::fs::write(&path, &bytes).await?;

			tracing::debug!(location = %location, bytes = bytes.len(), "Stored blob.");

			Ok(location)
		})
	}

	fn get<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
		Box::pin(async move {
			let path = self.path_for(location)?;

			match tokio::fs::read(&path).await {
				Ok(bytes) => Ok(bytes),
				Err(err) if err.kind() == ErrorKind::NotFound =>
					Err(Error::NotFound(format!("blob {location}"))),
				Err(err) => Err(err.into()),
			}
		})
	}
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
	blobs: Mutex<HashMap<String, Vec<u8>>>,
}
impl MemoryObjectStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Drops a blob, simulating an object lost by the backing store.
	pub fn remove(&self, location: &str) -> bool {
		self.lock().remove(location).is_some()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
		self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl ObjectStore for MemoryObjectStore {
	fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<String>> {
		Box::pin(async move {
			let location = format!("mem/{}", Uuid::new_v4().simple());

			self.lock().insert(location.clone(), bytes);

			Ok(location)
		})
	}

	fn get<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
		Box::pin(async move {
			self.lock()
				.get(location)
				.cloned()
				.ok_or_else(|| Error::NotFound(format!("blob {location}")))
		})
	}
}
