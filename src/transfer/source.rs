//! Byte sources a transfer reads its chunks from.

// std
use std::{
	io::{self, ErrorKind, SeekFrom},
	ops::Range,
	path::{Path, PathBuf},
};
// crates.io
use tokio::io::{AsyncReadExt, AsyncSeekExt};
// self
use crate::_prelude::*;

/// Boxed future returned by [`TransferSource::read_chunk`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + 'a + Send>>;

/// Random-access artifact being uploaded.
pub trait TransferSource
where
	Self: Send + Sync,
{
	/// Reference used in logs and transfer sessions (file path, artifact name).
	fn describe(&self) -> String;

	/// Total size in bytes.
	fn size(&self) -> u64;

	/// Reads exactly `len` bytes starting at `offset`.
	fn read_chunk(&self, offset: u64, len: u64) -> ReadFuture<'_>;
}

/// In-memory source.
#[derive(Clone, Debug)]
pub struct MemorySource {
	name: String,
	bytes: Arc<[u8]>,
}
impl MemorySource {
	/// Wraps `bytes` under `name`.
	pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
		Self { name: name.into(), bytes: Arc::from(bytes.into()) }
	}
}
impl TransferSource for MemorySource {
	fn describe(&self) -> String {
		self.name.clone()
	}

	fn size(&self) -> u64 {
		self.bytes.len() as u64
	}

	fn read_chunk(&self, offset: u64, len: u64) -> ReadFuture<'_> {
		Box::pin(async move {
			let range = chunk_range(offset, len, self.size())?;

			Ok(self.bytes[range].to_vec())
		})
	}
}

/// File on local disk; each chunk is read with a fresh handle.
#[derive(Clone, Debug)]
pub struct FileSource {
	path: PathBuf,
	size: u64,
}
impl FileSource {
	/// Opens `path`, recording its current size.
	pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
		let path = path.into();
		let metadata = tokio::fs::metadata(&path).await?;

		if !metadata.is_file() {
			return Err(io::Error::new(
				ErrorKind::InvalidInput,
				format!("{} is not a regular file.", path.display()),
			));
		}

		Ok(Self { path, size: metadata.len() })
	}

	/// Backing file path.
	pub fn path(&self) -> &Path {
		&self.path
	}
}
impl TransferSource for FileSource {
	fn describe(&self) -> String {
		self.path.display().to_string()
	}

	fn size(&self) -> u64 {
		self.size
	}

	fn read_chunk(&self, offset: u64, len: u64) -> ReadFuture<'_> {
		Box::pin(async move {
			let range = chunk_range(offset, len, self.size)?;
			let mut file = tokio::fs::File::open(&self.path).await?;
			let mut buf = vec![0; range.len()];

			file.seek(SeekFrom::Start(offset)).await?;
			file.read_exact(&mut buf).await?;

			Ok(buf)
		})
	}
}

fn chunk_range(offset: u64, len: u64, size: u64) -> io::Result<Range<usize>> {
	let end = offset.checked_add(len).filter(|end| *end <= size).ok_or_else(|| {
		io::Error::new(
			ErrorKind::UnexpectedEof,
			format!("Chunk {offset}+{len} exceeds the source size {size}."),
		)
	})?;
	let to_usize = |value: u64| {
		usize::try_from(value).map_err(|_| {
			io::Error::new(ErrorKind::InvalidInput, "Chunk offset exceeds the address space.")
		})
	};

	Ok(to_usize(offset)?..to_usize(end)?)
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, fs, process};
	// self
	use super::*;

	#[tokio::test]
	async fn memory_source_reads_exact_ranges() {
		let source = MemorySource::new("clip.mp4", b"0123456789".to_vec());

		assert_eq!(source.size(), 10);
		assert_eq!(source.read_chunk(4, 3).await.expect("Range is in bounds."), b"456");
		assert_eq!(source.read_chunk(10, 0).await.expect("Empty tail read is allowed."), b"");

		let err = source.read_chunk(8, 5).await.expect_err("Reads past the end must fail.");

		assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
	}

	#[tokio::test]
	async fn file_source_seeks_to_offsets() {
		let path = env::temp_dir().join(format!(
			"upstream_guard_file_source_{}_{}.bin",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		));

		fs::write(&path, b"abcdefghij").expect("Fixture file should write.");

		let source = FileSource::open(&path).await.expect("Fixture file should open.");

		assert_eq!(source.size(), 10);
		assert_eq!(source.read_chunk(6, 4).await.expect("Tail chunk should read."), b"ghij");
		assert!(FileSource::open(env::temp_dir()).await.is_err());

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary source {}: {e}", path.display())
		});
	}
}
