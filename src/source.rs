//! Byte-range access to the raw cube file.
//!
//! The engine only needs two things from its backing store: the total size
//! and ranged reads. Reads are asynchronous so browser blobs and remote
//! stores fit the same interface; the native implementations complete
//! immediately.

use std::fs::File;
use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Ranged read access to a raw cube.
pub trait ByteSource {
    /// Total length of the source in bytes.
    fn size(&self) -> u64;

    /// Read bytes `[start, end)`.
    ///
    /// The returned buffer may be shorter than requested if the source ends
    /// before `end`.
    fn read_range(&self, start: u64, end: u64) -> impl Future<Output = io::Result<Vec<u8>>>;

    /// Read the whole source.
    fn read_all(&self) -> impl Future<Output = io::Result<Vec<u8>>> {
        async move { self.read_range(0, self.size()).await }
    }
}

/// File-backed source using positioned reads.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileSource {
    /// Open a file for ranged reads.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        log::debug!("Opened {:?} ({} bytes)", path, size);
        Ok(Self { path, file, size })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        if start >= end || start >= self.size {
            return Ok(Vec::new());
        }
        let len = end.min(self.size) - start;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// In-memory source, used for blobs that are already resident.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Access the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let len = self.data.len();
        let start = (start as usize).min(len);
        let end = (end as usize).min(len);
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(self.data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_ranges() {
        let source = MemorySource::new((0u8..10).collect());
        assert_eq!(source.size(), 10);
        let bytes = pollster::block_on(source.read_range(2, 5)).unwrap();
        assert_eq!(bytes, vec![2, 3, 4]);
        // Clamped at the end of the source
        let tail = pollster::block_on(source.read_range(8, 20)).unwrap();
        assert_eq!(tail, vec![8, 9]);
        assert!(pollster::block_on(source.read_range(12, 20)).unwrap().is_empty());
        assert_eq!(pollster::block_on(source.read_all()).unwrap().len(), 10);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_file_source_ranges() {
        let path = std::env::temp_dir().join(format!("hsicube_source_{}.bin", std::process::id()));
        std::fs::write(&path, (0u8..64).collect::<Vec<_>>()).unwrap();

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.size(), 64);
        assert_eq!(source.path(), path.as_path());
        let bytes = pollster::block_on(source.read_range(10, 14)).unwrap();
        assert_eq!(bytes, vec![10, 11, 12, 13]);
        // Repeated reads reposition the cursor
        let again = pollster::block_on(source.read_range(0, 2)).unwrap();
        assert_eq!(again, vec![0, 1]);
        let tail = pollster::block_on(source.read_range(60, 100)).unwrap();
        assert_eq!(tail, vec![60, 61, 62, 63]);

        std::fs::remove_file(&path).unwrap();
    }
}
