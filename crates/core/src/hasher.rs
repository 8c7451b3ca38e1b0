//! Content digests for upload resume
//!
//! The service matches a partially uploaded file by its MD5, SHA-256 and
//! size. All three are computed in a single sequential pass.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{Error, Result};

/// Digest of a local file's bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    pub md5: [u8; 16],
    pub sha256: [u8; 32],
    pub size: u64,
}

impl ContentDigest {
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDigest")
            .field("md5", &self.md5_hex())
            .field("sha256", &self.sha256_hex())
            .field("size", &self.size)
            .finish()
    }
}

/// Incremental hasher producing a [`ContentDigest`]
pub struct ContentHasher {
    md5: md5::Context,
    sha256: Sha256,
    size: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha256: Sha256::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.sha256.update(data);
        self.size += data.len() as u64;
    }

    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            md5: self.md5.compute().0,
            sha256: self.sha256.finalize().into(),
            size: self.size,
        }
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest a local file, reading it once in bounded chunks
pub async fn digest(path: &Path) -> Result<ContentDigest> {
    digest_with_chunk_size(path, DEFAULT_CHUNK_SIZE).await
}

pub async fn digest_with_chunk_size(path: &Path, chunk_size: usize) -> Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::local_io(path, e))?;

    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| Error::local_io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finish())
}
