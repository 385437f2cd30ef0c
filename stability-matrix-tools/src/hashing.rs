use crate::progress::ByteProgress;
use anyhow::{Context, Result};
use log::debug;
use sha1::{Digest, Sha1};
use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

const CHUNK_SIZE: usize = 64 * 1024;

/// Anything that can absorb bytes and produce a lowercase hex digest.
trait StreamHasher {
    fn update(&mut self, bytes: &[u8]);
    fn finalize_hex(self: Box<Self>) -> String;
}

impl StreamHasher for blake3::Hasher {
    fn update(&mut self, bytes: &[u8]) {
        blake3::Hasher::update(self, bytes);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        self.finalize().to_hex().to_string()
    }
}

impl StreamHasher for Sha1 {
    fn update(&mut self, bytes: &[u8]) {
        Digest::update(self, bytes);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        hex::encode((*self).finalize())
    }
}

struct HashWriter<'a>(&'a mut dyn StreamHasher);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Computes the BLAKE3 hash of a file, streaming it in chunks. The progress callback receives the
/// running total of bytes hashed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file(path: &Path, progress: Option<&mut dyn FnMut(u64)>) -> Result<String> {
    debug!("computing blake3 hash of {}", path.display());
    digest_file(Box::new(blake3::Hasher::new()), path, progress)
}

/// Computes the BLAKE3 hash of a file while drawing a progress bar.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file_with_progress(path: &Path) -> Result<String> {
    let size = path
        .metadata()
        .with_context(|| format!("could not stat {}", path.display()))?
        .len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut bar = ByteProgress::new(size, format!("Computing blake3 hash of {name}"));
    blake3_file(path, Some(&mut |pos| bar.set(pos)))
}

/// Computes the SHA-1 hash of a file. B2 requires this as an upload integrity check.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn sha1_file(path: &Path) -> Result<String> {
    digest_file(Box::new(Sha1::new()), path, None)
}

#[must_use]
pub fn sha1_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

#[must_use]
pub fn blake3_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn digest_file(
    mut hasher: Box<dyn StreamHasher>,
    path: &Path,
    mut progress: Option<&mut dyn FnMut(u64)>,
) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("could not open {}", path.display()))?;

    let mut buf = vec![0; CHUNK_SIZE];
    let mut total = 0_u64;
    {
        let mut writer = HashWriter(hasher.as_mut());
        loop {
            let n = file
                .read(&mut buf)
                .with_context(|| format!("could not read {}", path.display()))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            total += n as u64;
            if let Some(cb) = progress.as_mut() {
                cb(total);
            }
        }
    }

    debug!("hashed {total} bytes of {}", path.display());
    Ok(hasher.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(bytes: &[u8]) -> Result<NamedTempFile> {
        let mut f = NamedTempFile::new()?;
        f.write_all(bytes)?;
        f.flush()?;
        Ok(f)
    }

    #[test]
    fn blake3_of_empty_file() -> Result<()> {
        let f = file_with(b"")?;
        assert_eq!(
            blake3_file(f.path(), None)?,
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
        Ok(())
    }

    #[test]
    fn blake3_streaming_matches_one_shot() -> Result<()> {
        // Larger than one chunk, and not a multiple of the chunk size.
        let data = (0..(CHUNK_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect::<Vec<_>>();
        let f = file_with(&data)?;

        let mut seen = vec![];
        let hash = blake3_file(f.path(), Some(&mut |pos| seen.push(pos)))?;
        assert_eq!(hash, blake3_bytes(&data));
        assert!(seen.len() >= 4);
        assert_eq!(seen.last().copied(), Some(data.len() as u64));
        Ok(())
    }

    #[test]
    fn sha1_of_known_input() -> Result<()> {
        let f = file_with(b"abc")?;
        let expect = "a9993e364706816aba3e25717850c26c9cd0d89d";
        assert_eq!(sha1_file(f.path())?, expect);
        assert_eq!(sha1_bytes(b"abc"), expect);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = blake3_file(Path::new("/does/not/exist"), None).unwrap_err();
        assert!(err.to_string().contains("could not open"));
    }
}
