// A sample is the file being submitted. Its bytes are read exactly once;
// the digest used later as the report resource is computed from those
// same bytes so the two can never disagree.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Sample {
    path: PathBuf,
    data: Vec<u8>,
    filename: String,
    sha256: String,
}

impl Sample {
    /// Read the file at `path` and compute its SHA-256.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
        Ok(Self::from_bytes(path, data))
    }

    /// Build a sample from bytes already in memory.
    pub fn from_bytes(path: &Path, data: Vec<u8>) -> Self {
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".to_string());
        let sha256 = format!("{:x}", Sha256::digest(&data));
        Sample {
            path: path.to_path_buf(),
            data,
            filename,
            sha256,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Lowercase hex digest, used as the report resource.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_and_wrapping_the_same_bytes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropper.bin");
        let bytes: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        fs::write(&path, &bytes).unwrap();

        let loaded = Sample::load(&path).unwrap();
        let wrapped = Sample::from_bytes(&path, bytes.clone());
        assert_eq!(loaded.data(), bytes.as_slice());
        assert_eq!(loaded.sha256(), wrapped.sha256());
        assert_eq!(loaded.filename(), "dropper.bin");
    }

    #[test]
    fn resource_is_lowercase_hex_of_content() {
        let sample = Sample::from_bytes(Path::new("eicar.com"), b"abc".to_vec());
        assert_eq!(
            sample.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sample.sha256().len(), 64);
        assert!(sample.sha256().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_content_gives_different_resource() {
        let a = Sample::from_bytes(Path::new("a"), b"one".to_vec());
        let b = Sample::from_bytes(Path::new("a"), b"two".to_vec());
        assert_ne!(a.sha256(), b.sha256());
    }

    #[test]
    fn filename_is_last_path_component() {
        let sample = Sample::from_bytes(Path::new("/tmp/dir/evil.exe"), vec![1, 2, 3]);
        assert_eq!(sample.filename(), "evil.exe");
        assert_eq!(sample.path(), Path::new("/tmp/dir/evil.exe"));
    }

    #[test]
    fn unreadable_path_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.exe");
        let err = Sample::load(&path).unwrap_err();
        assert!(err.to_string().contains("absent.exe"));
    }
}
