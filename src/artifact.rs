// Temporary artifact manager.
//
// A package lives in a uniquely named temp file for the length of one
// deploy. The writable half (`TempArtifact`) and the readable half
// (`SealedArtifact`) are separate types, so the file cannot be opened for
// reading until the archive writer has let go of it. Dropping either one
// removes the file, which covers every early-return path.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Prefix of every package temp file.
pub const ARTIFACT_PREFIX: &str = "assistant-package-";

/// Suffix of every package temp file.
pub const ARTIFACT_SUFFIX: &str = ".zip";

/// A temp file being written.
#[derive(Debug)]
pub struct TempArtifact {
    file: NamedTempFile,
}

/// A fully written, flushed temp file ready for upload.
#[derive(Debug)]
pub struct SealedArtifact {
    file: NamedTempFile,
    size: u64,
}

/// Readable handle on a sealed artifact plus its size in bytes.
#[derive(Debug)]
pub struct ArtifactReader {
    pub file: File,
    pub size: u64,
}

impl TempArtifact {
    /// Allocates a fresh temp file in the system temp directory.
    pub fn allocate(prefix: &str, suffix: &str) -> io::Result<Self> {
        Self::allocate_in(&std::env::temp_dir(), prefix, suffix)
    }

    /// Allocates a fresh temp file in `dir`. The random part of the name
    /// keeps concurrent allocations from colliding.
    pub fn allocate_in(dir: &Path, prefix: &str, suffix: &str) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        tracing::debug!(path = %file.path().display(), "allocated temp artifact");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Write handle for the archive builder.
    pub fn writer(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Syncs the written bytes to disk and turns the artifact read-only.
    pub fn seal(self) -> io::Result<SealedArtifact> {
        self.file.as_file().sync_all()?;
        let size = self.file.as_file().metadata()?.len();
        Ok(SealedArtifact {
            file: self.file,
            size,
        })
    }

    /// Deletes the file without sealing it.
    pub fn release(self) -> io::Result<()> {
        release_file(self.file)
    }
}

impl SealedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Opens an independent read handle positioned at the start.
    pub fn open_for_read(&self) -> io::Result<ArtifactReader> {
        Ok(ArtifactReader {
            file: self.file.reopen()?,
            size: self.size,
        })
    }

    /// Deletes the file.
    pub fn release(self) -> io::Result<()> {
        release_file(self.file)
    }
}

fn release_file(file: NamedTempFile) -> io::Result<()> {
    let path: PathBuf = file.path().to_path_buf();
    file.close()?;
    tracing::debug!(path = %path.display(), "released temp artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn allocated_names_are_unique_and_shaped() {
        let dir = TempDir::new().unwrap();
        let a = TempArtifact::allocate_in(dir.path(), ARTIFACT_PREFIX, ARTIFACT_SUFFIX).unwrap();
        let b = TempArtifact::allocate_in(dir.path(), ARTIFACT_PREFIX, ARTIFACT_SUFFIX).unwrap();
        assert_ne!(a.path(), b.path());

        let name = a.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(ARTIFACT_PREFIX));
        assert!(name.ends_with(ARTIFACT_SUFFIX));
    }

    #[test]
    fn sealed_artifact_reads_back_what_was_written() {
        let dir = TempDir::new().unwrap();
        let mut artifact = TempArtifact::allocate_in(dir.path(), "t-", ".bin").unwrap();
        artifact.writer().write_all(b"package bytes").unwrap();

        let sealed = artifact.seal().unwrap();
        assert_eq!(sealed.size(), 13);

        let mut reader = sealed.open_for_read().unwrap();
        let mut got = String::new();
        reader.file.read_to_string(&mut got).unwrap();
        assert_eq!(got, "package bytes");
        assert_eq!(reader.size, 13);
    }

    #[test]
    fn release_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let artifact = TempArtifact::allocate_in(dir.path(), "t-", ".zip").unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());

        artifact.seal().unwrap().release().unwrap();
        assert!(!path.exists());
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[test]
    fn unsealed_release_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let artifact = TempArtifact::allocate_in(dir.path(), "t-", ".zip").unwrap();
        artifact.release().unwrap();
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[test]
    fn drop_removes_the_file() {
        let dir = TempDir::new().unwrap();
        {
            let _artifact = TempArtifact::allocate_in(dir.path(), "t-", ".zip").unwrap();
            assert_eq!(leftovers(dir.path()), 1);
        }
        assert_eq!(leftovers(dir.path()), 0);
    }
}
