// Archive builder: streams walker output into a zip container.
//
// Every package carries one synthetic member, `.runtimeconfig.json`, after
// the project files. Timestamps are pinned to the zip epoch so the same
// tree always produces the same bytes.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::rc::Rc;

use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::ArchiveError;
use crate::walker::FileEntry;

/// Name of the synthetic runtime configuration member.
pub const RUNTIME_CONFIG_NAME: &str = ".runtimeconfig.json";

/// Permission bits of the synthetic member.
pub const RUNTIME_CONFIG_MODE: u32 = 0o644;

/// What the builder wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Members written, the synthetic config included.
    pub entries: usize,
    /// Total bytes of the finished container.
    pub compressed_bytes: u64,
}

/// Body of the synthetic member: an empty object, two-space indented.
pub fn runtime_config_body() -> Vec<u8> {
    serde_json::to_vec_pretty(&serde_json::json!({})).unwrap_or_else(|_| b"{}".to_vec())
}

fn member_options(mode: u32) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(mode)
}

/// Writes `entries` plus the runtime config into `sink` and finalizes it.
///
/// A project file at the root named `.runtimeconfig.json` is left out; the
/// synthetic member always owns that name. Returns the sink once every
/// byte has been handed to it and flushed. On error the sink's contents
/// are garbage and must be discarded.
pub fn build<W: Write + Seek>(
    entries: &[FileEntry],
    sink: W,
) -> Result<(W, ArchiveReport), ArchiveError> {
    let abort = Rc::new(Cell::new(false));
    let mut zip = ZipWriter::new(AbortableSink::new(sink, Rc::clone(&abort)));

    match write_members(entries, &mut zip) {
        Ok(written) => {
            let mut sink = zip.finish()?.into_inner();
            sink.flush()?;
            let compressed_bytes = sink.stream_position()?;

            let report = ArchiveReport {
                entries: written + 1,
                compressed_bytes,
            };
            tracing::debug!(entries = report.entries, bytes = report.compressed_bytes, "archive finalized");
            Ok((sink, report))
        }
        Err(e) => {
            // ZipWriter finalizes on drop; send that into the void.
            abort.set(true);
            drop(zip);
            Err(e)
        }
    }
}

fn write_members<W: Write + Seek>(
    entries: &[FileEntry],
    zip: &mut ZipWriter<W>,
) -> Result<usize, ArchiveError> {
    let mut written = 0;
    for entry in entries {
        if entry.relative_name == RUNTIME_CONFIG_NAME {
            tracing::warn!(
                path = %entry.absolute_path.display(),
                "project file shadows the generated runtime config; skipping it"
            );
            continue;
        }
        let mut source = File::open(&entry.absolute_path).map_err(|source| ArchiveError::Source {
            path: entry.absolute_path.clone(),
            source,
        })?;
        zip.start_file(entry.relative_name.as_str(), member_options(entry.mode))?;
        copy_member(&mut source, zip, entry)?;
        written += 1;
    }

    zip.start_file(RUNTIME_CONFIG_NAME, member_options(RUNTIME_CONFIG_MODE))?;
    zip.write_all(&runtime_config_body())?;
    Ok(written)
}

// Read errors belong to the source file; write errors to the sink.
fn copy_member<W: Write + Seek>(
    source: &mut File,
    zip: &mut ZipWriter<W>,
    entry: &FileEntry,
) -> Result<(), ArchiveError> {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match io::Read::read(source, &mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ArchiveError::Source {
                    path: entry.absolute_path.clone(),
                    source,
                })
            }
        };
        zip.write_all(&buf[..n])?;
    }
}

/// Sink wrapper that stops touching the real sink once the build is
/// abandoned or a write has failed.
///
/// After that point writes are swallowed and seeks move a virtual cursor,
/// so the writer's finalize-on-drop succeeds quietly instead of failing
/// against a broken sink.
struct AbortableSink<W> {
    inner: W,
    abort: Rc<Cell<bool>>,
    pos: u64,
    end: u64,
}

impl<W> AbortableSink<W> {
    fn new(inner: W, abort: Rc<Cell<bool>>) -> Self {
        Self {
            inner,
            abort,
            pos: 0,
            end: 0,
        }
    }

    fn into_inner(self) -> W {
        self.inner
    }

    fn advance(&mut self, n: usize) {
        self.pos += n as u64;
        self.end = self.end.max(self.pos);
    }

    fn fail<T>(&self, err: io::Error) -> io::Result<T> {
        self.abort.set(true);
        Err(err)
    }
}

impl<W: Write> Write for AbortableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.abort.get() {
            self.advance(buf.len());
            return Ok(buf.len());
        }
        match self.inner.write(buf) {
            Ok(n) => {
                self.advance(n);
                Ok(n)
            }
            Err(e) => self.fail(e),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.abort.get() {
            return Ok(());
        }
        match self.inner.flush() {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }
}

impl<W: Seek> Seek for AbortableSink<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.abort.get() {
            let target = match pos {
                SeekFrom::Start(n) => Some(n),
                SeekFrom::Current(d) => self.pos.checked_add_signed(d),
                SeekFrom::End(d) => self.end.checked_add_signed(d),
            };
            self.pos = target.unwrap_or(self.pos);
            self.end = self.end.max(self.pos);
            return Ok(self.pos);
        }
        match self.inner.seek(pos) {
            Ok(n) => {
                self.pos = n;
                self.end = self.end.max(n);
                Ok(n)
            }
            Err(e) => self.fail(e),
        }
    }
}
