//! Streaming zip writer on top of a [`WriteStream`].
//!
//! The `zip` crate needs a seekable sink because it rewrites an entry's
//! local header once the entry is complete. Bytes are therefore spooled in
//! memory and handed to the stream as soon as no header before them can be
//! rewritten anymore, which is the moment the next entry starts. At most one
//! entry is held in memory at a time.

use std::io::{self, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::backend::{BackendError, BackendResult, WriteStream};

/// Writes a stored (uncompressed) zip archive entry by entry.
pub struct ZipArchiveWriter {
    zip: Option<ZipWriter<Spool>>,
    spool: Spool,
    stream: Box<dyn WriteStream>,
    entries: usize,
}

impl ZipArchiveWriter {
    pub fn new(stream: Box<dyn WriteStream>) -> Self {
        let spool = Spool::default();
        Self {
            zip: Some(ZipWriter::new(spool.clone())),
            spool,
            stream,
            entries: 0,
        }
    }

    /// Number of entries started so far.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Begin a new entry named `name` (`/`-separated). `size` is the expected
    /// length of the entry and selects zip64 headers for large files.
    ///
    /// Everything belonging to earlier entries is written to the stream.
    pub async fn start_entry(&mut self, name: &str, size: u64) -> BackendResult<()> {
        let boundary = self.spool.end();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(size >= u64::from(u32::MAX));
        self.zip_mut()?
            .start_file(name, options)
            .map_err(BackendError::io)?;
        self.entries += 1;

        let ready = self.spool.take_until(boundary);
        self.forward(ready).await
    }

    /// Append to the current entry.
    pub async fn write(&mut self, data: &[u8]) -> BackendResult<()> {
        self.zip_mut()?.write_all(data).map_err(BackendError::io)
    }

    /// Write the central directory and close the stream.
    pub async fn finish(&mut self) -> BackendResult<()> {
        let zip = self
            .zip
            .take()
            .ok_or_else(|| BackendError::other("Archive already finished"))?;
        zip.finish().map_err(BackendError::io)?;

        let rest = self.spool.take_until(u64::MAX);
        self.forward(rest).await?;
        self.stream.close().await
    }

    /// Stop writing and abort the stream.
    pub async fn abort(&mut self) -> BackendResult<()> {
        self.zip = None;
        self.stream.abort().await
    }

    fn zip_mut(&mut self) -> BackendResult<&mut ZipWriter<Spool>> {
        self.zip
            .as_mut()
            .ok_or_else(|| BackendError::other("Archive already finished"))
    }

    async fn forward(&mut self, bytes: Vec<u8>) -> BackendResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.stream.write(&bytes).await
    }
}

/// In-memory seekable buffer whose front can be drained once it is final.
#[derive(Clone, Default)]
struct Spool(Arc<Mutex<SpoolState>>);

#[derive(Default)]
struct SpoolState {
    /// Absolute offset of `buf[0]`.
    base: u64,
    /// Absolute cursor position.
    pos: u64,
    buf: Vec<u8>,
}

impl Spool {
    fn state(&self) -> MutexGuard<'_, SpoolState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Absolute offset one past the last spooled byte.
    fn end(&self) -> u64 {
        let state = self.state();
        state.base + state.buf.len() as u64
    }

    /// Remove and return every spooled byte before `boundary`.
    fn take_until(&self, boundary: u64) -> Vec<u8> {
        let mut state = self.state();
        let len = boundary
            .saturating_sub(state.base)
            .min(state.buf.len() as u64) as usize;
        let taken: Vec<u8> = state.buf.drain(..len).collect();
        state.base += len as u64;
        taken
    }
}

impl Write for Spool {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.state();
        let state = &mut *guard;
        let start = (state.pos - state.base) as usize;
        let end = start + data.len();
        if state.buf.len() < end {
            state.buf.resize(end, 0);
        }
        state.buf[start..end].copy_from_slice(data);
        state.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Spool {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.state();
        let end = state.base + state.buf.len() as u64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
            SeekFrom::Current(delta) => state.pos.checked_add_signed(delta),
        };
        match target {
            Some(target) if target >= state.base => {
                state.pos = target;
                Ok(target)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek into data already written to the stream",
            )),
        }
    }
}
