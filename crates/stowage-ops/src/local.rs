//! Local filesystem adapters: import sources and download destinations.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::backend::{
    BackendError, BackendResult, BoxFuture, Destination, ExternalFile, ReadStream, WriteStream,
};

/// Default read size of local file streams.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A local file offered for import.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExternalFile for LocalFile {
    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn ReadStream>>> {
        Box::pin(async move {
            let file = fs::File::open(&self.path).await.map_err(BackendError::io)?;
            Ok(Box::new(LocalReader { file }) as Box<dyn ReadStream>)
        })
    }
}

struct LocalReader {
    file: fs::File,
}

impl ReadStream for LocalReader {
    fn read_chunk(&mut self, max_len: usize) -> BoxFuture<'_, BackendResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            let mut buf = vec![0u8; max_len.clamp(1, READ_BUFFER_SIZE)];
            let read = self.file.read(&mut buf).await.map_err(BackendError::io)?;
            if read == 0 {
                return Ok(None);
            }
            buf.truncate(read);
            Ok(Some(buf))
        })
    }
}

/// A local file that downloads are written to.
///
/// The file is created (or truncated) when the destination is opened.
#[derive(Debug, Clone)]
pub struct LocalFileDestination {
    path: PathBuf,
}

impl LocalFileDestination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Destination for LocalFileDestination {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn WriteStream>>> {
        Box::pin(async move {
            let file = fs::File::create(&self.path)
                .await
                .map_err(BackendError::io)?;
            Ok(Box::new(LocalWriter { file: Some(file) }) as Box<dyn WriteStream>)
        })
    }

    fn remove(&self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            match fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(BackendError::io(e)),
            }
        })
    }
}

struct LocalWriter {
    file: Option<fs::File>,
}

impl LocalWriter {
    fn file(&mut self) -> BackendResult<&mut fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| BackendError::io("stream already closed"))
    }
}

impl WriteStream for LocalWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move { self.file()?.write_all(data).await.map_err(BackendError::io) })
    }

    fn close(&mut self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut file = self
                .file
                .take()
                .ok_or_else(|| BackendError::io("stream already closed"))?;
            file.flush().await.map_err(BackendError::io)?;
            file.sync_all().await.map_err(BackendError::io)
        })
    }

    fn abort(&mut self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.file = None;
            Ok(())
        })
    }
}
