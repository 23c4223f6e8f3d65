//! Buffering of incoming file parts: memory first, a temporary file once the request's
//! memory budget is spent. Temporary files live in the save directory so that keeping
//! them is a rename, and they are removed when dropped.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

/// hard ceiling for one request body (2 GiB)
pub const MAX_UPLOAD_SIZE: u64 = 2 << 30;

/// in-memory budget per request (32 MiB), beyond which parts go to disk
pub const MEMORY_THRESHOLD: usize = 32 << 20;

/// where a spooled part's bytes live
#[derive(Debug)]
pub enum SpoolBody {
    Memory(Bytes),
    Disk(TempPath),
}

/// one file part of an upload, fully received
#[derive(Debug)]
pub struct SpooledPart {
    /// filename as the client sent it, undecodable bytes already replaced
    pub file_name: String,
    /// informational only
    pub content_type: Option<String>,
    pub size: u64,
    pub body: SpoolBody,
}

impl SpooledPart {
    /// all bytes of the part; reads the temp file for spilled parts
    pub async fn read_all(&self) -> io::Result<Bytes> {
        match &self.body {
            SpoolBody::Memory(data) => Ok(data.clone()),
            SpoolBody::Disk(path) => tokio::fs::read(path.to_path_buf()).await.map(Bytes::from),
        }
    }
}

/// hands out writers that share one memory budget
#[derive(Debug)]
pub struct Spooler {
    dir: PathBuf,
    memory_left: usize,
}

impl Spooler {
    pub fn new(dir: impl Into<PathBuf>, memory_budget: usize) -> Self {
        Self {
            dir: dir.into(),
            memory_left: memory_budget,
        }
    }

    pub fn memory_left(&self) -> usize {
        self.memory_left
    }

    pub fn writer(&mut self) -> SpoolWriter<'_> {
        SpoolWriter {
            spooler: self,
            state: WriterState::Memory(Vec::new()),
            len: 0,
        }
    }
}

enum WriterState {
    Memory(Vec<u8>),
    Disk {
        file: tokio::fs::File,
        path: TempPath,
    },
}

/// receives one part's chunks
pub struct SpoolWriter<'a> {
    spooler: &'a mut Spooler,
    state: WriterState,
    len: u64,
}

impl SpoolWriter<'_> {
    pub async fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.len += chunk.len() as u64;

        if let WriterState::Memory(buf) = &mut self.state {
            if chunk.len() <= self.spooler.memory_left {
                self.spooler.memory_left -= chunk.len();
                buf.extend_from_slice(chunk);
                return Ok(());
            }

            let buffered = std::mem::take(buf);
            self.spooler.memory_left += buffered.len();
            let dir = self.spooler.dir.clone();
            let (file, path) = tokio::task::spawn_blocking(move || create_spill_file(&dir))
                .await
                .map_err(io::Error::other)??;
            tracing::debug!("Upload part exceeded memory budget, spilling to {:?}", path);

            let mut file = tokio::fs::File::from_std(file);
            file.write_all(&buffered).await?;
            self.state = WriterState::Disk { file, path };
        }

        if let WriterState::Disk { file, .. } = &mut self.state {
            file.write_all(chunk).await?;
        }
        Ok(())
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.state, WriterState::Disk { .. })
    }

    pub async fn finish(self) -> io::Result<(SpoolBody, u64)> {
        let body = match self.state {
            WriterState::Memory(buf) => SpoolBody::Memory(Bytes::from(buf)),
            WriterState::Disk { mut file, path } => {
                file.flush().await?;
                file.sync_all().await?;
                drop(file);
                SpoolBody::Disk(path)
            }
        };
        Ok((body, self.len))
    }
}

fn create_spill_file(dir: &Path) -> io::Result<(std::fs::File, TempPath)> {
    let named = tempfile::Builder::new()
        .prefix(".filebridge-")
        .suffix(".part")
        .tempfile_in(dir)?;
    Ok(named.into_parts())
}
