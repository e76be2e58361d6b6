//! Byte sink for generated XML.
//!
//! A [`Writer`] appends text verbatim to one of several targets and tracks
//! how many bytes the sink holds, so a persisted offset can later be used to
//! reopen a file exactly where the last complete batch ended.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{ConvertError, Result};

/// Where a [`Writer`] sends its bytes.
pub enum Target {
    /// Accumulate in memory; read back with [`Writer::contents`].
    Buffer,
    /// Create (or truncate) a file.
    File(PathBuf),
    /// Reopen an existing file, truncate it to `offset` and append from there.
    Resume { path: PathBuf, offset: u64 },
    /// Any caller-provided stream.
    Stream(Box<dyn Write + Send>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Buffer => write!(f, "Buffer"),
            Target::File(path) => write!(f, "File({})", path.display()),
            Target::Resume { path, offset } => {
                write!(f, "Resume({} @ {offset})", path.display())
            }
            Target::Stream(_) => write!(f, "Stream"),
        }
    }
}

enum Sink {
    Buffer(Vec<u8>),
    File {
        path: PathBuf,
        out: Option<BufWriter<File>>,
    },
    Stream(Option<Box<dyn Write + Send>>),
}

pub struct Writer {
    sink: Sink,
    open: bool,
    written: u64,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("open", &self.open)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

fn unavailable(what: &str, err: std::io::Error) -> ConvertError {
    ConvertError::IoState(format!("{what}: {err}"))
}

impl Writer {
    pub fn open(target: Target) -> Result<Self> {
        let (sink, written) = match target {
            Target::Buffer => (Sink::Buffer(Vec::new()), 0),
            Target::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| unavailable("create output directory", e))?;
                }
                let file = File::create(&path).map_err(|e| unavailable("create output", e))?;
                (
                    Sink::File {
                        path,
                        out: Some(BufWriter::new(file)),
                    },
                    0,
                )
            }
            Target::Resume { path, offset } => {
                let mut file = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| unavailable("reopen output", e))?;
                let len = file
                    .metadata()
                    .map_err(|e| unavailable("stat output", e))?
                    .len();
                if len < offset {
                    return Err(ConvertError::IoState(format!(
                        "{} holds {len} bytes, expected at least {offset}",
                        path.display()
                    )));
                }
                file.set_len(offset)
                    .map_err(|e| unavailable("truncate output", e))?;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| unavailable("seek output", e))?;
                debug!(path = %path.display(), offset, dropped = len - offset, "reopened output");
                (
                    Sink::File {
                        path,
                        out: Some(BufWriter::new(file)),
                    },
                    offset,
                )
            }
            Target::Stream(stream) => (Sink::Stream(Some(stream)), 0),
        };

        Ok(Self {
            sink,
            open: true,
            written,
        })
    }

    pub fn write(&mut self, text: &str) -> Result<()> {
        if !self.open {
            return Err(ConvertError::IoState("write after close".into()));
        }
        match &mut self.sink {
            Sink::Buffer(buf) => buf.extend_from_slice(text.as_bytes()),
            Sink::File { out: Some(w), path } => w
                .write_all(text.as_bytes())
                .map_err(|e| unavailable(&format!("write {}", path.display()), e))?,
            Sink::Stream(Some(w)) => w
                .write_all(text.as_bytes())
                .map_err(|e| unavailable("write stream", e))?,
            _ => return Err(ConvertError::IoState("sink already released".into())),
        }
        self.written += text.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.open {
            return Err(ConvertError::IoState("flush after close".into()));
        }
        match &mut self.sink {
            Sink::Buffer(_) => Ok(()),
            Sink::File { out: Some(w), .. } => w.flush().map_err(|e| unavailable("flush output", e)),
            Sink::Stream(Some(w)) => w.flush().map_err(|e| unavailable("flush stream", e)),
            _ => Err(ConvertError::IoState("sink already released".into())),
        }
    }

    /// Flush and release the underlying handle. Closing twice is a no-op.
    ///
    /// The handle is released even when the final flush fails.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let flushed = match &mut self.sink {
            Sink::Buffer(_) => Ok(()),
            Sink::File { out, path } => match out.take() {
                Some(mut w) => w.flush().map_err(|e| {
                    std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
                }),
                None => Ok(()),
            },
            Sink::Stream(stream) => match stream.take() {
                Some(mut w) => w.flush(),
                None => Ok(()),
            },
        };
        flushed.map_err(|e| unavailable("close output", e))
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Byte offset of the end of the sink.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Accumulated text for buffer targets, `None` otherwise.
    pub fn contents(&self) -> Option<&str> {
        match &self.sink {
            Sink::Buffer(buf) => std::str::from_utf8(buf).ok(),
            _ => None,
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = self.close()
        {
            warn!("output not flushed on drop: {e}");
        }
    }
}
