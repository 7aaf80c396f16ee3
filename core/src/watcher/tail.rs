//! Incremental reader over one append-only log file.
//!
//! Only complete lines are handed out; a trailing partial line stays on disk
//! until its newline arrives. The byte offset of every line start is kept so
//! events can be keyed by position.

use memchr::memchr_iter;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

use crate::error::WatchError;
use crate::game_log::EventOrigin;

/// Upper bound on bytes pulled in a single read; the rest waits for the next call.
/// A line that does not fit is dropped.
const MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

const SCAN_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub origin: EventOrigin,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct TailRead {
    pub lines: Vec<TailLine>,
    /// The file shrank since the last read and was re-read from the start.
    pub truncated: bool,
    /// More complete data remains beyond this read.
    pub more: bool,
    /// Lines dropped for exceeding the read limit.
    pub oversized: u64,
}

/// Result of counting newlines over a prefix of the file.
struct Scan {
    lines: u64,
    /// Offset just past the last newline seen.
    last_line_end: u64,
    scanned: u64,
}

#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    /// Number of complete lines before `offset`.
    line: u64,
    last_size: Option<u64>,
    read_limit: u64,
    /// Inside a line that outgrew `read_limit`; bytes are skipped up to its newline.
    discarding: bool,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            line: 0,
            last_size: None,
            read_limit: MAX_READ_BYTES,
            discarding: false,
        }
    }

    pub fn with_read_limit(mut self, bytes: u64) -> Self {
        self.read_limit = bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    /// Skip everything currently in the file, keeping line numbers correct.
    pub async fn seek_to_end(&mut self) -> Result<(), WatchError> {
        let scan = self.scan(u64::MAX).await?;
        self.offset = scan.last_line_end;
        self.line = scan.lines;
        self.last_size = Some(scan.scanned);
        self.discarding = false;
        Ok(())
    }

    /// Position at `offset`, which must be a line start.
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), WatchError> {
        let scan = self.scan(offset).await?;
        self.line = scan.lines;
        self.offset = scan.scanned;
        self.last_size = None;
        self.discarding = false;
        Ok(())
    }

    /// Read the complete lines appended since the last call.
    pub async fn read_new(&mut self) -> Result<TailRead, WatchError> {
        let mut file = File::open(&self.path).await.map_err(|e| self.io(e))?;
        let size = file.metadata().await.map_err(|e| self.io(e))?.len();
        let mut read = TailRead::default();

        if size < self.offset {
            tracing::info!(path = %self.path.display(), size, offset = self.offset, "Log file truncated, restarting from the top");
            self.offset = 0;
            self.line = 0;
            self.discarding = false;
            read.truncated = true;
        } else if self.last_size == Some(size) {
            return Ok(read);
        }

        let available = size - self.offset;
        if available == 0 {
            self.last_size = Some(size);
            return Ok(read);
        }
        let wanted = available.min(self.read_limit);
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| self.io(e))?;
        let mut buf = Vec::with_capacity(wanted as usize);
        (&mut file)
            .take(wanted)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| self.io(e))?;

        let mut chunk = buf.as_slice();
        if self.discarding {
            let skipped = self.skip_discarded(chunk);
            chunk = &chunk[skipped..];
        }
        let consumed = self.split_lines(chunk, &mut read.lines);
        if !self.discarding && consumed == 0 && chunk.len() as u64 == self.read_limit {
            tracing::warn!(path = %self.path.display(), offset = self.offset, limit = self.read_limit, "Dropping line longer than the read limit");
            self.discarding = true;
            self.offset += chunk.len() as u64;
            read.oversized += 1;
        }

        read.more = self.offset < size && (wanted < available || self.discarding);
        self.last_size = (!read.more).then_some(size);
        Ok(read)
    }

    /// Skip the rest of an oversized line. Returns the bytes of `buf` used.
    fn skip_discarded(&mut self, buf: &[u8]) -> usize {
        match memchr::memchr(b'\n', buf) {
            Some(end) => {
                self.discarding = false;
                self.line += 1;
                self.offset += end as u64 + 1;
                end + 1
            }
            None => {
                self.offset += buf.len() as u64;
                buf.len()
            }
        }
    }

    fn split_lines(&mut self, buf: &[u8], out: &mut Vec<TailLine>) -> usize {
        let mut start = 0;
        for end in memchr_iter(b'\n', buf) {
            let mut raw = &buf[start..end];
            if raw.last() == Some(&b'\r') {
                raw = &raw[..raw.len() - 1];
            }
            self.line += 1;
            let (text, _) = encoding_rs::UTF_8.decode_without_bom_handling(raw);
            out.push(TailLine {
                origin: EventOrigin {
                    line: self.line,
                    offset: self.offset + start as u64,
                },
                text: text.into_owned(),
            });
            start = end + 1;
        }
        self.offset += start as u64;
        start
    }

    async fn scan(&self, limit: u64) -> Result<Scan, WatchError> {
        let file = File::open(&self.path).await.map_err(|e| self.io(e))?;
        let mut reader = file.take(limit);
        let mut buf = vec![0u8; SCAN_CHUNK];
        let mut scan = Scan {
            lines: 0,
            last_line_end: 0,
            scanned: 0,
        };
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| self.io(e))?;
            if n == 0 {
                return Ok(scan);
            }
            for pos in memchr_iter(b'\n', &buf[..n]) {
                scan.lines += 1;
                scan.last_line_end = scan.scanned + pos as u64 + 1;
            }
            scan.scanned += n as u64;
        }
    }

    fn io(&self, source: std::io::Error) -> WatchError {
        WatchError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// The complete line starting at `offset`, if there is one.
pub async fn read_line_at(path: &Path, offset: u64) -> Result<Option<String>, WatchError> {
    let io = |source| WatchError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).await.map_err(io)?;
    file.seek(SeekFrom::Start(offset)).await.map_err(io)?;
    let mut raw = Vec::new();
    BufReader::new(file.take(MAX_READ_BYTES))
        .read_until(b'\n', &mut raw)
        .await
        .map_err(io)?;
    let Some(line) = raw.strip_suffix(b"\n") else {
        return Ok(None);
    };
    let raw = line.strip_suffix(b"\r").unwrap_or(line);
    let (text, _) = encoding_rs::UTF_8.decode_without_bom_handling(raw);
    Ok(Some(text.into_owned()))
}
