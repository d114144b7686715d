// tail.rs — Follow a growing JSONL file and forward complete lines.
//
// The file is polled: new bytes past the last offset are read, split on
// newlines, and every complete line is sent down the channel. A trailing
// partial line waits for its newline. If the file shrinks (truncated or
// rotated in place) reading restarts from the beginning. A missing file is
// waited for.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

use crate::error::ExemptionError;

/// Where to begin reading when the file is first opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    Beginning,
    End,
}

pub struct FileTail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    start: Option<StartAt>,
}

impl FileTail {
    pub fn new(path: impl AsRef<Path>, start: StartAt) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
            partial: Vec::new(),
            start: Some(start),
        }
    }

    /// Read whatever complete lines have been appended since the last call.
    pub async fn poll_lines(&mut self) -> Result<Vec<String>, ExemptionError> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ExemptionError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if let Some(start) = self.start.take() {
            if start == StartAt::End {
                self.offset = len;
                return Ok(Vec::new());
            }
        }
        if len < self.offset {
            tracing::info!(path = %self.path.display(), "event file truncated; reading from start");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        let io_err = |source| ExemptionError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::File::open(&self.path).await.map_err(io_err)?;
        file.seek(SeekFrom::Start(self.offset)).await.map_err(io_err)?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset)
            .read_to_end(&mut buf)
            .await
            .map_err(io_err)?;
        self.offset += buf.len() as u64;

        self.partial.extend_from_slice(&buf);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let text = text.trim_end_matches('\r');
            if !text.trim().is_empty() {
                lines.push(text.to_string());
            }
        }
        Ok(lines)
    }

    /// Poll every `every` and send lines to `tx` until the receiver is
    /// dropped.
    pub async fn follow(mut self, tx: mpsc::Sender<String>, every: Duration) {
        loop {
            match self.poll_lines().await {
                Ok(lines) => {
                    for line in lines {
                        if tx.send(line).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to read event file"),
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(every).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(text.as_bytes()))
            .unwrap();
    }

    #[tokio::test]
    async fn complete_lines_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut tail = FileTail::new(&path, StartAt::Beginning);
        assert!(tail.poll_lines().await.unwrap().is_empty());

        append(&path, "one\ntw");
        assert_eq!(tail.poll_lines().await.unwrap(), vec!["one".to_string()]);
        append(&path, "o\n\nthree\r\n");
        assert_eq!(
            tail.poll_lines().await.unwrap(),
            vec!["two".to_string(), "three".to_string()]
        );
        assert!(tail.poll_lines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_at_end_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        append(&path, "old\n");
        let mut tail = FileTail::new(&path, StartAt::End);
        assert!(tail.poll_lines().await.unwrap().is_empty());
        append(&path, "new\n");
        assert_eq!(tail.poll_lines().await.unwrap(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        append(&path, "first line\nsecond line\n");
        let mut tail = FileTail::new(&path, StartAt::Beginning);
        assert_eq!(tail.poll_lines().await.unwrap().len(), 2);

        std::fs::write(&path, "x\n").unwrap();
        assert_eq!(tail.poll_lines().await.unwrap(), vec!["x".to_string()]);
    }
}
