//! Reader for the host's line-delimited transcript

use crate::hooks::HookResult;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const TAIL_CHUNK: u64 = 8 * 1024;

/// Random access over a transcript file
#[derive(Debug, Clone)]
pub struct TranscriptReader {
    path: PathBuf,
}

impl TranscriptReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The most recent non-empty line, parsed. `None` when the file is missing,
    /// empty, or its last line is not JSON.
    pub fn last_line(&self) -> HookResult<Option<Value>> {
        let raw = match self.last_raw_line()? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    /// Line `index` (zero-based, counting non-empty lines), parsed
    pub fn line(&self, index: usize) -> HookResult<Option<Value>> {
        let file = match self.open()? {
            Some(file) => file,
            None => return Ok(None),
        };
        let line = BufReader::new(file)
            .lines()
            .filter(|l| l.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(true))
            .nth(index)
            .transpose()?;
        Ok(line.and_then(|l| serde_json::from_str(&l).ok()))
    }

    /// Every parseable line in order; unparseable lines are skipped
    pub fn read_all(&self) -> HookResult<Vec<Value>> {
        let file = match self.open()? {
            Some(file) => file,
            None => return Ok(Vec::new()),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str(&line) {
                entries.push(value);
            }
        }
        Ok(entries)
    }

    fn open(&self) -> HookResult<Option<File>> {
        if self.path.as_os_str().is_empty() {
            return Ok(None);
        }
        match File::open(&self.path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Scan backwards in chunks so long transcripts are not read in full
    fn last_raw_line(&self) -> HookResult<Option<String>> {
        let mut file = match self.open()? {
            Some(file) => file,
            None => return Ok(None),
        };

        let len = file.metadata()?.len();
        let mut end = len;
        let mut tail: Vec<u8> = Vec::new();

        while end > 0 {
            let start = end.saturating_sub(TAIL_CHUNK);
            let mut chunk = vec![0u8; (end - start) as usize];
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&tail);
            tail = chunk;
            end = start;

            let text = String::from_utf8_lossy(&tail);
            let trimmed = text.trim_end();
            if let Some(pos) = trimmed.rfind('\n') {
                let line = trimmed[pos + 1..].trim();
                if !line.is_empty() {
                    return Ok(Some(line.to_string()));
                }
            }
        }

        let text = String::from_utf8_lossy(&tail);
        let line = text.trim();
        Ok(Some(line.to_string()).filter(|l| !l.is_empty()))
    }
}
