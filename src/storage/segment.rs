use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use crate::core::error::{Error, Result};
use crate::storage::layout::SegmentPaths;

/// Byte range of a record inside a segment's data blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub begin: u64,
    pub end: u64,
}

impl OffsetRange {
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// One entry of the offset index. `range: None` is a tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    range: Option<OffsetRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub live_keys: usize,
    pub data_bytes_before: u64,
    pub data_bytes_after: u64,
    pub index_bytes_before: u64,
    pub index_bytes_after: u64,
}

impl CompactionStats {
    pub fn reclaimed(&self) -> u64 {
        (self.data_bytes_before + self.index_bytes_before)
            .saturating_sub(self.data_bytes_after + self.index_bytes_after)
    }
}

// Sanity limit for a single offset-index record
const MAX_RECORD_LEN: usize = 1024 * 1024;
const RECORD_HEADER_LEN: usize = 8;

/// Append-only data blob plus an append-only offset index.
///
/// Looking a key up scans every index record and keeps the last one for that key, so an
/// overwrite is just another append. `compact` rewrites both files with only the live
/// entries. Appends are not synchronised here: callers hold the table write lock.
///
/// Index record framing:
/// ```text
/// [ len: u32 LE ][ crc32: u32 LE ][ bincode(IndexRecord) ]
/// ```
#[derive(Debug, Clone)]
pub struct SegmentStore {
    pub paths: SegmentPaths,
    pub zero_fill: bool,
}

impl SegmentStore {
    pub fn open(paths: SegmentPaths) -> Self {
        SegmentStore {
            paths,
            zero_fill: true,
        }
    }

    pub fn with_zero_fill(mut self, zero_fill: bool) -> Self {
        self.zero_fill = zero_fill;
        self
    }

    /// Append bytes to the data blob and return where they landed
    pub fn append(&self, bytes: &[u8]) -> Result<OffsetRange> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.data)?;

        let begin = file.metadata()?.len();
        file.write_all(bytes)?;

        Ok(OffsetRange {
            begin,
            end: begin + bytes.len() as u64,
        })
    }

    pub fn write_index_record(&self, key: &str, range: OffsetRange) -> Result<()> {
        self.append_record(&IndexRecord {
            key: key.to_string(),
            range: Some(range),
        })
    }

    /// Append + index in one call. A failure between the two leaves dangling,
    /// unindexed bytes in the blob, which are never considered live.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<OffsetRange> {
        let range = self.append(bytes)?;
        self.write_index_record(key, range)?;
        Ok(range)
    }

    pub fn read(&self, range: OffsetRange) -> Result<Vec<u8>> {
        let mut file = File::open(&self.paths.data)?;
        file.seek(SeekFrom::Start(range.begin))?;

        let mut buf = vec![0u8; range.len() as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Last live range recorded for `key`
    pub fn lookup(&self, key: &str) -> Result<Option<OffsetRange>> {
        let mut found = None;
        self.scan(|record| {
            if record.key == key {
                found = record.range;
            }
        })?;
        Ok(found)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)? {
            Some(range) => Ok(Some(self.read(range)?)),
            None => Ok(None),
        }
    }

    /// Every live key with its range (last write wins, tombstones drop the key)
    pub fn resolve(&self) -> Result<HashMap<String, OffsetRange>> {
        let mut live = HashMap::new();
        self.scan(|record| match record.range {
            Some(range) => {
                live.insert(record.key, range);
            }
            None => {
                live.remove(&record.key);
            }
        })?;
        Ok(live)
    }

    /// Tombstone `key`; its bytes stay in the blob until the next compaction
    /// (zeroed when `zero_fill` is set). Returns false if the key was not live.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let range = match self.lookup(key)? {
            Some(range) => range,
            None => return Ok(false),
        };

        self.append_record(&IndexRecord {
            key: key.to_string(),
            range: None,
        })?;

        if self.zero_fill && !range.is_empty() {
            let mut file = OpenOptions::new().write(true).open(&self.paths.data)?;
            file.seek(SeekFrom::Start(range.begin))?;
            file.write_all(&vec![0u8; range.len() as usize])?;
        }

        Ok(true)
    }

    /// Rewrite both files keeping only live entries.
    ///
    /// New files are written next to the originals and renamed over them,
    /// data blob first, then the offset index.
    pub fn compact(&self) -> Result<CompactionStats> {
        if !self.paths.index.exists() {
            return Ok(CompactionStats::default());
        }

        let dir = self.paths.index.parent()
            .ok_or_else(|| Error::storage("Segment index has no parent directory"))?;

        let mut stats = CompactionStats {
            data_bytes_before: file_len(&self.paths.data)?,
            index_bytes_before: file_len(&self.paths.index)?,
            ..CompactionStats::default()
        };

        // Copy in blob order so the source is read sequentially
        let mut entries: Vec<(String, OffsetRange)> = self.resolve()?.into_iter().collect();
        entries.sort_by_key(|(_, range)| range.begin);
        stats.live_keys = entries.len();

        let mut data_tmp = NamedTempFile::new_in(dir)?;
        let mut index_tmp = NamedTempFile::new_in(dir)?;
        {
            let mut data_out = BufWriter::new(&mut data_tmp);
            let mut index_out = BufWriter::new(&mut index_tmp);
            let mut source = if entries.is_empty() {
                None
            } else {
                Some(File::open(&self.paths.data)?)
            };

            let mut position = 0u64;
            for (key, range) in &entries {
                let mut bytes = vec![0u8; range.len() as usize];
                if let Some(file) = source.as_mut() {
                    file.seek(SeekFrom::Start(range.begin))?;
                    file.read_exact(&mut bytes)?;
                }
                data_out.write_all(&bytes)?;

                let moved = OffsetRange {
                    begin: position,
                    end: position + bytes.len() as u64,
                };
                position = moved.end;

                index_out.write_all(&encode_record(&IndexRecord {
                    key: key.clone(),
                    range: Some(moved),
                })?)?;
            }

            data_out.flush()?;
            index_out.flush()?;
        }

        data_tmp.as_file().sync_all()?;
        index_tmp.as_file().sync_all()?;
        data_tmp.persist(&self.paths.data).map_err(|e| e.error)?;
        index_tmp.persist(&self.paths.index).map_err(|e| e.error)?;

        stats.data_bytes_after = file_len(&self.paths.data)?;
        stats.index_bytes_after = file_len(&self.paths.index)?;
        Ok(stats)
    }

    /// Remove both files
    pub fn destroy(&self) -> Result<()> {
        for path in [&self.paths.index, &self.paths.data] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn append_record(&self, record: &IndexRecord) -> Result<()> {
        let encoded = encode_record(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.index)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    fn scan(&self, mut visit: impl FnMut(IndexRecord)) -> Result<()> {
        let file = match File::open(&self.paths.index) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;

        loop {
            let mut header = [0u8; RECORD_HEADER_LEN];
            let read = fill(&mut reader, &mut header)?;
            if read == 0 {
                break;
            }
            if read < RECORD_HEADER_LEN {
                tracing::warn!(path = %self.paths.index.display(), offset, "torn offset-index header ignored");
                break;
            }

            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if len > MAX_RECORD_LEN {
                tracing::warn!(path = %self.paths.index.display(), offset, len, "oversized offset-index record, stopping scan");
                break;
            }

            let mut body = vec![0u8; len];
            if fill(&mut reader, &mut body)? < len {
                tracing::warn!(path = %self.paths.index.display(), offset, "torn offset-index record ignored");
                break;
            }
            offset += (RECORD_HEADER_LEN + len) as u64;

            if crc32fast::hash(&body) != checksum {
                tracing::warn!(path = %self.paths.index.display(), offset, "offset-index checksum mismatch, record skipped");
                continue;
            }

            match bincode::deserialize::<IndexRecord>(&body) {
                Ok(record) => visit(record),
                Err(e) => {
                    tracing::warn!(path = %self.paths.index.display(), offset, error = %e, "undecodable offset-index record skipped");
                }
            }
        }

        Ok(())
    }
}

fn encode_record(record: &IndexRecord) -> Result<Vec<u8>> {
    let body = bincode::serialize(record)?;
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Read until `buf` is full or EOF; returns the number of bytes read
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
