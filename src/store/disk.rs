use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::Path;

use crc32fast::Hasher;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{CrudError, Result};
use crate::model::Record;
use crate::store::{parse_config, Continuation, Store, ITERATE_PAGE};

const LOG_MAGIC: &[u8; 8] = b"CRUDLOG\0";
const LOG_VERSION_MAJOR: u16 = 1;
const LOG_VERSION_MINOR: u16 = 0;
const LOG_HEADER_SIZE: usize = 16;
const FRAME_HEADER_SIZE: usize = 12;
const MAX_FRAME_PAYLOAD: usize = 1 << 30;

/// Append-only log file backend.
///
/// Each commit batch is one CRC-framed append; the full record set is
/// replayed into an in-memory ordered index on open. A torn or corrupt tail
/// frame is truncated away, so batches are atomic across crashes: either
/// the whole frame survives replay or none of it does.
pub struct DiskStore {
    prefix: Vec<u8>,
    sync: bool,
    file: Mutex<Option<File>>,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl DiskStore {
    pub fn new() -> Self {
        Self {
            prefix: Vec::new(),
            sync: true,
            file: Mutex::new(None),
            index: RwLock::new(BTreeMap::new()),
        }
    }

    /// Opens (or creates) a log at `path` with default options.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self::new();
        store.init(&format!("path={}", path.display()))?;
        Ok(store)
    }

    fn replay(&self, file: &mut File) -> Result<()> {
        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&encode_log_header())?;
            file.sync_data()?;
            return Ok(());
        }
        if len < LOG_HEADER_SIZE as u64 {
            return Err(CrudError::Corruption("log header truncated"));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; LOG_HEADER_SIZE];
        file.read_exact(&mut header)?;
        validate_log_header(&header)?;

        let mut index = self.index.write();
        index.clear();
        let mut good_end = LOG_HEADER_SIZE as u64;
        let mut frames = 0usize;
        loop {
            match read_frame(file)? {
                FrameRead::Frame { payload, count } => {
                    apply_frame(&payload, count, &mut index)?;
                    good_end = file.stream_position()?;
                    frames += 1;
                }
                FrameRead::Eof => break,
                FrameRead::Torn => {
                    warn!(offset = good_end, "truncating torn log tail");
                    file.set_len(good_end)?;
                    file.sync_data()?;
                    break;
                }
            }
        }
        info!(frames, records = index.len(), "log replay complete");
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<Record>> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(prefix);
        let end = codec::prefix_end(&full);
        let index = self.index.read();
        let mut records = Vec::new();
        for (key, value) in
            index.range::<Vec<u8>, _>((Bound::Included(&full), Bound::Excluded(&end)))
        {
            records.push(codec::decode_record(&key[self.prefix.len()..], value)?);
        }
        records.sort_by_key(Record::ord_key);
        Ok(records)
    }
}

impl Default for DiskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for DiskStore {
    fn init(&mut self, config: &str) -> Result<()> {
        let cfg = parse_config(config);
        let path = cfg
            .get("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CrudError::Validation("disk store config requires path=".into()))?;
        self.prefix = cfg.get("prefix").unwrap_or(&"").as_bytes().to_vec();
        self.sync = cfg.get("sync") != Some(&"off");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        self.replay(&mut file)?;
        *self.file.get_mut() = Some(file);
        Ok(())
    }

    fn commit(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Err(CrudError::Validation("empty commit batch".into()));
        }
        let mut encoded = Vec::with_capacity(records.len());
        for rec in records {
            let mut key = self.prefix.clone();
            key.extend_from_slice(&codec::encode_key(rec));
            encoded.push((key, codec::encode_value(&rec.value)?));
        }
        let frame = encode_frame(&encoded);
        if frame.len() - FRAME_HEADER_SIZE > MAX_FRAME_PAYLOAD {
            return Err(CrudError::Validation("commit batch exceeds frame limit".into()));
        }

        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| CrudError::Store("disk store not initialized".into()))?;
        file.write_all(&frame)?;
        if self.sync {
            file.sync_data()?;
        }
        debug!(records = records.len(), bytes = frame.len(), "appended commit frame");

        let mut index = self.index.write();
        for (key, value) in encoded {
            index.insert(key, value);
        }
        Ok(())
    }

    fn is_new(&self, kind: &str, id: &str) -> Result<bool> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(&codec::subject_prefix(kind, id));
        let end = codec::prefix_end(&full);
        let index = self.index.read();
        Ok(index
            .range::<Vec<u8>, _>((Bound::Included(&full), Bound::Excluded(&end)))
            .next()
            .is_none())
    }

    fn get_entity(&self, kind: &str, id: &str) -> Result<Vec<Record>> {
        self.scan(&codec::subject_prefix(kind, id))
    }

    fn iterate(
        &self,
        kind: &str,
        continuation: Option<&[u8]>,
    ) -> Result<(Vec<Record>, Option<Continuation>)> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(&codec::kind_prefix(kind));
        let end = codec::prefix_end(&full);
        let start = match continuation {
            Some(last) => Bound::Excluded(last.to_vec()),
            None => Bound::Included(full),
        };
        let index = self.index.read();
        let mut records = Vec::new();
        let mut last_key = None;
        for (key, value) in index.range((start, Bound::Excluded(end))) {
            records.push(codec::decode_record(&key[self.prefix.len()..], value)?);
            last_key = Some(key.clone());
            if records.len() == ITERATE_PAGE {
                return Ok((records, last_key));
            }
        }
        Ok((records, None))
    }
}

fn encode_log_header() -> [u8; LOG_HEADER_SIZE] {
    let mut header = [0u8; LOG_HEADER_SIZE];
    header[..8].copy_from_slice(LOG_MAGIC);
    header[8..10].copy_from_slice(&LOG_VERSION_MAJOR.to_be_bytes());
    header[10..12].copy_from_slice(&LOG_VERSION_MINOR.to_be_bytes());
    header
}

fn validate_log_header(header: &[u8; LOG_HEADER_SIZE]) -> Result<()> {
    if &header[..8] != LOG_MAGIC {
        return Err(CrudError::Corruption("log magic mismatch"));
    }
    let major = u16::from_be_bytes([header[8], header[9]]);
    if major != LOG_VERSION_MAJOR {
        return Err(CrudError::Corruption("unsupported log version"));
    }
    Ok(())
}

/// Frame: payload length, CRC32 of payload, record count, then per record a
/// length-prefixed key and value.
fn encode_frame(encoded: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (key, value) in encoded {
        payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(&(value.len() as u32).to_be_bytes());
        payload.extend_from_slice(value);
    }
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

enum FrameRead {
    Frame { payload: Vec<u8>, count: usize },
    Eof,
    Torn,
}

fn read_frame(file: &mut File) -> Result<FrameRead> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match read_exact_or_eof(file, &mut header)? {
        ReadOutcome::Eof => return Ok(FrameRead::Eof),
        ReadOutcome::Partial => return Ok(FrameRead::Torn),
        ReadOutcome::Full => {}
    }
    let payload_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let expected_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let count = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if payload_len > MAX_FRAME_PAYLOAD {
        return Ok(FrameRead::Torn);
    }

    let mut payload = vec![0u8; payload_len];
    match read_exact_or_eof(file, &mut payload)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof | ReadOutcome::Partial => return Ok(FrameRead::Torn),
    }
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != expected_crc {
        return Ok(FrameRead::Torn);
    }
    Ok(FrameRead::Frame { payload, count })
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

fn apply_frame(
    payload: &[u8],
    count: usize,
    index: &mut BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<()> {
    let mut cursor = 0usize;
    let mut applied = 0usize;
    while cursor < payload.len() {
        let key = read_chunk(payload, &mut cursor)?;
        let value = read_chunk(payload, &mut cursor)?;
        index.insert(key, value);
        applied += 1;
    }
    if applied != count {
        return Err(CrudError::Corruption("frame record count mismatch"));
    }
    Ok(())
}

fn read_chunk(payload: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    if *cursor + 4 > payload.len() {
        return Err(CrudError::Corruption("frame chunk length truncated"));
    }
    let len = u32::from_be_bytes([
        payload[*cursor],
        payload[*cursor + 1],
        payload[*cursor + 2],
        payload[*cursor + 3],
    ]) as usize;
    *cursor += 4;
    if *cursor + len > payload.len() {
        return Err(CrudError::Corruption("frame chunk truncated"));
    }
    let chunk = payload[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(chunk)
}
