use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::codec;
use crate::error::{CrudError, Result};
use crate::model::Record;
use crate::store::{parse_config, Continuation, Store, ITERATE_PAGE};

/// In-memory backend over an ordered map keyed by the composite record key.
/// Commits encode the whole batch before taking the write lock, so a batch
/// is observable in full or not at all.
pub struct MemStore {
    prefix: Vec<u8>,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            prefix: Vec::new(),
            map: RwLock::new(BTreeMap::new()),
        }
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<Record>> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(prefix);
        let end = codec::prefix_end(&full);
        let map = self.map.read();
        let mut records = Vec::new();
        for (key, value) in map.range::<Vec<u8>, _>((Bound::Included(&full), Bound::Excluded(&end)))
        {
            records.push(codec::decode_record(&key[self.prefix.len()..], value)?);
        }
        records.sort_by_key(Record::ord_key);
        Ok(records)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemStore {
    fn init(&mut self, config: &str) -> Result<()> {
        let cfg = parse_config(config);
        self.prefix = cfg.get("prefix").unwrap_or(&"").as_bytes().to_vec();
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
        let mut map = self.map.write();
        for (key, value) in encoded {
            map.insert(key, value);
        }
        Ok(())
    }

    fn is_new(&self, kind: &str, id: &str) -> Result<bool> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(&codec::subject_prefix(kind, id));
        let end = codec::prefix_end(&full);
        let map = self.map.read();
        Ok(map
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
        let map = self.map.read();
        let mut records = Vec::new();
        let mut last_key = None;
        for (key, value) in map.range((start, Bound::Excluded(end))) {
            records.push(codec::decode_record(&key[self.prefix.len()..], value)?);
            last_key = Some(key.clone());
            if records.len() == ITERATE_PAGE {
                return Ok((records, last_key));
            }
        }
        Ok((records, None))
    }
}
