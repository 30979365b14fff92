//! Storage adapter contract and the embedded backends.
//!
//! Every backend exposes the same narrow surface: open, commit a batch,
//! probe for subject existence, fetch a subject's records, and (optionally)
//! scan a kind. Physical layout is backend business as long as the two
//! range-scan semantics hold: per-subject in commit order, and
//! per-(subject, predicate).

use std::collections::HashMap;

use crate::error::{CrudError, Result};
use crate::model::Record;

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemStore;

/// Opaque resumption token returned by [`Store::iterate`].
pub type Continuation = Vec<u8>;

/// Records returned per [`Store::iterate`] page.
pub const ITERATE_PAGE: usize = 256;

pub trait Store: Send + Sync {
    /// Opens or creates the underlying store. `config` is an opaque string
    /// of space-separated `key=value` pairs; the embedded backends accept
    /// `path=` (disk), `prefix=` (physical namespace for multi-tenant
    /// deployments), and `sync=off`.
    fn init(&mut self, config: &str) -> Result<()>;

    /// Atomically persists one root-scoped commit batch: either every
    /// record becomes observable or none does. Cross-batch ordering follows
    /// commit arrival.
    fn commit(&self, records: &[Record]) -> Result<()>;

    /// Reports whether the subject has no records at all.
    fn is_new(&self, kind: &str, id: &str) -> Result<bool>;

    /// Returns every record of the subject, ordered by `(nanotime, seq)`.
    fn get_entity(&self, kind: &str, id: &str) -> Result<Vec<Record>>;

    /// Scans records of a kind in key order, one page per call. Feed the
    /// returned continuation back in to resume; `None` means exhausted.
    /// Admin/migration surface, not part of the core read path.
    fn iterate(
        &self,
        kind: &str,
        continuation: Option<&[u8]>,
    ) -> Result<(Vec<Record>, Option<Continuation>)> {
        let _ = (kind, continuation);
        Err(CrudError::Unsupported("iterate"))
    }
}

/// Splits an adapter config string into its `key=value` pairs. Bare words
/// are kept with an empty value so backends can reject them explicitly.
pub(crate) fn parse_config(config: &str) -> HashMap<&str, &str> {
    config
        .split_whitespace()
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_pairs_parse() {
        let cfg = parse_config("path=/tmp/x.log prefix=Test- sync=off");
        assert_eq!(cfg.get("path"), Some(&"/tmp/x.log"));
        assert_eq!(cfg.get("prefix"), Some(&"Test-"));
        assert_eq!(cfg.get("sync"), Some(&"off"));
        assert_eq!(cfg.get("missing"), None);
    }
}
