//! Per-entry pipeline and the scan session that drives it.
//!
//! Each entry goes `open -> read -> [decrypt] -> parse -> categorize -> record |
//! discard`. Entries are independent, so a session fans them out over a rayon
//! pool; the collector and the failure list are the only shared state.

use rayon::ThreadPool;
use rayon::prelude::*;
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, info_span, trace, warn};

use crate::archive::ArchiveEntry;
use crate::categorize::{Categorization, Categorizer};
use crate::classfile::{self, ParsedClass};
use crate::collector::{ClassDescriptor, ScanResult, ScanResultCollector};
use crate::decrypt::{AesCbcCipher, DecryptionGate, Decryptor, KeyMaterial, PathRule};
use crate::error::{ConfigError, DecryptionError, EntryError};

/// Key material and path markers for protected entries.
#[derive(Clone)]
pub struct DecryptionSettings {
    pub protected_path_marker: String,
    pub synthetic_marker: String,
    pub key: Vec<u8>,
    pub key_derivation_seed: String,
}

impl std::fmt::Debug for DecryptionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionSettings")
            .field("protected_path_marker", &self.protected_path_marker)
            .field("synthetic_marker", &self.synthetic_marker)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SessionOptions {
    /// `None` disables decryption entirely.
    pub decryption: Option<DecryptionSettings>,
    pub decryptor: Arc<dyn Decryptor>,
    pub categorizer: Categorizer,
    /// Dedicated worker count; `None` uses rayon's global pool.
    pub threads: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            decryption: None,
            decryptor: Arc::new(AesCbcCipher),
            categorizer: Categorizer::default(),
            threads: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Recorded(Categorization),
    Discarded,
}

/// Result of running one class through gate, reader and categorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub class: ParsedClass,
    pub categorization: Categorization,
    pub decrypted: bool,
}

/// A per-entry failure, kept alongside the scan result.
#[derive(Debug)]
pub struct EntryFailure {
    pub path: String,
    pub container: Option<String>,
    pub is_root: bool,
    pub error: EntryError,
}

impl Serialize for EntryFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut message = self.error.to_string();
        let mut source = std::error::Error::source(&self.error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        let mut s = serializer.serialize_struct("EntryFailure", 5)?;
        s.serialize_field("path", &self.path)?;
        s.serialize_field("container", &self.container)?;
        s.serialize_field("is_root", &self.is_root)?;
        s.serialize_field("kind", self.error.kind())?;
        s.serialize_field("message", &message)?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub handled: usize,
    pub recorded: usize,
    pub discarded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchStats {
    fn merge(self, other: Self) -> Self {
        Self {
            handled: self.handled + other.handled,
            recorded: self.recorded + other.recorded,
            discarded: self.discarded + other.discarded,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
        }
    }
}

#[derive(Debug)]
pub struct ScanReport {
    pub result: ScanResult,
    pub failures: Vec<EntryFailure>,
    pub stats: BatchStats,
}

pub struct ScanSession {
    gate: DecryptionGate,
    categorizer: Categorizer,
    collector: ScanResultCollector,
    failures: Mutex<Vec<EntryFailure>>,
    stats: Mutex<BatchStats>,
    pool: Option<ThreadPool>,
    cancelled: AtomicBool,
}

impl ScanSession {
    /// Validates key material and builds the worker pool. Nothing is scanned
    /// when this fails.
    pub fn new(options: SessionOptions) -> Result<Self, ConfigError> {
        let gate = match options.decryption {
            Some(settings) => {
                let rule =
                    PathRule::new(settings.protected_path_marker, settings.synthetic_marker)?;
                let key = KeyMaterial::new(&settings.key, settings.key_derivation_seed)?;
                DecryptionGate::new(rule, key, options.decryptor)
            }
            None => DecryptionGate::disabled(),
        };

        let pool = match options.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n.max(1))
                    .thread_name(|i| format!("entity-scan-{i}"))
                    .build()?,
            ),
            None => None,
        };

        Ok(Self {
            gate,
            categorizer: options.categorizer,
            collector: ScanResultCollector::new(),
            failures: Mutex::new(Vec::new()),
            stats: Mutex::new(BatchStats::default()),
            pool,
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn gate(&self) -> &DecryptionGate {
        &self.gate
    }

    /// Stops picking up new entries; entries already being handled finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Runs one class through the pipeline without recording it.
    pub fn inspect(&self, path: &str, raw: Vec<u8>) -> Result<Inspection, EntryError> {
        let gated = self
            .gate
            .apply(path, raw)
            .map_err(|source| EntryError::Decryption {
                path: path.to_string(),
                source,
            })?;

        let class = match classfile::parse(&gated.bytes) {
            Ok(class) => class,
            Err(source) if gated.decrypted => {
                return Err(EntryError::Decryption {
                    path: path.to_string(),
                    source: DecryptionError::Rejected(source),
                });
            }
            Err(source) => {
                return Err(EntryError::Malformed {
                    path: path.to_string(),
                    source,
                });
            }
        };

        let categorization = self.categorizer.categorize(&class.annotations);
        Ok(Inspection {
            class,
            categorization,
            decrypted: gated.decrypted,
        })
    }

    pub fn handle_entry(&self, entry: &ArchiveEntry) -> Result<EntryOutcome, EntryError> {
        let raw = read_entry(entry)?;
        let inspection = self.inspect(entry.name(), raw)?;

        if inspection.categorization == Categorization::Other {
            return Ok(EntryOutcome::Discarded);
        }

        let descriptor = ClassDescriptor::new(
            inspection.class.name,
            inspection.categorization,
            Arc::clone(entry.stream()),
            inspection.decrypted,
        );
        self.collector.record(descriptor, entry.is_root());
        Ok(EntryOutcome::Recorded(inspection.categorization))
    }

    /// Handles `entries` in parallel. Failures are kept for [`ScanSession::finish`].
    pub fn scan(&self, entries: &[ArchiveEntry]) -> BatchStats {
        let span = info_span!("scan", entries = entries.len());
        let _guard = span.enter();

        let run = || {
            entries
                .par_iter()
                .map(|entry| self.process(entry))
                .reduce(BatchStats::default, BatchStats::merge)
        };
        let stats = match self.pool.as_ref() {
            Some(pool) => pool.install(run),
            None => run(),
        };
        self.add_stats(stats);
        stats
    }

    /// Same as [`ScanSession::scan`] on the calling thread, in order.
    pub fn scan_sequential(&self, entries: &[ArchiveEntry]) -> BatchStats {
        let stats = entries
            .iter()
            .map(|entry| self.process(entry))
            .fold(BatchStats::default(), BatchStats::merge);
        self.add_stats(stats);
        stats
    }

    fn process(&self, entry: &ArchiveEntry) -> BatchStats {
        if self.is_cancelled() {
            return BatchStats {
                skipped: 1,
                ..BatchStats::default()
            };
        }

        let mut stats = BatchStats {
            handled: 1,
            ..BatchStats::default()
        };
        match self.handle_entry(entry) {
            Ok(EntryOutcome::Recorded(category)) => {
                debug!(
                    entry = entry.name(),
                    root = entry.is_root(),
                    category = category.as_str(),
                    "recorded"
                );
                stats.recorded = 1;
            }
            Ok(EntryOutcome::Discarded) => {
                trace!(entry = entry.name(), "discarded");
                stats.discarded = 1;
            }
            Err(error) => {
                warn!(entry = entry.name(), kind = error.kind(), error = %error, "entry failed");
                stats.failed = 1;
                self.failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(EntryFailure {
                        path: error.path().to_string(),
                        container: entry.container().map(str::to_string),
                        is_root: entry.is_root(),
                        error,
                    });
            }
        }
        stats
    }

    fn add_stats(&self, batch: BatchStats) {
        let mut total = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        *total = total.merge(batch);
    }

    /// Re-reads a recorded class and returns its plaintext bytes.
    pub fn reopen(&self, descriptor: &ClassDescriptor) -> Result<Vec<u8>, EntryError> {
        let path = descriptor.name();
        let mut raw = Vec::new();
        descriptor
            .stream()
            .open()
            .and_then(|mut stream| stream.read_to_end(&mut raw))
            .map_err(|source| EntryError::Unreadable {
                path: path.to_string(),
                source,
            })?;

        if !descriptor.was_decrypted() {
            return Ok(raw);
        }
        self.gate
            .decrypt(&raw)
            .map_err(|source| EntryError::Decryption {
                path: path.to_string(),
                source,
            })
    }

    pub fn finish(self) -> ScanReport {
        let failures = self
            .failures
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let stats = self.stats.into_inner().unwrap_or_else(PoisonError::into_inner);
        let result = self.collector.finish();
        let summary = result.summary();
        info!(
            handled = stats.handled,
            root_models = summary.root_models,
            non_root_models = summary.non_root_models,
            root_converters = summary.root_converters,
            non_root_converters = summary.non_root_converters,
            failed = failures.len(),
            skipped = stats.skipped,
            "scan finished"
        );
        ScanReport {
            result,
            failures,
            stats,
        }
    }
}

fn read_entry(entry: &ArchiveEntry) -> Result<Vec<u8>, EntryError> {
    let unreadable = |source| EntryError::Unreadable {
        path: entry.name().to_string(),
        source,
    };
    let mut stream = entry.stream().open().map_err(unreadable)?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).map_err(unreadable)?;
    Ok(buf)
}
