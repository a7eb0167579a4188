//! Error taxonomy for the scanning pipeline.
//!
//! Per-entry failures (`EntryError`) are always local to one archive entry and
//! never abort a scan. `ConfigError` is the only fatal kind and is raised before
//! any entry is processed.

use thiserror::Error;

/// Structural failure while reading class-file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedClassError {
    #[error("truncated at offset {offset:#x}, needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unknown constant pool tag {tag} at index {index}")]
    BadConstantTag { index: u16, tag: u8 },

    #[error("constant pool index {index} does not refer to a {expected} entry")]
    BadConstantIndex { index: u16, expected: &'static str },

    #[error("unknown element value tag {0:#04x}")]
    BadElementTag(u8),

    #[error("annotation values nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("annotation table spans {actual} bytes, attribute declares {declared}")]
    AttributeLength { declared: usize, actual: usize },
}

/// Failure of the keyed transform applied to protected entries.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("decryption transform failed: {0}")]
    Transform(String),

    #[error("decrypted bytes are not a valid class file")]
    Rejected(#[source] MalformedClassError),
}

/// Failure to handle a single archive entry.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("entry {path} could not be read")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("entry {path} could not be decrypted")]
    Decryption {
        path: String,
        #[source]
        source: DecryptionError,
    },

    #[error("entry {path} is not a valid class file")]
    Malformed {
        path: String,
        #[source]
        source: MalformedClassError,
    },
}

impl EntryError {
    pub fn path(&self) -> &str {
        match self {
            Self::Unreadable { path, .. }
            | Self::Decryption { path, .. }
            | Self::Malformed { path, .. } => path,
        }
    }

    /// Short machine-readable label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreadable { .. } => "unreadable",
            Self::Decryption { .. } => "decryption",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Fatal misconfiguration detected while starting a scan session.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("decryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key derivation seed must not be empty")]
    EmptySeed,

    #[error("protected path marker must not be empty")]
    EmptyProtectedMarker,

    #[error("failed to build scan worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
