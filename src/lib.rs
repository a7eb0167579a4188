//! # entity-scan
//!
//! Finds JPA entities and attribute converters in compiled Java archives
//! without loading any classes.
//!
//! ## Architecture
//!
//! - **archive**: Jar, nested-jar and class-directory entry enumeration
//! - **decrypt**: Path-gated decryption of protected class entries
//! - **classfile**: Minimal class-file reader (name + visible class annotations)
//! - **categorize**: Annotation-based MODEL / CONVERTER / OTHER classification
//! - **collector**: Thread-safe result partitions keyed by category and root flag
//! - **handler**: Per-entry pipeline and the parallel scan session
//! - **scan**: Dependency jar discovery
//! - **config**: Config file, environment and CLI resolution
//! - **logging**: tracing subscriber setup
//! - **error**: Error taxonomy for class parsing, decryption and entries

pub mod archive;
pub mod categorize;
pub mod classfile;
pub mod cli;
pub mod collector;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod handler;
pub mod logging;
pub mod scan;
