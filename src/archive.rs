//! Archive entries and their re-openable byte streams.
//!
//! The scanner itself only needs [`ArchiveEntry`] values; the enumeration helpers
//! here list class entries of jars (including jars nested inside them) and of
//! exploded class directories.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use zip::ZipArchive;

const MAX_NESTED_DEPTH: usize = 2;
/// Upper bound on buffer preallocation from a size the zip header declares.
const MAX_SIZE_HINT: usize = 1 << 20;

/// Yields a fresh reader over an entry's bytes on every call.
pub trait StreamAccess: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

#[derive(Clone)]
pub struct ArchiveEntry {
    name: String,
    is_root: bool,
    container: Option<Arc<str>>,
    stream: Arc<dyn StreamAccess>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, is_root: bool, stream: Arc<dyn StreamAccess>) -> Self {
        Self {
            name: name.into(),
            is_root,
            container: None,
            stream,
        }
    }

    pub fn from_bytes(name: impl Into<String>, is_root: bool, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(name, is_root, Arc::new(BytesStream(bytes.into())))
    }

    pub fn with_container(mut self, container: Arc<str>) -> Self {
        self.container = Some(container);
        self
    }

    /// Path of the entry inside its archive, e.g. `com/app/Foo.class`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// The jar or directory the entry was listed from, if known.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn stream(&self) -> &Arc<dyn StreamAccess> {
        &self.stream
    }
}

impl fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("is_root", &self.is_root)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

/// In-memory entry bytes.
pub struct BytesStream(Arc<[u8]>);

impl StreamAccess for BytesStream {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.0))))
    }
}

/// A class file on disk.
pub struct FileStream(PathBuf);

impl StreamAccess for FileStream {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.0)?))
    }
}

#[derive(Clone)]
enum JarBytes {
    Mapped(Arc<Mmap>),
    Owned(Arc<[u8]>),
}

impl AsRef<[u8]> for JarBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => &m[..],
            Self::Owned(b) => b,
        }
    }
}

/// One entry of a jar. Cloning the archive shares its parsed central directory.
struct JarEntryStream {
    archive: ZipArchive<Cursor<JarBytes>>,
    index: usize,
}

impl StreamAccess for JarEntryStream {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let mut archive = self.archive.clone();
        let mut file = archive
            .by_index(self.index)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut buf = Vec::with_capacity(size_hint(file.size()));
        file.read_to_end(&mut buf)?;
        Ok(Box::new(Cursor::new(buf)))
    }
}

/// Lists class entries of a jar file or an exploded class directory.
pub fn entries_for(path: &Path, is_root: bool) -> Result<Vec<ArchiveEntry>> {
    if path.is_dir() {
        directory_entries(path, is_root)
    } else {
        jar_entries(path, is_root)
    }
}

/// Class entries of a jar; entries of jars nested inside it are never root.
pub fn jar_entries(jar_path: &Path, is_root: bool) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(jar_path)
        .with_context(|| format!("Failed to open jar: {}", jar_path.display()))?;
    // SAFETY: The file is opened read-only and the mapping is kept alive by the Arc
    // for as long as any entry stream refers to it.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap jar: {}", jar_path.display()))?;
    let label: Arc<str> = Arc::from(jar_path.display().to_string());
    archive_entries(JarBytes::Mapped(Arc::new(mmap)), label, is_root, 0)
}

fn archive_entries(
    bytes: JarBytes,
    label: Arc<str>,
    is_root: bool,
    depth: usize,
) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .with_context(|| format!("Failed to read zip structure: {label}"))?;

    let mut classes = Vec::new();
    let mut nested = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if is_class_entry(&name) {
            classes.push((i, name));
        } else if name.ends_with(".jar") {
            nested.push(i);
        }
    }

    let mut entries: Vec<ArchiveEntry> = classes
        .into_iter()
        .map(|(index, name)| {
            let stream = JarEntryStream {
                archive: archive.clone(),
                index,
            };
            ArchiveEntry::new(name, is_root, Arc::new(stream)).with_container(Arc::clone(&label))
        })
        .collect();

    if depth >= MAX_NESTED_DEPTH {
        if !nested.is_empty() {
            debug!(archive = %label, skipped = nested.len(), "nested jars below depth limit");
        }
        return Ok(entries);
    }

    for index in nested {
        let mut entry = archive.by_index(index)?;
        let inner_label: Arc<str> = Arc::from(format!("{label}!/{}", entry.name()));
        let mut buf = Vec::with_capacity(size_hint(entry.size()));
        if let Err(e) = entry.read_to_end(&mut buf) {
            warn!(archive = %inner_label, error = %e, "failed to read nested jar");
            continue;
        }
        drop(entry);

        match archive_entries(
            JarBytes::Owned(Arc::from(buf)),
            Arc::clone(&inner_label),
            false,
            depth + 1,
        ) {
            Ok(inner) => entries.extend(inner),
            Err(e) => warn!(archive = %inner_label, error = %e, "skipping unreadable nested jar"),
        }
    }

    Ok(entries)
}

/// Class files below an exploded directory, named relative to it.
pub fn directory_entries(dir: &Path, is_root: bool) -> Result<Vec<ArchiveEntry>> {
    let label: Arc<str> = Arc::from(dir.display().to_string());
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    let mut entries = Vec::new();
    for item in walker {
        let item = item.with_context(|| format!("Failed to walk directory: {}", dir.display()))?;
        let path = item.path();
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !is_class_entry(&name) {
            continue;
        }
        entries.push(
            ArchiveEntry::new(name, is_root, Arc::new(FileStream(path.to_path_buf())))
                .with_container(Arc::clone(&label)),
        );
    }
    Ok(entries)
}

fn size_hint(declared: u64) -> usize {
    usize::try_from(declared).map_or(MAX_SIZE_HINT, |n| n.min(MAX_SIZE_HINT))
}

fn is_class_entry(name: &str) -> bool {
    if !name.ends_with(".class") {
        return false;
    }
    let file_name = name.rsplit('/').next().unwrap_or(name);
    file_name != "module-info.class" && file_name != "package-info.class"
}
