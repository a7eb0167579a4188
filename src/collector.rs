//! Aggregation of categorized classes into a [`ScanResult`].
//!
//! The collector is shared by every worker of a scan. Each `(category, root)`
//! partition is a map keyed by class name, so recording a class twice keeps only
//! the latest descriptor.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::archive::StreamAccess;
use crate::categorize::Categorization;

/// A categorized class together with the handle to re-read its entry.
#[derive(Clone)]
pub struct ClassDescriptor {
    name: String,
    categorization: Categorization,
    stream: Arc<dyn StreamAccess>,
    decrypted: bool,
}

impl ClassDescriptor {
    pub fn new(
        name: impl Into<String>,
        categorization: Categorization,
        stream: Arc<dyn StreamAccess>,
        decrypted: bool,
    ) -> Self {
        Self {
            name: name.into(),
            categorization,
            stream,
            decrypted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn categorization(&self) -> Categorization {
        self.categorization
    }

    /// Stream over the entry's bytes as stored in the archive.
    pub fn stream(&self) -> &Arc<dyn StreamAccess> {
        &self.stream
    }

    /// True when the stored bytes are encrypted and must pass the gate again.
    pub fn was_decrypted(&self) -> bool {
        self.decrypted
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("categorization", &self.categorization)
            .field("decrypted", &self.decrypted)
            .finish_non_exhaustive()
    }
}

type Partition = HashMap<String, ClassDescriptor>;

#[derive(Debug, Default)]
struct Partitions {
    models: [Partition; 2],
    converters: [Partition; 2],
}

impl Partitions {
    fn get(&self, category: Categorization, is_root: bool) -> Option<&Partition> {
        let slot = usize::from(is_root);
        match category {
            Categorization::Model => Some(&self.models[slot]),
            Categorization::Converter => Some(&self.converters[slot]),
            Categorization::Other => None,
        }
    }

    fn get_mut(&mut self, category: Categorization, is_root: bool) -> Option<&mut Partition> {
        let slot = usize::from(is_root);
        match category {
            Categorization::Model => Some(&mut self.models[slot]),
            Categorization::Converter => Some(&mut self.converters[slot]),
            Categorization::Other => None,
        }
    }
}

/// Thread-safe accumulator for one scan session.
#[derive(Debug, Default)]
pub struct ScanResultCollector {
    partitions: Mutex<Partitions>,
}

impl ScanResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a descriptor, replacing any earlier one with the same class name
    /// in the same partition. Callers filter out `Other` beforehand.
    pub fn record(&self, descriptor: ClassDescriptor, is_root: bool) {
        let mut partitions = self
            .partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(partition) = partitions.get_mut(descriptor.categorization, is_root) {
            partition.insert(descriptor.name.clone(), descriptor);
        }
    }

    /// Snapshot of one recorded descriptor.
    pub fn get(
        &self,
        category: Categorization,
        is_root: bool,
        name: &str,
    ) -> Option<ClassDescriptor> {
        let partitions = self
            .partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        partitions.get(category, is_root)?.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        let partitions = self
            .partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        total_len(&partitions)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(self) -> ScanResult {
        ScanResult {
            partitions: self
                .partitions
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

fn total_len(partitions: &Partitions) -> usize {
    partitions
        .models
        .iter()
        .chain(partitions.converters.iter())
        .map(HashMap::len)
        .sum()
}

/// Read-only outcome of a scan. Iteration order within a partition is unspecified.
#[derive(Debug, Default)]
pub struct ScanResult {
    partitions: Partitions,
}

impl ScanResult {
    pub fn descriptors(
        &self,
        category: Categorization,
        is_root: bool,
    ) -> impl Iterator<Item = &ClassDescriptor> + '_ {
        self.partitions
            .get(category, is_root)
            .into_iter()
            .flat_map(|p| p.values())
    }

    pub fn get(
        &self,
        category: Categorization,
        is_root: bool,
        name: &str,
    ) -> Option<&ClassDescriptor> {
        self.partitions.get(category, is_root)?.get(name)
    }

    /// Sorted class names of one partition.
    pub fn class_names(&self, category: Categorization, is_root: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .descriptors(category, is_root)
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        total_len(&self.partitions)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> ScanSummary {
        let count = |category, is_root| self.descriptors(category, is_root).count();
        ScanSummary {
            root_models: count(Categorization::Model, true),
            non_root_models: count(Categorization::Model, false),
            root_converters: count(Categorization::Converter, true),
            non_root_converters: count(Categorization::Converter, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub root_models: usize,
    pub non_root_models: usize,
    pub root_converters: usize,
    pub non_root_converters: usize,
}
