use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::{Memory, MemoryType};

/// Secondary indexes kept beside the memory table
#[derive(Debug, Default, Clone)]
pub struct MemoryIndex {
    by_type: HashMap<MemoryType, BTreeSet<Uuid>>,
    by_tag: HashMap<String, BTreeSet<Uuid>>,
}

impl MemoryIndex {
    pub fn insert(&mut self, memory: &Memory) {
        self.by_type.entry(memory.memory_type).or_default().insert(memory.id);
        for tag in &memory.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(memory.id);
        }
    }

    pub fn remove(&mut self, memory: &Memory) {
        if let Some(ids) = self.by_type.get_mut(&memory.memory_type) {
            ids.remove(&memory.id);
            if ids.is_empty() {
                self.by_type.remove(&memory.memory_type);
            }
        }
        for tag in &memory.tags {
            if let Some(ids) = self.by_tag.get_mut(tag) {
                ids.remove(&memory.id);
                if ids.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    /// Ids matching any of `types` and any of `tags`
    ///
    /// `None` means the filter is empty and every memory is in scope.
    pub fn candidates(&self, types: &[MemoryType], tags: &[String]) -> Option<BTreeSet<Uuid>> {
        let by_type = (!types.is_empty()).then(|| {
            types
                .iter()
                .filter_map(|t| self.by_type.get(t))
                .flat_map(|ids| ids.iter().copied())
                .collect::<BTreeSet<_>>()
        });
        let by_tag = (!tags.is_empty()).then(|| {
            tags.iter()
                .filter_map(|t| self.by_tag.get(t))
                .flat_map(|ids| ids.iter().copied())
                .collect::<BTreeSet<_>>()
        });

        match (by_type, by_tag) {
            (Some(a), Some(b)) => Some(a.intersection(&b).copied().collect()),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    pub fn count_by_type(&self, memory_type: MemoryType) -> usize {
        self.by_type.get(&memory_type).map_or(0, BTreeSet::len)
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
        self.by_tag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_intersect() {
        let mut index = MemoryIndex::default();
        let a = Memory::new(MemoryType::Error, "a").with_tag("db");
        let b = Memory::new(MemoryType::Error, "b").with_tag("ui");
        let c = Memory::new(MemoryType::Success, "c").with_tag("db");
        for m in [&a, &b, &c] {
            index.insert(m);
        }

        let ids = index.candidates(&[MemoryType::Error], &["db".to_string()]).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![a.id]);

        let ids = index.candidates(&[], &["db".to_string()]).unwrap();
        assert_eq!(ids.len(), 2);

        assert!(index.candidates(&[], &[]).is_none());
        assert!(index.candidates(&[MemoryType::Document], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_remove_drops_empty_buckets() {
        let mut index = MemoryIndex::default();
        let a = Memory::new(MemoryType::Knowledge, "a").with_tag("only");
        index.insert(&a);
        assert_eq!(index.tag_count(), 1);

        index.remove(&a);
        assert_eq!(index.tag_count(), 0);
        assert_eq!(index.count_by_type(MemoryType::Knowledge), 0);
    }
}
