use std::fmt::Display;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::error::{EntityKind, RecError, Result};

/// Dense index assignment for the entities seen in a training corpus.
///
/// Indices follow first-seen order, so the codec built from a rating table is
/// reproducible as long as the table order is. Lookups outside the trained set
/// fail with [`RecError::UnknownEntity`] / [`RecError::UnknownIndex`].
#[derive(Debug, Clone)]
pub struct IdCodec<K> {
    kind: EntityKind,
    forward: FxHashMap<K, usize>,
    reverse: Vec<K>,
}

impl<K> IdCodec<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            forward: FxHashMap::default(),
            reverse: Vec::new(),
        }
    }

    /// Builds a codec from a stream of ids; repeated ids keep their first index.
    pub fn from_ids<I>(kind: EntityKind, ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let mut codec = Self::new(kind);
        for id in ids {
            codec.insert(id);
        }
        codec
    }

    /// Rebuilds a persisted codec. The ids must already be unique and in index order.
    pub fn from_unique(kind: EntityKind, ids: Vec<K>) -> Result<Self> {
        let mut forward = FxHashMap::default();
        forward.reserve(ids.len());
        for (index, id) in ids.iter().enumerate() {
            if forward.insert(id.clone(), index).is_some() {
                return Err(RecError::InvalidArtifact(format!(
                    "{kind} codec lists id {id} more than once"
                )));
            }
        }
        Ok(Self {
            kind,
            forward,
            reverse: ids,
        })
    }

    pub fn insert(&mut self, id: K) -> usize {
        if let Some(&index) = self.forward.get(&id) {
            return index;
        }
        let index = self.reverse.len();
        self.forward.insert(id.clone(), index);
        self.reverse.push(id);
        index
    }

    pub fn encode(&self, id: &K) -> Result<usize> {
        self.forward
            .get(id)
            .copied()
            .ok_or_else(|| RecError::unknown(self.kind, id))
    }

    pub fn decode(&self, index: usize) -> Result<&K> {
        self.reverse.get(index).ok_or(RecError::UnknownIndex {
            kind: self.kind,
            index,
            len: self.reverse.len(),
        })
    }

    pub fn contains(&self, id: &K) -> bool {
        self.forward.contains_key(id)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Ids in index order.
    pub fn ids(&self) -> &[K] {
        &self.reverse
    }
}
