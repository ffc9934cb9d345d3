//! Vector Index: an in-memory `owner_id -> unit vector` projection,
//! synchronized with the embeddings table and rebuildable from it without
//! loss.
//!
//! Grounded on the teacher's `semantic_search` (flat packed-`Vec<f32>`,
//! brute-force dot product since vectors are pre-normalized). Generalized
//! with the generation counter and mixed-model-identity guard the spec
//! requires, which the teacher's version has neither of.

use std::sync::RwLock;

use crate::types::{EmbeddingRecord, ModelIdentity};

struct Snapshot {
    owner_ids: Vec<String>,
    vectors: Vec<f32>, // flattened, row-major, each row length = dim
    dim: usize,
    model_identity: Option<ModelIdentity>,
    generation: u64,
}

impl Snapshot {
    fn empty() -> Self {
        Self { owner_ids: Vec::new(), vectors: Vec::new(), dim: 0, model_identity: None, generation: 0 }
    }
}

/// Exact-cosine index for small-to-medium corpora, reader-writer
/// disciplined: readers take a cloned snapshot pointer, writers swap in a
/// fresh one after a storage commit.
pub struct VectorIndex {
    snapshot: RwLock<std::sync::Arc<Snapshot>>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(std::sync::Arc::new(Snapshot::empty())) }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.read().unwrap().generation
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().unwrap().owner_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn model_identity(&self) -> Option<ModelIdentity> {
        self.snapshot.read().unwrap().model_identity.clone()
    }

    /// Rebuilds the index from a full `scan_embeddings(model_identity)`
    /// result with no loss — used at session start and whenever the model
    /// identity changes (spec §4.6: "mixed model identities are never
    /// indexed").
    pub fn rebuild(&self, records: &[EmbeddingRecord], model_identity: ModelIdentity) {
        let dim = model_identity.dim;
        let mut owner_ids = Vec::with_capacity(records.len());
        let mut vectors = Vec::with_capacity(records.len() * dim);
        for record in records {
            if record.model_identity != model_identity || record.vector.len() != dim {
                continue;
            }
            owner_ids.push(record.owner_id.clone());
            vectors.extend_from_slice(&record.vector);
        }

        let mut guard = self.snapshot.write().unwrap();
        let next_generation = guard.generation + 1;
        *guard = std::sync::Arc::new(Snapshot {
            owner_ids,
            vectors,
            dim,
            model_identity: Some(model_identity),
            generation: next_generation,
        });
    }

    /// Adds or replaces one owner's vector, called transactionally after a
    /// storage commit (spec §4.6: "writes go through the Storage Engine").
    pub fn apply_add(&self, owner_id: &str, vector: &[f32], model_identity: &ModelIdentity) {
        let mut guard = self.snapshot.write().unwrap();
        if guard.model_identity.as_ref().is_some_and(|m| m != model_identity) {
            // Identity changed; caller is expected to `rebuild` instead, but
            // guard against silently mixing dimensions if they don't.
            return;
        }
        let next_generation = guard.generation + 1;
        let mut owner_ids = guard.owner_ids.clone();
        let mut vectors = guard.vectors.clone();
        let dim = model_identity.dim;

        if let Some(pos) = owner_ids.iter().position(|o| o == owner_id) {
            vectors[pos * dim..(pos + 1) * dim].copy_from_slice(vector);
        } else {
            owner_ids.push(owner_id.to_string());
            vectors.extend_from_slice(vector);
        }

        *guard = std::sync::Arc::new(Snapshot {
            owner_ids,
            vectors,
            dim,
            model_identity: Some(model_identity.clone()),
            generation: next_generation,
        });
    }

    pub fn apply_remove(&self, owner_id: &str) {
        let mut guard = self.snapshot.write().unwrap();
        let Some(pos) = guard.owner_ids.iter().position(|o| o == owner_id) else { return };
        let next_generation = guard.generation + 1;
        let dim = guard.dim;
        let mut owner_ids = guard.owner_ids.clone();
        let mut vectors = guard.vectors.clone();
        owner_ids.remove(pos);
        if dim > 0 {
            vectors.drain(pos * dim..(pos + 1) * dim);
        }
        *guard = std::sync::Arc::new(Snapshot {
            owner_ids,
            vectors,
            dim,
            model_identity: guard.model_identity.clone(),
            generation: next_generation,
        });
    }

    /// Top-k by cosine similarity, descending. Since stored vectors are
    /// L2-normalized, cosine reduces to a dot product.
    pub fn search(&self, query_vector: &[f32], k: usize, filter: Option<&dyn Fn(&str) -> bool>) -> Vec<(String, f32)> {
        let snapshot = self.snapshot.read().unwrap().clone();
        if snapshot.dim == 0 || query_vector.len() != snapshot.dim {
            return Vec::new();
        }
        let mut scored: Vec<(String, f32)> = snapshot
            .owner_ids
            .iter()
            .enumerate()
            .filter(|(_, owner_id)| filter.map(|f| f(owner_id)).unwrap_or(true))
            .map(|(i, owner_id)| {
                let row = &snapshot.vectors[i * snapshot.dim..(i + 1) * snapshot.dim];
                let score = dot(row, query_vector);
                (owner_id.clone(), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ModelIdentity {
        ModelIdentity { name: "test-model".to_string(), dim: 3, revision: None }
    }

    fn record(owner: &str, vec: [f32; 3]) -> EmbeddingRecord {
        EmbeddingRecord {
            owner_kind: crate::types::OwnerKind::Pack,
            owner_id: owner.to_string(),
            model_identity: identity(),
            vector: vec.to_vec(),
            created_at: 0,
        }
    }

    #[test]
    fn empty_index_search_returns_nothing() {
        let idx = VectorIndex::new();
        assert!(idx.search(&[1.0, 0.0, 0.0], 5, None).is_empty());
    }

    #[test]
    fn rebuild_ranks_by_cosine_similarity() {
        let idx = VectorIndex::new();
        let records = vec![record("a", [1.0, 0.0, 0.0]), record("b", [0.0, 1.0, 0.0]), record("c", [0.9, 0.1, 0.0])];
        idx.rebuild(&records, identity());
        let results = idx.search(&[1.0, 0.0, 0.0], 2, None);
        assert_eq!(results[0].0, "a");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn generation_increments_on_mutation() {
        let idx = VectorIndex::new();
        let gen0 = idx.generation();
        idx.rebuild(&[record("a", [1.0, 0.0, 0.0])], identity());
        assert!(idx.generation() > gen0);
        let gen1 = idx.generation();
        idx.apply_add("b", &[0.0, 1.0, 0.0], &identity());
        assert!(idx.generation() > gen1);
    }

    #[test]
    fn apply_remove_drops_owner() {
        let idx = VectorIndex::new();
        idx.rebuild(&[record("a", [1.0, 0.0, 0.0]), record("b", [0.0, 1.0, 0.0])], identity());
        idx.apply_remove("a");
        assert_eq!(idx.len(), 1);
        let results = idx.search(&[1.0, 0.0, 0.0], 5, None);
        assert!(results.iter().all(|(id, _)| id != "a"));
    }

    #[test]
    fn mixed_model_identities_are_never_indexed() {
        let idx = VectorIndex::new();
        idx.rebuild(&[record("a", [1.0, 0.0, 0.0])], identity());
        let other = ModelIdentity { name: "other-model".to_string(), dim: 3, revision: None };
        idx.apply_add("b", &[0.0, 1.0, 0.0], &other);
        // apply_add refused the mismatched identity; index unchanged.
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn rebuild_from_scan_matches_prior_top_k() {
        let idx = VectorIndex::new();
        let records = vec![record("a", [1.0, 0.0, 0.0]), record("b", [0.0, 1.0, 0.0])];
        idx.rebuild(&records, identity());
        let before = idx.search(&[1.0, 0.0, 0.0], 2, None);
        idx.rebuild(&records, identity());
        let after = idx.search(&[1.0, 0.0, 0.0], 2, None);
        assert_eq!(before, after);
    }
}
