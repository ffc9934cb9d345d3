//! Storage Engine: a single-file durable store for files, symbols, packs,
//! and embeddings, process-locked for exclusive access and self-healing on
//! unclean shutdown.
//!
//! Grounded on the pack's `sled`-backed multi-tree store (one tree per data
//! kind, JSON-encoded records, structured tracing on writes) generalized
//! from a fixed set of named trees to the code-intelligence data model, and
//! on the daemon PID-lock pattern for the exclusive process lock (see
//! `storage::lock`).

pub mod lock;
pub mod migrations;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use sled::Db;
use tracing::{info, warn};

use crate::error::{EngineError, ErrorContext, Result};
use crate::types::{
    ContextPack, EmbeddingRecord, FileRecord, HealingEvent, InvalidationTrigger, ModelIdentity,
    ReferenceEdge, SymbolFact, TriggerKind,
};

const TREE_FILES: &str = "files";
const TREE_SYMBOLS: &str = "symbols";
const TREE_REFERENCES: &str = "references";
const TREE_PACKS: &str = "packs";
const TREE_EMBEDDINGS: &str = "embeddings";
const TREE_CALLERS: &str = "callers_index";
const CLEAN_CLOSE_KEY: &[u8] = b"clean_close";

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_files: usize,
    pub total_symbols: usize,
    pub total_packs: usize,
    pub total_embeddings: usize,
}

/// The Storage Engine. Owns the sled `Db` and the process lock exclusively;
/// both are released together on `close`/`Drop`.
pub struct Storage {
    db: Db,
    lock: std::sync::Mutex<lock::ProcessLock>,
    healing_events: RwLock<Vec<HealingEvent>>,
}

impl Storage {
    /// Opens (creating if absent) the store at `<state_dir>/store.db`,
    /// acquiring the exclusive process lock first. Runs migrations, then
    /// recovery if the previous session didn't close cleanly.
    pub fn open(state_dir: &Path) -> Result<Self> {
        Self::open_with_options(state_dir, false)
    }

    /// As [`Storage::open`], but with `skip_healing` controlling what
    /// happens when the previous session didn't close cleanly: `false`
    /// (default) auto-rebuilds derived tables per spec §4.4; `true` treats
    /// an unclean close as fatal (`corrupted_index`) instead of healing it
    /// implicitly, per design note §9's "healing should be explicit config,
    /// not an implicit side effect" (realized here at the session boundary
    /// rather than by skipping recovery of primary-table corruption).
    pub fn open_with_options(state_dir: &Path, skip_healing: bool) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(|e| EngineError::io(e, ErrorContext::default()))?;

        let mut proc_lock = lock::ProcessLock::new(state_dir.join("lock"));
        proc_lock.acquire()?;

        let db_path = state_dir.join("store.db");
        let db = sled::open(&db_path)
            .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })?;

        let was_clean = db
            .get(CLEAN_CLOSE_KEY)
            .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })?
            .is_some();
        db.remove(CLEAN_CLOSE_KEY)
            .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })?;

        migrations::run_migrations(&db)?;

        let mut storage =
            Self { db, lock: std::sync::Mutex::new(proc_lock), healing_events: RwLock::new(Vec::new()) };

        if !was_clean {
            if skip_healing {
                return Err(EngineError::CorruptedIndex {
                    table: "callers_index".to_string(),
                    context: ErrorContext::default(),
                });
            }
            storage.recover()?;
        }

        Ok(storage)
    }

    /// Integrity check + rebuild of derived tables (the callers index today;
    /// the vector index projection is rebuilt separately by the Orchestrator
    /// via `scan_embeddings`). Corruption in derived tables is recoverable;
    /// corruption in primary tables is not attempted here and surfaces as
    /// `corrupted_index` for the caller to rebuild from a backup.
    fn recover(&mut self) -> Result<()> {
        warn!("store was not cleanly closed; running recovery");
        self.rebuild_callers_index()?;
        self.record_healing("callers_index", "unclean shutdown: rebuilt from references");
        Ok(())
    }

    fn record_healing(&self, table: &str, reason: &str) {
        self.healing_events.write().unwrap().push(HealingEvent {
            table: table.to_string(),
            reason: reason.to_string(),
            at: crate::types::unix_now_ms(),
        });
        info!(table, reason, "healing event recorded");
    }

    pub fn healing_events(&self) -> Vec<HealingEvent> {
        self.healing_events.read().unwrap().clone()
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })
    }

    // ---- files -------------------------------------------------------

    pub fn put_file(&self, record: &FileRecord) -> Result<()> {
        let tree = self.tree(TREE_FILES)?;
        let bytes = serde_json::to_vec(record).map_err(json_err)?;
        tree.insert(record.path.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let tree = self.tree(TREE_FILES)?;
        match tree.get(path.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(json_err)?)),
            None => Ok(None),
        }
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let tree = self.tree(TREE_FILES)?;
        tree.iter()
            .values()
            .map(|v| v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)))
            .collect()
    }

    /// Removes a file and every symbol, pack, and embedding it owns
    /// (invariant: orphan cleanup — spec §4.4a, §8 property 4).
    pub fn delete_file(&self, path: &str) -> Result<()> {
        let files = self.tree(TREE_FILES)?;
        let symbols = self.tree(TREE_SYMBOLS)?;
        let references = self.tree(TREE_REFERENCES)?;
        let packs = self.tree(TREE_PACKS)?;
        let embeddings = self.tree(TREE_EMBEDDINGS)?;
        let callers = self.tree(TREE_CALLERS)?;

        files.remove(path.as_bytes()).map_err(storage_err)?;

        let symbol_ids: Vec<String> = self
            .symbols_for_file(path)?
            .into_iter()
            .map(|s| s.symbol_id)
            .collect();
        for key in symbols_keys_for_file(&symbols, path)? {
            symbols.remove(key).map_err(storage_err)?;
        }
        for key in reference_keys_for_file(&references, path)? {
            references.remove(key).map_err(storage_err)?;
        }
        for sid in &symbol_ids {
            callers.remove(sid.as_bytes()).map_err(storage_err)?;
        }

        // Evict packs whose invalidation_triggers include this file.
        let affected_packs = self.packs_triggered_by_file(&packs, path)?;
        for pack in affected_packs {
            packs.remove(pack.pack_id.as_bytes()).map_err(storage_err)?;
            self.delete_embeddings_for_owner(&embeddings, &pack.pack_id)?;
        }
        for sid in &symbol_ids {
            self.delete_embeddings_for_owner(&embeddings, sid)?;
        }

        Ok(())
    }

    pub fn symbols_for_file(&self, path: &str) -> Result<Vec<SymbolFact>> {
        let tree = self.tree(TREE_SYMBOLS)?;
        let prefix = format!("{path}\0");
        tree.scan_prefix(prefix.as_bytes())
            .values()
            .map(|v| v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)))
            .collect()
    }

    /// Every symbol fact in the store, for the query pipeline's lexical
    /// candidate stage.
    pub fn all_symbols(&self) -> Result<Vec<SymbolFact>> {
        let tree = self.tree(TREE_SYMBOLS)?;
        tree.iter()
            .values()
            .map(|v| v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)))
            .collect()
    }

    /// Every reference edge in the store, for rebuilding the in-memory
    /// structural graph the query pipeline traverses.
    pub fn all_references(&self) -> Result<Vec<ReferenceEdge>> {
        let tree = self.tree(TREE_REFERENCES)?;
        tree.iter()
            .values()
            .map(|v| v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)))
            .collect()
    }

    /// Replaces all symbol facts for a file in one write (transactional
    /// commit unit per spec §4.4's batched-ingestion requirement).
    pub fn upsert_symbols(&self, file_path: &str, facts: &[SymbolFact]) -> Result<()> {
        let tree = self.tree(TREE_SYMBOLS)?;
        let prefix = format!("{file_path}\0");
        let stale: Vec<_> = tree.scan_prefix(prefix.as_bytes()).keys().filter_map(|k| k.ok()).collect();
        for key in &stale {
            tree.remove(key).map_err(storage_err)?;
        }
        for fact in facts {
            let key = format!("{}\0{}", file_path, fact.symbol_id);
            let bytes = serde_json::to_vec(fact).map_err(json_err)?;
            tree.insert(key.as_bytes(), bytes).map_err(storage_err)?;
        }
        info!(file_path, symbol_count = facts.len(), "upserted symbols");
        Ok(())
    }

    pub fn upsert_references(&self, file_path: &str, edges: &[ReferenceEdge]) -> Result<()> {
        let tree = self.tree(TREE_REFERENCES)?;
        let prefix = format!("{file_path}\0");
        let stale: Vec<_> = tree.scan_prefix(prefix.as_bytes()).keys().filter_map(|k| k.ok()).collect();
        for key in &stale {
            tree.remove(key).map_err(storage_err)?;
        }
        let callers = self.tree(TREE_CALLERS)?;
        for (i, edge) in edges.iter().enumerate() {
            let key = format!("{file_path}\0{i:06}");
            let bytes = serde_json::to_vec(edge).map_err(json_err)?;
            tree.insert(key.as_bytes(), bytes).map_err(storage_err)?;

            if let crate::types::ReferenceTarget::Symbol(to_id) = &edge.to {
                self.append_caller(&callers, to_id, edge)?;
            }
        }
        Ok(())
    }

    fn append_caller(&self, callers: &sled::Tree, to_symbol_id: &str, edge: &ReferenceEdge) -> Result<()> {
        let mut existing: Vec<ReferenceEdge> = match callers.get(to_symbol_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(json_err)?,
            None => Vec::new(),
        };
        existing.push(edge.clone());
        let bytes = serde_json::to_vec(&existing).map_err(json_err)?;
        callers.insert(to_symbol_id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    /// Inverse index: `callers(symbol_id) -> [edge]`.
    pub fn callers(&self, symbol_id: &str) -> Result<Vec<ReferenceEdge>> {
        let tree = self.tree(TREE_CALLERS)?;
        match tree.get(symbol_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(json_err),
            None => Ok(Vec::new()),
        }
    }

    fn rebuild_callers_index(&self) -> Result<()> {
        let callers = self.tree(TREE_CALLERS)?;
        callers.clear().map_err(storage_err)?;
        let references = self.tree(TREE_REFERENCES)?;
        for value in references.iter().values() {
            let edge: ReferenceEdge = serde_json::from_slice(&value.map_err(storage_err)?).map_err(json_err)?;
            if let crate::types::ReferenceTarget::Symbol(to_id) = &edge.to {
                self.append_caller(&callers, to_id, &edge)?;
            }
        }
        Ok(())
    }

    // ---- packs ---------------------------------------------------------

    /// Idempotent by `content_hash`: re-upserting identical content is a
    /// no-op except for `created_at` (spec §4.4b).
    pub fn upsert_pack(&self, pack: &ContextPack) -> Result<()> {
        let tree = self.tree(TREE_PACKS)?;
        if let Some(existing_bytes) = tree.get(pack.pack_id.as_bytes()).map_err(storage_err)? {
            let existing: ContextPack = serde_json::from_slice(&existing_bytes).map_err(json_err)?;
            if existing.content_hash == pack.content_hash {
                debug_unchanged(&pack.pack_id);
                return Ok(());
            }
        }
        let bytes = serde_json::to_vec(pack).map_err(json_err)?;
        tree.insert(pack.pack_id.as_bytes(), bytes).map_err(storage_err)?;
        info!(pack_id = %pack.pack_id, content_hash = %pack.content_hash, "upserted pack");
        Ok(())
    }

    pub fn get_pack_by_id(&self, pack_id: &str) -> Result<Option<ContextPack>> {
        let tree = self.tree(TREE_PACKS)?;
        match tree.get(pack_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(json_err)?)),
            None => Ok(None),
        }
    }

    pub fn find_packs_by_target(&self, pack_type: &str, target_id: &str) -> Result<Vec<ContextPack>> {
        let tree = self.tree(TREE_PACKS)?;
        tree.iter()
            .values()
            .filter_map(|v| {
                let pack: ContextPack = match v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)) {
                    Ok(p) => p,
                    Err(e) => return Some(Err(e)),
                };
                if pack.pack_type.label() == pack_type && pack.target_id == target_id {
                    Some(Ok(pack))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn all_packs(&self) -> Result<Vec<ContextPack>> {
        let tree = self.tree(TREE_PACKS)?;
        tree.iter()
            .values()
            .map(|v| v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)))
            .collect()
    }

    fn packs_triggered_by_file(&self, packs: &sled::Tree, file_path: &str) -> Result<Vec<ContextPack>> {
        let mut matched = Vec::new();
        for v in packs.iter().values() {
            let pack: ContextPack = serde_json::from_slice(&v.map_err(storage_err)?).map_err(json_err)?;
            let hit = pack
                .invalidation_triggers
                .iter()
                .any(|t| t.kind == TriggerKind::File && t.key == file_path);
            if hit {
                matched.push(pack);
            }
        }
        Ok(matched)
    }

    /// Evicts every pack whose triggers match any of `triggers` (by kind and
    /// key), cascading to their embeddings.
    pub fn evict_by_triggers(&self, triggers: &[InvalidationTrigger]) -> Result<usize> {
        let packs = self.tree(TREE_PACKS)?;
        let embeddings = self.tree(TREE_EMBEDDINGS)?;
        let mut evicted = 0;
        let mut to_remove = Vec::new();
        for v in packs.iter().values() {
            let pack: ContextPack = serde_json::from_slice(&v.map_err(storage_err)?).map_err(json_err)?;
            let hit = pack
                .invalidation_triggers
                .iter()
                .any(|t| triggers.iter().any(|trig| trig.kind == t.kind && trig.key == t.key));
            if hit {
                to_remove.push(pack.pack_id.clone());
            }
        }
        for pack_id in to_remove {
            packs.remove(pack_id.as_bytes()).map_err(storage_err)?;
            self.delete_embeddings_for_owner(&embeddings, &pack_id)?;
            evicted += 1;
        }
        Ok(evicted)
    }

    // ---- embeddings ------------------------------------------------------

    pub fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        let tree = self.tree(TREE_EMBEDDINGS)?;
        let key = embedding_key(record.owner_kind as u8, &record.owner_id);
        let bytes = serde_json::to_vec(record).map_err(json_err)?;
        tree.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    fn delete_embeddings_for_owner(&self, tree: &sled::Tree, owner_id: &str) -> Result<()> {
        let suffix = format!("\0{owner_id}");
        let keys: Vec<_> = tree
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .filter(|k| String::from_utf8_lossy(k).ends_with(&suffix))
            .collect();
        for key in keys {
            tree.remove(key).map_err(storage_err)?;
        }
        Ok(())
    }

    pub fn delete_embeddings_for_owner_id(&self, owner_id: &str) -> Result<()> {
        let tree = self.tree(TREE_EMBEDDINGS)?;
        self.delete_embeddings_for_owner(&tree, owner_id)
    }

    /// All embeddings for a given model identity, used to rebuild the
    /// vector index without loss (spec §4.6).
    pub fn scan_embeddings(&self, model_identity: &ModelIdentity) -> Result<Vec<EmbeddingRecord>> {
        let tree = self.tree(TREE_EMBEDDINGS)?;
        tree.iter()
            .values()
            .filter_map(|v| {
                let record: EmbeddingRecord = match v.map_err(storage_err).and_then(|b| serde_json::from_slice(&b).map_err(json_err)) {
                    Ok(r) => r,
                    Err(e) => return Some(Err(e)),
                };
                if &record.model_identity == model_identity {
                    Some(Ok(record))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn get_stats(&self) -> Result<Stats> {
        Ok(Stats {
            total_files: self.tree(TREE_FILES)?.len(),
            total_symbols: self.tree(TREE_SYMBOLS)?.len(),
            total_packs: self.tree(TREE_PACKS)?.len(),
            total_embeddings: self.tree(TREE_EMBEDDINGS)?.len(),
        })
    }

    /// Flushes all trees, marks the store cleanly closed, and releases the
    /// process lock so another process can open this workspace. Idempotent
    /// and safe to call from a signal handler via `Session::shutdown`, and
    /// safe to call more than once — releasing an already-released lock is
    /// a no-op.
    pub fn close(&self) -> Result<()> {
        self.db.insert(CLEAN_CLOSE_KEY, b"1".as_ref()).map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        self.lock.lock().unwrap().release()?;
        Ok(())
    }
}

fn symbols_keys_for_file(tree: &sled::Tree, file_path: &str) -> Result<Vec<sled::IVec>> {
    let prefix = format!("{file_path}\0");
    Ok(tree.scan_prefix(prefix.as_bytes()).keys().filter_map(|k| k.ok()).collect())
}

fn reference_keys_for_file(tree: &sled::Tree, file_path: &str) -> Result<Vec<sled::IVec>> {
    let prefix = format!("{file_path}\0");
    Ok(tree.scan_prefix(prefix.as_bytes()).keys().filter_map(|k| k.ok()).collect())
}

fn embedding_key(owner_kind: u8, owner_id: &str) -> Vec<u8> {
    let mut key = vec![owner_kind];
    key.push(0);
    key.extend_from_slice(owner_id.as_bytes());
    key
}

fn storage_err(e: sled::Error) -> EngineError {
    EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() }
}

fn json_err(e: serde_json::Error) -> EngineError {
    EngineError::StorageUnavailable { reason: format!("serialization error: {e}"), context: ErrorContext::default() }
}

fn debug_unchanged(pack_id: &str) {
    tracing::debug!(pack_id, "pack content unchanged, upsert is a no-op");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParseStatus, PackType};

    fn sample_file(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            language: Some("rust".to_string()),
            content_hash: hash.to_string(),
            size_bytes: 10,
            last_modified: 0,
            parse_status: ParseStatus::Ok,
            parse_error: None,
        }
    }

    fn sample_pack(id: &str, hash: &str, trigger_file: &str) -> ContextPack {
        ContextPack {
            pack_id: id.to_string(),
            pack_type: PackType::Symbol,
            target_id: id.to_string(),
            schema_version: 1,
            content_hash: hash.to_string(),
            summary: "test".to_string(),
            key_facts: vec![],
            code_snippets: vec![],
            related_files: vec![],
            invalidation_triggers: vec![crate::types::InvalidationTrigger {
                kind: TriggerKind::File,
                key: trigger_file.to_string(),
            }],
            confidence: 1.0,
            version_string: "v1".to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn put_and_get_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        storage.put_file(&sample_file("a.rs", "hash1")).unwrap();
        let got = storage.get_file("a.rs").unwrap().unwrap();
        assert_eq!(got.content_hash, "hash1");
    }

    #[test]
    fn delete_file_removes_symbols_packs_and_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        storage.put_file(&sample_file("a.rs", "hash1")).unwrap();

        let sym = SymbolFact {
            symbol_id: "sym1".to_string(),
            file_path: "a.rs".to_string(),
            kind: crate::types::SymbolKind::Function,
            name: "answer".to_string(),
            qualified_name: "a.rs::answer".to_string(),
            span: crate::types::Span { start_line: 1, end_line: 2 },
            signature: None,
            visibility: crate::types::Visibility::Public,
            docstring: None,
        };
        storage.upsert_symbols("a.rs", &[sym.clone()]).unwrap();

        let pack = sample_pack("pack1", "h1", "a.rs");
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingRecord {
            owner_kind: crate::types::OwnerKind::Pack,
            owner_id: "pack1".to_string(),
            model_identity: ModelIdentity { name: "m".to_string(), dim: 2, revision: None },
            vector: vec![1.0, 0.0],
            created_at: 0,
        };
        storage.upsert_embedding(&embedding).unwrap();

        storage.delete_file("a.rs").unwrap();

        assert!(storage.get_file("a.rs").unwrap().is_none());
        assert!(storage.symbols_for_file("a.rs").unwrap().is_empty());
        assert!(storage.get_pack_by_id("pack1").unwrap().is_none());
        let remaining = storage
            .scan_embeddings(&ModelIdentity { name: "m".to_string(), dim: 2, revision: None })
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn pack_upsert_is_idempotent_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let pack = sample_pack("pack1", "samehash", "a.rs");
        storage.upsert_pack(&pack).unwrap();
        storage.upsert_pack(&pack).unwrap();
        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.total_packs, 1);
    }

    #[test]
    fn second_open_fails_with_storage_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _storage = Storage::open(dir.path()).unwrap();
        let second = Storage::open(dir.path());
        assert!(matches!(second, Err(EngineError::StorageLocked { .. })));
    }

    #[test]
    fn close_then_reopen_does_not_trigger_recovery() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.put_file(&sample_file("a.rs", "hash1")).unwrap();
            storage.close().unwrap();
        }
        let storage2 = Storage::open(dir.path()).unwrap();
        assert!(storage2.healing_events().is_empty());
    }

    #[test]
    fn unclean_close_triggers_recovery_and_healing_event() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.put_file(&sample_file("a.rs", "hash1")).unwrap();
            // Drop without calling close() — simulates a crash.
        }
        let storage2 = Storage::open(dir.path()).unwrap();
        assert!(!storage2.healing_events().is_empty());
    }

    #[test]
    fn skip_healing_surfaces_corrupted_index_instead_of_auto_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.put_file(&sample_file("a.rs", "hash1")).unwrap();
            // Drop without calling close() — simulates a crash.
        }
        let result = Storage::open_with_options(dir.path(), true);
        assert!(matches!(result, Err(EngineError::CorruptedIndex { .. })));
    }

    #[test]
    fn get_stats_on_empty_workspace_is_all_zero() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_symbols, 0);
    }
}
