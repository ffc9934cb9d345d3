//! Query Pipeline: intent -> candidate generation -> rank -> depth
//! escalation -> synthesis, with cache coordination.
//!
//! Stage shape is grounded on the teacher's MCP tool handlers (`mcp.rs`'s
//! intent-to-budget-to-stub pipeline) generalized into the seven explicit
//! stages the query pipeline needs; response caching is new, grounded on
//! the teacher's `HttpCache` key/TTL/eviction discipline (`server/src/api.rs`
//! / `crates/http`).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::EmbeddingService;
use crate::error::{EngineError, ErrorContext, Result};
use crate::fingerprint::{canonical_json, content_hash};
use crate::graph::CodeGraph;
use crate::pack;
use crate::storage::Storage;
use crate::types::{
    CacheState, ContextPack, Depth, ProviderRequirement, QueryDiagnostics, QueryRequest, QueryResponse, SymbolFact,
};
use crate::vector_index::VectorIndex;

/// Ranking weights (design note's Open Question 1, resolved as named
/// constants rather than a config surface): lexical matches are the
/// strongest signal since they're exact, vector similarity the weakest
/// since it's approximate.
const WEIGHT_LEXICAL: f64 = 1.0;
const WEIGHT_STRUCTURAL: f64 = 0.6;
const WEIGHT_VECTOR: f64 = 0.4;

/// Classified intent shape (stage 1). The pattern set is intentionally
/// small and literal — no ML classifier, just keyword/shape matching, so
/// the classification is itself deterministic and auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentType {
    Structural,
    Explanatory,
    Navigational,
}

impl IntentType {
    fn label(&self) -> &'static str {
        match self {
            IntentType::Structural => "structural",
            IntentType::Explanatory => "explanatory",
            IntentType::Navigational => "navigational",
        }
    }
}

struct ParsedIntent {
    intent_type: Option<IntentType>,
    symbol_hints: Vec<String>,
    file_hints: Vec<String>,
}

fn parse_intent(raw: &str) -> ParsedIntent {
    let lower = raw.to_lowercase();
    let intent_type = if lower.contains("who calls")
        || lower.contains("callers of")
        || lower.contains("depends on")
        || lower.contains("calls ")
    {
        Some(IntentType::Structural)
    } else if lower.contains("why")
        || lower.contains("explain")
        || lower.contains("how does")
        || lower.contains("what does")
    {
        Some(IntentType::Explanatory)
    } else if lower.contains("where is") || lower.contains("find ") || lower.contains("locate") {
        Some(IntentType::Navigational)
    } else {
        None
    };

    let symbol_hints: Vec<String> = raw
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|tok| !tok.is_empty())
        .filter(|tok| tok.chars().any(|c| c == '_' || c == ':') || tok.chars().next().is_some_and(|c| c.is_alphanumeric()))
        .filter(|tok| tok.len() > 2)
        .map(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != ':').to_string())
        .filter(|tok| !tok.is_empty())
        .collect();

    let file_hints: Vec<String> = raw
        .split_whitespace()
        .filter(|tok| tok.contains('/') || tok.contains('.'))
        .map(|s| s.trim_matches(|c: char| c == '"' || c == '\'' || c == ',').to_string())
        .collect();

    ParsedIntent { intent_type, symbol_hints, file_hints }
}

/// A scored candidate pack, prior to final ranking/tie-breaking.
struct Scored {
    pack: ContextPack,
    score: f64,
}

/// Length of the pack's `qualified_name` key fact, the tie-break spec calls
/// for; falls back to `target_id`'s length for packs (module/topic) that
/// don't carry one.
fn qualified_name_len(pack: &ContextPack) -> usize {
    pack.key_facts
        .iter()
        .find_map(|f| f.strip_prefix("qualified_name: "))
        .map(|s| s.len())
        .unwrap_or(pack.target_id.len())
}

struct CacheEntry {
    response: QueryResponse,
    inserted_at: i64,
}

/// Bounded, TTL-respecting response cache keyed by
/// `(canonical_request, vector_index_generation, pack_snapshot_hash)`
/// (spec §4.7 caching rule). Insertion-ordered eviction once `max_entries`
/// is exceeded, mirroring the teacher's `HttpCache`.
pub(crate) struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    order: Vec<String>,
}

impl QueryCache {
    pub(crate) fn new() -> Self {
        Self { entries: HashMap::new(), order: Vec::new() }
    }

    fn get(&self, key: &str, ttl_ms: u64) -> Option<QueryResponse> {
        let entry = self.entries.get(key)?;
        let age = crate::types::unix_now_ms().saturating_sub(entry.inserted_at);
        if ttl_ms > 0 && age as u64 > ttl_ms {
            return None;
        }
        Some(entry.response.clone())
    }

    fn put(&mut self, key: String, response: QueryResponse, max_entries: usize) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key.clone(), CacheEntry { response, inserted_at: crate::types::unix_now_ms() });
        while self.order.len() > max_entries.max(1) {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }
}

pub struct QueryEngine<'a> {
    storage: &'a Storage,
    vector_index: &'a VectorIndex,
    embedding: &'a EmbeddingService,
    config: &'a Config,
    /// Owned by the caller (the Orchestrator's `Session`) so the cache
    /// survives across the many short-lived `QueryEngine`s built per call.
    cache: &'a Mutex<QueryCache>,
    /// Set by the orchestrator while a bootstrap/incremental pass is
    /// running, consulted by stage 3 (wait-for-index).
    ingestion_in_flight: &'a std::sync::atomic::AtomicBool,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        storage: &'a Storage,
        vector_index: &'a VectorIndex,
        embedding: &'a EmbeddingService,
        config: &'a Config,
        cache: &'a Mutex<QueryCache>,
        ingestion_in_flight: &'a std::sync::atomic::AtomicBool,
    ) -> Self {
        Self { storage, vector_index, embedding, config, cache, ingestion_in_flight }
    }

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let start = Instant::now();
        let deadline = start + std::time::Duration::from_millis(request.timeout_ms.max(1));
        let mut diagnostics = QueryDiagnostics::default();

        // Stage 1: parse intent.
        let parsed = parse_intent(&request.intent);
        diagnostics.intent_type = parsed.intent_type.map(|t| t.label().to_string());
        if parsed.intent_type.is_none() {
            debug!(intent = %request.intent, "intent_unclassifiable; falling back to lexical+vector");
        }

        // Stage 2: gate providers.
        if request.embedding_requirement == ProviderRequirement::Required && !self.embedding.is_available() {
            return Err(EngineError::ProviderUnavailable {
                reason: "embedding provider required but unavailable".to_string(),
                context: ErrorContext::default(),
                remediation: vec!["enable the semantic feature or relax embedding_requirement".to_string()],
            });
        }
        if request.llm_requirement == ProviderRequirement::Required && self.config.synthesis_disabled {
            return Err(EngineError::ProviderUnavailable {
                reason: "llm synthesis required but disabled by configuration".to_string(),
                context: ErrorContext::default(),
                remediation: vec!["set synthesis_disabled=false".to_string()],
            });
        }
        let use_embedding = request.embedding_requirement != ProviderRequirement::Disabled && self.embedding.is_available();

        // Stage 3: wait for index (bounded).
        if request.wait_for_index_ms > 0 {
            let wait_deadline = start + std::time::Duration::from_millis(request.wait_for_index_ms);
            while self.ingestion_in_flight.load(std::sync::atomic::Ordering::Relaxed) && Instant::now() < wait_deadline {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
        }

        // Cache lookup (skipped entirely for cache_policy=disabled).
        let packs = self.storage.all_packs()?;
        let snapshot_hash = pack::pack_snapshot_hash(&packs);
        let generation = self.vector_index.generation();
        let cache_enabled = request.cache_policy == crate::types::CachePolicy::Enabled && self.config.cache_policy.read;
        let cache_key = self.cache_key(request, generation, &snapshot_hash)?;

        if cache_enabled {
            if let Some(mut cached) = self.cache.lock().unwrap().get(&cache_key, self.config.cache_policy.ttl_ms) {
                cached.diagnostics.cache_hit = true;
                cached.cache_state = CacheState::Hit;
                cached.latency_ms = start.elapsed().as_millis() as u64;
                return Ok(cached);
            }
        }

        if packs.is_empty() {
            diagnostics.empty_index = true;
        }

        // Stage 4: candidate generation.
        let all_symbols = self.storage.all_symbols()?;
        let lexical = self.lexical_candidates(&parsed, &all_symbols, &packs);
        diagnostics.engines_used.push("lexical".to_string());

        let structural = if !parsed.symbol_hints.is_empty() {
            diagnostics.engines_used.push("structural".to_string());
            self.structural_candidates(&parsed, &all_symbols, &packs)?
        } else {
            Vec::new()
        };

        let vector = if use_embedding && !self.vector_index.is_empty() && Instant::now() < deadline {
            diagnostics.engines_used.push("vector".to_string());
            self.vector_candidates(&request.intent, &packs)?
        } else {
            if request.embedding_requirement != ProviderRequirement::Disabled && !self.embedding.is_available() {
                diagnostics.degraded_providers.push("embedding".to_string());
            }
            Vec::new()
        };

        // Stage 5: rank.
        let mut scored = self.merge_and_score(lexical, structural, vector);
        if let Some(filter) = &request.filter {
            scored.retain(|s| self.passes_filter(&s.pack, filter));
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.pack.confidence.partial_cmp(&a.pack.confidence).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| qualified_name_len(&a.pack).cmp(&qualified_name_len(&b.pack)))
                .then_with(|| a.pack.pack_id.cmp(&b.pack.pack_id))
        });

        let top_n = 10usize;
        scored.truncate(top_n);

        if Instant::now() >= deadline {
            diagnostics.timed_out = true;
        }

        // Stage 6: depth escalation. Each level is a strict superset of the
        // previous; L0/L1 never re-rank L0's head.
        let mut selected: Vec<ContextPack> = scored.into_iter().map(|s| s.pack).collect();
        if request.depth == Depth::L2 && !diagnostics.timed_out {
            selected = self.expand_one_hop(selected, &packs);
        }

        let pack_ids: Vec<String> = selected.iter().map(|p| p.pack_id.clone()).collect();
        let response_packs = if request.depth == Depth::L0 { Vec::new() } else { selected.clone() };

        // Stage 7: synthesis.
        let summary = self.maybe_synthesize(&selected, request);
        diagnostics.estimated_tokens = crate::tokenizer::create_tokenizer(&self.config.tokenizer).count_tokens(&summary);

        let response = QueryResponse {
            pack_ids,
            packs: response_packs,
            summary,
            diagnostics,
            latency_ms: start.elapsed().as_millis() as u64,
            cache_state: if cache_enabled { CacheState::Miss } else { CacheState::Skipped },
        };

        if cache_enabled && self.config.cache_policy.write {
            self.cache.lock().unwrap().put(cache_key, response.clone(), self.config.cache_policy.max_entries);
        }

        Ok(response)
    }

    fn cache_key(&self, request: &QueryRequest, generation: u64, snapshot_hash: &str) -> Result<String> {
        let mut value = serde_json::to_value(request).map_err(|e| EngineError::ParseError {
            reason: format!("request serialization failed: {e}"),
            context: ErrorContext::default(),
        })?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("__vector_index_generation".to_string(), serde_json::json!(generation));
            obj.insert("__pack_snapshot_hash".to_string(), serde_json::json!(snapshot_hash));
        }
        let bytes = canonical_json(&value).map_err(|e| EngineError::ParseError {
            reason: format!("cache key canonicalization failed: {e}"),
            context: ErrorContext::default(),
        })?;
        Ok(content_hash(&bytes))
    }

    fn lexical_candidates(&self, parsed: &ParsedIntent, symbols: &[SymbolFact], packs: &[ContextPack]) -> Vec<Scored> {
        if parsed.symbol_hints.is_empty() {
            return Vec::new();
        }
        let matched_ids: Vec<&str> = symbols
            .iter()
            .filter(|s| {
                parsed.symbol_hints.iter().any(|hint| {
                    s.name.eq_ignore_ascii_case(hint) || s.qualified_name.to_lowercase().contains(&hint.to_lowercase())
                })
            })
            .map(|s| s.symbol_id.as_str())
            .collect();

        packs
            .iter()
            .filter(|p| matched_ids.contains(&p.target_id.as_str()))
            .map(|p| Scored { pack: p.clone(), score: WEIGHT_LEXICAL })
            .collect()
    }

    fn structural_candidates(&self, parsed: &ParsedIntent, symbols: &[SymbolFact], packs: &[ContextPack]) -> Result<Vec<Scored>> {
        let edges = self.storage.all_references()?;
        let graph = CodeGraph::build(edges);

        let hinted_ids: Vec<String> = symbols
            .iter()
            .filter(|s| parsed.symbol_hints.iter().any(|hint| s.name.eq_ignore_ascii_case(hint)))
            .map(|s| s.symbol_id.clone())
            .collect();

        let mut neighbor_ids: Vec<String> = Vec::new();
        for id in &hinted_ids {
            for neighbor in graph.neighbors(id) {
                if !neighbor_ids.contains(&neighbor) {
                    neighbor_ids.push(neighbor);
                }
            }
        }

        Ok(packs
            .iter()
            .filter(|p| neighbor_ids.contains(&p.target_id))
            .map(|p| Scored { pack: p.clone(), score: WEIGHT_STRUCTURAL })
            .collect())
    }

    fn vector_candidates(&self, intent: &str, packs: &[ContextPack]) -> Result<Vec<Scored>> {
        let result = match self.embedding.embed(&[intent.to_string()]) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "intent embedding failed; continuing without vector candidates");
                return Ok(Vec::new());
            }
        };
        let Some(Some(query_vector)) = result.vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let hits = self.vector_index.search(&query_vector, 20, None);
        let by_id: HashMap<&str, &ContextPack> = packs.iter().map(|p| (p.pack_id.as_str(), p)).collect();

        Ok(hits
            .into_iter()
            .filter_map(|(owner_id, score)| {
                by_id.get(owner_id.as_str()).map(|p| Scored { pack: (*p).clone(), score: WEIGHT_VECTOR * score as f64 })
            })
            .collect())
    }

    /// Merges candidate sets, summing scores for packs that appear in more
    /// than one engine's result (a pack that's both a lexical and a
    /// structural hit ranks above either alone).
    fn merge_and_score(&self, lexical: Vec<Scored>, structural: Vec<Scored>, vector: Vec<Scored>) -> Vec<Scored> {
        let mut by_id: HashMap<String, Scored> = HashMap::new();
        for candidate in lexical.into_iter().chain(structural).chain(vector) {
            by_id
                .entry(candidate.pack.pack_id.clone())
                .and_modify(|existing| existing.score += candidate.score)
                .or_insert(candidate);
        }
        by_id.into_values().collect()
    }

    fn passes_filter(&self, pack: &ContextPack, filter: &crate::types::QueryFilter) -> bool {
        if filter.exclude_tests {
            let looks_like_test = pack
                .code_snippets
                .iter()
                .any(|s| s.file_path.contains("test") || s.file_path.contains("spec"));
            if looks_like_test {
                return false;
            }
        }
        if let Some(affected) = &filter.affected_files {
            let touches = pack.related_files.iter().any(|f| affected.contains(f))
                || pack.code_snippets.iter().any(|s| affected.contains(&s.file_path));
            if !touches {
                return false;
            }
        }
        true
    }

    /// Depth L2: expand the selected set to include the module/topic packs
    /// of every related file one hop out, without re-ranking the head.
    fn expand_one_hop(&self, selected: Vec<ContextPack>, all_packs: &[ContextPack]) -> Vec<ContextPack> {
        let mut result = selected.clone();
        let mut seen: Vec<String> = result.iter().map(|p| p.pack_id.clone()).collect();
        for pack in &selected {
            for file in &pack.related_files {
                for candidate in all_packs {
                    if candidate.target_id == *file && !seen.contains(&candidate.pack_id) {
                        seen.push(candidate.pack_id.clone());
                        result.push(candidate.clone());
                    }
                }
            }
        }
        result
    }

    /// Synthesis stage: when disabled or not requested, the "summary" is a
    /// deterministic concatenation of pack summaries rather than anything
    /// an LLM produced — the pipeline never returns a synthesized claim
    /// that exceeds retrieved evidence.
    fn maybe_synthesize(&self, packs: &[ContextPack], request: &QueryRequest) -> String {
        let summaries = packs.iter().map(|p| p.summary.clone()).collect::<Vec<_>>().join("\n");
        let synthesis_requested = request.force_summary_synthesis && request.llm_requirement != ProviderRequirement::Disabled;
        if self.config.synthesis_disabled || !synthesis_requested {
            return summaries;
        }
        // No LLM provider is wired into this engine; fall back to the same
        // deterministic concatenation, plus merged evidence snippets so
        // overlapping spans from separate packs in the same file aren't
        // quoted twice. The pipeline never fabricates prose beyond what's
        // retrieved.
        let all_snippets: Vec<crate::types::CodeSnippet> = packs.iter().flat_map(|p| p.code_snippets.clone()).collect();
        let merged = pack::merge_overlapping_snippets(all_snippets);
        if merged.is_empty() {
            return summaries;
        }
        let evidence = merged
            .iter()
            .map(|s| format!("{}:{}-{}\n{}", s.file_path, s.start_line, s.end_line, s.content))
            .collect::<Vec<_>>()
            .join("\n---\n");
        format!("{summaries}\n\n{evidence}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::EmbeddingService;
    use crate::types::{CachePolicy, Span, SymbolKind, Visibility};
    use std::sync::atomic::AtomicBool;

    fn sample_symbol(id: &str, name: &str) -> SymbolFact {
        SymbolFact {
            symbol_id: id.to_string(),
            file_path: "a.rs".to_string(),
            kind: SymbolKind::Function,
            name: name.to_string(),
            qualified_name: format!("a.rs::{name}"),
            span: Span { start_line: 1, end_line: 2 },
            signature: None,
            visibility: Visibility::Public,
            docstring: None,
        }
    }

    fn setup() -> (tempfile::TempDir, Storage, Config) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join(".codeintel")).unwrap();
        let config = Config::default();
        (dir, storage, config)
    }

    #[test]
    fn lexical_match_surfaces_exact_symbol_name() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest { intent: "answer".to_string(), ..Default::default() };
        let response = engine.query(&request).unwrap();
        assert!(response.pack_ids.contains(&pack.pack_id));
    }

    #[test]
    fn empty_index_sets_diagnostic_flag() {
        let (_dir, storage, config) = setup();
        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest::default();
        let response = engine.query(&request).unwrap();
        assert!(response.diagnostics.empty_index);
    }

    #[test]
    fn required_embedding_without_provider_fails_gated() {
        let (_dir, storage, config) = setup();
        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request =
            QueryRequest { embedding_requirement: ProviderRequirement::Required, ..Default::default() };
        let err = engine.query(&request).unwrap_err();
        assert_eq!(err.code(), "provider_unavailable");
    }

    #[test]
    fn disabled_cache_policy_never_hits() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest { intent: "answer".to_string(), cache_policy: CachePolicy::Disabled, ..Default::default() };
        let r1 = engine.query(&request).unwrap();
        let r2 = engine.query(&request).unwrap();
        assert_eq!(r1.cache_state, CacheState::Skipped);
        assert_eq!(r2.cache_state, CacheState::Skipped);
    }

    #[test]
    fn repeated_query_is_a_cache_hit() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest { intent: "answer".to_string(), ..Default::default() };
        let r1 = engine.query(&request).unwrap();
        let r2 = engine.query(&request).unwrap();
        assert_eq!(r1.cache_state, CacheState::Miss);
        assert_eq!(r2.cache_state, CacheState::Hit);
    }

    #[test]
    fn l0_depth_returns_ids_only() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest { intent: "answer".to_string(), depth: Depth::L0, ..Default::default() };
        let response = engine.query(&request).unwrap();
        assert!(!response.pack_ids.is_empty());
        assert!(response.packs.is_empty());
    }

    #[test]
    fn default_synthesis_is_deterministic_summary_concatenation() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest { intent: "answer".to_string(), ..Default::default() };
        let response = engine.query(&request).unwrap();
        assert_eq!(response.summary, pack.summary);
    }

    #[test]
    fn l2_depth_is_a_superset_of_l1_selection() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        // A module pack for a related file, reachable one hop out from
        // `pack`'s `related_files`, so L2 should pull it in where L1 doesn't.
        let related = crate::types::ContextPack {
            pack_id: "related-pack".to_string(),
            pack_type: crate::types::PackType::Module,
            target_id: "b.rs".to_string(),
            schema_version: crate::types::PACK_SCHEMA_VERSION,
            content_hash: "h".to_string(),
            summary: "module b".to_string(),
            key_facts: vec![],
            code_snippets: vec![],
            related_files: vec![],
            invalidation_triggers: vec![],
            confidence: 1.0,
            version_string: "v1".to_string(),
            created_at: 0,
        };
        storage.upsert_pack(&related).unwrap();

        let mut with_related = pack.clone();
        with_related.related_files = vec!["b.rs".to_string()];
        storage.upsert_pack(&with_related).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let l1_request = QueryRequest { intent: "answer".to_string(), depth: Depth::L1, ..Default::default() };
        let l1 = engine.query(&l1_request).unwrap();

        let l2_request = QueryRequest { intent: "answer".to_string(), depth: Depth::L2, ..Default::default() };
        let l2 = engine.query(&l2_request).unwrap();

        let l1_ids: std::collections::HashSet<_> = l1.pack_ids.iter().collect();
        let l2_ids: std::collections::HashSet<_> = l2.pack_ids.iter().collect();
        assert!(l1_ids.is_subset(&l2_ids));
        assert!(l2_ids.contains(&"related-pack".to_string()));
    }

    #[test]
    fn forced_synthesis_includes_merged_evidence_snippets() {
        let (_dir, storage, config) = setup();
        let symbol = sample_symbol("sym1", "answer");
        storage.upsert_symbols("a.rs", &[symbol.clone()]).unwrap();
        let pack = pack::assemble_symbol_pack(&symbol, &["fn answer() {}"], &[], &|_| None, 0).unwrap();
        storage.upsert_pack(&pack).unwrap();

        let embedding = EmbeddingService::new(None, &config);
        let vector_index = VectorIndex::new();
        let in_flight = AtomicBool::new(false);
        let cache = Mutex::new(QueryCache::new());
        let engine = QueryEngine::new(&storage, &vector_index, &embedding, &config, &cache, &in_flight);

        let request = QueryRequest {
            intent: "answer".to_string(),
            llm_requirement: ProviderRequirement::Optional,
            force_summary_synthesis: true,
            ..Default::default()
        };
        let response = engine.query(&request).unwrap();
        assert!(response.summary.contains("fn answer"));
    }
}
