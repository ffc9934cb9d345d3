//! Core data model: file records, symbol facts, reference edges, context
//! packs, embedding records, and the query request/response shapes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Ok,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Option<String>,
    pub content_hash: String,
    pub size_bytes: u64,
    pub last_modified: i64,
    pub parse_status: ParseStatus,
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Module,
    Export,
    Import,
    EntryPoint,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Module => "module",
            SymbolKind::Export => "export",
            SymbolKind::Import => "import",
            SymbolKind::EntryPoint => "entry_point",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFact {
    pub symbol_id: String,
    pub file_path: String,
    pub kind: SymbolKind,
    pub name: String,
    pub qualified_name: String,
    pub span: Span,
    pub signature: Option<String>,
    pub visibility: Visibility,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    References,
    Imports,
    Exports,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReferenceTarget {
    Symbol(String),
    Unresolved(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub from_symbol_id: String,
    pub to: ReferenceTarget,
    pub kind: EdgeKind,
    pub file_path: String,
    pub line: u32,
}

/// Output of the Language Facade for a single file.
#[derive(Debug, Clone, Default)]
pub struct FacadeOutput {
    pub symbols: Vec<SymbolFact>,
    pub references: Vec<ReferenceEdge>,
    pub skipped_reason: Option<&'static str>,
    /// Set when the grammar recognized the language but parsing itself
    /// failed (malformed source, parser panic boundary, etc.), as opposed
    /// to a clean parse that simply found nothing. Distinguishes
    /// `ParseStatus::Error` (a candidate for retry) from `ParseStatus::Ok`
    /// with zero symbols.
    pub parse_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackType {
    Symbol,
    Module,
    Topic,
}

impl PackType {
    pub fn label(&self) -> &'static str {
        match self {
            PackType::Symbol => "symbol",
            PackType::Module => "module",
            PackType::Topic => "topic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    File,
    Symbol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationTrigger {
    pub kind: TriggerKind,
    pub key: String,
}

/// `ContextPack.v1` — the retrieval unit returned by the query pipeline.
///
/// `content_hash` is always the first field serialized in the export format
/// (see `pack::export_pack`), but field order in this struct itself doesn't
/// matter: canonicalization happens through `canonical_json`, not struct
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub pack_id: String,
    pub pack_type: PackType,
    pub target_id: String,
    pub schema_version: u32,
    pub content_hash: String,
    pub summary: String,
    pub key_facts: Vec<String>,
    pub code_snippets: Vec<CodeSnippet>,
    pub related_files: Vec<String>,
    pub invalidation_triggers: Vec<InvalidationTrigger>,
    pub confidence: f64,
    pub version_string: String,
    pub created_at: i64,
}

pub const PACK_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name: String,
    pub dim: usize,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Pack,
    Symbol,
    Chunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub owner_kind: OwnerKind,
    pub owner_id: String,
    pub model_identity: ModelIdentity,
    pub vector: Vec<f32>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    L0,
    L1,
    L2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRequirement {
    Disabled,
    Optional,
    Required,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    pub exclude_tests: bool,
    pub affected_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub intent: String,
    pub depth: Depth,
    pub affected_files: Option<Vec<String>>,
    pub filter: Option<QueryFilter>,
    pub llm_requirement: ProviderRequirement,
    pub embedding_requirement: ProviderRequirement,
    /// Stage 7 gate: when `llm_requirement` allows it, request a
    /// natural-language summary instead of the default deterministic
    /// concatenation of pack summaries.
    pub force_summary_synthesis: bool,
    pub deterministic: bool,
    pub include_engines: Option<Vec<String>>,
    pub cache_policy: CachePolicy,
    pub wait_for_index_ms: u64,
    pub timeout_ms: u64,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            intent: String::new(),
            depth: Depth::L1,
            affected_files: None,
            filter: None,
            llm_requirement: ProviderRequirement::Disabled,
            embedding_requirement: ProviderRequirement::Optional,
            force_summary_synthesis: false,
            deterministic: true,
            include_engines: None,
            cache_policy: CachePolicy::Enabled,
            wait_for_index_ms: 0,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDiagnostics {
    pub cache_hit: bool,
    pub timed_out: bool,
    pub empty_index: bool,
    pub intent_type: Option<String>,
    pub engines_used: Vec<String>,
    pub degraded_providers: Vec<String>,
    /// Estimated token count of `QueryResponse.summary`, per
    /// `config.tokenizer` (spec §6's ambient tokenizer surface).
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Hit,
    Miss,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub pack_ids: Vec<String>,
    pub packs: Vec<ContextPack>,
    /// Stage 7 output: a short natural-language summary when synthesis ran,
    /// otherwise a deterministic concatenation of pack summaries/snippets —
    /// never a claim that exceeds the retrieved evidence.
    pub summary: String,
    pub diagnostics: QueryDiagnostics,
    pub latency_ms: u64,
    pub cache_state: CacheState,
}

/// Per-pass ingestion report (spec §4.5's "run summary").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub files_seen: usize,
    pub files_changed: usize,
    pub files_removed: usize,
    pub files_errored: usize,
    pub embeddings_missing: usize,
    pub duration_ms: u64,
}

/// A single healing event recorded when a derived table was rebuilt during
/// recovery (spec §7's "record a healing event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingEvent {
    pub table: String,
    pub reason: String,
    pub at: i64,
}

/// A single exclusion-policy object consulted by both bootstrap and
/// incremental ingestion (design note §9). `exclusions` (spec §6) is
/// documented as `[glob]`: bare names (`node_modules`) match as a path
/// segment, anything containing `*`/`?`/`/` is compiled to a path glob.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    pub skip_dirs: Vec<String>,
    pub max_file_bytes: u64,
    glob_patterns: Vec<Regex>,
}

impl ExclusionPolicy {
    pub fn from_config(config: &crate::config::Config) -> Self {
        let glob_patterns = config
            .exclusions
            .iter()
            .filter(|pattern| pattern.contains('*') || pattern.contains('?') || pattern.contains('/'))
            .filter_map(|pattern| glob_to_regex(pattern))
            .collect();
        Self { skip_dirs: config.exclusions.clone(), max_file_bytes: config.max_file_bytes, glob_patterns }
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.skip_dirs.iter().any(|d| d == name)
    }

    pub fn path_is_excluded(&self, rel_path: &str) -> bool {
        rel_path.split('/').any(|part| self.is_excluded_dir(part))
            || self.glob_patterns.iter().any(|re| re.is_match(rel_path))
    }
}

/// Translates a shell-style glob (`*`, `**`, `?`, literal path separators)
/// into an anchored regex. `**` matches across path separators, a lone `*`
/// does not.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            c if "\\.+^$()[]{}|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

pub(crate) fn unix_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub type WorkspacePath = PathBuf;

#[cfg(test)]
mod exclusion_tests {
    use super::*;
    use crate::config::Config;

    fn policy_with(exclusions: Vec<&str>) -> ExclusionPolicy {
        let mut config = Config::default();
        config.exclusions = exclusions.into_iter().map(|s| s.to_string()).collect();
        ExclusionPolicy::from_config(&config)
    }

    #[test]
    fn bare_name_excludes_matching_path_segment() {
        let policy = policy_with(vec!["node_modules"]);
        assert!(policy.path_is_excluded("a/node_modules/b.js"));
        assert!(!policy.path_is_excluded("a/src/b.js"));
    }

    #[test]
    fn single_star_glob_does_not_cross_directories() {
        let policy = policy_with(vec!["*.min.js"]);
        // A lone `*` glob is matched against the whole rel_path, so it only
        // excludes a top-level file, not one nested under a directory.
        assert!(!policy.path_is_excluded("dist/app.min.js"));
        assert!(policy.path_is_excluded("app.min.js"));
    }

    #[test]
    fn double_star_glob_crosses_directories() {
        let policy = policy_with(vec!["**/*.min.js"]);
        assert!(policy.path_is_excluded("dist/deep/app.min.js"));
        assert!(!policy.path_is_excluded("dist/deep/app.js"));
    }
}
