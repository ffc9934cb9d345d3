//! Context pack assembly, content hashing, and export.
//!
//! Pack assembly policy (summaries, snippet clamping, related-file
//! one-hop expansion) is grounded on the teacher's tiered stub-extraction
//! and token-budget machinery (`budget.rs`/`stubs.rs`), repurposed from
//! "fit everything in a token budget" to "assemble one pack's fixed-shape
//! content". Export-file naming and the manifest shape are new (spec §6).

use std::path::Path;

use serde_json::json;

use crate::error::{EngineError, ErrorContext, Result};
use crate::fingerprint::{canonical_json, content_hash, pack_id};
use crate::types::{
    CodeSnippet, ContextPack, InvalidationTrigger, PackType, ReferenceEdge, ReferenceTarget, SymbolFact,
    TriggerKind, PACK_SCHEMA_VERSION,
};

/// Max lines of source included in a single code snippet (design note §9's
/// "clamped to a max line budget").
const MAX_SNIPPET_LINES: u32 = 200;

/// Computes `pack.content_hash = sha256(canonical_json(pack_without_hash))`
/// (spec §3 invariant a / §8 property 2).
pub fn compute_content_hash(pack: &ContextPack) -> Result<String> {
    let mut value = serde_json::to_value(pack).map_err(|e| EngineError::ParseError {
        reason: format!("pack serialization failed: {e}"),
        context: ErrorContext::default(),
    })?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("content_hash");
    }
    let bytes = canonical_json(&value).map_err(|e| EngineError::ParseError {
        reason: format!("canonicalization failed: {e}"),
        context: ErrorContext::default(),
    })?;
    Ok(content_hash(&bytes))
}

/// Builds a `symbol` pack for one symbol fact: its signature/docstring as
/// summary, its span as the sole snippet (clamped), the files reached
/// through its one-hop call/reference edges as `related_files`.
pub fn assemble_symbol_pack(
    symbol: &SymbolFact,
    source_lines: &[&str],
    outgoing: &[ReferenceEdge],
    symbol_files: &dyn Fn(&str) -> Option<String>,
    created_at: i64,
) -> Result<ContextPack> {
    let target_id = symbol.symbol_id.clone();
    let id = pack_id(PackType::Symbol.label(), &target_id);

    let summary = one_line_summary(symbol);

    let clamped_end = symbol.span.end_line.min(symbol.span.start_line + MAX_SNIPPET_LINES - 1);
    let content = extract_lines(source_lines, symbol.span.start_line, clamped_end);
    let snippet = CodeSnippet {
        file_path: symbol.file_path.clone(),
        start_line: symbol.span.start_line,
        end_line: clamped_end,
        content,
    };

    let mut related_files: Vec<String> = Vec::new();
    let mut triggers = vec![InvalidationTrigger { kind: TriggerKind::File, key: symbol.file_path.clone() }];

    for edge in outgoing {
        if edge.from_symbol_id != symbol.symbol_id {
            continue;
        }
        if let ReferenceTarget::Symbol(to_id) = &edge.to {
            if let Some(file) = symbol_files(to_id) {
                if file != symbol.file_path && !related_files.contains(&file) {
                    related_files.push(file.clone());
                    triggers.push(InvalidationTrigger { kind: TriggerKind::File, key: file });
                }
            }
        }
    }
    triggers.push(InvalidationTrigger { kind: TriggerKind::Symbol, key: symbol.symbol_id.clone() });

    let mut pack = ContextPack {
        pack_id: id,
        pack_type: PackType::Symbol,
        target_id,
        schema_version: PACK_SCHEMA_VERSION,
        content_hash: String::new(),
        summary,
        key_facts: key_facts_for_symbol(symbol),
        code_snippets: vec![snippet],
        related_files,
        invalidation_triggers: triggers,
        confidence: 1.0,
        version_string: format!("v{PACK_SCHEMA_VERSION}"),
        created_at,
    };
    pack.content_hash = compute_content_hash(&pack)?;
    Ok(pack)
}

/// Builds a `module` pack aggregating a file's exported symbols plus a
/// file-level snippet head.
pub fn assemble_module_pack(
    file_path: &str,
    exported_symbols: &[SymbolFact],
    source_lines: &[&str],
    created_at: i64,
) -> Result<ContextPack> {
    let target_id = file_path.to_string();
    let id = pack_id(PackType::Module.label(), &target_id);

    let head_end = (source_lines.len() as u32).min(MAX_SNIPPET_LINES).max(1);
    let head = extract_lines(source_lines, 1, head_end);

    let key_facts: Vec<String> = exported_symbols
        .iter()
        .map(|s| format!("{} {}", s.kind.label(), s.name))
        .collect();

    let mut pack = ContextPack {
        pack_id: id,
        pack_type: PackType::Module,
        target_id,
        schema_version: PACK_SCHEMA_VERSION,
        content_hash: String::new(),
        summary: format!("Module {file_path} exporting {} symbol(s)", exported_symbols.len()),
        key_facts,
        code_snippets: vec![CodeSnippet {
            file_path: file_path.to_string(),
            start_line: 1,
            end_line: head_end,
            content: head,
        }],
        related_files: vec![],
        invalidation_triggers: vec![InvalidationTrigger { kind: TriggerKind::File, key: file_path.to_string() }],
        confidence: 1.0,
        version_string: format!("v{PACK_SCHEMA_VERSION}"),
        created_at,
    };
    pack.content_hash = compute_content_hash(&pack)?;
    Ok(pack)
}

/// Builds a `topic` pack for an entry-point symbol, aggregating the entry
/// file plus its immediate dependency files.
pub fn assemble_topic_pack(
    entry_symbol: &SymbolFact,
    related_files: Vec<String>,
    source_lines: &[&str],
    created_at: i64,
) -> Result<ContextPack> {
    let target_id = entry_symbol.symbol_id.clone();
    let id = pack_id(PackType::Topic.label(), &target_id);

    let head_end = (source_lines.len() as u32).min(MAX_SNIPPET_LINES).max(1);
    let head = extract_lines(source_lines, 1, head_end);

    let mut triggers: Vec<InvalidationTrigger> =
        vec![InvalidationTrigger { kind: TriggerKind::File, key: entry_symbol.file_path.clone() }];
    triggers.extend(related_files.iter().map(|f| InvalidationTrigger { kind: TriggerKind::File, key: f.clone() }));

    let mut pack = ContextPack {
        pack_id: id,
        pack_type: PackType::Topic,
        target_id,
        schema_version: PACK_SCHEMA_VERSION,
        content_hash: String::new(),
        summary: format!("Entry point {} ({})", entry_symbol.name, entry_symbol.file_path),
        key_facts: vec![format!("entry_point: {}", entry_symbol.qualified_name)],
        code_snippets: vec![CodeSnippet {
            file_path: entry_symbol.file_path.clone(),
            start_line: 1,
            end_line: head_end,
            content: head,
        }],
        related_files,
        invalidation_triggers: triggers,
        confidence: 0.8,
        version_string: format!("v{PACK_SCHEMA_VERSION}"),
        created_at,
    };
    pack.content_hash = compute_content_hash(&pack)?;
    Ok(pack)
}

fn one_line_summary(symbol: &SymbolFact) -> String {
    match &symbol.signature {
        Some(sig) if !sig.is_empty() => format!("{} {}", symbol.kind.label(), sig),
        _ => format!("{} {} in {}", symbol.kind.label(), symbol.name, symbol.file_path),
    }
}

fn key_facts_for_symbol(symbol: &SymbolFact) -> Vec<String> {
    let mut facts = vec![format!("kind: {}", symbol.kind.label()), format!("qualified_name: {}", symbol.qualified_name)];
    if let Some(doc) = &symbol.docstring {
        facts.push(format!("doc: {doc}"));
    }
    facts
}

fn extract_lines(lines: &[&str], start_line: u32, end_line: u32) -> String {
    let start = (start_line.saturating_sub(1)) as usize;
    let end = (end_line as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// A URL/filesystem-safe slug derived from a pack's `target_id`.
fn slugify(target_id: &str) -> String {
    target_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>()
        .chars()
        .take(64)
        .collect()
}

/// Writes one pack as `<pack_type>--<target_slug>--<content_hash[:12]>.json`
/// under `<state_dir>/packs/`.
pub fn export_pack(pack: &ContextPack, packs_dir: &Path) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(packs_dir).map_err(|e| EngineError::io(e, ErrorContext::default()))?;
    let slug = slugify(&pack.target_id);
    let short_hash = &pack.content_hash[..pack.content_hash.len().min(12)];
    let filename = format!("{}--{}--{}.json", pack.pack_type.label(), slug, short_hash);
    let path = packs_dir.join(filename);

    let value = serde_json::to_value(pack).map_err(|e| EngineError::ParseError {
        reason: e.to_string(),
        context: ErrorContext::default(),
    })?;
    let bytes = canonical_json(&value).map_err(|e| EngineError::ParseError {
        reason: e.to_string(),
        context: ErrorContext::default(),
    })?;
    std::fs::write(&path, bytes).map_err(|e| EngineError::io(e, ErrorContext::default()))?;
    Ok(path)
}

/// Re-imports a pack file exported by `export_pack`, for the round-trip law
/// `export_pack(import_pack(p)) ≡ p`.
pub fn import_pack(path: &Path) -> Result<ContextPack> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::io(e, ErrorContext::default()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::ParseError { reason: e.to_string(), context: ErrorContext::default() })
}

/// Writes `manifest.json` summarizing an export batch.
pub fn write_manifest(packs: &[ContextPack], packs_dir: &Path, created_at: i64) -> Result<std::path::PathBuf> {
    let pack_entries: Vec<_> = packs
        .iter()
        .map(|p| json!({ "pack_id": p.pack_id, "pack_type": p.pack_type.label(), "content_hash": p.content_hash }))
        .collect();

    let mut hashes: Vec<&str> = packs.iter().map(|p| p.content_hash.as_str()).collect();
    hashes.sort_unstable();
    let snapshot_hash = content_hash(hashes.join(",").as_bytes());

    let manifest = json!({
        "schema_version": PACK_SCHEMA_VERSION,
        "kind": "ContextPackExportManifest.v1",
        "created_at": created_at,
        "pack_count": packs.len(),
        "snapshot_hash": snapshot_hash,
        "packs": pack_entries,
    });

    let bytes = canonical_json(&manifest).map_err(|e| EngineError::ParseError {
        reason: e.to_string(),
        context: ErrorContext::default(),
    })?;
    let path = packs_dir.join("manifest.json");
    std::fs::write(&path, bytes).map_err(|e| EngineError::io(e, ErrorContext::default()))?;
    Ok(path)
}

/// Merges code snippets that share a `file_path` and whose line ranges
/// overlap or are adjacent into a single spanning snippet, so a synthesized
/// answer doesn't quote the same lines twice when two selected packs cover
/// neighboring code in one file (design note §9's snippet-dedup open
/// question). Packs themselves, and their `content_hash`, are untouched —
/// this only shapes what synthesis presents as evidence.
pub fn merge_overlapping_snippets(mut snippets: Vec<CodeSnippet>) -> Vec<CodeSnippet> {
    snippets.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.start_line.cmp(&b.start_line)));
    let mut merged: Vec<CodeSnippet> = Vec::new();
    for snippet in snippets {
        if let Some(last) = merged.last_mut() {
            if last.file_path == snippet.file_path && snippet.start_line <= last.end_line + 1 {
                if snippet.end_line > last.end_line {
                    let overlap = last.end_line.saturating_sub(snippet.start_line) + 1;
                    let tail: Vec<&str> = snippet.content.lines().skip(overlap as usize).collect();
                    if !tail.is_empty() {
                        last.content.push('\n');
                        last.content.push_str(&tail.join("\n"));
                    }
                    last.end_line = snippet.end_line;
                }
                continue;
            }
        }
        merged.push(snippet);
    }
    merged
}

/// The pack-snapshot-hash used in query cache keys (design note §9's open
/// question, resolved as: sorted content hashes of every pack in the
/// corpus, hashed together). Cheap to recompute and stable under reordering.
pub fn pack_snapshot_hash(packs: &[ContextPack]) -> String {
    let mut hashes: Vec<&str> = packs.iter().map(|p| p.content_hash.as_str()).collect();
    hashes.sort_unstable();
    content_hash(hashes.join(",").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Span, SymbolKind, Visibility};

    fn sample_symbol() -> SymbolFact {
        SymbolFact {
            symbol_id: "sym1".to_string(),
            file_path: "a.ts".to_string(),
            kind: SymbolKind::Function,
            name: "answer".to_string(),
            qualified_name: "a.ts::answer".to_string(),
            span: Span { start_line: 1, end_line: 3 },
            signature: Some("export function answer()".to_string()),
            visibility: Visibility::Public,
            docstring: None,
        }
    }

    #[test]
    fn content_hash_matches_canonical_json_law() {
        let symbol = sample_symbol();
        let lines = vec!["export function answer() {", "  return 42;", "}"];
        let pack = assemble_symbol_pack(&symbol, &lines, &[], &|_| None, 0).unwrap();
        let recomputed = compute_content_hash(&pack).unwrap();
        assert_eq!(pack.content_hash, recomputed);
    }

    #[test]
    fn unchanged_input_yields_byte_identical_hash() {
        let symbol = sample_symbol();
        let lines = vec!["export function answer() {", "  return 42;", "}"];
        let pack1 = assemble_symbol_pack(&symbol, &lines, &[], &|_| None, 111).unwrap();
        let pack2 = assemble_symbol_pack(&symbol, &lines, &[], &|_| None, 222).unwrap();
        // created_at differs but content_hash excludes it, so it matches.
        assert_eq!(pack1.content_hash, pack2.content_hash);
    }

    #[test]
    fn snippet_is_clamped_to_max_lines() {
        let mut symbol = sample_symbol();
        symbol.span.end_line = 1 + MAX_SNIPPET_LINES + 50;
        let lines: Vec<String> = (0..(MAX_SNIPPET_LINES + 100)).map(|i| format!("line{i}")).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let pack = assemble_symbol_pack(&symbol, &refs, &[], &|_| None, 0).unwrap();
        let snippet = &pack.code_snippets[0];
        assert!(snippet.end_line - snippet.start_line + 1 <= MAX_SNIPPET_LINES);
    }

    #[test]
    fn export_then_import_round_trips_byte_for_byte() {
        let symbol = sample_symbol();
        let lines = vec!["line1", "line2", "line3"];
        let pack = assemble_symbol_pack(&symbol, &lines, &[], &|_| None, 0).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = export_pack(&pack, dir.path()).unwrap();
        let reimported = import_pack(&path).unwrap();

        assert_eq!(canonical_json(&serde_json::to_value(&pack).unwrap()).unwrap(),
                   canonical_json(&serde_json::to_value(&reimported).unwrap()).unwrap());
    }

    #[test]
    fn pack_filename_uses_first_twelve_hash_chars() {
        let symbol = sample_symbol();
        let lines = vec!["line1"];
        let pack = assemble_symbol_pack(&symbol, &lines, &[], &|_| None, 0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = export_pack(&pack, dir.path()).unwrap();
        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(filename.contains(&pack.content_hash[..12]));
    }

    #[test]
    fn overlapping_snippets_in_same_file_merge_into_one() {
        let a = CodeSnippet { file_path: "a.rs".to_string(), start_line: 1, end_line: 5, content: "l1\nl2\nl3\nl4\nl5".to_string() };
        let b = CodeSnippet { file_path: "a.rs".to_string(), start_line: 4, end_line: 8, content: "l4\nl5\nl6\nl7\nl8".to_string() };
        let merged = merge_overlapping_snippets(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start_line, 1);
        assert_eq!(merged[0].end_line, 8);
        assert_eq!(merged[0].content, "l1\nl2\nl3\nl4\nl5\nl6\nl7\nl8");
    }

    #[test]
    fn non_overlapping_snippets_stay_separate() {
        let a = CodeSnippet { file_path: "a.rs".to_string(), start_line: 1, end_line: 2, content: "l1\nl2".to_string() };
        let b = CodeSnippet { file_path: "a.rs".to_string(), start_line: 10, end_line: 11, content: "l10\nl11".to_string() };
        let merged = merge_overlapping_snippets(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn snippets_in_different_files_never_merge() {
        let a = CodeSnippet { file_path: "a.rs".to_string(), start_line: 1, end_line: 5, content: "l1".to_string() };
        let b = CodeSnippet { file_path: "b.rs".to_string(), start_line: 1, end_line: 5, content: "l1".to_string() };
        let merged = merge_overlapping_snippets(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn snapshot_hash_is_order_independent() {
        let symbol = sample_symbol();
        let lines = vec!["line1"];
        let pack_a = assemble_symbol_pack(&symbol, &lines, &[], &|_| None, 0).unwrap();
        let mut other_symbol = sample_symbol();
        other_symbol.symbol_id = "sym2".to_string();
        let pack_b = assemble_symbol_pack(&other_symbol, &lines, &[], &|_| None, 0).unwrap();

        let h1 = pack_snapshot_hash(&[pack_a.clone(), pack_b.clone()]);
        let h2 = pack_snapshot_hash(&[pack_b, pack_a]);
        assert_eq!(h1, h2);
    }
}
