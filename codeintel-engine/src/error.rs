//! Structured error taxonomy for the engine.
//!
//! Every fallible engine operation returns [`Result`], never a bare string —
//! callers get a typed `code`, the `context` the failure occurred in, and,
//! where the failure is actionable, concrete `remediation` steps.

use std::path::PathBuf;
use thiserror::Error;

/// Where an error occurred, for diagnostics and logging.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ErrorContext {
    pub workspace: Option<PathBuf>,
    pub file: Option<String>,
    pub symbol: Option<String>,
    pub pack_id: Option<String>,
}

impl ErrorContext {
    pub fn workspace(root: impl Into<PathBuf>) -> Self {
        Self { workspace: Some(root.into()), ..Default::default() }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_pack(mut self, pack_id: impl Into<String>) -> Self {
        self.pack_id = Some(pack_id.into());
        self
    }
}

/// The full error taxonomy from the error handling design: every kind a
/// caller can match on, never an opaque string.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workspace is locked by pid {pid}")]
    StorageLocked { pid: u32, context: ErrorContext },

    #[error("store schema version {store_version} is newer than supported code version {code_version}")]
    SchemaIncompatible { store_version: u32, code_version: u32, context: ErrorContext },

    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String, context: ErrorContext },

    #[error("derived index corrupted: {table}")]
    CorruptedIndex { table: String, context: ErrorContext },

    #[error("io error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    #[error("embedding provider unavailable: {reason}")]
    ProviderUnavailable { reason: String, context: ErrorContext, remediation: Vec<String> },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize, context: ErrorContext },

    #[error("embedding vector had zero norm")]
    EmbeddingZeroNorm { context: ErrorContext },

    #[error("parse error: {reason}")]
    ParseError { reason: String, context: ErrorContext },

    #[error("intent could not be classified: {raw_intent}")]
    IntentUnclassifiable { raw_intent: String, context: ErrorContext },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64, context: ErrorContext },

    #[error("operation cancelled")]
    Cancelled { context: ErrorContext },

    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String, context: ErrorContext },

    #[error("configuration error: {reason}")]
    Configuration { reason: String, context: ErrorContext },
}

impl EngineError {
    /// The stable, matchable error code (spec §7's `code` field).
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::StorageLocked { .. } => "storage_locked",
            EngineError::SchemaIncompatible { .. } => "schema_incompatible",
            EngineError::MigrationFailed { .. } => "migration_failed",
            EngineError::CorruptedIndex { .. } => "corrupted_index",
            EngineError::Io { .. } => "io_error",
            EngineError::ProviderUnavailable { .. } => "provider_unavailable",
            EngineError::DimensionMismatch { .. } => "dimension_mismatch",
            EngineError::EmbeddingZeroNorm { .. } => "embedding_zero_norm",
            EngineError::ParseError { .. } => "parse_error",
            EngineError::IntentUnclassifiable { .. } => "intent_unclassifiable",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Cancelled { .. } => "cancelled",
            EngineError::StorageUnavailable { .. } => "storage_unavailable",
            EngineError::Configuration { .. } => "configuration",
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            EngineError::StorageLocked { context, .. }
            | EngineError::SchemaIncompatible { context, .. }
            | EngineError::MigrationFailed { context, .. }
            | EngineError::CorruptedIndex { context, .. }
            | EngineError::Io { context, .. }
            | EngineError::ProviderUnavailable { context, .. }
            | EngineError::DimensionMismatch { context, .. }
            | EngineError::EmbeddingZeroNorm { context }
            | EngineError::ParseError { context, .. }
            | EngineError::IntentUnclassifiable { context, .. }
            | EngineError::Timeout { context, .. }
            | EngineError::Cancelled { context }
            | EngineError::StorageUnavailable { context, .. }
            | EngineError::Configuration { context, .. } => context,
        }
    }

    pub fn remediation(&self) -> Option<&[String]> {
        match self {
            EngineError::ProviderUnavailable { remediation, .. } => Some(remediation),
            _ => None,
        }
    }

    pub fn io(err: std::io::Error, context: ErrorContext) -> Self {
        EngineError::Io { source: err, context }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
