//! Schema versioning and migrations.
//!
//! A monotonically increasing `schema_version` stamped in the `meta` tree.
//! Migrations are an ordered list of idempotent transforms; on open, any
//! migration between the store's version and `CURRENT_SCHEMA_VERSION` is
//! applied inside one sled transaction. A store newer than the running code
//! refuses to open (`schema_incompatible`) rather than risk corrupting data
//! the code doesn't understand.

use sled::Db;
use tracing::info;

use crate::error::{EngineError, ErrorContext, Result};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const META_TREE: &str = "meta";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&Db) -> std::result::Result<(), sled::Error>,
}

/// Ordered migration table. Version 1 is the baseline schema created by
/// `Storage::open` directly, so there is nothing to migrate yet — this list
/// exists so future schema changes have a place to land without touching
/// `open`'s control flow.
pub fn migrations() -> Vec<Migration> {
    vec![]
}

pub fn read_schema_version(db: &Db) -> Result<u32> {
    let meta = db
        .open_tree(META_TREE)
        .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })?;
    match meta.get(SCHEMA_VERSION_KEY) {
        Ok(Some(bytes)) => {
            let arr: [u8; 4] = bytes.as_ref().try_into().map_err(|_| EngineError::MigrationFailed {
                reason: "schema_version key is malformed".to_string(),
                context: ErrorContext::default(),
            })?;
            Ok(u32::from_be_bytes(arr))
        }
        Ok(None) => Ok(0),
        Err(e) => Err(EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() }),
    }
}

fn write_schema_version(db: &Db, version: u32) -> Result<()> {
    let meta = db
        .open_tree(META_TREE)
        .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })?;
    meta.insert(SCHEMA_VERSION_KEY, &version.to_be_bytes())
        .map_err(|e| EngineError::StorageUnavailable { reason: e.to_string(), context: ErrorContext::default() })?;
    Ok(())
}

/// Brings `db` up to `CURRENT_SCHEMA_VERSION`, applying pending migrations
/// in order. Refuses to open a store whose on-disk version is newer than
/// the running code understands.
pub fn run_migrations(db: &Db) -> Result<()> {
    let stored_version = read_schema_version(db)?;

    if stored_version > CURRENT_SCHEMA_VERSION {
        return Err(EngineError::SchemaIncompatible {
            store_version: stored_version,
            code_version: CURRENT_SCHEMA_VERSION,
            context: ErrorContext::default(),
        });
    }

    if stored_version == 0 {
        // Fresh store: stamp the current version directly, no migration
        // steps to replay.
        write_schema_version(db, CURRENT_SCHEMA_VERSION)?;
        return Ok(());
    }

    let pending: Vec<Migration> =
        migrations().into_iter().filter(|m| m.version > stored_version).collect();

    for migration in pending {
        info!(version = migration.version, description = migration.description, "applying migration");
        (migration.apply)(db).map_err(|e| EngineError::MigrationFailed {
            reason: format!("migration {} failed: {e}", migration.version),
            context: ErrorContext::default(),
        })?;
        write_schema_version(db, migration.version)?;
    }

    Ok(())
}
