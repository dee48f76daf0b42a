//! `concord inspect`

use anyhow::{Context, Result};
use std::path::Path;

use crate::coordinator::SnapshotStore;

/// Print a summary of a snapshot file
pub async fn inspect(path: &Path, json: bool) -> Result<()> {
    let store = SnapshotStore::file(path);
    let snapshot = store
        .load()
        .await
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?
        .with_context(|| format!("No snapshot at {}", path.display()))?;

    if json {
        let stats = serde_json::json!({
            "schema_version": snapshot.schema_version,
            "version": snapshot.version,
            "created": snapshot.created,
            "modified": snapshot.modified,
            "services": snapshot.services.len(),
            "registrations": snapshot.registration_count(),
            "subscriptions": snapshot.subscription_count(),
            "clusters": snapshot.clusters,
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", snapshot.display());
    }

    Ok(())
}
