//! Local mirror management commands

use serde_json::json;

use pollsync::error::Result;
use pollsync::store::{PersistentStore, keys};

use crate::cli::context::{CommandContext, print_json};

/// Remove mirrored snapshots and any in-memory cached responses
pub fn clear(ctx: &CommandContext) -> Result<()> {
    let store = ctx.resilience.store();
    let mut removed = 0;
    for key in store.keys_with_prefix(keys::SNAPSHOT_PREFIX)? {
        if store.remove(&key)? {
            removed += 1;
        }
    }
    ctx.resilience.gateway().clear_cache();

    if ctx.is_json() {
        return print_json(&json!({ "snapshotsRemoved": removed, "success": true }));
    }
    if removed > 0 {
        println!("Cleared {} snapshots", removed);
    } else {
        println!("No snapshots stored");
    }
    Ok(())
}
