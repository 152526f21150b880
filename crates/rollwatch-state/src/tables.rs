//! redb table definitions for the deployment store.
//!
//! `DEPLOYMENTS` holds the JSON-serialized records. The remaining tables are
//! secondary indexes rewritten in the same write transaction as the record.

use redb::{MultimapTableDefinition, TableDefinition};

/// Deployment records keyed by `{cluster},{service}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Current rollout id → record ids.
pub const BY_DEPLOYMENT: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("deployments_by_rollout");

/// Previous rollout id → record ids.
pub const BY_PREVIOUS_DEPLOYMENT: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("deployments_by_previous_rollout");

/// `{state}/{last_updated_at:020}/{id}` → (). Zero-padded timestamps keep
/// lexicographic order equal to numeric order within a state.
pub const BY_STATE: TableDefinition<&str, ()> = TableDefinition::new("deployments_by_state");

/// Build the `BY_STATE` key for a record.
pub(crate) fn state_key(state: &str, last_updated_at: u64, id: &str) -> String {
    format!("{state}/{last_updated_at:020}/{id}")
}

/// Exclusive upper bound covering every key of `state` older than `before`.
pub(crate) fn state_bound(state: &str, before: u64) -> String {
    format!("{state}/{before:020}/")
}

/// Extract the record id from a `BY_STATE` key.
pub(crate) fn id_from_state_key(key: &str) -> Option<&str> {
    key.splitn(3, '/').nth(2)
}
