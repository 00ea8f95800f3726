//! Empty the record, metadata and transient tables between tiers.

use crate::{BenchResult, ContentStore, Table};
use std::time::Duration;
use tracing::info;

/// Option-name prefixes of cached transients.
pub const TRANSIENT_PREFIXES: [&str; 2] = ["_transient_", "_site_transient_"];

/// Row counts observed around one reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReport {
    pub posts_before: u64,
    pub postmeta_before: u64,
    pub transients_deleted: u64,
    pub posts_after: u64,
    pub postmeta_after: u64,
}

/// Irreversibly delete every post, every postmeta row and all transients,
/// then wait `settle` for cache invalidation to propagate.
pub fn reset(store: &mut dyn ContentStore, settle: Duration) -> BenchResult<ResetReport> {
    let posts_before = store.count_rows(Table::Posts)?;
    let postmeta_before = store.count_rows(Table::PostMeta)?;
    info!(
        "Deleting posts (found: {}) and postmeta (found: {})...",
        posts_before, postmeta_before
    );

    store.truncate(Table::Posts)?;
    store.truncate(Table::PostMeta)?;
    let mut transients_deleted = 0;
    for prefix in TRANSIENT_PREFIXES {
        transients_deleted += store.delete_options_like(prefix)?;
    }

    if !settle.is_zero() {
        std::thread::sleep(settle);
    }

    let posts_after = store.count_rows(Table::Posts)?;
    let postmeta_after = store.count_rows(Table::PostMeta)?;
    info!(
        "Posts (found after delete: {}). Postmeta (found after delete: {})...",
        posts_after, postmeta_after
    );

    Ok(ResetReport {
        posts_before,
        postmeta_before,
        transients_deleted,
        posts_after,
        postmeta_after,
    })
}
