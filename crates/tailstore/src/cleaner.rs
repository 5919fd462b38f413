//! Periodic detachment of subscribers that fell out of the cache window.
//!
//! Trimming alone only drops the chain's own references; a laggard still
//! pinning an evicted node would keep the whole evicted prefix alive. The
//! cleaner breaks that reference: the laggard leaves the tailing set, its
//! node reference is cleared, and its next fetch recovers through a private
//! catch-up stream.

use crate::storage::StorageEngine;
use crate::store::Shared;
use crate::sync::lock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cleaner loop: sweep once per cleanup delay until the store closes.
pub(crate) fn run<S: StorageEngine>(shared: &Arc<Shared<S>>) {
    debug!("cache cleaner started");
    while !shared.shutdown.wait_timeout(shared.config.cleanup_delay) {
        detach_laggards(shared);
    }
    debug!("cache cleaner stopped");
}

/// One sweep over the tailing set.
///
/// A subscriber is behind the window when its position is null or strictly
/// precedes the token before the oldest retained event. Until the cache has
/// ever held a node there is no window to fall out of.
pub(crate) fn detach_laggards<S: StorageEngine>(shared: &Shared<S>) {
    let Some(oldest) = shared.chain.oldest() else {
        return;
    };
    for slot in shared.registry.snapshot() {
        let behind = {
            let position = lock(&slot.position);
            match position.last_token.as_ref() {
                None => true,
                Some(last) => oldest
                    .previous_token()
                    .is_some_and(|previous| previous > last),
            }
        };
        if behind {
            shared.registry.remove(slot.id);
            lock(&slot.position).last_node = None;
            warn!(
                subscriber = slot.id,
                "subscriber fell behind the cache window; detached from the tail"
            );
            if shared.config.enable_metrics {
                shared.metrics.add_laggard();
            }
        }
    }
}
