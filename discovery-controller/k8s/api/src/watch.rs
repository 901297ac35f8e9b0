//! Events delivered by the watcher substrate.

use crate::ObjectKey;

/// A low-level change notification for a watched resource type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Added(T),

    Updated { old: T, new: T },

    Deleted(T),

    /// A delete observed after a missed watch window; the final state of the
    /// object was not known at delivery time. `last_known` carries the
    /// reconstructed payload when the substrate could recover one.
    Tombstone {
        key: ObjectKey,
        last_known: Option<T>,
    },
}
