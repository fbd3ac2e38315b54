use serde::{Deserialize, Serialize};

/// Options controlling how a [`DbTree`](super::DbTree) runs its operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbTreeOptions {
    /// Dispatch the left, right and middle fetches of a range query concurrently.
    pub parallel_fetch: bool,
    /// Worker cap for the per-group fan-out of `group_by`; 0 uses the global rayon pool.
    pub group_by_threads: usize,
    /// Reject key and value texts that would break the element framing.
    pub validate_text: bool,
}

impl Default for DbTreeOptions {
    fn default() -> Self {
        Self {
            parallel_fetch: true,
            group_by_threads: 0,
            validate_text: true,
        }
    }
}

impl DbTreeOptions {
    /// Options that run every fetch on the calling thread.
    pub fn sequential() -> Self {
        Self {
            parallel_fetch: false,
            ..Self::default()
        }
    }

    /// Sets [`DbTreeOptions::parallel_fetch`].
    pub fn parallel_fetch(mut self, enabled: bool) -> Self {
        self.parallel_fetch = enabled;
        self
    }

    /// Sets [`DbTreeOptions::group_by_threads`].
    pub fn group_by_threads(mut self, threads: usize) -> Self {
        self.group_by_threads = threads;
        self
    }

    /// Sets [`DbTreeOptions::validate_text`].
    pub fn validate_text(mut self, enabled: bool) -> Self {
        self.validate_text = enabled;
        self
    }
}
