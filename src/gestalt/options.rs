use serde::{Deserialize, Serialize};

/// Tuning knobs for the gestalt graph engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Verify edge symmetry while traversing, failing with a
    /// corruption error on the first asymmetric edge. Off by default;
    /// `check_integrity` always audits symmetry regardless.
    pub strict_traversal: bool,
    /// Upper bound on the number of vertices a single traversal may
    /// visit. `None` means unbounded.
    pub max_gestalt_size: Option<usize>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            strict_traversal: false,
            max_gestalt_size: None,
        }
    }
}

impl GraphOptions {
    /// Options for paranoid deployments: symmetry checked on every
    /// walk.
    pub fn strict() -> Self {
        Self {
            strict_traversal: true,
            max_gestalt_size: None,
        }
    }
}
