//! Split policies: how a test-level dependency expands into case-level edges.
//!
//! A policy is a pure predicate over the coordinates of a candidate source
//! case and a candidate destination case. The built-in policies are plain
//! named instances of the same predicate type, so the graph builder never
//! distinguishes them from user-supplied closures.

use std::fmt;
use std::sync::Arc;

use crate::graph::{Coords, GraphError};

/// Signature shared by every split policy: `(source, destination) -> edge?`.
pub type SplitFn = dyn Fn(&Coords, &Coords) -> bool + Send + Sync;

/// Names of the built-in policies, in the order they are documented.
pub const BUILTIN_POLICIES: &[&str] = &[
    "fully", "by_case", "by_env", "by_part", "by_xenv", "by_xpart", "by_xcase",
];

/// A named split predicate.
#[derive(Clone)]
pub struct SplitPolicy {
    name: Arc<str>,
    pred: Arc<SplitFn>,
}

impl SplitPolicy {
    /// Wrap an arbitrary predicate under a display name.
    pub fn new<F>(name: &str, pred: F) -> Self
    where
        F: Fn(&Coords, &Coords) -> bool + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            pred: Arc::new(pred),
        }
    }

    /// A user-supplied policy. Reported as `custom` in listings.
    pub fn custom<F>(pred: F) -> Self
    where
        F: Fn(&Coords, &Coords) -> bool + Send + Sync + 'static,
    {
        Self::new("custom", pred)
    }

    /// Every source case depends on every destination case.
    pub fn fully() -> Self {
        Self::new("fully", |_, _| true)
    }

    /// Same partition and same environment. This is the default.
    pub fn by_case() -> Self {
        Self::new("by_case", |src, dst| {
            src.partition == dst.partition && src.environ == dst.environ
        })
    }

    pub fn by_env() -> Self {
        Self::new("by_env", |src, dst| src.environ == dst.environ)
    }

    pub fn by_part() -> Self {
        Self::new("by_part", |src, dst| src.partition == dst.partition)
    }

    pub fn by_xenv() -> Self {
        Self::new("by_xenv", |src, dst| src.environ != dst.environ)
    }

    pub fn by_xpart() -> Self {
        Self::new("by_xpart", |src, dst| src.partition != dst.partition)
    }

    /// Both coordinates differ.
    pub fn by_xcase() -> Self {
        Self::new("by_xcase", |src, dst| {
            src.environ != dst.environ && src.partition != dst.partition
        })
    }

    /// Look up a built-in policy by name.
    pub fn from_name(name: &str) -> Result<Self, GraphError> {
        match name {
            "fully" => Ok(Self::fully()),
            "by_case" | "default" => Ok(Self::by_case()),
            "by_env" => Ok(Self::by_env()),
            "by_part" => Ok(Self::by_part()),
            "by_xenv" => Ok(Self::by_xenv()),
            "by_xpart" => Ok(Self::by_xpart()),
            "by_xcase" => Ok(Self::by_xcase()),
            other => Err(GraphError::UnknownPolicy(other.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the case at `src` depends on the case at `dst`.
    pub fn edge(&self, src: &Coords, dst: &Coords) -> bool {
        (self.pred)(src, dst)
    }
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self::by_case()
    }
}

impl fmt::Debug for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SplitPolicy").field(&self.name).finish()
    }
}

impl std::str::FromStr for SplitPolicy {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
