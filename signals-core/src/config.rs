//! Graph Configuration

/// Default bound on flush generations before a cycle is reported.
pub const DEFAULT_MAX_GENERATIONS: u32 = 100;

/// Per-graph settings.
///
/// # Example
///
/// ```rust
/// use signals_core::{Graph, GraphConfig};
///
/// let graph = Graph::with_config(GraphConfig::default().max_generations(20));
/// assert_eq!(graph.config().max_generations, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConfig {
    /// How many times in a row the pending-effect queue may refill during a
    /// single flush. Exceeding it aborts the flush with a cycle fault.
    pub max_generations: u32,
}

impl GraphConfig {
    pub fn max_generations(mut self, max_generations: u32) -> Self {
        self.max_generations = max_generations;
        self
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_generations: DEFAULT_MAX_GENERATIONS,
        }
    }
}
