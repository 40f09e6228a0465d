//! Configuration for the decompilation pipeline.
//!
//! Every iteration and duplication bound the stages respect lives here, so a driver
//! processing untrusted input can tighten them in one place.

/// Limits and checks for one [`crate::compiler::Decompiler`].
///
/// ```rust
/// use classflow::compiler::DecompilerConfig;
///
/// let config = DecompilerConfig {
///     max_subroutine_copies: 8,
///     ..DecompilerConfig::default()
/// };
/// assert_eq!(config.max_scc_rounds, 4);
/// assert!(config.verify_round_trip);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompilerConfig {
    /// Refinement rounds per dependency SCC before its values widen to top
    /// (default: 4).
    pub max_scc_rounds: usize,

    /// Outer propagate/simplify rounds (default: 16).
    pub max_propagation_rounds: usize,

    /// Cap on the jump simplification and dead block pruning fixed point
    /// (default: 100).
    pub max_simplify_iterations: usize,

    /// Subroutine copies allowed per method before giving up (default: 64).
    pub max_subroutine_copies: usize,

    /// Loop normalization rounds allowed per method before giving up (default: 256).
    pub max_loop_duplication_rounds: usize,

    /// Duplicated node count above which a separate warning is recorded
    /// (default: 32).
    pub large_duplication_warning: usize,

    /// Linearize the emitted tree and compare it against the graph (default: true).
    pub verify_round_trip: bool,

    /// Check SSA well-formedness after assembly and after propagation
    /// (default: true).
    pub check_ssa: bool,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            max_scc_rounds: 4,
            max_propagation_rounds: 16,
            max_simplify_iterations: 100,
            max_subroutine_copies: 64,
            max_loop_duplication_rounds: 256,
            large_duplication_warning: 32,
            verify_round_trip: true,
            check_ssa: true,
        }
    }
}
