// climeval - Incremental evaluation engine for climate-model diagnostics
//
// Given a catalog of climate datasets and a set of diagnostic providers,
// the solver works out which diagnostic executions are required, skips the
// ones whose inputs have not changed, dispatches the rest to an executor
// and waits for the outcomes to be recorded.

pub mod executors;
pub mod provider_registry;
pub mod solver;
pub mod testing;

pub use executors::build_executor;
pub use provider_registry::{build_registry, register_provider_factory};
pub use solver::{solve_executions, solve_required, ExecutionCandidate, SolveFilters, SolveSummary};
