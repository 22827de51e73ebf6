//! Fatal run errors.

use crate::schema::EvolutionConfigError;

/// A run could not complete.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] EvolutionConfigError),
    #[error(
        "Population collapsed in generation {generation}: {failed} of {attempted} evaluations failed"
    )]
    PopulationCollapse {
        generation: usize,
        failed: usize,
        attempted: usize,
    },
    #[error("Run cancelled during generation {generation}")]
    Cancelled { generation: usize },
    #[error("Failed to build evaluation thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Archive I/O error: {0}")]
    Archive(#[from] std::io::Error),
}

