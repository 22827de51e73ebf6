//! Evolutionary search over the parameters of an external simulation.
//!
//! # Overview
//!
//! The evolutionary search system consists of:
//!
//! - **Evaluators** (`evaluator`, `process`): Score one candidate, in-process or
//!   by launching a simulation per candidate
//! - **Genome Operations** (`genome`): Random generation, crossover, and mutation
//! - **Populations** (`population`): Fixed-size generations and their bounded
//!   concurrent evaluation
//! - **Search Engine** (`search`): Elitism, selection, recombination and
//!   termination
//! - **Driver** (`driver`): The run loop, progress reporting and the final report
//! - **Run Archive** (`archive`): Per-generation records and report files
//!
//! # Example
//!
//! ```rust,no_run
//! use param_evolve::schema::{
//!     EvolutionConfig, FitnessDirection, ParameterSchema, ParameterSpec, ParameterView,
//! };
//! use param_evolve::compute::evolution::{Driver, FnEvaluator};
//!
//! let schema = ParameterSchema::new(
//!     vec![
//!         ParameterSpec::continuous("x", -5.0, 5.0),
//!         ParameterSpec::integer("n", 1.0, 10.0),
//!     ],
//!     FitnessDirection::Minimize,
//! )
//! .unwrap();
//!
//! let evaluator = FnEvaluator::new(|p: &ParameterView<'_>| {
//!     Ok(p.values().iter().map(|v| v * v).sum())
//! });
//!
//! let mut driver = Driver::new(EvolutionConfig::new(schema), evaluator).unwrap();
//! let report = driver
//!     .run_with_callback(|progress| {
//!         println!("Generation {}: best fitness = {:.3}",
//!             progress.generation, progress.best_fitness);
//!     })
//!     .unwrap();
//!
//! println!("Best: {:?}", report.best.parameters);
//! ```
//!
//! # Selection Methods
//!
//! - `Tournament`: Best of `size` draws with replacement
//! - `RankBased`: Probability proportional to rank

mod archive;
mod driver;
mod error;
mod evaluator;
mod genome;
mod population;
mod process;
mod search;

pub use archive::{GenerationRecord, RunArchive, load_generation, load_report};
pub use driver::Driver;
pub use error::RunError;
pub use evaluator::{EvaluationContext, EvaluationError, Evaluator, FnEvaluator, RetryEvaluator};
pub use genome::{Genome, GenomeRng, genome_distance};
pub use population::{EvaluationPool, EvaluationSummary, Population};
pub use process::{CommandEvaluator, parse_fitness};
pub use search::EvolutionEngine;
