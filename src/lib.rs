//! Param Evolve - Genetic algorithm calibration of simulation parameters.
//!
//! This crate searches a bounded parameter space for the assignment that
//! maximizes (or minimizes) the fitness reported by a simulation. Each
//! candidate is scored by an evaluator, typically an external process that
//! receives the parameters as command-line flags.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Parameter schema, run configuration and report types
//! - `compute`: Genomes, populations, evaluators and the evolution engine
//!
//! # Example
//!
//! ```rust,no_run
//! use param_evolve::{
//!     compute::evolution::{CommandEvaluator, Driver},
//!     schema::{EvolutionConfig, FitnessDirection, ParameterSchema, ParameterSpec},
//! };
//!
//! let schema = ParameterSchema::new(
//!     vec![
//!         ParameterSpec::integer("population", 10.0, 500.0),
//!         ParameterSpec::continuous("infection-rate", 0.0, 1.0),
//!     ],
//!     FitnessDirection::Maximize,
//! )
//! .unwrap();
//!
//! let mut config = EvolutionConfig::new(schema);
//! config.population.size = 20;
//! config.population.max_generations = 15;
//! config.evaluation.timeout_secs = Some(60.0);
//!
//! let evaluator = CommandEvaluator::new("./run-model.sh").with_args(["--headless"]);
//! let report = Driver::new(config, evaluator).unwrap().run().unwrap();
//!
//! println!("Best fitness {:?}: {:?}", report.best.fitness, report.best.parameters);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{CommandEvaluator, Driver, EvolutionEngine, Evaluator, RunError};
pub use schema::{EvolutionConfig, EvolutionReport, ParameterSchema, ParameterSpec};
