//! Evolution configuration and report types for parameter search.
//!
//! Everything here is plain serde data: the run configuration read from JSON
//! and the progress/report values emitted while a run proceeds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{FitnessDirection, ParameterSchema, ParameterSpec, SchemaError};

/// Top-level configuration for a parameter search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Parameter space and fitness direction.
    pub schema: ParameterSchema,
    /// Genetic operators.
    #[serde(default)]
    pub algorithm: GeneticAlgorithmConfig,
    /// Population and termination settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Evaluation settings (concurrency, timeouts, external command).
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Generation history retention.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl EvolutionConfig {
    /// Configuration with default settings for the given schema.
    pub fn new(schema: ParameterSchema) -> Self {
        Self {
            schema,
            algorithm: GeneticAlgorithmConfig::default(),
            population: PopulationConfig::default(),
            evaluation: EvaluationConfig::default(),
            archive: ArchiveConfig::default(),
            random_seed: None,
        }
    }

    /// Sample configuration driving a headless simulation model.
    pub fn example() -> Self {
        let schema = ParameterSchema::new(
            vec![
                ParameterSpec::integer("initial-population", 10.0, 500.0),
                ParameterSpec::continuous("reproduction-rate", 0.0, 0.2),
                ParameterSpec::continuous("movement-speed", 0.1, 2.0),
            ],
            FitnessDirection::Maximize,
        )
        .expect("example schema is valid");

        let mut config = Self::new(schema);
        config.evaluation.timeout_secs = Some(300.0);
        config.evaluation.command = Some(CommandConfig {
            program: "netlogo-headless.sh".to_string(),
            args: vec!["--model".to_string(), "Model.nlogo".to_string()],
            ..Default::default()
        });
        config.random_seed = Some(42);
        config
    }
}

/// Selection method for choosing parents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method")]
pub enum SelectionMethod {
    /// Tournament selection with configurable size.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Rank-based selection: probability proportional to rank.
    RankBased,
}

impl Default for SelectionMethod {
    fn default() -> Self {
        Self::Tournament {
            size: default_tournament_size(),
        }
    }
}

fn default_tournament_size() -> usize {
    3
}

/// Genetic operator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticAlgorithmConfig {
    /// Selection method.
    #[serde(default)]
    pub selection: SelectionMethod,
    /// Probability that a child blends both parents (otherwise copies the first).
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Mutation probability per parameter (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Gaussian noise standard deviation as a fraction of each parameter's range.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// Number of best individuals copied unchanged into the next generation.
    #[serde(default = "default_elitism")]
    pub elitism: usize,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            selection: SelectionMethod::default(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            mutation_strength: default_mutation_strength(),
            elitism: default_elitism(),
        }
    }
}

fn default_crossover_rate() -> f64 {
    1.0
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_mutation_strength() -> f64 {
    0.1
}
fn default_elitism() -> usize {
    1
}

/// Population and termination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals in every generation.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Maximum number of evaluated generations, including the initial one.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Stop once the best fitness reaches this value.
    #[serde(default)]
    pub target_fitness: Option<f64>,
    /// Stop if the best fitness has not improved for N generations.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
    /// Minimum improvement that resets the stagnation counter.
    #[serde(default)]
    pub stagnation_epsilon: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            max_generations: default_max_generations(),
            target_fitness: None,
            stagnation_limit: None,
            stagnation_epsilon: 0.0,
        }
    }
}

fn default_population_size() -> usize {
    10
}
fn default_max_generations() -> usize {
    10
}

/// Evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Number of parallel evaluations (0 = auto-detect).
    #[serde(default)]
    pub parallel_workers: usize,
    /// Per-evaluation deadline in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Retries after a failed evaluation (0 = never retry).
    #[serde(default)]
    pub max_retries: u32,
    /// Fraction of failed evaluations in one generation that aborts the run.
    #[serde(default = "default_max_failure_fraction")]
    pub max_failure_fraction: f64,
    /// External command used by the CLI to evaluate candidates.
    #[serde(default)]
    pub command: Option<CommandConfig>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 0,
            timeout_secs: None,
            max_retries: 0,
            max_failure_fraction: default_max_failure_fraction(),
            command: None,
        }
    }
}

fn default_max_failure_fraction() -> f64 {
    0.5
}

/// External process invocation for the command evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandConfig {
    /// Executable to run.
    pub program: String,
    /// Fixed arguments placed before the parameter arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Prefix for each parameter flag (defaults to `--`).
    #[serde(default)]
    pub flag_prefix: Option<String>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Generation history retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Keep a snapshot of every evaluated generation in memory.
    #[serde(default = "default_retain_generations")]
    pub retain_generations: bool,
    /// Directory where generation records and the final report are written.
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            retain_generations: default_retain_generations(),
            output_dir: None,
        }
    }
}

fn default_retain_generations() -> bool {
    true
}

// ============================================================================
// Progress and Result Types
// ============================================================================

/// A named parameter value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterValue {
    pub name: String,
    pub value: f64,
}

/// Snapshot of a genome for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateSnapshot {
    /// Generation the genome belongs to.
    pub generation: usize,
    /// Position within that generation.
    pub index: usize,
    /// Fitness, if evaluated.
    pub fitness: Option<f64>,
    /// Parameter values in schema order.
    pub parameters: Vec<ParameterValue>,
}

impl CandidateSnapshot {
    /// Look up a parameter value by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }
}

/// Summary statistics for one evaluated generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub worst_fitness: f64,
    pub fitness_std: f64,
    /// Members with a fitness value.
    pub evaluated: usize,
    /// Members whose evaluation failed.
    pub failed: usize,
    /// Mean pairwise normalized parameter distance.
    pub diversity: f64,
}

/// Per-generation history for plotting.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EvolutionHistory {
    pub generations: Vec<GenerationStats>,
}

impl EvolutionHistory {
    pub fn push(&mut self, stats: GenerationStats) {
        self.generations.push(stats);
    }

    pub fn len(&self) -> usize {
        self.generations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Best fitness per generation.
    pub fn best_fitness(&self) -> impl Iterator<Item = f64> + '_ {
        self.generations.iter().map(|g| g.best_fitness)
    }
}

/// Reason evolution stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Stagnation limit hit.
    Stagnation,
    /// Reached target fitness.
    TargetReached,
    /// Cancellation requested.
    Cancelled,
}

/// Current phase of the evolution state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EvolutionPhase {
    /// Engine created, no population yet.
    #[default]
    Initialized,
    /// Evaluating candidates.
    Evaluating,
    /// Choosing parents.
    Selecting,
    /// Creating offspring by crossover.
    Recombining,
    /// Perturbing offspring.
    Mutating,
    /// Run finished.
    Terminated(StopReason),
}

/// Progress update emitted after each evaluated generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionProgress {
    /// Generation just evaluated.
    pub generation: usize,
    /// Generation budget.
    pub total_generations: usize,
    /// Best fitness seen so far across all generations.
    pub best_fitness: f64,
    /// Statistics of the generation just evaluated.
    pub stats: GenerationStats,
    /// Generations since last improvement.
    pub stagnation_count: usize,
    /// Best candidate seen so far.
    pub best_candidate: CandidateSnapshot,
    /// Current phase of the algorithm.
    pub phase: EvolutionPhase,
}

/// Statistics from a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionStats {
    /// Evaluated generations, including the initial one.
    pub generations: usize,
    /// Evaluator calls that produced a fitness.
    pub total_evaluations: u64,
    /// Evaluator calls that failed.
    pub failed_evaluations: u64,
    /// Best fitness achieved.
    pub best_fitness: f64,
    /// Generation in which the best candidate was found.
    pub best_generation: usize,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Evaluations per second.
    pub evaluations_per_second: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionReport {
    /// Best candidate found across all generations.
    pub best: CandidateSnapshot,
    /// Statistics from the run.
    pub stats: EvolutionStats,
    /// Per-generation history.
    pub history: EvolutionHistory,
}

// ============================================================================
// Validation
// ============================================================================

/// Evolution configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionConfigError {
    #[error("Population size must be at least 1")]
    PopulationTooSmall,
    #[error("Max generations must be at least 1")]
    NoGenerations,
    #[error("Tournament size must be at least 1")]
    InvalidTournamentSize,
    #[error("Elitism ({elitism}) exceeds population size ({size})")]
    ElitismTooLarge { elitism: usize, size: usize },
    #[error("Invalid rate: {0}")]
    InvalidRate(String),
    #[error("Evaluation timeout must be positive")]
    InvalidTimeout,
    #[error("Command program must not be empty")]
    EmptyCommand,
    #[error("Schema validation failed: {0}")]
    Schema(#[from] SchemaError),
}

impl EvolutionConfig {
    /// Validate evolution configuration.
    pub fn validate(&self) -> Result<(), EvolutionConfigError> {
        self.schema.validate()?;

        if self.population.size < 1 {
            return Err(EvolutionConfigError::PopulationTooSmall);
        }
        if self.population.max_generations < 1 {
            return Err(EvolutionConfigError::NoGenerations);
        }

        if let SelectionMethod::Tournament { size } = self.algorithm.selection
            && size < 1
        {
            return Err(EvolutionConfigError::InvalidTournamentSize);
        }

        if self.algorithm.elitism > self.population.size {
            return Err(EvolutionConfigError::ElitismTooLarge {
                elitism: self.algorithm.elitism,
                size: self.population.size,
            });
        }

        let check_unit = |value: f64, name: &str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(EvolutionConfigError::InvalidRate(format!(
                    "{} ({}) must be within [0, 1]",
                    name, value
                )))
            }
        };

        check_unit(self.algorithm.crossover_rate, "crossover_rate")?;
        check_unit(self.algorithm.mutation_rate, "mutation_rate")?;
        check_unit(
            self.evaluation.max_failure_fraction,
            "max_failure_fraction",
        )?;

        if self.algorithm.mutation_strength.is_nan() || self.algorithm.mutation_strength < 0.0 {
            return Err(EvolutionConfigError::InvalidRate(format!(
                "mutation_strength ({}) must be non-negative",
                self.algorithm.mutation_strength
            )));
        }
        if self.population.stagnation_epsilon.is_nan() || self.population.stagnation_epsilon < 0.0 {
            return Err(EvolutionConfigError::InvalidRate(format!(
                "stagnation_epsilon ({}) must be non-negative",
                self.population.stagnation_epsilon
            )));
        }

        if let Some(timeout) = self.evaluation.timeout_secs
            && (timeout <= 0.0 || !timeout.is_finite())
        {
            return Err(EvolutionConfigError::InvalidTimeout);
        }

        if let Some(command) = &self.evaluation.command
            && command.program.trim().is_empty()
        {
            return Err(EvolutionConfigError::EmptyCommand);
        }

        Ok(())
    }
}
