//! Fixed-size generations of genomes and their concurrent evaluation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rayon::prelude::*;

use crate::schema::{CandidateSnapshot, FitnessDirection, GenerationStats, ParameterSchema};

use super::error::RunError;
use super::evaluator::{EvaluationContext, EvaluationError, Evaluator};
use super::genome::{Genome, GenomeRng, genome_distance};

/// Bounded worker pool plus the limits applied to every evaluation.
pub struct EvaluationPool {
    pool: rayon::ThreadPool,
    timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    max_failure_fraction: f64,
}

impl EvaluationPool {
    /// Build a pool with `workers` threads (0 = one per core).
    pub fn new(
        workers: usize,
        timeout: Option<Duration>,
        cancelled: Arc<AtomicBool>,
        max_failure_fraction: f64,
    ) -> Result<Self, RunError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("evaluator-{i}"))
            .build()?;
        Ok(Self {
            pool,
            timeout,
            cancelled,
            max_failure_fraction,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn context(&self) -> EvaluationContext {
        EvaluationContext::new(self.timeout, Arc::clone(&self.cancelled))
    }
}

/// Outcome counts of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// Genomes sent to the evaluator.
    pub attempted: usize,
    /// Of those, how many failed.
    pub failed: usize,
}

/// One generation of genomes.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    generation: usize,
    members: Vec<Genome>,
}

impl Population {
    /// Generation 0: `size` random genomes.
    pub fn initial(size: usize, schema: &ParameterSchema, rng: &mut GenomeRng) -> Self {
        let members = (0..size).map(|_| rng.random_genome(schema)).collect();
        Self {
            generation: 0,
            members,
        }
    }

    pub fn from_members(generation: usize, members: Vec<Genome>) -> Self {
        Self {
            generation,
            members,
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn members(&self) -> &[Genome] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members with a fitness value.
    pub fn evaluated_count(&self) -> usize {
        self.members.iter().filter(|g| g.is_evaluated()).count()
    }

    /// Evaluate every member without a fitness.
    ///
    /// Results are placed by position, so completion order does not matter.
    /// Failed members keep `fitness = None` and drop out of selection. Too many
    /// failures abort with [`RunError::PopulationCollapse`]; a cancelled pass is
    /// discarded entirely.
    pub fn evaluate_all<E: Evaluator + ?Sized>(
        &self,
        schema: &ParameterSchema,
        evaluator: &E,
        pool: &EvaluationPool,
    ) -> Result<(Population, EvaluationSummary), RunError> {
        let pending: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_evaluated())
            .map(|(i, _)| i)
            .collect();

        let results: Vec<(usize, Result<Genome, EvaluationError>)> = pool.pool.install(|| {
            pending
                .par_iter()
                .map(|&i| {
                    let ctx = pool.context();
                    let result = ctx
                        .check()
                        .and_then(|()| self.members[i].evaluated(schema, evaluator, &ctx));
                    (i, result)
                })
                .collect()
        });

        if pool.is_cancelled() {
            return Err(RunError::Cancelled {
                generation: self.generation,
            });
        }

        let mut members = self.members.clone();
        let mut failed = 0;
        for (i, result) in results {
            match result {
                Ok(genome) => members[i] = genome,
                Err(err) => {
                    failed += 1;
                    log::warn!(
                        "generation {} member {} excluded: {}",
                        self.generation,
                        i,
                        err
                    );
                }
            }
        }

        let summary = EvaluationSummary {
            attempted: pending.len(),
            failed,
        };
        let evaluated = members.iter().filter(|g| g.is_evaluated()).count();
        let failure_fraction = if summary.attempted > 0 {
            failed as f64 / summary.attempted as f64
        } else {
            0.0
        };

        if evaluated == 0 || failure_fraction > pool.max_failure_fraction {
            return Err(RunError::PopulationCollapse {
                generation: self.generation,
                failed,
                attempted: summary.attempted,
            });
        }

        Ok((
            Population {
                generation: self.generation,
                members,
            },
            summary,
        ))
    }

    /// Member with the best fitness; ties go to the lowest index.
    pub fn best(&self, direction: FitnessDirection) -> Option<&Genome> {
        self.best_index(direction).map(|i| &self.members[i])
    }

    pub fn best_index(&self, direction: FitnessDirection) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, genome) in self.members.iter().enumerate() {
            let Some(fitness) = genome.fitness() else {
                continue;
            };
            match best {
                Some((_, current)) if !direction.is_better(fitness, current) => {}
                _ => best = Some((i, fitness)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Indices of evaluated members, best first. Ties keep index order.
    pub fn ranked(&self, direction: FitnessDirection) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, g)| g.is_evaluated())
            .map(|(i, _)| i)
            .collect();
        indices.sort_by(|&a, &b| {
            let fa = self.members[a].fitness().unwrap_or(direction.worst_value());
            let fb = self.members[b].fitness().unwrap_or(direction.worst_value());
            direction.compare(fb, fa)
        });
        indices
    }

    /// Summary statistics over evaluated members.
    pub fn stats(&self, schema: &ParameterSchema) -> Option<GenerationStats> {
        let direction = schema.direction();
        let fitness: Vec<f64> = self.members.iter().filter_map(|g| g.fitness()).collect();
        if fitness.is_empty() {
            return None;
        }

        let best = fitness
            .iter()
            .copied()
            .reduce(|a, b| if direction.is_better(b, a) { b } else { a })?;
        let worst = fitness
            .iter()
            .copied()
            .reduce(|a, b| if direction.is_better(a, b) { b } else { a })?;
        let mean = fitness.iter().sum::<f64>() / fitness.len() as f64;
        let variance =
            fitness.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / fitness.len() as f64;

        Some(GenerationStats {
            generation: self.generation,
            best_fitness: best,
            mean_fitness: mean,
            worst_fitness: worst,
            fitness_std: variance.sqrt(),
            evaluated: fitness.len(),
            failed: self.members.len() - fitness.len(),
            diversity: self.diversity(schema),
        })
    }

    /// Mean pairwise genome distance.
    pub fn diversity(&self, schema: &ParameterSchema) -> f64 {
        if self.members.len() < 2 {
            return 0.0;
        }

        let mut total_distance = 0.0;
        let mut count = 0;

        for i in 0..self.members.len() {
            for j in (i + 1)..self.members.len() {
                total_distance += genome_distance(schema, &self.members[i], &self.members[j]);
                count += 1;
            }
        }

        total_distance / count as f64
    }

    /// Snapshots of every member.
    pub fn snapshots(&self, schema: &ParameterSchema) -> Vec<CandidateSnapshot> {
        self.members
            .iter()
            .enumerate()
            .map(|(i, g)| g.to_snapshot(schema, self.generation, i))
            .collect()
    }
}
