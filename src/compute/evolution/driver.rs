//! Run loop: initialize, evaluate, check termination, step, report.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use crate::schema::{
    CandidateSnapshot, EvolutionConfig, EvolutionHistory, EvolutionProgress, EvolutionReport,
    EvolutionStats, StopReason,
};

use super::archive::{GenerationRecord, RunArchive};
use super::error::RunError;
use super::evaluator::Evaluator;
use super::population::Population;
use super::search::EvolutionEngine;

/// Runs an [`EvolutionEngine`] to completion and collects the report.
#[derive(Debug)]
pub struct Driver<E> {
    engine: EvolutionEngine<E>,
    archive: RunArchive,
    history: EvolutionHistory,
    best: Option<CandidateSnapshot>,
}

impl<E: Evaluator> Driver<E> {
    /// Validate the configuration and bind the evaluator.
    pub fn new(config: EvolutionConfig, evaluator: E) -> Result<Self, RunError> {
        let engine = EvolutionEngine::new(config, evaluator)?;
        let archive = RunArchive::from_config(&engine.config().archive)?;
        Ok(Self {
            engine,
            archive,
            history: EvolutionHistory::default(),
            best: None,
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.engine.cancel_handle()
    }

    pub fn engine(&self) -> &EvolutionEngine<E> {
        &self.engine
    }

    pub fn archive(&self) -> &RunArchive {
        &self.archive
    }

    /// Run evolution (blocking).
    pub fn run(&mut self) -> Result<EvolutionReport, RunError> {
        self.run_with_callback(|_| {})
    }

    /// Run evolution, reporting after every evaluated generation.
    ///
    /// Cancellation before the initial generation is evaluated is an error;
    /// later cancellation ends the run with [`StopReason::Cancelled`] and the
    /// best candidate found so far.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<EvolutionReport, RunError>
    where
        F: FnMut(&EvolutionProgress),
    {
        let start_time = Instant::now();
        self.history = EvolutionHistory::default();
        self.best = None;

        let mut outcome = self.engine.initialize().map(Population::clone);

        let stop_reason = loop {
            let population = match outcome {
                Ok(population) => population,
                Err(RunError::Cancelled { generation }) if self.best.is_some() => {
                    log::info!("cancelled while evaluating generation {}", generation);
                    break StopReason::Cancelled;
                }
                Err(err) => return Err(err),
            };

            let progress = self.observe(&population)?;
            callback(&progress);

            if let Some(reason) = self.engine.should_stop() {
                break reason;
            }

            outcome = self.engine.step().map(Population::clone);
        };

        self.engine.terminate(stop_reason);
        let report = self.report(stop_reason, start_time.elapsed().as_secs_f64())?;

        if self.archive.output_dir().is_some() {
            let path = self.archive.save_report(&report)?;
            log::info!("report written to {}", path.display());
        }

        Ok(report)
    }

    /// Record an evaluated generation and update the best-so-far.
    fn observe(&mut self, population: &Population) -> Result<EvolutionProgress, RunError> {
        let schema = self.engine.schema();
        let direction = schema.direction();
        let generation = population.generation();

        let stats = population
            .stats(schema)
            .ok_or(RunError::PopulationCollapse {
                generation,
                failed: population.len(),
                attempted: population.len(),
            })?;

        // Strictly better replaces; the earliest of equals is kept.
        if let Some(index) = population.best_index(direction)
            && let Some(fitness) = population.members()[index].fitness()
        {
            let improved = match self.best.as_ref().and_then(|b| b.fitness) {
                Some(best) => direction.is_better(fitness, best),
                None => true,
            };
            if improved {
                self.best = Some(population.members()[index].to_snapshot(schema, generation, index));
            }
        }

        log::info!(
            "generation {}: best={:.6} mean={:.6} failed={} diversity={:.3}",
            generation,
            stats.best_fitness,
            stats.mean_fitness,
            stats.failed,
            stats.diversity
        );

        self.history.push(stats.clone());
        self.archive.record(GenerationRecord {
            generation,
            stats: stats.clone(),
            members: population.snapshots(schema),
        })?;

        let best_candidate = self.best.clone().ok_or(RunError::PopulationCollapse {
            generation,
            failed: population.len(),
            attempted: population.len(),
        })?;

        Ok(EvolutionProgress {
            generation,
            total_generations: self.engine.config().population.max_generations,
            best_fitness: best_candidate.fitness.unwrap_or(stats.best_fitness),
            stats,
            stagnation_count: self.engine.stagnation_count(),
            best_candidate,
            phase: self.engine.phase(),
        })
    }

    fn report(&self, stop_reason: StopReason, elapsed: f64) -> Result<EvolutionReport, RunError> {
        let best = self.best.clone().ok_or(RunError::Cancelled { generation: 0 })?;
        let (total_evaluations, failed_evaluations) = self.engine.evaluation_counts();

        Ok(EvolutionReport {
            stats: EvolutionStats {
                generations: self.history.len(),
                total_evaluations,
                failed_evaluations,
                best_fitness: best.fitness.unwrap_or(f64::NAN),
                best_generation: best.generation,
                elapsed_seconds: elapsed,
                evaluations_per_second: if elapsed > 0.0 {
                    total_evaluations as f64 / elapsed
                } else {
                    0.0
                },
                stop_reason,
            },
            best,
            history: self.history.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::{EvaluationError, FnEvaluator, load_report};
    use crate::schema::{FitnessDirection, ParameterSchema, ParameterSpec, ParameterView};
    use std::sync::atomic::Ordering;

    type BoxedEval = Box<dyn Evaluator>;

    fn identity() -> BoxedEval {
        Box::new(FnEvaluator::new(|p: &ParameterView<'_>| {
            Ok(p.get("x").unwrap_or(0.0))
        }))
    }

    fn sphere() -> BoxedEval {
        Box::new(FnEvaluator::new(|p: &ParameterView<'_>| {
            Ok(p.values().iter().map(|v| v * v).sum())
        }))
    }

    fn integer_config(size: usize, generations: usize) -> EvolutionConfig {
        let schema = ParameterSchema::new(
            vec![ParameterSpec::integer("x", 0.0, 10.0)],
            FitnessDirection::Maximize,
        )
        .unwrap();
        let mut config = EvolutionConfig::new(schema);
        config.population.size = size;
        config.population.max_generations = generations;
        config.evaluation.parallel_workers = 2;
        config.random_seed = Some(11);
        config
    }

    fn sphere_config(seed: u64) -> EvolutionConfig {
        let schema = ParameterSchema::new(
            vec![
                ParameterSpec::continuous("x", -5.0, 5.0),
                ParameterSpec::continuous("y", -5.0, 5.0),
            ],
            FitnessDirection::Minimize,
        )
        .unwrap();
        let mut config = EvolutionConfig::new(schema);
        config.population.size = 16;
        config.population.max_generations = 12;
        config.evaluation.parallel_workers = 4;
        config.random_seed = Some(seed);
        config
    }

    #[test]
    fn test_single_generation_picks_best_sample() {
        let mut driver = Driver::new(integer_config(4, 1), identity()).unwrap();
        let report = driver.run().unwrap();

        let sampled = &driver.archive().get(0).unwrap().members;
        let max = sampled.iter().filter_map(|m| m.get("x")).fold(f64::MIN, f64::max);

        assert_eq!(report.best.get("x"), Some(max));
        assert_eq!(report.stats.best_fitness, max);
        assert_eq!(report.stats.generations, 1);
        assert_eq!(report.stats.total_evaluations, 4);
        assert_eq!(report.stats.stop_reason, StopReason::MaxGenerations);
    }

    #[test]
    fn test_population_collapse() {
        let failing: BoxedEval = Box::new(FnEvaluator::new(|_: &ParameterView<'_>| {
            Err(EvaluationError::Failed("model crashed".into()))
        }));
        let mut driver = Driver::new(integer_config(10, 5), failing).unwrap();
        assert!(matches!(
            driver.run(),
            Err(RunError::PopulationCollapse {
                generation: 0,
                failed: 10,
                attempted: 10
            })
        ));
    }

    #[test]
    fn test_same_seed_same_report() {
        let a = Driver::new(sphere_config(5), sphere()).unwrap().run().unwrap();
        let b = Driver::new(sphere_config(5), sphere()).unwrap().run().unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_best_is_historical_best() {
        let mut config = sphere_config(8);
        config.algorithm.elitism = 0;
        config.algorithm.mutation_rate = 1.0;
        config.algorithm.mutation_strength = 0.5;
        let report = Driver::new(config, sphere()).unwrap().run().unwrap();

        let min = report.history.best_fitness().fold(f64::INFINITY, f64::min);
        assert_eq!(report.stats.best_fitness, min);
        assert_eq!(
            report.history.generations[report.stats.best_generation].best_fitness,
            min
        );
    }

    #[test]
    fn test_cancel_before_start() {
        let mut driver = Driver::new(sphere_config(1), sphere()).unwrap();
        driver.cancel_handle().store(true, Ordering::Relaxed);
        assert!(matches!(
            driver.run(),
            Err(RunError::Cancelled { generation: 0 })
        ));
    }

    #[test]
    fn test_cancel_between_generations() {
        let mut driver = Driver::new(sphere_config(2), sphere()).unwrap();
        let handle = driver.cancel_handle();
        let mut seen = Vec::new();

        let report = driver
            .run_with_callback(|progress| {
                seen.push(progress.generation);
                if progress.generation == 2 {
                    handle.store(true, Ordering::Relaxed);
                }
            })
            .unwrap();

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(report.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(report.history.len(), 3);
    }

    #[test]
    fn test_stagnation_report() {
        let mut config = integer_config(5, 50);
        config.population.stagnation_limit = Some(2);
        let constant: BoxedEval = Box::new(FnEvaluator::new(|_: &ParameterView<'_>| Ok(4.0)));
        let report = Driver::new(config, constant).unwrap().run().unwrap();

        assert_eq!(report.stats.stop_reason, StopReason::Stagnation);
        assert_eq!(report.stats.generations, 3);
        assert_eq!(report.stats.best_generation, 0);
    }

    #[test]
    fn test_progress_tracks_best_so_far() {
        let mut driver = Driver::new(sphere_config(3), sphere()).unwrap();
        let mut previous = f64::INFINITY;
        driver
            .run_with_callback(|progress| {
                assert!(progress.best_fitness <= previous);
                assert!(progress.best_fitness <= progress.stats.best_fitness);
                assert_eq!(progress.total_generations, 12);
                previous = progress.best_fitness;
            })
            .unwrap();
    }

    #[test]
    fn test_writes_archive_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = integer_config(4, 3);
        config.archive.output_dir = Some(dir.path().to_string_lossy().into_owned());

        let report = Driver::new(config, identity()).unwrap().run().unwrap();

        for generation in 0..3 {
            assert!(
                dir.path()
                    .join(format!("generation_{generation:04}.json"))
                    .exists()
            );
        }
        let loaded = load_report(dir.path().join("report.json")).unwrap();
        assert_eq!(loaded.best, report.best);
    }
}
