//! Generation state machine: elitism, selection, crossover, mutation and
//! termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::schema::{
    EvolutionConfig, EvolutionPhase, FitnessDirection, ParameterSchema, SelectionMethod,
    StopReason,
};

use super::error::RunError;
use super::evaluator::Evaluator;
use super::genome::{Genome, GenomeRng};
use super::population::{EvaluationPool, EvaluationSummary, Population};

/// Evolution engine that owns the current generation and advances it.
///
/// The engine is sequential across generations: a new generation is only bred
/// once the previous one is fully evaluated.
pub struct EvolutionEngine<E> {
    config: EvolutionConfig,
    rng: GenomeRng,
    evaluator: E,
    pool: EvaluationPool,
    population: Option<Population>,
    phase: EvolutionPhase,
    last_summary: EvaluationSummary,
    stagnation_reference: Option<f64>,
    stagnation_count: usize,
    total_evaluations: u64,
    failed_evaluations: u64,
    cancelled: Arc<AtomicBool>,
}

impl<E: Evaluator> EvolutionEngine<E> {
    /// Create a new evolution engine. Fails fast on invalid configuration.
    pub fn new(config: EvolutionConfig, evaluator: E) -> Result<Self, RunError> {
        config.validate()?;

        let seed = config.random_seed.unwrap_or_else(rand::random);
        let rng = GenomeRng::new(seed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let pool = EvaluationPool::new(
            config.evaluation.parallel_workers,
            config.evaluation.timeout_secs.map(Duration::from_secs_f64),
            Arc::clone(&cancelled),
            config.evaluation.max_failure_fraction,
        )?;

        log::debug!(
            "evolution engine seeded with {} ({} evaluation workers)",
            seed,
            pool.workers()
        );

        Ok(Self {
            config,
            rng,
            evaluator,
            pool,
            population: None,
            phase: EvolutionPhase::Initialized,
            last_summary: EvaluationSummary::default(),
            stagnation_reference: None,
            stagnation_count: 0,
            total_evaluations: 0,
            failed_evaluations: 0,
            cancelled,
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.config.schema
    }

    pub fn phase(&self) -> EvolutionPhase {
        self.phase
    }

    /// Latest fully evaluated generation.
    pub fn population(&self) -> Option<&Population> {
        self.population.as_ref()
    }

    /// Evaluation counts of the latest generation.
    pub fn last_summary(&self) -> EvaluationSummary {
        self.last_summary
    }

    pub fn stagnation_count(&self) -> usize {
        self.stagnation_count
    }

    /// Successful and failed evaluator calls so far.
    pub fn evaluation_counts(&self) -> (u64, u64) {
        (self.total_evaluations, self.failed_evaluations)
    }

    /// Create and evaluate generation 0.
    pub fn initialize(&mut self) -> Result<&Population, RunError> {
        let initial = Population::initial(
            self.config.population.size,
            &self.config.schema,
            &mut self.rng,
        );
        self.evaluate(initial)
    }

    /// Breed and evaluate the next generation.
    pub fn step(&mut self) -> Result<&Population, RunError> {
        let Some(current) = self.population.take() else {
            return self.initialize();
        };
        let next = self.breed(&current);
        // Keep the evaluated generation if this one is discarded.
        self.population = Some(current);
        self.evaluate(next)
    }

    fn evaluate(&mut self, population: Population) -> Result<&Population, RunError> {
        self.phase = EvolutionPhase::Evaluating;
        let generation = population.generation();

        let outcome = population.evaluate_all(&self.config.schema, &self.evaluator, &self.pool);
        let (evaluated, summary) = match outcome {
            Ok(result) => result,
            Err(err) => {
                if let RunError::Cancelled { .. } = err {
                    self.phase = EvolutionPhase::Terminated(StopReason::Cancelled);
                }
                return Err(err);
            }
        };

        self.last_summary = summary;
        self.total_evaluations += (summary.attempted - summary.failed) as u64;
        self.failed_evaluations += summary.failed as u64;
        self.track_stagnation(&evaluated);

        log::debug!(
            "generation {} evaluated: {} attempted, {} failed",
            generation,
            summary.attempted,
            summary.failed
        );

        Ok(&*self.population.insert(evaluated))
    }

    fn track_stagnation(&mut self, population: &Population) {
        let direction = self.config.schema.direction();
        let Some(gen_best) = population.best(direction).and_then(Genome::fitness) else {
            return;
        };

        match self.stagnation_reference {
            Some(reference)
                if direction.improvement(reference, gen_best)
                    <= self.config.population.stagnation_epsilon =>
            {
                self.stagnation_count += 1;
            }
            _ => {
                self.stagnation_reference = Some(gen_best);
                self.stagnation_count = 0;
            }
        }
    }

    /// Produce the next (unevaluated except for elites) generation.
    pub fn breed(&mut self, current: &Population) -> Population {
        let ga = &self.config.algorithm;
        let schema = &self.config.schema;
        let direction = schema.direction();
        let size = self.config.population.size;

        self.phase = EvolutionPhase::Selecting;
        let ranked = current.ranked(direction);
        let mut next_gen = Vec::with_capacity(size);

        // Nothing to select from: restart from random samples.
        if ranked.is_empty() {
            log::warn!(
                "generation {} has no evaluated members; resampling",
                current.generation()
            );
            while next_gen.len() < size {
                next_gen.push(self.rng.random_genome(schema));
            }
            return Population::from_members(current.generation() + 1, next_gen);
        }

        // Elitism: keep best individuals
        for &i in ranked.iter().take(ga.elitism) {
            next_gen.push(current.members()[i].clone());
        }

        // Fill rest with offspring
        while next_gen.len() < size {
            self.phase = EvolutionPhase::Selecting;
            let idx1 = select_index(&mut self.rng, current, &ranked, &ga.selection, direction);
            let idx2 = select_index(&mut self.rng, current, &ranked, &ga.selection, direction);
            let parent1 = &current.members()[idx1];
            let parent2 = &current.members()[idx2];

            self.phase = EvolutionPhase::Recombining;
            let mut child = if self.rng.chance(ga.crossover_rate) {
                self.rng.crossover(schema, parent1, parent2)
            } else {
                Genome::from_values(schema, parent1.values())
            };

            self.phase = EvolutionPhase::Mutating;
            self.rng
                .mutate(schema, &mut child, ga.mutation_rate, ga.mutation_strength);

            next_gen.push(child);
        }

        Population::from_members(current.generation() + 1, next_gen)
    }

    /// Check if evolution should stop.
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        let population = self.population.as_ref()?;
        let direction = self.config.schema.direction();

        if let Some(target) = self.config.population.target_fitness
            && let Some(best) = population.best(direction).and_then(Genome::fitness)
            && !direction.is_better(target, best)
        {
            return Some(StopReason::TargetReached);
        }

        if population.generation() + 1 >= self.config.population.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        if let Some(limit) = self.config.population.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        None
    }

    /// Enter the terminal state.
    pub fn terminate(&mut self, reason: StopReason) {
        log::info!("evolution terminated: {:?}", reason);
        self.phase = EvolutionPhase::Terminated(reason);
    }
}

/// Select a parent index using the specified method.
///
/// `ranked` holds the evaluated members best first; unevaluated members are
/// never selected.
fn select_index(
    rng: &mut GenomeRng,
    population: &Population,
    ranked: &[usize],
    method: &SelectionMethod,
    direction: FitnessDirection,
) -> usize {
    match method {
        SelectionMethod::Tournament { size } => {
            // A tournament at least as large as the pool sees every candidate.
            if *size >= ranked.len() {
                return ranked[0];
            }
            let mut best_idx = ranked[rng.index(ranked.len())];
            let mut best_fitness = fitness_of(population, best_idx, direction);
            for _ in 1..*size {
                let idx = ranked[rng.index(ranked.len())];
                let fitness = fitness_of(population, idx, direction);
                if direction.is_better(fitness, best_fitness) {
                    best_fitness = fitness;
                    best_idx = idx;
                }
            }
            best_idx
        }
        SelectionMethod::RankBased => {
            // Probability proportional to rank: best gets n, worst gets 1.
            let n = ranked.len();
            let total_rank = n * (n + 1) / 2;
            let mut target = rng.index(total_rank);
            for (position, &idx) in ranked.iter().enumerate() {
                let rank = n - position;
                if target < rank {
                    return idx;
                }
                target -= rank;
            }
            ranked[0]
        }
    }
}

fn fitness_of(population: &Population, idx: usize, direction: FitnessDirection) -> f64 {
    population.members()[idx]
        .fitness()
        .unwrap_or(direction.worst_value())
}

impl<E> std::fmt::Debug for EvolutionEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionEngine")
            .field("phase", &self.phase)
            .field(
                "generation",
                &self.population.as_ref().map(Population::generation),
            )
            .field("stagnation_count", &self.stagnation_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::{EvaluationError, FnEvaluator};
    use crate::schema::{ParameterSpec, ParameterView};

    type BoxedEval = Box<dyn Evaluator>;

    fn sphere_schema() -> ParameterSchema {
        ParameterSchema::new(
            vec![
                ParameterSpec::continuous("x", -5.0, 5.0),
                ParameterSpec::continuous("y", -5.0, 5.0),
                ParameterSpec::integer("n", 0.0, 10.0),
            ],
            FitnessDirection::Minimize,
        )
        .unwrap()
    }

    fn sphere() -> BoxedEval {
        Box::new(FnEvaluator::new(|p: &ParameterView<'_>| {
            Ok(p.values().iter().map(|v| v * v).sum())
        }))
    }

    fn config(size: usize, generations: usize) -> EvolutionConfig {
        let mut config = EvolutionConfig::new(sphere_schema());
        config.population.size = size;
        config.population.max_generations = generations;
        config.evaluation.parallel_workers = 2;
        config.random_seed = Some(42);
        config
    }

    #[test]
    fn test_evolution_engine_creation() {
        let mut engine = EvolutionEngine::new(config(10, 5), sphere()).unwrap();
        assert_eq!(engine.phase(), EvolutionPhase::Initialized);
        let population = engine.initialize().unwrap();
        assert_eq!(population.len(), 10);
        assert_eq!(population.evaluated_count(), 10);
        assert_eq!(engine.phase(), EvolutionPhase::Evaluating);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config(4, 3);
        cfg.algorithm.elitism = 10;
        assert!(matches!(
            EvolutionEngine::new(cfg, sphere()),
            Err(RunError::Config(_))
        ));
    }

    #[test]
    fn test_population_size_invariant_and_bounds() {
        let mut engine = EvolutionEngine::new(config(12, 20), sphere()).unwrap();
        let schema = engine.schema().clone();
        engine.initialize().unwrap();
        for _ in 0..8 {
            let population = engine.step().unwrap();
            assert_eq!(population.len(), 12);
            for genome in population.members() {
                assert!(schema.accepts(genome.values()));
            }
        }
    }

    #[test]
    fn test_elitism_never_regresses() {
        let mut cfg = config(10, 30);
        cfg.algorithm.elitism = 1;
        cfg.algorithm.mutation_rate = 0.5;
        let mut engine = EvolutionEngine::new(cfg, sphere()).unwrap();
        let direction = engine.schema().direction();

        let mut previous = engine
            .initialize()
            .unwrap()
            .best(direction)
            .and_then(Genome::fitness)
            .unwrap();
        for _ in 0..15 {
            let best = engine
                .step()
                .unwrap()
                .best(direction)
                .and_then(Genome::fitness)
                .unwrap();
            assert!(!direction.is_better(previous, best), "{best} regressed from {previous}");
            previous = best;
        }
    }

    #[test]
    fn test_elites_not_reevaluated() {
        let mut engine = EvolutionEngine::new(config(6, 5), sphere()).unwrap();
        engine.initialize().unwrap();
        engine.step().unwrap();
        assert_eq!(engine.last_summary().attempted, 5);
    }

    #[test]
    fn test_degenerate_tournament_clones_best() {
        let mut cfg = config(6, 5);
        cfg.algorithm.mutation_rate = 0.0;
        cfg.algorithm.selection = SelectionMethod::Tournament { size: 6 };
        let mut engine = EvolutionEngine::new(cfg, sphere()).unwrap();
        let direction = engine.schema().direction();

        let current = engine.initialize().unwrap().clone();
        let best = current.best(direction).unwrap().clone();
        let next = engine.breed(&current);

        assert_eq!(next.len(), 6);
        for child in next.members() {
            assert_eq!(child.values(), best.values());
        }
    }

    #[test]
    fn test_max_generations_one_stops_after_initial() {
        let mut engine = EvolutionEngine::new(config(4, 1), sphere()).unwrap();
        assert_eq!(engine.should_stop(), None);
        engine.initialize().unwrap();
        assert_eq!(engine.should_stop(), Some(StopReason::MaxGenerations));
    }

    #[test]
    fn test_stagnation_fires() {
        let mut cfg = config(5, 100);
        cfg.population.stagnation_limit = Some(3);
        let constant: BoxedEval = Box::new(FnEvaluator::new(|_: &ParameterView<'_>| Ok(1.0)));
        let mut engine = EvolutionEngine::new(cfg, constant).unwrap();

        engine.initialize().unwrap();
        let mut steps = 0;
        while engine.should_stop().is_none() {
            engine.step().unwrap();
            steps += 1;
        }
        assert_eq!(steps, 3);
        assert_eq!(engine.should_stop(), Some(StopReason::Stagnation));
    }

    fn creeping() -> BoxedEval {
        // Every call scores slightly better than the last.
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        Box::new(FnEvaluator::new(move |_: &ParameterView<'_>| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(-(n as f64) * 1e-6)
        }))
    }

    #[test]
    fn test_stagnation_ignores_gains_below_epsilon() {
        let mut cfg = config(5, 100);
        cfg.population.stagnation_limit = Some(3);
        cfg.population.stagnation_epsilon = 0.01;
        let mut engine = EvolutionEngine::new(cfg, creeping()).unwrap();

        engine.initialize().unwrap();
        let mut steps = 0;
        while engine.should_stop().is_none() {
            engine.step().unwrap();
            steps += 1;
        }
        assert_eq!(steps, 3);
        assert_eq!(engine.should_stop(), Some(StopReason::Stagnation));
    }

    #[test]
    fn test_small_gains_reset_stagnation_without_epsilon() {
        let mut cfg = config(5, 100);
        cfg.population.stagnation_limit = Some(3);
        let mut engine = EvolutionEngine::new(cfg, creeping()).unwrap();

        engine.initialize().unwrap();
        for _ in 0..6 {
            engine.step().unwrap();
            assert_eq!(engine.stagnation_count(), 0);
        }
        assert_eq!(engine.should_stop(), None);
    }

    #[test]
    fn test_target_reached() {
        let mut cfg = config(5, 100);
        cfg.population.target_fitness = Some(1000.0);
        let mut engine = EvolutionEngine::new(cfg, sphere()).unwrap();
        engine.initialize().unwrap();
        // Every sphere value is below 1000, which satisfies a minimizing target.
        assert_eq!(engine.should_stop(), Some(StopReason::TargetReached));
    }

    #[test]
    fn test_cancellation() {
        let mut engine = EvolutionEngine::new(config(5, 100), sphere()).unwrap();
        engine.initialize().unwrap();
        let before = engine.population().unwrap().clone();

        engine.cancel_handle().store(true, Ordering::Relaxed);
        assert!(matches!(
            engine.step(),
            Err(RunError::Cancelled { generation: 1 })
        ));
        assert_eq!(
            engine.phase(),
            EvolutionPhase::Terminated(StopReason::Cancelled)
        );
        // The interrupted generation is discarded.
        assert_eq!(engine.population(), Some(&before));
        assert_eq!(engine.should_stop(), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_failed_members_never_selected() {
        let mut cfg = config(8, 5);
        cfg.evaluation.max_failure_fraction = 0.9;
        let picky: BoxedEval = Box::new(FnEvaluator::new(|p: &ParameterView<'_>| {
            if p.values()[0] < 0.0 {
                Err(EvaluationError::Failed("negative x".into()))
            } else {
                Ok(p.values()[0])
            }
        }));
        let mut engine = EvolutionEngine::new(cfg, picky).unwrap();
        let schema = engine.schema().clone();

        let members = [-1.0, -2.0, 3.0, -4.0]
            .iter()
            .map(|&x| Genome::from_values(&schema, &[x, 0.0, 0.0]))
            .collect();
        let (population, _) = Population::from_members(0, members)
            .evaluate_all(&schema, &engine.evaluator, &engine.pool)
            .unwrap();
        let ranked = population.ranked(schema.direction());
        assert_eq!(ranked, vec![2]);

        for _ in 0..50 {
            let idx = select_index(
                &mut engine.rng,
                &population,
                &ranked,
                &SelectionMethod::Tournament { size: 2 },
                schema.direction(),
            );
            assert_eq!(idx, 2);
        }
    }

    #[test]
    fn test_rank_based_selection_prefers_best() {
        let schema = sphere_schema();
        let members = (0..5)
            .map(|i| Genome::from_values(&schema, &[0.0, 0.0, 0.0]).with_fitness(i as f64))
            .collect();
        let population = Population::from_members(0, members);
        let ranked = population.ranked(FitnessDirection::Minimize);
        let mut rng = GenomeRng::new(9);

        let mut counts = [0usize; 5];
        for _ in 0..3000 {
            let idx = select_index(
                &mut rng,
                &population,
                &ranked,
                &SelectionMethod::RankBased,
                FitnessDirection::Minimize,
            );
            counts[idx] += 1;
        }
        assert!(counts[0] > counts[4]);
    }
}
