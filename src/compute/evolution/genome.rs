//! Genome representation and manipulation for evolutionary search.
//!
//! Provides random generation, crossover, and mutation operations.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{CandidateSnapshot, ParameterSchema, ParameterValue, ParameterView};

use super::evaluator::{EvaluationContext, EvaluationError, Evaluator, evaluate_checked};

/// A candidate parameter assignment, positionally aligned with the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    values: Vec<f64>,
    fitness: Option<f64>,
}

impl Genome {
    /// Build an unevaluated genome, clamping every value into its bounds.
    pub fn from_values(schema: &ParameterSchema, values: &[f64]) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        let values = schema
            .iter()
            .zip(values)
            .map(|(spec, &v)| spec.clamp(v))
            .collect();
        Self {
            values,
            fitness: None,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }

    /// Named view for evaluators.
    pub fn params<'a>(&'a self, schema: &'a ParameterSchema) -> ParameterView<'a> {
        ParameterView::new(schema, &self.values)
    }

    /// Return an evaluated copy. Already-evaluated genomes are returned
    /// unchanged without calling the evaluator.
    pub fn evaluated<E: Evaluator + ?Sized>(
        &self,
        schema: &ParameterSchema,
        evaluator: &E,
        ctx: &EvaluationContext,
    ) -> Result<Genome, EvaluationError> {
        if self.is_evaluated() {
            return Ok(self.clone());
        }
        let fitness = evaluate_checked(evaluator, &self.params(schema), ctx)?;
        Ok(self.with_fitness(fitness))
    }

    pub(crate) fn with_fitness(&self, fitness: f64) -> Genome {
        Genome {
            values: self.values.clone(),
            fitness: Some(fitness),
        }
    }

    /// Convert to snapshot for serialization.
    pub fn to_snapshot(
        &self,
        schema: &ParameterSchema,
        generation: usize,
        index: usize,
    ) -> CandidateSnapshot {
        CandidateSnapshot {
            generation,
            index,
            fitness: self.fitness,
            parameters: schema
                .iter()
                .zip(&self.values)
                .map(|(spec, &value)| ParameterValue {
                    name: spec.name.clone(),
                    value,
                })
                .collect(),
        }
    }
}

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a random genome within the schema's bounds.
    pub fn random_genome(&mut self, schema: &ParameterSchema) -> Genome {
        let values = schema.iter().map(|spec| spec.sample(&mut self.rng)).collect();
        Genome {
            values,
            fitness: None,
        }
    }

    /// Gaussian mutation: add noise scaled to the parameter's range.
    pub fn gaussian_mutate(&mut self, value: f64, strength: f64, range: f64) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        value + noise * strength * range
    }

    /// Uniform arithmetic crossover with a fresh weight per parameter.
    pub fn crossover(
        &mut self,
        schema: &ParameterSchema,
        parent1: &Genome,
        parent2: &Genome,
    ) -> Genome {
        let values = schema
            .iter()
            .zip(parent1.values.iter().zip(&parent2.values))
            .map(|(spec, (&a, &b))| {
                let t = self.rng.r#gen::<f64>();
                spec.clamp(blend(a, b, t))
            })
            .collect();

        Genome {
            values,
            fitness: None,
        }
    }

    /// Mutate a genome in place. Any existing fitness is discarded.
    pub fn mutate(
        &mut self,
        schema: &ParameterSchema,
        genome: &mut Genome,
        rate: f64,
        strength: f64,
    ) {
        genome.fitness = None;
        for (spec, value) in schema.iter().zip(genome.values.iter_mut()) {
            if self.rng.r#gen::<f64>() < rate {
                *value = spec.clamp(self.gaussian_mutate(*value, strength, spec.range()));
            }
        }
    }

    /// Uniform index in `0..len`.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Bernoulli trial.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.rng.r#gen::<f64>() < probability
    }
}

/// Linear blend between two values; exact when `a == b`.
fn blend(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Mean range-normalized distance between two genomes.
pub fn genome_distance(schema: &ParameterSchema, g1: &Genome, g2: &Genome) -> f64 {
    if schema.is_empty() {
        return 0.0;
    }

    let total: f64 = schema
        .iter()
        .zip(g1.values.iter().zip(&g2.values))
        .map(|(spec, (a, b))| {
            let range = spec.range();
            if range > 0.0 {
                (a - b).abs() / range
            } else {
                0.0
            }
        })
        .sum();

    total / schema.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::FnEvaluator;
    use crate::schema::{FitnessDirection, ParameterSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> ParameterSchema {
        ParameterSchema::new(
            vec![
                ParameterSpec::continuous("alpha", -5.0, 5.0),
                ParameterSpec::integer("steps", 1.0, 20.0),
                ParameterSpec::continuous("beta", 0.0, 0.01),
            ],
            FitnessDirection::Maximize,
        )
        .unwrap()
    }

    #[test]
    fn test_random_genome() {
        let mut rng = GenomeRng::new(42);
        let schema = schema();

        let genome = rng.random_genome(&schema);
        assert_eq!(genome.values().len(), 3);
        assert!(schema.accepts(genome.values()));
        assert!(!genome.is_evaluated());
    }

    #[test]
    fn test_crossover_stays_in_bounds() {
        let mut rng = GenomeRng::new(7);
        let schema = schema();

        for _ in 0..200 {
            let g1 = rng.random_genome(&schema);
            let g2 = rng.random_genome(&schema);
            let child = rng.crossover(&schema, &g1, &g2);
            assert!(schema.accepts(child.values()));
            for (i, v) in child.values().iter().enumerate() {
                let lo = g1.values()[i].min(g2.values()[i]);
                let hi = g1.values()[i].max(g2.values()[i]);
                // Integer rounding can step at most half a unit outside the parents.
                assert!(*v >= lo - 0.5 && *v <= hi + 0.5);
            }
        }
    }

    #[test]
    fn test_crossover_with_self_is_identity() {
        let mut rng = GenomeRng::new(3);
        let schema = schema();
        let g = rng.random_genome(&schema);
        let child = rng.crossover(&schema, &g, &g);
        assert_eq!(child.values(), g.values());
    }

    #[test]
    fn test_mutation_stays_in_bounds() {
        let mut rng = GenomeRng::new(42);
        let schema = schema();

        for _ in 0..200 {
            let mut genome = rng.random_genome(&schema);
            // Strong mutation pushes values far out of range before clamping.
            rng.mutate(&schema, &mut genome, 1.0, 5.0);
            assert!(schema.accepts(genome.values()));
        }
    }

    #[test]
    fn test_zero_rate_mutation_is_noop() {
        let mut rng = GenomeRng::new(42);
        let schema = schema();
        let genome = rng.random_genome(&schema);
        let mut mutated = genome.clone();
        rng.mutate(&schema, &mut mutated, 0.0, 1.0);
        assert_eq!(genome, mutated);
    }

    #[test]
    fn test_evaluate_once() {
        let schema = schema();
        let calls = AtomicUsize::new(0);
        let eval = FnEvaluator::new(|p: &ParameterView<'_>| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(p.get("alpha").unwrap_or(0.0))
        });
        let ctx = EvaluationContext::unbounded();

        let genome = Genome::from_values(&schema, &[1.5, 3.0, 0.005]);
        let evaluated = genome.evaluated(&schema, &eval, &ctx).unwrap();
        assert_eq!(evaluated.fitness(), Some(1.5));

        let again = evaluated.evaluated(&schema, &eval, &ctx).unwrap();
        assert_eq!(again, evaluated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_evaluation_leaves_genome_unset() {
        let schema = schema();
        let eval = FnEvaluator::new(|_: &ParameterView<'_>| {
            Err(EvaluationError::Failed("crashed".into()))
        });
        let genome = Genome::from_values(&schema, &[0.0, 1.0, 0.0]);
        let ctx = EvaluationContext::unbounded();
        assert!(genome.evaluated(&schema, &eval, &ctx).is_err());
        assert!(!genome.is_evaluated());
    }

    #[test]
    fn test_genome_distance() {
        let mut rng = GenomeRng::new(42);
        let schema = schema();

        let g1 = rng.random_genome(&schema);
        let g2 = g1.clone();
        let g3 = rng.random_genome(&schema);

        assert!(genome_distance(&schema, &g1, &g2).abs() < 1e-12);
        assert!(genome_distance(&schema, &g1, &g3) > 0.0);
        assert!(genome_distance(&schema, &g1, &g3) <= 1.0);
    }

    #[test]
    fn test_snapshot_names() {
        let schema = schema();
        let genome = Genome::from_values(&schema, &[1.0, 2.0, 0.001]).with_fitness(9.0);
        let snap = genome.to_snapshot(&schema, 3, 1);
        assert_eq!(snap.get("steps"), Some(2.0));
        assert_eq!(snap.fitness, Some(9.0));
        assert_eq!(snap.generation, 3);
    }
}
