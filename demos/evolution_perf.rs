//! Quick evolution performance test

use param_evolve::{
    Driver, EvolutionConfig,
    compute::evolution::{EvaluationError, FnEvaluator},
    schema::{FitnessDirection, ParameterSchema, ParameterSpec, ParameterView, SelectionMethod},
};
use std::time::{Duration, Instant};

/// Rastrigin function with an artificial per-call cost.
fn rastrigin(params: &ParameterView<'_>) -> Result<f64, EvaluationError> {
    std::thread::sleep(Duration::from_millis(2));
    let n = params.len() as f64;
    Ok(10.0 * n
        + params
            .values()
            .iter()
            .map(|x| x * x - 10.0 * (2.0 * std::f64::consts::PI * x).cos())
            .sum::<f64>())
}

fn config(dimensions: usize, size: usize, generations: usize) -> EvolutionConfig {
    let parameters = (0..dimensions)
        .map(|i| ParameterSpec::continuous(format!("x{i}"), -5.12, 5.12))
        .collect();
    let schema = match ParameterSchema::new(parameters, FitnessDirection::Minimize) {
        Ok(schema) => schema,
        Err(e) => {
            eprintln!("Invalid schema: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = EvolutionConfig::new(schema);
    config.population.size = size;
    config.population.max_generations = generations;
    config.algorithm.mutation_rate = 0.2;
    config.algorithm.mutation_strength = 0.3;
    config.algorithm.crossover_rate = 0.8;
    config.algorithm.elitism = 2;
    config.algorithm.selection = SelectionMethod::Tournament { size: 3 };
    config.random_seed = Some(42);
    config
}

fn main() {
    println!("=== Evolution Performance Test ===\n");

    // Test different worker counts
    for workers in [1, 2, 4, 8] {
        println!("Workers: {}", workers);

        let mut config = config(4, 20, 10);
        config.evaluation.parallel_workers = workers;

        let start = Instant::now();
        let report = Driver::new(config, FnEvaluator::new(rastrigin))
            .and_then(|mut driver| driver.run());
        let elapsed = start.elapsed();

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                eprintln!("  Run failed: {}", e);
                continue;
            }
        };

        let total_evals = report.stats.total_evaluations;
        let evals_per_sec = total_evals as f64 / elapsed.as_secs_f64();

        println!("  Generations:    {}", report.stats.generations);
        println!("  Evaluations:    {}", total_evals);
        println!("  Elapsed:        {:.2}s", elapsed.as_secs_f64());
        println!("  Evals/sec:      {:.1}", evals_per_sec);
        println!("  Best fitness:   {:.4}", report.stats.best_fitness);
        println!();
    }

    println!("=== Scalability Test (4 workers) ===\n");

    // Test different population sizes
    for pop_size in [10, 20, 40, 80] {
        let mut config = config(4, pop_size, 5);
        config.evaluation.parallel_workers = 4;

        let start = Instant::now();
        let report = Driver::new(config, FnEvaluator::new(rastrigin))
            .and_then(|mut driver| driver.run());
        let elapsed = start.elapsed();

        match report {
            Ok(report) => {
                let total_evals = report.stats.total_evaluations;
                println!(
                    "Population {}: {} evals in {:.2}s ({:.1} evals/sec)",
                    pop_size,
                    total_evals,
                    elapsed.as_secs_f64(),
                    total_evals as f64 / elapsed.as_secs_f64()
                );
            }
            Err(e) => eprintln!("Population {}: run failed: {}", pop_size, e),
        }
    }
}
