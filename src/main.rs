//! Param Evolve CLI - Run a parameter search from JSON configuration.

use std::fs;
use std::path::PathBuf;

use param_evolve::{
    compute::evolution::{CommandEvaluator, Driver, Evaluator, RetryEvaluator},
    schema::{EvolutionConfig, ParameterKind},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!();
        eprintln!("Evolve simulation parameters from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to run configuration file");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: EvolutionConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    let Some(command) = config.evaluation.command.as_ref() else {
        eprintln!("Error: config has no evaluation.command");
        std::process::exit(1);
    };

    let process = CommandEvaluator::from_config(command);
    let evaluator: Box<dyn Evaluator> = if config.evaluation.max_retries > 0 {
        Box::new(RetryEvaluator::new(process, config.evaluation.max_retries))
    } else {
        Box::new(process)
    };

    println!("Parameter Evolution");
    println!("===================");
    println!("Command: {}", command.program);
    println!("Direction: {:?}", config.schema.direction());
    println!("Parameters:");
    for spec in config.schema.iter() {
        let kind = match spec.kind {
            ParameterKind::Integer => "integer",
            ParameterKind::Continuous => "continuous",
        };
        println!(
            "  {} [{}, {}] ({})",
            spec.name, spec.minimum, spec.maximum, kind
        );
    }
    println!("Population: {}", config.population.size);
    println!("Generations: {}", config.population.max_generations);
    println!();

    let mut driver = Driver::new(config, evaluator).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    println!("Running evolution...");
    let report = driver
        .run_with_callback(|progress| {
            println!(
                "  Generation {}/{}: best={:.6}, mean={:.6}, failed={}, diversity={:.3}",
                progress.generation + 1,
                progress.total_generations,
                progress.best_fitness,
                progress.stats.mean_fitness,
                progress.stats.failed,
                progress.stats.diversity
            );
        })
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        });

    println!();
    println!("Stopped: {:?}", report.stats.stop_reason);
    println!(
        "Best fitness: {:.6} (generation {})",
        report.stats.best_fitness, report.stats.best_generation
    );
    for p in &report.best.parameters {
        println!("  {} = {}", p.name, p.value);
    }
    println!(
        "Evaluations: {} ({} failed), {:.2}s ({:.1} evals/s)",
        report.stats.total_evaluations,
        report.stats.failed_evaluations,
        report.stats.elapsed_seconds,
        report.stats.evaluations_per_second
    );
    println!();

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing report: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_example_config() {
    match serde_json::to_string_pretty(&EvolutionConfig::example()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing example config: {}", e);
            std::process::exit(1);
        }
    }
}
