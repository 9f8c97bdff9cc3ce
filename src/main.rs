//! Optimization client CLI - Run one optimization from a JSON run file.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use optim_client::{
    schema::RunConfig,
    session::{InputError, Notification, RunOutcome, SessionManager},
    transport::native::NativeTransport,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <run.json>", args[0]);
        eprintln!();
        eprintln!("Run one optimization on the backend from a JSON run file.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  run.json  Path to run configuration file");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let run_path = PathBuf::from(&args[1]);
    let run = RunConfig::from_path(&run_path).unwrap_or_else(|e| {
        eprintln!("Error loading {}: {}", run_path.display(), e);
        std::process::exit(1);
    });

    let tab = run.method;
    let transport = NativeTransport::new(run.client.backend_url.clone());
    let mut manager = SessionManager::new(run.client.clone(), transport).unwrap_or_else(|e| {
        eprintln!("Error in client configuration: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = prepare(&mut manager, &run) {
        eprintln!("Error in run configuration: {}", e);
        std::process::exit(1);
    }

    let session = manager.registry().get(tab);
    let bounds = session.bounds.normalized();
    println!("Optimization Client");
    println!("===================");
    println!("Backend: {}", manager.config().backend_url);
    println!("Method: {}", tab);
    if let Some(objective) = &session.objective {
        println!("Function: {}", objective.canonical_text());
    }
    println!(
        "Bounds: x in [{}, {}], y in [{}, {}]",
        bounds.lower_x, bounds.upper_x, bounds.lower_y, bounds.upper_y
    );
    println!("Iterations: {}", run.settings.iterations_count);
    println!("Population: {}", run.settings.population_size);
    println!();

    if let Err(e) = manager.start(tab) {
        eprintln!("Error starting optimization: {}", e);
        std::process::exit(1);
    }

    println!("Running optimization...");
    let start = Instant::now();
    let total = run.settings.iterations_count;
    let report_every = (total / 10).max(1);

    while manager.registry().get(tab).is_active() {
        for event in manager.transport_mut().poll(Duration::from_millis(100)) {
            for notification in manager.dispatch(event) {
                match notification {
                    // Print progress every 10%
                    Notification::Snapshot { snapshot, .. }
                        if snapshot.iteration % report_every == 0 || snapshot.iteration == total =>
                    {
                        let elapsed = start.elapsed().as_secs_f32();
                        println!(
                            "  Iteration {}/{}: best={:.6}, population={}, {:.1} it/s",
                            snapshot.iteration,
                            total,
                            snapshot.best_fitness.unwrap_or(f64::NAN),
                            snapshot.population.len(),
                            snapshot.iteration as f32 / elapsed.max(f32::EPSILON)
                        );
                    }
                    Notification::Status { text, .. } => log::debug!("{text}"),
                    _ => {}
                }
            }
        }
    }

    let elapsed = start.elapsed();
    let session = manager.registry().get(tab);

    println!();
    println!("Result: {}", session.status_text());
    println!("Iterations received: {}", session.history.len());
    let snapshot = &session.snapshot;
    if let (Some(fitness), Some([x, y])) = (snapshot.best_fitness, snapshot.best_solution) {
        println!("Best fitness: {:.6}", fitness);
        println!("Best solution: ({:.6}, {:.6})", x, y);
    }
    println!("Time: {:.2}s", elapsed.as_secs_f32());

    if session.outcome != Some(RunOutcome::Completed) {
        std::process::exit(1);
    }
}

/// Apply the run's objective, bounds, settings and parameters to its tab.
fn prepare(
    manager: &mut SessionManager<NativeTransport>,
    run: &RunConfig,
) -> Result<(), InputError> {
    let tab = run.method;
    manager.set_objective_text(tab, &run.function)?;
    manager.set_bounds(tab, run.bounds)?;
    manager.configure_run(tab, run.settings, run.params.clone())?;
    manager.show_tab(tab);
    Ok(())
}

fn print_example_config() {
    let run = RunConfig::default();

    println!("Example configuration (run.json):");
    match serde_json::to_string_pretty(&run) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}
