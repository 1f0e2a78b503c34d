use basinfield_core::{BasinDetector, PerturbationMode, Simulation, SimulationParameters};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(fallback)
}

fn seeded(grid_size: usize) -> Simulation {
    let params = SimulationParameters {
        grid_size,
        initial_noise: 0.4,
        seed: 0xBEEF,
        ..SimulationParameters::default()
    };
    let mut sim = Simulation::new(params).expect("simulation");
    let center = (grid_size / 2) as i64;
    sim.apply_perturbation(&PerturbationMode::default(), center, center);
    sim
}

fn bench_simulation_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation_step");
    group.sample_size(env_or("BF_BENCH_SAMPLES", 20_usize).max(10));
    group.warm_up_time(Duration::from_secs(env_or("BF_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("BF_BENCH_MEASURE_SECS", 8)));
    let steps: usize = env_or("BF_BENCH_STEPS", 16_usize).max(1);
    let grids: Vec<usize> = std::env::var("BF_BENCH_GRIDS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![128_usize, 300, 512]);

    for &grid in &grids {
        group.bench_function(format!("steps{steps}_grid{grid}"), |b| {
            b.iter_batched(
                || seeded(grid),
                |mut sim| {
                    for _ in 0..steps {
                        sim.step();
                    }
                    sim
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_basin_labeling(c: &mut Criterion) {
    let sim = seeded(300);
    let detector = BasinDetector::new();
    c.bench_function("basin_label_grid300", |b| {
        b.iter(|| detector.label(sim.field()));
    });
}

criterion_group!(benches, bench_simulation_steps, bench_basin_labeling);
criterion_main!(benches);
