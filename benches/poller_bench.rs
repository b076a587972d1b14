// Benchmark for the contact poller tick
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use krusty_zprobe::config::SimulatorConfig;
use krusty_zprobe::motion::MotionSystem;
use krusty_zprobe::probe::{ContactPoller, ProbeInput, ProbeSession};
use krusty_zprobe::simulator::{SimMachine, SimProbePin};
use std::sync::Arc;

fn bench_poller_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = SimulatorConfig {
        start: [0.0, 0.0, 10.0],
        bed_height: -1000.0,
    };
    let machine = Arc::new(SimMachine::new(&config, false));
    let pin = Arc::new(SimProbePin::new(machine.clone()));
    let input = Arc::new(ProbeInput::new("P1.28".parse().unwrap(), pin));
    let session = Arc::new(ProbeSession::new());
    let poller = ContactPoller::new(input, session.clone(), machine.clone(), 100);

    c.bench_function("poller tick (idle)", |b| b.iter(|| poller.tick()));

    // A slow move that outlasts the benchmark.
    rt.block_on(async {
        machine.delta_move([0.0, 0.0, -500.0], 0.01).await.unwrap();
    });
    let _guard = session.arm(0).unwrap();
    c.bench_function("poller tick (armed, moving)", |b| b.iter(|| poller.tick()));
}

criterion_group!(benches, bench_poller_tick);
criterion_main!(benches);
