use criterion::{Criterion, criterion_group, criterion_main};
use rand::{SeedableRng, distributions::Uniform, prelude::Distribution, rngs::StdRng};
use statevector_simulator::{StateVector, gates};
use std::hint::black_box;

const SEED: u64 = 1000;
const NUM_QUBITS: usize = 12;

fn random_layers(num_layers: usize) -> Vec<(String, Vec<usize>)> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let qubit = Uniform::new(0, NUM_QUBITS);
    let kind = Uniform::new(0, 6usize);
    let mut ops = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        let q = qubit.sample(&mut rng);
        match kind.sample(&mut rng) {
            0 => ops.push(("h".to_string(), vec![q])),
            1 => ops.push(("x".to_string(), vec![q])),
            2 => ops.push(("s".to_string(), vec![q])),
            3 => ops.push(("t".to_string(), vec![q])),
            4 => ops.push(("z".to_string(), vec![q])),
            _ => {
                let other = (q + 1) % NUM_QUBITS;
                ops.push(("cx".to_string(), vec![q, other]));
            }
        }
    }
    ops
}

fn sim_1k_gates(c: &mut Criterion) {
    const NUM_GATES: usize = 1_000;
    let ops = random_layers(NUM_GATES);
    c.bench_function("1k gates", |b| {
        b.iter(|| {
            let mut state = StateVector::new(NUM_QUBITS);
            for (name, qubits) in &ops {
                let gate = gates::resolve(name, &[]).expect("gate should resolve");
                let (controls, targets) = qubits.split_at(gate.num_controls);
                state.apply_controlled(&gate.matrix, controls, targets);
            }
            black_box(state.norm_squared())
        });
    });
}

criterion_group!(benches, sim_1k_gates);
criterion_main!(benches);
