use criterion::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use pkmodel::prelude::*;

fn protocol() -> DoseProtocol {
    DoseProtocol::new(2.0, 0.0, 24.0, 1000).unwrap()
}

fn two_compartment_iv() {
    let protocol = protocol();
    let config = CompartmentConfig::new("iv")
        .with("V_c", 1.0)
        .with("CL", 1.0)
        .with("V_p1", 1.0)
        .with("Q_p1", 1.0);
    let model = CompartmentModel::new(2, config, "iv", protocol.linear_dose()).unwrap();
    let solution =
        Solution::new(vec![model], protocol.times().to_vec(), vec![vec![0.0; 2]]).unwrap();
    black_box(solution.run().unwrap());
}

fn three_compartment_sc(method: Method) {
    let protocol = protocol();
    let config = CompartmentConfig::new("sc")
        .with("V_c", 1.0)
        .with("CL", 1.0)
        .with("k_a", 0.8)
        .with("V_p1", 2.0)
        .with("Q_p1", 0.5);
    let dose = protocol.instantaneous_dose(&InstantaneousDose::default());
    let model = CompartmentModel::new(3, config, "sc", dose).unwrap();
    let solution = Solution::new(vec![model], protocol.times().to_vec(), vec![vec![0.0; 3]])
        .unwrap()
        .with_settings(SolverSettings {
            method,
            ..Default::default()
        });
    black_box(solution.run().unwrap());
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("two_compartment_iv", |b| b.iter(|| two_compartment_iv()));
    c.bench_function("three_compartment_sc_tr_bdf2", |b| {
        b.iter(|| three_compartment_sc(Method::TrBdf2))
    });
    c.bench_function("three_compartment_sc_bdf", |b| {
        b.iter(|| three_compartment_sc(Method::Bdf))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
