use approx::assert_relative_eq;
use pkmodel::prelude::*;

const REL_TOL: f64 = 1e-3;
const ABS_TOL: f64 = 1e-6;

fn solve(model: CompartmentModel, protocol: &DoseProtocol, y0: Vec<f64>) -> Trajectory {
    let solution = Solution::new(vec![model], protocol.times().to_vec(), vec![y0])
        .expect("valid solution");
    let mut trajectories = solution.run().expect("integration succeeds");
    trajectories.remove(0)
}

#[test]
fn subcutaneous_steady_dose_matches_bateman() {
    let (dose, k_a, v_c, cl) = (1.0, 2.0, 1.0, 0.5);
    let k = cl / v_c;
    let protocol = DoseProtocol::new(dose, 0.0, 10.0, 201).unwrap();
    let config = CompartmentConfig::new("bateman")
        .with("V_c", v_c)
        .with("CL", cl)
        .with("k_a", k_a);
    let model = CompartmentModel::new(2, config, "sc", protocol.steady_dose()).unwrap();

    let trajectory = solve(model, &protocol, vec![0.0, 0.0]);
    assert_eq!(trajectory.labels(), vec!["bateman q_0", "bateman q_c"]);

    for (i, &t) in trajectory.times().iter().enumerate() {
        let depot = dose / k_a * (1.0 - (-k_a * t).exp());
        let central = dose / k * (1.0 - (-k * t).exp())
            - dose / (k - k_a) * ((-k_a * t).exp() - (-k * t).exp());
        let state = trajectory.state(i).unwrap();
        assert_relative_eq!(state[0], depot, max_relative = REL_TOL, epsilon = ABS_TOL);
        assert_relative_eq!(state[1], central, max_relative = REL_TOL, epsilon = ABS_TOL);
    }
}

#[test]
fn linear_dose_accumulates_without_clearance() {
    let protocol = DoseProtocol::new(2.0, 0.0, 1.0, 1000).unwrap();
    let config = CompartmentConfig::new("ramp").with("V_c", 1.0).with("CL", 0.0);
    let model = CompartmentModel::new(1, config, "iv", protocol.linear_dose()).unwrap();

    let trajectory = solve(model, &protocol, vec![0.0]);
    for (i, &t) in trajectory.times().iter().enumerate() {
        assert_relative_eq!(
            trajectory.states()[(i, 0)],
            t * t,
            max_relative = REL_TOL,
            epsilon = ABS_TOL
        );
    }
}

#[test]
fn distribution_conserves_mass_and_equilibrates() {
    let protocol = DoseProtocol::new(0.0, 0.0, 40.0, 401).unwrap();
    let config = CompartmentConfig::new("closed")
        .with("V_c", 1.0)
        .with("CL", 0.0)
        .with("V_p1", 2.0)
        .with("Q_p1", 1.5)
        .with("V_p2", 0.5)
        .with("Q_p2", 0.8);
    let model = CompartmentModel::new(3, config, "iv", protocol.steady_dose()).unwrap();

    let trajectory = solve(model, &protocol, vec![7.0, 0.0, 0.0]);
    for state in trajectory.states().rows() {
        assert_relative_eq!(state.sum(), 7.0, max_relative = REL_TOL);
        assert!(state.iter().all(|&q| q >= -ABS_TOL));
    }

    // Equal concentrations once distributed: 7 / (1 + 2 + 0.5) = 2 per unit volume
    let last = trajectory.last_state().unwrap();
    assert_relative_eq!(last[0], 2.0, max_relative = REL_TOL);
    assert_relative_eq!(last[1], 4.0, max_relative = REL_TOL);
    assert_relative_eq!(last[2], 1.0, max_relative = REL_TOL);
}

#[test]
fn instantaneous_pulses_deliver_their_quantity() {
    let protocol = DoseProtocol::new(3.0, 0.0, 12.0, 1201).unwrap();
    let pulses = InstantaneousDose::new(0.5, 4.0, 8.0, 0.5).unwrap();
    let config = CompartmentConfig::new("pulses").with("V_c", 1.0).with("CL", 0.0);
    let model =
        CompartmentModel::new(1, config, "iv", protocol.instantaneous_dose(&pulses)).unwrap();

    let trajectory = solve(model, &protocol, vec![0.0]);

    // Both pulses are truncated at three standard deviations
    let within = 0.9973;
    let between = trajectory
        .times()
        .iter()
        .position(|&t| (t - 6.0).abs() < 1e-9)
        .unwrap();
    assert_relative_eq!(
        trajectory.states()[(between, 0)],
        3.0 * within,
        max_relative = 1e-3
    );
    assert_relative_eq!(
        trajectory.last_state().unwrap()[0],
        3.0 * 1.5 * within,
        max_relative = 1e-3
    );
}

#[test]
fn iv_and_sc_models_share_one_grid() {
    let protocol = DoseProtocol::new(2.0, 0.0, 1.0, 1000).unwrap();
    let iv = CompartmentModel::new(
        2,
        CompartmentConfig::new("model1")
            .with("Q_p1", 3.0)
            .with("V_c", 2.0)
            .with("V_p1", 0.1)
            .with("CL", 2.0),
        "iv",
        protocol.linear_dose(),
    )
    .unwrap();
    let sc = CompartmentModel::new(
        2,
        CompartmentConfig::new("iv-2 comp")
            .with("V_c", 1.0)
            .with("CL", 1.0)
            .with("k_a", 5.0),
        "sc",
        protocol.linear_dose(),
    )
    .unwrap();

    let solution = Solution::new(
        vec![iv, sc],
        protocol.times().to_vec(),
        vec![vec![0.0, 0.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let trajectories = solution.run().unwrap();

    assert_eq!(trajectories.len(), 2);
    for trajectory in &trajectories {
        assert_eq!(trajectory.times(), protocol.times());
        assert_eq!(trajectory.states().dim(), (1000, 2));
        assert!(trajectory.states().iter().all(|q| q.is_finite()));
    }
    // Drug only reaches the central compartment through the depot
    let sc = &trajectories[1];
    assert!(sc.last_state().unwrap()[0] > 0.0);
    assert!(sc.last_state().unwrap()[1] > 0.0);
}

#[test]
fn invalid_models_are_rejected() {
    let series = DoseProtocol::default().steady_dose();
    let config = CompartmentConfig::new("m").with("V_c", 1.0).with("CL", 1.0);

    assert!(matches!(
        CompartmentModel::new(0, config.clone(), "iv", series.clone()),
        Err(ModelError::InsufficientComponents { .. })
    ));
    assert!(matches!(
        CompartmentModel::new(1, config.clone(), "im", series.clone()),
        Err(ModelError::InvalidRoute(_))
    ));
    assert!(matches!(
        CompartmentModel::new(2, config.clone(), "iv", series.clone()),
        Err(ModelError::IncorrectlyDefined { expected: 5, found: 3 })
    ));
    assert!(matches!(
        CompartmentModel::new(1, config.with("CL", -1.0), "iv", series),
        Err(ModelError::NegativeParameter { .. })
    ));
}
