use rwfit_core::{simulate_and_fit, FitConfig};

fn recovery_config(seed: u64) -> FitConfig {
    FitConfig {
        trial_count: 1000,
        true_alpha: Some(0.1),
        true_beta: Some(2.0),
        observation_sigma: 0.1,
        warmup_count: 500,
        sample_count: 1000,
        chain_count: 2,
        seed,
        ..FitConfig::default()
    }
}

#[test]
fn test_posterior_recovers_simulated_parameters_across_seeds() {
    for seed in 1..=5 {
        let config = recovery_config(seed);
        let (sim, fit) = simulate_and_fit(&config).unwrap();
        assert_eq!(sim.trials.len(), 1000);

        let summary = &fit.summary;
        let alpha = summary.param("alpha").unwrap();
        let beta = summary.param("beta").unwrap();
        assert!((alpha.mean - 0.1).abs() < 0.05, "seed {seed}: alpha mean {}", alpha.mean);
        assert!((beta.mean - 2.0).abs() < 0.05, "seed {seed}: beta mean {}", beta.mean);
        assert!(alpha.r_hat.unwrap() < 1.05, "seed {seed}: alpha r_hat {:?}", alpha.r_hat);
        assert!(beta.r_hat.unwrap() < 1.05, "seed {seed}: beta r_hat {:?}", beta.r_hat);

        let recovery = summary.recovery.as_ref().unwrap();
        assert!(recovery.rmse < 0.05, "seed {seed}: rmse {}", recovery.rmse);
        assert_eq!(fit.clipped_count, 0);

        for chain in &fit.chains {
            assert_eq!(chain.sample_count, 1000);
            assert_eq!(chain.warmup_count, 500);
            assert!(!chain.cancelled);
            assert!(chain.step_size > 1e-4, "seed {seed}: step {}", chain.step_size);
        }
    }
}

#[test]
fn test_repeated_fits_are_bit_identical() {
    let config = FitConfig {
        trial_count: 150,
        warmup_count: 100,
        sample_count: 100,
        ..recovery_config(7)
    };
    let (_, a) = simulate_and_fit(&config).unwrap();
    let (_, b) = simulate_and_fit(&config).unwrap();
    for (ca, cb) in a.chains.iter().zip(&b.chains) {
        assert_eq!(ca.samples, cb.samples);
        assert_eq!(ca.step_size, cb.step_size);
    }
}
