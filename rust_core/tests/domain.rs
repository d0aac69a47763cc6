use rwfit_core::{
    fit, simulate, FitConfig, LikelihoodKind, ParamPrior, Parameters, PriorFamily, SeedStream,
    TrialSequence,
};

fn assert_inside(fit: &rwfit_core::PosteriorFit, beta_upper: f64) {
    let mut n = 0;
    for chain in &fit.chains {
        for s in &chain.samples {
            let p = s.parameters();
            assert!(p.alpha > 0.0 && p.alpha < 1.0, "alpha {}", p.alpha);
            assert!(p.beta > 0.0 && p.beta < beta_upper, "beta {}", p.beta);
            n += 1;
        }
    }
    assert!(n > 0);
}

fn small(seed: u64) -> FitConfig {
    FitConfig {
        trial_count: 120,
        warmup_count: 150,
        sample_count: 150,
        chain_count: 2,
        seed,
        ..FitConfig::default()
    }
}

#[test]
fn test_draws_stay_inside_open_domain_near_boundaries() {
    // Truth sits close to both the lower alpha bound and the upper beta bound.
    for seed in [1, 2, 3] {
        let config = small(seed);
        let sim = simulate(
            Parameters::new(0.01, 4.95),
            config.beta_max,
            config.trial_count,
            config.observation_sigma,
            config.v_init,
            SeedStream::new(seed),
        )
        .unwrap();
        let result = fit(&config, sim.trials).unwrap();
        assert_inside(&result, config.beta_max);
    }
}

#[test]
fn test_draws_respect_narrowed_prior_bounds() {
    let mut config = small(9);
    config.prior_spec.alpha = ParamPrior {
        family: PriorFamily::ScaledBeta { a: 2.0, b: 2.0 },
        lower: 0.0,
        upper: 1.0,
    };
    config.prior_spec.beta = Some(ParamPrior::uniform(1.0, 2.0));
    let sim = simulate(Parameters::new(0.3, 2.5), 5.0, 120, 0.1, 1.0, SeedStream::new(9)).unwrap();
    let result = fit(&config, sim.trials).unwrap();
    for chain in &result.chains {
        for s in &chain.samples {
            let p = s.parameters();
            assert!(p.beta > 1.0 && p.beta < 2.0, "beta {}", p.beta);
        }
    }
}

#[test]
fn test_beta_likelihood_counts_clipped_rewards() {
    let stimuli: Vec<u8> = (0..60).map(|i| (i % 2) as u8).collect();
    let rewards: Vec<f64> = (0..60)
        .map(|i| match i % 5 {
            0 => 0.0,
            1 => 1.0,
            _ => 0.2 + 0.1 * (i % 3) as f64,
        })
        .collect();
    let trials = TrialSequence::from_columns(&stimuli, &rewards).unwrap();
    let config = FitConfig {
        likelihood: LikelihoodKind::Beta { epsilon: 1e-3 },
        ..small(5)
    };
    let result = fit(&config, trials).unwrap();
    assert_eq!(result.clipped_count, 24);
    assert_inside(&result, config.beta_max);
}
