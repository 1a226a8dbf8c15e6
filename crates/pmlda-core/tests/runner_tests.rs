use pmlda_core::{
    run_chains, ChainSetup, ConfigError, ParallelRunner, RunReport, SamplerConfig, SamplerError,
};
use pmlda_dispatch::ModelEvaluator;
use pmlda_test_utils::{
    gaussian_levels, origin, small_config, ConstantModel, DelayedModel, FailingModel, FailingSink,
    FailureRule, RecordingSink,
};
use pmlda_tree::{GaussianRandomWalk, Level, Outcome, State};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn runner_at(config: SamplerConfig, model: impl ModelEvaluator, initial: State) -> ParallelRunner {
    ParallelRunner::new(
        config,
        Arc::new(model),
        Arc::new(GaussianRandomWalk::new(0.8)),
        initial,
    )
    .unwrap()
}

async fn run_gaussian(config: SamplerConfig) -> RunReport {
    let model = DelayedModel::new(gaussian_levels(config.num_levels()), Duration::from_micros(400));
    runner_at(config, model, origin(2)).run().await.unwrap()
}

fn trajectory(report: &RunReport) -> Vec<(Outcome, Vec<f64>)> {
    report
        .chain
        .links()
        .iter()
        .map(|l| (l.outcome, l.state.as_slice().to_vec()))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chain_is_independent_of_workers_and_width() {
    let base = small_config(3, 60).with_seed(7);

    let serial = run_gaussian(base.clone().with_workers(1).with_max_in_flight(1)).await;
    let narrow = run_gaussian(base.clone().with_workers(2).with_max_in_flight(3)).await;
    let wide = run_gaussian(base.with_workers(4).with_max_in_flight(8)).await;

    assert_eq!(trajectory(&serial), trajectory(&narrow));
    assert_eq!(trajectory(&serial), trajectory(&wide));
    assert!(serial.chain.accepted() > 0);
    assert!(serial.chain.accepted() < serial.chain.len());
}

#[tokio::test]
async fn different_seeds_give_different_chains() {
    let a = run_gaussian(small_config(2, 30).with_seed(1)).await;
    let b = run_gaussian(small_config(2, 30).with_seed(2)).await;
    assert_ne!(trajectory(&a), trajectory(&b));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tree_depth_stays_within_in_flight_bound() {
    for width in [1, 2, 5] {
        let report = run_gaussian(small_config(2, 40).with_max_in_flight(width)).await;
        assert!(report.statistics.max_tree_depth <= width);
        assert_eq!(report.chain.len(), 40);
    }
}

#[tokio::test]
async fn statistics_add_up() {
    let report = run_gaussian(small_config(2, 50)).await;
    let stats = &report.statistics;

    assert_eq!(stats.accepted + stats.rejected, 50);
    assert_eq!(stats.accepted as usize, report.chain.accepted());
    assert!(stats.decisions >= 50);
    assert_eq!(stats.submitted, stats.submitted_per_level.iter().sum::<u64>());
    assert_eq!(report.final_state, *report.chain.last_state());
}

#[tokio::test]
async fn backpressure_is_absorbed() {
    let config = small_config(2, 30)
        .with_workers(1)
        .with_backlog_limit(1)
        .with_max_in_flight(6);
    let model = DelayedModel::new(gaussian_levels(2), Duration::from_micros(200));

    let report = runner_at(config, model, origin(2)).run().await.unwrap();

    assert_eq!(report.chain.len(), 30);
    assert!(report.statistics.backpressure > 0);
}

#[tokio::test]
async fn retries_recover_flaky_evaluations() {
    let config = small_config(2, 25).with_max_evaluation_retries(1);
    let clean = runner_at(config.clone(), gaussian_levels(2), origin(2))
        .run()
        .await
        .unwrap();

    let flaky = FailingModel::new(gaussian_levels(2), FailureRule::Flaky(1));
    let recovered = runner_at(config, flaky, origin(2)).run().await.unwrap();

    assert_eq!(trajectory(&clean), trajectory(&recovered));
    assert_eq!(recovered.statistics.forced_rejections, 0);
    assert!(recovered.statistics.retries > 0);
}

#[tokio::test]
async fn failures_without_retries_force_rejections_but_finish() {
    let flaky = FailingModel::new(gaussian_levels(2), FailureRule::Flaky(1));
    let report = runner_at(small_config(2, 25), flaky, origin(2))
        .run()
        .await
        .unwrap();

    // Every proposal fails its first attempt; the current state is resubmitted.
    assert_eq!(report.chain.len(), 25);
    assert_eq!(report.chain.accepted(), 0);
    assert!(report.statistics.forced_rejections >= 25);
    assert!(report.statistics.retries > 0);
}

#[tokio::test]
async fn failed_proposal_is_rejected_and_later_proposals_accepted() {
    let config = small_config(1, 25).with_workers(1).with_max_in_flight(1);
    let model = FailingModel::new(
        ConstantModel::new(1, 0.0),
        FailureRule::FirstStateOtherThan(origin(2)),
    );
    let report = runner_at(config, model, origin(2)).run().await.unwrap();

    assert_eq!(report.chain.len(), 25);
    assert_eq!(report.statistics.forced_rejections, 1);
    assert_eq!(report.chain.links()[0].outcome, Outcome::Reject);
    assert_eq!(report.chain.accepted(), 24);
}

#[tokio::test]
async fn failed_initial_state_is_resubmitted() {
    let model = FailingModel::new(
        ConstantModel::new(1, 0.0),
        FailureRule::StateTimes(origin(2), 1),
    );
    let report = runner_at(small_config(1, 50), model, origin(2))
        .run()
        .await
        .unwrap();

    assert_eq!(report.chain.len(), 50);
    assert_eq!(report.chain.accepted(), 50);
    assert_eq!(report.statistics.forced_rejections, 0);
    assert_eq!(report.statistics.evaluation_failures, 1);
    assert_eq!(report.statistics.retries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_initial_state_does_not_change_the_chain() {
    let config = small_config(2, 40);
    let clean = runner_at(config.clone(), gaussian_levels(2), origin(2))
        .run()
        .await
        .unwrap();

    let model = FailingModel::new(gaussian_levels(2), FailureRule::StateTimes(origin(2), 2));
    let recovered = runner_at(config, model, origin(2)).run().await.unwrap();

    assert_eq!(trajectory(&clean), trajectory(&recovered));
    assert!(recovered.chain.accepted() > 0);
    assert_eq!(recovered.statistics.forced_rejections, 0);
}

#[tokio::test]
async fn persistently_failing_current_state_aborts() {
    let config = small_config(2, 200).with_workers(1).with_max_in_flight(1);
    let broken = FailingModel::new(ConstantModel::new(2, 0.0), FailureRule::Level(Level(1)));
    let aborted = runner_at(config, broken, origin(2))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        aborted.error,
        SamplerError::CurrentStateUnavailable { .. }
    ));
    assert!(aborted.error.is_fatal());
    assert!(aborted.partial.chain.len() < 200);
    assert_eq!(aborted.partial.chain.accepted(), 0);
}

#[tokio::test]
async fn persistent_proposal_failure_never_accepts() {
    let broken = FailingModel::new(
        ConstantModel::new(2, 0.0),
        FailureRule::LevelOtherThan(Level(1), origin(2)),
    );
    let report = runner_at(small_config(2, 15), broken, origin(2))
        .run()
        .await
        .unwrap();

    assert_eq!(report.chain.len(), 15);
    assert_eq!(report.chain.accepted(), 0);
}

#[tokio::test]
async fn sink_failure_aborts_with_partial_chain() {
    let aborted = runner_at(small_config(1, 20), ConstantModel::new(1, 0.0), origin(2))
        .with_sink(FailingSink::new(3))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(aborted.error, SamplerError::Sink(_)));
    assert!(aborted.error.is_fatal());
    assert_eq!(aborted.partial.chain.len(), 4);
}

#[tokio::test]
async fn restart_continues_from_final_state() {
    let first = run_gaussian(small_config(2, 20)).await;
    let sink = RecordingSink::new();
    let second = runner_at(
        small_config(2, 10).with_seed(43),
        gaussian_levels(2),
        first.final_state.clone(),
    )
    .with_sink(sink.clone())
    .run()
    .await
    .unwrap();

    assert_eq!(second.chain.initial(), &first.final_state);
    assert_eq!(sink.links(), second.chain.links().to_vec());
}

fn increments(report: &RunReport) -> Vec<Vec<f64>> {
    let mut previous = report.chain.initial().clone();
    report
        .chain
        .states()
        .map(|state| {
            let step = state
                .iter()
                .zip(previous.iter())
                .map(|(x, p)| x - p)
                .collect();
            previous = state.clone();
            step
        })
        .collect()
}

#[tokio::test]
async fn resumed_chain_draws_fresh_random_numbers() {
    let flat = || ConstantModel::new(1, 0.0);
    let first = runner_at(small_config(1, 10), flat(), origin(2))
        .run()
        .await
        .unwrap();

    let resumed = runner_at(
        small_config(1, 10).with_start_step(10),
        flat(),
        first.final_state.clone(),
    )
    .run()
    .await
    .unwrap();
    let replayed = runner_at(small_config(1, 10), flat(), first.final_state.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(resumed.chain.links()[0].index, 10);
    assert_eq!(resumed.chain.links()[9].index, 19);
    assert_ne!(increments(&first), increments(&resumed));
    assert_eq!(increments(&first), increments(&replayed));
}

#[tokio::test]
async fn construction_rejects_bad_configuration() {
    let policy = Arc::new(GaussianRandomWalk::new(0.5));

    let mismatch = ParallelRunner::new(
        small_config(3, 10),
        Arc::new(ConstantModel::new(2, 0.0)),
        policy.clone(),
        origin(1),
    );
    assert!(matches!(
        mismatch,
        Err(SamplerError::Configuration(ConfigError::LevelCountMismatch {
            configured: 3,
            model: 2
        }))
    ));

    let no_workers = ParallelRunner::new(
        small_config(1, 10).with_workers(0),
        Arc::new(ConstantModel::new(1, 0.0)),
        policy,
        origin(1),
    );
    assert!(matches!(
        no_workers,
        Err(SamplerError::Configuration(ConfigError::ZeroWorkers))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn independent_chains_use_distinct_seeds() {
    let config = small_config(2, 20);
    let sinks: Vec<RecordingSink> = (0..3).map(|_| RecordingSink::new()).collect();

    let outcomes = run_chains(3, &config, |chain| {
        Ok(ChainSetup::new(
            Arc::new(gaussian_levels(2)),
            Arc::new(GaussianRandomWalk::new(0.8)),
            origin(2),
        )
        .with_sink(sinks[chain].clone()))
    })
    .await
    .unwrap();

    let reports: Vec<RunReport> = outcomes.into_iter().map(Result::unwrap).collect();
    assert_eq!(reports.len(), 3);
    for (chain, report) in reports.iter().enumerate() {
        assert_eq!(report.chain_id, chain);
        assert_eq!(report.chain.len(), 20);
        assert!(report.chain.links().iter().all(|l| l.chain == chain));
        assert_eq!(sinks[chain].len(), 20);
    }
    assert_ne!(reports[0].seed, reports[1].seed);
    assert_ne!(trajectory(&reports[0]), trajectory(&reports[1]));
}

#[tokio::test]
async fn zero_chains_is_a_configuration_error() {
    let result = run_chains(0, &small_config(1, 5), |_| {
        Ok(ChainSetup::new(
            Arc::new(ConstantModel::new(1, 0.0)),
            Arc::new(GaussianRandomWalk::new(0.5)),
            origin(1),
        ))
    })
    .await;

    assert!(matches!(
        result,
        Err(SamplerError::Configuration(ConfigError::NoChains))
    ));
}
