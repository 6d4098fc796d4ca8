use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use tokenweave::core::monitor::{
    find_property, ERROR_BOUNCE_REFLECTED, ERROR_BOUNCE_TRANSLATED, PARALLELIZE_SENT_JOBS,
};
use tokenweave::{
    parse_stack_config, ActivityRegistry, Completion, ConfigFormat, DispatchError, DispatchLayer,
    DispatchOutput, DispatchStack, DispatchStackBuilder, ErrorBounce, ErrorEvent, FailureKind,
    IterationSink, IterationStrategy, LayerConfig, Parallelize, ParallelizeConfig, PortSpec, ProcessorSpec,
    ReferenceService,
};

use super::helpers::{
    answer, index, job, next_output, outputs_until_final, references, Concat, Condition, Flaky,
    Hold, Tracked,
};

fn stack_over_hold(
    top: Arc<dyn DispatchLayer>,
    outputs: Vec<PortSpec>,
) -> (DispatchStack, Arc<Hold>, mpsc::UnboundedReceiver<DispatchOutput>) {
    let hold = Hold::new();
    let (stack, rx) = DispatchStack::new(
        ProcessorSpec::new("proc", outputs),
        vec![top, hold.clone()],
        Vec::new(),
        Duration::ZERO,
    );
    (stack, hold, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<DispatchOutput>) -> Vec<DispatchOutput> {
    let mut outputs = Vec::new();
    while let Ok(output) = rx.try_recv() {
        outputs.push(output);
    }
    outputs
}

#[test]
fn test_parallelize_bounds_jobs_in_flight() {
    let refs = references();
    let parallelize = Parallelize::new(ParallelizeConfig { maximum_jobs: 2 }, Duration::ZERO);
    let (stack, hold, mut rx) = stack_over_hold(Arc::new(parallelize), vec![PortSpec::new("out", 0)]);

    for i in 0..5 {
        IterationSink::receive_job(&stack, job(&refs, "run", &[i], &[("a", json!(i))])).unwrap();
    }
    IterationSink::receive_completion(&stack, Completion::new("run", index(&[]), refs.context()))
        .unwrap();
    assert_eq!(hold.len(), 2);
    assert!(drain(&mut rx).is_empty());

    let mut answered = 0;
    while answered < 5 {
        let jobs = hold.jobs();
        assert!(jobs.len() - answered <= 2, "{} jobs in flight", jobs.len() - answered);
        answer(&stack, &jobs[answered]);
        answered += 1;
    }
    assert_eq!(hold.len(), 5);

    let outputs = drain(&mut rx);
    assert_eq!(outputs.len(), 6);
    assert!(outputs[..5].iter().all(|o| matches!(o, DispatchOutput::Result(_))));
    assert!(matches!(&outputs[5], DispatchOutput::Completion(c) if c.is_final()));

    let properties = stack.monitor_properties("run");
    assert_eq!(find_property(&properties, PARALLELIZE_SENT_JOBS).unwrap().value, 5);
}

#[test]
fn test_error_bounce_reflects_erroneous_input() {
    let refs = references();
    let outputs = vec![PortSpec::new("out", 1), PortSpec::new("log", 0)];
    let (stack, hold, mut rx) = stack_over_hold(Arc::new(ErrorBounce::new(Duration::ZERO)), outputs);

    let mut bad = job(&refs, "run", &[4], &[("b", json!(1))]);
    bad.data.insert("a".to_string(), refs.register_error(0, "upstream broke", &[]));
    stack.receive_job(bad).unwrap();

    assert_eq!(hold.len(), 0);
    match rx.try_recv() {
        Ok(DispatchOutput::Result(result)) => {
            assert_eq!(result.index, index(&[4]));
            let out = &result.data["out"];
            assert!(out.contains_errors());
            assert_eq!(out.depth(), 1);
            assert!(result.data["log"].contains_errors());
            assert_eq!(
                refs.error_message(out).as_deref(),
                Some("proc:out received erroneous input on a")
            );
        }
        other => panic!("unexpected output {:?}", other),
    }

    stack.receive_job(job(&refs, "run", &[5], &[("b", json!(2))])).unwrap();
    assert_eq!(hold.len(), 1);
}

#[test]
fn test_error_bounce_translates_failures_from_below() {
    let refs = references();
    let (stack, _hold, mut rx) = stack_over_hold(
        Arc::new(ErrorBounce::new(Duration::ZERO)),
        vec![PortSpec::new("out", 0)],
    );

    let error = ErrorEvent::new("run", index(&[2]), "exit 1", FailureKind::InvocationFailure, refs.context())
        .with_cause("out of memory");
    stack.receive_error(error).unwrap();

    match rx.try_recv() {
        Ok(DispatchOutput::Result(result)) => {
            assert_eq!(
                refs.error_message(&result.data["out"]).as_deref(),
                Some("proc:out failed: exit 1 (out of memory)")
            );
        }
        other => panic!("unexpected output {:?}", other),
    }
    let properties = stack.monitor_properties("run");
    assert_eq!(find_property(&properties, ERROR_BOUNCE_TRANSLATED).unwrap().value, 1);
    assert_eq!(find_property(&properties, ERROR_BOUNCE_REFLECTED).unwrap().value, 0);
}

#[tokio::test]
async fn test_loop_reruns_jobs_fed_by_an_iteration_strategy() {
    let refs = references();
    let yaml = r#"
layers:
  - type: parallelize
    maximum_jobs: 2
  - type: loop
    condition: keep_going
  - type: invoke
"#;
    let mut registry = ActivityRegistry::new();
    registry.register(Condition::new(&[true, false]));
    let concat = Concat::new(&["a"]);
    let (stack, mut rx) = DispatchStackBuilder::for_activity(concat.clone())
        .config(parse_stack_config(yaml, ConfigFormat::Yaml).unwrap())
        .registry(registry)
        .build()
        .unwrap();
    let strategy = IterationStrategy::dot_product(&[("a", 0)]).unwrap();

    let data = refs.register(json!("x"), 0);
    strategy
        .receive_data("a", "run", index(&[0]), data, refs.context(), &stack)
        .unwrap();
    strategy
        .receive_completion("a", "run", index(&[]), refs.context(), &stack)
        .unwrap();

    let outputs = outputs_until_final(&mut rx).await;
    assert_eq!(outputs.len(), 2, "{:?}", outputs);
    match &outputs[0] {
        DispatchOutput::Result(result) => {
            assert_eq!(result.index, index(&[0]));
            assert_eq!(refs.resolve(&result.data["out"]), Some(json!("x")));
        }
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(concat.invocations(), 2);
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

#[test]
fn test_job_layers_above_parallelize_are_rejected() {
    for top in ["loop", "error_bounce", "retry"] {
        let yaml = format!(
            "layers:\n  - type: {}\n  - type: parallelize\n    maximum_jobs: 2\n  - type: invoke\n",
            top
        );
        match parse_stack_config(&yaml, ConfigFormat::Yaml) {
            Err(DispatchError::InvalidConfig(message)) => {
                assert!(message.contains(top), "{}", message);
            }
            other => panic!("{} on top was accepted: {:?}", top, other.map(|c| c.layers.len())),
        }
    }

    let mut registry = ActivityRegistry::new();
    registry.register(Condition::new(&[]));
    let built = DispatchStackBuilder::for_activity(Concat::new(&["a"]))
        .layers(vec![
            LayerConfig::ErrorBounce,
            LayerConfig::Parallelize(ParallelizeConfig { maximum_jobs: 2 }),
            LayerConfig::Invoke,
        ])
        .registry(registry)
        .build();
    assert!(matches!(built, Err(DispatchError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_retry_resends_transient_failures() {
    let refs = references();
    let yaml = r#"
layers:
  - type: parallelize
  - type: retry
    max_retries: 2
  - type: invoke
"#;
    let flaky = Flaky::new(2);
    let (stack, mut rx) = DispatchStackBuilder::for_activity(flaky.clone())
        .config(parse_stack_config(yaml, ConfigFormat::Yaml).unwrap())
        .build()
        .unwrap();

    IterationSink::receive_job(&stack, job(&refs, "run", &[0], &[])).unwrap();
    assert!(matches!(next_output(&mut rx).await, DispatchOutput::Result(_)));
    assert_eq!(flaky.invocations(), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_retries() {
    let refs = references();
    let yaml = r#"
layers:
  - type: parallelize
  - type: retry
    max_retries: 1
  - type: invoke
"#;
    let flaky = Flaky::new(5);
    let (stack, mut rx) = DispatchStackBuilder::for_activity(flaky.clone())
        .config(parse_stack_config(yaml, ConfigFormat::Yaml).unwrap())
        .build()
        .unwrap();

    IterationSink::receive_job(&stack, job(&refs, "run", &[0], &[])).unwrap();
    match next_output(&mut rx).await {
        DispatchOutput::Error(error) => {
            assert_eq!(error.kind, FailureKind::Timeout);
            assert_eq!(error.activity.as_deref(), Some("flaky"));
        }
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(flaky.invocations(), 2);
}

#[test]
fn test_finished_with_is_idempotent_and_releases_state() {
    let refs = references();
    let parallelize = Parallelize::new(ParallelizeConfig { maximum_jobs: 1 }, Duration::ZERO);
    let (stack, hold, _rx) = stack_over_hold(Arc::new(parallelize), vec![PortSpec::new("out", 0)]);

    IterationSink::receive_job(&stack, job(&refs, "run", &[0], &[])).unwrap();
    IterationSink::receive_job(&stack, job(&refs, "run", &[1], &[])).unwrap();
    assert_eq!(hold.len(), 1);
    assert!(!stack.monitor_properties("run").is_empty());

    stack.finished_with("run");
    stack.finished_with("run");
    assert!(stack.monitor_properties("run").is_empty());

    IterationSink::receive_job(&stack, job(&refs, "run", &[0], &[])).unwrap();
    assert_eq!(hold.len(), 2);
    assert_eq!(hold.jobs()[1].index, index(&[0]));
}

#[test]
fn test_stack_config_formats_and_validation() {
    let toml = r#"
grace_period_ms = 50

[[layers]]
type = "parallelize"
maximum_jobs = 4

[[layers]]
type = "invoke"
"#;
    let config = parse_stack_config(toml, ConfigFormat::Toml).unwrap();
    assert_eq!(config.grace_period(), Duration::from_millis(50));
    assert!(matches!(
        config.layers.as_slice(),
        [LayerConfig::Parallelize(ParallelizeConfig { maximum_jobs: 4 }), LayerConfig::Invoke]
    ));

    let misplaced = r#"
layers:
  - type: invoke
  - type: error_bounce
"#;
    assert!(matches!(
        parse_stack_config(misplaced, ConfigFormat::Yaml),
        Err(DispatchError::InvalidConfig(_))
    ));
    assert!(matches!(
        parse_stack_config("layers: [", ConfigFormat::Yaml),
        Err(DispatchError::InvalidConfig(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallelize_bound_holds_under_concurrent_cross_products() {
    const PROCESSES: usize = 3;
    const A: usize = 6;
    const B: usize = 5;
    const MAXIMUM_JOBS: usize = 3;

    let refs = references();
    let tracked = Tracked::new();
    let (stack, mut rx) = DispatchStackBuilder::for_activity(tracked.clone())
        .layers(vec![
            LayerConfig::Parallelize(ParallelizeConfig { maximum_jobs: MAXIMUM_JOBS }),
            LayerConfig::ErrorBounce,
            LayerConfig::Invoke,
        ])
        .build()
        .unwrap();
    let strategy = Arc::new(IterationStrategy::cross_product(&[("a", 0), ("b", 0)]).unwrap());

    let mut feeders = Vec::new();
    for p in 0..PROCESSES {
        for port in ["a", "b"] {
            let (stack, strategy, refs) = (stack.clone(), strategy.clone(), refs.clone());
            feeders.push(tokio::spawn(async move {
                let process = format!("p{}", p);
                let count = if port == "a" { A } else { B };
                for i in 0..count {
                    let value = if port == "a" { format!("{}/{}", process, i) } else { i.to_string() };
                    let data = refs.register(json!(value), 0);
                    strategy
                        .receive_data(port, &process, index(&[i]), data, refs.context(), &stack)
                        .unwrap();
                    tokio::task::yield_now().await;
                }
                strategy
                    .receive_completion(port, &process, index(&[]), refs.context(), &stack)
                    .unwrap();
            }));
        }
    }
    for feeder in feeders {
        feeder.await.unwrap();
    }

    let mut results: HashMap<String, HashSet<Vec<usize>>> = HashMap::new();
    let mut finished = HashSet::new();
    while finished.len() < PROCESSES {
        match next_output(&mut rx).await {
            DispatchOutput::Result(result) => {
                assert!(
                    !finished.contains(&result.owning_process),
                    "result for {} after its final completion",
                    result.owning_process
                );
                let [a, b] = result.index.as_slice() else {
                    panic!("unexpected index {}", result.index);
                };
                assert_eq!(
                    refs.resolve(&result.data["out"]),
                    Some(json!(format!("{}/{}{}", result.owning_process, a, b)))
                );
                results
                    .entry(result.owning_process.clone())
                    .or_default()
                    .insert(result.index.as_slice().to_vec());
            }
            DispatchOutput::Completion(completion) if completion.is_final() => {
                let seen = results.get(&completion.owning_process).map_or(0, HashSet::len);
                assert_eq!(seen, A * B, "final completion for {} overtook results", completion.owning_process);
                assert!(finished.insert(completion.owning_process.clone()));
            }
            DispatchOutput::Completion(_) => {}
            DispatchOutput::Error(error) => panic!("unexpected error {:?}", error.message),
        }
    }
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());

    for p in 0..PROCESSES {
        let process = format!("p{}", p);
        let peak = tracked.peak(&process);
        assert!(peak >= 1 && peak <= MAXIMUM_JOBS, "{} peaked at {} jobs", process, peak);
        let properties = stack.monitor_properties(&process);
        assert_eq!(
            find_property(&properties, PARALLELIZE_SENT_JOBS).unwrap().value,
            (A * B) as i64
        );
    }
}
