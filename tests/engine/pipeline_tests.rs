use std::collections::HashSet;

use serde_json::json;

use tokenweave::{
    parse_stack_config, ConfigFormat, DispatchOutput, DispatchStackBuilder, IterationStrategy,
    ReferenceService,
};

use super::helpers::{index, outputs_until_final, references, Concat};

const STACK_YAML: &str = r#"
grace_period_ms: 0
layers:
  - type: parallelize
    maximum_jobs: 2
  - type: error_bounce
  - type: invoke
"#;

#[tokio::test]
async fn test_cross_product_through_default_stack() {
    let refs = references();
    let concat = Concat::new(&["a", "b"]);
    let (stack, mut rx) = DispatchStackBuilder::for_activity(concat.clone())
        .config(parse_stack_config(STACK_YAML, ConfigFormat::Yaml).unwrap())
        .build()
        .unwrap();
    let strategy = IterationStrategy::cross_product(&[("a", 0), ("b", 0)]).unwrap();

    let inputs: [(&str, &[&str]); 2] = [("a", &["x", "y", "z"]), ("b", &["1", "2"])];
    for (port, values) in inputs {
        for (i, value) in values.iter().enumerate() {
            let data = refs.register(json!(value), 0);
            strategy
                .receive_data(port, "run", index(&[i]), data, refs.context(), &stack)
                .unwrap();
        }
        strategy
            .receive_completion(port, "run", index(&[]), refs.context(), &stack)
            .unwrap();
    }

    let outputs = outputs_until_final(&mut rx).await;
    assert_eq!(outputs.len(), 7);
    let mut seen = HashSet::new();
    for output in &outputs[..6] {
        match output {
            DispatchOutput::Result(result) => {
                let [a, b] = result.index.as_slice() else {
                    panic!("unexpected index {}", result.index);
                };
                let expected = format!("{}{}", ["x", "y", "z"][*a], ["1", "2"][*b]);
                assert_eq!(refs.resolve(&result.data["out"]), Some(json!(expected)));
                seen.insert(result.index.clone());
            }
            other => panic!("unexpected output {:?}", other),
        }
    }
    assert_eq!(seen.len(), 6);
    assert_eq!(concat.invocations(), 6);

    stack.finished_with("run");
    strategy.finished_with("run");
    assert!(stack.monitor_properties("run").is_empty());
}

#[tokio::test]
async fn test_failures_and_error_inputs_become_error_data() {
    let refs = references();
    let concat = Concat::failing_on(&["a", "b"], "bad");
    let (stack, mut rx) = DispatchStackBuilder::for_activity(concat.clone())
        .config(parse_stack_config(STACK_YAML, ConfigFormat::Yaml).unwrap())
        .build()
        .unwrap();
    let strategy = IterationStrategy::dot_product(&[("a", 0), ("b", 0)]).unwrap();

    let a = [
        refs.register(json!("x"), 0),
        refs.register(json!("bad"), 0),
        refs.register_error(0, "upstream broke", &[]),
    ];
    for (i, data) in a.into_iter().enumerate() {
        strategy
            .receive_data("a", "run", index(&[i]), data, refs.context(), &stack)
            .unwrap();
    }
    for i in 0..3 {
        let data = refs.register(json!("y"), 0);
        strategy
            .receive_data("b", "run", index(&[i]), data, refs.context(), &stack)
            .unwrap();
    }
    for port in ["a", "b"] {
        strategy
            .receive_completion(port, "run", index(&[]), refs.context(), &stack)
            .unwrap();
    }

    let outputs = outputs_until_final(&mut rx).await;
    assert_eq!(outputs.len(), 4);
    let mut messages = Vec::new();
    for output in &outputs[..3] {
        let DispatchOutput::Result(result) = output else {
            panic!("unexpected output {:?}", output);
        };
        let out = &result.data["out"];
        match result.index.as_slice() {
            [0] => assert_eq!(refs.resolve(out), Some(json!("xy"))),
            [1] | [2] => {
                assert!(out.contains_errors());
                messages.push(refs.error_message(out).unwrap_or_default());
            }
            other => panic!("unexpected index {:?}", other),
        }
    }
    messages.sort();
    assert_eq!(
        messages,
        vec![
            "concat:out failed: cannot handle bad".to_string(),
            "concat:out received erroneous input on a".to_string(),
        ]
    );
    assert_eq!(concat.invocations(), 2);
}
