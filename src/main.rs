use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use tokenweave::{
    parse_stack_config, Activity, ActivityCallback, ConfigFormat, DataRef, DispatchOutput,
    DispatchStackBuilder, FailureKind, IndexArray, InMemoryReferenceService, IterationStrategy,
    PortSpec, ReferenceService,
};

const STACK_YAML: &str = r#"
grace_period_ms: 200
layers:
  - type: parallelize
    maximum_jobs: 2
  - type: error_bounce
  - type: invoke
"#;

/// Joins a greeting and a name.
struct Greet {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl Greet {
    fn new() -> Self {
        Self {
            inputs: vec![PortSpec::new("greeting", 0), PortSpec::new("name", 0)],
            outputs: vec![PortSpec::new("message", 0)],
        }
    }
}

#[async_trait]
impl Activity for Greet {
    fn name(&self) -> &str {
        "greet"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    async fn invoke(&self, inputs: HashMap<String, DataRef>, callback: ActivityCallback) {
        let references = callback.context().reference_service().clone();
        let text = |port: &str| {
            inputs
                .get(port)
                .and_then(|data| references.resolve(data))
                .and_then(|value| value.as_str().map(str::to_string))
        };
        match (text("greeting"), text("name")) {
            (Some(greeting), Some(name)) => {
                let message = references.register(json!(format!("{}, {}!", greeting, name)), 0);
                callback.receive_result(
                    HashMap::from([("message".to_string(), message)]),
                    IndexArray::empty(),
                );
            }
            _ => callback.fail("missing input", None, FailureKind::InvocationFailure),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Tokenweave: cross product over two ports ===\n");

    let config = match parse_stack_config(STACK_YAML, ConfigFormat::Yaml) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid stack configuration: {}", e);
            std::process::exit(1);
        }
    };
    let (stack, mut outputs) = match DispatchStackBuilder::for_activity(Arc::new(Greet::new()))
        .config(config)
        .build()
    {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Failed to build dispatch stack: {}", e);
            std::process::exit(1);
        }
    };
    let strategy = match IterationStrategy::cross_product(&[("greeting", 0), ("name", 0)]) {
        Ok(strategy) => strategy,
        Err(e) => {
            eprintln!("Invalid iteration strategy: {}", e);
            std::process::exit(1);
        }
    };

    let references = Arc::new(InMemoryReferenceService::new());
    let context = references.context();
    let process = "demo:run1";
    let inputs: [(&str, &[&str]); 2] = [
        ("greeting", &["Hello", "Bonjour"]),
        ("name", &["Ada", "Grace", "Edsger"]),
    ];

    for (port, values) in inputs {
        for (i, value) in values.iter().enumerate() {
            let data = references.register(Value::from(*value), 0);
            if let Err(e) = strategy.receive_data(
                port,
                process,
                IndexArray::from([i]),
                data,
                context.clone(),
                &stack,
            ) {
                eprintln!("Failed to deliver {}[{}]: {}", port, i, e);
                std::process::exit(1);
            }
        }
        if let Err(e) =
            strategy.receive_completion(port, process, IndexArray::empty(), context.clone(), &stack)
        {
            eprintln!("Failed to close {}: {}", port, e);
            std::process::exit(1);
        }
    }

    while let Some(output) = outputs.recv().await {
        match output {
            DispatchOutput::Result(result) => {
                let message = result
                    .data
                    .get("message")
                    .and_then(|data| references.resolve(data))
                    .unwrap_or(Value::Null);
                println!("{} -> {}", result.index, message);
            }
            DispatchOutput::Error(error) => {
                println!("{} failed: {}", error.index, error.message);
            }
            DispatchOutput::Completion(completion) if completion.is_final() => {
                println!("\nAll jobs complete.");
                break;
            }
            DispatchOutput::Completion(_) => {}
        }
    }

    for property in stack.monitor_properties(process) {
        println!("  {} = {}", property.name, property.value);
    }
    stack.finished_with(process);
    strategy.finished_with(process);
}
