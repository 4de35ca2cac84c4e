use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};

struct LoopMetrics {
    runs: Counter<u64>,
    duration_ms: Histogram<f64>,
    steps: Histogram<f64>,
    tool_invocations: Counter<u64>,
}

static METRICS: OnceCell<LoopMetrics> = OnceCell::new();

fn handles() -> &'static LoopMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("reflexion.orchestrator");
        LoopMetrics {
            runs: meter
                .u64_counter("runs_total")
                .with_description("Completed orchestrator runs by outcome")
                .init(),
            duration_ms: meter
                .f64_histogram("run_duration_ms")
                .with_description("Wall-clock run time in milliseconds")
                .init(),
            steps: meter
                .f64_histogram("run_steps")
                .with_description("Drafting steps taken per run")
                .init(),
            tool_invocations: meter
                .u64_counter("tool_invocations_total")
                .with_description("Capability invocations by tool and status")
                .init(),
        }
    })
}

/// Record a finished run (no-op if no meter provider is installed).
pub fn record_run(outcome: &str, steps: usize, retries: usize, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("outcome", outcome.to_string()),
        KeyValue::new("retries", retries as i64),
    ];

    metrics.runs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
    metrics.steps.record(steps as f64, &attrs);
}

pub fn record_tool_invocation(tool: &str, status: &str) {
    let attrs = [
        KeyValue::new("tool", tool.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    handles().tool_invocations.add(1, &attrs);
}
