use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder only serves
// whatever the exporter has registered.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "catalog.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "catalog.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn bulk_outcome(total: usize, successful: usize, failed: usize) {
    trace!(
        target = "catalog.metrics",
        total = total as u64,
        successful = successful as u64,
        failed = failed as u64,
        "bulk_outcome"
    );
}
