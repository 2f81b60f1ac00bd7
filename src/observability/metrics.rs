use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub scheduling_passes_total: IntCounterVec,
    pub verification_attempts_total: IntCounterVec,
    pub ranking_latency_seconds: HistogramVec,
    pub active_trips: IntGauge,
    pub auto_scheduler_sweeps_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let scheduling_passes_total = IntCounterVec::new(
            Opts::new(
                "scheduling_passes_total",
                "Scheduling passes by outcome (auto, manual, failed)",
            ),
            &["outcome"],
        )
        .expect("valid scheduling_passes_total metric");

        let verification_attempts_total = IntCounterVec::new(
            Opts::new(
                "verification_attempts_total",
                "Verification scans by phase and outcome",
            ),
            &["phase", "outcome"],
        )
        .expect("valid verification_attempts_total metric");

        let ranking_latency_seconds = HistogramVec::new(
            HistogramOpts::new("ranking_latency_seconds", "Latency of ranking passes in seconds"),
            &["query"],
        )
        .expect("valid ranking_latency_seconds metric");

        let active_trips = IntGauge::new("active_trips", "Trips that are neither delivered nor abandoned")
            .expect("valid active_trips metric");

        let auto_scheduler_sweeps_total = IntCounter::new(
            "auto_scheduler_sweeps_total",
            "Periodic and forced scheduling sweeps",
        )
        .expect("valid auto_scheduler_sweeps_total metric");

        registry
            .register(Box::new(scheduling_passes_total.clone()))
            .expect("register scheduling_passes_total");
        registry
            .register(Box::new(verification_attempts_total.clone()))
            .expect("register verification_attempts_total");
        registry
            .register(Box::new(ranking_latency_seconds.clone()))
            .expect("register ranking_latency_seconds");
        registry
            .register(Box::new(active_trips.clone()))
            .expect("register active_trips");
        registry
            .register(Box::new(auto_scheduler_sweeps_total.clone()))
            .expect("register auto_scheduler_sweeps_total");

        Self {
            registry,
            scheduling_passes_total,
            verification_attempts_total,
            ranking_latency_seconds,
            active_trips,
            auto_scheduler_sweeps_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
