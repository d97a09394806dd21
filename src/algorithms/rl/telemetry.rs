//! Telemetry sinks: where per-episode scalars go.

use log::debug;

/// Receives named scalars. The control loop needs nothing more.
pub trait TelemetrySink {
    fn record(&mut self, key: &str, value: f64, step: u64);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn record(&mut self, _key: &str, _value: f64, _step: u64) {}
}

/// Forwards every scalar to the `log` facade at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn record(&mut self, key: &str, value: f64, step: u64) {
        debug!(target: "eamod::telemetry", "[{}] {} = {:.6}", step, key, value);
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTelemetry {
    records: Vec<(String, f64, u64)>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[(String, f64, u64)] {
        &self.records
    }

    /// `(step, value)` pairs recorded under `key`.
    pub fn series(&self, key: &str) -> Vec<(u64, f64)> {
        self.records
            .iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, v, s)| (*s, *v))
            .collect()
    }

    /// Most recent value recorded under `key`.
    pub fn last(&self, key: &str) -> Option<f64> {
        self.records
            .iter()
            .rev()
            .find(|(k, _, _)| k == key)
            .map(|(_, v, _)| *v)
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&mut self, key: &str, value: f64, step: u64) {
        self.records.push((key.to_string(), value, step));
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn record(&mut self, key: &str, value: f64, step: u64) {
        (**self).record(key, value, step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_series() {
        let mut sink = MemoryTelemetry::new();
        sink.record("reward", 1.0, 0);
        sink.record("loss", 0.3, 0);
        sink.record("reward", 2.0, 1);
        assert_eq!(sink.series("reward"), vec![(0, 1.0), (1, 2.0)]);
        assert_eq!(sink.last("loss"), Some(0.3));
        assert_eq!(sink.last("missing"), None);
    }

    #[test]
    fn boxed_sinks_forward() {
        let mut sink: Box<dyn TelemetrySink> = Box::new(NullTelemetry);
        sink.record("x", 1.0, 0);
        let mut log = LogTelemetry;
        log.record("x", 1.0, 0);
    }
}
