use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use extract::Provider;

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    malformed_outputs: AtomicUsize,

    // Upstream timing (in microseconds)
    gemini_time_us: AtomicU64,
    gemini_calls: AtomicUsize,
    document_ai_time_us: AtomicU64,
    document_ai_calls: AtomicUsize,

    // Counts
    fields_filled: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            malformed_outputs: AtomicUsize::new(0),
            gemini_time_us: AtomicU64::new(0),
            gemini_calls: AtomicUsize::new(0),
            document_ai_time_us: AtomicU64::new(0),
            document_ai_calls: AtomicUsize::new(0),
            fields_filled: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_malformed(&self) {
        self.malformed_outputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream(&self, provider: Provider, duration: Duration) {
        let (time, calls) = match provider {
            Provider::Gemini => (&self.gemini_time_us, &self.gemini_calls),
            Provider::DocumentAi => (&self.document_ai_time_us, &self.document_ai_calls),
        };
        time.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fields(&self, filled: usize) {
        self.fields_filled.fetch_add(filled, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            malformed_outputs: self.malformed_outputs.load(Ordering::Relaxed),
            gemini_calls: self.gemini_calls.load(Ordering::Relaxed),
            avg_gemini_time_ms: self.avg_time_ms(&self.gemini_time_us, &self.gemini_calls),
            document_ai_calls: self.document_ai_calls.load(Ordering::Relaxed),
            avg_document_ai_time_ms: self
                .avg_time_ms(&self.document_ai_time_us, &self.document_ai_calls),
            total_fields_filled: self.fields_filled.load(Ordering::Relaxed),
        }
    }

    fn avg_time_ms(&self, total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
        let total = total_us.load(Ordering::Relaxed) as f64;
        let cnt = count.load(Ordering::Relaxed) as f64;
        if cnt > 0.0 {
            total / cnt / 1000.0 // Convert to ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub malformed_outputs: usize,
    pub gemini_calls: usize,
    pub avg_gemini_time_ms: f64,
    pub document_ai_calls: usize,
    pub avg_document_ai_time_ms: f64,
    pub total_fields_filled: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
