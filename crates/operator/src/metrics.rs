use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RECONCILIATIONS_TOTAL: IntCounter = IntCounter::new(
        "batch_job_reconciliations_total",
        "Total number of job reconciliation passes."
    )
    .unwrap();
    pub static ref ACTIONS_RESOLVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "batch_job_actions_resolved_total",
            "Lifecycle actions resolved by policy, by action."
        ),
        &["action"]
    )
    .unwrap();
    pub static ref PODS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "batch_job_pods_created_total",
        "Total number of job pods created."
    )
    .unwrap();
    pub static ref PODS_DELETED_TOTAL: IntCounter = IntCounter::new(
        "batch_job_pods_deleted_total",
        "Total number of job pods deleted."
    )
    .unwrap();
}

/// Registers the operator metrics with `REGISTRY`. Safe to call repeatedly.
pub fn register_metrics() -> Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RECONCILIATIONS_TOTAL.clone()),
        Box::new(ACTIONS_RESOLVED_TOTAL.clone()),
        Box::new(PODS_CREATED_TOTAL.clone()),
        Box::new(PODS_DELETED_TOTAL.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(Error::Internal(format!("failed to register metric: {e}"))),
        }
    }
    Ok(())
}

/// Text exposition of everything in `REGISTRY`.
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_register() {
        register_metrics().unwrap();
        register_metrics().unwrap();
        ACTIONS_RESOLVED_TOTAL.with_label_values(&["SyncJob"]).inc();
        RECONCILIATIONS_TOTAL.inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("batch_job_reconciliations_total"));
        assert!(text.contains("batch_job_actions_resolved_total{action=\"SyncJob\"}"));
    }
}
