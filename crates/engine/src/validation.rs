use tracing::warn;
use vitalscope_core::{MetricSnapshot, VitalsError};

/// Anything slower than two minutes is a measurement artifact.
pub const MAX_TIME_MS: f64 = 120_000.0;
pub const MAX_CLS: f64 = 100.0;

fn checked(field: &str, value: Option<f64>, max: f64) -> Option<f64> {
    let v = value?;
    if v.is_finite() && (0.0..=max).contains(&v) {
        Some(v)
    } else {
        warn!(error = %VitalsError::validation_failure(field, v), "metric dropped");
        None
    }
}

/// Drops out-of-range fields and keeps the rest.
pub fn sanitize(mut snapshot: MetricSnapshot) -> MetricSnapshot {
    snapshot.ttfb = checked("ttfb", snapshot.ttfb, MAX_TIME_MS);
    snapshot.fcp = checked("fcp", snapshot.fcp, MAX_TIME_MS);
    snapshot.cls = checked("cls", snapshot.cls, MAX_CLS);
    snapshot.dom_load_time = checked("domLoadTime", snapshot.dom_load_time, MAX_TIME_MS);
    snapshot.navigation_duration =
        checked("navigationDuration", snapshot.navigation_duration, MAX_TIME_MS);
    snapshot.visual_completion_time =
        checked("visualCompletionTime", snapshot.visual_completion_time, MAX_TIME_MS);
    if let Some(lcp) = &snapshot.lcp {
        if checked("lcp", Some(lcp.value), MAX_TIME_MS).is_none() {
            snapshot.lcp = None;
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vitalscope_core::{Epoch, EpochId, EpochKind, LcpMetric};

    fn base() -> MetricSnapshot {
        let epoch = Epoch::new(EpochId::new(1), EpochKind::FullLoad, Duration::ZERO, "https://a.test/");
        MetricSnapshot::empty(&epoch, 0)
    }

    #[test]
    fn bad_fields_are_dropped_individually() {
        let snapshot = MetricSnapshot {
            ttfb: Some(f64::NAN),
            fcp: Some(-3.0),
            cls: Some(250.0),
            dom_load_time: Some(130_000.0),
            navigation_duration: Some(1800.0),
            lcp: Some(LcpMetric {
                value: f64::INFINITY,
                element: Some("img".into()),
                selector: None,
                fallback: false,
            }),
            ..base()
        };
        let clean = sanitize(snapshot);
        assert_eq!(clean.ttfb, None);
        assert_eq!(clean.fcp, None);
        assert_eq!(clean.cls, None);
        assert_eq!(clean.dom_load_time, None);
        assert_eq!(clean.lcp, None);
        assert_eq!(clean.navigation_duration, Some(1800.0));
    }

    #[test]
    fn boundaries_are_inclusive() {
        let snapshot = MetricSnapshot {
            ttfb: Some(0.0),
            cls: Some(MAX_CLS),
            fcp: Some(MAX_TIME_MS),
            ..base()
        };
        let clean = sanitize(snapshot.clone());
        assert_eq!(clean, snapshot);
    }
}
