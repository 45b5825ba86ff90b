use control_plane::{Metrics, RestoreOutcome, WarmupErrorKind};

#[test]
fn request_counters_accumulate_by_endpoint_and_status() {
    let metrics = Metrics::new();
    metrics.record_request("/v1/chat/completions", 200);
    metrics.record_request("/v1/chat/completions", 200);
    metrics.record_request("/v1/chat/completions", 502);
    metrics.record_request("/health", 200);

    let rendered = metrics.render();
    assert!(rendered.contains(
        "bioproxy_requests_total{endpoint=\"/v1/chat/completions\",status=\"200\"} 2"
    ));
    assert!(rendered.contains(
        "bioproxy_requests_total{endpoint=\"/v1/chat/completions\",status=\"502\"} 1"
    ));
    assert!(rendered.contains("bioproxy_requests_total{endpoint=\"/health\",status=\"200\"} 1"));
    assert!(rendered.contains("bioproxy_requests_count 4"));
}

#[test]
fn per_prefix_sections_are_omitted_until_populated() {
    let metrics = Metrics::new();
    let rendered = metrics.render();
    assert!(rendered.contains("bioproxy_warmup_checks_total 0"));
    assert!(rendered.contains("bioproxy_uptime_seconds"));
    assert!(!rendered.contains("bioproxy_warmup_executions_total"));
    assert!(!rendered.contains("bioproxy_warmup_errors_total"));
    assert!(!rendered.contains("bioproxy_kv_cache_saves_total"));
    assert!(!rendered.contains("bioproxy_kv_cache_restores_total"));
    assert!(!rendered.contains("bioproxy_warmup_cancellations_total"));
}

#[test]
fn warmup_execution_tracks_count_and_duration() {
    let metrics = Metrics::new();
    metrics.record_warmup_execution("@code", 1.5);
    metrics.record_warmup_execution("@code", 2.5);

    let rendered = metrics.render();
    assert!(rendered.contains("bioproxy_warmup_executions_total{prefix=\"@code\"} 2"));
    assert!(rendered.contains("bioproxy_warmup_duration_seconds_total{prefix=\"@code\"} 4.00"));
    assert!(rendered.contains("bioproxy_warmup_duration_seconds_count{prefix=\"@code\"} 2"));
}

#[test]
fn warmup_errors_are_labelled_by_kind() {
    let metrics = Metrics::new();
    metrics.record_warmup_error("@code", WarmupErrorKind::Template);
    metrics.record_warmup_error("@code", WarmupErrorKind::Completion);
    metrics.record_warmup_error("@code", WarmupErrorKind::Completion);
    metrics.record_warmup_error("@debug", WarmupErrorKind::Save);

    let rendered = metrics.render();
    assert!(rendered
        .contains("bioproxy_warmup_errors_total{prefix=\"@code\",type=\"template_error\"} 1"));
    assert!(rendered
        .contains("bioproxy_warmup_errors_total{prefix=\"@code\",type=\"completion_failed\"} 2"));
    assert!(rendered.contains("bioproxy_warmup_errors_total{prefix=\"@debug\",type=\"save_failed\"} 1"));
}

#[test]
fn kv_cache_counters_are_labelled_by_outcome() {
    let metrics = Metrics::new();
    metrics.record_kv_cache_save("@code");
    metrics.record_kv_cache_restore("@code", RestoreOutcome::NotFound);
    metrics.record_kv_cache_restore("@code", RestoreOutcome::Success);
    metrics.record_warmup_cancellation("@code");

    let rendered = metrics.render();
    assert!(rendered.contains("bioproxy_kv_cache_saves_total{prefix=\"@code\"} 1"));
    assert!(rendered
        .contains("bioproxy_kv_cache_restores_total{prefix=\"@code\",status=\"not_found\"} 1"));
    assert!(rendered
        .contains("bioproxy_kv_cache_restores_total{prefix=\"@code\",status=\"success\"} 1"));
    assert!(rendered.contains("bioproxy_warmup_cancellations_total{prefix=\"@code\"} 1"));
}

#[test]
fn snapshot_exposes_raw_counters() {
    let metrics = Metrics::new();
    metrics.record_request("/v1/chat/completions", 200);
    metrics.record_warmup_check();
    metrics.record_warmup_check();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.requests_count, 1);
    assert_eq!(snapshot.warmup_checks, 2);
    assert_eq!(
        snapshot
            .requests
            .get(&("/v1/chat/completions".to_string(), 200)),
        Some(&1)
    );
}
