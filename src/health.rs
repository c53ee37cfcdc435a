use crate::languages::Language;
use crate::relay::registry::SessionRegistry;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(
    state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "speech-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "relay": {
            "mode": config.relay.mode.to_string(),
            "translator_enabled": config.translator.enabled,
            "languages": Language::ALL.iter().map(|l| l.locale()).collect::<Vec<_>>(),
            "active_sessions": registry.len(),
            "max_sessions": registry.max_sessions()
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "sessions_started": metrics.sessions_started,
            "frames_relayed": metrics.frames_relayed,
            "relay_failures": metrics.relay_failures
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(
    state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let sessions: Vec<_> = registry
        .sessions()
        .iter()
        .map(|session| {
            let counters = session.counters();
            json!({
                "session_id": session.id,
                "languages": {
                    "speak": session.languages.speak.locale(),
                    "listen": session.languages.listen.locale()
                },
                "state": session.state().as_str(),
                "age_seconds": session.age_seconds(),
                "audio_bytes_in": counters.audio_bytes_in,
                "utterances": counters.utterances,
                "relay_failures": counters.relay_failures
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "sessions_started": metrics.sessions_started,
            "active_sessions": metrics.active_sessions,
            "frames_relayed": metrics.frames_relayed,
            "bytes_relayed": metrics.bytes_relayed,
            "relay_failures": metrics.relay_failures
        },
        "sessions": sessions,
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let mut vm_rss = 0u64;
            let mut vm_size = 0u64;
            for line in status.lines() {
                if let Some(value) = line.strip_prefix("VmRSS:") {
                    vm_rss = value.trim().trim_end_matches(" kB").parse().unwrap_or(0);
                } else if let Some(value) = line.strip_prefix("VmSize:") {
                    vm_size = value.trim().trim_end_matches(" kB").parse().unwrap_or(0);
                }
            }
            return json!({
                "rss_kb": vm_rss,
                "virtual_kb": vm_size
            });
        }
    }

    json!({ "available": false })
}
