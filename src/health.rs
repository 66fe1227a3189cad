use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_connections = state.registry.len();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "calls": {
            "active": active_connections,
            "started": metrics.calls_started,
            "ended": metrics.calls_ended,
            "rejected": metrics.calls_rejected
        },
        "audio": {
            "sample_rate": config.audio.sample_rate,
            "frame_duration_ms": config.audio.frame_duration_ms,
            "vad_aggressiveness": config.vad.aggressiveness
        },
        "memory": get_memory_info(),
        "system": get_system_status(&config, active_connections)
    }))
}

/// 200 while the server can take another call, 503 at capacity.
pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    let limit = state.get_config().connections.max_concurrent_connections;
    let active = state.registry.len();

    let body = json!({
        "ready": active < limit,
        "active_connections": active,
        "max_connections": limit,
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    if active < limit {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "calls": metrics,
        "turns": {
            "completed": metrics.turns_completed,
            "interrupted": metrics.turns_interrupted,
            "interruption_rate": interruption_rate(&metrics)
        },
        "connections": state.registry.snapshot(),
        "memory": get_memory_info()
    }))
}

fn interruption_rate(metrics: &AppMetrics) -> f64 {
    let turns = metrics.turns_completed + metrics.turns_interrupted;
    if turns > 0 {
        metrics.turns_interrupted as f64 / turns as f64
    } else {
        0.0
    }
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) else {
        return json!({ "available": false });
    };

    let mut vm_rss = 0;
    let mut vm_size = 0;
    for line in status.lines() {
        let kb = || {
            line.split_whitespace()
                .nth(1)
                .and_then(|kb| kb.parse::<u64>().ok())
                .unwrap_or(0)
                * 1024
        };
        if line.starts_with("VmRSS:") {
            vm_rss = kb();
        } else if line.starts_with("VmSize:") {
            vm_size = kb();
        }
    }

    json!({
        "resident_memory_bytes": vm_rss,
        "virtual_memory_bytes": vm_size,
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, active_connections: usize) -> serde_json::Value {
    let limit = config.connections.max_concurrent_connections;
    let usage = if limit > 0 {
        active_connections as f64 / limit as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "connection_usage_percent": (usage * 100.0).round(),
        "max_connections": limit,
        "current_connections": active_connections,
        "load_warnings": if usage > 0.8 {
            vec!["High connection usage - consider increasing max_concurrent_connections"]
        } else {
            vec![]
        }
    })
}
