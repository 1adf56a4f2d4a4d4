//! Prometheus metrics HTTP server.
//!
//! `metrics-exporter-prometheus`의 내장 HTTP 리스너로 스크레이프 엔드포인트를 엽니다.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logrelay_core::config::MetricsConfig;
use logrelay_core::metrics as m;

const UPTIME_INTERVAL: Duration = Duration::from_secs(10);

/// 전역 메트릭 레코더를 설치하고 HTTP 리스너를 시작합니다.
///
/// 프로세스당 한 번만 호출해야 합니다.
///
/// # Errors
///
/// - 주소 파싱 실패
/// - 소켓 바인드 실패 또는 레코더가 이미 설치된 경우
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(m::ACTION_DURATION_SECONDS.to_owned()),
            &m::ACTION_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

/// `listen_addr:port`를 소켓 주소로 변환합니다.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    let host = if config.listen_addr.contains(':') && !config.listen_addr.starts_with('[') {
        format!("[{}]", config.listen_addr)
    } else {
        config.listen_addr.clone()
    };

    format!("{}:{}", host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// 빌드 정보와 등록된 액션 수를 기록합니다.
pub fn record_daemon_metrics(action_count: usize) {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_ACTIONS_REGISTERED).set(action_count as f64);

    tracing::debug!(
        action_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// 가동 시간 게이지를 주기적으로 갱신하는 태스크를 띄웁니다.
pub fn spawn_uptime_updater(start_time: Instant, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
