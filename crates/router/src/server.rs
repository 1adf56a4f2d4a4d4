//! 서버 -- accept 루프, 연결 태스크, 룰셋 리로드, 종료 드레인
//!
//! # 종료 순서
//! 1. 취소 토큰이 발화되면 accept 루프가 멈추고 리스너를 닫습니다.
//! 2. 연결 태스크들이 읽기를 멈추고 종료합니다 ([`TaskTracker`]로 대기).
//! 3. 디스패치 큐가 닫히고 워커들이 남은 메시지를 처리합니다.
//!
//! 2와 3 전체가 `shutdown.drain_timeout_secs` 안에 끝나지 않으면 남은 작업을 버립니다.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use logrelay_core::config::RelayConfig;
use logrelay_core::error::RelayError;
use logrelay_core::metrics as m;

use crate::action::ActionRegistry;
use crate::connection::{self, HandlerContext};
use crate::dispatch::{Dispatcher, WorkerPool};
use crate::error::RouterError;
use crate::listener::{Listener, ListenerSpec};
use crate::parser::{SyslogParser, parser_for};
use crate::rule::{Ruleset, RulesetHandle, RulesetLoader};
use crate::settings::RuntimeSettings;

/// accept 실패 후 재시도 전 대기 시간
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// syslog 수신 서버
///
/// # 사용 예시
/// ```ignore
/// let mut registry = ActionRegistry::new();
/// registry.register(Box::new(FileAction::new()))?;
///
/// let server = Arc::new(Server::new(config, registry).await?);
/// let token = server.shutdown_token();
/// let task = tokio::spawn({
///     let server = Arc::clone(&server);
///     async move { server.run().await }
/// });
///
/// token.cancel();
/// task.await??;
/// ```
pub struct Server {
    config: watch::Sender<Arc<RelayConfig>>,
    registry: Arc<ActionRegistry>,
    rules: RulesetHandle,
    parser: Arc<dyn SyslogParser>,
    settings: watch::Sender<RuntimeSettings>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl Server {
    /// 서버를 생성하고 초기 룰셋을 로드합니다.
    ///
    /// # Errors
    /// - 등록된 액션이 없는 경우 (`NoActions`)
    /// - 알 수 없는 파서 타입
    /// - 룰셋 로드 실패
    pub async fn new(config: RelayConfig, registry: ActionRegistry) -> Result<Self, RouterError> {
        if registry.is_empty() {
            return Err(RouterError::NoActions);
        }

        let parser = parser_for(&config.parser.kind)?;
        let ruleset = RulesetLoader::load_file(&config.server.rule_file).await?;
        let (settings, _) = watch::channel(RuntimeSettings::from_config(&config));
        let (config, _) = watch::channel(Arc::new(config));

        info!(
            actions = ?registry.names(),
            rules = ruleset.len(),
            parser = parser.format_name(),
            "server initialized"
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            rules: RulesetHandle::new(Some(ruleset)),
            parser,
            settings,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }

    /// 현재 설정
    pub fn config(&self) -> Arc<RelayConfig> {
        Arc::clone(&self.config.borrow())
    }

    /// 현재 룰셋 핸들
    pub fn ruleset(&self) -> &RulesetHandle {
        &self.rules
    }

    /// 현재 런타임 설정
    pub fn settings(&self) -> RuntimeSettings {
        *self.settings.borrow()
    }

    /// 종료 토큰 (취소하면 드레인 후 `run`이 반환됨)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 종료를 요청합니다.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// 설정의 리스너를 바인드하고 종료될 때까지 실행합니다.
    pub async fn run(&self) -> Result<(), RouterError> {
        let spec = ListenerSpec::from_config(&self.config().listener)?;
        let listener = Listener::bind(&spec).await?;
        self.run_with_listener(listener).await
    }

    /// 주어진 리스너로 종료될 때까지 실행합니다.
    ///
    /// 이미 실행 중이면 `AlreadyRunning`을 반환합니다.
    pub async fn run_with_listener(&self, listener: Listener) -> Result<(), RouterError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RouterError::AlreadyRunning);
        }

        let config = self.config();
        let dispatcher = Dispatcher::new(
            self.rules.clone(),
            Arc::clone(&self.registry),
            self.settings.subscribe(),
        );
        let (queue, pool) = WorkerPool::start(dispatcher, &config.dispatch);

        let ctx = HandlerContext {
            parser: Arc::clone(&self.parser),
            queue,
            settings: self.settings.subscribe(),
            cancel: self.cancel.clone(),
            max_frame_size: config.parser.max_frame_size,
            listener_kind: listener.kind(),
        };
        let tracker = TaskTracker::new();

        info!(
            listener = listener.kind(),
            listen_addr = %listener.local_addr(),
            "listening for new connections"
        );

        self.accept_loop(&listener, &ctx, &tracker).await;
        drop(listener);

        self.drain(ctx, tracker, pool, config.shutdown.drain_timeout())
            .await;
        Ok(())
    }

    async fn accept_loop(&self, listener: &Listener, ctx: &HandlerContext, tracker: &TaskTracker) {
        let kind = listener.kind();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("server received shutdown signal, no longer accepting connections");
                    return;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(incoming) => {
                    metrics::counter!(m::LISTENER_CONNECTIONS_ACCEPTED_TOTAL, m::LABEL_LISTENER => kind)
                        .increment(1);
                    debug!(remote_addr = %incoming.peer(), "accepted new connection");
                    tracker.spawn(connection::serve(incoming, ctx.clone()));
                }
                Err(e) => {
                    metrics::counter!(m::LISTENER_ACCEPT_ERRORS_TOTAL, m::LABEL_LISTENER => kind)
                        .increment(1);
                    error!(error = %e, "failed to accept new connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn drain(
        &self,
        ctx: HandlerContext,
        tracker: TaskTracker,
        pool: WorkerPool,
        timeout: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;

        tracker.close();
        info!(connections = tracker.len(), "waiting for connections to finish");
        if tokio::time::timeout_at(deadline, tracker.wait()).await.is_err() {
            warn!(
                remaining = tracker.len(),
                "drain timeout reached while closing connections"
            );
        }

        // 서버가 보유한 큐 송신 측을 닫아 워커들이 남은 메시지만 처리하고 끝나게 함
        drop(ctx);

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if pool.drain(remaining).await {
            info!("server stopped, all queued messages dispatched");
        } else {
            warn!(
                timeout_secs = timeout.as_secs(),
                "drain timeout reached, abandoning queued messages"
            );
        }
    }

    /// 현재 설정의 룰 파일에서 룰셋을 다시 로드합니다.
    ///
    /// 실패하면 이전 룰셋이 그대로 유지됩니다. 성공 시 새 룰 수를 반환합니다.
    pub async fn reload_ruleset(&self) -> Result<usize, RouterError> {
        let rule_file = self.config().server.rule_file.clone();
        let result = RulesetLoader::load_file(&rule_file).await;
        self.install(result)
    }

    /// 설정 파일과 룰셋을 함께 다시 로드합니다.
    ///
    /// 새 설정과 새 룰셋이 모두 유효할 때만 교체합니다.
    /// 리스너, 파서 타입, 디스패치 풀, 로그 레벨 변경은 재시작 후에 반영됩니다.
    pub async fn reload(&self, config_path: impl AsRef<Path>) -> Result<usize, RelayError> {
        let config_path = config_path.as_ref();
        let new_config = match RelayConfig::load(config_path).await {
            Ok(config) => config,
            Err(e) => {
                metrics::counter!(m::RULES_RELOADS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                error!(path = %config_path.display(), error = %e, "failed to reload config, keeping current");
                return Err(e);
            }
        };

        let result = RulesetLoader::load_file(&new_config.server.rule_file).await;
        let count = self.install(result)?;

        let old_config = self.config();
        warn_restart_required(&old_config, &new_config);

        let settings = RuntimeSettings::from_config(&new_config);
        self.settings.send_replace(settings);
        self.config.send_replace(Arc::new(new_config));

        info!(
            path = %config_path.display(),
            parse_timeout_ms = settings.parse_timeout.as_millis() as u64,
            extended = settings.extended,
            "configuration reloaded"
        );
        Ok(count)
    }

    fn install(
        &self,
        result: Result<Ruleset, RouterError>,
    ) -> Result<usize, RouterError> {
        match result {
            Ok(ruleset) => {
                let count = ruleset.len();
                self.rules.replace(ruleset);
                metrics::counter!(m::RULES_RELOADS_TOTAL, m::LABEL_RESULT => "success").increment(1);
                info!(rules = count, "ruleset reloaded");
                Ok(count)
            }
            Err(e) => {
                metrics::counter!(m::RULES_RELOADS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                error!(error = %e, "failed to reload ruleset, keeping current");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("registry", &self.registry)
            .field("parser", &self.parser.format_name())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

fn warn_restart_required(old: &RelayConfig, new: &RelayConfig) {
    let changed = [
        ("listener", old.listener != new.listener),
        (
            "parser.type",
            !old.parser.kind.eq_ignore_ascii_case(&new.parser.kind),
        ),
        (
            "parser.max_frame_size",
            old.parser.max_frame_size != new.parser.max_frame_size,
        ),
        ("dispatch", old.dispatch != new.dispatch),
        ("shutdown", old.shutdown != new.shutdown),
        ("log.level", old.log.level != new.log.level),
        ("log.format", old.log.format != new.log.format),
        ("metrics", old.metrics != new.metrics),
        ("general.pid_file", old.general.pid_file != new.general.pid_file),
    ];

    for (section, _) in changed.iter().filter(|(_, changed)| *changed) {
        warn!(section, "configuration change requires restart to take effect");
    }
}
