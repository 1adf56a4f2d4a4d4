//! 데몬 오케스트레이션 -- 조립, 시그널 처리, 수명 주기 관리
//!
//! [`Orchestrator`]는 설정을 검증하고 액션 레지스트리와 [`Server`]를 조립한 뒤,
//! 시그널을 기다리며 서버를 실행합니다.
//!
//! # Signals
//!
//! - `SIGHUP`: 시작 시 사용한 설정 파일과 룰셋을 다시 로드 (실패 시 기존 유지)
//! - `SIGTERM`, `SIGINT`: accept 중단, 연결 종료, 큐 드레인 후 종료

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;

use logrelay_core::config::RelayConfig;
use logrelay_router::action::FileActionConfig;
use logrelay_router::action::file::FILE_ACTION_NAME;
use logrelay_router::{
    ActionRegistry, FileAction, ListenerSpec, RulesetLoader, Server, Template, parser_for,
};

use crate::metrics_server;
use crate::pid_file::{remove_pid_file, write_pid_file};

/// 데몬에 내장된 액션을 등록한 레지스트리를 만듭니다.
pub fn default_registry() -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry
        .register(Box::new(FileAction::new()))
        .map_err(|e| anyhow::anyhow!("failed to register file action: {}", e))?;
    Ok(registry)
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// SIGHUP 리로드 때 다시 읽을 설정 파일 경로
    config_path: PathBuf,
    server: Arc<Server>,
    start_time: Instant,
}

impl Orchestrator {
    /// 설정 파일을 로드하고 오케스트레이터를 만듭니다.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = RelayConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config, config_path).await
    }

    /// 이미 로드된 설정으로 오케스트레이터를 만듭니다.
    ///
    /// `config_path`는 SIGHUP 리로드에만 사용됩니다.
    pub async fn build_from_config(
        config: RelayConfig,
        config_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let metrics_enabled = config.metrics.enabled;
        if metrics_enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let registry = default_registry()?;
        let action_count = registry.len();

        let server = Server::new(config, registry)
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize server: {}", e))?;

        if metrics_enabled {
            metrics_server::record_daemon_metrics(action_count);
        }

        Ok(Self {
            config_path: config_path.into(),
            server: Arc::new(server),
            start_time: Instant::now(),
        })
    }

    /// 실행 중인 서버
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// 서버를 실행하고 종료 시그널 또는 서버 종료까지 대기합니다.
    ///
    /// PID 파일이 설정되어 있으면 시작 시 생성하고 종료 시 삭제합니다.
    pub async fn run(self) -> Result<()> {
        let config = self.server.config();
        let pid_path =
            (!config.general.pid_file.is_empty()).then(|| PathBuf::from(&config.general.pid_file));

        if let Some(path) = &pid_path {
            write_pid_file(path)?;
        }

        let result = self.serve(config.metrics.enabled).await;

        if let Some(path) = &pid_path {
            remove_pid_file(path);
        }
        result
    }

    async fn serve(&self, metrics_enabled: bool) -> Result<()> {
        let mut signals = Signals::install()?;

        let background = CancellationToken::new();
        let uptime_task = metrics_enabled
            .then(|| metrics_server::spawn_uptime_updater(self.start_time, background.clone()));

        let mut server_task = tokio::spawn({
            let server = Arc::clone(&self.server);
            async move { server.run().await }
        });

        tracing::info!(config = %self.config_path.display(), "logrelay running");

        // 서버가 먼저 끝나면 Some, 종료 시그널이면 None
        let exited = loop {
            tokio::select! {
                joined = &mut server_task => break Some(joined),
                received = signals.recv() => match received {
                    DaemonSignal::Reload => self.reload().await,
                    DaemonSignal::Shutdown(name) => {
                        tracing::info!(signal = name, "shutdown signal received");
                        break None;
                    }
                },
            }
        };

        let joined = match exited {
            Some(joined) => joined,
            None => {
                self.server.shutdown();
                server_task.await
            }
        };

        background.cancel();
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        match joined {
            Ok(Ok(())) => {
                tracing::info!("logrelay shut down");
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("server failed: {}", e)),
            Err(e) => Err(anyhow::anyhow!("server task failed: {}", e)),
        }
    }

    async fn reload(&self) {
        tracing::info!(config = %self.config_path.display(), "SIGHUP received, reloading");
        // 실패 원인은 서버가 이미 기록함
        if let Ok(rules) = self.server.reload(&self.config_path).await {
            tracing::info!(rules, "reload complete");
        }
    }
}

enum DaemonSignal {
    Reload,
    Shutdown(&'static str),
}

struct Signals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl Signals {
    fn install() -> Result<Self> {
        let install = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| anyhow::anyhow!("failed to install {} handler: {}", name, e))
        };
        Ok(Self {
            hangup: install(SignalKind::hangup(), "SIGHUP")?,
            terminate: install(SignalKind::terminate(), "SIGTERM")?,
            interrupt: install(SignalKind::interrupt(), "SIGINT")?,
        })
    }

    async fn recv(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.hangup.recv() => DaemonSignal::Reload,
            _ = self.terminate.recv() => DaemonSignal::Shutdown("SIGTERM"),
            _ = self.interrupt.recv() => DaemonSignal::Shutdown("SIGINT"),
        }
    }
}

/// `--validate` 결과
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub listener: String,
    pub parser: &'static str,
    pub rule_file: String,
    pub rules: usize,
    pub actions: Vec<String>,
    /// 룰별 문제 (`rule_id: 설명`)
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// 서버를 시작하지 않고 설정과 룰셋을 검사합니다.
///
/// 리스너/파서 타입과 룰셋 로드 실패는 에러로, 룰 단위 문제(등록되지 않은 액션,
/// 잘못된 파일 액션 설정, 템플릿 컴파일 실패)는 보고서의 `issues`로 반환합니다.
pub async fn validate_setup(config: &RelayConfig) -> Result<ValidationReport> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    let listener = ListenerSpec::from_config(&config.listener)
        .map_err(|e| anyhow::anyhow!("invalid listener: {}", e))?;
    let parser = parser_for(&config.parser.kind)
        .map_err(|e| anyhow::anyhow!("invalid parser: {}", e))?;
    let ruleset = RulesetLoader::load_file(&config.server.rule_file)
        .await
        .map_err(|e| anyhow::anyhow!("invalid ruleset: {}", e))?;
    let registry = default_registry()?;

    let mut issues = Vec::new();
    for rule in ruleset.rules() {
        for (name, value) in &rule.actions {
            if registry.get(name).is_none() {
                issues.push(format!("{}: action '{}' is not registered", rule.id, name));
                continue;
            }
            if name != FILE_ACTION_NAME {
                continue;
            }
            match FileActionConfig::from_value(value) {
                Ok(file) => {
                    if let Err(e) = Template::compile(&file.output_template) {
                        issues.push(format!("{}: {}", rule.id, e));
                    }
                }
                Err(e) => issues.push(format!("{}: {}", rule.id, e)),
            }
        }
    }

    Ok(ValidationReport {
        listener: listener.to_string(),
        parser: parser.format_name(),
        rule_file: config.server.rule_file.clone(),
        rules: ruleset.len(),
        actions: registry.names().into_iter().map(str::to_owned).collect(),
        issues,
    })
}
