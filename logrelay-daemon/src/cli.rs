//! CLI argument definitions for logrelay-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use logrelay_core::config::RelayConfig;

/// logrelay syslog 수신 데몬
///
/// 설정된 리스너로 syslog 메시지를 받아 룰에 매칭되는 액션을 실행합니다.
#[derive(Parser, Debug)]
#[command(name = "logrelay")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logrelay.toml configuration file.
    #[arg(short, long, env = "LOGRELAY_CONFIG", default_value = "logrelay.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and ruleset, then exit without starting the server.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// CLI 오버라이드를 설정에 적용합니다.
    ///
    /// 환경변수 오버라이드 이후에 호출되므로 CLI 값이 최종 우선순위를 가집니다.
    pub fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.log.format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}
