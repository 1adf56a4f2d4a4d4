use anyhow::Result;
use clap::Parser;

use logrelay_core::config::RelayConfig;
use logrelay_daemon::cli::DaemonCli;
use logrelay_daemon::logging::init_tracing;
use logrelay_daemon::orchestrator::{Orchestrator, validate_setup};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드: 파일 -> 환경변수 -> CLI 순으로 오버라이드
    let mut config = RelayConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        let report = validate_setup(&config).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.is_ok() {
            return Err(anyhow::anyhow!(
                "{} problem(s) found in {}",
                report.issues.len(),
                report.rule_file
            ));
        }
        return Ok(());
    }

    init_tracing(&config.log)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "logrelay starting"
    );

    let orchestrator = Orchestrator::build_from_config(config, &cli.config).await?;
    orchestrator.run().await
}
