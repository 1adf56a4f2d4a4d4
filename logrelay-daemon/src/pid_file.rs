//! PID 파일 생성/삭제
//!
//! 프로세스 ID를 줄바꿈 없는 10진수로 기록합니다. 이미 파일이 있으면 다른
//! 인스턴스가 실행 중인 것으로 보고 시작을 거부합니다.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::Result;

/// 현재 프로세스의 PID를 기록합니다.
///
/// # Security
///
/// - `create_new(true)`로 원자적으로 생성 (TOCTOU 방지)
/// - 생성된 파일이 일반 파일인지 확인 (심볼릭 링크 공격 방지)
/// - 부모 디렉토리는 0o700, 파일은 0o600
///
/// # Errors
///
/// 파일이 이미 있거나 쓸 수 없으면 에러를 반환합니다.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to create PID file {}: {}",
                path.display(),
                e
            ));
        }
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    write!(file, "{pid}")?;
    file.sync_all()?;

    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// PID 파일을 삭제합니다. 실패해도 경고만 남깁니다.
pub fn remove_pid_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}
