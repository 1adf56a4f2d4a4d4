//! 파일 액션 -- 렌더링된 템플릿을 파일에 기록
//!
//! 룰 설정 예시 (TOML):
//! ```toml
//! [rule.actions.file]
//! output_filepath = "/var/log/logrelay/disk.log"
//! output_template = "{{.hostname}} {{.original_message}}\n"
//! overwrite = false
//! ```
//!
//! 같은 경로에 대한 쓰기는 경로별 비동기 뮤텍스로 직렬화되어 줄이 섞이지 않습니다.
//! 기록이 끝난 뒤 아무도 기다리지 않는 경로의 잠금은 맵에서 제거됩니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use logrelay_core::types::Message;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::action::{Action, ActionError};
use crate::template;

/// 파일 액션 이름
pub const FILE_ACTION_NAME: &str = "file";

/// 생성되는 출력 파일 권한 (소유자 읽기/쓰기)
const OUTPUT_FILE_MODE: u32 = 0o600;

/// 파일 액션 룰별 설정
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileActionConfig {
    /// 출력 파일 경로
    pub output_filepath: String,
    /// 출력 템플릿
    pub output_template: String,
    /// true이면 매 기록마다 파일을 비우고 씀 (기본: 추가)
    #[serde(default)]
    pub overwrite: bool,
}

impl FileActionConfig {
    /// 룰의 액션 설정 값에서 파일 액션 설정을 추출합니다.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ActionError> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| ActionError::Config(format!("file action: {e}")))?;

        if config.output_filepath.trim().is_empty() {
            return Err(ActionError::Config(
                "file action: output_filepath must not be empty".to_owned(),
            ));
        }
        if config.output_template.is_empty() {
            return Err(ActionError::Config(
                "file action: output_template must not be empty".to_owned(),
            ));
        }
        Ok(config)
    }
}

/// 파일 기록 액션
#[derive(Debug, Default)]
pub struct FileAction {
    /// 경로별 쓰기 잠금
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileAction {
    /// 새 파일 액션을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// 다른 태스크가 잡고 있지 않은 경로 잠금을 제거합니다.
    ///
    /// 복제는 맵 잠금 안에서만 일어나므로 strong count가 1이면 맵만 참조 중입니다.
    async fn release(&self, path: &Path) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(path);
        }
    }

    async fn write(&self, path: &Path, content: &str, overwrite: bool) -> Result<(), ActionError> {
        let path_lock = self.lock_for(path).await;
        let result = {
            let _guard = path_lock.lock().await;
            write_file(path, content, overwrite).await
        };
        drop(path_lock);
        self.release(path).await;
        result
    }

    #[cfg(test)]
    async fn tracked_paths(&self) -> usize {
        self.locks.lock().await.len()
    }
}

async fn write_file(path: &Path, content: &str, overwrite: bool) -> Result<(), ActionError> {
    let io_err = |op: &'static str| {
        let path = path.display().to_string();
        move |source| ActionError::Io { op, path, source }
    };

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true);
    if overwrite {
        options.truncate(true);
    } else {
        options.append(true);
    }
    #[cfg(unix)]
    options.mode(OUTPUT_FILE_MODE);

    let mut file = options.open(path).await.map_err(io_err("open"))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(io_err("write"))?;
    file.sync_all().await.map_err(io_err("sync"))?;
    Ok(())
}

impl Action for FileAction {
    fn name(&self) -> &str {
        FILE_ACTION_NAME
    }

    async fn process(
        &self,
        message: &Message,
        groups: &[String],
        config: &serde_json::Value,
    ) -> Result<(), ActionError> {
        let config = FileActionConfig::from_value(config)?;
        let rendered = template::render(message, groups, &config.output_template)?;
        let path = Path::new(&config.output_filepath);

        self.write(path, &rendered, config.overwrite).await?;

        debug!(
            path = %path.display(),
            bytes = rendered.len(),
            overwrite = config.overwrite,
            "file action wrote message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(body: &str) -> Message {
        Message::new("host1", body)
    }

    #[test]
    fn config_requires_path_and_template() {
        assert!(FileActionConfig::from_value(&json!({"output_template": "x"})).is_err());
        assert!(FileActionConfig::from_value(&json!({"output_filepath": "/tmp/x"})).is_err());
        assert!(
            FileActionConfig::from_value(&json!({"output_filepath": " ", "output_template": "x"}))
                .is_err()
        );
        let config = FileActionConfig::from_value(
            &json!({"output_filepath": "/tmp/x", "output_template": "{{.hostname}}"}),
        )
        .unwrap();
        assert!(!config.overwrite);
    }

    #[test]
    fn config_rejects_wrong_types() {
        let err = FileActionConfig::from_value(&json!({
            "output_filepath": "/tmp/x",
            "output_template": "x",
            "overwrite": "yes"
        }))
        .unwrap_err();
        assert!(matches!(err, ActionError::Config(_)));
    }

    #[tokio::test]
    async fn appends_rendered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let config = json!({
            "output_filepath": path.to_str().unwrap(),
            "output_template": "{{.hostname}} {{.original_message}}\\n",
        });
        let action = FileAction::new();

        Action::process(&action, &message("first"), &[], &config)
            .await
            .unwrap();
        Action::process(&action, &message("second"), &[], &config)
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "host1 first\nhost1 second\n");
    }

    #[tokio::test]
    async fn overwrite_truncates_each_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        let config = json!({
            "output_filepath": path.to_str().unwrap(),
            "output_template": "{{.original_message}}",
            "overwrite": true,
        });
        let action = FileAction::new();

        Action::process(&action, &message("a much longer first body"), &[], &config)
            .await
            .unwrap();
        Action::process(&action, &message("short"), &[], &config)
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private.log");
        let config = json!({
            "output_filepath": path.to_str().unwrap(),
            "output_template": "x",
        });
        Action::process(&FileAction::new(), &message("m"), &[], &config)
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn template_error_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.log");
        let config = json!({
            "output_filepath": path.to_str().unwrap(),
            "output_template": "{{index .match 3}}",
        });

        let err = Action::process(&FileAction::new(), &message("m"), &[], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Template(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/out.log");
        let config = json!({
            "output_filepath": path.to_str().unwrap(),
            "output_template": "x",
        });

        let err = Action::process(&FileAction::new(), &message("m"), &[], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Io { op: "open", .. }));
    }

    #[tokio::test]
    async fn concurrent_writes_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.log");
        let action = Arc::new(FileAction::new());
        let config = Arc::new(json!({
            "output_filepath": path.to_str().unwrap(),
            "output_template": "{{.original_message}}\\n",
        }));

        let mut handles = Vec::new();
        for i in 0..32 {
            let action = Arc::clone(&action);
            let config = Arc::clone(&config);
            handles.push(tokio::spawn(async move {
                let body = format!("line-{i:02}-{}", "x".repeat(256));
                Action::process(action.as_ref(), &message(&body), &[], &config)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 32);
        assert!(lines.iter().all(|l| l.starts_with("line-") && l.len() == 264));
    }

    #[tokio::test]
    async fn path_locks_are_released_after_writes() {
        let dir = tempfile::tempdir().unwrap();
        let action = Arc::new(FileAction::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let action = Arc::clone(&action);
            let path = dir.path().join(format!("out-{}.log", i % 4));
            handles.push(tokio::spawn(async move {
                let config = json!({
                    "output_filepath": path.to_str().unwrap(),
                    "output_template": "{{.original_message}}\\n",
                });
                Action::process(action.as_ref(), &message("m"), &[], &config)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(action.tracked_paths().await, 0);
        for i in 0..4 {
            let content = std::fs::read_to_string(dir.path().join(format!("out-{i}.log"))).unwrap();
            assert_eq!(content.lines().count(), 4);
        }
    }

    #[tokio::test]
    async fn failed_write_releases_path_lock() {
        let dir = tempfile::tempdir().unwrap();
        let action = FileAction::new();
        let config = json!({
            "output_filepath": dir.path().join("missing/out.log").to_str().unwrap(),
            "output_template": "x",
        });

        assert!(Action::process(&action, &message("m"), &[], &config).await.is_err());
        assert_eq!(action.tracked_paths().await, 0);
    }
}
