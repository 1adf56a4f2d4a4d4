//! 액션 플러그인 -- 룰 매칭 시 실행되는 부수 효과 처리기
//!
//! [`Action`] trait은 룰별 설정을 호출 인자로 받는 단일 호출 계약입니다.
//! 공유 인스턴스에 설정을 저장하지 않으므로 여러 디스패치 워커가 같은 액션을
//! 동시에 호출해도 안전합니다. 액션 내부 상태(파일 핸들 등)는 액션이 직접 동기화합니다.
//!
//! [`ActionRegistry`]는 조립 시점에 한 번 채워진 뒤 읽기 전용으로 공유됩니다.
//!
//! # 구현 예시
//! ```ignore
//! struct Echo;
//!
//! impl Action for Echo {
//!     fn name(&self) -> &str { "echo" }
//!
//!     async fn process(
//!         &self,
//!         message: &Message,
//!         groups: &[String],
//!         config: &serde_json::Value,
//!     ) -> Result<(), ActionError> {
//!         println!("{} {:?}", message.body, groups);
//!         Ok(())
//!     }
//! }
//! ```

pub mod file;
pub mod registry;

pub use file::{FileAction, FileActionConfig};
pub use registry::ActionRegistry;

use std::future::Future;
use std::pin::Pin;

use logrelay_core::types::Message;

use crate::template::TemplateError;

/// Boxed future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 액션 호출 에러
///
/// 디스패처가 액션 이름, 룰 ID와 함께 로그로 남기며 다른 액션/룰 처리를 멈추지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// 룰의 액션 설정이 잘못됨
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 출력 템플릿 렌더링 실패
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// 출력 I/O 실패
    #[error("{op} {path}: {source}")]
    Io {
        /// 수행하던 작업
        op: &'static str,
        /// 대상 경로
        path: String,
        /// 원인
        source: std::io::Error,
    },

    /// 기타 액션 고유 에러
    #[error("{0}")]
    Failed(String),
}

/// 액션 플러그인 trait
pub trait Action: Send + Sync {
    /// 레지스트리 등록 이름 (룰 설정의 키와 일치)
    fn name(&self) -> &str;

    /// 매칭된 메시지를 처리합니다.
    ///
    /// `groups[0]`은 전체 매치, 이후는 캡처 그룹입니다.
    /// `config`는 해당 룰의 이 액션 설정 블록입니다.
    fn process(
        &self,
        message: &Message,
        groups: &[String],
        config: &serde_json::Value,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}

/// dyn-compatible 액션 trait
///
/// `Action` trait은 RPITIT를 사용하므로 `dyn Action`이 불가합니다.
/// `DynAction`은 `BoxFuture`를 반환하여 레지스트리에 trait 객체로 저장할 수 있게 합니다.
pub trait DynAction: Send + Sync {
    /// 레지스트리 등록 이름
    fn name(&self) -> &str;

    /// 매칭된 메시지를 처리합니다.
    fn process<'a>(
        &'a self,
        message: &'a Message,
        groups: &'a [String],
        config: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), ActionError>>;
}

/// Action을 구현한 타입은 자동으로 DynAction도 구현됩니다.
impl<T: Action> DynAction for T {
    fn name(&self) -> &str {
        Action::name(self)
    }

    fn process<'a>(
        &'a self,
        message: &'a Message,
        groups: &'a [String],
        config: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), ActionError>> {
        Box::pin(Action::process(self, message, groups, config))
    }
}
