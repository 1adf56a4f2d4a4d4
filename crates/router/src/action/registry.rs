//! 액션 레지스트리
//!
//! 이름 → 액션 인스턴스 매핑입니다. `BTreeMap`으로 저장하여 항상 이름 순으로
//! 순회하므로 디스패치 순서가 결정적입니다.

use std::collections::BTreeMap;

use crate::action::DynAction;
use crate::error::RouterError;

/// 액션 레지스트리
///
/// # 사용 예시
/// ```ignore
/// let mut registry = ActionRegistry::new();
/// registry.register(Box::new(FileAction::new()))?;
/// let registry = Arc::new(registry);
/// ```
#[derive(Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Box<dyn DynAction>>,
}

impl ActionRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 액션을 등록합니다.
    ///
    /// 같은 이름이 이미 등록되어 있으면 에러를 반환합니다.
    pub fn register(&mut self, action: Box<dyn DynAction>) -> Result<(), RouterError> {
        let name = action.name().to_owned();
        if name.is_empty() {
            return Err(RouterError::InvalidAction(
                "action name must not be empty".to_owned(),
            ));
        }
        if self.actions.contains_key(&name) {
            return Err(RouterError::InvalidAction(format!(
                "action '{name}' is already registered"
            )));
        }
        self.actions.insert(name, action);
        Ok(())
    }

    /// 이름으로 액션을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&dyn DynAction> {
        self.actions.get(name).map(|a| a.as_ref())
    }

    /// 이름 순으로 (이름, 액션)을 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn DynAction)> {
        self.actions
            .iter()
            .map(|(name, action)| (name.as_str(), action.as_ref()))
    }

    /// 등록된 액션 이름 목록 (정렬됨)
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    /// 등록된 액션 수
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
