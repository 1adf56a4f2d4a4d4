//! 룰 매칭 / 액션 디스패치와 고정 크기 워커 풀
//!
//! 연결 핸들러는 파싱한 메시지를 [`DispatchQueue`]에 넣고 바로 다음 프레임을 읽습니다.
//! [`WorkerPool`]의 워커들이 큐를 소비하며 [`Dispatcher::dispatch`]를 호출합니다.
//!
//! ```text
//! Connection ──submit──▶ [bounded mpsc] ──recv──▶ worker 0..N ──▶ Dispatcher
//!                                                            └──▶ Action::process
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use logrelay_core::config::{DispatchConfig, OverflowPolicy};
use logrelay_core::metrics as m;
use logrelay_core::types::Message;

use crate::action::ActionRegistry;
use crate::rule::{RulesetHandle, matching_rules};
use crate::settings::RuntimeSettings;

/// 메시지 하나의 디스패치 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// 매칭된 룰 수
    pub rules_matched: usize,
    /// 호출된 액션 수
    pub actions_invoked: usize,
    /// 실패한 액션 수
    pub actions_failed: usize,
}

/// 룰 매처 / 액션 디스패처
///
/// 현재 룰셋의 모든 룰을 순서대로 평가하고, 매칭된 룰마다 레지스트리의 액션을
/// 이름 순으로 호출합니다. 룰의 `actions` 블록에 항목이 없는 액션은 건너뜁니다.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    rules: RulesetHandle,
    registry: Arc<ActionRegistry>,
    settings: watch::Receiver<RuntimeSettings>,
}

impl Dispatcher {
    /// 새 디스패처를 생성합니다.
    pub fn new(
        rules: RulesetHandle,
        registry: Arc<ActionRegistry>,
        settings: watch::Receiver<RuntimeSettings>,
    ) -> Self {
        Self {
            rules,
            registry,
            settings,
        }
    }

    /// 메시지 하나를 룰셋에 대해 평가하고 액션을 호출합니다.
    ///
    /// 액션 에러는 로그로 남기고 나머지 액션/룰 처리를 계속합니다.
    pub async fn dispatch(&self, message: &Message) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        let Some(ruleset) = self.rules.current() else {
            trace!("no ruleset loaded, skipping message");
            return summary;
        };
        let extended = self.settings.borrow().extended;

        for (rule, groups) in matching_rules(&ruleset, message) {
            summary.rules_matched += 1;
            metrics::counter!(m::RULES_MATCHES_TOTAL).increment(1);

            for (name, action) in self.registry.iter() {
                let Some(config) = rule.action_config(name) else {
                    trace!(action = name, rule_id = %rule.id, "action not configured for rule");
                    continue;
                };

                debug!(action = name, rule_id = %rule.id, "trying to execute action");
                let started = Instant::now();
                let result = action.process(message, &groups, config).await;
                let elapsed = started.elapsed();

                summary.actions_invoked += 1;
                record_action(name, elapsed, result.is_ok());

                if extended {
                    info!(
                        action = name,
                        rule_id = %rule.id,
                        duration_us = elapsed.as_micros() as u64,
                        "action finished"
                    );
                }

                if let Err(e) = result {
                    summary.actions_failed += 1;
                    error!(
                        action = name,
                        rule_id = %rule.id,
                        error = %e,
                        "failed to process action"
                    );
                }
            }
        }

        summary
    }
}

fn record_action(name: &str, elapsed: Duration, success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::histogram!(m::ACTION_DURATION_SECONDS, m::LABEL_ACTION => name.to_owned())
        .record(elapsed.as_secs_f64());
    metrics::counter!(
        m::ACTION_INVOCATIONS_TOTAL,
        m::LABEL_ACTION => name.to_owned(),
        m::LABEL_RESULT => result
    )
    .increment(1);
}

/// 큐 제출 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// 큐에 들어감
    Queued,
    /// 큐가 가득 차서 버려짐 (`drop` 정책)
    Dropped,
    /// 워커 풀이 종료됨
    Closed,
}

/// 디스패치 큐 송신 측
///
/// 연결 핸들러마다 하나씩 복제되어 전달됩니다.
/// 모든 복제본이 drop되면 워커들은 남은 메시지를 처리한 뒤 종료합니다.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Message>,
    policy: OverflowPolicy,
}

impl DispatchQueue {
    pub(crate) fn new(tx: mpsc::Sender<Message>, policy: OverflowPolicy) -> Self {
        Self { tx, policy }
    }

    /// 메시지를 큐에 제출합니다.
    ///
    /// `drop` 정책에서는 절대 대기하지 않고, `block` 정책에서는 자리가 날 때까지 대기합니다.
    pub async fn submit(&self, message: Message) -> Submitted {
        let submitted = match self.policy {
            OverflowPolicy::Drop => match self.tx.try_send(message) {
                Ok(()) => Submitted::Queued,
                Err(TrySendError::Full(dropped)) => {
                    metrics::counter!(m::DISPATCH_DROPPED_TOTAL).increment(1);
                    warn!(
                        hostname = %dropped.hostname,
                        capacity = self.tx.max_capacity(),
                        "dispatch queue full, dropping message"
                    );
                    Submitted::Dropped
                }
                Err(TrySendError::Closed(_)) => Submitted::Closed,
            },
            OverflowPolicy::Block => match self.tx.send(message).await {
                Ok(()) => Submitted::Queued,
                Err(_) => Submitted::Closed,
            },
        };

        if submitted == Submitted::Queued {
            metrics::gauge!(m::DISPATCH_QUEUE_DEPTH).set(self.depth() as f64);
        }
        submitted
    }

    /// 현재 큐에 대기 중인 메시지 수
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// 오버플로 정책
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

/// 고정 크기 디스패치 워커 풀
///
/// 워커들은 하나의 수신자를 뮤텍스로 공유하며 메시지마다 별도 태스크를 띄워
/// 디스패치합니다. 액션이 패닉해도 해당 메시지만 실패하고 워커는 계속 동작합니다.
/// 메시지별 태스크는 풀이 추적하며 drain 제한 시간이 지나면 함께 중단됩니다.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    jobs: TaskTracker,
    abort: CancellationToken,
}

impl WorkerPool {
    /// 워커 풀을 시작하고 제출용 큐를 반환합니다.
    pub fn start(dispatcher: Dispatcher, config: &DispatchConfig) -> (DispatchQueue, Self) {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let jobs = TaskTracker::new();
        let abort = CancellationToken::new();

        let handles = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    rx: Arc::clone(&rx),
                    dispatcher: dispatcher.clone(),
                    jobs: jobs.clone(),
                    abort: abort.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "dispatch worker pool started"
        );

        let queue = DispatchQueue::new(tx, config.overflow);
        let pool = Self {
            handles,
            jobs,
            abort,
        };
        (queue, pool)
    }

    /// 워커 수
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// 큐가 닫힌 뒤 워커들이 남은 메시지를 처리할 때까지 기다립니다.
    ///
    /// 모든 [`DispatchQueue`]가 drop된 뒤 호출해야 합니다.
    /// 제한 시간 안에 끝나면 `true`, 초과하면 남은 워커와 진행 중인 메시지 태스크를
    /// 모두 중단하고 `false`를 반환합니다.
    pub async fn drain(self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut handles = self.handles.into_iter();

        while let Some(mut handle) = handles.next() {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                self.abort.cancel();
                handle.abort();
                for rest in handles {
                    rest.abort();
                }
                warn!(
                    in_flight = self.jobs.len(),
                    "drain timed out, aborting in-flight dispatches"
                );
                return false;
            }
        }

        self.jobs.close();
        self.jobs.wait().await;
        true
    }
}

struct Worker {
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    dispatcher: Dispatcher,
    jobs: TaskTracker,
    abort: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let id = self.id;
        loop {
            let next = self.rx.lock().await.recv().await;
            let Some(message) = next else {
                break;
            };

            let job = {
                let dispatcher = self.dispatcher.clone();
                let abort = self.abort.clone();
                self.jobs.spawn(async move {
                    tokio::select! {
                        biased;
                        _ = abort.cancelled() => None,
                        summary = dispatcher.dispatch(&message) => Some(summary),
                    }
                })
            };

            match job.await {
                Ok(Some(summary)) => {
                    trace!(
                        worker = id,
                        rules_matched = summary.rules_matched,
                        actions_invoked = summary.actions_invoked,
                        actions_failed = summary.actions_failed,
                        "message dispatched"
                    );
                }
                Ok(None) => {
                    warn!(worker = id, "dispatch aborted by drain timeout");
                }
                Err(e) if e.is_panic() => {
                    metrics::counter!(m::DISPATCH_PANICS_TOTAL).increment(1);
                    error!(worker = id, "dispatch task panicked, message discarded");
                }
                Err(e) => {
                    warn!(worker = id, error = %e, "dispatch task cancelled");
                }
            }
        }

        debug!(worker = id, "dispatch worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::action::{Action, ActionError};
    use crate::rule::{Rule, Ruleset};

    /// 호출 기록용 테스트 액션
    struct Recorder {
        name: &'static str,
        calls: Arc<std::sync::Mutex<Vec<(String, Vec<String>)>>>,
        fail: bool,
    }

    impl Action for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(
            &self,
            message: &Message,
            groups: &[String],
            _config: &serde_json::Value,
        ) -> Result<(), ActionError> {
            self.calls
                .lock()
                .unwrap()
                .push((message.body.clone(), groups.to_vec()));
            if self.fail {
                return Err(ActionError::Failed("boom".to_owned()));
            }
            Ok(())
        }
    }

    struct Panicker(Arc<AtomicUsize>);

    impl Action for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        async fn process(
            &self,
            message: &Message,
            _groups: &[String],
            _config: &serde_json::Value,
        ) -> Result<(), ActionError> {
            if message.body.contains("panic") {
                panic!("action panicked");
            }
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 처리에 오래 걸리는 테스트 액션
    struct Slow {
        delay: Duration,
        completed: Arc<AtomicUsize>,
    }

    impl Action for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn process(
            &self,
            _message: &Message,
            _groups: &[String],
            _config: &serde_json::Value,
        ) -> Result<(), ActionError> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn rule(id: &str, pattern: &str, host: Option<&str>, actions: &[&str]) -> Rule {
        let actions: BTreeMap<String, serde_json::Value> = actions
            .iter()
            .map(|name| ((*name).to_owned(), json!({})))
            .collect();
        Rule::new(id, pattern, host, actions).unwrap()
    }

    fn dispatcher(rules: Vec<Rule>, registry: ActionRegistry) -> Dispatcher {
        let handle = RulesetHandle::new(Some(Ruleset::new(rules).unwrap()));
        let (_tx, rx) = watch::channel(RuntimeSettings::default());
        Dispatcher::new(handle, Arc::new(registry), rx)
    }

    type Calls = Arc<std::sync::Mutex<Vec<(String, Vec<String>)>>>;

    fn recorder(name: &'static str, fail: bool) -> (Box<Recorder>, Calls) {
        let calls = Calls::default();
        (
            Box::new(Recorder {
                name,
                calls: Arc::clone(&calls),
                fail,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn no_ruleset_dispatches_nothing() {
        let (rec, calls) = recorder("rec", false);
        let mut registry = ActionRegistry::new();
        registry.register(rec).unwrap();
        let (_tx, rx) = watch::channel(RuntimeSettings::default());
        let d = Dispatcher::new(RulesetHandle::empty(), Arc::new(registry), rx);

        let summary = d.dispatch(&Message::new("h", "anything")).await;
        assert_eq!(summary, DispatchSummary::default());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_matching_rule_fires() {
        let (rec, calls) = recorder("rec", false);
        let mut registry = ActionRegistry::new();
        registry.register(rec).unwrap();
        let d = dispatcher(
            vec![
                rule("disk", r"disk (\w+)", None, &["rec"]),
                rule("full", "full", None, &["rec"]),
                rule("other", "nomatch", None, &["rec"]),
            ],
            registry,
        );

        let summary = d.dispatch(&Message::new("h", "disk sda is full")).await;
        assert_eq!(summary.rules_matched, 2);
        assert_eq!(summary.actions_invoked, 2);

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].1, vec!["disk sda", "sda"]);
        assert_eq!(calls[1].1, vec!["full"]);
    }

    #[tokio::test]
    async fn host_mismatch_never_dispatches() {
        let (rec, calls) = recorder("rec", false);
        let mut registry = ActionRegistry::new();
        registry.register(rec).unwrap();
        let d = dispatcher(vec![rule("web", "error", Some("^web-"), &["rec"])], registry);

        let summary = d.dispatch(&Message::new("db-01", "error")).await;
        assert_eq!(summary.rules_matched, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_action_is_skipped() {
        let (a, a_calls) = recorder("a", false);
        let (b, b_calls) = recorder("b", false);
        let mut registry = ActionRegistry::new();
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        let d = dispatcher(vec![rule("only-b", "x", None, &["b"])], registry);

        let summary = d.dispatch(&Message::new("h", "x")).await;
        assert_eq!(summary.actions_invoked, 1);
        assert!(a_calls.lock().unwrap().is_empty());
        assert_eq!(b_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn action_failure_does_not_stop_others() {
        let (bad, bad_calls) = recorder("a-bad", true);
        let (good, good_calls) = recorder("b-good", false);
        let mut registry = ActionRegistry::new();
        registry.register(bad).unwrap();
        registry.register(good).unwrap();
        let d = dispatcher(
            vec![
                rule("r1", "x", None, &["a-bad", "b-good"]),
                rule("r2", "x", None, &["a-bad", "b-good"]),
            ],
            registry,
        );

        let summary = d.dispatch(&Message::new("h", "x")).await;
        assert_eq!(summary.actions_invoked, 4);
        assert_eq!(summary.actions_failed, 2);
        assert_eq!(bad_calls.lock().unwrap().len(), 2);
        assert_eq!(good_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pool_processes_queued_messages_and_drains() {
        let (rec, calls) = recorder("rec", false);
        let mut registry = ActionRegistry::new();
        registry.register(rec).unwrap();
        let d = dispatcher(vec![rule("all", ".", None, &["rec"])], registry);

        let config = DispatchConfig {
            workers: 2,
            queue_capacity: 16,
            overflow: OverflowPolicy::Block,
        };
        let (queue, pool) = WorkerPool::start(d, &config);
        assert_eq!(pool.size(), 2);

        for i in 0..10 {
            let outcome = queue.submit(Message::new("h", format!("m{i}"))).await;
            assert_eq!(outcome, Submitted::Queued);
        }
        drop(queue);

        assert!(pool.drain(Duration::from_secs(5)).await);
        assert_eq!(calls.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn full_queue_drops_under_drop_policy() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = DispatchQueue {
            tx,
            policy: OverflowPolicy::Drop,
        };

        assert_eq!(queue.submit(Message::new("h", "1")).await, Submitted::Queued);
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.submit(Message::new("h", "2")).await, Submitted::Dropped);
    }

    #[tokio::test]
    async fn closed_queue_reports_closed() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let queue = DispatchQueue {
            tx,
            policy: OverflowPolicy::Block,
        };
        assert_eq!(queue.submit(Message::new("h", "1")).await, Submitted::Closed);
    }

    #[tokio::test]
    async fn panicking_action_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        registry
            .register(Box::new(Panicker(Arc::clone(&counter))))
            .unwrap();
        let d = dispatcher(vec![rule("all", ".", None, &["panicker"])], registry);

        let config = DispatchConfig {
            workers: 1,
            queue_capacity: 8,
            overflow: OverflowPolicy::Block,
        };
        let (queue, pool) = WorkerPool::start(d, &config);
        queue.submit(Message::new("h", "please panic")).await;
        queue.submit(Message::new("h", "fine")).await;
        drop(queue);

        assert!(pool.drain(Duration::from_secs(5)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_timeout_aborts_in_flight_dispatch() {
        let completed = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        registry
            .register(Box::new(Slow {
                delay: Duration::from_millis(500),
                completed: Arc::clone(&completed),
            }))
            .unwrap();
        let d = dispatcher(vec![rule("all", ".", None, &["slow"])], registry);

        let config = DispatchConfig {
            workers: 1,
            queue_capacity: 4,
            overflow: OverflowPolicy::Block,
        };
        let (queue, pool) = WorkerPool::start(d, &config);
        queue.submit(Message::new("h", "slow one")).await;
        drop(queue);

        // 워커가 메시지를 꺼내 액션을 시작할 시간을 줍니다.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pool.drain(Duration::from_millis(50)).await);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }
}
