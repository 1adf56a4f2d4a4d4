//! 통합 테스트 -- 리스너부터 파일 액션까지 전체 흐름 검증
//!
//! 실제 TCP/UNIX 소켓으로 서버를 띄우고 클라이언트가 보낸 메시지가
//! 룰 매칭을 거쳐 파일에 기록되는지 확인합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::task::JoinHandle;

use logrelay_core::config::RelayConfig;
use logrelay_router::{
    ActionRegistry, FileAction, Listener, ListenerSpec, RouterError, Server,
};

/// 실행 중인 서버와 임시 디렉토리
struct Harness {
    server: Arc<Server>,
    addr: String,
    task: JoinHandle<Result<(), RouterError>>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn send(&self, frames: &[&str]) {
        let mut stream = TcpStream::connect(&self.addr).await.unwrap();
        for frame in frames {
            stream.write_all(frame.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
        }
        stream.shutdown().await.unwrap();
    }

    /// 서버를 멈추고, 종료 후 검사를 위해 임시 디렉토리를 돌려줍니다.
    async fn stop(self) -> tempfile::TempDir {
        self.server.shutdown();
        self.task.await.unwrap().unwrap();
        self.dir
    }
}

fn rfc5424(host: &str, body: &str) -> String {
    format!("<13>1 2024-01-15T12:00:00Z {host} app 100 - - {body}")
}

/// `{dir}` 자리표시자를 임시 디렉토리 경로로 바꿔 룰 파일을 씁니다.
fn file_rule(id: &str, regexp: &str, host_match: Option<&str>, output: &str) -> String {
    let host = host_match
        .map(|h| format!("host_match = '{h}'\n"))
        .unwrap_or_default();
    format!(
        r#"
[[rule]]
id = "{id}"
regexp = '{regexp}'
{host}
[rule.actions.file]
output_filepath = "{{dir}}/{output}"
output_template = "{{{{.hostname}}}} {{{{.original_message}}}}\n"
"#
    )
}

async fn write_rules(dir: &Path, rules: &str) -> PathBuf {
    let path = dir.join("rules.toml");
    let body = rules.replace("{dir}", &dir.display().to_string());
    tokio::fs::write(&path, body).await.unwrap();
    path
}

async fn start(rules: &str, tweak: impl FnOnce(&mut RelayConfig)) -> Harness {
    let spec = ListenerSpec::Tcp {
        addr: "127.0.0.1".to_owned(),
        port: 0,
    };
    start_on(rules, spec, tweak).await
}

async fn start_on(
    rules: &str,
    spec: ListenerSpec,
    tweak: impl FnOnce(&mut RelayConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let rule_file = write_rules(dir.path(), rules).await;

    let mut config = RelayConfig::default();
    config.server.rule_file = rule_file.display().to_string();
    config.parser.timeout_ms = 2_000;
    config.dispatch.workers = 1;
    config.shutdown.drain_timeout_secs = 5;
    tweak(&mut config);

    let mut registry = ActionRegistry::new();
    registry.register(Box::new(FileAction::new())).unwrap();
    let server = Arc::new(Server::new(config, registry).await.unwrap());

    let listener = Listener::bind(&spec).await.unwrap();
    let addr = listener.local_addr();

    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with_listener(listener).await }
    });

    Harness {
        server,
        addr,
        task,
        dir,
    }
}

/// 파일 내용이 기대값이 될 때까지 기다립니다.
async fn wait_for_content(path: &Path, expected: &str) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        if content == expected || tokio::time::Instant::now() >= deadline {
            return content;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn disk_full_message_is_appended_and_others_ignored() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |_| {}).await;
    let output = harness.path("disk.log");

    harness
        .send(&[
            &rfc5424("host1", "disk ok"),
            &rfc5424("host1", "disk is full on /data"),
        ])
        .await;

    let content = wait_for_content(&output, "host1 disk is full on /data\n").await;
    assert_eq!(content, "host1 disk is full on /data\n");

    let _dir = harness.stop().await;
    let content = tokio::fs::read_to_string(&output).await.unwrap();
    assert_eq!(content, "host1 disk is full on /data\n");
}

#[tokio::test]
async fn non_matching_message_writes_nothing() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |_| {}).await;
    let output = harness.path("disk.log");

    harness.send(&[&rfc5424("host1", "disk ok")]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _dir = harness.stop().await;

    assert!(!output.exists());
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |_| {}).await;
    let output = harness.path("disk.log");

    harness
        .send(&[
            "this is not syslog",
            &rfc5424("host1", "disk is full on /data"),
        ])
        .await;

    let content = wait_for_content(&output, "host1 disk is full on /data\n").await;
    assert_eq!(content, "host1 disk is full on /data\n");
    harness.stop().await;
}

#[tokio::test]
async fn octet_counted_frames_are_accepted() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |_| {}).await;
    let output = harness.path("disk.log");

    let frame = rfc5424("host2", "disk is full");
    let mut stream = TcpStream::connect(&harness.addr).await.unwrap();
    stream
        .write_all(format!("{} {frame}", frame.len()).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let content = wait_for_content(&output, "host2 disk is full\n").await;
    assert_eq!(content, "host2 disk is full\n");
    harness.stop().await;
}

#[tokio::test]
async fn two_matching_rules_both_fire() {
    let rules = format!(
        "{}{}",
        file_rule("disk", "disk", None, "a.log"),
        file_rule("full", "full", None, "b.log")
    );
    let harness = start(&rules, |_| {}).await;

    harness.send(&[&rfc5424("host1", "disk is full")]).await;

    assert_eq!(
        wait_for_content(&harness.path("a.log"), "host1 disk is full\n").await,
        "host1 disk is full\n"
    );
    assert_eq!(
        wait_for_content(&harness.path("b.log"), "host1 disk is full\n").await,
        "host1 disk is full\n"
    );
    harness.stop().await;
}

#[tokio::test]
async fn host_match_filters_hosts() {
    let harness = start(
        &file_rule("web-errors", "error", Some("^web-"), "web.log"),
        |_| {},
    )
    .await;
    let output = harness.path("web.log");

    harness
        .send(&[
            &rfc5424("db-1", "error in query"),
            &rfc5424("web-1", "error in handler"),
        ])
        .await;

    let content = wait_for_content(&output, "web-1 error in handler\n").await;
    assert_eq!(content, "web-1 error in handler\n");
    harness.stop().await;
}

#[tokio::test]
async fn idle_connection_times_out_without_affecting_others() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |config| {
        config.parser.timeout_ms = 100;
    })
    .await;

    let mut idle = TcpStream::connect(&harness.addr).await.unwrap();

    // 서버가 유휴 연결을 닫으면 read가 0을 반환
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .expect("idle connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    harness
        .send(&[&rfc5424("host1", "disk is full")])
        .await;
    let content = wait_for_content(&harness.path("disk.log"), "host1 disk is full\n").await;
    assert_eq!(content, "host1 disk is full\n");
    harness.stop().await;
}

#[tokio::test]
async fn invalid_reload_keeps_previous_ruleset() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |_| {}).await;
    let rule_file = harness.path("rules.toml");

    // 중복 ID (대소문자 무시)
    let broken = format!(
        "{}{}",
        file_rule("dup", "a", None, "x.log"),
        file_rule("DUP", "b", None, "y.log")
    );
    write_rules(harness.dir.path(), &broken).await;

    let err = harness.server.reload_ruleset().await.unwrap_err();
    assert!(err.to_string().contains("duplicate"));
    assert_eq!(
        harness.server.ruleset().current().unwrap().rules()[0].id,
        "disk-full"
    );
    assert!(rule_file.exists());

    harness.send(&[&rfc5424("host1", "disk is full")]).await;
    let content = wait_for_content(&harness.path("disk.log"), "host1 disk is full\n").await;
    assert_eq!(content, "host1 disk is full\n");
    harness.stop().await;
}

#[tokio::test]
async fn successful_reload_routes_to_new_rules() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "old.log"), |_| {}).await;

    write_rules(
        harness.dir.path(),
        &file_rule("disk-full-v2", "disk.*full", None, "new.log"),
    )
    .await;
    assert_eq!(harness.server.reload_ruleset().await.unwrap(), 1);

    harness.send(&[&rfc5424("host1", "disk is full")]).await;
    let content = wait_for_content(&harness.path("new.log"), "host1 disk is full\n").await;
    assert_eq!(content, "host1 disk is full\n");
    assert!(!harness.path("old.log").exists());
    harness.stop().await;
}

#[tokio::test]
async fn unix_listener_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let rule_file = write_rules(
        dir.path(),
        &file_rule("disk-full", "disk.*full", None, "disk.log"),
    )
    .await;
    let socket = dir.path().join("logrelay.sock");

    let mut config = RelayConfig::default();
    config.server.rule_file = rule_file.display().to_string();
    config.listener.kind = "unix".to_owned();
    config.listener.unix.path = socket.display().to_string();
    config.shutdown.drain_timeout_secs = 5;

    let mut registry = ActionRegistry::new();
    registry.register(Box::new(FileAction::new())).unwrap();
    let server = Arc::new(Server::new(config, registry).await.unwrap());
    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    // 소켓 파일이 생길 때까지 대기
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !socket.exists() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    stream
        .write_all(format!("{}\n", rfc5424("local", "disk is full")).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let output = dir.path().join("disk.log");
    let content = wait_for_content(&output, "local disk is full\n").await;
    assert_eq!(content, "local disk is full\n");

    server.shutdown();
    task.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let harness = start(&file_rule("disk-full", "disk.*full", None, "disk.log"), |config| {
        config.parser.timeout_ms = 60_000;
    })
    .await;

    let mut open = TcpStream::connect(&harness.addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), harness.stop())
        .await
        .expect("server did not drain in time");

    let mut buf = [0u8; 1];
    let n = open.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
}

fn tls_spec() -> ListenerSpec {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    ListenerSpec::Tls {
        addr: "127.0.0.1".to_owned(),
        port: 0,
        cert_path: fixtures.join("cert.pem"),
        key_path: fixtures.join("key.pem"),
    }
}

fn tls_connector() -> tokio_native_tls::TlsConnector {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    tokio_native_tls::TlsConnector::from(connector)
}

#[tokio::test]
async fn tls_listener_end_to_end() {
    let harness = start_on(
        &file_rule("disk-full", "disk.*full", None, "disk.log"),
        tls_spec(),
        |_| {},
    )
    .await;

    let tcp = TcpStream::connect(&harness.addr).await.unwrap();
    let mut stream = tls_connector().connect("localhost", tcp).await.unwrap();
    stream
        .write_all(format!("{}\n", rfc5424("secure", "disk is full")).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let output = harness.path("disk.log");
    let content = wait_for_content(&output, "secure disk is full\n").await;
    assert_eq!(content, "secure disk is full\n");

    harness.stop().await;
}

#[tokio::test]
async fn tls_client_that_never_handshakes_is_dropped() {
    let harness = start_on(
        &file_rule("disk-full", "disk.*full", None, "disk.log"),
        tls_spec(),
        |config| config.parser.timeout_ms = 200,
    )
    .await;

    // TCP만 연결하고 ClientHello를 보내지 않음
    let mut silent = TcpStream::connect(&harness.addr).await.unwrap();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), silent.read(&mut buf))
        .await
        .expect("server kept an unestablished connection open");
    assert_eq!(read.unwrap_or(0), 0);

    // 다른 클라이언트는 영향을 받지 않음
    let tcp = TcpStream::connect(&harness.addr).await.unwrap();
    let mut stream = tls_connector().connect("localhost", tcp).await.unwrap();
    stream
        .write_all(format!("{}\n", rfc5424("late", "disk is full")).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let output = harness.path("disk.log");
    let content = wait_for_content(&output, "late disk is full\n").await;
    assert_eq!(content, "late disk is full\n");

    harness.stop().await;
}
