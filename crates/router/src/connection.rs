//! 연결 핸들러 -- 연결별 읽기 루프
//!
//! 매 반복마다 파싱 제한 시간을 걸고 다음 프레임을 읽습니다.
//!
//! | 결과 | 처리 |
//! |---|---|
//! | 성공 | 디스패치 큐에 제출 후 계속 |
//! | 형식 오류 | 로그 후 계속 |
//! | 스트림 종료 | 정상 종료 |
//! | 제한 시간 초과, 전송 에러 | 종료 (extended 로그) |
//! | 프레임 크기 초과 | 종료 (남은 프레임이 아직 소켓에 있음) |
//! | 종료 신호 | 종료 |
//!
//! 모든 종료 경로에서 연결은 정확히 한 번 닫힙니다.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use logrelay_core::metrics as m;

use crate::dispatch::{DispatchQueue, Submitted};
use crate::listener::{BoxStream, Incoming};
use crate::parser::{ParseError, SyslogParser, parse_reader};
use crate::settings::RuntimeSettings;

/// 확립된 클라이언트 연결
///
/// 스트림 하나와 버퍼 리더/라이터, 연결 ID를 보유합니다.
/// 핸들러가 독점 소유하며 [`Connection::close`]가 소유권을 가져가므로
/// 두 번 닫힐 수 없습니다.
pub struct Connection {
    id: String,
    peer: String,
    reader: BufReader<ReadHalf<BoxStream>>,
    writer: BufWriter<WriteHalf<BoxStream>>,
}

impl Connection {
    /// 스트림으로 연결을 만듭니다.
    pub fn new(stream: BoxStream, peer: impl Into<String>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id: new_connection_id(),
            peer: peer.into(),
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        }
    }

    /// 연결 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 원격 주소
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 버퍼 리더
    pub fn reader_mut(&mut self) -> &mut BufReader<ReadHalf<BoxStream>> {
        &mut self.reader
    }

    /// 쓰기 버퍼를 비우고 스트림을 닫습니다.
    pub async fn close(self) -> io::Result<()> {
        let mut writer = self.writer;
        let flushed = writer.flush().await;
        let mut stream = self.reader.into_inner().unsplit(writer.into_inner());
        let shutdown = stream.shutdown().await;
        flushed.and(shutdown)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

/// 불투명 연결 ID (128비트 랜덤, 16진수)
pub fn new_connection_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 연결 종료 사유
#[derive(Debug)]
pub enum Termination {
    /// 클라이언트가 스트림을 닫음
    Eof,
    /// 파싱 제한 시간 초과
    Timeout,
    /// 전송 계층 에러
    Transport(io::Error),
    /// 최대 프레임 크기 초과
    FrameTooLarge(usize),
    /// 서버 종료
    Cancelled,
    /// 디스패치 큐가 닫힘
    QueueClosed,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("end of stream"),
            Self::Timeout => f.write_str("parse timeout"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::FrameTooLarge(limit) => write!(f, "frame exceeds {limit} bytes"),
            Self::Cancelled => f.write_str("shutdown"),
            Self::QueueClosed => f.write_str("dispatch queue closed"),
        }
    }
}

/// 연결 핸들러가 공유하는 서버 상태
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub(crate) parser: Arc<dyn SyslogParser>,
    pub(crate) queue: DispatchQueue,
    pub(crate) settings: watch::Receiver<RuntimeSettings>,
    pub(crate) cancel: CancellationToken,
    pub(crate) max_frame_size: usize,
    pub(crate) listener_kind: &'static str,
}

/// 수락된 연결 하나를 끝까지 처리합니다.
pub(crate) async fn serve(incoming: Incoming, ctx: HandlerContext) {
    let settings = *ctx.settings.borrow();

    let established = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return,
        result = incoming.establish(settings.parse_timeout) => result,
    };

    let (stream, peer) = match established {
        Ok(established) => established,
        Err(e) => {
            metrics::counter!(m::LISTENER_ACCEPT_ERRORS_TOTAL, m::LABEL_LISTENER => ctx.listener_kind)
                .increment(1);
            if settings.extended {
                warn!(error = %e, listener = ctx.listener_kind, "failed to establish connection");
            }
            return;
        }
    };

    let mut conn = Connection::new(stream, peer);
    metrics::gauge!(m::LISTENER_CONNECTIONS_ACTIVE).increment(1.0);
    debug!(conn_id = %conn.id(), peer = %conn.peer(), "connection established");

    let termination = read_loop(&mut conn, &ctx).await;
    debug!(
        conn_id = %conn.id(),
        peer = %conn.peer(),
        reason = %termination,
        "connection terminated"
    );

    let conn_id = conn.id().to_owned();
    if let Err(e) = conn.close().await {
        match e.kind() {
            io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset => {
                debug!(conn_id = %conn_id, error = %e, "connection already closed by peer");
            }
            _ => error!(conn_id = %conn_id, error = %e, "failed to close connection"),
        }
    }
    metrics::gauge!(m::LISTENER_CONNECTIONS_ACTIVE).decrement(1.0);
}

/// 종료 사유가 생길 때까지 프레임을 읽고 제출합니다.
pub(crate) async fn read_loop(conn: &mut Connection, ctx: &HandlerContext) -> Termination {
    let format = ctx.parser.format_name();

    loop {
        let settings = *ctx.settings.borrow();

        let parsed = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Termination::Cancelled,
            result = tokio::time::timeout(
                settings.parse_timeout,
                parse_reader(ctx.parser.as_ref(), conn.reader_mut(), ctx.max_frame_size),
            ) => result,
        };

        let Ok(parsed) = parsed else {
            metrics::counter!(m::PARSER_TIMEOUTS_TOTAL).increment(1);
            if settings.extended {
                warn!(
                    conn_id = %conn.id(),
                    timeout_ms = settings.parse_timeout.as_millis() as u64,
                    "network error while processing message: read timed out"
                );
            }
            return Termination::Timeout;
        };

        match parsed {
            Ok(message) => {
                metrics::counter!(m::PARSER_MESSAGES_TOTAL, m::LABEL_PARSER_FORMAT => format)
                    .increment(1);

                let submitted = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Termination::Cancelled,
                    submitted = ctx.queue.submit(message) => submitted,
                };
                if submitted == Submitted::Closed {
                    return Termination::QueueClosed;
                }
            }
            Err(e) if !e.is_terminal() => {
                metrics::counter!(m::PARSER_ERRORS_TOTAL, m::LABEL_PARSER_FORMAT => format)
                    .increment(1);
                error!(
                    conn_id = %conn.id(),
                    error = %e,
                    parser_type = format,
                    "failed to parse message"
                );
            }
            Err(e) => return terminate(conn, e, settings, format),
        }
    }
}

/// 종료 에러를 [`Termination`]으로 변환하고 기록합니다.
fn terminate(
    conn: &Connection,
    err: ParseError,
    settings: RuntimeSettings,
    format: &'static str,
) -> Termination {
    match err {
        ParseError::Eof => {
            if settings.extended {
                debug!(conn_id = %conn.id(), "message could not be processed: EOF received");
            }
            Termination::Eof
        }
        ParseError::FrameTooLarge { limit } => {
            metrics::counter!(m::PARSER_ERRORS_TOTAL, m::LABEL_PARSER_FORMAT => format)
                .increment(1);
            warn!(conn_id = %conn.id(), limit, "frame too large, closing connection");
            Termination::FrameTooLarge(limit)
        }
        ParseError::Io(e) => {
            if settings.extended {
                error!(
                    conn_id = %conn.id(),
                    error = %e,
                    "network error while processing message"
                );
            }
            Termination::Transport(e)
        }
        malformed @ ParseError::Malformed { .. } => Termination::Transport(io::Error::new(
            io::ErrorKind::InvalidData,
            malformed.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use logrelay_core::config::{DispatchConfig, OverflowPolicy};
    use tokio::io::AsyncWriteExt;

    use logrelay_core::types::Message;

    use super::*;
    use crate::action::ActionRegistry;
    use crate::dispatch::{Dispatcher, WorkerPool};
    use crate::parser::Rfc3164Parser;
    use crate::rule::RulesetHandle;

    fn context(
        timeout: Duration,
        cancel: CancellationToken,
    ) -> (HandlerContext, watch::Sender<RuntimeSettings>, WorkerPool) {
        let settings = RuntimeSettings {
            parse_timeout: timeout,
            extended: true,
        };
        let (settings_tx, settings_rx) = watch::channel(settings);
        let dispatcher = Dispatcher::new(
            RulesetHandle::empty(),
            Arc::new(ActionRegistry::new()),
            settings_rx.clone(),
        );
        let (queue, pool) = WorkerPool::start(
            dispatcher,
            &DispatchConfig {
                workers: 1,
                queue_capacity: 16,
                overflow: OverflowPolicy::Drop,
            },
        );
        let ctx = HandlerContext {
            parser: Arc::new(Rfc3164Parser::new()),
            queue,
            settings: settings_rx,
            cancel,
            max_frame_size: 64,
            listener_kind: "test",
        };
        (ctx, settings_tx, pool)
    }

    /// 워커 없이 큐의 수신 측을 직접 돌려주는 컨텍스트
    fn capture_context() -> (HandlerContext, tokio::sync::mpsc::Receiver<Message>) {
        let (_settings_tx, settings_rx) = watch::channel(RuntimeSettings {
            parse_timeout: Duration::from_secs(2),
            extended: true,
        });
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let ctx = HandlerContext {
            parser: Arc::new(Rfc3164Parser::new()),
            queue: DispatchQueue::new(tx, OverflowPolicy::Block),
            settings: settings_rx,
            cancel: CancellationToken::new(),
            max_frame_size: 64,
            listener_kind: "test",
        };
        (ctx, rx)
    }

    fn pipe() -> (Connection, tokio::io::DuplexStream) {
        let (server, client) = tokio::io::duplex(1024);
        (Connection::new(Box::new(server), "duplex"), client)
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(new_connection_id(), new_connection_id());
        assert_eq!(new_connection_id().len(), 32);
    }

    #[tokio::test]
    async fn eof_after_good_and_bad_frames() {
        let (ctx, _settings, _pool) = context(Duration::from_secs(2), CancellationToken::new());
        let (mut conn, mut client) = pipe();

        client
            .write_all(b"<13>Oct 11 22:14:15 host1 app: first\nno pri here\n<13>Oct 11 22:14:15 host1 app: second\n")
            .await
            .unwrap();
        drop(client);

        let termination = read_loop(&mut conn, &ctx).await;
        assert!(matches!(termination, Termination::Eof));
    }

    #[tokio::test]
    async fn digit_leading_bad_line_keeps_connection_open() {
        let (ctx, mut rx) = capture_context();
        let (mut conn, mut client) = pipe();

        client
            .write_all(b"2024-01-15 plain text without pri\n<13>Oct 11 22:14:15 host1 app: second\n")
            .await
            .unwrap();
        drop(client);

        let termination = read_loop(&mut conn, &ctx).await;
        assert!(matches!(termination, Termination::Eof));

        let submitted = rx.try_recv().expect("good frame should be submitted");
        assert_eq!(submitted.hostname, "host1");
        assert_eq!(submitted.body, "second");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let (ctx, _settings, _pool) = context(Duration::from_millis(50), CancellationToken::new());
        let (mut conn, _client) = pipe();

        let termination = read_loop(&mut conn, &ctx).await;
        assert!(matches!(termination, Termination::Timeout));
    }

    #[tokio::test]
    async fn oversized_frame_terminates() {
        let (ctx, _settings, _pool) = context(Duration::from_secs(2), CancellationToken::new());
        let (mut conn, mut client) = pipe();

        let mut frame = b"<13>".to_vec();
        frame.extend(std::iter::repeat_n(b'a', 200));
        frame.push(b'\n');
        client.write_all(&frame).await.unwrap();

        let termination = read_loop(&mut conn, &ctx).await;
        assert!(matches!(termination, Termination::FrameTooLarge(64)));
    }

    #[tokio::test]
    async fn cancellation_terminates_idle_read() {
        let cancel = CancellationToken::new();
        let (ctx, _settings, _pool) = context(Duration::from_secs(30), cancel.clone());
        let (mut conn, _client) = pipe();

        let handle = tokio::spawn(async move { read_loop(&mut conn, &ctx).await });
        cancel.cancel();
        let termination = handle.await.unwrap();
        assert!(matches!(termination, Termination::Cancelled));
    }

    #[tokio::test]
    async fn close_consumes_connection() {
        let (conn, _client) = pipe();
        conn.close().await.unwrap();
    }
}
