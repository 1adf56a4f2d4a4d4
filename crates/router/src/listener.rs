//! 리스너 팩토리 -- UNIX 소켓, TCP, TLS-over-TCP
//!
//! [`ListenerSpec`]은 설정에서 만들어지는 리스너 명세이고,
//! [`Listener::bind`]가 실제로 바인드된 리스너를 반환합니다.
//!
//! TLS 핸드셰이크는 accept 루프가 아니라 연결 태스크에서 수행합니다
//! ([`Incoming::establish`]). 느린 클라이언트가 다른 연결의 수락을 막지 않습니다.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, info, warn};

use logrelay_core::config::ListenerConfig;

use crate::error::RouterError;

/// 연결 스트림 trait
///
/// UNIX, TCP, TLS 스트림을 하나의 타입으로 다루기 위한 보조 trait입니다.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// 타입이 지워진 연결 스트림
pub type BoxStream = Box<dyn AsyncStream>;

/// 리스너 명세
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerSpec {
    /// UNIX 도메인 소켓
    Unix {
        /// 소켓 파일 경로
        path: PathBuf,
    },
    /// 평문 TCP
    Tcp {
        /// 바인드 주소
        addr: String,
        /// 바인드 포트
        port: u16,
    },
    /// TLS-over-TCP
    Tls {
        /// 바인드 주소
        addr: String,
        /// 바인드 포트
        port: u16,
        /// PEM 인증서 체인 경로
        cert_path: PathBuf,
        /// PEM PKCS#8 개인키 경로
        key_path: PathBuf,
    },
}

impl ListenerSpec {
    /// 설정에서 리스너 명세를 만듭니다.
    ///
    /// # Errors
    /// - 알 수 없는 `type` 값
    /// - TLS인데 인증서 또는 키 경로가 비어 있는 경우
    pub fn from_config(config: &ListenerConfig) -> Result<Self, RouterError> {
        match config.kind.trim().to_lowercase().as_str() {
            "unix" => Ok(Self::Unix {
                path: PathBuf::from(&config.unix.path),
            }),
            "tcp" => Ok(Self::Tcp {
                addr: config.tcp.addr.clone(),
                port: config.tcp.port,
            }),
            "tls" => {
                let tls = &config.tls;
                if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                    return Err(RouterError::MissingCertConfig);
                }
                Ok(Self::Tls {
                    addr: tls.addr.clone(),
                    port: tls.port,
                    cert_path: PathBuf::from(&tls.cert_path),
                    key_path: PathBuf::from(&tls.key_path),
                })
            }
            _ => Err(RouterError::UnknownListenerType(config.kind.clone())),
        }
    }

    /// 리스너 종류 이름 (메트릭 레이블)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unix { .. } => "unix",
            Self::Tcp { .. } => "tcp",
            Self::Tls { .. } => "tls",
        }
    }
}

impl fmt::Display for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
            Self::Tcp { addr, port } => write!(f, "tcp:{}", join_host_port(addr, *port)),
            Self::Tls { addr, port, .. } => write!(f, "tls:{}", join_host_port(addr, *port)),
        }
    }
}

/// IPv6 주소는 대괄호로 감쌉니다.
fn join_host_port(addr: &str, port: u16) -> String {
    if addr.contains(':') && !addr.starts_with('[') {
        format!("[{addr}]:{port}")
    } else {
        format!("{addr}:{port}")
    }
}

/// 바인드된 리스너
pub enum Listener {
    /// UNIX 소켓 리스너 (drop 시 소켓 파일 제거)
    Unix {
        /// 리스너
        inner: UnixListener,
        /// 소켓 파일 경로
        path: PathBuf,
    },
    /// TCP 리스너
    Tcp(TcpListener),
    /// TLS 리스너
    Tls {
        /// 하부 TCP 리스너
        inner: TcpListener,
        /// TLS acceptor
        acceptor: tokio_native_tls::TlsAcceptor,
    },
}

impl Listener {
    /// 명세에 따라 리스너를 바인드합니다.
    ///
    /// 내부적으로 재시도하지 않습니다.
    pub async fn bind(spec: &ListenerSpec) -> Result<Self, RouterError> {
        let listener = match spec {
            ListenerSpec::Unix { path } => {
                prepare_unix_path(path).await?;
                let inner = UnixListener::bind(path).map_err(|source| RouterError::Bind {
                    addr: path.display().to_string(),
                    source,
                })?;
                Self::Unix {
                    inner,
                    path: path.clone(),
                }
            }
            ListenerSpec::Tcp { addr, port } => Self::Tcp(bind_tcp(addr, *port).await?),
            ListenerSpec::Tls {
                addr,
                port,
                cert_path,
                key_path,
            } => {
                let acceptor = load_acceptor(cert_path, key_path).await?;
                Self::Tls {
                    inner: bind_tcp(addr, *port).await?,
                    acceptor,
                }
            }
        };

        info!(listener = %spec, local_addr = %listener.local_addr(), "listener bound");
        Ok(listener)
    }

    /// 다음 연결을 수락합니다.
    ///
    /// TLS 연결은 핸드셰이크 전 상태로 반환됩니다.
    pub async fn accept(&self) -> io::Result<Incoming> {
        match self {
            Self::Unix { inner, path } => {
                let (stream, _) = inner.accept().await?;
                Ok(Incoming {
                    peer: format!("unix:{}", path.display()),
                    kind: IncomingKind::Plain(Box::new(stream)),
                })
            }
            Self::Tcp(inner) => {
                let (stream, addr) = inner.accept().await?;
                Ok(Incoming {
                    peer: addr.to_string(),
                    kind: IncomingKind::Plain(Box::new(stream)),
                })
            }
            Self::Tls { inner, acceptor } => {
                let (stream, addr) = inner.accept().await?;
                Ok(Incoming {
                    peer: addr.to_string(),
                    kind: IncomingKind::Tls(stream, acceptor.clone()),
                })
            }
        }
    }

    /// 바인드된 로컬 주소 (TCP/TLS는 `ip:port`, UNIX는 경로)
    pub fn local_addr(&self) -> String {
        match self {
            Self::Unix { path, .. } => path.display().to_string(),
            Self::Tcp(inner) | Self::Tls { inner, .. } => inner
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_owned()),
        }
    }

    /// 리스너 종류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unix { .. } => "unix",
            Self::Tcp(_) => "tcp",
            Self::Tls { .. } => "tls",
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("kind", &self.kind())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove unix socket");
                }
            }
        }
    }
}

/// 수락되었지만 아직 연결로 확립되지 않은 스트림
pub struct Incoming {
    peer: String,
    kind: IncomingKind,
}

enum IncomingKind {
    Plain(BoxStream),
    Tls(TcpStream, tokio_native_tls::TlsAcceptor),
}

impl Incoming {
    /// 원격 주소
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 스트림을 확립합니다. TLS는 제한 시간 안에 핸드셰이크를 마쳐야 합니다.
    pub async fn establish(self, handshake_timeout: Duration) -> io::Result<(BoxStream, String)> {
        match self.kind {
            IncomingKind::Plain(stream) => Ok((stream, self.peer)),
            IncomingKind::Tls(stream, acceptor) => {
                let tls = tokio::time::timeout(handshake_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out"))?
                    .map_err(io::Error::other)?;
                Ok((Box::new(tls), self.peer))
            }
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tls = matches!(self.kind, IncomingKind::Tls(..));
        f.debug_struct("Incoming")
            .field("peer", &self.peer)
            .field("tls", &tls)
            .finish()
    }
}

async fn bind_tcp(addr: &str, port: u16) -> Result<TcpListener, RouterError> {
    let target = join_host_port(addr, port);
    TcpListener::bind(&target)
        .await
        .map_err(|source| RouterError::Bind {
            addr: target,
            source,
        })
}

/// 이전 실행이 남긴 소켓 파일을 정리합니다.
///
/// 살아 있는 리스너가 있으면 `UnixInUse`, 소켓이 아닌 파일이면 `NotASocket`입니다.
async fn prepare_unix_path(path: &Path) -> Result<(), RouterError> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RouterError::Io(e)),
    };

    if !metadata.file_type().is_socket() {
        return Err(RouterError::NotASocket {
            path: path.display().to_string(),
        });
    }

    if UnixStream::connect(path).await.is_ok() {
        return Err(RouterError::UnixInUse {
            path: path.display().to_string(),
        });
    }

    debug!(path = %path.display(), "removing stale unix socket");
    tokio::fs::remove_file(path).await?;
    Ok(())
}

/// PEM 인증서 체인과 PKCS#8 PEM 개인키로 TLS acceptor를 만듭니다.
async fn load_acceptor(
    cert_path: &Path,
    key_path: &Path,
) -> Result<tokio_native_tls::TlsAcceptor, RouterError> {
    let read = |path: &Path| {
        let path = path.to_path_buf();
        async move {
            tokio::fs::read(&path)
                .await
                .map_err(|e| RouterError::TlsIdentity(format!("{}: {e}", path.display())))
        }
    };

    let cert = read(cert_path).await?;
    let key = read(key_path).await?;

    let identity = native_tls::Identity::from_pkcs8(&cert, &key)
        .map_err(|e| RouterError::TlsIdentity(e.to_string()))?;
    let acceptor = native_tls::TlsAcceptor::builder(identity)
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| RouterError::TlsIdentity(e.to_string()))?;

    Ok(tokio_native_tls::TlsAcceptor::from(acceptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(kind: &str) -> ListenerConfig {
        ListenerConfig {
            kind: kind.to_owned(),
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn spec_from_config_is_case_insensitive() {
        let spec = ListenerSpec::from_config(&config("TCP")).unwrap();
        assert_eq!(
            spec,
            ListenerSpec::Tcp {
                addr: "0.0.0.0".to_owned(),
                port: 9099
            }
        );
        assert_eq!(spec.kind(), "tcp");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ListenerSpec::from_config(&config("udp")).unwrap_err();
        assert!(matches!(err, RouterError::UnknownListenerType(ref t) if t == "udp"));
    }

    #[test]
    fn tls_without_cert_fails_before_io() {
        let mut cfg = config("tls");
        cfg.tls.cert_path = "/etc/cert.pem".to_owned();
        assert!(matches!(
            ListenerSpec::from_config(&cfg),
            Err(RouterError::MissingCertConfig)
        ));
    }

    #[test]
    fn display_wraps_ipv6() {
        let spec = ListenerSpec::Tcp {
            addr: "::1".to_owned(),
            port: 514,
        };
        assert_eq!(spec.to_string(), "tcp:[::1]:514");
    }

    #[tokio::test]
    async fn tcp_bind_and_accept() {
        let spec = ListenerSpec::Tcp {
            addr: "127.0.0.1".to_owned(),
            port: 0,
        };
        let listener = Listener::bind(&spec).await.unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let incoming = listener.accept().await.unwrap();
        let (mut stream, peer) = incoming
            .establish(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(peer.starts_with("127.0.0.1:"));

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn tls_handshake_times_out_for_silent_client() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let listener = Listener::bind(&ListenerSpec::Tls {
            addr: "127.0.0.1".to_owned(),
            port: 0,
            cert_path: fixtures.join("cert.pem"),
            key_path: fixtures.join("key.pem"),
        })
        .await
        .unwrap();
        assert_eq!(listener.kind(), "tls");

        let _silent = TcpStream::connect(listener.local_addr()).await.unwrap();
        let incoming = listener.accept().await.unwrap();

        let err = incoming
            .establish(Duration::from_millis(100))
            .await
            .err()
            .expect("handshake without a client hello must fail");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn tcp_bind_conflict_is_bind_error() {
        let first = Listener::bind(&ListenerSpec::Tcp {
            addr: "127.0.0.1".to_owned(),
            port: 0,
        })
        .await
        .unwrap();
        let port: u16 = first
            .local_addr()
            .rsplit(':')
            .next()
            .unwrap()
            .parse()
            .unwrap();

        let err = Listener::bind(&ListenerSpec::Tcp {
            addr: "127.0.0.1".to_owned(),
            port,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RouterError::Bind { .. }));
    }

    #[tokio::test]
    async fn stale_unix_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");

        // 리스너 없이 남은 소켓 파일
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let spec = ListenerSpec::Unix { path: path.clone() };
        let listener = Listener::bind(&spec).await.unwrap();
        assert_eq!(listener.kind(), "unix");

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn live_unix_socket_is_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sock");
        let spec = ListenerSpec::Unix { path: path.clone() };

        let _live = Listener::bind(&spec).await.unwrap();
        let err = Listener::bind(&spec).await.unwrap_err();
        assert!(matches!(err, RouterError::UnixInUse { .. }));
    }

    #[tokio::test]
    async fn regular_file_is_not_a_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, b"x").unwrap();

        let err = Listener::bind(&ListenerSpec::Unix { path: path.clone() })
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NotASocket { .. }));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn tls_missing_cert_file_is_identity_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ListenerSpec::Tls {
            addr: "127.0.0.1".to_owned(),
            port: 0,
            cert_path: dir.path().join("missing.crt"),
            key_path: dir.path().join("missing.key"),
        };
        assert!(matches!(
            Listener::bind(&spec).await,
            Err(RouterError::TlsIdentity(_))
        ));
    }
}
