//! Transport
//!
//! 연결이 사용하는 바이트 스트림과 그 생성자

use std::io;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::driver::ServerAddress;

/// 순서가 보장되는 양방향 바이트 스트림
///
/// TCP, TLS 래핑 스트림, 테스트용 인메모리 파이프 모두 해당합니다.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 타입이 지워진 전송 스트림
pub type BoxTransport = Box<dyn Transport>;

/// 서버 주소로 전송 스트림을 여는 역할
///
/// 암호화가 필요하면 구현체가 핸드셰이크 이전에 스트림을 감쌉니다.
pub trait Connector: Send + Sync + 'static {
    /// 주소에 연결
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, io::Result<BoxTransport>>;
}

/// 평문 TCP 커넥터
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, io::Result<BoxTransport>> {
        Box::pin(async move {
            let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxTransport)
        })
    }
}
