//! Length-prefixed binary message exchange over any `AsyncRead + AsyncWrite`
//! stream (spec §4.1). Integers are 8-byte two's-complement, little-endian;
//! strings and blobs are `WriteInt64(len)` followed by the raw bytes.
//!
//! Every operation is scoped-acquire: any failure — timeout, I/O error, or
//! peer close — leaves the endpoint in a state where [`FramedEndpoint::close`]
//! (or `Drop`) releases the underlying descriptor.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use crate::error::NetError;

/// A framed endpoint over a generic async stream. `S` is `TcpStream` or
/// `UnixStream` in practice, selected by the TM's `mode` configuration.
pub struct FramedEndpoint<S> {
    stream: S,
    write_timeout: Duration,
}

impl FramedEndpoint<TcpStream> {
    /// `Open(connect_deadline)` for the TCP transport.
    pub async fn connect_tcp(addr: &str, deadline: Duration) -> Result<Self, NetError> {
        let stream = tokio::time::timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::Timeout)??;
        Ok(Self::new(stream, deadline))
    }
}

impl FramedEndpoint<UnixStream> {
    /// `Open(connect_deadline)` for the UDS transport.
    pub async fn connect_uds(path: &str, deadline: Duration) -> Result<Self, NetError> {
        let stream = tokio::time::timeout(deadline, UnixStream::connect(path))
            .await
            .map_err(|_| NetError::Timeout)??;
        Ok(Self::new(stream, deadline))
    }
}

impl<S> FramedEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-connected stream (the TM server's accept path).
    /// `write_timeout` is the deadline applied to every `Write*` call; reads
    /// take their deadline explicitly per spec (`Read(n, deadline)`, etc).
    pub fn new(stream: S, write_timeout: Duration) -> Self {
        Self {
            stream,
            write_timeout,
        }
    }

    /// `Close` — consumes the endpoint, dropping the underlying stream.
    pub async fn close(mut self) {
        let _ = AsyncWriteExt::shutdown(&mut self.stream).await;
    }

    /// `Read(n, deadline)`.
    pub async fn read(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>, NetError> {
        let mut buf = vec![0u8; n];
        let read_fut = self.stream.read_exact(&mut buf);
        match tokio::time::timeout(deadline, read_fut).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(NetError::SocketClosed)
            }
            Ok(Err(e)) => Err(NetError::Io(e)),
            Err(_) => Err(NetError::Timeout),
        }
    }

    /// `Write(bytes)`, deadline taken from `write_timeout`.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let write_fut = self.stream.write_all(bytes);
        match tokio::time::timeout(self.write_timeout, write_fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetError::Io(e)),
            Err(_) => Err(NetError::Timeout),
        }
    }

    /// `ReadInt64(deadline)`.
    pub async fn read_int64(&mut self, deadline: Duration) -> Result<i64, NetError> {
        let buf = self.read(8, deadline).await?;
        let arr: [u8; 8] = buf.try_into().expect("read(8, _) always returns 8 bytes");
        Ok(i64::from_le_bytes(arr))
    }

    /// `WriteInt64(v)`.
    pub async fn write_int64(&mut self, v: i64) -> Result<(), NetError> {
        self.write(&v.to_le_bytes()).await
    }

    /// `ReadString(deadline)` — `int64` length prefix followed by raw bytes.
    pub async fn read_string(&mut self, deadline: Duration) -> Result<String, NetError> {
        let len = self.read_int64(deadline).await?;
        if len < 0 {
            return Err(NetError::Protocol(format!("negative string length {len}")));
        }
        let bytes = self.read(len as usize, deadline).await?;
        String::from_utf8(bytes).map_err(|e| NetError::Protocol(e.to_string()))
    }

    /// `WriteString(s)`.
    pub async fn write_string(&mut self, s: &str) -> Result<(), NetError> {
        self.write_int64(s.len() as i64).await?;
        self.write(s.as_bytes()).await
    }

    /// Read a length-prefixed blob (used for task/result payloads).
    pub async fn read_blob(&mut self, deadline: Duration) -> Result<Vec<u8>, NetError> {
        let len = self.read_int64(deadline).await?;
        if len < 0 {
            return Err(NetError::Protocol(format!("negative blob length {len}")));
        }
        self.read(len as usize, deadline).await
    }

    /// Write a length-prefixed blob.
    pub async fn write_blob(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        self.write_int64(bytes.len() as i64).await?;
        self.write(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (FramedEndpoint<TcpStream>, FramedEndpoint<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_fut = listener.accept();
        let connect_fut = TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(accept_fut, connect_fut);
        let server = FramedEndpoint::new(accepted.unwrap().0, Duration::from_secs(5));
        let client = FramedEndpoint::new(connected.unwrap(), Duration::from_secs(5));
        (server, client)
    }

    #[tokio::test]
    async fn round_trips_int64_and_string() {
        let (mut server, mut client) = pair().await;
        let d = Duration::from_secs(1);

        client.write_int64(42).await.unwrap();
        assert_eq!(server.read_int64(d).await.unwrap(), 42);

        client.write_string("hello").await.unwrap();
        assert_eq!(server.read_string(d).await.unwrap(), "hello");

        client.write_blob(b"task-bytes").await.unwrap();
        assert_eq!(server.read_blob(d).await.unwrap(), b"task-bytes");
    }

    #[tokio::test]
    async fn read_after_peer_close_is_socket_closed() {
        let (mut server, client) = pair().await;
        client.close().await;
        let err = server.read_int64(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, NetError::SocketClosed));
    }

    #[tokio::test]
    async fn read_past_deadline_times_out() {
        let (mut server, _client) = pair().await;
        let err = server
            .read_int64(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Timeout));
    }
}
