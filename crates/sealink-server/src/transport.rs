//! Framed TCP binding for the duplex channel.
//!
//! The protocol core assumes an ordered, reliable duplex with binary
//! frames and out-of-band close codes. This binding provides it over TCP
//! with a one-byte record kind:
//!
//! ```text
//! data:  0x00 || len u32 BE || bytes
//! close: 0x01 || code u16 BE || reason_len u16 BE || reason utf-8
//! ```
//!
//! Each accepted connection gets a pump task bridging the socket to an
//! in-memory [`Duplex`] pair; everything above the pump speaks
//! `ChannelEvent`s and never sees the socket.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use sealink_core::{channel_pair, ChannelEvent, Duplex};

/// Record kinds on the wire.
const RECORD_DATA: u8 = 0x00;
const RECORD_CLOSE: u8 = 0x01;

/// Slack over the configured maximum message size, covering handshake
/// frames and framing overhead.
const FRAME_SLACK: usize = 1024;

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket failure.
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Peer sent a frame above the read cap.
    #[error("inbound record of {len} bytes exceeds cap {cap}")]
    RecordTooLarge {
        /// Declared record length.
        len: usize,
        /// Enforced cap.
        cap: usize,
    },

    /// Peer sent an unknown record kind.
    #[error("unknown record kind {0:#04x}")]
    UnknownRecord(u8),
}

/// Listening TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    max_frame: usize,
}

impl TcpTransport {
    /// Bind to `host:port`. `max_message_size` bounds inbound records.
    pub async fn bind(
        host: &str,
        port: u16,
        max_message_size: usize,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self { listener, max_frame: max_message_size + FRAME_SLACK })
    }

    /// Bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and spawn its pump.
    ///
    /// Returns the application-side duplex endpoint and the remote
    /// address.
    pub async fn accept(&self) -> Result<(Duplex, SocketAddr), TransportError> {
        let (stream, remote_addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;

        let duplex = spawn_pump(stream, self.max_frame);
        Ok((duplex, remote_addr))
    }
}

/// Dial a relay; the client-side counterpart of [`TcpTransport::accept`].
pub async fn connect(
    addr: SocketAddr,
    max_message_size: usize,
) -> Result<Duplex, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    Ok(spawn_pump(stream, max_message_size + FRAME_SLACK))
}

/// Wire a socket to a duplex pair and return the application end.
///
/// Reader and writer run as separate tasks: a record read spans multiple
/// awaits, so it must never share a `select!` arm with outbound work.
fn spawn_pump(stream: TcpStream, max_frame: usize) -> Duplex {
    let (app_end, transport_end) = channel_pair();
    let (read_half, write_half) = stream.into_split();

    let to_app = transport_end.handle();
    tokio::spawn(read_loop(read_half, to_app, max_frame));
    tokio::spawn(write_loop(write_half, transport_end));

    app_end
}

/// Socket → application: decode records until the stream ends.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    to_app: sealink_core::DuplexHandle,
    max_frame: usize,
) {
    loop {
        match read_record(&mut read_half, max_frame).await {
            Ok(Record::Data(bytes)) => {
                if to_app.send(bytes).await.is_err() {
                    return;
                }
            },
            Ok(Record::Close { code, reason }) => {
                to_app.close(code, &reason).await;
                return;
            },
            Err(TransportError::RecordTooLarge { len, cap }) => {
                tracing::debug!(len, cap, "oversized record");
                to_app.close(1009, "Frame size").await;
                return;
            },
            Err(err) => {
                tracing::debug!(error = %err, "socket read ended");
                to_app.close(1006, "transport error").await;
                return;
            },
        }
    }
}

/// Application → socket: encode outbound events until the app hangs up.
async fn write_loop(mut write_half: OwnedWriteHalf, mut transport_end: Duplex) {
    loop {
        match transport_end.recv().await {
            Some(ChannelEvent::Frame(bytes)) => {
                if write_record_data(&mut write_half, &bytes).await.is_err() {
                    return;
                }
            },
            Some(ChannelEvent::Closed { code, reason }) => {
                let _ = write_record_close(&mut write_half, code, &reason).await;
                let _ = write_half.shutdown().await;
                return;
            },
            None => {
                let _ = write_half.shutdown().await;
                return;
            },
        }
    }
}

enum Record {
    Data(Bytes),
    Close { code: u16, reason: String },
}

async fn read_record(
    read_half: &mut OwnedReadHalf,
    max_frame: usize,
) -> Result<Record, TransportError> {
    let kind = read_half.read_u8().await?;

    match kind {
        RECORD_DATA => {
            let len = read_half.read_u32().await? as usize;
            if len > max_frame {
                return Err(TransportError::RecordTooLarge { len, cap: max_frame });
            }

            let mut buffer = vec![0u8; len];
            read_half.read_exact(&mut buffer).await?;
            Ok(Record::Data(Bytes::from(buffer)))
        },
        RECORD_CLOSE => {
            let code = read_half.read_u16().await?;
            let reason_len = read_half.read_u16().await? as usize;

            let mut reason = vec![0u8; reason_len];
            read_half.read_exact(&mut reason).await?;
            Ok(Record::Close { code, reason: String::from_utf8_lossy(&reason).into_owned() })
        },
        other => Err(TransportError::UnknownRecord(other)),
    }
}

async fn write_record_data(
    write_half: &mut OwnedWriteHalf,
    bytes: &[u8],
) -> Result<(), TransportError> {
    write_half.write_u8(RECORD_DATA).await?;
    write_half.write_u32(bytes.len() as u32).await?;
    write_half.write_all(bytes).await?;
    write_half.flush().await?;
    Ok(())
}

async fn write_record_close(
    write_half: &mut OwnedWriteHalf,
    code: u16,
    reason: &str,
) -> Result<(), TransportError> {
    let reason = reason.as_bytes();
    let reason = &reason[..reason.len().min(u16::MAX as usize)];

    write_half.write_u8(RECORD_CLOSE).await?;
    write_half.write_u16(code).await?;
    write_half.write_u16(reason.len() as u16).await?;
    write_half.write_all(reason).await?;
    write_half.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn linked_pair() -> (Duplex, Duplex) {
        let transport = TcpTransport::bind("127.0.0.1", 0, 4096).await.unwrap();
        let addr = transport.local_addr().unwrap();

        let (client, (server, _)) =
            tokio::join!(connect(addr, 4096), async { transport.accept().await.unwrap() });
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn frames_cross_the_socket_in_order() {
        let (client, mut server) = linked_pair().await;

        client.send(Bytes::from_static(b"alpha")).await.unwrap();
        client.send(Bytes::from_static(b"beta")).await.unwrap();

        assert_eq!(
            server.recv().await,
            Some(ChannelEvent::Frame(Bytes::from_static(b"alpha")))
        );
        assert_eq!(
            server.recv().await,
            Some(ChannelEvent::Frame(Bytes::from_static(b"beta")))
        );
    }

    #[tokio::test]
    async fn close_codes_survive_the_socket() {
        let (client, mut server) = linked_pair().await;

        client.close(1008, "Replay detected").await;

        assert_eq!(
            server.recv().await,
            Some(ChannelEvent::Closed { code: 1008, reason: "Replay detected".to_string() })
        );
    }

    #[tokio::test]
    async fn both_directions_flow() {
        let (mut client, mut server) = linked_pair().await;

        client.send(Bytes::from_static(b"ping")).await.unwrap();
        assert!(matches!(server.recv().await, Some(ChannelEvent::Frame(_))));

        server.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(
            client.recv().await,
            Some(ChannelEvent::Frame(Bytes::from_static(b"pong")))
        );
    }

    #[tokio::test]
    async fn oversized_record_tears_the_connection() {
        let transport = TcpTransport::bind("127.0.0.1", 0, 64).await.unwrap();
        let addr = transport.local_addr().unwrap();

        let (raw, (_server, _)) = tokio::join!(TcpStream::connect(addr), async {
            transport.accept().await.unwrap()
        });
        let mut raw = raw.unwrap();

        // Claim a 1 MiB record against a 64-byte cap.
        raw.write_u8(RECORD_DATA).await.unwrap();
        raw.write_u32(1_048_576).await.unwrap();
        raw.flush().await.unwrap();

        let mut server = _server;
        assert_eq!(
            server.recv().await,
            Some(ChannelEvent::Closed { code: 1009, reason: "Frame size".to_string() })
        );
    }
}
