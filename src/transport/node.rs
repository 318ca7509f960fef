//! # Framed Stream Node
//!
//! Byte-level access to a game connection. A [`Node`] owns the two
//! halves of a stream and understands exactly one thing about the
//! protocol: frames are a big-endian `u32` length prefix followed by
//! that many bytes. Everything above the frame boundary lives in
//! [`crate::core::packet`].
//!
//! Each direction can carry an independent keystream cipher. The read
//! path previews the length prefix with the cipher in peek mode, so the
//! decrypter's committed state only ever advances over bytes that were
//! actually consumed as a frame.

use crate::config::{ClientConfig, TransportConfig};
use crate::core::codec;
use crate::core::packet::{Packet, LENGTH_PREFIX_SIZE};
use crate::error::{ProtocolError, Result};
use crate::transport::socks5;
use crate::utils::Rc4;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// A node over a plain TCP stream, the shape used by live sessions.
pub type TcpNode = Node<OwnedReadHalf, OwnedWriteHalf>;

/// Receiving half of a node. Owns the decrypter and the unconsumed
/// byte backlog.
pub struct NodeReader<R> {
    half: R,
    decrypter: Option<Rc4>,
    backlog: BytesMut,
    read_attempts: u32,
    max_frame_size: usize,
    connected: bool,
}

/// Sending half of a node. Owns the encrypter.
#[derive(Debug)]
pub struct NodeWriter<W> {
    half: W,
    encrypter: Option<Rc4>,
    connected: bool,
}

/// A connected stream with optional per-direction ciphers.
pub struct Node<R, W> {
    reader: NodeReader<R>,
    writer: NodeWriter<W>,
}

impl Node<OwnedReadHalf, OwnedWriteHalf> {
    /// Opens a TCP connection to the configured server, negotiating a
    /// SOCKS5 tunnel first when one is configured.
    pub async fn connect(client: &ClientConfig, transport: &TransportConfig) -> Result<TcpNode> {
        let stream = match &transport.socks5 {
            Some(proxy) => {
                debug!(proxy = %proxy.address, "connecting through SOCKS5 proxy");
                let mut stream = TcpStream::connect(&proxy.address).await?;
                socks5::negotiate(&mut stream, proxy, &client.host, client.port).await?;
                stream
            }
            None => TcpStream::connect((client.host.as_str(), client.port)).await?,
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        Ok(Node::from_parts(read_half, write_half, transport))
    }
}

impl<R, W> Node<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wraps an already-connected pair of stream halves.
    pub fn from_parts(read_half: R, write_half: W, transport: &TransportConfig) -> Self {
        Self {
            reader: NodeReader {
                half: read_half,
                decrypter: None,
                backlog: BytesMut::new(),
                read_attempts: transport.read_attempts,
                max_frame_size: transport.max_frame_size,
                connected: true,
            },
            writer: NodeWriter {
                half: write_half,
                encrypter: None,
                connected: true,
            },
        }
    }

    /// True while neither direction has observed a fault.
    pub fn is_connected(&self) -> bool {
        self.reader.connected && self.writer.connected
    }

    /// Installs the receive-direction cipher.
    pub fn set_decrypter(&mut self, cipher: Rc4) {
        self.reader.decrypter = Some(cipher);
    }

    /// Installs the send-direction cipher.
    pub fn set_encrypter(&mut self, cipher: Rc4) {
        self.writer.encrypter = Some(cipher);
    }

    /// Receives the next frame. See [`NodeReader::receive_packet`].
    pub async fn receive_packet(&mut self) -> Result<Packet> {
        self.reader.receive_packet().await
    }

    /// Sends one frame. See [`NodeWriter::send_packet`].
    pub async fn send_packet(&mut self, packet: &mut Packet) -> Result<()> {
        self.writer.send_packet(packet).await
    }

    /// Sends raw bytes through the send-direction cipher.
    pub async fn send(&mut self, buffer: Vec<u8>) -> Result<()> {
        self.writer.send(buffer).await
    }

    /// Best-effort shutdown of the send direction. Never fails; a peer
    /// that is already gone makes shutdown moot.
    pub async fn disconnect(&mut self) {
        self.writer.disconnect().await;
        self.reader.connected = false;
    }

    /// Splits the node so receiving and sending can run concurrently.
    pub fn split(self) -> (NodeReader<R>, NodeWriter<W>) {
        (self.reader, self.writer)
    }
}

impl<R> NodeReader<R>
where
    R: AsyncRead + Unpin,
{
    /// True until a read fault is observed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Installs the receive-direction cipher.
    pub fn set_decrypter(&mut self, cipher: Rc4) {
        self.decrypter = Some(cipher);
    }

    /// Receives exactly one frame and parses it into a [`Packet`].
    ///
    /// The length prefix is previewed with the cipher in peek mode
    /// before any bytes are committed, so a short read mid-frame
    /// leaves the keystream aligned for the next attempt. Frames whose
    /// declared body exceeds the configured maximum are a terminal
    /// decode fault rather than a corrupted packet; nothing sane can
    /// be resynchronized past them.
    pub async fn receive_packet(&mut self) -> Result<Packet> {
        if !self.connected {
            return Err(ProtocolError::ConnectionClosed);
        }

        let prefix = self.peek_exact(LENGTH_PREFIX_SIZE).await?;
        let (declared, _) = codec::decode_i32(&prefix, 0)?;
        let declared = declared as u32 as usize;
        if declared > self.max_frame_size {
            self.connected = false;
            return Err(ProtocolError::DecodeError(format!(
                "declared frame length {declared} exceeds maximum {}",
                self.max_frame_size
            )));
        }

        let frame = self.commit_exact(LENGTH_PREFIX_SIZE + declared).await?;
        trace!(bytes = frame.len(), "frame received");

        let packet = Packet::from_bytes(frame);
        if packet.is_corrupted() {
            warn!(bytes = packet.length(), "received corrupted frame");
        }
        Ok(packet)
    }

    /// Returns the next `size` bytes decrypted in peek mode, without
    /// consuming them or advancing the committed keystream.
    pub async fn peek_exact(&mut self, size: usize) -> Result<Vec<u8>> {
        self.fill_backlog(size).await?;
        let mut preview = self.backlog[..size].to_vec();
        if let Some(cipher) = &mut self.decrypter {
            cipher.apply_in_place(&mut preview, true);
        }
        Ok(preview)
    }

    /// Consumes and decrypts exactly `size` bytes, advancing the
    /// committed keystream.
    async fn commit_exact(&mut self, size: usize) -> Result<Vec<u8>> {
        self.fill_backlog(size).await?;
        let mut taken = self.backlog.split_to(size).to_vec();
        if let Some(cipher) = &mut self.decrypter {
            cipher.apply_in_place(&mut taken, false);
        }
        Ok(taken)
    }

    /// Reads from the stream until the backlog holds at least `wanted`
    /// raw bytes. A bounded number of consecutive empty reads is
    /// tolerated before the peer is declared gone.
    async fn fill_backlog(&mut self, wanted: usize) -> Result<()> {
        let mut strikes = 0u32;
        let mut chunk = [0u8; 4096];

        while self.backlog.len() < wanted {
            let read = match self.half.read(&mut chunk).await {
                Ok(n) => n,
                Err(err) => {
                    self.connected = false;
                    return Err(ProtocolError::Io(err));
                }
            };

            if read == 0 {
                strikes += 1;
                if strikes >= self.read_attempts {
                    self.connected = false;
                    return Err(ProtocolError::ConnectionClosed);
                }
                continue;
            }
            strikes = 0;
            self.backlog.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }
}

impl<W> NodeWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// True until a write fault is observed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Installs the send-direction cipher.
    pub fn set_encrypter(&mut self, cipher: Rc4) {
        self.encrypter = Some(cipher);
    }

    /// Serializes and sends one frame.
    pub async fn send_packet(&mut self, packet: &mut Packet) -> Result<()> {
        let buffer = packet.to_bytes();
        trace!(id = packet.id(), bytes = buffer.len(), "frame sent");
        self.send(buffer).await
    }

    /// Encrypts (when a cipher is installed) and writes a full buffer.
    /// Any write fault marks the connection dead.
    pub async fn send(&mut self, mut buffer: Vec<u8>) -> Result<()> {
        if !self.connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        if let Some(cipher) = &mut self.encrypter {
            cipher.apply_in_place(&mut buffer, false);
        }

        if let Err(err) = self.half.write_all(&buffer).await {
            self.connected = false;
            return Err(ProtocolError::Io(err));
        }
        if let Err(err) = self.half.flush().await {
            self.connected = false;
            return Err(ProtocolError::Io(err));
        }
        Ok(())
    }

    /// Best-effort shutdown of the send direction.
    pub async fn disconnect(&mut self) {
        self.connected = false;
        let _ = self.half.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::Field;
    use tokio::io::duplex;

    fn test_node(
        capacity: usize,
    ) -> (
        Node<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (near, far) = duplex(capacity);
        let (read_half, write_half) = tokio::io::split(near);
        let node = Node::from_parts(read_half, write_half, &TransportConfig::default());
        (node, far)
    }

    #[tokio::test]
    async fn plaintext_roundtrip() {
        let (mut node, far) = test_node(1024);
        let (far_read, far_write) = tokio::io::split(far);
        let mut peer = Node::from_parts(far_read, far_write, &TransportConfig::default());

        let mut outgoing = Packet::new(4000, &[Field::Str("hello".into()), Field::Int(7)]);
        node.send_packet(&mut outgoing).await.unwrap();

        let mut received = peer.receive_packet().await.unwrap();
        assert_eq!(received.id(), 4000);
        assert_eq!(received.read_string().unwrap(), "hello");
        assert_eq!(received.read_i32().unwrap(), 7);
        assert!(!received.is_corrupted());
    }

    #[tokio::test]
    async fn ciphered_roundtrip_with_peeked_framing() {
        let key = b"frame-test-key".to_vec();
        let (mut node, far) = test_node(1024);
        let (far_read, far_write) = tokio::io::split(far);
        let mut peer = Node::from_parts(far_read, far_write, &TransportConfig::default());

        node.set_encrypter(Rc4::new(&key));
        peer.set_decrypter(Rc4::new(&key));

        // Two back-to-back frames exercise keystream continuity across
        // the peek/commit cycle.
        for n in 0..2i32 {
            let mut outgoing = Packet::new(233, &[Field::Int(n)]);
            node.send_packet(&mut outgoing).await.unwrap();
        }
        for n in 0..2i32 {
            let mut received = peer.receive_packet().await.unwrap();
            assert_eq!(received.id(), 233);
            assert_eq!(received.read_i32().unwrap(), n);
        }
    }

    #[tokio::test]
    async fn split_frame_delivery_reassembles() {
        let (mut node, mut far) = test_node(1024);

        let mut frame = Packet::new(10, &[Field::Str("split across writes".into())]).to_bytes();
        let tail = frame.split_off(3);

        let writer = tokio::spawn(async move {
            far.write_all(&frame).await.unwrap();
            far.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            far.write_all(&tail).await.unwrap();
            far.flush().await.unwrap();
            far
        });

        let mut received = node.receive_packet().await.unwrap();
        assert_eq!(received.id(), 10);
        assert_eq!(received.read_string().unwrap(), "split across writes");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn oversized_declared_length_is_terminal() {
        let (mut node, mut far) = test_node(64);
        far.write_all(&[0x7F, 0xFF, 0xFF, 0xFF]).await.unwrap();
        far.flush().await.unwrap();

        let err = node.receive_packet().await.unwrap_err();
        assert!(matches!(err, ProtocolError::DecodeError(_)));
        assert!(!node.is_connected());
    }

    #[tokio::test]
    async fn undersized_frame_surfaces_as_corrupted_packet() {
        let (mut node, mut far) = test_node(64);
        // Declared body of one byte: total frame is 5 bytes, below the
        // minimum, so the raw bytes must come back verbatim.
        far.write_all(&[0, 0, 0, 1, 0xAB]).await.unwrap();
        far.flush().await.unwrap();

        let mut packet = node.receive_packet().await.unwrap();
        assert!(packet.is_corrupted());
        assert_eq!(packet.to_bytes(), &[0, 0, 0, 1, 0xAB]);
    }

    #[tokio::test]
    async fn closed_peer_is_connection_closed() {
        let (mut node, far) = test_node(64);
        drop(far);

        let err = node.receive_packet().await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
        assert!(!node.is_connected());
    }

    #[tokio::test]
    async fn write_after_disconnect_fails() {
        let (mut node, _far) = test_node(64);
        node.disconnect().await;

        let mut packet = Packet::new(1, &[]);
        let err = node.send_packet(&mut packet).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
