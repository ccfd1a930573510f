//! Rotation server.
//!
//! Binds a TCP listener and serves up to `pool_size` connections at once.
//! Each admitted connection runs a request loop: read a header, receive the
//! image into its slot's scratch directory, rotate it, and stream the result
//! back. The loop ends on EXIT, on a fatal error, or on shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use imgrot_transform::{Angle, ImageCodec, rotate_bytes};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admission::{SlotGuard, SlotPool};
use crate::error::ChannelError;
use crate::packet::{Operation, Packet};
use crate::scratch::ScratchDir;
use crate::wire::{copy_payload, read_packet, with_deadline, write_packet};
use crate::{DEFAULT_IO_TIMEOUT, DEFAULT_POOL_SIZE, DEFAULT_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrently served connections.
    pub pool_size: usize,
    /// Root directory for per-slot scratch files.
    pub scratch_dir: PathBuf,
    /// Deadline for each header read and payload transfer.
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            pool_size: DEFAULT_POOL_SIZE,
            scratch_dir: std::env::temp_dir().join("imgrot-scratch"),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// The rotation server.
pub struct RotationServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    slots: SlotPool,
    codec: Arc<dyn ImageCodec>,
    scratch_dir: PathBuf,
    io_timeout: Duration,
    cancel: CancellationToken,
}

impl RotationServer {
    /// Binds the listener. Failing to bind is reported here, before any
    /// connection is served.
    pub async fn bind(
        config: ServerConfig,
        codec: Arc<dyn ImageCodec>,
    ) -> Result<Arc<Self>, ChannelError> {
        if config.pool_size == 0 {
            return Err(ChannelError::SlotsExhausted);
        }

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tokio::fs::create_dir_all(&config.scratch_dir).await?;

        info!(
            %local_addr,
            pool_size = config.pool_size,
            scratch = %config.scratch_dir.display(),
            "rotation server listening"
        );

        Ok(Arc::new(Self {
            listener,
            local_addr,
            slots: SlotPool::new(config.pool_size),
            codec,
            scratch_dir: config.scratch_dir,
            io_timeout: config.io_timeout,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently bound to a worker slot.
    pub fn active_connections(&self) -> usize {
        self.slots.bound()
    }

    /// Token that stops the server when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests a graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Accepts and serves connections until shutdown.
    ///
    /// On shutdown, idle connections are closed, in-flight jobs are allowed
    /// to finish, and every connection task is joined before returning.
    pub async fn run(self: &Arc<Self>) -> Result<(), ChannelError> {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!("connection task failed: {e}");
                    }
                }

                admission = self.slots.admit() => {
                    let admission = admission?;

                    let (stream, peer_addr) = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        accepted = self.listener.accept() => match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!("accept error: {e}");
                                continue;
                            }
                        },
                    };

                    let slot = admission.bind()?;
                    let server = Arc::clone(self);
                    tasks.spawn(async move {
                        server.serve_connection(stream, peer_addr, slot).await;
                    });
                }
            }
        }

        info!(active = tasks.len(), "server shutting down");
        self.slots.close();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("connection task failed: {e}");
            }
        }
        info!("server stopped");
        Ok(())
    }

    async fn serve_connection(&self, stream: TcpStream, peer_addr: SocketAddr, slot: SlotGuard) {
        let slot_id = slot.id();
        info!(slot = slot_id, %peer_addr, "connection admitted");

        let mut conn = Connection {
            stream,
            slot: slot_id,
            server: self,
        };

        match conn.serve().await {
            Ok(served) => info!(slot = slot_id, %peer_addr, served, "connection closed"),
            Err(ChannelError::ConnectionClosed) => {
                info!(slot = slot_id, %peer_addr, "client disconnected without EXIT")
            }
            Err(e) => warn!(slot = slot_id, %peer_addr, "connection terminated: {e}"),
        }

        let _ = conn.stream.shutdown().await;
        // `slot` drops here: index back to the free set, permit released.
        drop(slot);
    }
}

/// Result of one ROTATE request that did not break the connection.
enum JobOutcome {
    Rotated { bytes: u32 },
    Failed(ChannelError),
}

/// One admitted client connection.
struct Connection<'a> {
    stream: TcpStream,
    slot: usize,
    server: &'a RotationServer,
}

impl Connection<'_> {
    /// Runs the request loop. Returns the number of jobs served.
    async fn serve(&mut self) -> Result<u64, ChannelError> {
        let mut served = 0u64;

        loop {
            // Wait for the first byte of the next header. Nothing has been
            // received yet, so an idle timeout closes without a NAK.
            let mut first = [0u8; 1];
            let waited = tokio::select! {
                biased;
                _ = self.server.cancel.cancelled() => {
                    debug!(slot = self.slot, "closing idle connection for shutdown");
                    return Ok(served);
                }
                waited = with_deadline(self.server.io_timeout, async {
                    self.stream.peek(&mut first).await.map_err(ChannelError::from)
                }) => waited,
            };

            match waited {
                Ok(0) => return Err(ChannelError::ConnectionClosed),
                Ok(_) => {}
                Err(ChannelError::Timeout) => {
                    info!(slot = self.slot, "idle timeout, closing connection");
                    return Ok(served);
                }
                Err(e) => return Err(self.reject(e).await),
            }

            let header =
                with_deadline(self.server.io_timeout, read_packet(&mut self.stream)).await;
            let packet = match header {
                Ok(packet) => packet,
                Err(ChannelError::ConnectionClosed) => return Err(ChannelError::ConnectionClosed),
                Err(e) => return Err(self.reject(e).await),
            };

            let angle = match packet.operation {
                Operation::Exit => {
                    debug!(slot = self.slot, "EXIT received");
                    return Ok(served);
                }
                Operation::Rotate => match packet.flags.angle() {
                    Some(angle) => angle,
                    None => {
                        let e = ChannelError::Protocol(format!(
                            "invalid rotation flags {:?}",
                            packet.flags
                        ));
                        return Err(self.reject(e).await);
                    }
                },
                other => {
                    let e = ChannelError::Protocol(format!("unexpected operation {other:?}"));
                    return Err(self.reject(e).await);
                }
            };

            match self.rotate(angle, packet.payload_size).await {
                Ok(JobOutcome::Rotated { bytes }) => {
                    served += 1;
                    debug!(slot = self.slot, %angle, bytes, "job served");
                }
                Ok(JobOutcome::Failed(e)) => {
                    warn!(slot = self.slot, "job failed: {e}");
                    with_deadline(
                        self.server.io_timeout,
                        write_packet(&mut self.stream, &Packet::nak()),
                    )
                    .await?;
                }
                Err(e) => return Err(self.reject(e).await),
            }
        }
    }

    /// Handles one ROTATE request whose header has been read.
    ///
    /// `Err` means the connection is unusable; `JobOutcome::Failed` means
    /// the payload was consumed and only this job is lost.
    async fn rotate(&mut self, angle: Angle, payload_size: u32) -> Result<JobOutcome, ChannelError> {
        let io_timeout = self.server.io_timeout;
        let scratch = ScratchDir::create(&self.server.scratch_dir, self.slot).await?;

        let mut upload = tokio::fs::File::create(scratch.input()).await?;
        with_deadline(
            io_timeout,
            copy_payload(&mut self.stream, &mut upload, u64::from(payload_size)),
        )
        .await?;
        upload.sync_all().await?;
        drop(upload);

        let rotated = {
            let codec = Arc::clone(&self.server.codec);
            let input = scratch.input();
            let output = scratch.output();
            tokio::task::spawn_blocking(move || -> Result<u64, ChannelError> {
                let bytes = std::fs::read(&input)?;
                let rotated = rotate_bytes(codec.as_ref(), &bytes, angle)?;
                std::fs::write(&output, &rotated)?;
                Ok(rotated.len() as u64)
            })
            .await
        };

        let output_len = match rotated {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => return Ok(JobOutcome::Failed(e)),
            Err(e) => return Ok(JobOutcome::Failed(e.into())),
        };
        let Ok(bytes) = u32::try_from(output_len) else {
            return Ok(JobOutcome::Failed(ChannelError::Protocol(format!(
                "result of {output_len} bytes does not fit the size field"
            ))));
        };

        with_deadline(io_timeout, write_packet(&mut self.stream, &Packet::ack(bytes))).await?;

        let mut result = tokio::fs::File::open(scratch.output()).await?;
        with_deadline(
            io_timeout,
            copy_payload(&mut result, &mut self.stream, output_len),
        )
        .await?;

        Ok(JobOutcome::Rotated { bytes })
    }

    /// Sends a best-effort NAK and hands back the error that caused it.
    async fn reject(&mut self, cause: ChannelError) -> ChannelError {
        let nak = with_deadline(
            self.server.io_timeout,
            write_packet(&mut self.stream, &Packet::nak()),
        )
        .await;
        if let Err(e) = nak {
            debug!(slot = self.slot, "could not send NAK: {e}");
        }
        cause
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use imgrot_transform::{PixelGrid, PngCodec, TransformError};
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::packet::Flags;

    /// Treats the payload as a raw 10-pixel-wide grayscale grid.
    #[derive(Default)]
    struct RawCodec {
        decodes: AtomicUsize,
    }

    impl ImageCodec for RawCodec {
        fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, TransformError> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            if bytes.len() % 10 != 0 {
                return Err(TransformError::Decode("width must be 10".into()));
            }
            PixelGrid::from_samples(10, bytes.len() / 10, bytes.to_vec())
        }

        fn encode(&self, grid: &PixelGrid) -> Result<Vec<u8>, TransformError> {
            Ok(grid.samples().to_vec())
        }
    }

    async fn start(
        pool_size: usize,
        codec: Arc<dyn ImageCodec>,
    ) -> (Arc<RotationServer>, tempfile::TempDir, tokio::task::JoinHandle<()>) {
        start_with_timeout(pool_size, codec, Duration::from_secs(5)).await
    }

    async fn start_with_timeout(
        pool_size: usize,
        codec: Arc<dyn ImageCodec>,
        io_timeout: Duration,
    ) -> (Arc<RotationServer>, tempfile::TempDir, tokio::task::JoinHandle<()>) {
        let scratch = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            pool_size,
            scratch_dir: scratch.path().to_path_buf(),
            io_timeout,
        };
        let server = RotationServer::bind(config, codec).await.unwrap();
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.run().await.unwrap() });
        (server, scratch, handle)
    }

    async fn send_raw(stream: &mut TcpStream, packet: Packet, payload: &[u8]) {
        stream.write_all(&packet.encode()).await.unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_response(stream: &mut TcpStream) -> (Packet, Vec<u8>) {
        let packet = read_packet(stream).await.unwrap();
        let mut body = vec![0u8; packet.payload_size as usize];
        stream.read_exact(&mut body).await.unwrap();
        (packet, body)
    }

    async fn wait_for_active(server: &RotationServer, expected: usize) {
        for _ in 0..100 {
            if server.active_connections() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.active_connections(), expected);
    }

    #[tokio::test]
    async fn rotate_180_success() {
        let codec = Arc::new(RawCodec::default());
        let (server, _scratch, handle) = start(2, codec.clone()).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        let payload: Vec<u8> = (0..100).collect();
        send_raw(&mut stream, Packet::rotate(Angle::Rotate180, 100), &payload).await;

        let (ack, body) = read_response(&mut stream).await;
        assert_eq!(ack.operation, Operation::Ack);
        assert_eq!(ack.payload_size, 100);
        // First row mirrored left-right.
        assert_eq!(&body[..10], &[9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);

        send_raw(&mut stream, Packet::exit(), &[]).await;
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "server closes after EXIT");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn bad_flags_nak_without_transform() {
        let codec = Arc::new(RawCodec::default());
        let (server, _scratch, handle) = start(2, codec.clone()).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        // Header only: the server must reject before reading any payload.
        send_raw(&mut stream, Packet::new(Operation::Rotate, Flags::NONE, 100), &[]).await;

        let nak = read_packet(&mut stream).await.unwrap();
        assert_eq!(nak.operation, Operation::Nak);
        assert_eq!(nak.payload_size, 0);

        // Connection is closed and the slot freed.
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        wait_for_active(&server, 0).await;
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn both_rotation_flags_rejected() {
        let (server, _scratch, handle) = start(1, Arc::new(RawCodec::default())).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        let flags = Flags::ROTATE_180 | Flags::ROTATE_270;
        send_raw(&mut stream, Packet::new(Operation::Rotate, flags, 0), &[]).await;
        assert_eq!(
            read_packet(&mut stream).await.unwrap().operation,
            Operation::Nak
        );

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reserved_flag_with_rotation_is_rejected() {
        let codec = Arc::new(RawCodec::default());
        let (server, _scratch, handle) = start(1, codec.clone()).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        let flags = Flags::ROTATE_180 | Flags::ENCRYPTED;
        send_raw(&mut stream, Packet::new(Operation::Rotate, flags, 10), &[]).await;
        assert_eq!(
            read_packet(&mut stream).await.unwrap().operation,
            Operation::Nak
        );

        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        wait_for_active(&server, 0).await;
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn idle_timeout_closes_without_nak() {
        let (server, _scratch, handle) =
            start_with_timeout(1, Arc::new(RawCodec::default()), Duration::from_millis(200)).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_active(&server, 1).await;

        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
            .await
            .expect("server closes the idle connection")
            .unwrap();
        assert!(rest.is_empty(), "no unsolicited response on idle close");
        wait_for_active(&server, 0).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_upload_times_out_and_frees_slot() {
        let (server, scratch, handle) =
            start_with_timeout(1, Arc::new(RawCodec::default()), Duration::from_millis(300)).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        // Header promises 100 bytes; only 40 arrive and the socket stays open.
        send_raw(&mut stream, Packet::rotate(Angle::Rotate180, 100), &[0; 40]).await;
        wait_for_active(&server, 1).await;

        wait_for_active(&server, 0).await;
        assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());

        // A new client gets the freed slot.
        let mut next = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_active(&server, 1).await;
        send_raw(&mut next, Packet::exit(), &[]).await;
        wait_for_active(&server, 0).await;

        drop(stream);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_operation_is_rejected() {
        let (server, _scratch, handle) = start(1, Arc::new(RawCodec::default())).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        send_raw(&mut stream, Packet::ack(0), &[]).await;
        assert_eq!(
            read_packet(&mut stream).await.unwrap().operation,
            Operation::Nak
        );
        wait_for_active(&server, 0).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn processing_error_keeps_connection() {
        let (server, scratch, handle) = start(1, Arc::new(RawCodec::default())).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        // 7 bytes cannot be decoded by RawCodec.
        send_raw(&mut stream, Packet::rotate(Angle::Rotate270, 7), &[1; 7]).await;
        assert_eq!(
            read_packet(&mut stream).await.unwrap().operation,
            Operation::Nak
        );

        // Same connection still serves the next request.
        let payload: Vec<u8> = (0..20).collect();
        send_raw(&mut stream, Packet::rotate(Angle::Rotate270, 20), &payload).await;
        let (ack, body) = read_response(&mut stream).await;
        assert_eq!(ack.operation, Operation::Ack);
        assert_eq!(&body[..10], &payload[10..]);
        assert_eq!(&body[10..], &payload[..10]);

        send_raw(&mut stream, Packet::exit(), &[]).await;
        wait_for_active(&server, 0).await;
        assert!(
            std::fs::read_dir(scratch.path()).unwrap().next().is_none(),
            "scratch cleaned after every job"
        );

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn real_png_roundtrip() {
        let (server, _scratch, handle) = start(1, Arc::new(PngCodec)).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        let grid = PixelGrid::from_samples(2, 2, vec![10, 20, 30, 40]).unwrap();
        let png = PngCodec.encode(&grid).unwrap();
        send_raw(
            &mut stream,
            Packet::rotate(Angle::Rotate270, png.len() as u32),
            &png,
        )
        .await;

        let (ack, body) = read_response(&mut stream).await;
        assert_eq!(ack.operation, Operation::Ack);
        assert_eq!(PngCodec.decode(&body).unwrap().samples(), &[30, 40, 10, 20]);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn admission_bounded_by_pool_size() {
        let (server, _scratch, handle) = start(2, Arc::new(RawCodec::default())).await;
        let addr = server.local_addr();

        let mut clients = Vec::new();
        for _ in 0..5 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }
        wait_for_active(&server, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_connections(), 2, "extra clients wait at accept");

        // Finishing one admitted client lets exactly one more in.
        let mut first = clients.remove(0);
        send_raw(&mut first, Packet::exit(), &[]).await;
        let mut rest = Vec::new();
        first.read_to_end(&mut rest).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_connections(), 2);

        for mut client in clients {
            send_raw(&mut client, Packet::exit(), &[]).await;
        }
        wait_for_active(&server, 0).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let (server, _scratch, handle) = start(2, Arc::new(RawCodec::default())).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_active(&server, 1).await;

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run joins connection tasks")
            .unwrap();

        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn truncated_payload_frees_slot() {
        let (server, scratch, handle) = start(1, Arc::new(RawCodec::default())).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        send_raw(&mut stream, Packet::rotate(Angle::Rotate180, 100), &[0; 40]).await;
        drop(stream);

        wait_for_active(&server, 0).await;
        assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_pool_size_rejected() {
        let config = ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            pool_size: 0,
            ..ServerConfig::default()
        };
        assert!(RotationServer::bind(config, Arc::new(PngCodec)).await.is_err());
    }
}
