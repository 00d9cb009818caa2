//! Raw byte relay for CONNECT tunnels.
//!
//! Two forwarders, one per direction. Each reads into its own buffer and
//! does not read again until the previous chunk is fully written, so at most
//! one buffer per direction is ever in flight. When either direction ends,
//! both sides are shut down.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::observability::metrics;

/// Per-direction buffer size.
pub const RELAY_BUFFER_SIZE: usize = 8 * 1024;

/// Bytes moved through a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Copy `reader` into `writer` until EOF or error, counting bytes.
async fn forward<R, W>(mut reader: R, mut writer: W, counter: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *counter += n as u64;
    }
}

/// Relay bytes between `client` and `backend` until one side closes or fails.
pub async fn relay<C, B>(client: C, backend: B) -> TunnelStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, mut client_write) = tokio::io::split(client);
    let (backend_read, mut backend_write) = tokio::io::split(backend);
    let mut stats = TunnelStats::default();

    let outcome = {
        let upstream = forward(client_read, &mut backend_write, &mut stats.client_to_backend);
        let downstream = forward(backend_read, &mut client_write, &mut stats.backend_to_client);
        tokio::select! {
            result = upstream => ("client", result),
            result = downstream => ("backend", result),
        }
    };

    match outcome {
        (side, Ok(())) => tracing::debug!(closed_by = side, "Tunnel closed"),
        (side, Err(e)) => tracing::debug!(failed_side = side, error = %e, "Tunnel failed"),
    }

    let _ = backend_write.shutdown().await;
    let _ = client_write.shutdown().await;

    metrics::record_tunnel_bytes(&stats);

    stats
}
