//! Async frame I/O over any byte stream, using the `dt-proto` wire format.

use std::io::ErrorKind;

use dt_proto::wire::{encode_frame, from_cbor, payload_len, HEADER_LEN};
use dt_proto::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{NetError, NetResult};

/// Read one message.  `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> NetResult<Option<Message>> {
    let mut h = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = r.read(&mut h[filled..]).await?;
        if n == 0 {
            return if filled == 0 { Ok(None) } else { Err(NetError::Truncated) };
        }
        filled += n;
    }
    let len = payload_len(&h)?;
    let mut payload = vec![0u8; len];
    match r.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(NetError::Truncated),
        Err(e) => return Err(e.into()),
    }
    Ok(Some(from_cbor(&payload)?))
}

/// Write one message as a complete frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> NetResult<()> {
    let bytes = encode_frame(msg)?;
    w.write_all(&bytes).await?;
    w.flush().await?;
    Ok(())
}

/// Spawn a task that writes every message sent on the returned channel, in
/// order.  The task ends when the channel is dropped or a write fails.
pub fn spawn_writer<W>(mut w: W, peer: String) -> mpsc::UnboundedSender<Message>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_frame(&mut w, &msg).await {
                warn!(%peer, kind = msg.kind(), error = %e, "write failed");
                break;
            }
        }
        debug!(%peer, "writer closed");
    });
    tx
}
