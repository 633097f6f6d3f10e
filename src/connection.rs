//! Per-socket connection driver
//!
//! One task owns the TCP stream, the reassembly buffer, and both crypto
//! contexts for its connection. Inbound bytes are reassembled into frames
//! and forwarded to the chat server actor; outbound messages arrive over a
//! bounded queue, are sealed, and written to the socket.
//!
//! Teardown paths:
//! - peer close, read/write error, or any decode failure ends the task and
//!   reports a `Disconnect` to the actor;
//! - the actor closing the outbound queue lets already-queued frames drain
//!   before the socket shuts down (farewells are delivered);
//! - an eviction notice drops the socket immediately, queue and all.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit};
use tracing::{debug, warn};

use crate::crypto::CryptoContext;
use crate::error::AppError;
use crate::protocol::{self, MessageType, FRAME_HEADER_SIZE, MAX_ENCRYPTED_PAYLOAD};
use crate::server::ServerCommand;
use crate::types::ConnId;

/// Bytes requested from the kernel per read.
pub const READ_CHUNK: usize = 4096;

/// Reassembly buffer bound; exceeding it is a protocol violation.
pub const MAX_INBUF: usize = FRAME_HEADER_SIZE + 2 * MAX_ENCRYPTED_PAYLOAD;

/// Outbound queue depth per connection. A full queue marks the consumer
/// slow and gets it evicted.
pub const OUTBOUND_QUEUE: usize = 256;

/// One plaintext message queued for a connection's writer.
#[derive(Debug)]
pub struct Outbound {
    pub msg_type: MessageType,
    pub text: String,
}

/// Drive one accepted connection until it closes.
///
/// Registers with the actor, then loops over socket readability, the
/// outbound queue, and the eviction notice. The semaphore permit is the
/// connection's admission slot; dropping it on return frees capacity for
/// the next accept.
pub async fn run_connection(
    id: ConnId,
    stream: TcpStream,
    peer: String,
    mut recv_ctx: CryptoContext,
    mut send_ctx: CryptoContext,
    cmd_tx: mpsc::Sender<ServerCommand>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let evict = Arc::new(Notify::new());

    let registered = cmd_tx
        .send(ServerCommand::Connect {
            id,
            peer: peer.clone(),
            sender: out_tx,
            evict: evict.clone(),
        })
        .await
        .is_ok();
    if !registered {
        // Actor is gone; nothing to serve.
        return;
    }

    let (mut read_half, mut write_half) = stream.into_split();
    let mut inbuf = BytesMut::with_capacity(READ_CHUNK);

    let reason = loop {
        tokio::select! {
            read = read_half.read_buf(&mut inbuf) => {
                match read {
                    Ok(0) => break "peer closed",
                    Ok(_) => {
                        if let Err(err) = drain_frames(id, &mut inbuf, &mut recv_ctx, &cmd_tx).await {
                            warn!("{}: dropping connection: {}", peer, err);
                            break "protocol violation";
                        }
                        if inbuf.len() > MAX_INBUF {
                            warn!("{}: input buffer overflow ({} bytes)", peer, inbuf.len());
                            break "input overflow";
                        }
                    }
                    Err(err) => {
                        debug!("{}: read failed: {}", peer, err);
                        break "read error";
                    }
                }
            }
            outbound = out_rx.recv() => {
                match outbound {
                    Some(outbound) => {
                        if let Err(err) = write_frame(&mut write_half, &mut send_ctx, &outbound).await {
                            debug!("{}: write failed: {}", peer, err);
                            break "write error";
                        }
                    }
                    // recv() drains queued messages before yielding None, so
                    // everything the actor sent has already hit the socket.
                    None => break "closed by server",
                }
            }
            _ = evict.notified() => break "evicted",
        }
    };

    debug!("{}: connection done ({})", peer, reason);
    let _ = write_half.shutdown().await;
    let _ = cmd_tx.send(ServerCommand::Disconnect { id }).await;
}

/// Pull every complete frame off the reassembly buffer and hand it to the
/// actor. Any decode failure is connection-fatal and is never answered on
/// the wire.
async fn drain_frames(
    id: ConnId,
    inbuf: &mut BytesMut,
    recv_ctx: &mut CryptoContext,
    cmd_tx: &mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    while let Some(frame) = protocol::try_decode(inbuf, recv_ctx)? {
        cmd_tx
            .send(ServerCommand::Frame {
                id,
                msg_type: frame.msg_type,
                payload: frame.payload,
            })
            .await
            .map_err(|_| AppError::ChannelSend)?;
    }
    Ok(())
}

async fn write_frame(
    write_half: &mut OwnedWriteHalf,
    send_ctx: &mut CryptoContext,
    outbound: &Outbound,
) -> Result<(), AppError> {
    let frame =
        match protocol::encode_message(outbound.msg_type, outbound.text.as_bytes(), send_ctx) {
            Ok(frame) => frame,
            Err(err) => {
                // A single oversized listing must not kill the connection.
                warn!("dropping oversized outbound frame: {}", err);
                return Ok(());
            }
        };
    write_half.write_all(&frame).await?;
    Ok(())
}
