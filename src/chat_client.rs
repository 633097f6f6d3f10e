//! Interactive chat client
//!
//! Two cooperating tasks share the socket: the prompt loop reads stdin
//! lines, maps them through the command grammar, and sends one frame per
//! line; the receiver task decodes and prints every frame pushed by the
//! server. Standard output is serialized by a mutex so incoming lines and
//! the prompt do not interleave. Peer close ends both sides.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::crypto::CryptoContext;
use crate::error::AppError;
use crate::protocol::{self, FrameHeader, MessageType, FRAME_HEADER_SIZE};

/// Map one line of user input to a wire message.
///
/// Anything that is not a recognized command is a chat line.
pub fn parse_command(line: &str) -> (MessageType, String) {
    if let Some(name) = line.strip_prefix("HELLO ") {
        return (MessageType::Hello, name.to_string());
    }
    if let Some(room) = line.strip_prefix("JOIN ") {
        return (MessageType::Join, room.to_string());
    }
    match line {
        "DISC" | "/quit" | "/exit" => (MessageType::Disconnect, String::new()),
        "/rooms" => (MessageType::ListRooms, String::new()),
        "/users" => (MessageType::ListUsers, String::new()),
        _ => (MessageType::Chat, line.to_string()),
    }
}

/// One connected chat session.
pub struct ChatClient {
    stream: TcpStream,
    send_ctx: CryptoContext,
    recv_ctx: CryptoContext,
}

impl ChatClient {
    /// Connect and derive both direction contexts from the shared secret.
    pub async fn connect(host: &str, port: u16, secret: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self {
            stream,
            send_ctx: CryptoContext::from_shared_secret(secret.as_bytes()),
            recv_ctx: CryptoContext::from_shared_secret(secret.as_bytes()),
        })
    }

    /// Run the interactive session until the user quits or the server
    /// disconnects.
    pub async fn run(self) -> Result<(), AppError> {
        let (read_half, mut write_half) = self.stream.into_split();
        let running = Arc::new(AtomicBool::new(true));
        let io_lock = Arc::new(Mutex::new(()));

        let mut rx_task = tokio::spawn(receive_loop(
            read_half,
            self.recv_ctx,
            running.clone(),
            io_lock.clone(),
        ));

        let mut send_ctx = self.send_ctx;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        let receiver_done = loop {
            {
                let _guard = io_lock.lock().await;
                print!("> ");
                std::io::stdout().flush()?;
            }

            let line = tokio::select! {
                _ = &mut rx_task => break true,
                line = lines.next_line() => match line? {
                    Some(line) => line,
                    None => break false, // stdin closed
                },
            };
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();

            if !running.load(Ordering::Acquire) {
                break false;
            }

            let (msg_type, payload) = parse_command(&line);
            let frame = protocol::encode_message(msg_type, payload.as_bytes(), &mut send_ctx)?;
            write_half.write_all(&frame).await?;

            if matches!(line.as_str(), "DISC" | "/quit" | "/exit") {
                break false;
            }
        };

        running.store(false, Ordering::Release);
        let _ = write_half.shutdown().await;

        // The server's close (or our FIN bouncing back as EOF) unblocks the
        // receiver; bound the wait regardless.
        if !receiver_done {
            let _ = tokio::time::timeout(Duration::from_secs(2), &mut rx_task).await;
        }
        rx_task.abort();
        Ok(())
    }
}

/// Print every frame pushed by the server until the connection closes.
async fn receive_loop(
    mut read_half: OwnedReadHalf,
    mut recv_ctx: CryptoContext,
    running: Arc<AtomicBool>,
    io_lock: Arc<Mutex<()>>,
) {
    loop {
        match read_frame(&mut read_half, &mut recv_ctx).await {
            Ok((_msg_type, text)) => {
                let _guard = io_lock.lock().await;
                println!("\n{}", text);
            }
            Err(err) => {
                debug!("receive loop ended: {}", err);
                running.store(false, Ordering::Release);
                let _guard = io_lock.lock().await;
                println!("\n[system] disconnected.");
                break;
            }
        }
    }
}

/// Read exactly one frame and decrypt its payload.
async fn read_frame(
    read_half: &mut OwnedReadHalf,
    recv_ctx: &mut CryptoContext,
) -> Result<(u8, String), AppError> {
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    read_half.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::parse(&header_bytes)?;

    let mut envelope = vec![0u8; header.length as usize];
    read_half.read_exact(&mut envelope).await?;

    let plaintext = recv_ctx
        .open(&envelope)
        .map_err(crate::error::FrameError::from)?;
    Ok((header.msg_type, String::from_utf8_lossy(&plaintext).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        assert_eq!(
            parse_command("HELLO Alice"),
            (MessageType::Hello, "Alice".to_string())
        );
    }

    #[test]
    fn test_parse_join() {
        assert_eq!(
            parse_command("JOIN room1"),
            (MessageType::Join, "room1".to_string())
        );
    }

    #[test]
    fn test_parse_disconnect_aliases() {
        for line in ["DISC", "/quit", "/exit"] {
            assert_eq!(parse_command(line), (MessageType::Disconnect, String::new()));
        }
    }

    #[test]
    fn test_parse_listings() {
        assert_eq!(parse_command("/rooms"), (MessageType::ListRooms, String::new()));
        assert_eq!(parse_command("/users"), (MessageType::ListUsers, String::new()));
    }

    #[test]
    fn test_everything_else_is_chat() {
        assert_eq!(
            parse_command("hello there"),
            (MessageType::Chat, "hello there".to_string())
        );
        // Keyword without its argument separator stays a chat line.
        assert_eq!(parse_command("HELLO"), (MessageType::Chat, "HELLO".to_string()));
        assert_eq!(parse_command("JOIN"), (MessageType::Chat, "JOIN".to_string()));
    }
}
