//! Encrypted Multi-Room TCP Chat
//!
//! A chat service where every wire message is authenticated and encrypted
//! under keys derived from a pre-shared secret, and plaintext chat is routed
//! between users that joined the same named room.
//!
//! # Wire format
//! Each message is one frame: an 8-byte clear header (version, type,
//! envelope length) followed by an encrypted envelope. The envelope is
//! AES-256-CBC ciphertext plus an HMAC-SHA256 tag covering a monotonically
//! increasing sequence number, the IV, and the ciphertext - so tampering,
//! replays, and stale reordering are all rejected before decryption.
//!
//! # Architecture
//! The server uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor managing all state
//! - Each connection has a driver task owning its socket and crypto contexts
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use sealchat::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ServerConfig::from_file("configs/server.toml").unwrap();
//!     let server = Server::bind(config).await?;
//!     server.run().await
//! }
//! ```

pub mod chat_client;
pub mod client;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use chat_client::ChatClient;
pub use client::Client;
pub use config::{ConfigError, ServerConfig};
pub use crypto::CryptoContext;
pub use error::{AppError, CryptoError, FrameError};
pub use protocol::{FrameHeader, MessageType};
pub use room::RoomRegistry;
pub use server::{ChatServer, Server, ServerCommand};
pub use types::ConnId;
