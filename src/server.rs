//! ChatServer actor and the listening server
//!
//! The central actor owns all chat state: connected clients, usernames, and
//! room membership. Connection drivers talk to it exclusively through the
//! command channel, so no state is ever shared between tasks and no locks
//! are needed.
//!
//! `Server` owns the listening socket: it spawns the actor, accepts
//! connections under an admission limit, and starts one driver task per
//! socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::connection::{self, Outbound};
use crate::crypto::CryptoContext;
use crate::protocol::MessageType;
use crate::room::{self, RoomRegistry, LOBBY};
use crate::types::ConnId;

/// Greeting pushed to every connection right after accept.
const WELCOME: &str = "Welcome. Use HELLO <name>, JOIN <room>.";

/// Username and room name length cap, in bytes.
const MAX_NAME_LEN: usize = 32;

/// Command channel depth between connection drivers and the actor.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Commands sent from connection drivers to the ChatServer actor.
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection registered
    Connect {
        id: ConnId,
        peer: String,
        sender: mpsc::Sender<Outbound>,
        evict: Arc<Notify>,
    },
    /// Connection driver finished
    Disconnect { id: ConnId },
    /// One decoded inbound frame
    Frame {
        id: ConnId,
        msg_type: u8,
        payload: Vec<u8>,
    },
}

/// The chat state actor.
///
/// Processes commands in arrival order; per-connection command order matches
/// the order frames appeared in that connection's byte stream, so broadcasts
/// preserve sender-relative ordering.
pub struct ChatServer {
    clients: HashMap<ConnId, Client>,
    rooms: RoomRegistry,
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            clients: HashMap::new(),
            rooms: RoomRegistry::new(),
            receiver,
        }
    }

    /// Run the actor until every command sender is gone.
    pub async fn run(mut self) {
        info!("chat server actor started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("chat server actor shutting down");
    }

    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                id,
                peer,
                sender,
                evict,
            } => self.handle_connect(id, peer, sender, evict),
            ServerCommand::Disconnect { id } => self.handle_disconnect(id),
            ServerCommand::Frame {
                id,
                msg_type,
                payload,
            } => self.handle_frame(id, msg_type, payload),
        }
    }

    fn handle_connect(
        &mut self,
        id: ConnId,
        peer: String,
        sender: mpsc::Sender<Outbound>,
        evict: Arc<Notify>,
    ) {
        info!("{}: connected ({})", peer, id);
        self.clients.insert(id, Client::new(id, peer, sender, evict));
        self.rooms.join(id, LOBBY);
        self.send_to(id, MessageType::Hello, WELCOME.to_string());
    }

    fn handle_disconnect(&mut self, id: ConnId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        info!(
            "{}: closed (user={}, room={})",
            client.peer,
            client.display_name(),
            self.rooms.room_of(id).unwrap_or(LOBBY)
        );
        self.rooms.remove(id);
    }

    fn handle_frame(&mut self, id: ConnId, msg_type: u8, payload: Vec<u8>) {
        if !self.clients.contains_key(&id) {
            return;
        }

        let mut text = String::from_utf8_lossy(&payload).into_owned();
        // Line-based clients may leave a trailing \r on every payload.
        if text.ends_with('\r') {
            text.pop();
        }

        match MessageType::from_u8(msg_type) {
            Some(MessageType::Hello) => self.handle_hello(id, text),
            Some(MessageType::Chat) => self.handle_chat(id, text),
            Some(MessageType::Join) => self.handle_join(id, text),
            Some(MessageType::Disconnect) => self.handle_leave(id),
            Some(MessageType::ListRooms) => self.handle_list_rooms(id),
            Some(MessageType::ListUsers) => self.handle_list_users(id),
            None => debug!("ignoring unknown message type {} from {}", msg_type, id),
        }
    }

    fn handle_hello(&mut self, id: ConnId, name: String) {
        if name.is_empty() {
            self.send_to(id, MessageType::Chat, "[system] Error: Empty username".into());
            return;
        }
        if name.len() > MAX_NAME_LEN {
            self.send_to(id, MessageType::Chat, "[system] Error: Username too long".into());
            return;
        }

        if let Some(client) = self.clients.get_mut(&id) {
            info!("{}: username set to '{}'", client.peer, name);
            client.set_username(name);
        }
        self.send_to(id, MessageType::Chat, "[system] Username set".into());
    }

    fn handle_chat(&mut self, id: ConnId, text: String) {
        if text.is_empty() {
            return;
        }

        let room = self.rooms.room_of(id).unwrap_or(LOBBY).to_string();
        let line = room::chat_line(&self.display_name_of(id), &text);
        self.broadcast(&room, &line);
    }

    fn handle_join(&mut self, id: ConnId, new_room: String) {
        if new_room.is_empty() {
            self.send_to(id, MessageType::Chat, "[system] Error: Empty room name".into());
            return;
        }
        if new_room.len() > MAX_NAME_LEN {
            self.send_to(id, MessageType::Chat, "[system] Error: Room name too long".into());
            return;
        }

        let old_room = self.rooms.room_of(id).unwrap_or(LOBBY).to_string();
        self.rooms.join(id, &new_room);

        let user = self.display_name_of(id);
        self.broadcast(&new_room, &room::system_line(&format!("{} has joined", user)));
        if old_room != new_room {
            self.broadcast(&old_room, &room::system_line(&format!("{} has left", user)));
        }
    }

    fn handle_leave(&mut self, id: ConnId) {
        self.send_to(id, MessageType::Chat, "[system] Goodbye!".into());

        // Dropping the outbound sender lets the queued farewell drain before
        // the driver closes the socket.
        if let Some(client) = self.clients.remove(&id) {
            info!(
                "{}: disconnect requested (user={})",
                client.peer,
                client.display_name()
            );
        }
        self.rooms.remove(id);
    }

    fn handle_list_rooms(&mut self, id: ConnId) {
        let mut listing = String::from("Available rooms:\n");
        for (room, count) in self.rooms.counts() {
            listing.push_str(&format!(" - {} ({} users)\n", room, count));
        }
        self.send_to(id, MessageType::ListRooms, listing);
    }

    fn handle_list_users(&mut self, id: ConnId) {
        let room = self.rooms.room_of(id).unwrap_or(LOBBY).to_string();
        let mut listing = format!("Users in room '{}':\n", room);
        for member in self.rooms.members(&room) {
            listing.push_str(&format!(" - {}\n", self.display_name_of(member)));
        }
        self.send_to(id, MessageType::ListUsers, listing);
    }

    fn display_name_of(&self, id: ConnId) -> String {
        self.clients
            .get(&id)
            .map_or_else(|| "anon".to_string(), |client| client.display_name().to_string())
    }

    /// Queue `line` as a Chat frame to every member of `room`.
    ///
    /// The member list is snapshotted first because a send may evict a slow
    /// consumer and mutate the registry.
    fn broadcast(&mut self, room: &str, line: &str) {
        for member in self.rooms.members(room) {
            self.send_to(member, MessageType::Chat, line.to_string());
        }
    }

    fn send_to(&mut self, id: ConnId, msg_type: MessageType, text: String) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };

        match client.sender.try_send(Outbound { msg_type, text }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{}: outbound queue full, evicting slow consumer", client.peer);
                client.evict.notify_one();
                self.clients.remove(&id);
                self.rooms.remove(id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Driver already gone; its Disconnect will clean up.
            }
        }
    }
}

/// The listening server.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Startup failures surface here so the binary can exit nonzero before
    /// serving anything.
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the surrounding runtime shuts down.
    ///
    /// Accept errors are logged and the loop continues; per-connection
    /// failures never reach this loop at all.
    pub async fn run(self) -> std::io::Result<()> {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        tokio::spawn(ChatServer::new(cmd_rx).run());

        let admission = Arc::new(Semaphore::new(if self.config.max_connections == 0 {
            Semaphore::MAX_PERMITS
        } else {
            self.config.max_connections
        }));
        let secret: Arc<str> = self.config.shared_secret.as_str().into();

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    // At capacity: close immediately, no queueing.
                    let Ok(permit) = admission.clone().try_acquire_owned() else {
                        debug!("{}: rejected, connection limit reached", peer);
                        drop(stream);
                        continue;
                    };

                    let id = ConnId::new();
                    let recv_ctx = CryptoContext::from_shared_secret(secret.as_bytes());
                    let send_ctx = CryptoContext::from_shared_secret(secret.as_bytes());
                    let cmd_tx = cmd_tx.clone();

                    tokio::spawn(connection::run_connection(
                        id,
                        stream,
                        peer.to_string(),
                        recv_ctx,
                        send_ctx,
                        cmd_tx,
                        Some(permit),
                    ));
                }
                Err(err) => warn!("accept failed: {}", err),
            }
        }
    }
}
