//! Room manager.
//!
//! Hands out join codes, spawns a task per room, remembers which room each
//! connection sits in, and routes client messages to the right room task.
//! Host checks happen inside the room, which is the only place that knows
//! the seat table.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::network::Connection;
use crate::protocol::{ClientMessage, ConnectionId, Identity, ServerMessage};
use crate::room::{run_room, Room, RoomError, RoomEvent, RoomRequest};
use crate::RoomConfig;

/// Join code length.
pub const CODE_LEN: usize = 4;

/// Join code characters. No 0/O or 1/I, which read alike.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Events buffered per room before senders wait.
const ROOM_EVENT_BUFFER: usize = 256;

/// A fresh random join code.
pub fn generate_code(rng: &mut impl Rng) -> String {
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Codes are case-insensitive on input.
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug)]
struct RoomHandle {
    events: mpsc::Sender<RoomEvent>,
    task: JoinHandle<()>,
}

/// Where a connection sits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Membership {
    code: String,
    seat: usize,
}

#[derive(Debug, Default)]
struct Registry {
    rooms: HashMap<String, RoomHandle>,
    members: HashMap<ConnectionId, Membership>,
}

impl Registry {
    /// The connection's room, dropping the entry if the room is gone.
    fn room_of(&mut self, connection: ConnectionId) -> Option<(String, mpsc::Sender<RoomEvent>)> {
        let code = self.members.get(&connection)?.code.clone();
        match self.rooms.get(&code) {
            Some(handle) => Some((code, handle.events.clone())),
            None => {
                self.members.remove(&connection);
                None
            }
        }
    }

    /// Record `connection` in `seat`, evicting whichever connection held
    /// that seat before.
    fn seat(&mut self, connection: ConnectionId, code: String, seat: usize) {
        self.members
            .retain(|&id, member| id == connection || member.code != code || member.seat != seat);
        self.members.insert(connection, Membership { code, seat });
    }

    fn unused_code(&self) -> String {
        loop {
            let code = generate_code(&mut rand::thread_rng());
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

/// Shared handle to every room on the server.
#[derive(Debug, Clone)]
pub struct Lobby {
    config: Arc<RoomConfig>,
    registry: Arc<Mutex<Registry>>,
}

impl Lobby {
    /// An empty lobby whose rooms use `config`.
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Settings every room is opened with.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Rooms currently open.
    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.rooms.len()
    }

    /// Code of the room `connection` sits in.
    pub async fn room_of(&self, connection: ConnectionId) -> Option<String> {
        self.registry.lock().await.room_of(connection).map(|(code, _)| code)
    }

    /// Route one client message.
    pub async fn dispatch(&self, connection: &Connection, message: ClientMessage) {
        match message {
            ClientMessage::CreateRoom { name, icon } => {
                self.create_room(connection, Identity::new(&name, &icon)).await;
            }
            ClientMessage::JoinRoom { code, name, icon } => {
                self.join_room(connection, &code, Identity::new(&name, &icon)).await;
            }
            ClientMessage::RejoinRoom { code, seat, secret } => {
                self.rejoin_room(connection, &code, seat, secret).await;
            }
            ClientMessage::LeaveRoom => self.leave_room(connection).await,
            ClientMessage::Command { command } => {
                let event = RoomEvent::Command {
                    connection: connection.id(),
                    command,
                };
                self.forward(connection, event).await;
            }
            ClientMessage::StartGame => self.request(connection, RoomRequest::Start).await,
            ClientMessage::PauseGame => self.request(connection, RoomRequest::Pause).await,
            ClientMessage::ResumeGame => self.request(connection, RoomRequest::Resume).await,
            ClientMessage::SaveGame => self.request(connection, RoomRequest::Save).await,
            ClientMessage::LoadGame => self.request(connection, RoomRequest::Load).await,
            ClientMessage::UpdateIdentity { name, icon } => {
                self.request(connection, RoomRequest::UpdateIdentity { name, icon })
                    .await;
            }
            ClientMessage::AssignAi { seat, difficulty } => {
                self.request(connection, RoomRequest::AssignAi { seat, difficulty })
                    .await;
            }
            ClientMessage::RemoveAi { seat } => {
                self.request(connection, RoomRequest::RemoveAi { seat }).await;
            }
        }
    }

    /// Open a room with `connection` as host.
    pub async fn create_room(&self, connection: &Connection, identity: Identity) {
        let mut registry = self.registry.lock().await;
        if registry.room_of(connection.id()).is_some() {
            connection.send(&ServerMessage::error("already in a room"));
            return;
        }

        let code = registry.unused_code();
        let room = Room::open(code.clone(), (*self.config).clone(), connection, identity);
        let (events, inbox) = mpsc::channel(ROOM_EVENT_BUFFER);

        let lobby = self.clone();
        let task_code = code.clone();
        let task = tokio::spawn(async move {
            run_room(room, inbox).await;
            lobby.remove_room(&task_code).await;
        });

        registry.rooms.insert(code.clone(), RoomHandle { events, task });
        registry.seat(connection.id(), code, 0);
    }

    /// Seat `connection` in the room with `code`.
    pub async fn join_room(&self, connection: &Connection, code: &str, identity: Identity) {
        let code = normalize_code(code);
        let Some(events) = self.events_for_newcomer(connection, &code).await else {
            return;
        };

        let (reply, response) = oneshot::channel();
        let event = RoomEvent::Join {
            connection: connection.clone(),
            identity,
            reply,
        };
        self.await_seat(connection, code, &events, event, response).await;
    }

    /// Re-attach `connection` to a seat it held before.
    pub async fn rejoin_room(&self, connection: &Connection, code: &str, seat: usize, secret: String) {
        let code = normalize_code(code);
        let Some(events) = self.events_for_newcomer(connection, &code).await else {
            return;
        };

        let (reply, response) = oneshot::channel();
        let event = RoomEvent::Rejoin {
            connection: connection.clone(),
            seat,
            secret,
            reply,
        };
        self.await_seat(connection, code, &events, event, response).await;
    }

    async fn events_for_newcomer(&self, connection: &Connection, code: &str) -> Option<mpsc::Sender<RoomEvent>> {
        let mut registry = self.registry.lock().await;
        if registry.room_of(connection.id()).is_some() {
            connection.send(&ServerMessage::error("already in a room"));
            return None;
        }
        let events = registry.rooms.get(code).map(|handle| handle.events.clone());
        if events.is_none() {
            connection.send(&ServerMessage::RoomNotFound);
        }
        events
    }

    async fn await_seat(
        &self,
        connection: &Connection,
        code: String,
        events: &mpsc::Sender<RoomEvent>,
        event: RoomEvent,
        response: oneshot::Receiver<Result<usize, RoomError>>,
    ) {
        if events.send(event).await.is_err() {
            connection.send(&ServerMessage::RoomNotFound);
            return;
        }
        match response.await {
            Ok(Ok(seat)) => {
                debug!(room = %code, seat, connection = connection.id(), "Connection seated");
                self.registry.lock().await.seat(connection.id(), code, seat);
            }
            // The room already sent the notice.
            Ok(Err(_)) => {}
            Err(_) => connection.send(&ServerMessage::RoomNotFound),
        }
    }

    /// Give up the connection's seat.
    pub async fn leave_room(&self, connection: &Connection) {
        let events = {
            let mut registry = self.registry.lock().await;
            let events = registry.room_of(connection.id()).map(|(_, events)| events);
            registry.members.remove(&connection.id());
            events
        };
        match events {
            Some(events) => {
                let _ = events
                    .send(RoomEvent::Leave {
                        connection: connection.id(),
                    })
                    .await;
            }
            None => connection.send(&ServerMessage::NotInRoom),
        }
    }

    async fn request(&self, connection: &Connection, request: RoomRequest) {
        let event = RoomEvent::Request {
            connection: connection.clone(),
            request,
        };
        self.forward(connection, event).await;
    }

    /// Send an event to the connection's room, or answer `NOT_IN_ROOM`.
    async fn forward(&self, connection: &Connection, event: RoomEvent) {
        let room = self.registry.lock().await.room_of(connection.id());
        let Some((code, events)) = room else {
            connection.send(&ServerMessage::NotInRoom);
            return;
        };
        if events.send(event).await.is_err() {
            debug!(room = %code, connection = connection.id(), "Room gone, dropping event");
            self.registry.lock().await.members.remove(&connection.id());
            connection.send(&ServerMessage::NotInRoom);
        }
    }

    /// The connection's socket closed.
    pub async fn disconnected(&self, connection: ConnectionId) {
        let room = {
            let mut registry = self.registry.lock().await;
            let room = registry.room_of(connection);
            registry.members.remove(&connection);
            room
        };
        if let Some((_, events)) = room {
            let _ = events.send(RoomEvent::Disconnected { connection }).await;
        }
    }

    async fn remove_room(&self, code: &str) {
        let mut registry = self.registry.lock().await;
        if registry.rooms.remove(code).is_some() {
            registry.members.retain(|_, member| member.code != code);
            info!(room = %code, remaining = registry.rooms.len(), "Room removed");
        }
    }

    /// Close every room with `room-closed` and wait for their tasks.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = {
            let mut registry = self.registry.lock().await;
            registry.members.clear();
            registry.rooms.drain().map(|(_, handle)| handle).collect()
        };
        info!(rooms = handles.len(), "Closing all rooms");

        for handle in &handles {
            let _ = handle.events.send(RoomEvent::Close).await;
        }
        for handle in handles {
            let _ = handle.task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CloseReason, RoomStatus};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type Inbox = mpsc::Receiver<Arc<str>>;

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = rx.try_recv() {
            messages.push(serde_json::from_str(&text).unwrap());
        }
        messages
    }

    fn created_code(messages: &[ServerMessage]) -> String {
        messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::RoomCreated { code, .. } => Some(code.clone()),
                _ => None,
            })
            .expect("no ROOM_CREATED")
    }

    async fn settle(lobby: &Lobby, rooms: usize) {
        for _ in 0..200 {
            if lobby.room_count().await == rooms {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("lobby never reached {rooms} rooms");
    }

    #[test]
    fn test_codes_avoid_ambiguous_characters() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(!code.contains(['0', 'O', '1', 'I']));
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_create_and_join_by_code() {
        let lobby = Lobby::new(RoomConfig::default());
        let (host, mut host_rx) = Connection::channel(1, 64);
        let (guest, mut guest_rx) = Connection::channel(2, 64);

        lobby.create_room(&host, Identity::new("Ada", "fox")).await;
        let code = created_code(&drain(&mut host_rx));
        lobby
            .join_room(&guest, &code.to_lowercase(), Identity::new("Bo", "owl"))
            .await;

        assert!(drain(&mut guest_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomJoined { seat: 1, status: RoomStatus::Waiting, .. })));
        assert_eq!(lobby.room_of(2).await, Some(code));
        assert_eq!(lobby.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_code_not_found() {
        let lobby = Lobby::new(RoomConfig::default());
        let (guest, mut rx) = Connection::channel(2, 8);

        lobby.join_room(&guest, "ZZZZ", Identity::default()).await;

        assert_eq!(drain(&mut rx), vec![ServerMessage::RoomNotFound]);
        assert_eq!(lobby.room_of(2).await, None);
    }

    #[tokio::test]
    async fn test_second_create_refused() {
        let lobby = Lobby::new(RoomConfig::default());
        let (host, mut rx) = Connection::channel(1, 64);

        lobby.create_room(&host, Identity::default()).await;
        drain(&mut rx);
        lobby.create_room(&host, Identity::default()).await;

        assert!(matches!(drain(&mut rx).as_slice(), [ServerMessage::Error { .. }]));
        assert_eq!(lobby.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_evicts_previous_connection() {
        let lobby = Lobby::new(RoomConfig::default());
        let (host, mut host_rx) = Connection::channel(1, 64);
        let (guest, mut guest_rx) = Connection::channel(2, 64);
        let (replacement, mut new_rx) = Connection::channel(3, 64);

        lobby.create_room(&host, Identity::new("Ada", "fox")).await;
        let code = created_code(&drain(&mut host_rx));
        lobby.join_room(&guest, &code, Identity::new("Bo", "owl")).await;
        let secret = drain(&mut guest_rx)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::RoomJoined { secret, .. } => Some(secret),
                _ => None,
            })
            .expect("no ROOM_JOINED");

        lobby.rejoin_room(&replacement, &code, 1, secret).await;

        assert!(drain(&mut new_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomRejoined { seat: 1, .. })));
        assert_eq!(lobby.room_of(3).await, Some(code));
        assert_eq!(lobby.room_of(2).await, None);
        assert!(lobby.room_of(1).await.is_some());

        // Free to go elsewhere.
        lobby.create_room(&guest, Identity::new("Bo", "owl")).await;
        assert!(drain(&mut guest_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomCreated { .. })));
        assert_eq!(lobby.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_requests_need_a_room() {
        let lobby = Lobby::new(RoomConfig::default());
        let (stray, mut rx) = Connection::channel(4, 8);

        lobby.dispatch(&stray, ClientMessage::PauseGame).await;
        lobby.dispatch(&stray, ClientMessage::LeaveRoom).await;

        assert_eq!(drain(&mut rx), vec![ServerMessage::NotInRoom, ServerMessage::NotInRoom]);
    }

    #[tokio::test]
    async fn test_last_leave_removes_room() {
        let lobby = Lobby::new(RoomConfig::default());
        let (host, mut rx) = Connection::channel(1, 64);

        lobby.create_room(&host, Identity::default()).await;
        lobby.leave_room(&host).await;
        settle(&lobby, 0).await;

        let reasons: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::RoomClosed { reason } => Some(reason),
                _ => None,
            })
            .collect();
        // The leaver no longer holds a seat when the room empties.
        assert!(reasons.is_empty());
        assert_eq!(lobby.room_of(1).await, None);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_room() {
        let lobby = Lobby::new(RoomConfig::default());
        let (a, mut a_rx) = Connection::channel(1, 64);
        let (b, mut b_rx) = Connection::channel(2, 64);

        lobby.create_room(&a, Identity::default()).await;
        lobby.create_room(&b, Identity::default()).await;
        assert_eq!(lobby.room_count().await, 2);

        lobby.shutdown().await;

        assert_eq!(lobby.room_count().await, 0);
        for rx in [&mut a_rx, &mut b_rx] {
            assert!(drain(rx).contains(&ServerMessage::RoomClosed {
                reason: CloseReason::RoomClosed
            }));
        }
    }
}
