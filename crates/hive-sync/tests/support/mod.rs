//! In-memory room server for integration tests.
//!
//! Plays the broker side of every session a [`LoopbackConnector`] accepts:
//! answers create/join requests, keeps one player table per room, and
//! broadcasts the full table on `/topic/rooms/{id}/players` after every
//! register, move and disconnect.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hive_net::loopback::{LoopbackConnector, ServerEnd};
use hive_net::{Envelope, SubscriptionId};
use hive_sync::PlayerState;
use hive_sync::schema::{
    self, CreateRoomRequest, JoinResult, JoinRoomRequest, PlayersSnapshot, RoomCreated,
};
use tokio::sync::mpsc;

pub const HEARTBEAT: Duration = Duration::from_secs(4);

type SessionId = usize;

struct Session {
    login: String,
    to_client: mpsc::UnboundedSender<Envelope>,
    subscriptions: HashMap<SubscriptionId, String>,
    players: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionId, Session>,
    rooms: BTreeMap<String, BTreeMap<String, PlayerState>>,
    next_room: u32,
    silent: bool,
    published: Vec<(String, String, String)>,
}

/// Handle to the running broker.
#[derive(Clone)]
pub struct Broker {
    state: Arc<Mutex<State>>,
}

impl Broker {
    /// Connector plus a broker serving every session it accepts.
    pub fn start() -> (LoopbackConnector, Broker) {
        let (connector, accepted) = LoopbackConnector::new(HEARTBEAT);
        let broker = Broker {
            state: Arc::new(Mutex::new(State::default())),
        };
        tokio::spawn(serve(broker.clone(), accepted));
        (connector, broker)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Stop answering create/join requests.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Bodies published by `login` on `destination`, in order.
    pub fn published(&self, login: &str, destination: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|(l, d, _)| l == login && d == destination)
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    /// Subscriptions currently open across all sessions.
    pub fn active_subscriptions(&self) -> usize {
        self.lock().sessions.values().map(|s| s.subscriptions.len()).sum()
    }

    /// Subscriptions open on `destination`.
    pub fn subscribers(&self, destination: &str) -> usize {
        self.lock()
            .sessions
            .values()
            .flat_map(|s| s.subscriptions.values())
            .filter(|d| *d == destination)
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Ids registered in `room_id`.
    pub fn room_players(&self, room_id: &str) -> Vec<String> {
        self.lock()
            .rooms
            .get(room_id)
            .map(|players| players.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver `body` verbatim to every subscriber of the room topic.
    pub fn broadcast_raw(&self, room_id: &str, body: &str) {
        let state = self.lock();
        deliver(&state, &schema::players_topic(room_id), body);
    }

    /// Rebroadcast the room's current table.
    pub fn broadcast(&self, room_id: &str) {
        let state = self.lock();
        broadcast_room(&state, room_id);
    }

    /// Hang up on every client, as a server restart would.
    pub fn drop_sessions(&self) {
        let mut state = self.lock();
        let ids: Vec<SessionId> = state.sessions.keys().copied().collect();
        for id in ids {
            close_session(&mut state, id);
        }
    }
}

enum Event {
    Frame(SessionId, Envelope),
    Closed(SessionId),
}

async fn serve(broker: Broker, mut accepted: mpsc::UnboundedReceiver<ServerEnd>) {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut next_session = 0;

    loop {
        tokio::select! {
            end = accepted.recv() => {
                let Some(ServerEnd { login, mut from_client, to_client }) = end else { break };
                let id = next_session;
                next_session += 1;
                broker.lock().sessions.insert(id, Session {
                    login,
                    to_client,
                    subscriptions: HashMap::new(),
                    players: Vec::new(),
                });

                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    while let Some(env) = from_client.recv().await {
                        if events_tx.send(Event::Frame(id, env)).is_err() {
                            return;
                        }
                    }
                    let _ = events_tx.send(Event::Closed(id));
                });
            }
            Some(event) = events.recv() => {
                let mut state = broker.lock();
                match event {
                    Event::Frame(id, env) => handle_frame(&mut state, id, env),
                    Event::Closed(id) => close_session(&mut state, id),
                }
            }
        }
    }
}

fn handle_frame(state: &mut State, id: SessionId, env: Envelope) {
    let Some(session) = state.sessions.get_mut(&id) else { return };
    match env {
        Envelope::Heartbeat => {
            let _ = session.to_client.send(Envelope::Heartbeat);
        }
        Envelope::Subscribe { id: sub, destination } => {
            session.subscriptions.insert(sub, destination);
        }
        Envelope::Unsubscribe { id: sub } => {
            session.subscriptions.remove(&sub);
        }
        Envelope::Disconnect => close_session(state, id),
        Envelope::Send { destination, body } => {
            let login = session.login.clone();
            state.published.push((login, destination.clone(), body.clone()));
            handle_send(state, id, &destination, &body);
        }
        _ => {}
    }
}

fn handle_send(state: &mut State, id: SessionId, destination: &str, body: &str) {
    match destination {
        schema::CREATE_ROOM => {
            if state.silent || serde_json::from_str::<CreateRoomRequest>(body).is_err() {
                return;
            }
            state.next_room += 1;
            let room_id = format!("ROOM{}", state.next_room);
            state.rooms.insert(room_id.clone(), BTreeMap::new());
            let reply = RoomCreated {
                success: true,
                room_id: Some(room_id),
            };
            reply_to(state, id, schema::ROOM_CREATED, &serde_json::to_string(&reply).unwrap());
        }
        schema::JOIN_ROOM => {
            if state.silent {
                return;
            }
            let Ok(request) = serde_json::from_str::<JoinRoomRequest>(body) else { return };
            let success = state.rooms.contains_key(&request.room_id);
            let reply = JoinResult {
                success,
                message: (!success).then(|| "Room not found".to_string()),
            };
            reply_to(state, id, schema::JOIN_RESULT, &serde_json::to_string(&reply).unwrap());
        }
        schema::REGISTER => {
            let Ok(player) = serde_json::from_str::<PlayerState>(body) else { return };
            let Some(room_id) = player.room_id.clone() else { return };
            let Some(room) = state.rooms.get_mut(&room_id) else { return };
            room.insert(player.id.clone(), player.clone());
            if let Some(session) = state.sessions.get_mut(&id) {
                session.players.push((room_id.clone(), player.id));
            }
            broadcast_room(state, &room_id);
        }
        schema::MOVE => {
            let Ok(player) = serde_json::from_str::<PlayerState>(body) else { return };
            let Some((room_id, _)) = state
                .sessions
                .get(&id)
                .and_then(|s| s.players.iter().find(|(_, p)| *p == player.id))
                .cloned()
            else {
                return;
            };
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.insert(player.id.clone(), player);
            }
            broadcast_room(state, &room_id);
        }
        _ => {}
    }
}

fn reply_to(state: &State, id: SessionId, queue: &str, body: &str) {
    let Some(session) = state.sessions.get(&id) else { return };
    for (sub, destination) in &session.subscriptions {
        if destination == queue {
            let _ = session.to_client.send(Envelope::Message {
                subscription: *sub,
                destination: queue.to_string(),
                body: body.to_string(),
            });
        }
    }
}

fn broadcast_room(state: &State, room_id: &str) {
    let Some(room) = state.rooms.get(room_id) else { return };
    let snapshot = PlayersSnapshot(room.clone());
    let body = serde_json::to_string(&snapshot).unwrap();
    deliver(state, &schema::players_topic(room_id), &body);
}

fn deliver(state: &State, topic: &str, body: &str) {
    for session in state.sessions.values() {
        for (sub, destination) in &session.subscriptions {
            if destination == topic {
                let _ = session.to_client.send(Envelope::Message {
                    subscription: *sub,
                    destination: topic.to_string(),
                    body: body.to_string(),
                });
            }
        }
    }
}

fn close_session(state: &mut State, id: SessionId) {
    let Some(session) = state.sessions.remove(&id) else { return };
    let mut touched = Vec::new();
    for (room_id, player_id) in session.players {
        if let Some(room) = state.rooms.get_mut(&room_id) {
            room.remove(&player_id);
            touched.push(room_id);
        }
    }
    touched.dedup();
    for room_id in touched {
        broadcast_room(state, &room_id);
    }
}

/// Let the broker and client tasks run until `done` holds, advancing paused
/// time in small steps.
pub async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
