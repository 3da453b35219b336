//! Room and user tracking.
//!
//! A reducer over the inbound frame stream. Every update runs under one
//! exclusive lock and validates the frame shape before touching anything, so a
//! malformed frame never leaves the maps half updated.
//!
//! Invariant: `nick ∈ rooms[r].members` iff `r ∈ users[nick].rooms`. Users
//! left in no room are forgotten.

use parking_lot::RwLock;
use serde::Serialize;
use sitbot_proto::{ChannelExt, Command, Message, Prefix, Response};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::stage::Stage;

/// Membership mode markers, in rank order.
pub const MODE_MARKERS: [char; 7] = ['~', '@', '+', '=', '!', '&', '%'];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Room {
    pub name: String,
    pub topic: String,
    /// Whether we are in the room ourselves.
    pub joined: bool,
    /// Member nick to mode markers.
    pub members: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct User {
    pub nick: String,
    pub rooms: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    me: String,
    rooms: BTreeMap<String, Room>,
    users: BTreeMap<String, User>,
}

/// Split a NAMES entry into its leading mode markers and the nick.
pub fn split_mode(entry: &str) -> (&str, &str) {
    let nick = entry.trim_start_matches(MODE_MARKERS);
    (&entry[..entry.len() - nick.len()], nick)
}

pub struct StateTracker {
    inner: RwLock<Inner>,
}

impl StateTracker {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                me: nick.into(),
                ..Default::default()
            }),
        }
    }

    /// Our own current nick.
    pub fn nick(&self) -> String {
        self.inner.read().me.clone()
    }

    /// All known rooms, in name order.
    pub fn rooms(&self) -> Vec<Room> {
        self.inner.read().rooms.values().cloned().collect()
    }

    /// Names of rooms we are in, in name order.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.inner
            .read()
            .rooms
            .values()
            .filter(|r| r.joined)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn room(&self, name: &str) -> Option<Room> {
        self.inner.read().rooms.get(name).cloned()
    }

    pub fn user(&self, nick: &str) -> Option<User> {
        self.inner.read().users.get(nick).cloned()
    }

    /// Apply one frame.
    pub fn apply(&self, msg: &Message) {
        let sender = msg.prefix.as_ref().map(Prefix::name);
        match &msg.command {
            Command::JOIN => match (sender, msg.param(0)) {
                (Some(nick), Some(room)) => self.inner.write().join(nick, room),
                _ => malformed(msg),
            },
            Command::PART => match (sender, msg.param(0)) {
                (Some(nick), Some(room)) => self.inner.write().leave(nick, room),
                _ => malformed(msg),
            },
            Command::KICK => match (msg.param(0), msg.param(1)) {
                (Some(room), Some(victim)) => self.inner.write().leave(victim, room),
                _ => malformed(msg),
            },
            Command::QUIT => match sender {
                Some(nick) => self.inner.write().quit(nick),
                None => malformed(msg),
            },
            Command::NICK => match (sender, msg.param(0)) {
                (Some(old), Some(new)) if !new.is_empty() => self.inner.write().rename(old, new),
                _ => malformed(msg),
            },
            Command::TOPIC => match (msg.param(0), msg.param(1)) {
                (Some(room), Some(topic)) => self.inner.write().set_topic(room, topic),
                (Some(_), None) => {}
                _ => malformed(msg),
            },
            Command::Response(Response::RPL_TOPIC) => match (msg.param(1), msg.param(2)) {
                (Some(room), Some(topic)) => self.inner.write().set_topic(room, topic),
                _ => malformed(msg),
            },
            Command::Response(Response::RPL_NAMREPLY) => match (msg.param(2), msg.param(3)) {
                (Some(room), Some(_)) if !room.is_channel_name() => {
                    warn!(room, "names reply for a non-room target ignored");
                }
                (Some(room), Some(names)) => self.inner.write().names(room, names),
                _ => malformed(msg),
            },
            _ => {}
        }
    }
}

fn malformed(msg: &Message) {
    warn!(frame = %msg.to_string().trim_end(), "malformed frame ignored by state tracker");
}

impl Inner {
    fn room_mut(&mut self, name: &str) -> &mut Room {
        self.rooms.entry(name.to_string()).or_insert_with(|| Room {
            name: name.to_string(),
            ..Default::default()
        })
    }

    fn add_member(&mut self, room: &str, nick: &str, mode: &str) {
        if nick.is_empty() {
            return;
        }
        self.room_mut(room)
            .members
            .insert(nick.to_string(), mode.to_string());
        self.users
            .entry(nick.to_string())
            .or_insert_with(|| User {
                nick: nick.to_string(),
                rooms: BTreeSet::new(),
            })
            .rooms
            .insert(room.to_string());
    }

    fn forget_membership(&mut self, nick: &str, room: &str) {
        if let Some(user) = self.users.get_mut(nick) {
            user.rooms.remove(room);
            if user.rooms.is_empty() {
                self.users.remove(nick);
            }
        }
    }

    fn join(&mut self, nick: &str, room: &str) {
        if nick == self.me {
            self.room_mut(room).joined = true;
        }
        self.add_member(room, nick, "");
    }

    fn leave(&mut self, nick: &str, room: &str) {
        if nick == self.me {
            if let Some(gone) = self.rooms.remove(room) {
                for member in gone.members.keys() {
                    self.forget_membership(member, room);
                }
            }
            return;
        }
        if let Some(r) = self.rooms.get_mut(room) {
            r.members.remove(nick);
        }
        self.forget_membership(nick, room);
    }

    fn quit(&mut self, nick: &str) {
        if let Some(user) = self.users.remove(nick) {
            for room in &user.rooms {
                if let Some(r) = self.rooms.get_mut(room) {
                    r.members.remove(nick);
                }
            }
        }
    }

    fn rename(&mut self, old: &str, new: &str) {
        if old == self.me {
            self.me = new.to_string();
        }
        let Some(mut user) = self.users.remove(old) else {
            return;
        };
        for room in &user.rooms {
            if let Some(r) = self.rooms.get_mut(room)
                && let Some(mode) = r.members.remove(old)
            {
                r.members.insert(new.to_string(), mode);
            }
        }
        user.nick = new.to_string();
        if let Some(existing) = self.users.remove(new) {
            user.rooms.extend(existing.rooms);
        }
        self.users.insert(new.to_string(), user);
    }

    fn set_topic(&mut self, room: &str, topic: &str) {
        self.room_mut(room).topic = topic.to_string();
    }

    fn names(&mut self, room: &str, names: &str) {
        for entry in names.split_whitespace() {
            let (mode, nick) = split_mode(entry);
            self.add_member(room, nick, mode);
        }
    }
}

impl Stage for StateTracker {
    fn name(&self) -> &'static str {
        "state"
    }

    fn process(&self, msg: &Message) {
        self.apply(msg);
    }
}
