//! Bounded queue of input and gameplay events for scripts.
//!
//! Producers hold an [`EventSender`], which is `Send` and cheap to clone, so
//! input polling can post from any thread. The script bridge drains the queue
//! at the start of every tick and passes each event to the Lua global
//! `on_event(kind, data1, data2)` in arrival order.
//!
//! When the queue is full new events are dropped with a warning.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptEventKind {
    KeyPress,
    KeyHold,
    KeyRelease,
    MouseClick,
    Collision,
}

impl ScriptEventKind {
    /// Name passed to `on_event`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptEventKind::KeyPress => "key_press",
            ScriptEventKind::KeyHold => "key_hold",
            ScriptEventKind::KeyRelease => "key_release",
            ScriptEventKind::MouseClick => "mouse_click",
            ScriptEventKind::Collision => "collision",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptEvent {
    pub kind: ScriptEventKind,
    pub data1: u64,
    pub data2: u64,
}

impl ScriptEvent {
    pub fn new(kind: ScriptEventKind, data1: u64, data2: u64) -> Self {
        Self { kind, data1, data2 }
    }
}

/// Posting side of the queue.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<ScriptEvent>,
}

impl EventSender {
    /// Queue `event`. Returns `false` if it was dropped.
    pub fn send(&self, event: ScriptEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(target: "lua", "script event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub struct EventQueue {
    tx: Sender<ScriptEvent>,
    rx: Receiver<ScriptEvent>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every event queued so far.
    pub fn drain(&self) -> Vec<ScriptEvent> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
