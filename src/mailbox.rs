//! Correlation mailbox matching server responses to waiting callers.
//!
//! A caller reserves an id, sends a command carrying that id, then blocks
//! in [`Mailbox::get`] until the receive thread posts the response under
//! the same id. [`Mailbox::clear`] releases every waiter during teardown.

use crate::counter::IdCounter;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;

struct Inner<T> {
    messages: HashMap<u32, T>,
    running: bool,
}

pub struct Mailbox<T> {
    counter: IdCounter,
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Mailbox {
            counter: IdCounter::new(),
            inner: Mutex::new(Inner {
                messages: HashMap::new(),
                running: true,
            }),
            ready: Condvar::new(),
        }
    }

    /// Reserves a fresh correlation id without posting anything.
    pub fn reserve(&self) -> u32 {
        self.counter.next_id()
    }

    /// Posts `message` under `id` (0 means assign a fresh id) and wakes
    /// waiters. Returns the id used, or 0 if the mailbox is shut down.
    pub fn add(&self, message: T, id: u32) -> u32 {
        let id = if id == 0 { self.counter.next_id() } else { id };
        let mut inner = self.inner.lock();
        if !inner.running {
            return 0;
        }
        inner.messages.insert(id, message);
        drop(inner);
        self.ready.notify_all();
        id
    }

    /// Takes the message posted under `id`. With `wait` set, blocks until
    /// the message arrives or the mailbox shuts down; otherwise returns
    /// whatever is present right now.
    pub fn get(&self, id: u32, wait: bool) -> Option<T> {
        let mut inner = self.inner.lock();
        if !wait {
            return inner.messages.remove(&id);
        }
        loop {
            if !inner.running {
                return None;
            }
            if let Some(message) = inner.messages.remove(&id) {
                return Some(message);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Drops all pending messages and releases every waiter. Posts after
    /// this point are ignored until [`Mailbox::resume`].
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.messages.clear();
        inner.running = false;
        drop(inner);
        self.ready.notify_all();
    }

    /// Re-opens the mailbox after a [`Mailbox::clear`].
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.messages.clear();
        inner.running = true;
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
