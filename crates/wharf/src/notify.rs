use std::sync::{Arc, Mutex};

use mio::{Token, Waker};
use tracing::{event, Level};

/// Sessions woken from other threads, drained by the reactor.
pub struct NotifyQueue {
    pending: Mutex<Vec<Token>>,
    waker: Option<Waker>,
}

impl NotifyQueue {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            waker: Some(waker),
        }
    }

    /// A queue nothing polls, notifications just accumulate until taken.
    pub fn detached() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            waker: None,
        }
    }

    pub(crate) fn wake(&self) {
        if let Some(waker) = &self.waker {
            if let Err(error) = waker.wake() {
                event!(Level::WARN, ?error, "failed to wake reactor");
            }
        }
    }

    /// Take all tokens notified since the last call, without duplicates.
    pub fn take_pending(&self) -> Vec<Token> {
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut tokens = std::mem::take(&mut *pending);
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }

    fn push(&self, token: Token) {
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.push(token);
    }
}

/// Handle for waking one session from any thread.
///
/// Notifying a session that already closed is a no-op.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<NotifyQueue>,
    token: Token,
}

impl Notifier {
    pub fn new(queue: Arc<NotifyQueue>, token: Token) -> Self {
        Self { queue, token }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Ask the reactor to call the session's handler back on its own thread.
    pub fn notify(&self) {
        self.queue.push(self.token);
        self.queue.wake();
    }
}
