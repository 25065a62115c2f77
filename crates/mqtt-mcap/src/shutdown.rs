// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative cancellation.
//!
//! A [`ShutdownToken`] is a receiver on a channel nobody ever sends on.
//! Triggering the [`ShutdownHandle`] drops the sender, which wakes every
//! blocked `recv`/`select!` on the token at once. Dropping every handle
//! cancels the token as well.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Create a linked handle/token pair.
pub fn channel() -> (ShutdownHandle, ShutdownToken) {
    let (sender, receiver) = channel::bounded(0);
    (
        ShutdownHandle {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        ShutdownToken { receiver },
    )
}

/// Requests shutdown. Cheap to clone, safe to call from a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<Mutex<Option<Sender<()>>>>,
}

impl ShutdownHandle {
    /// Cancel the linked token. Idempotent.
    pub fn trigger(&self) {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }
}

/// Observes shutdown. Passed into every blocking call.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    receiver: Receiver<()>,
}

impl ShutdownToken {
    /// Check without blocking.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block for up to `timeout`. Returns `true` as soon as shutdown is
    /// requested, `false` if the timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Receiver for use in `crossbeam::select!`. Becomes ready (with an
    /// error) once shutdown is requested.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}
