// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exclusive holder for a stream's sequence token.
//!
//! Taking the token out of the slot is what grants the right to append to the stream,
//! so the token travels with the critical section instead of sitting next to a lock.
//! The guard returned by [`TokenSlot::acquire`] is the only holder. Dropping it without
//! calling [`TokenGuard::advance`] puts back the token that was taken, which covers
//! failed, timed out and cancelled uploads alike.

use crate::event::SequenceToken;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("token slot has not been seeded")]
    Unseeded,
    #[error("token slot already seeded")]
    AlreadySeeded,
    #[error("token slot is closed")]
    Closed,
}

#[derive(Debug)]
enum SlotState {
    Unseeded,
    Ready(Option<SequenceToken>),
    Closed,
}

#[derive(Debug)]
pub struct TokenSlot {
    state: Mutex<SlotState>,
}

impl Default for TokenSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Unseeded),
        }
    }

    /// Puts the first token in the slot. `None` is a valid token for a new stream.
    pub async fn seed(&self, token: Option<SequenceToken>) -> Result<(), SlotError> {
        let mut state = self.state.lock().await;
        match *state {
            SlotState::Unseeded => {
                *state = SlotState::Ready(token);
                Ok(())
            }
            SlotState::Ready(_) => Err(SlotError::AlreadySeeded),
            SlotState::Closed => Err(SlotError::Closed),
        }
    }

    /// Waits until no one else holds the token and takes it.
    ///
    /// Cancel safe: dropping the returned future while waiting leaves the slot as it was.
    pub async fn acquire(&self) -> Result<TokenGuard<'_>, SlotError> {
        let state = self.state.lock().await;
        match *state {
            SlotState::Ready(_) => Ok(TokenGuard { state }),
            SlotState::Unseeded => Err(SlotError::Unseeded),
            SlotState::Closed => Err(SlotError::Closed),
        }
    }

    /// True while a guard is out.
    pub fn is_held(&self) -> bool {
        self.state.try_lock().is_err()
    }
}

/// Exclusive possession of the current token.
#[derive(Debug)]
pub struct TokenGuard<'a> {
    state: MutexGuard<'a, SlotState>,
}

impl TokenGuard<'_> {
    pub fn token(&self) -> Option<&SequenceToken> {
        match &*self.state {
            SlotState::Ready(token) => token.as_ref(),
            _ => None,
        }
    }

    /// Replaces the held token with the one returned by a successful append.
    pub fn advance(&mut self, next: Option<SequenceToken>) {
        *self.state = SlotState::Ready(next);
    }

    /// Empties the slot for good. Every later `acquire` fails with `Closed`.
    pub fn close(mut self) {
        *self.state = SlotState::Closed;
    }
}
