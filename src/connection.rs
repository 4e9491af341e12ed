//! Ownership of the single "current" connection for a provisioning run.

use thiserror::Error;

use crate::driver::MachineConnection;

/// Raised when an operation needs a connection but none is held.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("no connection is currently held")]
pub struct EmptySlot;

/// Holds at most one open connection.
///
/// A held connection must be released before another is installed, so a
/// provisioning run never keeps two connections to the same machine open.
#[derive(Debug)]
pub struct ConnectionSlot<C> {
    current: Option<C>,
}

impl<C: MachineConnection> ConnectionSlot<C> {
    /// Creates a slot holding `connection`.
    #[must_use]
    pub const fn new(connection: C) -> Self {
        Self {
            current: Some(connection),
        }
    }

    /// Returns `true` while a connection is held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.current.is_some()
    }

    /// Borrows the held connection.
    ///
    /// # Errors
    ///
    /// Returns [`EmptySlot`] when nothing is held.
    pub const fn get(&self) -> Result<&C, EmptySlot> {
        match self.current.as_ref() {
            Some(connection) => Ok(connection),
            None => Err(EmptySlot),
        }
    }

    /// Closes the held connection. Releasing an empty slot is a no-op.
    ///
    /// The slot is empty afterwards even when closing fails.
    ///
    /// # Errors
    ///
    /// Propagates the transport error raised while closing.
    pub async fn release(&mut self) -> Result<(), C::Error> {
        match self.current.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    /// Installs a freshly opened connection into an empty slot.
    ///
    /// # Errors
    ///
    /// Hands `connection` back when the slot still holds one; callers must
    /// [`release`](Self::release) first.
    pub fn install(&mut self, connection: C) -> Result<(), C> {
        if self.current.is_some() {
            return Err(connection);
        }
        self.current = Some(connection);
        Ok(())
    }

    /// Consumes the slot, yielding the held connection.
    ///
    /// # Errors
    ///
    /// Returns [`EmptySlot`] when nothing is held.
    pub fn into_connection(self) -> Result<C, EmptySlot> {
        self.current.ok_or(EmptySlot)
    }
}
