//! Transport seam.
//!
//! The overlay never opens sockets itself. It asks a [`Transport`] for a
//! [`Link`] the first time a slot is used and keeps that link in the slot.
//! Dropping the last reference to a link closes it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::Message;
use crate::peer::Locator;

/// An open, one-directional message channel to a remote node.
#[async_trait]
pub trait Link: Send + Sync + fmt::Debug {
    /// Address of the remote end.
    fn remote(&self) -> &Locator;

    /// Send a message. Fails if the remote end is gone.
    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

/// Factory for links.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a link to `locator`.
    async fn connect(&self, locator: &Locator) -> Result<Arc<dyn Link>, TransportError>;

    /// Send a single message over a link that is not kept.
    async fn send_once(&self, locator: &Locator, message: &Message) -> Result<(), TransportError> {
        let link = self.connect(locator).await?;
        link.send(message).await
    }
}
