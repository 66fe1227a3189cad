//! # WebSocket Transports
//!
//! Two protocol bindings for the same call core:
//!
//! - **Raw binary** (`/ws/audio/{client_id}`): binary frames are PCM16 audio in both
//!   directions; control messages are small JSON texts.
//! - **Media stream** (`/streams/{call_sid}`): every message is a JSON envelope with
//!   base64 audio, as sent by telephony media-stream providers.
//!
//! Each connection is an actix actor. The actor owns the handshake and the wire
//! format; everything else goes through its [`CallSession`](call::CallSession).

pub mod call;
pub mod media_stream;
pub mod raw;

use crate::connection::{AudioTransport, TransportError};
use actix::prelude::*;
use actix_web_actors::ws;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::warn;

/// Messages the call core sends to a socket actor.
///
/// Sent with `Recipient::send`, which waits until the actor has handled the message,
/// so writes reach the socket in the order they were sent.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
#[rtype(result = "()")]
pub enum Outbound {
    Audio(Vec<u8>),
    EndOfTurn,
    Close,
}

/// [`AudioTransport`] that forwards writes to a socket actor's mailbox.
///
/// ## Rust Concepts:
/// - **Recipient<Outbound>**: An address that only accepts [`Outbound`], so the
///   transport does not depend on which socket actor is behind it
/// - **MailboxError::Closed**: The actor has stopped, reported as
///   [`TransportError::Disconnected`]
pub struct ActorTransport {
    recipient: Recipient<Outbound>,
}

impl ActorTransport {
    pub fn new(recipient: Recipient<Outbound>) -> Self {
        Self { recipient }
    }

    async fn deliver(&self, message: Outbound) -> Result<(), TransportError> {
        self.recipient.send(message).await.map_err(|e| match e {
            MailboxError::Closed => TransportError::Disconnected,
            MailboxError::Timeout => TransportError::Send("socket mailbox timed out".to_string()),
        })
    }
}

#[async_trait]
impl AudioTransport for ActorTransport {
    async fn send_audio(&self, audio: Vec<u8>) -> Result<(), TransportError> {
        self.deliver(Outbound::Audio(audio)).await
    }

    async fn send_end_of_turn(&self) -> Result<(), TransportError> {
        self.deliver(Outbound::EndOfTurn).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.deliver(Outbound::Close).await
    }
}

/// Socket actors that track client liveness.
pub trait Heartbeat {
    fn last_heartbeat(&self) -> Instant;
}

/// Ping the client every `interval`; stop the actor once nothing has been heard
/// from it for `timeout`.
pub fn start_heartbeat<A>(ctx: &mut ws::WebsocketContext<A>, interval: Duration, timeout: Duration)
where
    A: Actor<Context = ws::WebsocketContext<A>> + Heartbeat,
{
    ctx.run_interval(interval, move |act, ctx| {
        if Instant::now().duration_since(act.last_heartbeat()) > timeout {
            warn!("WebSocket heartbeat timeout, closing connection");
            ctx.stop();
        } else {
            ctx.ping(b"");
        }
    });
}
