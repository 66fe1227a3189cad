//! # Raw Binary Audio Socket
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: client connects to `/ws/audio/{client_id}` (or `/ws/audio` to get
//!    a generated id)
//! 2. **Greeting**: server sends `{"event":"connected", ...}` with the expected audio format
//! 3. **Audio Streaming**: client sends binary PCM16 frames; server sends agent audio
//!    back as binary frames
//! 4. **Turn marks**: after each agent turn the server sends
//!    `{"event":"mark","name":"end_of_turn"}`
//! 5. **Hang up**: client sends the text `end_session` or closes the socket

use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::call::CallSession;
use crate::websocket::{start_heartbeat, ActorTransport, Heartbeat, Outbound};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Name of the mark sent after each agent turn.
pub const END_OF_TURN_MARK: &str = "end_of_turn";

/// Text message a client sends to hang up.
pub const END_SESSION_COMMAND: &str = "end_session";

/// Audio format announced to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,

    /// Samples per classification frame
    pub frame_size: usize,
}

/// Control messages sent as text frames.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        connection_id: String,
        config: StreamFormat,
    },
    Mark {
        name: String,
    },
}

/// Actor for one raw-binary call.
pub struct RawAudioSocket {
    connection_id: String,
    state: AppState,
    session: Option<CallSession>,
    last_heartbeat: Instant,
}

impl RawAudioSocket {
    pub fn new(connection_id: String, state: AppState) -> Self {
        Self {
            connection_id,
            state,
            session: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to encode server event: {}", e),
        }
    }

    fn hang_up(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

impl Heartbeat for RawAudioSocket {
    fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }
}

impl Actor for RawAudioSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let config = self.state.get_config();
        start_heartbeat(ctx, config.heartbeat_interval(), config.client_timeout());

        let transport = Arc::new(ActorTransport::new(ctx.address().recipient()));
        match CallSession::start(&self.connection_id, transport, &self.state) {
            Ok(session) => {
                info!(connection_id = %self.connection_id, "Raw audio socket connected");
                Self::send_event(
                    ctx,
                    &ServerEvent::Connected {
                        connection_id: self.connection_id.clone(),
                        config: StreamFormat {
                            sample_rate: config.audio.sample_rate,
                            channels: config.audio.channels,
                            frame_size: config.frame_bytes() / crate::audio::pcm::BYTES_PER_SAMPLE,
                        },
                    },
                );
                self.session = Some(session);
            }
            Err(e) => {
                error!(connection_id = %self.connection_id, "Failed to start call: {}", e);
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(e),
                }));
                ctx.stop();
            }
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        info!(connection_id = %self.connection_id, "Raw audio socket stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RawAudioSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                let detached = match self.session.as_mut() {
                    Some(session) => session.on_audio(&data).is_none() && session.is_detached(),
                    None => false,
                };
                if detached {
                    warn!(connection_id = %self.connection_id, "Call was taken over, hanging up");
                    self.hang_up(ctx);
                }
            }
            Ok(ws::Message::Text(text)) => {
                if text.trim() == END_SESSION_COMMAND {
                    info!(connection_id = %self.connection_id, "Client ended the session");
                    self.hang_up(ctx);
                } else {
                    debug!(connection_id = %self.connection_id, "Ignoring text message: {}", text);
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for RawAudioSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Audio(bytes) => ctx.binary(bytes),
            Outbound::EndOfTurn => Self::send_event(
                ctx,
                &ServerEvent::Mark {
                    name: END_OF_TURN_MARK.to_string(),
                },
            ),
            Outbound::Close => self.hang_up(ctx),
        }
    }
}

/// `GET /ws/audio/{client_id}`
pub async fn raw_audio_socket(
    req: HttpRequest,
    stream: web::Payload,
    client_id: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    start_socket(client_id.into_inner(), req, stream, app_state)
}

/// `GET /ws/audio`, with a generated client id.
pub async fn raw_audio_socket_anonymous(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    start_socket(uuid::Uuid::new_v4().to_string(), req, stream, app_state)
}

fn start_socket(
    client_id: String,
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    info!(
        connection_id = %client_id,
        "New audio socket request from: {:?}",
        req.connection_info().peer_addr()
    );

    if !app_state.has_capacity() {
        app_state.record_call_rejected();
        let limit = app_state.get_config().connections.max_concurrent_connections;
        warn!(connection_id = %client_id, "Rejecting connection, at capacity");
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum concurrent connections ({}) reached",
            limit
        ))
        .into());
    }

    ws::start(
        RawAudioSocket::new(client_id, app_state.get_ref().clone()),
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_event_shape() {
        let event = ServerEvent::Connected {
            connection_id: "abc".to_string(),
            config: StreamFormat {
                sample_rate: 16000,
                channels: 1,
                frame_size: 480,
            },
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connected");
        assert_eq!(json["connection_id"], "abc");
        assert_eq!(json["config"]["sample_rate"], 16000);
        assert_eq!(json["config"]["frame_size"], 480);
    }

    #[test]
    fn test_end_of_turn_mark_shape() {
        let event = ServerEvent::Mark {
            name: END_OF_TURN_MARK.to_string(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"mark","name":"end_of_turn"}"#
        );
    }
}
