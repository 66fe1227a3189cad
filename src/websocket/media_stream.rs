//! # Media Stream Socket
//!
//! JSON-enveloped audio, in the shape telephony media streams use. Every message is
//! a text frame:
//!
//! ```json
//! {"event": "media", "streamSid": "MZ...", "media": {"track": "inbound", "payload": "<base64>"}}
//! ```
//!
//! The flat form `{"event": "media", "track": "inbound", "payload": "<base64>"}` is
//! accepted as well.
//!
//! ## Events:
//! - **start**: carries the stream id used on outbound messages
//! - **media**: inbound caller audio (outbound-track echoes are ignored)
//! - **mark**: only `end_of_turn` (playback acknowledgement) and `end_stream` mean anything
//! - **stop** / **close**: the caller is done talking; buffered audio is answered and
//!   the call ends when the socket closes

use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::call::CallSession;
use crate::websocket::{start_heartbeat, ActorTransport, Heartbeat, Outbound};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Mark acknowledging that the agent's turn finished playing.
pub const END_OF_TURN_MARK: &str = "end_of_turn";

/// Mark asking the server to treat buffered audio as a complete utterance.
pub const END_STREAM_MARK: &str = "end_stream";

#[derive(Debug, Default, Deserialize)]
struct MediaBody {
    track: Option<String>,
    payload: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MarkBody {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StartBody {
    #[serde(rename = "streamSid")]
    stream_sid: Option<String>,
}

/// Wire form of an inbound envelope, flat and nested fields side by side.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(rename = "streamSid")]
    stream_sid: Option<String>,
    track: Option<String>,
    payload: Option<String>,
    name: Option<String>,
    media: Option<MediaBody>,
    mark: Option<MarkBody>,
    start: Option<StartBody>,
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Connected,
    Start { stream_sid: Option<String> },
    Media { track: Option<String>, payload: String },
    Mark { name: Option<String> },
    Stop,
    Close,
    Other(String),
}

impl MediaEvent {
    /// Parse one text frame. Fields may be flat or nested under the event name.
    pub fn parse(text: &str) -> Result<(Self, Option<String>), serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let media = envelope.media.unwrap_or_default();

        let event = match envelope.event.as_str() {
            "connected" => MediaEvent::Connected,
            "start" => MediaEvent::Start {
                stream_sid: envelope
                    .start
                    .and_then(|start| start.stream_sid)
                    .or_else(|| envelope.stream_sid.clone()),
            },
            "media" => MediaEvent::Media {
                track: media.track.or(envelope.track),
                payload: media.payload.or(envelope.payload).unwrap_or_default(),
            },
            "mark" => MediaEvent::Mark {
                name: envelope.mark.and_then(|mark| mark.name).or(envelope.name),
            },
            "stop" => MediaEvent::Stop,
            "close" => MediaEvent::Close,
            other => MediaEvent::Other(other.to_string()),
        };
        Ok((event, envelope.stream_sid))
    }
}

/// What the socket should do with an inbound event.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundAction {
    Audio(Vec<u8>),
    EndOfStream,
    Ignore,
}

/// Decide what an event means for the call.
pub fn interpret(event: &MediaEvent) -> InboundAction {
    match event {
        MediaEvent::Media { track, payload } => {
            if !matches!(track.as_deref(), None | Some("inbound")) {
                return InboundAction::Ignore;
            }
            match STANDARD.decode(payload) {
                Ok(audio) if !audio.is_empty() => InboundAction::Audio(audio),
                Ok(_) => InboundAction::Ignore,
                Err(e) => {
                    warn!("Dropping undecodable media payload: {}", e);
                    InboundAction::Ignore
                }
            }
        }
        MediaEvent::Mark { name } => match name.as_deref() {
            Some(END_STREAM_MARK) => InboundAction::EndOfStream,
            Some(END_OF_TURN_MARK) => {
                debug!("Client finished playing the agent's turn");
                InboundAction::Ignore
            }
            _ => InboundAction::Ignore,
        },
        MediaEvent::Stop | MediaEvent::Close => InboundAction::EndOfStream,
        MediaEvent::Connected | MediaEvent::Start { .. } | MediaEvent::Other(_) => {
            InboundAction::Ignore
        }
    }
}

#[derive(Debug, Serialize)]
struct OutboundMedia<'a> {
    payload: &'a str,
}

#[derive(Debug, Serialize)]
struct OutboundMark<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundEnvelope<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia<'a>,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: OutboundMark<'a>,
    },
}

/// Encode agent audio as a media envelope.
pub fn encode_media(stream_sid: &str, audio: &[u8]) -> Result<String, serde_json::Error> {
    let payload = STANDARD.encode(audio);
    serde_json::to_string(&OutboundEnvelope::Media {
        stream_sid,
        media: OutboundMedia { payload: &payload },
    })
}

/// Encode a named mark envelope.
pub fn encode_mark(stream_sid: &str, name: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundEnvelope::Mark {
        stream_sid,
        mark: OutboundMark { name },
    })
}

/// Actor for one media-stream call.
pub struct MediaStreamSocket {
    call_sid: String,
    stream_sid: String,
    state: AppState,
    session: Option<CallSession>,
    last_heartbeat: Instant,
}

impl MediaStreamSocket {
    pub fn new(call_sid: String, state: AppState) -> Self {
        Self {
            stream_sid: call_sid.clone(),
            call_sid,
            state,
            session: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_json(ctx: &mut ws::WebsocketContext<Self>, encoded: Result<String, serde_json::Error>) {
        match encoded {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to encode media envelope: {}", e),
        }
    }

    fn handle_text(&mut self, text: &str) {
        let (event, stream_sid) = match MediaEvent::parse(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(connection_id = %self.call_sid, "Invalid media envelope: {}", e);
                return;
            }
        };

        if let MediaEvent::Start { stream_sid: Some(sid) } = &event {
            info!(connection_id = %self.call_sid, stream_sid = %sid, "Media stream started");
            self.stream_sid = sid.clone();
        } else if let Some(sid) = stream_sid {
            self.stream_sid = sid;
        }

        match interpret(&event) {
            InboundAction::Audio(audio) => {
                if let Some(session) = self.session.as_mut() {
                    session.on_audio(&audio);
                }
            }
            InboundAction::EndOfStream => {
                debug!(connection_id = %self.call_sid, "End of caller audio");
                if let Some(session) = self.session.as_mut() {
                    session.end_of_stream();
                }
            }
            InboundAction::Ignore => {}
        }
    }
}

impl Heartbeat for MediaStreamSocket {
    fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let config = self.state.get_config();
        start_heartbeat(ctx, config.heartbeat_interval(), config.client_timeout());

        let transport = Arc::new(ActorTransport::new(ctx.address().recipient()));
        match CallSession::start(&self.call_sid, transport, &self.state) {
            Ok(session) => {
                info!(connection_id = %self.call_sid, "Media stream socket connected");
                self.session = Some(session);
            }
            Err(e) => {
                error!(connection_id = %self.call_sid, "Failed to start call: {}", e);
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
        info!(connection_id = %self.call_sid, "Media stream socket stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_text(&text);
                if self.session.as_ref().is_some_and(CallSession::is_detached) {
                    warn!(connection_id = %self.call_sid, "Call was taken over, closing the stream");
                    if let Some(session) = self.session.as_mut() {
                        session.close();
                    }
                    ctx.close(Some(ws::CloseCode::Normal.into()));
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(connection_id = %self.call_sid, "Binary frames are not part of the media stream protocol");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.call_sid, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.call_sid, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Audio(bytes) => Self::send_json(ctx, encode_media(&self.stream_sid, &bytes)),
            Outbound::EndOfTurn => {
                Self::send_json(ctx, encode_mark(&self.stream_sid, END_OF_TURN_MARK))
            }
            Outbound::Close => {
                if let Some(session) = self.session.as_mut() {
                    session.close();
                }
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
        }
    }
}

/// `GET /streams/{call_sid}`
pub async fn media_stream_socket(
    req: HttpRequest,
    stream: web::Payload,
    call_sid: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let call_sid = call_sid.into_inner();
    info!(connection_id = %call_sid, "New media stream request");

    if !app_state.has_capacity() {
        app_state.record_call_rejected();
        warn!(connection_id = %call_sid, "Rejecting media stream, at capacity");
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum concurrent connections ({}) reached",
            app_state.get_config().connections.max_concurrent_connections
        ))
        .into());
    }

    ws::start(
        MediaStreamSocket::new(call_sid, app_state.get_ref().clone()),
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_media() {
        let text = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","payload":"AAEC"}}"#;
        let (event, sid) = MediaEvent::parse(text).unwrap();
        assert_eq!(sid.as_deref(), Some("MZ1"));
        assert_eq!(interpret(&event), InboundAction::Audio(vec![0, 1, 2]));
    }

    #[test]
    fn test_parse_flat_media_without_track() {
        let text = r#"{"event":"media","payload":"AAEC"}"#;
        let (event, _) = MediaEvent::parse(text).unwrap();
        assert_eq!(
            event,
            MediaEvent::Media {
                track: None,
                payload: "AAEC".to_string()
            }
        );
        assert_eq!(interpret(&event), InboundAction::Audio(vec![0, 1, 2]));
    }

    #[test]
    fn test_outbound_track_and_bad_payload_are_ignored() {
        let (event, _) =
            MediaEvent::parse(r#"{"event":"media","track":"outbound","payload":"AAEC"}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::Ignore);

        let (event, _) = MediaEvent::parse(r#"{"event":"media","payload":"not base64!"}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::Ignore);

        let (event, _) = MediaEvent::parse(r#"{"event":"media"}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::Ignore);
    }

    #[test]
    fn test_marks() {
        let (event, _) =
            MediaEvent::parse(r#"{"event":"mark","mark":{"name":"end_stream"}}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::EndOfStream);

        let (event, _) = MediaEvent::parse(r#"{"event":"mark","name":"end_stream"}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::EndOfStream);

        let (event, _) =
            MediaEvent::parse(r#"{"event":"mark","mark":{"name":"end_of_turn"}}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::Ignore);

        let (event, _) = MediaEvent::parse(r#"{"event":"mark","mark":{"name":"chapter"}}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::Ignore);
    }

    #[test]
    fn test_stop_and_start() {
        let (event, _) = MediaEvent::parse(r#"{"event":"stop","streamSid":"MZ1"}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::EndOfStream);

        let (event, _) = MediaEvent::parse(r#"{"event":"close"}"#).unwrap();
        assert_eq!(interpret(&event), InboundAction::EndOfStream);

        let (event, _) =
            MediaEvent::parse(r#"{"event":"start","start":{"streamSid":"MZ9"}}"#).unwrap();
        assert_eq!(
            event,
            MediaEvent::Start {
                stream_sid: Some("MZ9".to_string())
            }
        );
        assert_eq!(interpret(&event), InboundAction::Ignore);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(MediaEvent::parse("not json").is_err());
        assert!(MediaEvent::parse(r#"{"payload":"AAEC"}"#).is_err());
    }

    #[test]
    fn test_outbound_envelopes() {
        let media: serde_json::Value =
            serde_json::from_str(&encode_media("MZ1", &[0, 1, 2]).unwrap()).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ1");
        assert_eq!(media["media"]["payload"], "AAEC");

        let mark: serde_json::Value =
            serde_json::from_str(&encode_mark("MZ1", END_OF_TURN_MARK).unwrap()).unwrap();
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["mark"]["name"], "end_of_turn");
    }
}
