// WAMP session
// Per-connection state machine; frames come in through handle_text and replies leave on the outgoing sender

use super::message::{self, Dict, Message};
use super::router::{Router, SessionId};
use crate::component::{CallResult, Invocation};
use crate::error::uri;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Establishing,
    Open,
    Closed,
}

/// What the transport should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Session {
    router: Arc<Router>,
    outgoing: mpsc::UnboundedSender<Message>,
    id: Option<SessionId>,
    state: SessionState,
}

impl Session {
    pub fn new(router: Arc<Router>, outgoing: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            router,
            outgoing,
            id: None,
            state: SessionState::Establishing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    fn send(&self, message: Message) {
        let _ = self.outgoing.send(message);
    }

    fn abort(&mut self, reason: &str, text: impl Into<String>) -> Flow {
        let text = text.into();
        warn!("Aborting session {:?}: {} ({})", self.id, reason, text);
        self.send(Message::abort(reason, text));
        self.close();
        Flow::Close
    }

    /// Decode and handle one text frame
    pub fn handle_text(&mut self, text: &str) -> Flow {
        match Message::from_json(text) {
            Ok(message) => self.handle(message),
            Err(e) => self.abort(uri::PROTOCOL_VIOLATION, e.to_string()),
        }
    }

    pub fn handle(&mut self, message: Message) -> Flow {
        match self.state {
            SessionState::Establishing => self.establish(message),
            SessionState::Open => self.handle_open(message),
            SessionState::Closed => Flow::Close,
        }
    }

    fn establish(&mut self, message: Message) -> Flow {
        match message {
            Message::Hello { realm, .. } if realm == self.router.realm() => {
                let id = self.router.attach(self.outgoing.clone());
                self.id = Some(id);
                self.state = SessionState::Open;

                let mut details = Dict::new();
                details.insert("authrole".into(), json!("anonymous"));
                details.insert("roles".into(), json!({ "dealer": {} }));
                self.send(Message::Welcome {
                    session: id,
                    details,
                });
                Flow::Continue
            }
            Message::Hello { realm, .. } => {
                self.abort(uri::NO_SUCH_REALM, format!("no realm named '{}'", realm))
            }
            other => self.abort(
                uri::PROTOCOL_VIOLATION,
                format!("expected HELLO, got message type {}", other.code()),
            ),
        }
    }

    fn handle_open(&mut self, message: Message) -> Flow {
        let Some(session) = self.id else {
            return self.abort(uri::PROTOCOL_VIOLATION, "session has no id");
        };

        match message {
            Message::Goodbye { reason, .. } => {
                debug!("Session {} said goodbye: {}", session, reason);
                // A reply to our own GOODBYE completes the handshake
                if !self.router.is_closing(session) {
                    self.send(Message::goodbye(uri::GOODBYE_AND_OUT));
                }
                self.close();
                Flow::Close
            }
            Message::Abort { reason, .. } => {
                debug!("Session {} aborted: {}", session, reason);
                self.close();
                Flow::Close
            }
            Message::Register {
                request, procedure, ..
            } => {
                let reply = match self.router.register_remote(session, &procedure) {
                    Ok(registration) => Message::Registered {
                        request,
                        registration,
                    },
                    Err(e) => Message::error(message::REGISTER, request, &e),
                };
                self.send(reply);
                Flow::Continue
            }
            Message::Unregister {
                request,
                registration,
            } => {
                let reply = match self.router.unregister(Some(session), registration) {
                    Ok(()) => Message::Unregistered { request },
                    Err(e) => Message::error(message::UNREGISTER, request, &e),
                };
                self.send(reply);
                Flow::Continue
            }
            Message::Call {
                request,
                procedure,
                args,
                kwargs,
                ..
            } => {
                // Calls run on their own task so YIELDs from this session keep flowing
                let router = self.router.clone();
                let outgoing = self.outgoing.clone();
                tokio::spawn(async move {
                    let reply = match router.call(&procedure, Invocation::new(args, kwargs)).await {
                        Ok(result) => Message::Result {
                            request,
                            details: Dict::new(),
                            args: result.args,
                            kwargs: result.kwargs,
                        },
                        Err(e) => {
                            debug!("Call {} to {} failed: {}", request, procedure, e);
                            Message::error(message::CALL, request, &e)
                        }
                    };
                    let _ = outgoing.send(reply);
                });
                Flow::Continue
            }
            Message::Yield {
                request,
                args,
                kwargs,
                ..
            } => {
                self.router.yield_result(
                    session,
                    request,
                    CallResult { args, kwargs },
                );
                Flow::Continue
            }
            Message::Error {
                request_type: message::INVOCATION,
                request,
                error,
                args,
                ..
            } => {
                self.router.yield_error(session, request, error, &args);
                Flow::Continue
            }
            Message::Hello { .. } => self.abort(uri::PROTOCOL_VIOLATION, "HELLO on an open session"),
            other => self.abort(
                uri::PROTOCOL_VIOLATION,
                format!("unexpected message type {} from client", other.code()),
            ),
        }
    }

    /// Leave the realm; safe to call more than once
    pub fn close(&mut self) {
        if let Some(id) = self.id.take() {
            self.router.detach(id);
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reason string carried by an ABORT or GOODBYE, for logging
pub fn close_reason(message: &Message) -> Option<&str> {
    match message {
        Message::Abort { reason, .. } | Message::Goodbye { reason, .. } => Some(reason),
        _ => None,
    }
}
