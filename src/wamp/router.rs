// WAMP dealer
// Procedure registrations and call routing for a single realm

use super::is_valid_uri;
use super::message::{Dict, Message};
use crate::component::{CallResult, Component, Invocation};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub type SessionId = u64;
pub type RegistrationId = u64;

#[derive(Clone)]
enum Callee {
    /// Served in-process by a component
    Local {
        component: Arc<dyn Component>,
        suffix: &'static str,
    },
    Remote(SessionId),
}

#[derive(Clone)]
struct Registration {
    id: RegistrationId,
    callee: Callee,
}

struct PendingInvocation {
    callee: SessionId,
    reply: oneshot::Sender<Result<CallResult>>,
}

#[derive(Default)]
struct RouterState {
    sessions: HashMap<SessionId, mpsc::UnboundedSender<Message>>,
    /// Procedure URI to registration
    procedures: HashMap<String, Registration>,
    pending: HashMap<u64, PendingInvocation>,
    /// Sessions the router has sent GOODBYE to
    closing: HashSet<SessionId>,
    next_id: u64,
}

impl RouterState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct Router {
    realm: String,
    call_timeout: Duration,
    /// URI prefix only in-process components may register under
    reserved_prefix: Option<String>,
    state: Mutex<RouterState>,
}

impl Router {
    pub fn new(realm: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            realm: realm.into(),
            call_timeout,
            reserved_prefix: None,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Refuse remote registrations of `prefix` and anything below it
    pub fn with_reserved_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_prefix = Some(prefix.into());
        self
    }

    fn is_reserved(&self, uri: &str) -> bool {
        match &self.reserved_prefix {
            Some(prefix) => {
                uri == prefix
                    || (uri.starts_with(prefix.as_str()) && uri[prefix.len()..].starts_with('.'))
            }
            None => false,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join a session; messages for it are delivered on `sender`
    pub fn attach(&self, sender: mpsc::UnboundedSender<Message>) -> SessionId {
        let mut state = self.state();
        let id = state.next_id();
        state.sessions.insert(id, sender);
        info!("Session {} joined realm {}", id, self.realm);
        id
    }

    /// Remove a session along with its registrations; its pending invocations are canceled
    pub fn detach(&self, session: SessionId) {
        let canceled: Vec<PendingInvocation> = {
            let mut state = self.state();
            if state.sessions.remove(&session).is_none() {
                return;
            }
            state.closing.remove(&session);

            state
                .procedures
                .retain(|_, reg| !matches!(reg.callee, Callee::Remote(owner) if owner == session));

            let orphaned: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, p)| p.callee == session)
                .map(|(id, _)| *id)
                .collect();
            orphaned
                .into_iter()
                .filter_map(|id| state.pending.remove(&id))
                .collect()
        };

        for pending in canceled {
            let _ = pending.reply.send(Err(Error::Canceled(format!(
                "callee session {} left",
                session
            ))));
        }
        info!("Session {} left realm {}", session, self.realm);
    }

    fn insert(&self, uri: &str, callee: Callee) -> Result<RegistrationId> {
        if !is_valid_uri(uri) {
            return Err(Error::InvalidUri(uri.to_string()));
        }

        let mut state = self.state();
        if state.procedures.contains_key(uri) {
            return Err(Error::ProcedureExists(uri.to_string()));
        }
        let id = state.next_id();
        state
            .procedures
            .insert(uri.to_string(), Registration { id, callee });
        debug!("Registered {} ({})", uri, id);
        Ok(id)
    }

    pub fn register_local(
        &self,
        uri: &str,
        component: Arc<dyn Component>,
        suffix: &'static str,
    ) -> Result<RegistrationId> {
        self.insert(uri, Callee::Local { component, suffix })
    }

    pub fn register_remote(&self, session: SessionId, uri: &str) -> Result<RegistrationId> {
        if self.is_reserved(uri) {
            warn!("Session {} tried to register reserved procedure {}", session, uri);
            return Err(Error::NotAuthorized(uri.to_string()));
        }
        self.insert(uri, Callee::Remote(session))
    }

    /// Drop a registration; `owner` is the session that made it, `None` for local ones
    pub fn unregister(
        &self,
        owner: Option<SessionId>,
        registration: RegistrationId,
    ) -> Result<()> {
        let mut state = self.state();
        let uri = state
            .procedures
            .iter()
            .find(|(_, reg)| {
                reg.id == registration
                    && match (&reg.callee, owner) {
                        (Callee::Local { .. }, None) => true,
                        (Callee::Remote(callee), Some(session)) => *callee == session,
                        _ => false,
                    }
            })
            .map(|(uri, _)| uri.clone())
            .ok_or(Error::NoSuchRegistration(registration))?;

        state.procedures.remove(&uri);
        debug!("Unregistered {} ({})", uri, registration);
        Ok(())
    }

    /// Route a call to whoever registered `procedure`
    pub async fn call(&self, procedure: &str, invocation: Invocation) -> Result<CallResult> {
        let registration = self
            .state()
            .procedures
            .get(procedure)
            .cloned()
            .ok_or_else(|| Error::NoSuchProcedure(procedure.to_string()))?;

        match registration.callee {
            Callee::Local { component, suffix } => {
                tokio::time::timeout(self.call_timeout, component.invoke(suffix, invocation))
                    .await
                    .map_err(|_| self.timed_out(procedure))?
            }
            Callee::Remote(callee) => {
                self.call_remote(procedure, registration.id, callee, invocation)
                    .await
            }
        }
    }

    async fn call_remote(
        &self,
        procedure: &str,
        registration: RegistrationId,
        callee: SessionId,
        invocation: Invocation,
    ) -> Result<CallResult> {
        let (reply, receiver) = oneshot::channel();

        let request = {
            let mut state = self.state();
            let sender = state
                .sessions
                .get(&callee)
                .cloned()
                .ok_or_else(|| Error::NoSuchProcedure(procedure.to_string()))?;
            let request = state.next_id();

            let message = Message::Invocation {
                request,
                registration,
                details: Dict::new(),
                args: invocation.args,
                kwargs: invocation.kwargs,
            };
            if sender.send(message).is_err() {
                return Err(Error::Canceled(format!(
                    "callee session {} is gone",
                    callee
                )));
            }

            state
                .pending
                .insert(request, PendingInvocation { callee, reply });
            request
        };

        match tokio::time::timeout(self.call_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Canceled(format!(
                "callee session {} dropped the invocation",
                callee
            ))),
            Err(_) => {
                self.state().pending.remove(&request);
                Err(self.timed_out(procedure))
            }
        }
    }

    fn timed_out(&self, procedure: &str) -> Error {
        warn!(
            "Call to {} exceeded {}s",
            procedure,
            self.call_timeout.as_secs()
        );
        Error::Canceled(format!(
            "{} did not answer within {}s",
            procedure,
            self.call_timeout.as_secs()
        ))
    }

    fn complete(&self, session: SessionId, request: u64, outcome: Result<CallResult>) {
        let pending = {
            let mut state = self.state();
            match state.pending.get(&request) {
                Some(p) if p.callee == session => state.pending.remove(&request),
                _ => None,
            }
        };

        match pending {
            Some(pending) => {
                let _ = pending.reply.send(outcome);
            }
            None => debug!(
                "Session {} answered unknown invocation {}",
                session, request
            ),
        }
    }

    /// YIELD from a callee
    pub fn yield_result(&self, session: SessionId, request: u64, result: CallResult) {
        self.complete(session, request, Ok(result));
    }

    /// ERROR from a callee in reply to an INVOCATION
    pub fn yield_error(&self, session: SessionId, request: u64, error: String, args: &[Value]) {
        let message = match args.first() {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        self.complete(
            session,
            request,
            Err(Error::Remote {
                uri: error,
                message,
            }),
        );
    }

    /// Registered procedure URIs, sorted
    pub fn procedures(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.state().procedures.keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Say GOODBYE to every session
    pub fn close_all(&self, reason: &str) {
        let mut state = self.state();
        let RouterState {
            sessions, closing, ..
        } = &mut *state;
        for (id, sender) in sessions.iter() {
            if sender.send(Message::goodbye(reason)).is_ok() {
                closing.insert(*id);
            }
        }
    }

    /// Whether the router already said GOODBYE to `session`
    pub fn is_closing(&self, session: SessionId) -> bool {
        self.state().closing.contains(&session)
    }
}
