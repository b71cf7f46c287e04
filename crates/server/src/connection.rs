//! Per-connection session task
//!
//! Each accepted transport gets its own task that owns the link, the
//! authentication state, the correlation table and the keepalive monitor.
//! The task ends when the transport closes or the session is destroyed; it
//! then cancels its outstanding requests, leaves the registry and reports
//! `Close`.

use std::sync::Arc;

use nodelink_protocol::correlation::Completion;
use nodelink_protocol::messages;
use nodelink_protocol::timer::sleep_until_opt;
use nodelink_protocol::{
    route, AuthProvider, AuthResult, IncomingRequest, Link, Message, Payload, RequestError,
    RequestTable, Role, Route, ServerConfig, SessionError, SessionState,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::keepalive::{KeepAliveAction, KeepAliveMonitor};
use crate::registry::Registry;
use crate::{ServerEvent, SessionId};

/// Commands sent from `Server` handles to one session
#[derive(Debug)]
pub(crate) enum Command {
    Send(Message),
    Request(Payload, Completion),
    Destroy,
}

/// Why the select loop stopped
enum Ending {
    PeerClosed,
    Destroyed,
    KeepAliveExpired,
    HandshakeExpired,
}

pub(crate) struct Connection {
    id: SessionId,
    config: Arc<ServerConfig>,
    auth: Arc<dyn AuthProvider>,

    link: Link,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    table: RequestTable,
    keepalive: Option<KeepAliveMonitor>,
    /// Set until the handshake succeeds
    handshake_deadline: Option<Instant>,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ServerEvent>,
    registry: Registry,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        config: Arc<ServerConfig>,
        auth: Arc<dyn AuthProvider>,
        link: Link,
        state_tx: watch::Sender<SessionState>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<ServerEvent>,
        registry: Registry,
    ) -> Self {
        let table = RequestTable::new(config.request_timeout());

        Self {
            id,
            config,
            auth,
            link,
            state: SessionState::Disconnected,
            state_tx,
            table,
            keepalive: None,
            handshake_deadline: None,
            commands,
            events,
            registry,
        }
    }

    pub(crate) async fn run(mut self) {
        // the transport is already established when a connection is accepted
        self.set_state(SessionState::Connecting);
        self.set_state(SessionState::AwaitingAuth);
        let handshake_timeout = self.config.keepalive_timeout();
        self.handshake_deadline =
            (!handshake_timeout.is_zero()).then(|| Instant::now() + handshake_timeout);

        let ending = loop {
            let sweep_at = self.table.next_deadline();
            let keepalive_at = self.keepalive.as_ref().map(KeepAliveMonitor::deadline);
            let handshake_at = self.handshake_deadline;

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Destroy) | None => break Ending::Destroyed,
                        Some(command) => self.handle_command(command),
                    }
                }

                message = self.link.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => break Ending::PeerClosed,
                    }
                }

                _ = sleep_until_opt(sweep_at) => {
                    self.table.sweep_timeouts(Instant::now());
                }

                _ = sleep_until_opt(keepalive_at) => {
                    if self.handle_keepalive_timer() {
                        break Ending::KeepAliveExpired;
                    }
                }

                _ = sleep_until_opt(handshake_at) => {
                    tracing::warn!(session = %self.id, "No handshake in time, dropping connection");
                    break Ending::HandshakeExpired;
                }
            }
        };

        self.shutdown(ending).await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(message) => {
                if !self.state.is_authenticated() || self.link.send(message).is_err() {
                    tracing::warn!(
                        session = %self.id, state = %self.state,
                        "Dropping send to unauthenticated session"
                    );
                    self.emit(ServerEvent::Error(Some(self.id), SessionError::NotConnected));
                }
            }

            Command::Request(payload, completion) => {
                if !self.state.is_authenticated() {
                    RequestTable::reject_immediately(completion, RequestError::NotConnected);
                    return;
                }
                let (request_id, message) = self.table.create(payload, completion, Instant::now());
                if self.link.send(message).is_err() {
                    tracing::debug!(
                        session = %self.id, request_id,
                        "Request queued on a closing link"
                    );
                }
            }

            Command::Destroy => {}
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match route(message, Role::Server, self.state) {
            Route::Handshake { password } => {
                self.authenticate(password.as_deref()).await;
            }

            Route::Request {
                request_id,
                payload,
            } => {
                tracing::debug!(session = %self.id, request_id, "Inbound request");
                let responder = self.link.responder(request_id);
                self.emit(ServerEvent::Request(
                    self.id,
                    IncomingRequest { payload, responder },
                ));
            }

            Route::Response {
                response_id,
                payload,
            } => {
                self.table.resolve(response_id, payload);
            }

            Route::Probe { token } => {
                let _ = self.link.send(messages::acknowledgment(&token));
            }

            Route::Ack { token } => {
                let matched = self
                    .keepalive
                    .as_mut()
                    .map(|monitor| monitor.acknowledge(&token))
                    .unwrap_or(false);
                if !matched {
                    tracing::debug!(
                        session = %self.id, token = %token,
                        "Ignoring stale keepalive ack"
                    );
                }
            }

            Route::Message(payload) => {
                self.emit(ServerEvent::Message(self.id, payload));
            }

            Route::Accepted | Route::Rejected { .. } => {
                tracing::warn!(
                    session = %self.id,
                    "Ignoring handshake reply sent to the accepting side"
                );
            }

            Route::Ignored { reason } => {
                tracing::debug!(
                    session = %self.id, reason, state = %self.state,
                    "Ignoring message"
                );
            }
        }
    }

    /// Authentication gate: the first message decides the connection's fate
    async fn authenticate(&mut self, password: Option<&str>) {
        match self.auth.authenticate(password).await {
            AuthResult::Success => {
                self.handshake_deadline = None;
                self.set_state(SessionState::Authenticated);
                let _ = self.link.send(messages::accepted());

                self.keepalive = self.config.keepalive_interval().map(|interval| {
                    KeepAliveMonitor::new(interval, self.config.keepalive_timeout(), Instant::now())
                });

                tracing::info!(session = %self.id, "Session authenticated");
                self.emit(ServerEvent::Authenticated(self.id));
            }
            AuthResult::Failure { error_message } => {
                tracing::warn!(session = %self.id, reason = %error_message, "Rejecting handshake");
                let _ = self.link.send(messages::rejected(&error_message));
                // flush the rejection, then the transport shuts down on its own
                self.link.close();
                self.set_state(SessionState::Disconnected);
            }
        }
    }

    /// Returns true when the session must be destroyed
    fn handle_keepalive_timer(&mut self) -> bool {
        let Some(monitor) = self.keepalive.as_mut() else {
            return false;
        };

        match monitor.poll(Instant::now()) {
            Some(KeepAliveAction::Probe(token)) => {
                tracing::debug!(session = %self.id, token = %token, "Sending keepalive probe");
                let _ = self.link.send(messages::probe(&token));
                false
            }
            Some(KeepAliveAction::Expired) => {
                tracing::warn!(session = %self.id, "Keepalive timed out");
                self.emit(ServerEvent::Timeout(self.id));
                true
            }
            None => false,
        }
    }

    async fn shutdown(mut self, ending: Ending) {
        self.keepalive = None;
        self.handshake_deadline = None;

        match ending {
            Ending::PeerClosed => {
                if let Some(error) = self.link.finish().await {
                    tracing::error!(session = %self.id, error = %error, "Transport failed");
                    self.emit(ServerEvent::Error(Some(self.id), SessionError::Transport(error)));
                }
            }
            Ending::Destroyed | Ending::KeepAliveExpired | Ending::HandshakeExpired => {
                self.link.abort();
            }
        }

        self.table.cancel_all(RequestError::ConnectionLost);
        self.set_state(SessionState::Disconnected);
        self.registry.remove(self.id);

        tracing::info!(session = %self.id, "Session closed");
        self.emit(ServerEvent::Close(self.id));
    }

    fn set_state(&mut self, next: SessionState) {
        if let Err(e) = self.state.transition_to(next) {
            tracing::warn!(session = %self.id, error = %e, "Forcing session state");
            self.state = next;
        }
        self.state_tx.send_replace(self.state);
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}
