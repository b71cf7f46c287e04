//! Client session task
//!
//! One task owns everything about the client's connection: the current
//! link, the correlation table, the pending connect attempt and the
//! reconnect timer. Handles talk to it over a command channel, so message
//! handling, timers and commands never run concurrently.

use std::sync::Arc;

use nodelink_protocol::correlation::Completion;
use nodelink_protocol::messages;
use nodelink_protocol::timer::sleep_until_opt;
use nodelink_protocol::{
    route, ClientConfig, IncomingRequest, Link, Message, Payload, RequestError, RequestTable,
    Role, Route, SessionError, SessionState,
};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::reconnect::ReconnectScheduler;
use crate::transport::Connector;
use crate::ClientEvent;

type ConnectResult<C> = std::io::Result<<C as Connector>::Transport>;

/// Commands sent from `Client` handles to the session task
#[derive(Debug)]
pub(crate) enum Command {
    Send(Message),
    Request(Payload, Completion),
    Disconnect,
    Connect,
}

pub(crate) struct ClientSession<C: Connector> {
    config: ClientConfig,
    connector: Arc<C>,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state_tx: watch::Sender<SessionState>,

    state: SessionState,
    link: Option<Link>,
    table: RequestTable,
    connecting: Option<JoinHandle<ConnectResult<C>>>,
    reconnect: ReconnectScheduler,
}

impl<C: Connector> ClientSession<C> {
    pub(crate) fn new(
        config: ClientConfig,
        connector: C,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<ClientEvent>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        let table = RequestTable::new(config.request_timeout());
        let reconnect = ReconnectScheduler::new(config.reconnect_interval());

        Self {
            config,
            connector: Arc::new(connector),
            commands,
            events,
            state_tx,
            state: SessionState::Disconnected,
            link: None,
            table,
            connecting: None,
            reconnect,
        }
    }

    /// Runs the session until every `Client` handle is dropped
    pub(crate) async fn run(mut self) {
        self.start_connect();

        loop {
            let sweep_at = self.table.next_deadline();
            let reconnect_at = self.reconnect.deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            tracing::info!("Client shutting down: all handles dropped");
                            break;
                        }
                    }
                }

                result = join_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.handle_connect_result(result);
                }

                message = recv_link(&mut self.link) => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => self.handle_link_closed().await,
                    }
                }

                _ = sleep_until_opt(sweep_at) => {
                    let expired = self.table.sweep_timeouts(Instant::now());
                    if expired > 0 {
                        tracing::debug!(expired, "Requests timed out");
                    }
                }

                _ = sleep_until_opt(reconnect_at) => {
                    self.handle_reconnect_timer();
                }
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(message) => {
                if !self.state.is_authenticated() {
                    tracing::warn!(state = %self.state, "Dropping send while not authenticated");
                    self.emit(ClientEvent::Error(SessionError::NotConnected));
                    return;
                }
                if self.send_on_link(message).is_err() {
                    self.emit(ClientEvent::Error(SessionError::NotConnected));
                }
            }

            Command::Request(payload, completion) => {
                if !self.state.is_authenticated() {
                    RequestTable::reject_immediately(completion, RequestError::NotConnected);
                    return;
                }
                let (request_id, message) = self.table.create(payload, completion, Instant::now());
                if self.send_on_link(message).is_err() {
                    // the link is going away; connection loss will cancel it
                    tracing::debug!(request_id, "Request queued on a closing link");
                }
            }

            Command::Disconnect => {
                tracing::info!("Disconnect requested");
                self.reconnect.disable();
                if let Some(connecting) = self.connecting.take() {
                    connecting.abort();
                }
                match self.link.take() {
                    Some(link) => {
                        link.abort();
                        self.connection_lost();
                    }
                    None => self.set_state(SessionState::Disconnected),
                }
            }

            Command::Connect => {
                self.reconnect.enable();
                if self.state.is_disconnected() {
                    self.start_connect();
                }
            }
        }
    }

    fn start_connect(&mut self) {
        if self.connecting.is_some() || self.link.is_some() {
            return;
        }

        self.set_state(SessionState::Connecting);

        let connector = Arc::clone(&self.connector);
        self.connecting = Some(tokio::spawn(async move { connector.connect().await }));
    }

    fn handle_connect_result(&mut self, result: Result<ConnectResult<C>, JoinError>) {
        match result {
            Ok(Ok(transport)) => {
                tracing::info!("Connected, sending handshake");
                self.reconnect.cancel();

                let link = Link::spawn(transport, self.config.channel_capacity);
                // fresh numbering for every connection
                self.table = RequestTable::new(self.config.request_timeout());
                self.set_state(SessionState::AwaitingAuth);

                if link.send(messages::handshake(&self.config.password)).is_err() {
                    tracing::warn!("Link closed before handshake was queued");
                }
                self.link = Some(link);
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Connection attempt failed");
                self.set_state(SessionState::Disconnected);
                self.emit(ClientEvent::Error(SessionError::Connect(e.to_string())));
                self.schedule_reconnect();
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(error = %e, "Connect task failed");
                self.set_state(SessionState::Disconnected);
                self.emit(ClientEvent::Error(SessionError::Connect(e.to_string())));
                self.schedule_reconnect();
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match route(message, Role::Client, self.state) {
            Route::Accepted => {
                if let Err(e) = self.state.transition_to(SessionState::Authenticated) {
                    tracing::warn!(error = %e, "Unexpected acknowledgment");
                    return;
                }
                self.publish_state();
                tracing::info!("Authenticated");
                self.emit(ClientEvent::Authenticated);
            }

            Route::Rejected { reason } => {
                tracing::warn!(reason = %reason, "Authentication rejected");
                self.emit(ClientEvent::Error(SessionError::AuthenticationRejected(reason)));
            }

            Route::Request {
                request_id,
                payload,
            } => {
                if let Some(link) = &self.link {
                    let responder = link.responder(request_id);
                    tracing::debug!(request_id, "Inbound request");
                    self.emit(ClientEvent::Request(IncomingRequest { payload, responder }));
                }
            }

            Route::Response {
                response_id,
                payload,
            } => {
                self.table.resolve(response_id, payload);
            }

            Route::Probe { token } => {
                let _ = self.send_on_link(messages::acknowledgment(&token));
            }

            Route::Ack { token } => {
                tracing::debug!(token = %token, "Ignoring unsolicited keepalive ack");
            }

            Route::Message(payload) => {
                self.emit(ClientEvent::Message(payload));
            }

            Route::Handshake { .. } => {
                tracing::warn!("Ignoring handshake sent to the connecting side");
            }

            Route::Ignored { reason } => {
                tracing::debug!(reason, state = %self.state, "Ignoring message");
            }
        }
    }

    async fn handle_link_closed(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        if let Some(error) = link.finish().await {
            tracing::error!(error = %error, "Transport failed");
            self.emit(ClientEvent::Error(SessionError::Transport(error)));
        } else {
            tracing::info!("Connection closed by peer");
        }

        self.connection_lost();
        self.schedule_reconnect();
    }

    fn handle_reconnect_timer(&mut self) {
        if !self.reconnect.take_due(Instant::now()) {
            return;
        }
        if self.state.is_disconnected() {
            tracing::info!("Attempting to reconnect");
            self.emit(ClientEvent::ReconnectAttempt);
            self.start_connect();
        }
    }

    /// Cancels outstanding requests and reports the closed connection
    fn connection_lost(&mut self) {
        self.table.cancel_all(RequestError::ConnectionLost);
        self.table = RequestTable::new(self.config.request_timeout());
        self.set_state(SessionState::Disconnected);
        self.emit(ClientEvent::Close);
    }

    fn schedule_reconnect(&mut self) {
        if let Some(deadline) = self.reconnect.schedule(Instant::now()) {
            tracing::debug!(
                in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Reconnect scheduled"
            );
        }
    }

    fn teardown(&mut self) {
        self.reconnect.disable();
        if let Some(connecting) = self.connecting.take() {
            connecting.abort();
        }
        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.table.cancel_all(RequestError::ConnectionLost);
        self.set_state(SessionState::Disconnected);
    }

    fn send_on_link(&self, message: Message) -> nodelink_protocol::Result<()> {
        match &self.link {
            Some(link) => link.send(message),
            None => Err(nodelink_protocol::ProtocolError::LinkClosed),
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if let Err(e) = self.state.transition_to(next) {
            tracing::warn!(error = %e, "Forcing session state");
            self.state = next;
        }
        self.publish_state();
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.state);
    }

    fn emit(&self, event: ClientEvent) {
        // the application may not be listening
        let _ = self.events.send(event);
    }
}

async fn join_connect<T>(connecting: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match connecting {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn recv_link(link: &mut Option<Link>) -> Option<Message> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}
