//! Message routing
//!
//! Classifies each decoded message against the session's role and state.
//! Before authentication only the handshake fields are interpreted. Once
//! authenticated the precedence is:
//!
//! ```text
//! requestId → inbound request
//! responseId → inbound response
//! ping / pong → keepalive control
//! anything else → plain application message
//! ```
//!
//! Reserved fields are stripped from the payload handed onward; the
//! remaining fields are passed through untouched.

use serde_json::Value;

use crate::messages::{fields, Message, Payload, RequestId};
use crate::state::SessionState;

/// Which end of the connection a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dials out and sends the handshake
    Client,

    /// Accepts connections and validates the handshake
    Server,
}

/// Where a decoded message should go
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// First message on an accepted connection
    Handshake { password: Option<String> },

    /// Handshake acknowledged by the accepting side
    Accepted,

    /// Handshake rejected by the accepting side
    Rejected { reason: String },

    /// Peer request awaiting exactly one response
    Request {
        request_id: RequestId,
        payload: Payload,
    },

    /// Answer to one of our outstanding requests
    Response {
        response_id: RequestId,
        payload: Payload,
    },

    /// Keepalive probe to be echoed back
    Probe { token: String },

    /// Keepalive acknowledgment
    Ack { token: String },

    /// Plain application message
    Message(Payload),

    /// Not interpretable in the current state
    Ignored { reason: &'static str },
}

/// Classifies a decoded message
pub fn route(mut message: Message, role: Role, state: SessionState) -> Route {
    match state {
        SessionState::Authenticated => route_authenticated(message),
        SessionState::AwaitingAuth => match role {
            Role::Server => Route::Handshake {
                password: message
                    .take(fields::PASSWORD)
                    .and_then(|v| v.as_str().map(str::to_string)),
            },
            Role::Client => route_handshake_reply(&message),
        },
        SessionState::Disconnected | SessionState::Connecting => Route::Ignored {
            reason: "no live session",
        },
    }
}

fn route_handshake_reply(message: &Message) -> Route {
    match message.get(fields::AUTHENTICATED) {
        Some(Value::Bool(true)) => Route::Accepted,
        authenticated => {
            let error = message.get(fields::ERROR);
            if authenticated.is_none() && error.is_none() {
                return Route::Ignored {
                    reason: "unauthenticated",
                };
            }
            let reason = match error {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "handshake rejected".to_string(),
            };
            Route::Rejected { reason }
        }
    }
}

fn route_authenticated(mut message: Message) -> Route {
    if let Some(id) = message.take(fields::REQUEST_ID) {
        return match id.as_u64() {
            Some(request_id) => Route::Request {
                request_id,
                payload: message.into_payload(),
            },
            None => Route::Ignored {
                reason: "invalid requestId",
            },
        };
    }

    if let Some(id) = message.take(fields::RESPONSE_ID) {
        return match id.as_u64() {
            Some(response_id) => Route::Response {
                response_id,
                payload: message.into_payload(),
            },
            None => Route::Ignored {
                reason: "invalid responseId",
            },
        };
    }

    if message.contains(fields::PING) {
        return match token(&message, fields::PING) {
            Some(token) => Route::Probe { token },
            None => Route::Ignored {
                reason: "invalid ping token",
            },
        };
    }

    if message.contains(fields::PONG) {
        return match token(&message, fields::PONG) {
            Some(token) => Route::Ack { token },
            None => Route::Ignored {
                reason: "invalid pong token",
            },
        };
    }

    Route::Message(message.into_payload())
}

fn token(message: &Message, key: &str) -> Option<String> {
    message.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(value: Value) -> Message {
        Message::from_value(value).unwrap()
    }

    fn payload(value: Value) -> Payload {
        msg(value).into_payload()
    }

    #[test]
    fn test_server_treats_first_message_as_handshake() {
        let routed = route(
            msg(json!({"password": "secret", "extra": 1})),
            Role::Server,
            SessionState::AwaitingAuth,
        );
        assert_eq!(
            routed,
            Route::Handshake {
                password: Some("secret".to_string())
            }
        );

        let routed = route(msg(json!({"foo": "bar"})), Role::Server, SessionState::AwaitingAuth);
        assert_eq!(routed, Route::Handshake { password: None });
    }

    #[test]
    fn test_client_handshake_replies() {
        assert_eq!(
            route(msg(json!({"authenticated": true})), Role::Client, SessionState::AwaitingAuth),
            Route::Accepted
        );
        assert_eq!(
            route(
                msg(json!({"authenticated": false, "error": "incorrect password"})),
                Role::Client,
                SessionState::AwaitingAuth
            ),
            Route::Rejected {
                reason: "incorrect password".to_string()
            }
        );
        assert_eq!(
            route(msg(json!({"error": "nope"})), Role::Client, SessionState::AwaitingAuth),
            Route::Rejected {
                reason: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_client_ignores_application_traffic_before_auth() {
        let routed = route(
            msg(json!({"requestId": 1, "foo": "bar"})),
            Role::Client,
            SessionState::AwaitingAuth,
        );
        assert!(matches!(routed, Route::Ignored { .. }));
    }

    #[test]
    fn test_request_takes_precedence_over_response() {
        let routed = route(
            msg(json!({"requestId": 4, "responseId": 9, "foo": "bar"})),
            Role::Client,
            SessionState::Authenticated,
        );
        assert_eq!(
            routed,
            Route::Request {
                request_id: 4,
                payload: payload(json!({"responseId": 9, "foo": "bar"})),
            }
        );
    }

    #[test]
    fn test_response_strips_reserved_field() {
        let routed = route(
            msg(json!({"responseId": 2, "bar": "qux"})),
            Role::Server,
            SessionState::Authenticated,
        );
        assert_eq!(
            routed,
            Route::Response {
                response_id: 2,
                payload: payload(json!({"bar": "qux"})),
            }
        );
    }

    #[test]
    fn test_response_takes_precedence_over_keepalive() {
        let routed = route(
            msg(json!({"responseId": 2, "ping": "abc"})),
            Role::Client,
            SessionState::Authenticated,
        );
        assert!(matches!(routed, Route::Response { response_id: 2, .. }));
    }

    #[test]
    fn test_keepalive_control() {
        assert_eq!(
            route(msg(json!({"ping": "abc"})), Role::Client, SessionState::Authenticated),
            Route::Probe {
                token: "abc".to_string()
            }
        );
        assert_eq!(
            route(msg(json!({"pong": "abc"})), Role::Server, SessionState::Authenticated),
            Route::Ack {
                token: "abc".to_string()
            }
        );
        assert!(matches!(
            route(msg(json!({"ping": 5})), Role::Client, SessionState::Authenticated),
            Route::Ignored { .. }
        ));
    }

    #[test]
    fn test_plain_message_is_verbatim() {
        let routed = route(
            msg(json!({"foo": "bar", "nested": {"a": [1, 2]}})),
            Role::Server,
            SessionState::Authenticated,
        );
        assert_eq!(
            routed,
            Route::Message(payload(json!({"foo": "bar", "nested": {"a": [1, 2]}})))
        );
    }

    #[test]
    fn test_invalid_ids_are_ignored() {
        assert!(matches!(
            route(msg(json!({"requestId": "x"})), Role::Server, SessionState::Authenticated),
            Route::Ignored { .. }
        ));
        assert!(matches!(
            route(msg(json!({"responseId": -1})), Role::Server, SessionState::Authenticated),
            Route::Ignored { .. }
        ));
    }

    #[test]
    fn test_nothing_routes_without_a_session() {
        for state in [SessionState::Disconnected, SessionState::Connecting] {
            assert!(matches!(
                route(msg(json!({"foo": 1})), Role::Server, state),
                Route::Ignored { .. }
            ));
        }
    }
}
