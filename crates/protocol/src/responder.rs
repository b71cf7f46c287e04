//! Inbound requests and their response handles

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ProtocolError, Result};
use crate::messages::{fields, Message, Payload, RequestId};

/// A request received from the peer
///
/// `payload` has the `requestId` field stripped. Answer through `responder`.
#[derive(Debug)]
pub struct IncomingRequest {
    pub payload: Payload,
    pub responder: Responder,
}

impl IncomingRequest {
    pub fn request_id(&self) -> RequestId {
        self.responder.request_id()
    }

    /// The payload as a JSON value
    pub fn body(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// Response handle bound to one inbound request and the connection it
/// arrived on
///
/// Only the first response is honored by the peer; later calls are still
/// transmitted but dropped on arrival. The handle does not keep the
/// connection alive: once the transport is gone, `send` fails with
/// `LinkClosed`.
#[derive(Debug, Clone)]
pub struct Responder {
    request_id: RequestId,
    outgoing: mpsc::WeakUnboundedSender<Message>,
}

impl Responder {
    pub(crate) fn new(request_id: RequestId, outgoing: mpsc::WeakUnboundedSender<Message>) -> Self {
        Self {
            request_id,
            outgoing,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Sends `response` back, stamped with `responseId`
    pub fn send(&self, response: Value) -> Result<()> {
        let message = Message::from_value(response)?.with(fields::RESPONSE_ID, self.request_id);

        let outgoing = self.outgoing.upgrade().ok_or(ProtocolError::LinkClosed)?;
        outgoing
            .send(message)
            .map_err(|_| ProtocolError::LinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_stamps_response_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let responder = Responder::new(7, tx.downgrade());

        responder.send(json!({"bar": "qux"})).unwrap();

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.into_value(), json!({"bar": "qux", "responseId": 7}));
    }

    #[tokio::test]
    async fn test_repeated_sends_are_transmitted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let responder = Responder::new(1, tx.downgrade());

        responder.send(json!({"bar": "qux"})).unwrap();
        responder.send(json!({"bar": "qux2"})).unwrap();

        assert_eq!(rx.recv().await.unwrap().into_value(), json!({"bar": "qux", "responseId": 1}));
        assert_eq!(rx.recv().await.unwrap().into_value(), json!({"bar": "qux2", "responseId": 1}));
    }

    #[test]
    fn test_send_after_link_gone() {
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();
        let responder = Responder::new(1, tx.downgrade());
        drop(tx);

        assert_eq!(responder.send(json!({})), Err(ProtocolError::LinkClosed));
    }

    #[test]
    fn test_send_rejects_non_object() {
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();
        let responder = Responder::new(1, tx.downgrade());

        assert_eq!(responder.send(json!(3)), Err(ProtocolError::NotAnObject("number")));
    }

    #[test]
    fn test_body_excludes_request_id() {
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();
        let request = IncomingRequest {
            payload: Message::from_value(json!({"foo": "bar"})).unwrap().into_payload(),
            responder: Responder::new(3, tx.downgrade()),
        };

        assert_eq!(request.request_id(), 3);
        assert_eq!(request.body(), json!({"foo": "bar"}));
    }
}
