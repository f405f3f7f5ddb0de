//! Messages a connection handler sends back through the transport.

use bytes::Bytes;

use crate::close::CloseCode;
use crate::headers::Headers;
use crate::message::Payload;

/// An outbound message on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Duplex connection accepted.
    Accept,

    /// Answer to one request.
    Response(Response),

    /// Heartbeat reply on a duplex connection.
    Message(Payload),

    /// Close the duplex connection with a reason code.
    Close(CloseCode),
}

/// Response to a [`Request`](crate::message::Request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// A 200 response with a UTF-8 plain text body.
    pub fn text(body: String) -> Self {
        let body = Bytes::from(body);
        let headers = Headers::new()
            .with("content-type", "text/plain; charset=utf-8")
            .with("content-length", body.len().to_string());
        Self {
            status: 200,
            headers,
            body,
        }
    }
}
