//! Encodage Server-Sent Events et réponse HTTP `text/event-stream`.

use crate::subscribers::Subscription;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::{stream, StreamExt};
use std::convert::Infallible;

/// Un message SSE diffusé tel quel à tous les abonnés.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `: <texte>` (keep-alive, ignoré par EventSource)
    Comment(String),
    /// `data: <payload>` ; payload = JSON sur une seule ligne
    Data(String),
    /// `event: error` + `{"error": "<message>"}`
    Error(String),
}

impl Frame {
    pub fn data(payload: impl Into<String>) -> Self {
        Frame::Data(payload.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    pub fn encode(&self) -> String {
        match self {
            Frame::Comment(text) => format!(": {text}\n\n"),
            Frame::Data(payload) => format!("data: {payload}\n\n"),
            Frame::Error(message) => {
                let body = serde_json::json!({ "error": message });
                format!("event: error\ndata: {body}\n\n")
            }
        }
    }
}

/// Réponse SSE : commentaire `connected` puis chaque frame reçue par l'abonnement.
/// Quand le client se déconnecte, le body est droppé et l'abonnement avec lui.
pub fn event_stream(subscription: Subscription) -> Response {
    let connected = stream::once(async { Frame::Comment("connected".into()) });
    let frames = connected
        .chain(subscription)
        .map(|frame| Ok::<_, Infallible>(frame.encode()));

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(frames),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscribers::SubscriberRegistry;
    use std::sync::Arc;

    #[test]
    fn test_frame_encoding() {
        assert_eq!(Frame::Comment("connected".into()).encode(), ": connected\n\n");
        assert_eq!(Frame::data(r#"{"fanSpeed":30}"#).encode(), "data: {\"fanSpeed\":30}\n\n");
        assert_eq!(
            Frame::error("nvidia-smi exited with status 9").encode(),
            "event: error\ndata: {\"error\":\"nvidia-smi exited with status 9\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_event_stream_starts_with_keepalive_comment() {
        let registry = Arc::new(SubscriberRegistry::new());
        let response = event_stream(registry.register());
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b": connected\n\n");

        registry.broadcast(&Frame::data("{}"));
        let second = body.next().await.unwrap().unwrap();
        assert_eq!(&second[..], b"data: {}\n\n");

        drop(body);
        assert!(registry.is_empty());
    }
}
