use crate::{
    routes::{classify_outcome, ErrorPayload, FRAME_TOO_LARGE},
    server::SharedState,
};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use frame_classifier::{Classification, ClassifyError, DecodeError};
use serde::Serialize;
use std::time::Instant;
use tokio::time::timeout;
use tracing::instrument;

const ROUTE: &str = "/ws/confidence";

// Slack for a `data:image/...;base64,` prefix on text frames.
const TEXT_FRAME_SLACK: usize = 1024;

const MIN_TRANSPORT_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum FrameReply {
    Result(Classification),
    Error(ErrorPayload),
}

/// Largest message the transport accepts. Frames between the frame limit
/// and this size get a `frame too large` reply; anything bigger ends the
/// connection with close code 1009.
fn transport_limit(max_frame_bytes: usize) -> usize {
    let encoded = max_frame_bytes.div_ceil(3) * 4 + TEXT_FRAME_SLACK;
    encoded.saturating_mul(4).max(MIN_TRANSPORT_BYTES)
}

// tungstenite reports exceeded message and frame caps as capacity errors.
fn is_capacity_error(err: &axum::Error) -> bool {
    err.to_string().starts_with("Space limit exceeded")
}

pub async fn live_feed(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    let limit = transport_limit(state.limits.max_frame_bytes);

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_stream(socket, state))
}

#[instrument(skip(socket, state))]
async fn handle_stream(mut socket: WebSocket, state: SharedState) {
    if let Some(reason) = state.classifier.disabled_reason() {
        tracing::warn!("Rejecting live stream, classifier disabled: {}", reason);
        close(&mut socket, close_code::AGAIN, "classifier disabled").await;
        return;
    }

    state.metrics.stream_opened();
    tracing::info!("Live stream opened");

    let processed = run_stream(&mut socket, &state).await;

    state.metrics.stream_closed();
    tracing::info!("Live stream closed after {} frames", processed);
}

/// Answers frames one at a time, in arrival order, until the client leaves,
/// the stream idles out or the classifier becomes unusable.
async fn run_stream(socket: &mut WebSocket, state: &SharedState) -> u64 {
    let mut sequence: u64 = 0;

    loop {
        let received = match state.limits.idle_timeout {
            Some(limit) => match timeout(limit, socket.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::info!("Live stream idle for {:?}, closing", limit);
                    close(socket, close_code::NORMAL, "idle timeout").await;
                    break;
                }
            },
            None => socket.recv().await,
        };

        let frame = match received {
            Some(Ok(Message::Text(text))) => decode_text_frame(text.as_str()),
            Some(Ok(Message::Binary(data))) => Ok(data),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::warn!("Live stream transport error: {}", e);
                if is_capacity_error(&e) {
                    close(socket, close_code::SIZE, "message too big").await;
                }
                break;
            }
        };

        sequence += 1;
        if let Ok(bytes) = &frame {
            if bytes.len() > state.limits.max_frame_bytes {
                state.metrics.record_frame(ROUTE, "too_large");
                tracing::warn!("Frame {} rejected: {} bytes", sequence, bytes.len());
                let reply = FrameReply::Error(ErrorPayload::new(FRAME_TOO_LARGE));
                if let Err(e) = send_reply(socket, &reply).await {
                    tracing::warn!("Failed to send reply for frame {}: {}", sequence, e);
                    break;
                }
                continue;
            }
        }

        let started = Instant::now();
        let result = match frame {
            Ok(bytes) => state.classifier.classify(bytes).await,
            Err(e) => Err(ClassifyError::Decode(e)),
        };
        state
            .metrics
            .record_classification_duration(started.elapsed().as_millis() as u64, ROUTE);

        let (reply, keep_open) = match result {
            Ok(classification) => {
                state.metrics.record_frame(ROUTE, "ok");
                tracing::debug!(
                    "Frame {} classified as {} ({:.3})",
                    sequence,
                    classification.label,
                    classification.confidence
                );
                (FrameReply::Result(classification), true)
            }
            Err(err) => {
                state.metrics.record_frame(ROUTE, classify_outcome(&err));
                let recoverable = err.is_recoverable();
                if recoverable {
                    tracing::warn!("Frame {} rejected: {:?}", sequence, err);
                } else {
                    tracing::error!("Frame {} failed, ending stream: {:?}", sequence, err);
                }
                (FrameReply::Error(ErrorPayload::new(err.to_string())), recoverable)
            }
        };

        if let Err(e) = send_reply(socket, &reply).await {
            tracing::warn!("Failed to send reply for frame {}: {}", sequence, e);
            break;
        }

        if !keep_open {
            close(socket, close_code::ERROR, "classifier unavailable").await;
            break;
        }
    }

    sequence
}

/// Text frames carry base64, optionally as a `data:` URL.
fn decode_text_frame(text: &str) -> Result<Bytes, DecodeError> {
    let payload = text.trim();
    let payload = match payload.strip_prefix("data:") {
        Some(data_url) => data_url
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| DecodeError::Encoding("data URL without payload".into()))?,
        None => payload,
    };

    general_purpose::STANDARD
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| DecodeError::Encoding(e.to_string()))
}

async fn send_reply(socket: &mut WebSocket, reply: &FrameReply) -> anyhow::Result<()> {
    let json = serde_json::to_string(reply)?;
    socket.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn close(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!("Close frame not delivered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use frame_classifier::FrameClassifier;
    use futures::{SinkExt, StreamExt};
    use image::ImageFormat;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        connect_async, tungstenite::Message as ClientMessage, MaybeTlsStream, WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect(state: SharedState) -> Client {
        let addr = test_support::serve(state).await;
        let (client, _) = connect_async(format!("ws://{}/ws/confidence", addr))
            .await
            .unwrap();
        client
    }

    fn text_frame(color: [u8; 3]) -> ClientMessage {
        let frame = test_support::frame(color, ImageFormat::Png);
        ClientMessage::text(general_purpose::STANDARD.encode(frame))
    }

    async fn next_reply(client: &mut Client) -> Value {
        loop {
            match client.next().await.unwrap().unwrap() {
                ClientMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                ClientMessage::Ping(_) | ClientMessage::Pong(_) => continue,
                other => panic!("expected a text reply, got {:?}", other),
            }
        }
    }

    async fn next_close_code(client: &mut Client) -> u16 {
        loop {
            match client.next().await.unwrap().unwrap() {
                ClientMessage::Close(Some(frame)) => return u16::from(frame.code),
                ClientMessage::Ping(_) | ClientMessage::Pong(_) => continue,
                other => panic!("expected a close frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_text_frame() {
        let encoded = general_purpose::STANDARD.encode(b"abc");
        assert_eq!(decode_text_frame(&encoded).unwrap(), Bytes::from_static(b"abc"));

        let data_url = format!("data:image/jpeg;base64,{}", encoded);
        assert_eq!(decode_text_frame(&data_url).unwrap(), Bytes::from_static(b"abc"));

        assert!(matches!(
            decode_text_frame("data:image/jpeg;base64"),
            Err(DecodeError::Encoding(_))
        ));
        assert!(matches!(
            decode_text_frame("!!not base64!!"),
            Err(DecodeError::Encoding(_))
        ));
    }

    #[test]
    fn test_transport_limit_leaves_room_for_oversized_frames() {
        assert_eq!(transport_limit(1024), MIN_TRANSPORT_BYTES);

        let max_frame_bytes = 1024 * 1024;
        let limit = transport_limit(max_frame_bytes);
        assert!(limit > max_frame_bytes.div_ceil(3) * 4 + TEXT_FRAME_SLACK);
    }

    #[test]
    fn test_capacity_errors_are_detected() {
        use tokio_tungstenite::tungstenite::{error::CapacityError, Error as WsError};

        let too_long = WsError::Capacity(CapacityError::MessageTooLong {
            size: 2048,
            max_size: 1024,
        });
        assert!(is_capacity_error(&axum::Error::new(too_long)));
        assert!(!is_capacity_error(&axum::Error::new(WsError::ConnectionClosed)));
    }

    #[test]
    fn test_reply_shapes() {
        let ok = FrameReply::Result(Classification {
            label: "confident".into(),
            confidence: 0.5,
        });
        let err = FrameReply::Error(ErrorPayload::new("decode failed"));

        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"label":"confident","confidence":0.5}"#
        );
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"decode failed"}"#
        );
    }

    #[tokio::test]
    async fn test_replies_follow_frame_order() {
        let mut client = connect(test_support::state(test_support::classifier())).await;
        let colors = [[250, 5, 5], [5, 250, 5], [5, 5, 250]];
        let expected = ["red", "green", "blue"];

        for i in 0..10 {
            client.send(text_frame(colors[i % 3])).await.unwrap();
        }

        for i in 0..10 {
            let reply = next_reply(&mut client).await;
            assert_eq!(reply["label"], expected[i % 3], "reply {}", i);
            let confidence = reply["confidence"].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&confidence));
        }
    }

    #[tokio::test]
    async fn test_bad_frame_keeps_stream_open() {
        let mut client = connect(test_support::state(test_support::classifier())).await;

        client.send(ClientMessage::text("")).await.unwrap();
        let reply = next_reply(&mut client).await;
        assert_eq!(reply, serde_json::json!({ "error": "decode failed" }));

        client.send(ClientMessage::text("%%%")).await.unwrap();
        let reply = next_reply(&mut client).await;
        assert_eq!(reply["error"], "decode failed");

        client.send(text_frame([5, 250, 5])).await.unwrap();
        let reply = next_reply(&mut client).await;
        assert_eq!(reply["label"], "green");
    }

    #[tokio::test]
    async fn test_binary_and_data_url_frames() {
        let mut client = connect(test_support::state(test_support::classifier())).await;

        let frame = test_support::frame([250, 5, 5], ImageFormat::Jpeg);
        client
            .send(ClientMessage::binary(frame.clone()))
            .await
            .unwrap();
        assert_eq!(next_reply(&mut client).await["label"], "red");

        let data_url = format!(
            "data:image/jpeg;base64,{}",
            general_purpose::STANDARD.encode(&frame)
        );
        client.send(ClientMessage::text(data_url)).await.unwrap();
        assert_eq!(next_reply(&mut client).await["label"], "red");
    }

    #[tokio::test]
    async fn test_oversized_frame_keeps_stream_open() {
        let mut state = test_support::state(test_support::classifier());
        state.limits.max_frame_bytes = 1024;
        let mut client = connect(state).await;

        client
            .send(ClientMessage::binary(vec![0u8; 8 * 1024]))
            .await
            .unwrap();
        let reply = next_reply(&mut client).await;
        assert_eq!(reply, serde_json::json!({ "error": "frame too large" }));

        let oversized_text = general_purpose::STANDARD.encode(vec![0u8; 4 * 1024]);
        client
            .send(ClientMessage::text(oversized_text))
            .await
            .unwrap();
        assert_eq!(next_reply(&mut client).await["error"], "frame too large");

        let frame = test_support::frame([5, 250, 5], ImageFormat::Png);
        assert!(frame.len() <= 1024);
        client.send(ClientMessage::binary(frame)).await.unwrap();
        assert_eq!(next_reply(&mut client).await["label"], "green");
    }

    #[tokio::test]
    async fn test_disabled_classifier_closes_stream() {
        let state = test_support::state(FrameClassifier::disabled("model missing"));
        let mut client = connect(state).await;

        assert_eq!(next_close_code(&mut client).await, close_code::AGAIN);
    }

    #[tokio::test]
    async fn test_fatal_error_replies_then_closes() {
        let mut client = connect(test_support::state(test_support::broken_classifier())).await;

        client.send(text_frame([5, 5, 250])).await.unwrap();
        let reply = next_reply(&mut client).await;
        assert!(reply["error"].as_str().unwrap().contains("scores"));

        assert_eq!(next_close_code(&mut client).await, close_code::ERROR);
    }

    #[tokio::test]
    async fn test_idle_stream_is_closed() {
        let mut state = test_support::state(test_support::classifier());
        state.limits.idle_timeout = Some(Duration::from_millis(100));
        let mut client = connect(state).await;

        client.send(text_frame([5, 250, 5])).await.unwrap();
        assert_eq!(next_reply(&mut client).await["label"], "green");

        assert_eq!(next_close_code(&mut client).await, close_code::NORMAL);
    }
}
