//! ASR WebSocket session: connect, audio send task, event receive task.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::buffer::UtteranceBuffer;
use crate::{AsrConfig, AsrError, AsrEvent};

/// Depth of the uplink audio queue (chunks, not bytes).
const AUDIO_QUEUE_DEPTH: usize = 256;

/// Depth of the event queue toward the orchestrator.
const EVENT_QUEUE_DEPTH: usize = 64;

enum AudioFrame {
    Pcm(Vec<u8>),
    End,
}

/// Handle for feeding uplink PCM into the ASR session.
///
/// After the session dies the handle is half-open: feeds are silently
/// dropped until a new session is connected.
#[derive(Clone)]
pub struct AsrHandle {
    audio_tx: mpsc::Sender<AudioFrame>,
}

impl AsrHandle {
    /// Feed one chunk of raw 16 kHz mono s16le PCM.
    ///
    /// Never errors: a dead session drops the chunk (half-open state).
    pub async fn feed(&self, pcm: Vec<u8>) {
        if self.audio_tx.send(AudioFrame::Pcm(pcm)).await.is_err() {
            debug!("asr session gone; dropping audio chunk");
        }
    }

    /// Signal end-of-audio to the provider.
    pub async fn end(&self) {
        let _ = self.audio_tx.send(AudioFrame::End).await;
    }
}

/// Establish an ASR streaming session.
///
/// Connects (retrying once on failure), sends the start-of-stream
/// configuration, and spawns the audio-send and event-receive tasks.
/// Returns the feed handle and the event receiver; the receiver ends with
/// [`AsrEvent::Closed`].
pub async fn connect(config: AsrConfig) -> Result<(AsrHandle, mpsc::Receiver<AsrEvent>), AsrError> {
    info!(url = %config.ws_url, "connecting asr websocket");

    // One retry: transient handshake failures (and proxied environments
    // that reject the first attempt) get a second, direct attempt.
    let ws = match connect_async(config.ws_url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(first) => {
            warn!(error = %first, "asr connect failed, retrying once");
            match connect_async(config.ws_url.as_str()).await {
                Ok((ws, _)) => ws,
                Err(second) => {
                    return Err(AsrError::Connect(format!(
                        "{second} (first attempt: {first})"
                    )));
                }
            }
        }
    };
    let (mut sink, mut stream) = ws.split();

    let start = config.start_message().to_string();
    sink.send(Message::text(start))
        .await
        .map_err(|e| AsrError::Connect(format!("failed to send start message: {e}")))?;
    info!("asr session configured");

    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(AUDIO_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel::<AsrEvent>(EVENT_QUEUE_DEPTH);

    // Audio send task. On a send failure the websocket is dead; keep
    // draining the queue so feeders never block (half-open behavior).
    tokio::spawn(async move {
        let mut broken = false;
        while let Some(frame) = audio_rx.recv().await {
            let message = match frame {
                AudioFrame::Pcm(pcm) => Message::binary(pcm),
                // An empty text frame tells the provider the audio is done.
                AudioFrame::End => Message::text(""),
            };
            if broken {
                continue;
            }
            if let Err(e) = sink.send(message).await {
                warn!(error = %e, "asr audio send failed; dropping further audio");
                broken = true;
            }
        }
        debug!("asr audio send task finished");
    });

    // Event receive task: parse provider payloads through the utterance
    // buffer and forward typed events.
    tokio::spawn(async move {
        let mut buffer = UtteranceBuffer::new();
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let payload: Value = match serde_json::from_str(text.as_str()) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "unparseable asr payload, skipping");
                            continue;
                        }
                    };
                    let finished = payload
                        .get("finished")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let mut fatal = false;
                    for event in buffer.absorb(&payload) {
                        fatal = fatal || matches!(event, AsrEvent::Error { .. });
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    if fatal || finished {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "asr websocket receive error");
                    let _ = event_tx
                        .send(AsrEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
        let _ = event_tx.send(AsrEvent::Closed).await;
        info!("asr session closed");
    });

    Ok((AsrHandle { audio_tx }, event_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_reports_both_attempts() {
        let config = AsrConfig {
            api_key: "key".into(),
            // Unroutable port on localhost: both attempts fail fast.
            ws_url: "ws://127.0.0.1:1/".into(),
            model: "stt-rt-v4".into(),
            language_hints: vec!["en".into()],
        };
        let err = connect(config).await.err().expect("connect must fail");
        let text = err.to_string();
        assert!(text.contains("asr connect failed"), "got: {text}");
        assert!(text.contains("first attempt"), "got: {text}");
    }

    #[tokio::test]
    async fn half_open_handle_drops_feeds() {
        // A handle whose receiver is gone must not error or block.
        let (audio_tx, audio_rx) = mpsc::channel::<AudioFrame>(1);
        drop(audio_rx);
        let handle = AsrHandle { audio_tx };
        handle.feed(vec![0u8; 320]).await;
        handle.end().await;
    }
}
