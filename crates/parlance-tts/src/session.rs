//! The synthesis session: ingress (text), egress (audio), cancellation.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::client::IntoClientRequest, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::wire::{append_message, finish_message, parse_server_event, session_update, TtsServerEvent};
use crate::{TtsConfig, TtsError, TtsResult};

/// Depth of the internal audio queue (chunks).
const AUDIO_QUEUE_DEPTH: usize = 128;

/// Cancellation side of a running synthesis.
#[derive(Clone)]
pub struct TtsControl {
    cancel: CancellationToken,
}

impl TtsControl {
    /// Cancel in-flight synthesis.
    ///
    /// Idempotent. When this returns, the cancellation token is observed by
    /// every path: the ingress task stops forwarding text and closes the
    /// upstream session, the egress task stops queueing audio, and the
    /// consumer-facing [`TtsAudio`] yields no further chunks.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        info!("tts cancel requested");
    }

    /// Whether this synthesis was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Consumer side of a running synthesis: PCM chunks in order.
pub struct TtsAudio {
    rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
}

impl TtsAudio {
    /// Next PCM chunk, or `None` at end-of-stream.
    ///
    /// Returns `None` immediately once the session is cancelled, discarding
    /// any chunks still sitting in the internal queue.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.rx.close();
                None
            }
            chunk = self.rx.recv() => {
                if self.cancel.is_cancelled() {
                    self.rx.close();
                    return None;
                }
                chunk
            }
        }
    }
}

/// Start one synthesis session.
///
/// Connects to the provider, configures the voice, and spawns the ingress
/// and egress tasks. Text fragments read from `text_rx` stream to the
/// provider as they arrive; closing `text_rx` finishes the input and the
/// audio stream ends after the provider's final chunk.
pub async fn synthesize(
    config: &TtsConfig,
    mut text_rx: mpsc::Receiver<String>,
) -> TtsResult<(TtsControl, TtsAudio)> {
    info!(url = %config.ws_url, model = %config.model, "connecting tts websocket");

    let mut request = config
        .ws_url
        .clone()
        .into_client_request()
        .map_err(|e| TtsError::Connect(format!("invalid tts url: {e}")))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|_| TtsError::Connect("api key is not a valid header value".into()))?,
    );
    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| TtsError::Connect(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::text(session_update(&config.voice).to_string()))
        .await
        .map_err(|e| TtsError::Connect(format!("failed to send session.update: {e}")))?;
    info!(voice = %config.voice, "tts session configured");

    let cancel = CancellationToken::new();
    let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_QUEUE_DEPTH);

    // Ingress: text fragments -> provider. The first fragment goes out as
    // soon as it arrives. On cancel, close the upstream session so the
    // provider abandons in-flight synthesis.
    let ingress_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ingress_cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    debug!("tts ingress cancelled, session closed");
                    return;
                }
                fragment = text_rx.recv() => match fragment {
                    Some(text) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        if let Err(e) = sink.send(Message::text(append_message(&text).to_string())).await {
                            warn!(error = %e, "tts text send failed");
                            return;
                        }
                    }
                    None => {
                        if let Err(e) = sink.send(Message::text(finish_message().to_string())).await {
                            warn!(error = %e, "tts finish send failed");
                        }
                        debug!("tts ingress finished input");
                        return;
                    }
                }
            }
        }
    });

    // Egress: provider audio -> internal queue. Consults the cancellation
    // token before queueing so cancelled sessions stop producing.
    let egress_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut chunks: u64 = 0;
        loop {
            let message = tokio::select! {
                _ = egress_cancel.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    let payload: Value = match serde_json::from_str(text.as_str()) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "unparseable tts payload, skipping");
                            continue;
                        }
                    };
                    match parse_server_event(&payload) {
                        TtsServerEvent::AudioDelta(pcm) => {
                            if egress_cancel.is_cancelled() {
                                break;
                            }
                            chunks += 1;
                            if audio_tx.send(pcm).await.is_err() {
                                break;
                            }
                        }
                        TtsServerEvent::Finished => break,
                        TtsServerEvent::Error(message) => {
                            warn!(error = %message, "tts provider error");
                            break;
                        }
                        TtsServerEvent::Other => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "tts websocket receive error");
                    break;
                }
            }
        }
        // Dropping audio_tx is the end-of-stream sentinel for the consumer.
        info!(chunks, "tts egress finished");
    });

    Ok((
        TtsControl {
            cancel: cancel.clone(),
        },
        TtsAudio {
            rx: audio_rx,
            cancel,
        },
    ))
}
