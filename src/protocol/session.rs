//! Conversion session client -- drives one image through the remote protocol.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::chunking;
use super::messages::{
    Command, EndpointParams, RemoteEvent, SessionMeta, init_message, metadata_message, parse_inbound,
    session_url, upload_finished_message,
};
use super::progress::{self, ProgressTracker};
use crate::config::TransportConfig;
use crate::error::{Error, SessionError};
use crate::transport::{self, Connector, Inbound, Transport};
use crate::types::{JobId, JobOptions};
use crate::utils::random_suffix;

/// How long to look for a final error message after a write fails
const SEND_FAILURE_DRAIN: Duration = Duration::from_secs(2);

/// Length of the client-generated session identifier
const SESSION_ID_LEN: usize = 16;

/// Position of a session in its state machine; only moves forward
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SessionPhase {
    /// Opening the transport
    Connecting,
    /// Sending init and metadata
    Negotiating,
    /// Sending binary chunks
    Streaming,
    /// Waiting for remote milestones
    RemoteProcessing,
    /// Result token received, transport closed
    Completed,
    /// Terminal failure
    Failed,
}

/// Everything the client needs to convert one image
///
/// The payload is moved in and released as soon as the last chunk is written.
#[derive(Debug)]
pub struct SessionRequest {
    /// Job index in the batch
    pub id: JobId,
    /// Original filename
    pub name: String,
    /// Encoded image bytes
    pub payload: Vec<u8>,
    /// Declared width in pixels
    pub width: u32,
    /// Declared height in pixels
    pub height: u32,
    /// Locale, format, DPI and color mode
    pub options: JobOptions,
}

/// Result of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Opaque token used to fetch the finished artifacts
    pub token: String,
    /// Binary frames received during remote processing (empty unless collected)
    pub chunks: Vec<Vec<u8>>,
}

/// Per-session cursor, chunk size, result buffer and token
#[derive(Debug)]
struct SessionState {
    id: JobId,
    phase: SessionPhase,
    chunk_size: usize,
    chunks: Vec<Vec<u8>>,
    token: Option<String>,
    progress: ProgressTracker,
}

impl SessionState {
    fn new(id: JobId, chunk_size: usize) -> Self {
        Self {
            id,
            phase: SessionPhase::Connecting,
            chunk_size: chunk_size.max(1),
            chunks: Vec::new(),
            token: None,
            progress: ProgressTracker::default(),
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug_assert!(phase >= self.phase, "session phases only move forward");
        tracing::debug!(job_index = self.id.0, from = ?self.phase, to = ?phase, "Session phase");
        self.phase = phase;
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        self.enter(SessionPhase::Failed);
        self.chunks = Vec::new();
        self.token = None;
        err
    }

    fn report<F: FnMut(u8)>(&mut self, value: u8, on_progress: &mut F) {
        if let Some(value) = self.progress.raise(value) {
            on_progress(value);
        }
    }
}

/// Drives exactly one image through a negotiated remote conversion session
///
/// Failures are returned, never retried here.
#[derive(Clone)]
pub struct ProtocolClient {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    chunk_size: usize,
    collect_buffers: bool,
}

impl ProtocolClient {
    /// Create a client that uploads in chunks of `chunk_size` bytes
    pub fn new(connector: Arc<dyn Connector>, config: TransportConfig, chunk_size: usize) -> Self {
        Self {
            connector,
            config,
            chunk_size: chunk_size.max(1),
            collect_buffers: false,
        }
    }

    /// Keep binary frames the remote streams back during processing
    #[must_use]
    pub fn collect_buffers(mut self, collect: bool) -> Self {
        self.collect_buffers = collect;
        self
    }

    /// Negotiated chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run one session to completion or failure
    ///
    /// `on_progress` receives each new progress value (0 to 100); values
    /// never decrease. Cancelling `cancel` closes the transport and fails the
    /// session with [`SessionError::StoppedByCaller`].
    pub async fn run<F>(
        &self,
        request: SessionRequest,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<SessionOutcome, SessionError>
    where
        F: FnMut(u8) + Send,
    {
        let mut state = SessionState::new(request.id, self.chunk_size);

        let url = session_url(
            &self.config,
            &EndpointParams {
                locale: &request.options.locale,
                size: request.payload.len(),
                width: request.width,
                height: request.height,
                filename: &request.name,
            },
        )
        .map_err(|e| SessionError::ConnectionTimeout(format!("invalid session endpoint: {e}")));
        let url = match url {
            Ok(url) => url,
            Err(e) => return Err(state.fail(e)),
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(state.fail(SessionError::StoppedByCaller)),
            opened = transport::open(self.connector.as_ref(), &url, self.config.connect_timeout) => opened,
        };
        let mut transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(
                    job_index = request.id.0,
                    connector = self.connector.name(),
                    error = %e,
                    "Could not open conversion session"
                );
                return Err(state.fail(SessionError::ConnectionTimeout(e.to_string())));
            }
        };
        state.report(progress::CONNECTED, &mut on_progress);

        let result = self
            .drive(&mut state, transport.as_mut(), request, cancel, &mut on_progress)
            .await;
        transport.close().await;

        match result {
            Ok(token) => {
                state.enter(SessionPhase::Completed);
                Ok(SessionOutcome {
                    token,
                    chunks: std::mem::take(&mut state.chunks),
                })
            }
            Err(e) => Err(state.fail(e)),
        }
    }

    async fn drive<F>(
        &self,
        state: &mut SessionState,
        transport: &mut dyn Transport,
        request: SessionRequest,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<String, SessionError>
    where
        F: FnMut(u8) + Send,
    {
        let SessionRequest {
            id,
            name,
            payload,
            width,
            height,
            options,
        } = request;
        let index = id.get();

        state.enter(SessionPhase::Negotiating);
        let session_id = random_suffix(SESSION_ID_LEN);
        send_control(transport, &init_message(index), cancel).await?;
        let meta = metadata_message(&SessionMeta {
            index,
            job_id: &session_id,
            host: &self.config.host,
            width,
            height,
            dpi: options.dpi,
            is_cmyk: options.is_cmyk,
        });
        send_control(transport, &meta, cancel).await?;
        state.report(progress::NEGOTIATED, on_progress);

        state.enter(SessionPhase::Streaming);
        let total = chunking::chunk_count(payload.len(), state.chunk_size);
        tracing::debug!(
            job_index = index,
            file = %name,
            bytes = payload.len(),
            chunk_size = state.chunk_size,
            chunks = total,
            "Streaming payload"
        );
        state.report(progress::UPLOAD_START, on_progress);
        for (i, chunk) in chunking::split(&payload, state.chunk_size).enumerate() {
            send_binary(transport, chunk, cancel).await?;
            state.report(progress::upload_progress(i + 1, total), on_progress);
        }
        drop(payload);
        send_control(transport, &upload_finished_message(index), cancel).await?;
        state.report(progress::UPLOAD_END, on_progress);

        state.enter(SessionPhase::RemoteProcessing);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::StoppedByCaller),
                next = transport.recv() => next,
            };

            let message = match next {
                None => return Err(closed(cancel)),
                Some(Ok(Inbound::Binary(bytes))) => {
                    if self.collect_buffers {
                        state.chunks.push(bytes);
                    } else {
                        tracing::trace!(job_index = index, bytes = bytes.len(), "Dropping result frame");
                    }
                    continue;
                }
                Some(Ok(Inbound::Control(message))) => message,
                Some(Err(Error::Serialization(e))) => {
                    tracing::warn!(job_index = index, error = %e, "Ignoring malformed control message");
                    continue;
                }
                Some(Err(e)) => {
                    tracing::debug!(job_index = index, error = %e, "Transport read failed");
                    return Err(closed(cancel));
                }
            };

            match parse_inbound(&message) {
                RemoteEvent::Milestone(command) => {
                    if let Some(value) = command.milestone_progress() {
                        state.report(value, on_progress);
                    }
                }
                RemoteEvent::ResultToken(token) => {
                    state.token = Some(token);
                    if let Some(value) = Command::ResultToken.milestone_progress() {
                        state.report(value, on_progress);
                    }
                }
                RemoteEvent::Ready => {
                    let token = state.token.take().ok_or_else(|| {
                        SessionError::RemoteError("result ready without a result token".to_string())
                    })?;
                    state.report(progress::COMPLETE, on_progress);
                    return Ok(token);
                }
                RemoteEvent::Fatal(message) => return Err(SessionError::RemoteError(message)),
                RemoteEvent::Notice(message) => {
                    tracing::warn!(job_index = index, message = %message, "Remote reported a recoverable error");
                }
                RemoteEvent::Unknown(message) => {
                    tracing::debug!(job_index = index, message = %message, "Ignoring unknown control message");
                }
            }
        }
    }
}

fn closed(cancel: &CancellationToken) -> SessionError {
    if cancel.is_cancelled() {
        SessionError::StoppedByCaller
    } else {
        SessionError::TransportClosedUnexpectedly
    }
}

async fn send_control(
    transport: &mut dyn Transport,
    message: &serde_json::Value,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SessionError::StoppedByCaller),
        sent = transport.send_control(message) => sent,
    };
    match sent {
        Ok(()) => Ok(()),
        Err(e) => Err(send_failed(transport, e, cancel).await),
    }
}

async fn send_binary(
    transport: &mut dyn Transport,
    chunk: &[u8],
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SessionError::StoppedByCaller),
        sent = transport.send_binary(chunk) => sent,
    };
    match sent {
        Ok(()) => Ok(()),
        Err(e) => Err(send_failed(transport, e, cancel).await),
    }
}

/// A write failed: the remote may have sent its reason before closing
async fn send_failed(
    transport: &mut dyn Transport,
    err: Error,
    cancel: &CancellationToken,
) -> SessionError {
    tracing::debug!(error = %err, "Transport write failed");
    if cancel.is_cancelled() {
        return SessionError::StoppedByCaller;
    }

    let drained = tokio::time::timeout(SEND_FAILURE_DRAIN, async {
        while let Some(Ok(inbound)) = transport.recv().await {
            if let Inbound::Control(message) = inbound
                && let RemoteEvent::Fatal(reason) = parse_inbound(&message)
            {
                return Some(reason);
            }
        }
        None
    })
    .await;

    match drained {
        Ok(Some(reason)) => SessionError::RemoteError(reason),
        _ => closed(cancel),
    }
}
