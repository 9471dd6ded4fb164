//! WebSocket transport framing goval envelopes as JSON.
//!
//! # Message Flow
//!
//! 1. `open()` invokes the metadata hook and dials `{gurl}/wsv2/{token}`
//! 2. The root channel is ready once the control channel reports `containerState: READY`
//! 3. `open_channel()` sends `openChan` with a unique `ref` and parks a oneshot
//! 4. The reader task answers the parked oneshot when the matching `openChanRes` arrives,
//!    registering the new channel's route before any later frame is read
//! 5. Frames for other channels are routed to that channel's inbound queue
//! 6. Each channel's outbound queue is drained by a forwarder that stamps the channel id

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use goval_protocol::{CONTROL_CHANNEL, ConnectionMetadata, Envelope, OpenChannel};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HostSelection, OpenOptions, RawChannel, Transport};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Pending `openChan` requests keyed by `ref`.
type PendingOpens = HashMap<String, PendingOpen>;

struct PendingOpen {
	service: String,
	tx: oneshot::Sender<Result<RawChannel>>,
}

/// Removes a parked open request when the caller stops waiting.
struct OpenGuard {
	reference: String,
	shared: Arc<Shared>,
}

impl Drop for OpenGuard {
	fn drop(&mut self) {
		if self.shared.state.lock().pending.remove(&self.reference).is_some() {
			debug!(reference = %self.reference, "OpenGuard: removed abandoned open request");
		}
	}
}

#[derive(Default)]
struct ConnState {
	/// Queue drained by the writer task. `None` until connected.
	writer: Option<mpsc::UnboundedSender<Envelope>>,
	/// Inbound queue per channel id.
	routes: HashMap<i32, mpsc::UnboundedSender<Value>>,
	pending: PendingOpens,
	cancel: Option<CancellationToken>,
	tasks: Vec<JoinHandle<()>>,
	closed: bool,
}

#[derive(Default)]
struct Shared {
	state: Mutex<ConnState>,
	last_ref: AtomicU64,
}

/// [`Transport`] over a single WebSocket connection.
#[derive(Default, Clone)]
pub struct WebSocketTransport {
	shared: Arc<Shared>,
}

impl WebSocketTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of channels (including the root channel) with a live route.
	pub fn route_count(&self) -> usize {
		self.shared.state.lock().routes.len()
	}
}

/// Builds the WebSocket URL for a connection.
///
/// The cluster named by the metadata wins; `host` is the fallback.
pub fn connection_url(metadata: &ConnectionMetadata, host: &HostSelection) -> String {
	let base = metadata
		.gurl
		.as_deref()
		.filter(|g| !g.trim().is_empty())
		.map(str::to_string)
		.unwrap_or_else(|| host.base_url());
	format!("{}/wsv2/{}", base.trim_end_matches('/'), metadata.token)
}

/// Decodes one WebSocket message into an envelope.
///
/// Returns `Ok(None)` for control frames that carry no envelope.
fn decode_frame(message: Message) -> Result<Option<Envelope>> {
	match message {
		Message::Text(text) => serde_json::from_str(&text)
			.map(Some)
			.map_err(|e| Error::ProtocolDecode(format!("bad frame: {e}"))),
		Message::Binary(bytes) => serde_json::from_slice(&bytes)
			.map(Some)
			.map_err(|e| Error::ProtocolDecode(format!("bad binary frame: {e}"))),
		_ => Ok(None),
	}
}

async fn wait_until_ready(source: &mut WsSource) -> Result<()> {
	while let Some(message) = source.next().await {
		let message = message.map_err(|e| Error::ConnectFailed(e.to_string()))?;
		if let Message::Close(frame) = &message {
			return Err(Error::ConnectFailed(format!(
				"connection closed before ready: {}",
				frame.as_ref().map(|f| f.reason.to_string()).unwrap_or_default()
			)));
		}
		let Some(envelope) = decode_frame(message)? else {
			continue;
		};
		if envelope.channel == CONTROL_CHANNEL {
			if let Some(state) = envelope.container_state() {
				if state.is_ready() {
					return Ok(());
				}
				debug!(state = %state.state, "container not ready yet");
				continue;
			}
		}
		debug!(channel = envelope.channel, kind = ?envelope.kind(), "frame before ready (ignored)");
	}
	Err(Error::ConnectFailed("connection closed before ready".into()))
}

impl Shared {
	fn next_ref(&self) -> String {
		format!("r{}", self.last_ref.fetch_add(1, Ordering::SeqCst))
	}

	/// Registers a route for `id` and starts its outbound forwarder.
	fn register_channel(self: &Arc<Self>, id: i32) -> Result<RawChannel> {
		let mut state = self.state.lock();
		let (writer, cancel) = match (&state.writer, &state.cancel) {
			(Some(w), Some(c)) => (w.clone(), c.clone()),
			_ => return Err(Error::Transport("connection is not open".into())),
		};

		let (channel, mut outbound_rx, inbound_tx) = RawChannel::pair(id);
		state.routes.insert(id, inbound_tx);

		let forwarder = tokio::spawn(async move {
			loop {
				let payload = tokio::select! {
					_ = cancel.cancelled() => break,
					payload = outbound_rx.recv() => match payload {
						Some(p) => p,
						None => break,
					},
				};
				match Envelope::from_payload(id, payload) {
					Some(envelope) => {
						if writer.send(envelope).is_err() {
							break;
						}
					}
					None => warn!(channel = id, "dropping non-object payload"),
				}
			}
			debug!(channel = id, "outbound forwarder stopped");
		});
		state.tasks.push(forwarder);

		Ok(channel)
	}

	fn dispatch(self: &Arc<Self>, envelope: Envelope) {
		if envelope.channel == CONTROL_CHANNEL {
			if let Some(response) = envelope.open_channel_response() {
				let pending = envelope.reference.as_ref().and_then(|r| self.state.lock().pending.remove(r));
				let Some(PendingOpen { service, tx }) = pending else {
					debug!(reference = ?envelope.reference, "openChanRes without a waiting request (ignored)");
					return;
				};
				let result = if response.is_error() {
					Err(Error::ChannelUnavailable {
						service,
						reason: response.error,
					})
				} else {
					debug!(service = %service, id = response.id, state = ?response.state, "channel opened");
					self.register_channel(response.id)
				};
				let _ = tx.send(result);
				return;
			}
		}

		let id = envelope.channel;
		let route = self.state.lock().routes.get(&id).cloned();
		match route {
			Some(tx) => {
				if tx.send(envelope.into_event()).is_err() {
					debug!(channel = id, "inbound queue closed, dropping route");
					self.state.lock().routes.remove(&id);
				}
			}
			None => debug!(channel = envelope.channel, kind = ?envelope.kind(), "frame for unknown channel (ignored)"),
		}
	}

	/// Drops every route and parked open request.
	fn teardown(&self, reason: &str) {
		let mut state = self.state.lock();
		state.routes.clear();
		for (_, pending) in state.pending.drain() {
			let _ = pending
				.tx
				.send(Err(Error::Transport(format!("{reason} while opening '{}'", pending.service))));
		}
		state.writer = None;
	}
}

async fn run_writer(mut sink: WsSink, mut queue: mpsc::UnboundedReceiver<Envelope>, cancel: CancellationToken) {
	loop {
		let envelope = tokio::select! {
			_ = cancel.cancelled() => break,
			envelope = queue.recv() => match envelope {
				Some(e) => e,
				None => break,
			},
		};
		let text = match serde_json::to_string(&envelope) {
			Ok(t) => t,
			Err(e) => {
				error!("Failed to encode frame: {}", e);
				continue;
			}
		};
		if let Err(e) = sink.send(Message::Text(text)).await {
			error!("Transport write error: {}", e);
			break;
		}
	}
	let _ = sink.close().await;
}

async fn run_reader(shared: Arc<Shared>, mut source: WsSource, cancel: CancellationToken) {
	loop {
		let message = tokio::select! {
			_ = cancel.cancelled() => break,
			message = source.next() => match message {
				Some(Ok(m)) => m,
				Some(Err(e)) => {
					error!("Transport read error: {}", e);
					break;
				}
				None => break,
			},
		};
		if let Message::Close(frame) = &message {
			info!(reason = ?frame.as_ref().map(|f| f.reason.to_string()), "remote closed the connection");
			break;
		}
		match decode_frame(message) {
			Ok(Some(envelope)) => shared.dispatch(envelope),
			Ok(None) => {}
			Err(e) => warn!("Failed to parse frame: {}", e),
		}
	}
	shared.teardown("connection closed");
}

#[async_trait]
impl Transport for WebSocketTransport {
	async fn open(&self, options: OpenOptions) -> Result<RawChannel> {
		{
			let state = self.shared.state.lock();
			if state.closed {
				return Err(Error::SessionClosed);
			}
			if state.writer.is_some() {
				return Err(Error::ConnectFailed("transport is already open".into()));
			}
		}

		let metadata = (options.fetch_metadata)().await.into_result()?;
		let url = connection_url(&metadata, &options.host);
		info!(
			user = %options.context.user.name,
			session = %options.context.session.id,
			host = %options.host.host,
			"opening connection"
		);

		let connect = async {
			let (stream, _) = connect_async(url.as_str())
				.await
				.map_err(|e| Error::ConnectFailed(e.to_string()))?;
			let (sink, mut source) = stream.split();
			wait_until_ready(&mut source).await?;
			Ok::<_, Error>((sink, source))
		};
		let (sink, source) = tokio::time::timeout(options.connect_timeout, connect)
			.await
			.map_err(|_| Error::ConnectFailed(format!("timed out after {}ms", options.connect_timeout.as_millis())))??;

		let cancel = CancellationToken::new();
		let (writer_tx, writer_rx) = mpsc::unbounded_channel();
		{
			let mut state = self.shared.state.lock();
			if state.closed {
				return Err(Error::SessionClosed);
			}
			state.writer = Some(writer_tx);
			state.cancel = Some(cancel.clone());
			state.tasks.push(tokio::spawn(run_writer(sink, writer_rx, cancel.clone())));
			state
				.tasks
				.push(tokio::spawn(run_reader(Arc::clone(&self.shared), source, cancel)));
		}

		let root = self.shared.register_channel(CONTROL_CHANNEL)?;
		info!(session = %options.context.session.id, "connection ready");
		Ok(root)
	}

	async fn open_channel(&self, service: &str) -> Result<RawChannel> {
		let reference = self.shared.next_ref();
		let (tx, rx) = oneshot::channel();

		{
			let mut state = self.shared.state.lock();
			let Some(writer) = state.writer.clone() else {
				return Err(Error::Transport("connection is not open".into()));
			};
			state.pending.insert(
				reference.clone(),
				PendingOpen {
					service: service.to_string(),
					tx,
				},
			);
			let request = Envelope::open_channel_request(reference.clone(), &OpenChannel::new(service));
			if writer.send(request).is_err() {
				state.pending.remove(&reference);
				return Err(Error::Transport("outbound queue closed".into()));
			}
		}

		let _guard = OpenGuard {
			reference: reference.clone(),
			shared: Arc::clone(&self.shared),
		};
		debug!(service, reference = %reference, "awaiting openChanRes");

		rx.await
			.map_err(|_| Error::Transport(format!("connection closed while opening '{service}'")))?
	}

	async fn close(&self) {
		let (cancel, tasks) = {
			let mut state = self.shared.state.lock();
			if state.closed {
				return;
			}
			state.closed = true;
			(state.cancel.take(), std::mem::take(&mut state.tasks))
		};
		if let Some(cancel) = cancel {
			cancel.cancel();
		}
		self.shared.teardown("transport closed");
		for task in tasks {
			let _ = tokio::time::timeout(Duration::from_millis(500), task).await;
		}
		info!("transport closed");
	}
}

#[cfg(test)]
mod tests;
