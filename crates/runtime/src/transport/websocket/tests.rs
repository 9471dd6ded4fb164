use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use goval_protocol::ConnectionMetadata;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use super::*;
use crate::metadata::MetadataOutcome;
use crate::transport::ConnectContext;

fn metadata_for(gurl: &str) -> ConnectionMetadata {
	ConnectionMetadata {
		token: "t0k".into(),
		gurl: Some(gurl.to_string()),
		..Default::default()
	}
}

fn options(outcome: impl Fn() -> MetadataOutcome + Send + Sync + 'static, timeout: Duration) -> OpenOptions {
	let outcome = Arc::new(outcome);
	OpenOptions {
		context: ConnectContext::new("alice", "xyz123"),
		host: HostSelection {
			secure: false,
			host: "127.0.0.1:9".into(),
		},
		fetch_metadata: Arc::new(move || {
			let outcome = Arc::clone(&outcome);
			async move { outcome() }.boxed()
		}),
		connect_timeout: timeout,
	}
}

/// Fake remote: reports READY, answers `openChan`, echoes channel traffic.
/// A frame carrying a `control` key first triggers a control-channel state frame.
async fn spawn_server(send_ready: bool) -> String {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	tokio::spawn(async move {
		let (tcp, _) = listener.accept().await.unwrap();
		let mut ws = accept_async(tcp).await.unwrap();
		if send_ready {
			ws.send(Message::Text(json!({"channel": 0, "containerState": {"state": "READY"}}).to_string()))
				.await
				.unwrap();
		}

		let mut next_id = 1;
		while let Some(Ok(message)) = ws.next().await {
			let Message::Text(text) = message else {
				continue;
			};
			let frame: Value = serde_json::from_str(&text).unwrap();
			let reply = if let Some(open) = frame.get("openChan") {
				if open["service"] == "forbidden" {
					json!({"channel": 0, "ref": frame["ref"], "openChanRes": {"state": "ERROR", "error": "service not allowed"}})
				} else {
					let id = next_id;
					next_id += 1;
					json!({"channel": 0, "ref": frame["ref"], "openChanRes": {"id": id, "state": "CREATED"}})
				}
			} else {
				if frame.get("control").is_some() {
					let state = json!({"channel": 0, "containerState": {"state": "READY"}});
					if ws.send(Message::Text(state.to_string())).await.is_err() {
						break;
					}
				}
				let mut body = frame.clone();
				body.as_object_mut().unwrap().remove("channel");
				json!({"channel": frame["channel"], "echo": body})
			};
			if ws.send(Message::Text(reply.to_string())).await.is_err() {
				break;
			}
		}
	});

	format!("ws://{addr}")
}

#[test]
fn test_url_prefers_metadata_cluster() {
	let host = HostSelection {
		secure: true,
		host: "eval.global.replit.com".into(),
	};

	let url = connection_url(&metadata_for("wss://eval.hacker.replit.com/"), &host);
	assert_eq!(url, "wss://eval.hacker.replit.com/wsv2/t0k");

	let bare = ConnectionMetadata {
		token: "t0k".into(),
		..Default::default()
	};
	assert_eq!(connection_url(&bare, &host), "wss://eval.global.replit.com/wsv2/t0k");
}

#[test]
fn test_decode_frame_variants() {
	let text = Message::Text(r#"{"channel": 2, "output": "hi"}"#.to_string());
	let envelope = decode_frame(text).unwrap().unwrap();
	assert_eq!(envelope.channel, 2);

	let binary = Message::Binary(br#"{"channel": 3, "ok": {}}"#.to_vec());
	assert_eq!(decode_frame(binary).unwrap().unwrap().channel, 3);

	assert!(decode_frame(Message::Ping(vec![])).unwrap().is_none());
	assert!(matches!(decode_frame(Message::Text("nope".into())), Err(Error::ProtocolDecode(_))));
}

#[tokio::test]
async fn test_open_channel_and_round_trip() {
	let gurl = spawn_server(true).await;
	let transport = WebSocketTransport::new();

	let root = transport
		.open(options(move || MetadataOutcome::Ready(metadata_for(&gurl)), Duration::from_secs(5)))
		.await
		.unwrap();
	assert_eq!(root.id, CONTROL_CHANNEL);

	let mut exec = transport.open_channel("exec").await.unwrap();
	assert_eq!(exec.id, 1);
	assert_eq!(transport.route_count(), 2);

	exec.outbound.send(json!({"exec": {"args": ["ls"]}})).unwrap();
	let event = tokio::time::timeout(Duration::from_secs(5), exec.inbound.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(event, json!({"echo": {"exec": {"args": ["ls"]}}}));

	transport.close().await;
}

#[tokio::test]
async fn test_dropped_root_stops_control_routing() {
	let gurl = spawn_server(true).await;
	let transport = WebSocketTransport::new();

	let root = transport
		.open(options(move || MetadataOutcome::Ready(metadata_for(&gurl)), Duration::from_secs(5)))
		.await
		.unwrap();
	drop(root);
	let mut exec = transport.open_channel("exec").await.unwrap();

	exec.outbound.send(json!({"control": true})).unwrap();
	let event = tokio::time::timeout(Duration::from_secs(5), exec.inbound.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(event, json!({"echo": {"control": true}}));
	assert_eq!(transport.route_count(), 1);

	transport.close().await;
}

#[tokio::test]
async fn test_refused_service_is_unavailable() {
	let gurl = spawn_server(true).await;
	let transport = WebSocketTransport::new();
	transport
		.open(options(move || MetadataOutcome::Ready(metadata_for(&gurl)), Duration::from_secs(5)))
		.await
		.unwrap();

	let err = transport.open_channel("forbidden").await.unwrap_err();
	match err {
		Error::ChannelUnavailable { service, reason } => {
			assert_eq!(service, "forbidden");
			assert_eq!(reason, "service not allowed");
		}
		other => panic!("Expected ChannelUnavailable, got: {other:?}"),
	}

	transport.close().await;
}

#[tokio::test]
async fn test_aborted_metadata_aborts_open() {
	let transport = WebSocketTransport::new();

	let err = transport
		.open(options(|| MetadataOutcome::Aborted, Duration::from_secs(1)))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Aborted), "{err:?}");
	assert_eq!(transport.route_count(), 0);
}

#[tokio::test]
async fn test_connect_times_out_without_ready() {
	let gurl = spawn_server(false).await;
	let transport = WebSocketTransport::new();

	let err = transport
		.open(options(move || MetadataOutcome::Ready(metadata_for(&gurl)), Duration::from_millis(200)))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::ConnectFailed(ref msg) if msg.contains("timed out")), "{err:?}");
}

#[tokio::test]
async fn test_close_ends_inbound_queues() {
	let gurl = spawn_server(true).await;
	let transport = WebSocketTransport::new();
	transport
		.open(options(move || MetadataOutcome::Ready(metadata_for(&gurl)), Duration::from_secs(5)))
		.await
		.unwrap();
	let mut shell = transport.open_channel("shell").await.unwrap();

	transport.close().await;
	transport.close().await;

	let next = tokio::time::timeout(Duration::from_secs(5), shell.inbound.recv()).await.unwrap();
	assert!(next.is_none());
	assert!(matches!(transport.open_channel("exec").await, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_open_channel_requires_connection() {
	let transport = WebSocketTransport::new();
	assert!(matches!(transport.open_channel("exec").await, Err(Error::Transport(_))));
}
