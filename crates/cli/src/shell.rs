//! Interactive shell state: login, the open session, and live attachments.
//!
//! Output goes through an unbounded queue of lines so that event printers
//! running in background tasks never interleave partial writes with command
//! output. The binary drains the queue to stdout.

use std::collections::HashMap;
use std::sync::Arc;

use colored::Colorize;
use goval_protocol::{CurrentUser, SERVICES, is_known_service};
use goval_runtime::{Credential, IdentityService, ReplitApi, Session, SessionConfig, WebSocketTransport};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{CliError, Result};
use crate::repl::ReplCommand;

/// Builds a session for a config carrying credential and session id.
pub type SessionFactory = Arc<dyn Fn(SessionConfig) -> goval_runtime::Result<Session> + Send + Sync>;

/// Whether the read loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Continue,
	Exit,
}

pub struct Shell {
	/// Flag/env settings; these win over arguments typed at the prompt.
	base: SessionConfig,
	identity: Arc<dyn IdentityService>,
	sessions: SessionFactory,
	credential: Option<Credential>,
	user: Option<CurrentUser>,
	session: Option<Arc<Session>>,
	attachments: HashMap<String, JoinHandle<()>>,
	out: mpsc::UnboundedSender<String>,
}

impl Shell {
	pub fn new(
		base: SessionConfig,
		identity: Arc<dyn IdentityService>,
		sessions: SessionFactory,
		out: mpsc::UnboundedSender<String>,
	) -> Self {
		Self {
			base,
			identity,
			sessions,
			credential: None,
			user: None,
			session: None,
			attachments: HashMap::new(),
			out,
		}
	}

	/// A shell talking to the production API over WebSockets.
	pub fn replit(base: SessionConfig, out: mpsc::UnboundedSender<String>) -> Result<Self> {
		let api = Arc::new(ReplitApi::new()?);
		let for_sessions = Arc::clone(&api);
		let sessions: SessionFactory = Arc::new(move |config: SessionConfig| -> goval_runtime::Result<Session> {
			Ok(Session::with_api(
				config,
				Arc::clone(&for_sessions),
				Arc::new(WebSocketTransport::new()),
			))
		});
		Ok(Self::new(base, api, sessions, out))
	}

	pub fn user(&self) -> Option<&CurrentUser> {
		self.user.as_ref()
	}

	pub fn session(&self) -> Option<&Arc<Session>> {
		self.session.as_ref()
	}

	/// Services with a live attachment, sorted.
	pub fn attached(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.attachments
			.iter()
			.filter(|(_, task)| !task.is_finished())
			.map(|(name, _)| name.clone())
			.collect();
		names.sort();
		names
	}

	fn print(&self, line: impl Into<String>) {
		let _ = self.out.send(line.into());
	}

	fn open_session(&self) -> Result<&Arc<Session>> {
		self.session.as_ref().ok_or(CliError::NoSession)
	}

	pub async fn execute(&mut self, command: ReplCommand) -> Result<Flow> {
		match command {
			ReplCommand::Empty => {}
			ReplCommand::Login(token) => self.login(token).await?,
			ReplCommand::Connect(id) => self.connect(id).await?,
			ReplCommand::Attach(service) => self.attach(service).await?,
			ReplCommand::Detach(service) => self.detach(&service)?,
			ReplCommand::Close => {
				if !self.close_session().await {
					return Err(CliError::NoSession);
				}
			}
			ReplCommand::Channels => self.list_channels(),
			ReplCommand::Clear => self.print("\x1b[2J\x1b[1;1H"),
			ReplCommand::Exit => {
				self.close_session().await;
				return Ok(Flow::Exit);
			}
			ReplCommand::Command { service, payload } => self.command(service, payload).await?,
		}
		Ok(Flow::Continue)
	}

	async fn login(&mut self, token: Option<String>) -> Result<()> {
		let credential = self
			.base
			.credential
			.clone()
			.or_else(|| token.filter(|t| !t.is_empty()).map(Credential::new))
			.ok_or_else(|| CliError::Usage("please pass a connect.sid token to login".into()))?;

		self.print("Logging in...");
		let user = self.identity.current_user(&credential).await?;
		self.print(format!("Logged in as {}.", user.username.bold()));
		self.credential = Some(credential);
		self.user = Some(user);
		Ok(())
	}

	async fn connect(&mut self, id: Option<String>) -> Result<()> {
		let credential = self.credential.clone().ok_or(CliError::NotLoggedIn)?;
		let session_id = self
			.base
			.session_id
			.clone()
			.or(id)
			.ok_or_else(|| CliError::Usage("please pass a session id to connect".into()))?;

		self.close_session().await;

		self.print(format!("Opening connection to {session_id}..."));
		let mut config = self.base.clone().with_session_id(session_id);
		config.credential = Some(credential);

		let session = Arc::new((self.sessions)(config)?);
		session.connect().await?;

		let slug = session.descriptor().map(|d| d.slug).unwrap_or_default();
		self.print(format!("Connected to {}", slug.green()));
		self.session = Some(session);
		Ok(())
	}

	async fn attach(&mut self, service: String) -> Result<()> {
		let session = Arc::clone(self.open_session()?);
		if !is_known_service(&service) {
			return Err(CliError::UnknownService(service));
		}
		if self.attachments.get(&service).is_some_and(|task| !task.is_finished()) {
			return Err(CliError::AlreadyAttached(service));
		}

		self.print(format!("Attaching to {service} channel..."));
		let mut subscription = session.attach(&service).await?;
		let out = self.out.clone();
		let label = format!("({service})").cyan().to_string();
		let task = tokio::spawn(async move {
			while let Some(event) = subscription.recv().await {
				if out.send(format!("{label} {event}")).is_err() {
					break;
				}
			}
		});
		self.attachments.insert(service.clone(), task);
		self.print(format!("Attached to {service}."));
		Ok(())
	}

	fn detach(&mut self, service: &str) -> Result<()> {
		let session = Arc::clone(self.open_session()?);
		let Some(task) = self.attachments.remove(service) else {
			return Err(CliError::NotAttached(service.to_string()));
		};
		self.print(format!("Detaching from {service} channel..."));
		let removed = session.detach(service);
		task.abort();
		debug!(service, removed, "attachment removed");
		self.print(format!("Detached from {service}."));
		Ok(())
	}

	/// Closes the current session and drops its attachments. Returns false if there was none.
	async fn close_session(&mut self) -> bool {
		for (_, task) in self.attachments.drain() {
			task.abort();
		}
		let Some(session) = self.session.take() else {
			return false;
		};
		self.print("Closing session...");
		session.close().await;
		self.print("Session closed.");
		true
	}

	fn list_channels(&self) {
		let open = self.session.as_ref().map(|s| s.open_channels()).unwrap_or_default();
		let attached = self.attached();
		for service in SERVICES {
			let mut tags = Vec::new();
			if open.iter().any(|name| name == service) {
				tags.push("open");
			}
			if attached.iter().any(|name| name == service) {
				tags.push("attached");
			}
			if tags.is_empty() {
				self.print(format!("  {service}"));
			} else {
				self.print(format!("  {service} {}", format!("({})", tags.join(", ")).dimmed()));
			}
		}
	}

	async fn command(&mut self, service: String, payload: Value) -> Result<()> {
		let session = Arc::clone(self.open_session()?);
		if !is_known_service(&service) {
			return Err(CliError::UnknownService(service));
		}

		self.print(format!("Running {payload} on {service} channel."));
		let reply = session.command(&service, payload).await?;
		if is_blank(&reply) {
			self.print("Ran command successfully.");
		} else {
			self.print(reply.to_string());
		}
		Ok(())
	}
}

fn is_blank(reply: &Value) -> bool {
	match reply {
		Value::Null => true,
		Value::Object(map) => map.is_empty(),
		_ => false,
	}
}
