//! Configuration hot reload.
//!
//! The watcher polls the config file on a fixed interval and republishes the
//! snapshot through [`Server::load_config`] when the modification time moves
//! forward. The initial load is strict; once running, a broken file keeps
//! the last good snapshot. A missing file installs the built-in default
//! exactly once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use itertools::{EitherOrBoth, Itertools};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ProcessorConfig;
use crate::server::Server;

pub struct ConfigWatcher {
	path: PathBuf,
	server: Arc<Server>,
	interval: Duration,
	last_modified: Option<SystemTime>,
	last_raw: String,
	default_mode: bool,
}

impl ConfigWatcher {
	pub fn new(path: impl Into<PathBuf>, server: Arc<Server>, interval: Duration) -> Self {
		Self {
			path: path.into(),
			server,
			interval,
			last_modified: None,
			last_raw: String::new(),
			default_mode: false,
		}
	}

	/// Loads the configuration once, strictly: a missing file installs the
	/// default, anything else must parse.
	pub async fn load_initial(&mut self) -> anyhow::Result<()> {
		if fs_err::tokio::metadata(&self.path).await.is_err() {
			info!(path = %self.path.display(), "config file not found, using default configuration");
			self
				.server
				.load_config(Arc::new(ProcessorConfig::default()))
				.await?;
			self.default_mode = true;
			return Ok(());
		}
		self.reload().await
	}

	/// Runs the poll loop until `shutdown` changes.
	pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = tokio::time::interval(self.interval);
		// The first tick fires immediately; the initial load already ran.
		ticker.tick().await;
		loop {
			tokio::select! {
				_ = shutdown.changed() => {
					debug!("config watcher shutting down");
					return;
				},
				_ = ticker.tick() => self.tick().await,
			}
		}
	}

	async fn tick(&mut self) {
		if fs_err::tokio::metadata(&self.path).await.is_err() {
			if !self.default_mode {
				info!(path = %self.path.display(), "config file disappeared, using default configuration");
				if let Err(err) = self
					.server
					.load_config(Arc::new(ProcessorConfig::default()))
					.await
				{
					warn!("failed to load default configuration: {err}");
					return;
				}
				self.default_mode = true;
				self.last_modified = None;
				self.last_raw = String::new();
			}
			return;
		}
		if let Err(err) = self.reload().await {
			warn!(
				path = %self.path.display(),
				"failed to reload configuration, keeping the previous snapshot: {err}"
			);
		}
	}

	async fn reload(&mut self) -> anyhow::Result<()> {
		let metadata = fs_err::tokio::metadata(&self.path).await?;
		let modified = metadata.modified()?;
		if self.last_modified.is_some_and(|last| modified <= last) {
			return Ok(());
		}

		let raw = fs_err::tokio::read_to_string(&self.path).await?;
		let config = ProcessorConfig::from_yaml(&raw)?;
		if tracing::enabled!(tracing::Level::DEBUG) {
			self.log_diff(&raw);
		}
		self.server.load_config(config.clone()).await?;

		self.last_modified = Some(modified);
		self.last_raw = raw;
		self.default_mode = false;
		info!(uuid = %config.uuid, "loaded configuration");
		Ok(())
	}

	fn log_diff(&self, new_raw: &str) {
		for (i, pair) in self
			.last_raw
			.lines()
			.zip_longest(new_raw.lines())
			.enumerate()
		{
			let (old, new) = match pair {
				EitherOrBoth::Both(old, new) => (old, new),
				EitherOrBoth::Left(old) => (old, ""),
				EitherOrBoth::Right(new) => ("", new),
			};
			if old.trim() != new.trim() {
				debug!("config line {} changed: {:?} -> {:?}", i + 1, old.trim(), new.trim());
			}
		}
	}
}
