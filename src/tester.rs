use log::info;
use tokio::sync::watch;

use crate::common::Options;
use crate::config::Config;
use crate::error::TesterError;
use crate::playback::PlaybackRequestor;
use crate::profiler::{LatencyProfiler, LatencyReport};
use crate::rest_api::Transport;
use crate::session::CredentialExchange;
use crate::streamer::ReconnectingStreamer;



/// Entry points for the two commands, wiring the components to one transport and config.
pub struct Tester<T: Transport> {
	transport: T,
	config: Config,
	options: Options,
}

impl<T: Transport> Tester<T> {
	pub fn new(transport: T, config: Config, options: Options) -> Self {
		Self { transport, config, options }
	}

	#[cfg(test)]
	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Streams `camera` until `cancel` flips to `true`. Only returns an error for failures
	/// that reconnecting cannot fix.
	pub async fn run_streaming(&self, camera: &str, cancel: watch::Receiver<bool>) -> Result<(), TesterError> {
		if !self.config.cameras.contains(camera) {
			return Err(TesterError::UnknownCamera(camera.to_string()));
		}
		info!("Streaming {}. Use Ctrl+C to stop.", camera);
		let mut streamer = ReconnectingStreamer::new(self.exchange(), self.requestor(), camera, cancel);
		streamer.run().await
	}

	/// Reports are in config file order.
	pub async fn run_latency_test(&self, runs: u32) -> Result<Vec<LatencyReport>, TesterError> {
		let profiler = LatencyProfiler::new(
			self.exchange(),
			self.requestor(),
			&self.config.cameras,
			self.config.delay_between_runs,
			self.options,
		);
		profiler.run(runs).await
	}

	fn exchange(&self) -> CredentialExchange<'_, T> {
		CredentialExchange::new(&self.transport, &self.config.endpoints, &self.config.credentials, self.options)
	}

	fn requestor(&self) -> PlaybackRequestor<'_, T> {
		PlaybackRequestor::new(&self.transport, &self.config.endpoints, &self.config.cameras, self.options)
	}
}
