use std::cmp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use log::info;

use crate::common::{millis, CameraRegistry, Endpoints, Options, SessionToken};
use crate::error::TesterError;
use crate::rest_api::{PlaybackStream, Transport};



/// How far past the start marker the live window reaches.
pub const WINDOW_LENGTH: &str = "+300000";

#[derive(Clone)]
#[derive(Debug, PartialEq, Eq)]
pub struct PlaybackParameters {
	pub camera_id: String,
	pub session_start: u64,
	pub window_length: &'static str,
	pub index: bool,
	pub token: String,
}

impl PlaybackParameters {
	pub fn new(camera_id: &str, session_start: u64, token: &SessionToken) -> Self {
		Self {
			camera_id: camera_id.to_string(),
			session_start,
			window_length: WINDOW_LENGTH,
			index: true,
			token: token.as_str().to_string(),
		}
	}

	pub fn query(&self) -> Vec<(&'static str, String)> {
		vec![
			("id", self.camera_id.clone()),
			("start_timestamp", format!("stream_{}", self.session_start)),
			("end_timestamp", self.window_length.to_string()),
			("index", self.index.to_string()),
			("A", self.token.clone()),
		]
	}
}

/// Opens live playback streams for cameras in the registry.
pub struct PlaybackRequestor<'a, T: Transport> {
	transport: &'a T,
	endpoints: &'a Endpoints,
	cameras: &'a CameraRegistry,
	options: Options,
	last_start: AtomicU64,
}

impl<'a, T: Transport> PlaybackRequestor<'a, T> {
	pub fn new(transport: &'a T, endpoints: &'a Endpoints, cameras: &'a CameraRegistry, options: Options) -> Self {
		Self {
			transport,
			endpoints,
			cameras,
			options,
			last_start: AtomicU64::new(0),
		}
	}

	/// Requests the live feed of `camera_name` starting now. On success the caller owns
	/// the returned stream and must close it.
	pub async fn open_stream(&self, token: &SessionToken, camera_name: &str) -> Result<T::Stream, TesterError> {
		let camera_id = self.cameras.get(camera_name)
			.ok_or_else(|| TesterError::UnknownCamera(camera_name.to_string()))?;
		let params = PlaybackParameters::new(camera_id, self.next_start_marker(), token);

		if self.options.verbose {
			info!("Making playback request for {}", camera_name);
		}
		let start = Instant::now();
		let mut stream = self.transport.get_stream(&self.endpoints.playback, &params.query()).await?;
		if self.options.verbose {
			info!("{} playback request took {}ms", camera_name, millis(start.elapsed()));
		}

		let status = stream.status();
		if status != 200 {
			stream.close();
			return Err(TesterError::Playback { camera: camera_name.to_string(), status });
		}
		Ok(stream)
	}

	// Unix seconds, bumped past the previous marker so a quick reconnect never replays a window.
	fn next_start_marker(&self) -> u64 {
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|since| since.as_secs())
			.unwrap_or_default();
		let bump = |last: u64| cmp::max(now, last + 1);
		match self.last_start.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(bump(last))) {
			Ok(previous) | Err(previous) => bump(previous),
		}
	}
}
