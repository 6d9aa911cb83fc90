use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use log::{debug, error, info, warn};

use crate::common::{millis, with_separators};
use crate::error::TesterError;
use crate::playback::PlaybackRequestor;
use crate::rest_api::{PlaybackStream, Transport};
use crate::session::CredentialExchange;



/// Bytes asked of the stream per read.
pub const CHUNK_SIZE: usize = 1024 * 10;

/// A chunk taking at least this long to arrive gets reported.
pub const SLOW_CHUNK_THRESHOLD: Duration = Duration::from_millis(5000);

/// Chunks between running-total progress lines.
pub const PROGRESS_INTERVAL: u64 = 100;

/// Wait before the next attempt after `failures` consecutive failed opens: 1s, 2s, 4s, ...
pub fn backoff_delay(failures: u32) -> Duration {
	Duration::from_secs(2u64.saturating_pow(failures))
}

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub struct ChunkReadSample {
	pub sequence: u64,
	pub byte_count: usize,
	pub elapsed: Duration,
}

impl ChunkReadSample {
	pub fn is_slow(&self) -> bool {
		self.elapsed >= SLOW_CHUNK_THRESHOLD
	}
}

/// Numbers chunks and times the gap before each one, starting from when the stream opened.
pub struct ChunkTimer {
	opened_at: Instant,
	last_at: Instant,
	chunks: u64,
	total_bytes: u64,
}

impl ChunkTimer {
	pub fn start(now: Instant) -> Self {
		Self {
			opened_at: now,
			last_at: now,
			chunks: 0,
			total_bytes: 0,
		}
	}

	pub fn record(&mut self, byte_count: usize, now: Instant) -> ChunkReadSample {
		self.chunks += 1;
		self.total_bytes += byte_count as u64;
		let elapsed = now.saturating_duration_since(self.last_at);
		self.last_at = now;
		ChunkReadSample { sequence: self.chunks, byte_count, elapsed }
	}

	pub fn chunks(&self) -> u64 {
		self.chunks
	}

	pub fn total_bytes(&self) -> u64 {
		self.total_bytes
	}

	pub fn since_open(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.opened_at)
	}

	/// Running totals, due after every `PROGRESS_INTERVAL`th chunk.
	pub fn progress(&self, now: Instant) -> Option<Progress> {
		if self.chunks == 0 || self.chunks % PROGRESS_INTERVAL != 0 {
			return None;
		}
		Some(Progress {
			chunks: self.chunks,
			total_bytes: self.total_bytes,
			since_open: self.since_open(now),
		})
	}
}

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub struct Progress {
	pub chunks: u64,
	pub total_bytes: u64,
	pub since_open: Duration,
}

#[derive(Clone)]
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
	/// The server closed the stream.
	Finished,
	/// Reading failed mid-stream.
	Interrupted(String),
	Cancelled,
}

#[derive(Clone)]
#[derive(Debug)]
pub struct SessionSummary {
	pub chunks: u64,
	pub total_bytes: u64,
	pub duration: Duration,
	pub slow_chunks: u64,
	pub last_slow_chunk: Option<ChunkReadSample>,
	pub progress_lines: u64,
	pub last_progress: Option<Progress>,
	pub end: SessionEnd,
}

/// Resolves once `true` is sent on the channel. Never resolves if the sender is gone.
pub async fn cancelled(mut cancel: watch::Receiver<bool>) {
	let result = cancel.wait_for(|stop| *stop).await.map(|_| ());
	if result.is_err() {
		std::future::pending::<()>().await;
	}
}

/// Reads `stream` to its end in `CHUNK_SIZE` blocks, reporting slow chunks and progress as it goes.
/// Does not close the stream.
pub async fn read_session<S: PlaybackStream>(stream: &mut S, cancel: &watch::Receiver<bool>) -> SessionSummary {
	let mut timer = ChunkTimer::start(Instant::now());
	let mut slow_chunks = 0;
	let mut last_slow_chunk = None;
	let mut progress_lines = 0;
	let mut last_progress = None;

	let end = loop {
		let next = tokio::select! {
			biased;
			_ = cancelled(cancel.clone()) => None,
			next = stream.next_chunk(CHUNK_SIZE) => Some(next),
		};
		let Some(next) = next else {
			break SessionEnd::Cancelled;
		};

		match next {
			Ok(Some(chunk)) => {
				let sample = timer.record(chunk.len(), Instant::now());
				if sample.is_slow() {
					warn!("Chunk {} took {}ms ({} bytes)", sample.sequence, with_separators(millis(sample.elapsed)), sample.byte_count);
					slow_chunks += 1;
					last_slow_chunk = Some(sample);
				}
				if let Some(progress) = timer.progress(Instant::now()) {
					info!(
						"Read {} bytes in {}ms",
						with_separators(progress.total_bytes),
						with_separators(millis(progress.since_open))
					);
					progress_lines += 1;
					last_progress = Some(progress);
				}
			},
			Ok(None) => break SessionEnd::Finished,
			Err(err) => {
				error!("Stream interrupted after chunk {}: {}", timer.chunks(), err);
				break SessionEnd::Interrupted(err.to_string());
			},
		}
	};

	SessionSummary {
		chunks: timer.chunks(),
		total_bytes: timer.total_bytes(),
		duration: timer.since_open(Instant::now()),
		slow_chunks,
		last_slow_chunk,
		progress_lines,
		last_progress,
		end,
	}
}



pub enum StreamerState<S> {
	Authenticating,
	Streaming(S),
	BackoffWait(Duration),
	Cancelled,
}

/// Keeps one camera's live stream open forever, re-authenticating for every new connection.
pub struct ReconnectingStreamer<'a, T: Transport> {
	exchange: CredentialExchange<'a, T>,
	requestor: PlaybackRequestor<'a, T>,
	camera: &'a str,
	cancel: watch::Receiver<bool>,
	failures: u32,
}

impl<'a, T: Transport> ReconnectingStreamer<'a, T> {
	pub fn new(exchange: CredentialExchange<'a, T>, requestor: PlaybackRequestor<'a, T>, camera: &'a str, cancel: watch::Receiver<bool>) -> Self {
		Self {
			exchange,
			requestor,
			camera,
			cancel,
			failures: 0,
		}
	}

	/// Consecutive failed opens since the last successful one.
	#[cfg(test)]
	pub fn failures(&self) -> u32 {
		self.failures
	}

	/// Runs until cancelled (`Ok`) or until credentials stop working (`Err`).
	pub async fn run(&mut self) -> Result<(), TesterError> {
		let mut state = StreamerState::Authenticating;
		loop {
			state = self.step(state).await?;
			if let StreamerState::Cancelled = state {
				info!("Stopping streaming.");
				return Ok(());
			}
		}
	}

	pub async fn step(&mut self, state: StreamerState<T::Stream>) -> Result<StreamerState<T::Stream>, TesterError> {
		match state {
			StreamerState::Authenticating => self.connect().await,
			StreamerState::Streaming(stream) => {
				let summary = self.stream(stream).await;
				match summary.end {
					SessionEnd::Cancelled => Ok(StreamerState::Cancelled),
					_ => Ok(StreamerState::Authenticating),
				}
			},
			StreamerState::BackoffWait(delay) => {
				tokio::select! {
					biased;
					_ = cancelled(self.cancel.clone()) => Ok(StreamerState::Cancelled),
					_ = tokio::time::sleep(delay) => Ok(StreamerState::Authenticating),
				}
			},
			StreamerState::Cancelled => Ok(StreamerState::Cancelled),
		}
	}

	async fn connect(&mut self) -> Result<StreamerState<T::Stream>, TesterError> {
		let token = tokio::select! {
			biased;
			_ = cancelled(self.cancel.clone()) => return Ok(StreamerState::Cancelled),
			token = self.exchange.session_token() => token?,
		};
		if token.is_empty() {
			error!("Could not get auth key.");
			return Err(TesterError::EmptyToken);
		}

		let opened = tokio::select! {
			biased;
			_ = cancelled(self.cancel.clone()) => return Ok(StreamerState::Cancelled),
			opened = self.requestor.open_stream(&token, self.camera) => opened,
		};
		match opened {
			Ok(stream) => {
				self.failures = 0;
				Ok(StreamerState::Streaming(stream))
			},
			Err(err) if err.is_retryable_open_failure() => {
				let delay = backoff_delay(self.failures);
				self.failures += 1;
				warn!("Fetch failed ({}), sleeping for {}s before retrying.", err, delay.as_secs());
				Ok(StreamerState::BackoffWait(delay))
			},
			Err(err) => Err(err),
		}
	}

	async fn stream(&mut self, mut stream: T::Stream) -> SessionSummary {
		let summary = read_session(&mut stream, &self.cancel).await;
		stream.close();
		info!(
			"Playback up for {}ms with {} bytes read in {} chunks, {} slow",
			with_separators(millis(summary.duration)),
			with_separators(summary.total_bytes),
			with_separators(summary.chunks),
			summary.slow_chunks
		);
		if let Some(slow) = summary.last_slow_chunk {
			debug!("Last slow chunk was {} after {}ms", slow.sequence, with_separators(millis(slow.elapsed)));
		}
		if let Some(progress) = summary.last_progress {
			debug!("{} progress lines, last at chunk {}", summary.progress_lines, progress.chunks);
		}
		if let SessionEnd::Interrupted(reason) = &summary.end {
			warn!("Reconnecting after interrupted stream: {}", reason);
		}
		summary
	}
}
