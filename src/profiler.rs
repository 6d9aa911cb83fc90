use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use log::info;

use crate::common::{millis, with_separators, CameraRegistry, Options, SessionToken};
use crate::error::TesterError;
use crate::playback::PlaybackRequestor;
use crate::rest_api::{PlaybackStream, Transport};
use crate::session::CredentialExchange;



pub const DEFAULT_DELAY_BETWEEN_RUNS: Duration = Duration::from_secs(60);

/// First-byte latency summary for one camera, in whole milliseconds.
#[derive(Clone)]
#[derive(Debug, PartialEq, Eq)]
pub struct LatencyReport {
	pub camera: String,
	pub min_ms: u64,
	pub avg_ms: u64,
	pub median_ms: u64,
	pub max_ms: u64,
}

impl LatencyReport {
	/// `runs` is the divisor for the average; it is expected to equal `samples.len()`.
	pub fn from_samples(camera: &str, samples: &[Duration], runs: u32) -> Self {
		let mut sorted = samples.to_vec();
		sorted.sort();

		let min = sorted.first().copied().unwrap_or_default();
		let max = sorted.last().copied().unwrap_or_default();
		let median = median(&sorted);
		let total: Duration = sorted.iter().sum();
		let avg = total.checked_div(runs).unwrap_or_default();

		Self {
			camera: camera.to_string(),
			min_ms: millis(min),
			avg_ms: millis(avg),
			median_ms: millis(median),
			max_ms: millis(max),
		}
	}
}

impl fmt::Display for LatencyReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "Load time for {}:", self.camera)?;
		writeln!(f, "\tMinimum: {}ms", with_separators(self.min_ms))?;
		writeln!(f, "\tAverage: {}ms", with_separators(self.avg_ms))?;
		writeln!(f, "\tMedian:  {}ms", with_separators(self.median_ms))?;
		write!(f, "\tMaximum: {}ms", with_separators(self.max_ms))
	}
}

// Expects `sorted` in ascending order. Even counts average the middle pair.
fn median(sorted: &[Duration]) -> Duration {
	let mid = sorted.len() / 2;
	match sorted.len() {
		0 => Duration::ZERO,
		len if len % 2 == 1 => sorted[mid],
		_ => (sorted[mid - 1] + sorted[mid]) / 2,
	}
}



/// Times how long each camera takes to deliver the first byte of its live stream.
pub struct LatencyProfiler<'a, T: Transport> {
	exchange: CredentialExchange<'a, T>,
	requestor: PlaybackRequestor<'a, T>,
	cameras: &'a CameraRegistry,
	delay_between_runs: Duration,
	options: Options,
}

impl<'a, T: Transport> LatencyProfiler<'a, T> {
	pub fn new(
		exchange: CredentialExchange<'a, T>,
		requestor: PlaybackRequestor<'a, T>,
		cameras: &'a CameraRegistry,
		delay_between_runs: Duration,
		options: Options,
	) -> Self {
		Self { exchange, requestor, cameras, delay_between_runs, options }
	}

	/// Samples every camera once per round for `runs` rounds, all on one session token.
	/// Any failed request aborts the whole run.
	pub async fn run(&self, runs: u32) -> Result<Vec<LatencyReport>, TesterError> {
		if runs == 0 {
			return Err(TesterError::InvalidRuns);
		}
		if self.cameras.is_empty() {
			return Err(TesterError::NoCameras);
		}

		let token = self.exchange.session_token().await?;
		if token.is_empty() {
			return Err(TesterError::EmptyToken);
		}

		let mut load_times: Vec<(&str, Vec<Duration>)> = self.cameras.names()
			.map(|camera| (camera, Vec::with_capacity(runs as usize)))
			.collect();

		for round in 0..runs {
			if round > 0 {
				if self.options.verbose {
					info!("Waiting {}s between runs.", self.delay_between_runs.as_secs());
				}
				tokio::time::sleep(self.delay_between_runs).await;
			}
			for (camera, times) in load_times.iter_mut() {
				times.push(self.first_byte(&token, *camera).await?);
			}
		}

		Ok(load_times.iter()
			.map(|(camera, times)| LatencyReport::from_samples(camera, times, runs))
			.collect())
	}

	async fn first_byte(&self, token: &SessionToken, camera: &str) -> Result<Duration, TesterError> {
		let start = Instant::now();
		let mut stream = self.requestor.open_stream(token, camera).await?;
		let read = stream.read_exact(1).await;
		let elapsed = start.elapsed();
		stream.close();
		read?;
		Ok(elapsed)
	}
}



#[cfg(test)]
mod tests {
	use std::sync::atomic::Ordering;

	use super::*;
	use crate::common::{Credentials, Endpoints};
	use crate::rest_api::testing::{Event, Open, ScriptedTransport};

	struct Fixture {
		endpoints: Endpoints,
		credentials: Credentials,
		cameras: CameraRegistry,
	}

	impl Fixture {
		fn new(cameras: &[(&str, &str)]) -> Self {
			Self {
				endpoints: Endpoints::default(),
				credentials: Credentials {
					identity: "ops@example.com".to_string(),
					secret: "pw".to_string(),
					api_token: "api".to_string(),
				},
				cameras: cameras.iter().copied().collect(),
			}
		}

		fn profiler<'a>(&'a self, transport: &'a ScriptedTransport, delay: Duration) -> LatencyProfiler<'a, ScriptedTransport> {
			let options = Options::default();
			LatencyProfiler::new(
				CredentialExchange::new(transport, &self.endpoints, &self.credentials, options),
				PlaybackRequestor::new(transport, &self.endpoints, &self.cameras, options),
				&self.cameras,
				delay,
				options,
			)
		}
	}

	fn first_byte_after(ms: u64) -> Open {
		Open::Stream(vec![Event::Chunk { after: Duration::from_millis(ms), len: CHUNK }])
	}

	const CHUNK: usize = 4096;

	fn ms(values: &[u64]) -> Vec<Duration> {
		values.iter().map(|v| Duration::from_millis(*v)).collect()
	}

	#[test]
	fn stats_for_odd_and_even_counts() {
		let report = LatencyReport::from_samples("front", &ms(&[100, 300, 200]), 3);
		assert_eq!(report, LatencyReport { camera: "front".to_string(), min_ms: 100, avg_ms: 200, median_ms: 200, max_ms: 300 });

		let report = LatencyReport::from_samples("back", &ms(&[40, 10, 30, 20]), 4);
		assert_eq!((report.min_ms, report.median_ms, report.avg_ms, report.max_ms), (10, 25, 25, 40));
	}

	#[test]
	fn report_layout() {
		let report = LatencyReport { camera: "lobby".to_string(), min_ms: 950, avg_ms: 1200, median_ms: 1100, max_ms: 2048 };
		assert_eq!(
			report.to_string(),
			"Load time for lobby:\n\tMinimum: 950ms\n\tAverage: 1,200ms\n\tMedian:  1,100ms\n\tMaximum: 2,048ms"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn three_runs_single_camera() {
		let fixture = Fixture::new(&[("front", "1000abcd")]);
		let transport = ScriptedTransport::new();
		transport.push_login("key");
		for latency in [100, 300, 200] {
			transport.push_open(first_byte_after(latency));
		}

		let reports = fixture.profiler(&transport, Duration::ZERO).run(3).await.unwrap();

		assert_eq!(reports, vec![LatencyReport { camera: "front".to_string(), min_ms: 100, avg_ms: 200, median_ms: 200, max_ms: 300 }]);
		assert_eq!(transport.opened.load(Ordering::SeqCst), 3);
		assert_eq!(transport.closes.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn rounds_are_round_major_and_spaced() {
		let fixture = Fixture::new(&[("b-side", "2"), ("a-side", "1")]);
		let transport = ScriptedTransport::new();
		transport.push_login("key");
		for latency in [10, 20, 30, 40, 50, 60] {
			transport.push_open(first_byte_after(latency));
		}

		let reports = fixture.profiler(&transport, Duration::from_secs(60)).run(3).await.unwrap();

		let calls = transport.get_calls.lock().unwrap();
		let ids: Vec<&str> = calls.iter().map(|call| call.query["id"].as_str()).collect();
		assert_eq!(ids, vec!["2", "1", "2", "1", "2", "1"]);
		assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(60_020));
		assert_eq!(calls[4].at - calls[3].at, Duration::from_millis(60_040));

		// One token for the whole run.
		assert_eq!(transport.post_calls.lock().unwrap().len(), 2);

		assert_eq!(reports.iter().map(|r| r.camera.as_str()).collect::<Vec<_>>(), vec!["b-side", "a-side"]);
		assert_eq!((reports[0].min_ms, reports[0].avg_ms, reports[0].max_ms), (10, 30, 50));
		assert_eq!((reports[1].min_ms, reports[1].avg_ms, reports[1].max_ms), (20, 40, 60));
		for report in &reports {
			assert!(report.min_ms <= report.median_ms && report.median_ms <= report.max_ms);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn identical_timings_give_identical_reports() {
		let fixture = Fixture::new(&[("front", "1"), ("back", "2")]);
		let mut results = Vec::new();
		for _ in 0..2 {
			let transport = ScriptedTransport::new();
			transport.push_login("key");
			for latency in [120, 80, 95, 300] {
				transport.push_open(first_byte_after(latency));
			}
			results.push(fixture.profiler(&transport, Duration::from_secs(1)).run(2).await.unwrap());
		}
		assert_eq!(results[0], results[1]);
	}

	#[tokio::test(start_paused = true)]
	async fn failed_open_aborts_the_run() {
		let fixture = Fixture::new(&[("front", "1"), ("back", "2")]);
		let transport = ScriptedTransport::new();
		transport.push_login("key");
		transport.push_open(first_byte_after(10));
		transport.push_open(Open::Status(503));
		transport.push_open(first_byte_after(10));

		let err = fixture.profiler(&transport, Duration::ZERO).run(2).await.unwrap_err();

		assert!(matches!(err, TesterError::Playback { ref camera, status: 503 } if camera == "back"));
		assert_eq!(transport.get_calls.lock().unwrap().len(), 2);
		assert_eq!(transport.closes.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn empty_stream_is_a_transport_error() {
		let fixture = Fixture::new(&[("front", "1")]);
		let transport = ScriptedTransport::new();
		transport.push_login("key");
		transport.push_open(Open::Stream(vec![]));

		let err = fixture.profiler(&transport, Duration::ZERO).run(1).await.unwrap_err();
		assert!(matches!(err, TesterError::Transport(_)));
		assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn preconditions_and_empty_token() {
		let fixture = Fixture::new(&[("front", "1")]);
		let transport = ScriptedTransport::new();
		assert!(matches!(fixture.profiler(&transport, Duration::ZERO).run(0).await, Err(TesterError::InvalidRuns)));

		let empty = Fixture::new(&[]);
		assert!(matches!(empty.profiler(&transport, Duration::ZERO).run(1).await, Err(TesterError::NoCameras)));

		transport.push_post(200, r#"{"token": "abc"}"#, &[]);
		transport.push_post(200, "", &[]);
		assert!(matches!(fixture.profiler(&transport, Duration::ZERO).run(1).await, Err(TesterError::EmptyToken)));
		assert!(transport.get_calls.lock().unwrap().is_empty());
	}
}
