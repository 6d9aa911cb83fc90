use std::fmt;

use thiserror::Error;



/// Which half of the credential exchange failed.
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub enum AuthPhase {
	Authenticate,
	Authorize,
}

impl fmt::Display for AuthPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AuthPhase::Authenticate => write!(f, "Authentication"),
			AuthPhase::Authorize => write!(f, "Authorization"),
		}
	}
}

/// Failures of the HTTP layer itself, as opposed to unexpected status codes.
#[derive(Error, Debug)]
pub enum TransportError {
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("Could not decode response body: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("Stream ended after {got} of {wanted} bytes")]
	UnexpectedEof { wanted: usize, got: usize },

	#[error("Connection error: {0}")]
	Connection(String),
}

#[derive(Error, Debug)]
pub enum TesterError {
	#[error("{phase} failed with code {status}")]
	Auth { phase: AuthPhase, status: u16 },

	#[error("Could not get auth key.")]
	EmptyToken,

	#[error("Playback for {camera} failed with code {status}")]
	Playback { camera: String, status: u16 },

	#[error("No such camera {0}")]
	UnknownCamera(String),

	#[error("Invalid number of runs. Must be > 0.")]
	InvalidRuns,

	#[error("No cameras configured.")]
	NoCameras,

	#[error(transparent)]
	Transport(#[from] TransportError),
}

impl TesterError {
	/// Failures to open a playback stream that the streamer recovers from by backing off.
	pub fn is_retryable_open_failure(&self) -> bool {
		matches!(self, TesterError::Playback { .. } | TesterError::Transport(_))
	}
}
