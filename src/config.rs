use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde_json::Value;
use url::Url;

use log::debug;

use crate::common::{CameraRegistry, Credentials, Endpoints};
use crate::profiler::DEFAULT_DELAY_BETWEEN_RUNS;



/// Everything the tester needs, validated.
#[derive(Clone)]
#[derive(Debug)]
pub struct Config {
	pub credentials: Credentials,
	pub cameras: CameraRegistry,
	pub delay_between_runs: Duration,
	pub endpoints: Endpoints,
}

pub const PASSWORD_PROMPT: &str = "Please enter Eagle Eye password:";

// Fields are optional here so each omission gets its own message.
#[derive(Deserialize)]
struct RawConfig {
	email: Option<String>,
	password: Option<String>,
	auth_token: Option<String>,
	cameras: Option<CameraRegistry>,
	delay_between_runs_seconds: Option<Value>,
	#[serde(default)]
	endpoints: Endpoints,
}

/// Reads the JSON config at `path`, asking on the terminal for the password if the file has none.
pub fn load(path: &Path) -> anyhow::Result<Config> {
	load_with(path, prompt_password)
}

pub fn load_with(path: &Path, prompt: impl FnOnce() -> anyhow::Result<String>) -> anyhow::Result<Config> {
	let text = match fs::read_to_string(path) {
		Ok(text) => text,
		Err(err) if err.kind() == io::ErrorKind::NotFound => {
			bail!("Could not find config file {}", path.display());
		},
		Err(err) => {
			return Err(err).with_context(|| format!("Could not read config file {}", path.display()));
		},
	};
	debug!("Read config from {}", path.display());
	parse(&text, prompt)
}

pub fn parse(text: &str, prompt: impl FnOnce() -> anyhow::Result<String>) -> anyhow::Result<Config> {
	let raw: RawConfig = serde_json::from_str(text)
		.map_err(|err| anyhow!("Could not parse config: {}", err))?;

	let Some(identity) = raw.email else {
		bail!("No user found in config.");
	};
	let Some(api_token) = raw.auth_token else {
		bail!("No auth_token found in config.");
	};
	let Some(cameras) = raw.cameras else {
		bail!("No cameras found in config.");
	};
	let delay_between_runs = match raw.delay_between_runs_seconds {
		None => DEFAULT_DELAY_BETWEEN_RUNS,
		Some(value) => match value.as_u64() {
			Some(seconds) => Duration::from_secs(seconds),
			None => bail!("Invalid value for delay_between_runs_seconds {}. Must be number >= 0.", value),
		},
	};
	for (name, endpoint) in [
		("authenticate", &raw.endpoints.authenticate),
		("authorize", &raw.endpoints.authorize),
		("playback", &raw.endpoints.playback),
	] {
		Url::parse(endpoint).with_context(|| format!("Invalid {} endpoint {}", name, endpoint))?;
	}

	let secret = match raw.password {
		Some(password) => password,
		None => prompt()?,
	};

	Ok(Config {
		credentials: Credentials { identity, secret, api_token },
		cameras,
		delay_between_runs,
		endpoints: raw.endpoints,
	})
}

// Terminal echo is off while the password is typed.
fn prompt_password() -> anyhow::Result<String> {
	rpassword::prompt_password(PASSWORD_PROMPT).context("Could not read password")
}



#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;

	fn no_prompt() -> anyhow::Result<String> {
		panic!("password prompt should not be needed");
	}

	const FULL: &str = r#"{
		"email": "ops@example.com",
		"password": "hunter2",
		"auth_token": "api-123",
		"cameras": {"lobby": "1000aaaa", "dock": "1000bbbb"},
		"delay_between_runs_seconds": 5
	}"#;

	#[test]
	fn full_config() {
		let config = parse(FULL, no_prompt).unwrap();
		assert_eq!(config.credentials.identity, "ops@example.com");
		assert_eq!(config.credentials.secret, "hunter2");
		assert_eq!(config.credentials.api_token, "api-123");
		assert_eq!(config.cameras.names().collect::<Vec<_>>(), vec!["lobby", "dock"]);
		assert_eq!(config.delay_between_runs, Duration::from_secs(5));
		assert_eq!(config.endpoints, Endpoints::default());
	}

	#[test]
	fn delay_defaults_to_a_minute() {
		let config = parse(r#"{"email": "a", "password": "b", "auth_token": "c", "cameras": {}}"#, no_prompt).unwrap();
		assert_eq!(config.delay_between_runs, Duration::from_secs(60));
	}

	#[test]
	fn missing_fields_are_named() {
		let err = parse(r#"{"password": "b", "auth_token": "c", "cameras": {}}"#, no_prompt).unwrap_err();
		assert_eq!(err.to_string(), "No user found in config.");

		let err = parse(r#"{"email": "a", "password": "b", "cameras": {}}"#, no_prompt).unwrap_err();
		assert_eq!(err.to_string(), "No auth_token found in config.");

		let err = parse(r#"{"email": "a", "password": "b", "auth_token": "c"}"#, no_prompt).unwrap_err();
		assert_eq!(err.to_string(), "No cameras found in config.");
	}

	#[test]
	fn bad_delays_are_rejected() {
		for delay in ["-1", "2.5", "\"60\""] {
			let text = format!(r#"{{"email": "a", "password": "b", "auth_token": "c", "cameras": {{}}, "delay_between_runs_seconds": {}}}"#, delay);
			let err = parse(&text, no_prompt).unwrap_err();
			assert_eq!(err.to_string(), format!("Invalid value for delay_between_runs_seconds {}. Must be number >= 0.", delay));
		}
	}

	#[test]
	fn password_is_prompted_for_when_absent() {
		let asked = Cell::new(false);
		let config = parse(r#"{"email": "a", "auth_token": "c", "cameras": {}}"#, || {
			asked.set(true);
			Ok("typed".to_string())
		}).unwrap();
		assert!(asked.get());
		assert_eq!(config.credentials.secret, "typed");
	}

	#[test]
	fn failed_prompt_aborts_loading() {
		let err = parse(r#"{"email": "a", "auth_token": "c", "cameras": {}}"#, || {
			Err(io::Error::new(io::ErrorKind::NotConnected, "no terminal")).context("Could not read password")
		}).unwrap_err();
		assert_eq!(err.to_string(), "Could not read password");
	}

	#[test]
	fn endpoints_can_be_overridden() {
		let text = r#"{"email": "a", "password": "b", "auth_token": "c", "cameras": {},
			"endpoints": {"playback": "http://127.0.0.1:8080/asset/play/video.flv"}}"#;
		let config = parse(text, no_prompt).unwrap();
		assert_eq!(config.endpoints.playback, "http://127.0.0.1:8080/asset/play/video.flv");
		assert_eq!(config.endpoints.authenticate, Endpoints::default().authenticate);

		let text = r#"{"email": "a", "password": "b", "auth_token": "c", "cameras": {}, "endpoints": {"authorize": "not a url"}}"#;
		assert!(parse(text, no_prompt).is_err());
	}

	#[test]
	fn garbage_is_a_parse_error() {
		let err = parse("{ nope", no_prompt).unwrap_err();
		assert!(err.to_string().starts_with("Could not parse config: "));
	}

	#[test]
	fn loads_from_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tester.json");
		fs::write(&path, FULL).unwrap();
		let config = load_with(&path, no_prompt).unwrap();
		assert_eq!(config.cameras.names().count(), 2);

		let missing = dir.path().join("missing.json");
		let err = load_with(&missing, no_prompt).unwrap_err();
		assert_eq!(err.to_string(), format!("Could not find config file {}", missing.display()));
	}
}
