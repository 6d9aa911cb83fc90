use std::fmt;
use std::time::Duration;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};



pub type CameraName = String;
pub type CameraId = String;

pub const AUTHENTICATE_URL: &str = "https://login.eagleeyenetworks.com/g/aaa/authenticate";
pub const AUTHORIZE_URL: &str = "https://login.eagleeyenetworks.com/g/aaa/authorize";
pub const PLAYBACK_URL: &str = "https://login.eagleeyenetworks.com/asset/play/video.flv";

#[derive(Clone)]
#[derive(Debug)]
pub struct Credentials {
	pub identity: String,
	pub secret: String,
	pub api_token: String,
}

/// Knobs shared by every component, fixed at construction.
#[derive(Clone, Copy)]
#[derive(Debug, Default)]
pub struct Options {
	/// Log the duration of every request and the waits between latency runs.
	pub verbose: bool,
}

#[derive(Clone)]
#[derive(Debug, PartialEq, Eq)]
#[derive(Deserialize)]
#[serde(default)]
pub struct Endpoints {
	pub authenticate: String,
	pub authorize: String,
	pub playback: String,
}

impl Default for Endpoints {
	fn default() -> Self {
		Self {
			authenticate: AUTHENTICATE_URL.to_string(),
			authorize: AUTHORIZE_URL.to_string(),
			playback: PLAYBACK_URL.to_string(),
		}
	}
}

/// Short-lived key returned by the authorize call. Empty when the platform handed none back.
#[derive(Clone)]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
	pub fn new(value: impl Into<String>) -> Self {
		SessionToken(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}



/// Camera names mapped to platform ids, iterated in the order they were added.
#[derive(Clone)]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CameraRegistry {
	cameras: Vec<(CameraName, CameraId)>,
}

impl CameraRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a camera, or re-points an existing name without changing its position.
	pub fn insert(&mut self, name: impl Into<CameraName>, id: impl Into<CameraId>) {
		let name = name.into();
		let id = id.into();
		match self.cameras.iter_mut().find(|(existing, _)| *existing == name) {
			Some(entry) => entry.1 = id,
			None => self.cameras.push((name, id)),
		}
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.cameras.iter()
			.find(|(existing, _)| existing == name)
			.map(|(_, id)| id.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.cameras.iter().map(|(name, _)| name.as_str())
	}

	pub fn is_empty(&self) -> bool {
		self.cameras.is_empty()
	}
}

impl<N: Into<CameraName>, I: Into<CameraId>> FromIterator<(N, I)> for CameraRegistry {
	fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
		let mut registry = CameraRegistry::new();
		for (name, id) in iter {
			registry.insert(name, id);
		}
		registry
	}
}

struct CameraRegistryVisitor;

impl<'de> Visitor<'de> for CameraRegistryVisitor {
	type Value = CameraRegistry;

	fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
		formatter.write_str("a map of camera names to camera ids")
	}

	fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
		let mut registry = CameraRegistry::new();
		while let Some((name, id)) = access.next_entry::<String, String>()? {
			registry.insert(name, id);
		}
		Ok(registry)
	}
}

// A HashMap would lose the file order, which is also the report order.
impl<'de> Deserialize<'de> for CameraRegistry {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_map(CameraRegistryVisitor)
	}
}



/// Whole milliseconds, truncated.
pub fn millis(duration: Duration) -> u64 {
	duration.as_millis() as u64
}

/// Formats `value` with comma thousands separators, e.g. `25,480`.
pub fn with_separators(value: u64) -> String {
	let digits = value.to_string();
	let mut out = String::with_capacity(digits.len() + digits.len() / 3);
	for (i, c) in digits.chars().enumerate() {
		if i > 0 && (digits.len() - i) % 3 == 0 {
			out.push(',');
		}
		out.push(c);
	}
	out
}
