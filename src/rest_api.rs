use std::cmp;
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::error::TransportError;



/// What came back from a form POST.
#[derive(Clone)]
#[derive(Debug, Default)]
pub struct FormResponse {
	pub status: u16,
	pub body: Bytes,
	pub cookies: HashMap<String, String>,
}

impl FormResponse {
	pub fn is_success(&self) -> bool {
		self.status == 200
	}

	pub fn json(&self) -> Result<Value, TransportError> {
		Ok(serde_json::from_slice(&self.body)?)
	}
}

/// A streamed response body. Callers own it and must `close` it once they are done.
#[async_trait]
pub trait PlaybackStream: Send {
	fn status(&self) -> u16;

	/// Next block of exactly `size` bytes, shorter only at the end of the body.
	async fn next_chunk(&mut self, size: usize) -> Result<Option<Bytes>, TransportError>;

	async fn read_exact(&mut self, len: usize) -> Result<Bytes, TransportError>;

	fn close(&mut self);
}

#[async_trait]
pub trait Transport: Send + Sync {
	type Stream: PlaybackStream;

	async fn post_form(&self, url: &str, form: &[(String, String)], headers: &[(&str, &str)]) -> Result<FormResponse, TransportError>;

	/// Starts a GET and returns as soon as the headers are in; the body is read lazily.
	async fn get_stream(&self, url: &str, query: &[(&str, String)]) -> Result<Self::Stream, TransportError>;
}



pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new() -> Result<Self, TransportError> {
		let client = reqwest::Client::builder()
			.user_agent(concat!("eagle-eye-tester/", env!("CARGO_PKG_VERSION")))
			.build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl Transport for HttpTransport {
	type Stream = HttpStream;

	async fn post_form(&self, url: &str, form: &[(String, String)], headers: &[(&str, &str)]) -> Result<FormResponse, TransportError> {
		let mut request = self.client.post(url).form(form);
		for (name, value) in headers {
			request = request.header(*name, *value);
		}
		let response = request.send().await?;

		let status = response.status().as_u16();
		let cookies = response.cookies()
			.map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
			.collect();
		let body = response.bytes().await?;
		Ok(FormResponse { status, body, cookies })
	}

	async fn get_stream(&self, url: &str, query: &[(&str, String)]) -> Result<HttpStream, TransportError> {
		let response = self.client.get(url).query(query).send().await?;
		Ok(HttpStream {
			status: response.status().as_u16(),
			response: Some(response),
			pending: BytesMut::new(),
		})
	}
}

/// Re-slices whatever the network hands us into the block sizes callers ask for.
pub struct HttpStream {
	status: u16,
	response: Option<reqwest::Response>,
	pending: BytesMut,
}

impl HttpStream {
	async fn fill(&mut self, wanted: usize) -> Result<(), TransportError> {
		while self.pending.len() < wanted {
			let Some(response) = self.response.as_mut() else {
				break;
			};
			match response.chunk().await? {
				Some(bytes) => self.pending.extend_from_slice(&bytes),
				None => {
					self.response = None;
				}
			}
		}
		Ok(())
	}
}

#[async_trait]
impl PlaybackStream for HttpStream {
	fn status(&self) -> u16 {
		self.status
	}

	async fn next_chunk(&mut self, size: usize) -> Result<Option<Bytes>, TransportError> {
		self.fill(size).await?;
		if self.pending.is_empty() {
			return Ok(None);
		}
		let len = cmp::min(size, self.pending.len());
		Ok(Some(self.pending.split_to(len).freeze()))
	}

	async fn read_exact(&mut self, len: usize) -> Result<Bytes, TransportError> {
		self.fill(len).await?;
		if self.pending.len() < len {
			return Err(TransportError::UnexpectedEof { wanted: len, got: self.pending.len() });
		}
		Ok(self.pending.split_to(len).freeze())
	}

	fn close(&mut self) {
		// Dropping the response tears down the connection.
		self.response = None;
		self.pending.clear();
	}
}
