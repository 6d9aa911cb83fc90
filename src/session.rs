use serde_json::Value;
use tokio::time::Instant;

use log::info;

use crate::common::{millis, Credentials, Endpoints, Options, SessionToken};
use crate::error::{AuthPhase, TesterError};
use crate::rest_api::{FormResponse, Transport};



/// Cookie the authorize endpoint hands the session key back in.
pub const AUTH_KEY_COOKIE: &str = "auth_key";

const AUTH_HEADER: &str = "Authentication";

/// Trades the long-lived account credentials for a session key.
pub struct CredentialExchange<'a, T: Transport> {
	transport: &'a T,
	endpoints: &'a Endpoints,
	credentials: &'a Credentials,
	options: Options,
}

impl<'a, T: Transport> CredentialExchange<'a, T> {
	pub fn new(transport: &'a T, endpoints: &'a Endpoints, credentials: &'a Credentials, options: Options) -> Self {
		Self { transport, endpoints, credentials, options }
	}

	/// Runs both halves of the handshake. The token may be empty; callers decide what that means.
	pub async fn session_token(&self) -> Result<SessionToken, TesterError> {
		let intermediate = self.authenticate().await?;
		self.authorize(&intermediate).await
	}

	pub async fn authenticate(&self) -> Result<Value, TesterError> {
		let form = vec![
			("username".to_string(), self.credentials.identity.clone()),
			("password".to_string(), self.credentials.secret.clone()),
		];
		if self.options.verbose {
			info!("Making authentication request");
		}
		let response = self.post(AuthPhase::Authenticate, &self.endpoints.authenticate, &form).await?;
		Ok(response.json()?)
	}

	pub async fn authorize(&self, intermediate: &Value) -> Result<SessionToken, TesterError> {
		let form = form_fields(intermediate);
		if self.options.verbose {
			info!("Making authorize request");
		}
		let response = self.post(AuthPhase::Authorize, &self.endpoints.authorize, &form).await?;
		let token = response.cookies.get(AUTH_KEY_COOKIE).cloned().unwrap_or_default();
		Ok(SessionToken::new(token))
	}

	async fn post(&self, phase: AuthPhase, url: &str, form: &[(String, String)]) -> Result<FormResponse, TesterError> {
		let headers = [(AUTH_HEADER, self.credentials.api_token.as_str())];
		let start = Instant::now();
		let response = self.transport.post_form(url, form, &headers).await?;
		if self.options.verbose {
			info!("{} request took {}ms", phase, millis(start.elapsed()));
		}
		if !response.is_success() {
			return Err(TesterError::Auth { phase, status: response.status });
		}
		Ok(response)
	}
}

/// Flattens the authenticate reply into form fields. Strings go through as-is, anything else as JSON text.
fn form_fields(body: &Value) -> Vec<(String, String)> {
	let Some(object) = body.as_object() else {
		return Vec::new();
	};
	object.iter()
		.map(|(key, value)| {
			let value = match value {
				Value::String(s) => s.clone(),
				other => other.to_string(),
			};
			(key.clone(), value)
		})
		.collect()
}
