pub mod llm;
pub mod rerank;
pub mod search;

use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::{
	Client, Response,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde::Serialize;
use serde_json::{Map, Value};

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if !api_key.trim().is_empty() {
		headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);
	}
	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(eyre::eyre!("Default header values must be strings."));
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Connection details shared by every provider endpoint.
pub(crate) struct Endpoint<'a> {
	pub(crate) api_base: &'a str,
	pub(crate) path: &'a str,
	pub(crate) api_key: &'a str,
	pub(crate) timeout_ms: u64,
	pub(crate) default_headers: &'a Map<String, Value>,
}
impl Endpoint<'_> {
	pub(crate) fn url(&self) -> String {
		format!("{}{}", self.api_base.trim_end_matches('/'), self.path)
	}

	pub(crate) async fn post<B>(&self, body: &B) -> Result<Response>
	where
		B: Serialize + ?Sized,
	{
		let client = Client::builder().timeout(Duration::from_millis(self.timeout_ms)).build()?;
		let res = client
			.post(self.url())
			.headers(auth_headers(self.api_key, self.default_headers)?)
			.json(body)
			.send()
			.await?;

		Ok(res.error_for_status()?)
	}

	pub(crate) async fn post_json<B>(&self, body: &B) -> Result<Value>
	where
		B: Serialize + ?Sized,
	{
		Ok(self.post(body).await?.json().await?)
	}
}
