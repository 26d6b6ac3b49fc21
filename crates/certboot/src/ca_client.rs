//! HTTP transport to the CA's `puppet-ca`-shaped REST routes.
//!
//! Peer verification is disabled only for the very first CA-bundle fetch (there is no
//! trust material yet); every other call goes through a client built with the freshly
//! learned CA bundle installed as its trust store, mirroring the trust-state-dependent
//! client construction in the core library's certificate client.

use std::cell::RefCell;
use std::time::SystemTime;

use reqwest::blocking::Client;

use crate::error::{Error, Result};

/// The outcome of one CA call, already classified into the three shapes every caller
/// cares about: a usable body, a "nothing changed" signal, or an HTTP-level failure.
#[derive(Clone)]
pub enum CaResponse {
	Ok(Vec<u8>),
	NotModified,
	Status { status: u16, reason: String, body: String },
}

/// The CA routes the state machine speaks to. One production implementation
/// (`HttpCaClient`); tests substitute an in-memory fake.
pub trait CaClient {
	fn get_ca_certificate(&self) -> Result<CaResponse>;
	fn get_crl(&self, if_modified_since: Option<SystemTime>) -> Result<CaResponse>;
	fn submit_csr(&self, certname: &str, csr_pem: &str) -> Result<CaResponse>;
	fn get_client_cert(&self, certname: &str) -> Result<CaResponse>;
	/// Install the learned CA bundle as the trust store for all subsequent calls.
	fn trust_ca_bundle(&self, pem_bundle: &[u8]) -> Result<()>;
}

pub struct HttpCaClient {
	base_url: String,
	insecure: Client,
	verified: RefCell<Option<Client>>,
}

impl HttpCaClient {
	pub fn new(base_url: impl Into<String>) -> Result<Self> {
		let insecure = Client::builder()
			.danger_accept_invalid_certs(true)
			.build()?;
		Ok(HttpCaClient {
			base_url: base_url.into(),
			insecure,
			verified: RefCell::new(None),
		})
	}

	fn client_for(&self, verify_peer: bool) -> Result<Client> {
		if !verify_peer {
			return Ok(self.insecure.clone());
		}
		self.verified.borrow().clone().ok_or_else(|| {
			Error::Config("no trusted CA bundle installed yet for a verified request".to_string())
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url.trim_end_matches('/'), path)
	}

	fn classify(response: reqwest::blocking::Response) -> Result<CaResponse> {
		let status = response.status();
		if status == reqwest::StatusCode::NOT_MODIFIED {
			return Ok(CaResponse::NotModified);
		}
		if status.is_success() {
			let body = response.bytes()?.to_vec();
			return Ok(CaResponse::Ok(body));
		}
		let status_code = status.as_u16();
		let reason = status.canonical_reason().unwrap_or("unknown").to_string();
		let body = response.text().unwrap_or_default();
		Ok(CaResponse::Status { status: status_code, reason, body })
	}
}

impl CaClient for HttpCaClient {
	fn get_ca_certificate(&self) -> Result<CaResponse> {
		let response = self
			.insecure
			.get(self.url("/puppet-ca/v1/certificate/ca"))
			.send()?;
		Self::classify(response)
	}

	fn get_crl(&self, if_modified_since: Option<SystemTime>) -> Result<CaResponse> {
		let client = self.client_for(true)?;
		let mut request = client.get(self.url("/puppet-ca/v1/certificate_revocation_list/ca"));
		if let Some(since) = if_modified_since {
			let datetime: chrono::DateTime<chrono::Utc> = since.into();
			request = request.header(
				"If-Modified-Since",
				datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
			);
		}
		let response = request.send()?;
		Self::classify(response)
	}

	fn submit_csr(&self, certname: &str, csr_pem: &str) -> Result<CaResponse> {
		let client = self.client_for(true)?;
		let response = client
			.put(self.url(&format!("/puppet-ca/v1/certificate_request/{certname}")))
			.header("Content-Type", "text/plain")
			.body(csr_pem.to_string())
			.send()?;
		Self::classify(response)
	}

	fn get_client_cert(&self, certname: &str) -> Result<CaResponse> {
		let client = self.client_for(true)?;
		let response = client
			.get(self.url(&format!("/puppet-ca/v1/certificate/{certname}")))
			.send()?;
		Self::classify(response)
	}

	fn trust_ca_bundle(&self, pem_bundle: &[u8]) -> Result<()> {
		let certs = reqwest::Certificate::from_pem_bundle(pem_bundle)
			.map_err(|e| Error::Config(format!("invalid CA bundle for HTTP trust store: {e}")))?;
		// `tls_certs_only` disables the platform verifier entirely so only the CA we just
		// learned is trusted, avoiding surprises from the OS trust store.
		let client = Client::builder().tls_certs_only(certs).build()?;
		*self.verified.borrow_mut() = Some(client);
		Ok(())
	}
}
