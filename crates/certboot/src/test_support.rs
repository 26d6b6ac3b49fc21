//! Test doubles shared by the state-transition tests (`states.rs`) and the full-machine
//! tests (`state_machine.rs`), so both exercise the same `CertProvider`/`CaClient`
//! behavior instead of two divergent fakes drifting apart.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use crate::ca_client::{CaClient, CaResponse};
use crate::cert_provider::CertProvider;
use crate::config::{Config, RawConfig};
use crate::error::{Error, Result};
use crate::pem::{ParsedCert, ParsedCrl};

#[derive(Default)]
pub(crate) struct FakeProvider {
	pub(crate) cacerts: RefCell<Option<(Vec<u8>, Vec<ParsedCert>)>>,
	pub(crate) crls: RefCell<Option<Vec<ParsedCrl>>>,
	pub(crate) crl_last_update: RefCell<Option<SystemTime>>,
	pub(crate) private_key: RefCell<Option<String>>,
	pub(crate) client_cert: RefCell<Option<ParsedCert>>,
	pub(crate) saved_cacerts: RefCell<usize>,
	pub(crate) saved_crls: RefCell<usize>,
	pub(crate) saved_client_cert: RefCell<usize>,
}

impl CertProvider for FakeProvider {
	fn load_cacerts(&self) -> Result<Option<(Vec<u8>, Vec<ParsedCert>)>> {
		Ok(self.cacerts.borrow().clone())
	}
	fn save_cacerts(&self, body: &[u8]) -> Result<()> {
		*self.saved_cacerts.borrow_mut() += 1;
		let certs = crate::pem::parse_certs(body)?;
		*self.cacerts.borrow_mut() = Some((body.to_vec(), certs));
		Ok(())
	}
	fn load_crls(&self) -> Result<Option<Vec<ParsedCrl>>> {
		Ok(self.crls.borrow().clone())
	}
	fn crl_last_update(&self) -> Result<Option<SystemTime>> {
		Ok(*self.crl_last_update.borrow())
	}
	fn save_crls(&self, body: &[u8]) -> Result<()> {
		*self.saved_crls.borrow_mut() += 1;
		*self.crls.borrow_mut() = Some(crate::pem::parse_crls(body)?);
		*self.crl_last_update.borrow_mut() = Some(SystemTime::now());
		Ok(())
	}
	fn load_private_key(&self) -> Result<Option<rcgen::KeyPair>> {
		match &*self.private_key.borrow() {
			Some(pem) => Ok(Some(rcgen::KeyPair::from_pem(pem).unwrap())),
			None => Ok(None),
		}
	}
	fn save_private_key(&self, pem: &str) -> Result<()> {
		*self.private_key.borrow_mut() = Some(pem.to_string());
		Ok(())
	}
	fn load_client_cert(&self) -> Result<Option<ParsedCert>> {
		Ok(self.client_cert.borrow().clone())
	}
	fn save_client_cert(&self, _certname: &str, body: &[u8]) -> Result<()> {
		*self.saved_client_cert.borrow_mut() += 1;
		*self.client_cert.borrow_mut() = Some(crate::pem::parse_single_cert(body)?);
		Ok(())
	}
	fn save_request(&self, _certname: &str, _pem: &str) -> Result<()> {
		Ok(())
	}
}

/// Models the real `HttpCaClient`'s trust dependency: the verified routes
/// (`get_crl`/`submit_csr`/`get_client_cert`) fail until `trust_ca_bundle` has run, exactly
/// like `HttpCaClient::client_for(true)` does against its `verified` cell.
#[derive(Default)]
pub(crate) struct FakeCaClient {
	pub(crate) trusted: RefCell<bool>,
	pub(crate) calls: RefCell<HashMap<&'static str, usize>>,
	pub(crate) ca_certificate: RefCell<Option<CaResponse>>,
	pub(crate) crl: RefCell<Option<CaResponse>>,
	pub(crate) csr: RefCell<Option<CaResponse>>,
	pub(crate) client_cert: RefCell<Option<CaResponse>>,
}

impl FakeCaClient {
	pub(crate) fn record(&self, name: &'static str) {
		*self.calls.borrow_mut().entry(name).or_insert(0) += 1;
	}
	pub(crate) fn calls_to(&self, name: &str) -> usize {
		*self.calls.borrow().get(name).unwrap_or(&0)
	}
	fn require_trusted(&self) -> Result<()> {
		if *self.trusted.borrow() {
			Ok(())
		} else {
			Err(Error::Config(
				"no trusted CA bundle installed yet for a verified request".to_string(),
			))
		}
	}
}

impl CaClient for FakeCaClient {
	fn get_ca_certificate(&self) -> Result<CaResponse> {
		self.record("get_ca_certificate");
		Ok(self
			.ca_certificate
			.borrow()
			.clone()
			.expect("unexpected CA bundle fetch in this test"))
	}
	fn get_crl(&self, _if_modified_since: Option<SystemTime>) -> Result<CaResponse> {
		self.record("get_crl");
		self.require_trusted()?;
		Ok(self.crl.borrow().clone().expect("unexpected CRL fetch in this test"))
	}
	fn submit_csr(&self, _certname: &str, _csr_pem: &str) -> Result<CaResponse> {
		self.record("submit_csr");
		self.require_trusted()?;
		Ok(self
			.csr
			.borrow()
			.clone()
			.expect("unexpected CSR submission in this test"))
	}
	fn get_client_cert(&self, _certname: &str) -> Result<CaResponse> {
		self.record("get_client_cert");
		self.require_trusted()?;
		Ok(self
			.client_cert
			.borrow()
			.clone()
			.expect("unexpected client cert fetch in this test"))
	}
	fn trust_ca_bundle(&self, _pem_bundle: &[u8]) -> Result<()> {
		self.record("trust_ca_bundle");
		*self.trusted.borrow_mut() = true;
		Ok(())
	}
}

pub(crate) fn test_config(ssldir: &Path) -> Config {
	config_with(ssldir, "")
}

pub(crate) fn config_with(ssldir: &Path, extra: &str) -> Config {
	crate::config::resolve(
		crate::config::parse_raw(&format!(
			"certname: host\nca_server: https://ca.example.com:8140\nssldir: {:?}\n{}",
			ssldir, extra
		))
		.unwrap(),
		RawConfig::default(),
	)
	.unwrap()
}

/// A self-signed CA keypair/cert, usable both as trust material and as a signer for
/// leaf certs minted with [`issue_cert`].
pub(crate) fn test_ca() -> (rcgen::KeyPair, rcgen::Certificate) {
	let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
	let mut params = rcgen::CertificateParams::default();
	params.distinguished_name.push(rcgen::DnType::CommonName, "test-ca");
	params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
	let cert = params.self_signed(&key).unwrap();
	(key, cert)
}

/// A leaf cert for `cn`, embedding `subject_key`'s public key, signed by `ca_key`/`ca_cert`.
pub(crate) fn issue_cert(
	ca_key: &rcgen::KeyPair,
	ca_cert: &rcgen::Certificate,
	cn: &str,
	subject_key: &rcgen::KeyPair,
) -> rcgen::Certificate {
	let mut params = rcgen::CertificateParams::default();
	params.distinguished_name.push(rcgen::DnType::CommonName, cn);
	params.signed_by(subject_key, ca_cert, ca_key).unwrap()
}

pub(crate) fn to_parsed(cert: &rcgen::Certificate) -> ParsedCert {
	let (_, parsed) = x509_parser::parse_x509_certificate(cert.der()).unwrap();
	ParsedCert {
		der: rustls_pki_types::CertificateDer::from(cert.der().to_vec()),
		subject: parsed.subject().to_string(),
		issuer: parsed.issuer().to_string(),
		raw_serial: parsed.raw_serial().to_vec(),
	}
}
