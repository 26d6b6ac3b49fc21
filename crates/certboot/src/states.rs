//! The six-state bootstrap progression plus its terminal `Done`.
//!
//! Modeled as a closed tagged union with a single `next()` operation rather than an
//! inheritance hierarchy: each variant carries exactly the data the next transition
//! needs, and `Wait -> NeedCACerts` is a transition to a fresh initial state, not a
//! retained back-reference.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::ca_client::{CaClient, CaResponse};
use crate::cert_provider::CertProvider;
use crate::config::{Config, CertificateRevocation, CsrAttributes};
use crate::csr;
use crate::error::{Error, Result};
use crate::pem::{self, ParsedCert};
use crate::ssl_context::SslContext;

/// Phrases the CA may put in a `400` CSR-submission body that mean "this is fine,
/// proceed to polling for the cert" rather than a real failure.
const SOFT_CSR_CONFLICT_PHRASES: &[&str] = &[
	"already has a requested certificate",
	"already has a signed certificate",
	"already has a revoked certificate",
];

/// Everything a transition needs beyond the state's own data: read-only configuration
/// and the collaborators it calls out to.
pub struct RunContext<'a> {
	pub config: &'a Config,
	pub provider: &'a dyn CertProvider,
	pub ca: &'a dyn CaClient,
	pub wait_deadline: Option<SystemTime>,
}

pub enum State {
	NeedCACerts,
	NeedCRLs(SslContext),
	NeedKey(SslContext),
	NeedSubmitCSR(SslContext, Arc<rcgen::KeyPair>),
	NeedCert(SslContext, Arc<rcgen::KeyPair>),
	Wait,
	Done(SslContext),
}

impl State {
	pub fn next(self, ctx: &RunContext) -> Result<State> {
		match self {
			State::NeedCACerts => need_ca_certs(ctx),
			State::NeedCRLs(context) => need_crls(ctx, context),
			State::NeedKey(context) => need_key(ctx, context),
			State::NeedSubmitCSR(context, key) => need_submit_csr(ctx, context, key),
			State::NeedCert(context, key) => need_cert(ctx, context, key),
			State::Wait => wait(ctx),
			State::Done(context) => Ok(State::Done(context)),
		}
	}
}

fn need_ca_certs(ctx: &RunContext) -> Result<State> {
	if let Some((body, cacerts)) = ctx.provider.load_cacerts()? {
		// The trust store must be installed regardless of whether the bundle was just
		// downloaded or was already on disk from a prior run; every later verified call
		// (CRL refresh, CSR submission, cert fetch) depends on it being present.
		ctx.ca.trust_ca_bundle(&body)?;
		return Ok(State::NeedCRLs(SslContext::trust_only(cacerts, Vec::new(), true)));
	}

	tracing::info!("fetching CA certificate bundle");
	let response = ctx.ca.get_ca_certificate()?;
	let body = match response {
		CaResponse::Status { status: 404, .. } => return Err(Error::CaCertMissing),
		CaResponse::Status { status, reason, .. } => {
			return Err(Error::CaCertDownloadFailed { status, reason });
		},
		CaResponse::NotModified => {
			return Err(Error::CaCertDownloadFailed {
				status: 304,
				reason: "Not Modified".to_string(),
			});
		},
		CaResponse::Ok(body) => body,
	};

	let cacerts = pem::parse_certs(&body).map_err(|_| Error::MalformedCaCert)?;
	ctx.provider.save_cacerts(&body)?;
	ctx.ca.trust_ca_bundle(&body)?;
	Ok(State::NeedCRLs(SslContext::trust_only(cacerts, Vec::new(), true)))
}

fn need_crls(ctx: &RunContext, context: SslContext) -> Result<State> {
	if ctx.config.certificate_revocation == CertificateRevocation::Off {
		return Ok(State::NeedKey(context));
	}

	let local_crls = ctx.provider.load_crls()?;
	let last_update = ctx.provider.crl_last_update()?;

	match local_crls {
		None => {
			tracing::info!("fetching certificate revocation list");
			let response = ctx.ca.get_crl(None)?;
			let body = match response {
				CaResponse::Status { status: 404, .. } => return Err(Error::CrlMissing),
				CaResponse::Status { status, reason, .. } => {
					return Err(Error::CrlDownloadFailed { status, reason });
				},
				CaResponse::NotModified => {
					return Err(Error::CrlDownloadFailed {
						status: 304,
						reason: "Not Modified".to_string(),
					});
				},
				CaResponse::Ok(body) => body,
			};
			let crls = pem::parse_crls(&body).map_err(|_| Error::MalformedCrl)?;
			ctx.provider.save_crls(&body)?;
			Ok(State::NeedKey(with_crls(context, crls)))
		},
		Some(local_crls) => {
			let fresh = last_update
				.map(|t| t.elapsed().unwrap_or(Duration::MAX) < ctx.config.crl_refresh_interval)
				.unwrap_or(false);
			if fresh {
				return Ok(State::NeedKey(with_crls(context, local_crls)));
			}

			match ctx.ca.get_crl(last_update) {
				Ok(CaResponse::NotModified) => {
					tracing::debug!("CRL not modified since last refresh");
					Ok(State::NeedKey(with_crls(context, local_crls)))
				},
				Ok(CaResponse::Status { status, reason, .. }) => {
					tracing::warn!(status, reason, "CRL refresh failed, keeping local CRLs");
					Ok(State::NeedKey(with_crls(context, local_crls)))
				},
				Ok(CaResponse::Ok(body)) => match pem::parse_crls(&body) {
					Err(_) => Err(Error::MalformedCrl),
					Ok(new_crls) => {
						ctx.provider.save_crls(&body)?;
						Ok(State::NeedKey(with_crls(context, new_crls)))
					},
				},
				Err(e) => {
					tracing::warn!(error = %e, "CRL refresh request failed, keeping local CRLs");
					Ok(State::NeedKey(with_crls(context, local_crls)))
				},
			}
		},
	}
}

fn with_crls(context: SslContext, crls: Vec<pem::ParsedCrl>) -> SslContext {
	SslContext { crls, ..context }
}

fn need_key(ctx: &RunContext, context: SslContext) -> Result<State> {
	match ctx.provider.load_private_key()? {
		Some(key) => {
			let key = Arc::new(key);
			match ctx.provider.load_client_cert()? {
				Some(cert) => {
					let final_context = crate::ssl_context::SslContextBuilder::with_identity(
						context.cacerts,
						context.crls,
						key,
						cert,
					)?;
					Ok(State::Done(final_context))
				},
				None => Ok(State::NeedSubmitCSR(context, key)),
			}
		},
		None => {
			tracing::info!(key_type = ?ctx.config.key_type, "generating new private key");
			let key = csr::generate_key(ctx.config)?;
			let pem = key
				.serialize_pem();
			ctx.provider.save_private_key(&pem)?;
			Ok(State::NeedSubmitCSR(context, Arc::new(key)))
		},
	}
}

fn need_submit_csr(ctx: &RunContext, context: SslContext, key: Arc<rcgen::KeyPair>) -> Result<State> {
	let attributes = match &ctx.config.csr_attributes_path {
		Some(path) => crate::config::load_csr_attributes(path)?,
		None => CsrAttributes::default(),
	};

	let csr = csr::build(ctx.config, &key, &attributes)?;
	ctx.provider.save_request(&ctx.config.certname, &csr.pem)?;

	tracing::info!(certname = %ctx.config.certname, "submitting certificate signing request");
	let response = ctx.ca.submit_csr(&ctx.config.certname, &csr.pem)?;
	match response {
		CaResponse::Ok(_) => Ok(State::NeedCert(context, key)),
		CaResponse::NotModified => Err(Error::CsrSubmitFailed {
			status: 304,
			reason: "Not Modified".to_string(),
		}),
		CaResponse::Status { status: 400, body, .. }
			if SOFT_CSR_CONFLICT_PHRASES.iter().any(|phrase| body.contains(phrase)) =>
		{
			Ok(State::NeedCert(context, key))
		},
		CaResponse::Status { status, reason, .. } => Err(Error::CsrSubmitFailed { status, reason }),
	}
}

fn need_cert(ctx: &RunContext, context: SslContext, key: Arc<rcgen::KeyPair>) -> Result<State> {
	let response = ctx.ca.get_client_cert(&ctx.config.certname)?;
	let body = match response {
		CaResponse::Ok(body) => body,
		CaResponse::NotModified | CaResponse::Status { .. } => return Ok(State::Wait),
	};

	let cert: ParsedCert = match pem::parse_single_cert(&body) {
		Err(_) => {
			tracing::warn!("Failed to parse certificate");
			return Ok(State::Wait);
		},
		Ok(cert) => cert,
	};

	match crate::ssl_context::SslContextBuilder::with_identity(
		context.cacerts,
		context.crls,
		key,
		cert,
	) {
		Ok(final_context) => {
			ctx.provider.save_client_cert(&ctx.config.certname, &body)?;
			Ok(State::Done(final_context))
		},
		Err(e) => {
			tracing::warn!(error = %e, "certificate from CA is not yet acceptable");
			Ok(State::Wait)
		},
	}
}

fn wait(ctx: &RunContext) -> Result<State> {
	if ctx.config.waitforcert.is_zero() {
		println!(
			"Couldn't fetch certificate from CA server; you can run certboot again, or \
			 wait for the CA server to sign your certificate. Exiting now because the \
			 waitforcert setting is set to 0."
		);
		std::process::exit(1);
	}

	if let Some(deadline) = ctx.wait_deadline {
		if SystemTime::now() >= deadline {
			println!(
				"Couldn't fetch certificate from CA server; the maxwaitforcert timeout has \
				 been exceeded."
			);
			std::process::exit(1);
		}
	}

	let seconds = ctx.config.waitforcert.as_secs();
	tracing::info!(seconds, "Will try again in {seconds} seconds");
	std::thread::sleep(ctx.config.waitforcert);
	Ok(State::NeedCACerts)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ca_client::CaResponse;
	use crate::test_support::{FakeCaClient, FakeProvider, issue_cert, test_ca, test_config, to_parsed};

	/// `NeedKey` validates identity loaded straight from disk; a mismatch there is a
	/// fatal error, never a retry.
	#[test]
	fn mismatched_key_loaded_from_disk_is_fatal_in_need_key() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());
		let (ca_key, ca_cert) = test_ca();
		let ca_parsed = to_parsed(&ca_cert);

		let embedded_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
		let on_disk_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
		let cert = issue_cert(&ca_key, &ca_cert, "host", &embedded_key);
		let parsed_cert = to_parsed(&cert);

		let provider = FakeProvider::default();
		*provider.private_key.borrow_mut() = Some(on_disk_key.serialize_pem());
		*provider.client_cert.borrow_mut() = Some(parsed_cert);

		let ca = FakeCaClient::default();
		let run_ctx = RunContext {
			config: &config,
			provider: &provider,
			ca: &ca,
			wait_deadline: None,
		};
		let context = SslContext::trust_only(vec![ca_parsed], Vec::new(), true);

		let err = State::NeedKey(context).next(&run_ctx).unwrap_err();
		assert!(matches!(err, Error::KeyCertMismatch { .. }));
	}

	/// The same mismatch, surfacing from the CA's own response during `NeedCert`,
	/// converts to a `Wait` retry instead of a fatal error, and never saves the cert.
	#[test]
	fn mismatched_cert_from_ca_transitions_to_wait_in_need_cert() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());
		let (ca_key, ca_cert) = test_ca();
		let ca_parsed = to_parsed(&ca_cert);

		let embedded_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
		let our_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
		let mismatched_cert = issue_cert(&ca_key, &ca_cert, "host", &embedded_key);

		let provider = FakeProvider::default();
		let ca = FakeCaClient::default();
		// `need_ca_certs` isn't exercised in this test, so `trust_ca_bundle` must be
		// recorded by hand for the fake to let the verified `get_client_cert` call through.
		*ca.trusted.borrow_mut() = true;
		*ca.client_cert.borrow_mut() = Some(CaResponse::Ok(mismatched_cert.pem().into_bytes()));

		let run_ctx = RunContext {
			config: &config,
			provider: &provider,
			ca: &ca,
			wait_deadline: None,
		};
		let context = SslContext::trust_only(vec![ca_parsed], Vec::new(), true);

		let state = State::NeedCert(context, Arc::new(our_key)).next(&run_ctx).unwrap();
		assert!(matches!(state, State::Wait));
		assert_eq!(*provider.saved_client_cert.borrow(), 0);
	}

	/// A certificate from an untrusted issuer is treated the same as any other
	/// not-yet-acceptable cert from the CA: `Wait`, not fatal.
	#[test]
	fn cert_from_untrusted_issuer_transitions_to_wait_in_need_cert() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());
		let (trusted_ca_key, trusted_ca_cert) = test_ca();
		let (other_ca_key, other_ca_cert) = test_ca();
		let trusted_ca_parsed = to_parsed(&trusted_ca_cert);

		let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
		let cert = issue_cert(&other_ca_key, &other_ca_cert, "host", &key);

		let provider = FakeProvider::default();
		let ca = FakeCaClient::default();
		*ca.trusted.borrow_mut() = true;
		*ca.client_cert.borrow_mut() = Some(CaResponse::Ok(cert.pem().into_bytes()));

		let run_ctx = RunContext {
			config: &config,
			provider: &provider,
			ca: &ca,
			wait_deadline: None,
		};
		let context = SslContext::trust_only(vec![trusted_ca_parsed], Vec::new(), true);

		let state = State::NeedCert(context, Arc::new(key)).next(&run_ctx).unwrap();
		assert!(matches!(state, State::Wait));
		let _ = trusted_ca_key;
	}
}
