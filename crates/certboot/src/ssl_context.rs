//! The trust/identity snapshot carried between states.

use crate::error::{Error, Result};
use crate::pem::{ParsedCert, ParsedCrl, public_key_matches};

/// An immutable snapshot of trust material and (optionally) this node's own identity.
///
/// Once `client_cert` is set, `private_key` is set and their public keys match;
/// `client_cert` chains to `cacerts` and none of the chain is revoked by `crls`.
#[derive(Clone)]
pub struct SslContext {
	pub cacerts: Vec<ParsedCert>,
	pub crls: Vec<ParsedCrl>,
	pub private_key: Option<std::sync::Arc<rcgen::KeyPair>>,
	pub client_cert: Option<ParsedCert>,
	pub verify_peer: bool,
}

impl SslContext {
	pub fn trust_only(cacerts: Vec<ParsedCert>, crls: Vec<ParsedCrl>, verify_peer: bool) -> Self {
		SslContext {
			cacerts,
			crls,
			private_key: None,
			client_cert: None,
			verify_peer,
		}
	}
}

/// Builds validated [`SslContext`]s. Performs no I/O; every input is already in memory.
pub struct SslContextBuilder;

impl SslContextBuilder {
	/// Validate and assemble a context carrying a key and certificate.
	///
	/// Checks, in order: each CRL is issued by a cert in `cacerts`; `client_cert` chains to
	/// `cacerts` with a valid signature and is within its validity window; `client_cert` is
	/// not revoked by any of `crls`; the private key's public component matches
	/// `client_cert`'s subject public key.
	pub fn with_identity(
		cacerts: Vec<ParsedCert>,
		crls: Vec<ParsedCrl>,
		private_key: std::sync::Arc<rcgen::KeyPair>,
		client_cert: ParsedCert,
	) -> Result<SslContext> {
		for crl in &crls {
			crate::pem::verify_crl_issuer(crl, &cacerts)?;
		}
		crate::pem::verify_chain(&client_cert, &cacerts)?;
		if crate::pem::is_revoked(&client_cert, &crls) {
			return Err(Error::CertificateRevoked {
				subject: client_cert.subject.clone(),
			});
		}
		if !public_key_matches(&private_key, &client_cert)? {
			return Err(Error::KeyCertMismatch {
				subject: client_cert.subject.clone(),
			});
		}
		Ok(SslContext {
			cacerts,
			crls,
			private_key: Some(private_key),
			client_cert: Some(client_cert),
			verify_peer: true,
		})
	}
}
