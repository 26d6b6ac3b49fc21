//! Persistence of CA bundles, CRLs, keys, certs and CSRs to a local `ssldir`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::Result;
use crate::pem::{ParsedCert, ParsedCrl};

/// Everything a state needs to read or write on-disk PKI material. Implemented once for
/// real use (`FsCertProvider`); tests substitute an in-memory fake.
pub trait CertProvider {
	/// Returns the raw PEM bytes alongside the parsed certs so a caller can re-install
	/// them as a trust store without re-reading the file.
	fn load_cacerts(&self) -> Result<Option<(Vec<u8>, Vec<ParsedCert>)>>;
	fn save_cacerts(&self, body: &[u8]) -> Result<()>;

	fn load_crls(&self) -> Result<Option<Vec<ParsedCrl>>>;
	fn crl_last_update(&self) -> Result<Option<SystemTime>>;
	fn save_crls(&self, body: &[u8]) -> Result<()>;

	fn load_private_key(&self) -> Result<Option<rcgen::KeyPair>>;
	fn save_private_key(&self, pem: &str) -> Result<()>;

	fn load_client_cert(&self) -> Result<Option<ParsedCert>>;
	fn save_client_cert(&self, certname: &str, body: &[u8]) -> Result<()>;

	fn save_request(&self, certname: &str, pem: &str) -> Result<()>;
}

pub struct FsCertProvider {
	config: Config,
}

impl FsCertProvider {
	pub fn new(config: Config) -> Self {
		FsCertProvider { config }
	}

	fn write_atomically(path: &std::path::Path, contents: &[u8]) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs_err::create_dir_all(parent)?;
		}
		fs_err::write(path, contents)?;
		Ok(())
	}
}

impl CertProvider for FsCertProvider {
	fn load_cacerts(&self) -> Result<Option<(Vec<u8>, Vec<ParsedCert>)>> {
		let path = self.config.ca_bundle_path();
		if !path.exists() {
			return Ok(None);
		}
		let body = fs_err::read(&path)?;
		let certs = crate::pem::parse_certs(&body)?;
		Ok(Some((body, certs)))
	}

	fn save_cacerts(&self, body: &[u8]) -> Result<()> {
		Self::write_atomically(&self.config.ca_bundle_path(), body)
	}

	fn load_crls(&self) -> Result<Option<Vec<ParsedCrl>>> {
		let path = self.config.crl_bundle_path();
		if !path.exists() {
			return Ok(None);
		}
		let body = fs_err::read(&path)?;
		Ok(Some(crate::pem::parse_crls(&body)?))
	}

	fn crl_last_update(&self) -> Result<Option<SystemTime>> {
		let path = self.config.crl_last_update_path();
		if !path.exists() {
			return Ok(None);
		}
		let contents = fs_err::read_to_string(&path)?;
		let secs: u64 = contents
			.trim()
			.parse()
			.map_err(|_| crate::error::Error::Io(std::io::Error::new(
				std::io::ErrorKind::InvalidData,
				"crl_last_update file does not contain a timestamp",
			)))?;
		Ok(Some(UNIX_EPOCH + Duration::from_secs(secs)))
	}

	fn save_crls(&self, body: &[u8]) -> Result<()> {
		Self::write_atomically(&self.config.crl_bundle_path(), body)?;
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs();
		Self::write_atomically(&self.config.crl_last_update_path(), now.to_string().as_bytes())
	}

	fn load_private_key(&self) -> Result<Option<rcgen::KeyPair>> {
		let path = self.config.private_key_path();
		if !path.exists() {
			return Ok(None);
		}
		let pem = fs_err::read_to_string(&path)?;
		let key = rcgen::KeyPair::from_pem(&pem)
			.map_err(|e| crate::error::Error::KeyLoadFailed(e.to_string()))?;
		Ok(Some(key))
	}

	fn save_private_key(&self, pem: &str) -> Result<()> {
		Self::write_atomically(&self.config.private_key_path(), pem.as_bytes())
	}

	fn load_client_cert(&self) -> Result<Option<ParsedCert>> {
		let path = self.config.client_cert_path();
		if !path.exists() {
			return Ok(None);
		}
		let body = fs_err::read(&path)?;
		Ok(Some(crate::pem::parse_single_cert(&body)?))
	}

	fn save_client_cert(&self, certname: &str, body: &[u8]) -> Result<()> {
		tracing::info!(certname, "saving signed client certificate");
		Self::write_atomically(&self.config.client_cert_path(), body)
	}

	fn save_request(&self, certname: &str, pem: &str) -> Result<()> {
		tracing::debug!(certname, "saving certificate signing request");
		Self::write_atomically(&self.config.csr_path(), pem.as_bytes())
	}
}
