//! Settings for a bootstrap run: on-disk YAML overlaid with CLI flag overrides.
//!
//! Precedence, highest first: CLI flags > YAML file > built-in defaults. Mirrors the
//! overlay style of a raw, all-optional document merged field-by-field against defaults,
//! just using CLI flags in place of environment variables as the override source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
	Rsa,
	Ec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateRevocation {
	Off,
	Chain,
}

/// A resolved, immutable set of settings a `StateMachine` runs with.
#[derive(Debug, Clone)]
pub struct Config {
	pub certname: String,
	pub ca_server: String,
	pub key_type: KeyType,
	pub named_curve: String,
	pub dns_alt_names: Vec<String>,
	pub csr_attributes_path: Option<PathBuf>,
	pub certificate_revocation: CertificateRevocation,
	pub crl_refresh_interval: Duration,
	pub waitforcert: Duration,
	pub maxwaitforcert: Option<Duration>,
	pub ssldir: PathBuf,
}

impl Config {
	pub fn ca_bundle_path(&self) -> PathBuf {
		self.ssldir.join("certs").join("ca.pem")
	}
	pub fn crl_bundle_path(&self) -> PathBuf {
		self.ssldir.join("crl.pem")
	}
	pub fn crl_last_update_path(&self) -> PathBuf {
		self.ssldir.join("crl_last_update")
	}
	pub fn private_key_path(&self) -> PathBuf {
		self.ssldir
			.join("private_keys")
			.join(format!("{}.pem", self.certname))
	}
	pub fn client_cert_path(&self) -> PathBuf {
		self.ssldir
			.join("certs")
			.join(format!("{}.pem", self.certname))
	}
	pub fn csr_path(&self) -> PathBuf {
		self.ssldir
			.join("certificate_requests")
			.join(format!("{}.pem", self.certname))
	}
	pub fn lock_path(&self) -> PathBuf {
		self.ssldir.join("bootstrap.lock")
	}
}

/// Every field optional: reflects exactly what was present in the YAML document or
/// supplied on the command line, with no defaults baked in yet.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RawConfig {
	pub certname: Option<String>,
	pub ca_server: Option<String>,
	pub key_type: Option<KeyType>,
	pub named_curve: Option<String>,
	pub dns_alt_names: Option<String>,
	pub csr_attributes_path: Option<PathBuf>,
	pub certificate_revocation: Option<CertificateRevocation>,
	pub crl_refresh_interval: Option<u64>,
	pub waitforcert: Option<u64>,
	pub maxwaitforcert: Option<u64>,
	pub ssldir: Option<PathBuf>,
}

impl RawConfig {
	/// Merge `other` on top of `self`: any field set in `other` wins.
	fn overlay(self, other: RawConfig) -> RawConfig {
		RawConfig {
			certname: other.certname.or(self.certname),
			ca_server: other.ca_server.or(self.ca_server),
			key_type: other.key_type.or(self.key_type),
			named_curve: other.named_curve.or(self.named_curve),
			dns_alt_names: other.dns_alt_names.or(self.dns_alt_names),
			csr_attributes_path: other.csr_attributes_path.or(self.csr_attributes_path),
			certificate_revocation: other.certificate_revocation.or(self.certificate_revocation),
			crl_refresh_interval: other.crl_refresh_interval.or(self.crl_refresh_interval),
			waitforcert: other.waitforcert.or(self.waitforcert),
			maxwaitforcert: other.maxwaitforcert.or(self.maxwaitforcert),
			ssldir: other.ssldir.or(self.ssldir),
		}
	}
}

/// Parse a YAML document into a [`RawConfig`]. A malformed document is a fatal,
/// surfaced error — never silently treated as "no config".
pub fn parse_raw(contents: &str) -> Result<RawConfig> {
	serde_yaml::from_str(contents).map_err(|e| Error::Config(format!("invalid config YAML: {e}")))
}

/// Load a YAML file from disk, if it exists. A missing file is not an error (it is
/// treated as an empty document); a present-but-malformed file is.
pub fn load_file(path: &Path) -> Result<RawConfig> {
	match fs_err::read_to_string(path) {
		Ok(contents) => parse_raw(&contents),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RawConfig::default()),
		Err(e) => Err(Error::Io(e)),
	}
}

/// Combine a file-sourced document with CLI overrides and apply defaults, producing the
/// final immutable [`Config`].
pub fn resolve(file: RawConfig, cli: RawConfig) -> Result<Config> {
	let raw = file.overlay(cli);

	let certname = raw
		.certname
		.ok_or_else(|| Error::Config("certname is required".to_string()))?;
	let ca_server = raw
		.ca_server
		.ok_or_else(|| Error::Config("ca_server is required".to_string()))?;

	let dns_alt_names = raw
		.dns_alt_names
		.map(|s| {
			s.split(',')
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default();

	Ok(Config {
		certname,
		ca_server,
		key_type: raw.key_type.unwrap_or(KeyType::Rsa),
		named_curve: raw.named_curve.unwrap_or_else(|| "prime256v1".to_string()),
		dns_alt_names,
		csr_attributes_path: raw.csr_attributes_path,
		certificate_revocation: raw
			.certificate_revocation
			.unwrap_or(CertificateRevocation::Chain),
		crl_refresh_interval: Duration::from_secs(raw.crl_refresh_interval.unwrap_or(60 * 60 * 24)),
		waitforcert: Duration::from_secs(raw.waitforcert.unwrap_or(120)),
		maxwaitforcert: raw
			.maxwaitforcert
			.filter(|s| *s != 0)
			.map(Duration::from_secs),
		ssldir: raw.ssldir.unwrap_or_else(|| PathBuf::from("/etc/bootstrap/ssl")),
	})
}

/// A single `(oid, value)` attribute or extension-request map parsed from the CSR
/// attributes YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsrAttributes {
	#[serde(default)]
	pub custom_attributes: std::collections::BTreeMap<String, String>,
	#[serde(default)]
	pub extension_requests: std::collections::BTreeMap<String, String>,
}

pub fn load_csr_attributes(path: &Path) -> Result<CsrAttributes> {
	let contents = fs_err::read_to_string(path)?;
	serde_yaml::from_str(&contents)
		.map_err(|e| Error::Config(format!("invalid csr_attributes YAML: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cli_overrides_file_overrides_defaults() {
		let file = parse_raw("certname: file-name\nca_server: https://ca.example.com:8140\nwaitforcert: 30\n").unwrap();
		let cli = parse_raw("certname: cli-name\n").unwrap();
		let config = resolve(file, cli).unwrap();
		assert_eq!(config.certname, "cli-name");
		assert_eq!(config.ca_server, "https://ca.example.com:8140");
		assert_eq!(config.waitforcert, Duration::from_secs(30));
	}

	#[test]
	fn malformed_yaml_is_fatal() {
		let err = parse_raw("certname: [this is not a string\n").unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn dns_alt_names_splits_on_comma_and_trims() {
		let file = parse_raw(
			"certname: host\nca_server: https://ca.example.com:8140\ndns_alt_names: \"one, IP:192.168.0.1,DNS:two.com\"\n",
		)
		.unwrap();
		let config = resolve(file, RawConfig::default()).unwrap();
		assert_eq!(
			config.dns_alt_names,
			vec!["one", "IP:192.168.0.1", "DNS:two.com"]
		);
	}

	#[test]
	fn maxwaitforcert_zero_means_infinite() {
		let file = parse_raw(
			"certname: host\nca_server: https://ca.example.com:8140\nmaxwaitforcert: 0\n",
		)
		.unwrap();
		let config = resolve(file, RawConfig::default()).unwrap();
		assert_eq!(config.maxwaitforcert, None);
	}

	#[test]
	fn missing_required_field_is_fatal() {
		let err = resolve(RawConfig::default(), RawConfig::default()).unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}
}
