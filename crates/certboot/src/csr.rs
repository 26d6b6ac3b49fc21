//! Private key generation and CSR construction.

use std::sync::Arc;

use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, SanType};
use rsa::pkcs1::LineEnding;
use rsa::pkcs8::EncodePrivateKey;

use crate::config::{Config, CsrAttributes, KeyType};
use crate::error::{Error, Result};

/// Generate a fresh private key per `config.key_type`/`config.named_curve`.
///
/// `rcgen` cannot generate RSA keys itself (it only signs with them), so RSA generation
/// goes through the `rsa` crate and is handed to `rcgen` as a PKCS#8 PEM document.
pub fn generate_key(config: &Config) -> Result<rcgen::KeyPair> {
	match config.key_type {
		KeyType::Rsa => {
			let mut rng = rand::thread_rng();
			let private_key = rsa::RsaPrivateKey::new(&mut rng, 4096)
				.map_err(|e| Error::KeyLoadFailed(format!("RSA key generation failed: {e}")))?;
			let pem = private_key
				.to_pkcs8_pem(LineEnding::LF)
				.map_err(|e| Error::KeyLoadFailed(format!("failed to encode RSA key: {e}")))?;
			rcgen::KeyPair::from_pem(&pem).map_err(|e| Error::KeyLoadFailed(e.to_string()))
		},
		KeyType::Ec => {
			let alg = curve_algorithm(&config.named_curve)?;
			rcgen::KeyPair::generate_for(alg).map_err(|e| Error::KeyLoadFailed(e.to_string()))
		},
	}
}

fn curve_algorithm(named_curve: &str) -> Result<&'static rcgen::SignatureAlgorithm> {
	match named_curve {
		"prime256v1" | "secp256r1" => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
		"secp384r1" => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
		other => Err(Error::UnsupportedCurve(other.to_string())),
	}
}

/// Parse one `dns_alt_names` entry into a rcgen `SanType`. Bare entries default to DNS.
fn parse_san(entry: &str) -> Result<SanType> {
	if let Some(host) = entry.strip_prefix("DNS:") {
		return Ok(SanType::DnsName(host.to_string().try_into().map_err(|e| {
			Error::CertificateParse(format!("invalid DNS SAN {host:?}: {e}"))
		})?));
	}
	if let Some(ip) = entry.strip_prefix("IP:") {
		let addr: std::net::IpAddr = ip
			.parse()
			.map_err(|e| Error::CertificateParse(format!("invalid IP SAN {ip:?}: {e}")))?;
		return Ok(SanType::IpAddress(addr));
	}
	Ok(SanType::DnsName(entry.to_string().try_into().map_err(|e| {
		Error::CertificateParse(format!("invalid DNS SAN {entry:?}: {e}"))
	})?))
}

/// OID string like `1.2.3.4` parsed into the arc sequence rcgen's extension API wants.
fn parse_oid(oid: &str) -> Result<Vec<u64>> {
	oid
		.split('.')
		.map(|part| {
			part
				.parse::<u64>()
				.map_err(|_| Error::Config(format!("invalid OID component {part:?} in {oid:?}")))
		})
		.collect()
}

pub struct Csr {
	pub pem: String,
}

/// The exact SAN set a CSR is built with: every configured `dns_alt_names` entry, plus
/// `certname` itself, in that order. `certname` is always present even if the caller
/// configured no alt names at all.
fn build_sans(config: &Config) -> Result<Vec<SanType>> {
	let mut sans = Vec::with_capacity(config.dns_alt_names.len() + 1);
	for entry in &config.dns_alt_names {
		sans.push(parse_san(entry)?);
	}
	sans.push(SanType::DnsName(config.certname.clone().try_into().map_err(|e| {
		Error::CertificateParse(format!("invalid certname as DNS SAN: {e}"))
	})?));
	Ok(sans)
}

/// Build and sign a CSR for `config.certname`, embedding SANs, custom attributes and
/// extension requests from `attributes` (if any were configured).
pub fn build(config: &Config, key: &Arc<rcgen::KeyPair>, attributes: &CsrAttributes) -> Result<Csr> {
	let mut params = CertificateParams::default();

	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, config.certname.clone());
	params.distinguished_name = dn;

	params.subject_alt_names = build_sans(config)?;

	// rcgen has no PKCS#10 Attribute API beyond `extensionRequest`; both custom
	// attributes and extension requests are carried as requested X.509 extensions,
	// which is the only attribute channel rcgen's CSR serialization exposes.
	let mut custom_extensions = Vec::new();
	for (oid, value) in &attributes.custom_attributes {
		let oid = parse_oid(oid)?;
		custom_extensions.push(CustomExtension::from_oid_content(&oid, value.clone().into_bytes()));
	}
	for (oid, value) in &attributes.extension_requests {
		let oid = parse_oid(oid)?;
		custom_extensions.push(CustomExtension::from_oid_content(&oid, value.clone().into_bytes()));
	}
	params.custom_extensions = custom_extensions;

	let pem = params
		.serialize_request(key.as_ref())
		.map_err(|e| Error::CertificateParse(format!("failed to build CSR: {e}")))?
		.pem()
		.map_err(|e| Error::CertificateParse(format!("failed to encode CSR as PEM: {e}")))?;

	Ok(Csr { pem })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_curve_is_rejected() {
		let err = curve_algorithm("secp521r1").unwrap_err();
		assert!(matches!(err, Error::UnsupportedCurve(_)));
	}

	#[test]
	fn known_curves_resolve() {
		assert!(curve_algorithm("prime256v1").is_ok());
		assert!(curve_algorithm("secp384r1").is_ok());
	}

	#[test]
	fn san_parsing_handles_all_prefixes_and_bare_entries() {
		assert!(matches!(parse_san("one").unwrap(), SanType::DnsName(_)));
		assert!(matches!(parse_san("DNS:two.com").unwrap(), SanType::DnsName(_)));
		assert!(matches!(
			parse_san("IP:192.168.0.1").unwrap(),
			SanType::IpAddress(_)
		));
	}

	#[test]
	fn oid_parsing_rejects_non_numeric_components() {
		assert!(parse_oid("1.2.3").is_ok());
		assert!(parse_oid("1.2.x").is_err());
	}

	#[test]
	fn san_set_is_exactly_alt_names_plus_certname() {
		let dir = tempfile::tempdir().unwrap();
		let config = crate::test_support::config_with(
			dir.path(),
			"dns_alt_names: \"alt-one.example.com, IP:192.168.0.1\"\n",
		);

		let sans = build_sans(&config).unwrap();
		assert_eq!(sans.len(), 3);
		assert!(matches!(&sans[0], SanType::DnsName(name) if name.to_string() == "alt-one.example.com"));
		assert!(matches!(&sans[1], SanType::IpAddress(ip) if ip.to_string() == "192.168.0.1"));
		assert!(matches!(&sans[2], SanType::DnsName(name) if name.to_string() == config.certname));
	}

	#[test]
	fn no_alt_names_still_includes_certname() {
		let dir = tempfile::tempdir().unwrap();
		let config = crate::test_support::test_config(dir.path());
		let sans = build_sans(&config).unwrap();
		assert_eq!(sans.len(), 1);
		assert!(matches!(&sans[0], SanType::DnsName(name) if name.to_string() == config.certname));
	}
}
