//! Drives the state progression from `NeedCACerts` to a terminal `SslContext`.

use std::time::SystemTime;

use crate::ca_client::CaClient;
use crate::cert_provider::CertProvider;
use crate::config::Config;
use crate::error::Result;
use crate::lockfile::LockFile;
use crate::ssl_context::SslContext;
use crate::states::{RunContext, State};

pub struct StateMachine<P: CertProvider, C: CaClient> {
	config: Config,
	provider: P,
	ca: C,
	lock: LockFile,
}

impl<P: CertProvider, C: CaClient> StateMachine<P, C> {
	pub fn new(config: Config, provider: P, ca: C) -> Self {
		let lock = LockFile::new(config.lock_path());
		StateMachine { config, provider, ca, lock }
	}

	/// Run until an `SslContext` carrying CA certs and CRLs (possibly empty) exists;
	/// stops before ever generating a key or talking to the CSR/cert routes.
	pub fn ensure_ca_certificates(&self) -> Result<SslContext> {
		let _guard = self.lock.lock()?;
		let run_ctx = self.run_context();

		let mut state = State::NeedCACerts;
		loop {
			state = state.next(&run_ctx)?;
			if let State::NeedKey(context) = state {
				return Ok(context);
			}
		}
	}

	/// Run to completion: CA trust, key, CSR, signed cert.
	pub fn ensure_client_certificate(&self) -> Result<SslContext> {
		let _guard = self.lock.lock()?;
		let run_ctx = self.run_context();

		let mut state = State::NeedCACerts;
		loop {
			state = state.next(&run_ctx)?;
			if let State::Done(context) = state {
				return Ok(context);
			}
		}
	}

	fn run_context(&self) -> RunContext {
		RunContext {
			config: &self.config,
			provider: &self.provider,
			ca: &self.ca,
			wait_deadline: self.config.maxwaitforcert.map(|d| SystemTime::now() + d),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;

	use super::*;
	use crate::ca_client::CaResponse;
	use crate::error::Error;
	use crate::test_support::{FakeCaClient, FakeProvider, config_with, issue_cert, test_ca, test_config, to_parsed};

	#[test]
	fn fully_provisioned_host_performs_only_loads() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());

		let (ca_key, ca_cert) = test_ca();
		let ca_parsed = to_parsed(&ca_cert);
		let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
		let cert = issue_cert(&ca_key, &ca_cert, "host", &key);
		let parsed_cert = to_parsed(&cert);

		let provider = FakeProvider {
			cacerts: RefCell::new(Some((ca_cert.pem().into_bytes(), vec![ca_parsed]))),
			crls: RefCell::new(Some(Vec::new())),
			crl_last_update: RefCell::new(Some(SystemTime::now())),
			private_key: RefCell::new(Some(key.serialize_pem())),
			client_cert: RefCell::new(Some(parsed_cert)),
			..Default::default()
		};
		let ca = FakeCaClient::default();

		let machine = StateMachine::new(config, provider, ca);
		let context = machine.ensure_client_certificate().unwrap();
		assert!(context.client_cert.is_some());
		// Even on the all-cached path, the CA bundle must still be installed as the
		// trust store for any later verified call; nothing else should be called.
		assert_eq!(machine.ca.calls_to("trust_ca_bundle"), 1);
		assert_eq!(machine.ca.calls_to("get_ca_certificate"), 0);
		assert_eq!(machine.ca.calls_to("get_crl"), 0);
		assert_eq!(machine.ca.calls_to("submit_csr"), 0);
		assert_eq!(machine.ca.calls_to("get_client_cert"), 0);
	}

	#[test]
	fn missing_ca_certificate_is_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());
		let provider = FakeProvider::default();
		let ca = FakeCaClient::default();
		*ca.ca_certificate.borrow_mut() = Some(CaResponse::Status {
			status: 404,
			reason: "Not Found".to_string(),
			body: String::new(),
		});

		let machine = StateMachine::new(config, provider, ca);
		let err = machine.ensure_ca_certificates().unwrap_err();
		assert!(matches!(err, Error::CaCertMissing));
	}

	#[test]
	fn crl_refresh_failure_keeps_local_crls() {
		let dir = tempfile::tempdir().unwrap();
		// A short refresh interval so the local CRLs are considered stale and a refresh
		// is attempted, without needing to fake the clock.
		let config = config_with(dir.path(), "crl_refresh_interval: 0\n");

		let (ca_key, ca_cert) = test_ca();
		let ca_parsed = to_parsed(&ca_cert);

		let provider = FakeProvider {
			cacerts: RefCell::new(Some((ca_cert.pem().into_bytes(), vec![ca_parsed]))),
			crls: RefCell::new(Some(Vec::new())),
			crl_last_update: RefCell::new(Some(
				SystemTime::now() - std::time::Duration::from_secs(3600),
			)),
			..Default::default()
		};
		let ca = FakeCaClient::default();
		*ca.crl.borrow_mut() = Some(CaResponse::Status {
			status: 503,
			reason: "Service Unavailable".to_string(),
			body: String::new(),
		});

		let machine = StateMachine::new(config, provider, ca);
		let context = machine.ensure_ca_certificates().unwrap();
		assert!(context.crls.is_empty());
		assert_eq!(machine.ca.calls_to("get_crl"), 1);
		assert_eq!(*machine.provider.saved_crls.borrow(), 0);
		let _ = ca_key;
	}

	#[test]
	fn stale_pid_lock_is_stolen_by_a_full_run() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());
		std::fs::create_dir_all(dir.path()).unwrap();
		std::fs::write(config.lock_path(), "2147483647").unwrap();

		let (ca_key, ca_cert) = test_ca();
		let ca_parsed = to_parsed(&ca_cert);
		let provider = FakeProvider {
			cacerts: RefCell::new(Some((ca_cert.pem().into_bytes(), vec![ca_parsed]))),
			crls: RefCell::new(Some(Vec::new())),
			crl_last_update: RefCell::new(Some(SystemTime::now())),
			..Default::default()
		};
		let ca = FakeCaClient::default();

		let lock_path = config.lock_path();
		let machine = StateMachine::new(config, provider, ca);
		let context = machine.ensure_ca_certificates().unwrap();
		assert_eq!(context.cacerts.len(), 1);
		assert!(!lock_path.exists());
		let _ = ca_key;
	}
}
