use std::path::PathBuf;

use certboot::config::{CertificateRevocation, KeyType, RawConfig};
use certboot::{Config, FsCertProvider, HttpCaClient, StateMachine};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Bootstrap a node's SSL identity against a certificate authority", long_about = None)]
struct Args {
	/// Path to the YAML config file.
	#[arg(long, value_name = "path", default_value = "/etc/bootstrap/ssl.yaml")]
	config: PathBuf,

	#[arg(long, value_name = "name")]
	certname: Option<String>,

	#[arg(long, value_name = "url")]
	ca_server: Option<String>,

	#[arg(long, value_name = "rsa|ec")]
	key_type: Option<KeyType>,

	#[arg(long, value_name = "curve")]
	named_curve: Option<String>,

	#[arg(long, value_name = "list")]
	dns_alt_names: Option<String>,

	#[arg(long, value_name = "path")]
	csr_attributes_path: Option<PathBuf>,

	#[arg(long, value_name = "off|chain")]
	certificate_revocation: Option<CertificateRevocation>,

	#[arg(long, value_name = "seconds")]
	crl_refresh_interval: Option<u64>,

	#[arg(long, value_name = "seconds")]
	waitforcert: Option<u64>,

	#[arg(long, value_name = "seconds")]
	maxwaitforcert: Option<u64>,

	#[arg(long, value_name = "path")]
	ssldir: Option<PathBuf>,

	/// Only fetch and persist the CA trust bundle (and CRL, unless disabled); do not
	/// generate a key or request a certificate.
	#[arg(long)]
	ca_only: bool,
}

impl clap::ValueEnum for KeyType {
	fn value_variants<'a>() -> &'a [Self] {
		&[KeyType::Rsa, KeyType::Ec]
	}
	fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
		Some(match self {
			KeyType::Rsa => clap::builder::PossibleValue::new("rsa"),
			KeyType::Ec => clap::builder::PossibleValue::new("ec"),
		})
	}
}

impl clap::ValueEnum for CertificateRevocation {
	fn value_variants<'a>() -> &'a [Self] {
		&[CertificateRevocation::Off, CertificateRevocation::Chain]
	}
	fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
		Some(match self {
			CertificateRevocation::Off => clap::builder::PossibleValue::new("off"),
			CertificateRevocation::Chain => clap::builder::PossibleValue::new("chain"),
		})
	}
}

impl From<Args> for RawConfig {
	fn from(args: Args) -> Self {
		RawConfig {
			certname: args.certname,
			ca_server: args.ca_server,
			key_type: args.key_type,
			named_curve: args.named_curve,
			dns_alt_names: args.dns_alt_names,
			csr_attributes_path: args.csr_attributes_path,
			certificate_revocation: args.certificate_revocation,
			crl_refresh_interval: args.crl_refresh_interval,
			waitforcert: args.waitforcert,
			maxwaitforcert: args.maxwaitforcert,
			ssldir: args.ssldir,
		}
	}
}

fn main() -> anyhow::Result<()> {
	certboot_core::telemetry::init();

	let args = Args::parse();
	let ca_only = args.ca_only;
	let config_path = args.config.clone();
	let cli_overrides: RawConfig = args.into();

	let file_config = certboot::config::load_file(&config_path)?;
	let config = certboot::config::resolve(file_config, cli_overrides)?;

	match run(config, ca_only) {
		Ok(()) => Ok(()),
		Err(e) => {
			tracing::error!(error = %e, "bootstrap failed");
			std::process::exit(1);
		},
	}
}

fn run(config: Config, ca_only: bool) -> anyhow::Result<()> {
	let provider = FsCertProvider::new(config.clone());
	let ca = HttpCaClient::new(config.ca_server.clone())?;
	let machine = StateMachine::new(config, provider, ca);

	if ca_only {
		machine.ensure_ca_certificates()?;
		tracing::info!("CA trust material is up to date");
	} else {
		machine.ensure_client_certificate()?;
		tracing::info!("client certificate is signed and valid");
	}
	Ok(())
}
