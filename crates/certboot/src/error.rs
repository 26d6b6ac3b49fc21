//! Error taxonomy shared by every module in this crate.

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("another bootstrap instance is already running")]
	AnotherInstanceRunning,

	#[error("CA server has no certificate for this node (404)")]
	CaCertMissing,
	#[error("failed to download CA certificate: {status} {reason}")]
	CaCertDownloadFailed { status: u16, reason: String },
	#[error("CA server returned a malformed CA certificate bundle")]
	MalformedCaCert,

	#[error("CA server has no certificate revocation list (404)")]
	CrlMissing,
	#[error("failed to download certificate revocation list: {status} {reason}")]
	CrlDownloadFailed { status: u16, reason: String },
	#[error("CA server returned a malformed certificate revocation list")]
	MalformedCrl,

	#[error("unsupported named curve: {0}")]
	UnsupportedCurve(String),
	#[error("failed to load private key: {0}")]
	KeyLoadFailed(String),
	#[error("private key does not match certificate {subject}")]
	KeyCertMismatch { subject: String },
	#[error("certificate {subject} has been revoked")]
	CertificateRevoked { subject: String },
	#[error("certificate {subject} is expired or not yet valid")]
	CertificateExpired { subject: String },
	#[error("certificate {subject} does not chain to a trusted CA certificate")]
	UntrustedCertificate { subject: String },

	#[error("failed to submit certificate signing request: {status} {reason}")]
	CsrSubmitFailed { status: u16, reason: String },

	#[error("certificate parse error: {0}")]
	CertificateParse(String),

	#[error("HTTP transport error: {0}")]
	Transport(#[from] reqwest::Error),

	#[error("configuration error: {0}")]
	Config(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("lock file error: {0}")]
	Lock(String),
}

pub type Result<T> = std::result::Result<T, Error>;
