use std::io;

use thiserror::Error;

/// Errors raised while encoding or decoding DNS wire-format messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
	#[error("response too short: {0} bytes, need at least 12")]
	TooShort(usize),
	#[error("message truncated at offset {0}")]
	Truncated(usize),
	#[error("malformed message: {0}")]
	MalformedMessage(String),
	#[error("label '{0}' exceeds 63 bytes")]
	LabelTooLong(String),
	#[error("encoded name is {0} bytes, limit is 255")]
	NameTooLong(usize),
	#[error("not a DNS response")]
	NotResponse,
	#[error("DNS server returned error: {0}")]
	ErrorResponse(String),
}

/// Failure of a single probe attempt.
///
/// Every variant is recorded against the attempt that produced it; none of
/// them abort the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
	#[error("query timed out")]
	Timeout,
	#[error("connection error: {0}")]
	Connection(String),
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error("decode error: {0}")]
	Decode(String),
}

impl ProbeError {
	/// Classify a socket error; deadline expiries count as timeouts.
	pub fn from_io(context: &str, err: io::Error) -> Self {
		match err.kind() {
			io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeError::Timeout,
			_ => ProbeError::Connection(format!("{}: {}", context, err)),
		}
	}
}

impl From<WireError> for ProbeError {
	fn from(err: WireError) -> Self {
		ProbeError::Protocol(err.to_string())
	}
}

/// Invalid probe parameters, rejected before a run starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("unknown record type '{0}'")]
	UnknownRecordType(String),
	#[error("count must be at least 1")]
	InvalidCount,
	#[error("domain name must not be empty")]
	EmptyDomain,
	#[error("invalid domain name: {0}")]
	InvalidDomain(#[from] WireError),
	#[error("invalid server address '{0}'")]
	InvalidServer(String),
	#[error("unknown DoH provider '{0}'")]
	UnknownProvider(String),
	#[error("invalid DoH URL '{0}'")]
	InvalidUrl(String),
	#[error("{0}")]
	OutOfRange(String),
}
