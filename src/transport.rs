use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dns::{encode_name, ResourceRecord};
use crate::error::{ConfigError, ProbeError};
use crate::resolver::{doh_endpoint, parse_server};

/// DNS query type
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
	A,
	NS,
	CNAME,
	SOA,
	PTR,
	MX,
	TXT,
	AAAA,
	ANY,
}

impl QueryType {
	pub const ALL: [QueryType; 9] = [
		QueryType::A, QueryType::NS, QueryType::CNAME,
		QueryType::SOA, QueryType::PTR, QueryType::MX,
		QueryType::TXT, QueryType::AAAA, QueryType::ANY,
	];

	/// Numeric QTYPE code
	pub fn code(self) -> u16 {
		match self {
			QueryType::A => 1,
			QueryType::NS => 2,
			QueryType::CNAME => 5,
			QueryType::SOA => 6,
			QueryType::PTR => 12,
			QueryType::MX => 15,
			QueryType::TXT => 16,
			QueryType::AAAA => 28,
			QueryType::ANY => 255,
		}
	}

	pub fn from_code(code: u16) -> Option<Self> {
		QueryType::ALL.into_iter().find(|qt| qt.code() == code)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			QueryType::A => "A",
			QueryType::NS => "NS",
			QueryType::CNAME => "CNAME",
			QueryType::SOA => "SOA",
			QueryType::PTR => "PTR",
			QueryType::MX => "MX",
			QueryType::TXT => "TXT",
			QueryType::AAAA => "AAAA",
			QueryType::ANY => "ANY",
		}
	}
}

impl fmt::Display for QueryType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for QueryType {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let upper = s.trim().to_ascii_uppercase();
		QueryType::ALL.into_iter()
			.find(|qt| qt.as_str() == upper)
			.ok_or_else(|| ConfigError::UnknownRecordType(s.to_string()))
	}
}

/// How a query reaches the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
	Udp,
	Tcp,
	DohJson,
	DohWire,
}

impl fmt::Display for TransportKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			TransportKind::Udp => "UDP",
			TransportKind::Tcp => "TCP",
			TransportKind::DohJson => "DoH-JSON",
			TransportKind::DohWire => "DoH-wire",
		};
		f.write_str(label)
	}
}

/// Resolver target together with the transport used to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolver {
	Udp(SocketAddr),
	Tcp(SocketAddr),
	DohJson(String),
	DohWire(String),
}

impl Resolver {
	pub fn kind(&self) -> TransportKind {
		match self {
			Resolver::Udp(_) => TransportKind::Udp,
			Resolver::Tcp(_) => TransportKind::Tcp,
			Resolver::DohJson(_) => TransportKind::DohJson,
			Resolver::DohWire(_) => TransportKind::DohWire,
		}
	}

	pub fn server_addr(&self) -> Option<SocketAddr> {
		match self {
			Resolver::Udp(addr) | Resolver::Tcp(addr) => Some(*addr),
			_ => None,
		}
	}

	pub fn doh_url(&self) -> Option<&str> {
		match self {
			Resolver::DohJson(url) | Resolver::DohWire(url) => Some(url),
			_ => None,
		}
	}
}

impl fmt::Display for Resolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Resolver::Udp(addr) | Resolver::Tcp(addr) => write!(f, "{}", addr),
			Resolver::DohJson(url) | Resolver::DohWire(url) => f.write_str(url),
		}
	}
}

/// Everything a transport driver needs for a single attempt
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
	pub domain: String,
	pub query_type: QueryType,
	pub resolver: Resolver,
	pub timeout: Duration,
}

/// Outcome of one exchange with a resolver
#[derive(Debug, Clone)]
pub struct Exchange {
	pub rtt: Duration,
	pub answers: Vec<ResourceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
	Success,
	Timeout,
	Error,
}

impl fmt::Display for ProbeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			ProbeStatus::Success => "success",
			ProbeStatus::Timeout => "timeout",
			ProbeStatus::Error => "error",
		};
		f.write_str(label)
	}
}

/// Result of a single DNS probe attempt
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
	pub seq: u32,
	pub status: ProbeStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub rtt: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub answers: Option<Vec<ResourceRecord>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl ProbeResult {
	pub fn from_outcome(seq: u32, outcome: Result<Exchange, ProbeError>) -> Self {
		match outcome {
			Ok(exchange) => ProbeResult {
				seq,
				status: ProbeStatus::Success,
				rtt: Some(crate::stats::round2(duration_ms(exchange.rtt))),
				answers: Some(exchange.answers),
				message: None,
			},
			Err(err) => ProbeResult {
				seq,
				status: match err {
					ProbeError::Timeout => ProbeStatus::Timeout,
					_ => ProbeStatus::Error,
				},
				rtt: None,
				answers: None,
				message: Some(err.to_string()),
			},
		}
	}
}

/// Elapsed time in fractional milliseconds
pub fn duration_ms(d: Duration) -> f64 {
	d.as_secs_f64() * 1000.0
}

fn default_query_type() -> String {
	"A".to_string()
}

fn default_count() -> i64 {
	5
}

fn default_interval() -> i64 {
	1000
}

fn default_timeout() -> i64 {
	5000
}

/// Unvalidated probe parameters, as received from the CLI or an API body
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeRequest {
	pub domain: String,
	#[serde(default = "default_transport")]
	pub transport: TransportKind,
	#[serde(default)]
	pub server: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub doh_url: Option<String>,
	#[serde(default)]
	pub provider: Option<String>,
	#[serde(default = "default_query_type")]
	pub query_type: String,
	#[serde(default = "default_count")]
	pub count: i64,
	/// Milliseconds between attempts
	#[serde(default = "default_interval")]
	pub interval: i64,
	/// Per-attempt timeout in milliseconds
	#[serde(default = "default_timeout")]
	pub timeout: i64,
	/// Selects the binary DoH transport over the JSON one
	#[serde(default)]
	pub use_wire_format: bool,
}

fn default_transport() -> TransportKind {
	TransportKind::Udp
}

impl ProbeRequest {
	pub fn new(domain: &str, transport: TransportKind) -> Self {
		ProbeRequest {
			domain: domain.to_string(),
			transport,
			server: None,
			port: None,
			doh_url: None,
			provider: None,
			query_type: default_query_type(),
			count: default_count(),
			interval: default_interval(),
			timeout: default_timeout(),
			use_wire_format: false,
		}
	}

	/// Check every parameter and resolve the target, before any traffic is sent.
	pub fn validate(&self) -> Result<ProbeConfig, ConfigError> {
		let domain = self.domain.trim().trim_end_matches('.').to_string();
		if domain.is_empty() {
			return Err(ConfigError::EmptyDomain);
		}
		encode_name(&domain)?;

		let query_type: QueryType = self.query_type.parse()?;

		if self.count < 1 {
			return Err(ConfigError::InvalidCount);
		}
		let count = u32::try_from(self.count)
			.map_err(|_| ConfigError::OutOfRange(format!("count {} is too large", self.count)))?;
		if self.interval < 0 {
			return Err(ConfigError::OutOfRange("interval must not be negative".to_string()));
		}
		if self.timeout < 1 {
			return Err(ConfigError::OutOfRange("timeout must be at least 1 ms".to_string()));
		}

		let kind = match self.transport {
			TransportKind::DohJson if self.use_wire_format => TransportKind::DohWire,
			other => other,
		};
		let resolver = match kind {
			TransportKind::Udp | TransportKind::Tcp => {
				let server = self.server.as_deref()
					.ok_or_else(|| ConfigError::InvalidServer(String::new()))?;
				let addr = parse_server(server, self.port.unwrap_or(53))?;
				if kind == TransportKind::Udp {
					Resolver::Udp(addr)
				} else {
					Resolver::Tcp(addr)
				}
			}
			TransportKind::DohJson | TransportKind::DohWire => {
				let url = doh_endpoint(self.provider.as_deref(), self.doh_url.as_deref())?;
				if kind == TransportKind::DohWire {
					Resolver::DohWire(url)
				} else {
					Resolver::DohJson(url)
				}
			}
		};

		Ok(ProbeConfig {
			domain,
			query_type,
			resolver,
			count,
			interval: Duration::from_millis(self.interval as u64),
			timeout: Duration::from_millis(self.timeout as u64),
		})
	}
}

/// Validated configuration for one test run
#[derive(Debug, Clone)]
pub struct ProbeConfig {
	pub domain: String,
	pub query_type: QueryType,
	pub resolver: Resolver,
	pub count: u32,
	pub interval: Duration,
	pub timeout: Duration,
}

impl ProbeConfig {
	pub fn descriptor(&self) -> QueryDescriptor {
		QueryDescriptor {
			domain: self.domain.clone(),
			query_type: self.query_type,
			resolver: self.resolver.clone(),
			timeout: self.timeout,
		}
	}
}
