use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::ping::PingRequest;
use crate::resolver::DEFAULT_DOH_PROVIDER;
use crate::transport::{ProbeRequest, TransportKind};

/// DNS and echo-ping network diagnostics
#[derive(Parser, Debug)]
#[command(name = "dnsprobe", version)]
#[command(about = "Measure DNS resolution and echo latency over UDP, TCP and DoH")]
pub struct Cli {
	/// Log level used when RUST_LOG is not set
	#[arg(long = "log-level", global = true, default_value = "warn")]
	pub log_level: String,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Query a DNS server over UDP
	Udp {
		#[command(flatten)]
		target: ServerArgs,
		#[command(flatten)]
		query: QueryArgs,
		#[command(flatten)]
		output: OutputArgs,
	},
	/// Query a DNS server over TCP
	Tcp {
		#[command(flatten)]
		target: ServerArgs,
		#[command(flatten)]
		query: QueryArgs,
		#[command(flatten)]
		output: OutputArgs,
	},
	/// Query a DNS-over-HTTPS endpoint
	Doh {
		/// Well-known provider name (Google, Cloudflare, Quad9)
		#[arg(short = 'p', long = "provider", default_value = DEFAULT_DOH_PROVIDER)]
		provider: String,

		/// Explicit DoH endpoint URL, overrides --provider
		#[arg(short = 'u', long = "url")]
		url: Option<String>,

		/// Send RFC 8484 wire-format queries instead of JSON
		#[arg(long = "wire")]
		wire: bool,

		#[command(flatten)]
		query: QueryArgs,
		#[command(flatten)]
		output: OutputArgs,
	},
	/// Echo ping over fresh TCP connections
	TcpPing(PingArgs),
	/// Echo ping over UDP datagrams
	UdpPing(PingArgs),
	/// Run the HTTP API server
	Serve {
		/// Address to listen on
		#[arg(short = 'b', long = "bind", default_value = "127.0.0.1:8080")]
		bind: SocketAddr,
	},
}

#[derive(Args, Debug)]
pub struct ServerArgs {
	/// DNS server address (e.g. 1.1.1.1, 1.1.1.1:53 or [2606:4700::1111]:53)
	#[arg(short = 's', long = "server")]
	pub server: String,

	/// Port used when the server address has none
	#[arg(long = "port", default_value = "53")]
	pub port: u16,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
	/// Domain name to resolve
	pub domain: String,

	/// Record type (A, NS, CNAME, SOA, PTR, MX, TXT, AAAA, ANY)
	#[arg(short = 't', long = "type", default_value = "A")]
	pub query_type: String,

	/// Number of queries to send
	#[arg(short = 'c', long = "count", default_value = "5")]
	pub count: i64,

	/// Delay between queries in milliseconds
	#[arg(short = 'i', long = "interval", default_value = "1000")]
	pub interval: i64,

	/// Per-query timeout in milliseconds
	#[arg(short = 'w', long = "timeout", default_value = "5000")]
	pub timeout: i64,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
	/// Print the report as JSON instead of a table
	#[arg(long = "json")]
	pub json: bool,

	/// Output CSV file path
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
	/// Target IP address
	pub ip: String,

	/// Target port
	pub port: u16,

	/// Payload length in bytes
	#[arg(short = 'l', long = "len", default_value = "64")]
	pub packet_len: i64,

	/// Send interval and reply deadline in milliseconds
	#[arg(short = 'i', long = "interval", default_value = "1000")]
	pub interval: i64,

	/// Number of pings to send
	#[arg(short = 'c', long = "count", default_value = "10")]
	pub count: i64,

	#[command(flatten)]
	pub output: OutputArgs,
}

impl QueryArgs {
	/// Build an unvalidated request for `transport` with these query settings.
	pub fn to_request(&self, transport: TransportKind) -> ProbeRequest {
		let mut request = ProbeRequest::new(&self.domain, transport);
		request.query_type = self.query_type.clone();
		request.count = self.count;
		request.interval = self.interval;
		request.timeout = self.timeout;
		request
	}
}

impl PingArgs {
	pub fn to_request(&self) -> PingRequest {
		let mut request = PingRequest::new(&self.ip, self.port);
		request.packet_len = self.packet_len;
		request.interval = self.interval;
		request.count = self.count;
		request
	}
}
