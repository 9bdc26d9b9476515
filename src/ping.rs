//! TCP and UDP echo "ping" probes.
//!
//! Each attempt sends a random alphanumeric payload and succeeds only when the
//! exact payload comes back. The interval is both the per-attempt deadline and
//! the pacing period: after an attempt the probe sleeps until
//! `send time + interval`, so a slow reply shortens the next wait.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ProbeError};
use crate::stats::{round2, ProbeStats, RttAccumulator};
use crate::tcp::read_up_to;
use crate::transport::{duration_ms, ProbeResult, ProbeStatus};

pub const MIN_PACKET_LEN: i64 = 5;
pub const MIN_INTERVAL_MS: i64 = 50;

fn default_packet_len() -> i64 {
	64
}

fn default_interval() -> i64 {
	1000
}

fn default_count() -> i64 {
	10
}

/// Unvalidated ping parameters
#[derive(Debug, Clone, Deserialize)]
pub struct PingRequest {
	pub ip: String,
	pub port: u16,
	#[serde(default = "default_packet_len")]
	pub packet_len: i64,
	#[serde(default = "default_interval")]
	pub interval: i64,
	#[serde(default = "default_count")]
	pub count: i64,
}

impl PingRequest {
	pub fn new(ip: &str, port: u16) -> Self {
		PingRequest {
			ip: ip.to_string(),
			port,
			packet_len: default_packet_len(),
			interval: default_interval(),
			count: default_count(),
		}
	}

	pub fn validate(&self) -> Result<PingConfig, ConfigError> {
		let ip: IpAddr = self.ip.trim().parse()
			.map_err(|_| ConfigError::InvalidServer(self.ip.clone()))?;
		if self.packet_len < MIN_PACKET_LEN {
			return Err(ConfigError::OutOfRange(format!("packet_len must be >= {}", MIN_PACKET_LEN)));
		}
		let packet_len = usize::try_from(self.packet_len)
			.ok()
			.filter(|len| *len <= u16::MAX as usize)
			.ok_or_else(|| ConfigError::OutOfRange(format!("packet_len {} is too large", self.packet_len)))?;
		if self.interval < MIN_INTERVAL_MS {
			return Err(ConfigError::OutOfRange(format!("interval must be >= {}", MIN_INTERVAL_MS)));
		}
		if self.count < 1 {
			return Err(ConfigError::InvalidCount);
		}
		let count = u32::try_from(self.count)
			.map_err(|_| ConfigError::OutOfRange(format!("count {} is too large", self.count)))?;

		Ok(PingConfig {
			target: SocketAddr::new(ip, self.port),
			packet_len,
			interval: Duration::from_millis(self.interval as u64),
			count,
		})
	}
}

#[derive(Debug, Clone)]
pub struct PingConfig {
	pub target: SocketAddr,
	pub packet_len: usize,
	pub interval: Duration,
	pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
	pub target: String,
	pub port: u16,
	pub packet_len: usize,
	pub results: Vec<ProbeResult>,
	pub stats: ProbeStats,
}

fn random_payload(len: usize) -> Vec<u8> {
	rand::thread_rng().sample_iter(&Alphanumeric).take(len).collect()
}

fn ping_result(seq: u32, outcome: Result<Duration, ProbeError>) -> ProbeResult {
	match outcome {
		Ok(rtt) => ProbeResult {
			seq,
			status: ProbeStatus::Success,
			rtt: Some(round2(duration_ms(rtt))),
			answers: None,
			message: None,
		},
		Err(err) => ProbeResult {
			seq,
			status: if err == ProbeError::Timeout { ProbeStatus::Timeout } else { ProbeStatus::Error },
			rtt: None,
			answers: None,
			message: Some(err.to_string()),
		},
	}
}

/// One TCP echo attempt over a fresh connection; the whole exchange shares one deadline.
async fn tcp_attempt(target: SocketAddr, payload: &[u8], deadline: Instant) -> Result<Duration, ProbeError> {
	let start = Instant::now();
	let mut stream = timeout_at(deadline, TcpStream::connect(target))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io(&format!("failed to connect to {}", target), e))?;

	timeout_at(deadline, stream.write_all(payload))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to send payload", e))?;

	let mut echo = vec![0u8; payload.len()];
	let got = timeout_at(deadline, read_up_to(&mut stream, &mut echo))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to receive echo", e))?;
	let rtt = start.elapsed();

	if echo[..got] != *payload {
		return Err(ProbeError::Protocol("invalid data received".to_string()));
	}
	Ok(rtt)
}

/// Wait for a datagram from `target` carrying exactly `payload`; anything else is ignored.
async fn udp_wait_for_echo(
	socket: &UdpSocket,
	target: SocketAddr,
	payload: &[u8],
	start: Instant,
	deadline: Instant,
) -> Result<Duration, ProbeError> {
	let mut buf = vec![0u8; 65536];
	loop {
		match timeout_at(deadline, socket.recv_from(&mut buf)).await {
			Err(_) => return Err(ProbeError::Timeout),
			Ok(Ok((len, src))) => {
				if src == target && buf[..len] == *payload {
					return Ok(start.elapsed());
				}
				debug!(%src, len, "ignoring unexpected datagram");
			}
			// ICMP errors surface as recv failures on some platforms; keep waiting
			Ok(Err(e)) => debug!(error = %e, "recv failed"),
		}
	}
}

async fn pace(deadline: Instant, seq: u32, count: u32) {
	if seq < count {
		sleep_until(deadline).await;
	}
}

/// TCP echo ping: one connection per attempt.
pub async fn tcp_ping(config: &PingConfig) -> PingReport {
	info!(addr = %config.target, len = config.packet_len, count = config.count, "starting TCP ping");
	let mut results = Vec::with_capacity(config.count as usize);
	for seq in 1..=config.count {
		let payload = random_payload(config.packet_len);
		let deadline = Instant::now() + config.interval;
		let result = ping_result(seq, tcp_attempt(config.target, &payload, deadline).await);
		log_result(&result);
		results.push(result);
		pace(deadline, seq, config.count).await;
	}
	build_report(config, results)
}

/// UDP echo ping: one socket for the whole run.
pub async fn udp_ping(config: &PingConfig) -> PingReport {
	info!(addr = %config.target, len = config.packet_len, count = config.count, "starting UDP ping");
	let bind_addr = if config.target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
	let socket = match UdpSocket::bind(bind_addr).await {
		Ok(socket) => Some(socket),
		Err(e) => {
			warn!(error = %e, "failed to bind UDP socket");
			None
		}
	};

	let mut results = Vec::with_capacity(config.count as usize);
	for seq in 1..=config.count {
		let payload = random_payload(config.packet_len);
		let start = Instant::now();
		let deadline = start + config.interval;
		let outcome = match &socket {
			Some(socket) => match timeout(config.interval, socket.send_to(&payload, config.target)).await {
				Err(_) => Err(ProbeError::Timeout),
				Ok(Err(e)) => Err(ProbeError::from_io("failed to send payload", e)),
				Ok(Ok(_)) => udp_wait_for_echo(socket, config.target, &payload, start, deadline).await,
			},
			None => Err(ProbeError::Connection("failed to bind UDP socket".to_string())),
		};
		let result = ping_result(seq, outcome);
		log_result(&result);
		results.push(result);
		pace(deadline, seq, config.count).await;
	}
	build_report(config, results)
}

fn log_result(result: &ProbeResult) {
	match result.status {
		ProbeStatus::Success => debug!(seq = result.seq, rtt = ?result.rtt, "reply"),
		_ => warn!(seq = result.seq, message = result.message.as_deref().unwrap_or_default(), "no reply"),
	}
}

fn build_report(config: &PingConfig, results: Vec<ProbeResult>) -> PingReport {
	let mut acc = RttAccumulator::new();
	for result in &results {
		acc.record(result.rtt);
	}
	PingReport {
		target: config.target.ip().to_string(),
		port: config.target.port(),
		packet_len: config.packet_len,
		results,
		stats: acc.finish(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncReadExt;
	use tokio::net::TcpListener;

	async fn spawn_tcp_echo(corrupt: bool) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			while let Ok((mut stream, _)) = listener.accept().await {
				tokio::spawn(async move {
					let mut buf = vec![0u8; 1024];
					if let Ok(n) = stream.read(&mut buf).await {
						if corrupt {
							buf[0] ^= 0x20;
						}
						let _ = stream.write_all(&buf[..n]).await;
					}
				});
			}
		});
		addr
	}

	async fn spawn_udp_echo(noise_first: bool) -> SocketAddr {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = socket.local_addr().unwrap();
		tokio::spawn(async move {
			let mut buf = vec![0u8; 2048];
			while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
				if noise_first {
					let _ = socket.send_to(b"noise", peer).await;
				}
				let _ = socket.send_to(&buf[..len], peer).await;
			}
		});
		addr
	}

	fn config(target: SocketAddr, count: i64) -> PingConfig {
		let mut request = PingRequest::new(&target.ip().to_string(), target.port());
		request.packet_len = 16;
		request.interval = 200;
		request.count = count;
		request.validate().unwrap()
	}

	#[test]
	fn test_validation_limits() {
		let mut request = PingRequest::new("127.0.0.1", 7);
		request.packet_len = 4;
		assert!(matches!(request.validate(), Err(ConfigError::OutOfRange(ref msg)) if msg.contains("packet_len")));

		let mut request = PingRequest::new("127.0.0.1", 7);
		request.interval = 49;
		assert!(matches!(request.validate(), Err(ConfigError::OutOfRange(ref msg)) if msg.contains("interval")));

		let mut request = PingRequest::new("127.0.0.1", 7);
		request.count = 0;
		assert_eq!(request.validate().unwrap_err(), ConfigError::InvalidCount);

		let request = PingRequest::new("not-an-ip", 7);
		assert!(matches!(request.validate(), Err(ConfigError::InvalidServer(_))));

		let mut request = PingRequest::new("::1", 7);
		request.packet_len = 5;
		request.interval = 50;
		let config = request.validate().unwrap();
		assert!(config.target.is_ipv6());
	}

	#[test]
	fn test_request_defaults() {
		let request: PingRequest = serde_json::from_str(r#"{"ip":"127.0.0.1","port":7}"#).unwrap();
		assert_eq!(request.packet_len, 64);
		assert_eq!(request.interval, 1000);
		assert_eq!(request.count, 10);
	}

	#[test]
	fn test_random_payload_is_alphanumeric() {
		let payload = random_payload(64);
		assert_eq!(payload.len(), 64);
		assert!(payload.iter().all(|b| b.is_ascii_alphanumeric()));
	}

	#[tokio::test]
	async fn test_tcp_ping_echo() {
		let target = spawn_tcp_echo(false).await;
		let report = tcp_ping(&config(target, 2)).await;
		assert_eq!(report.results.len(), 2);
		assert!(report.results.iter().all(|r| r.status == ProbeStatus::Success));
		assert_eq!(report.stats.loss, 0.0);
		assert_eq!(report.port, target.port());

		let json = serde_json::to_value(&report).unwrap();
		assert!(json["results"][0].get("answers").is_none());
		assert!(json["stats"].get("avg_rtt").is_some());
	}

	#[tokio::test]
	async fn test_tcp_ping_rejects_corrupted_echo() {
		let target = spawn_tcp_echo(true).await;
		let report = tcp_ping(&config(target, 1)).await;
		assert_eq!(report.results[0].status, ProbeStatus::Error);
		assert!(report.results[0].message.as_deref().unwrap_or_default().contains("invalid data"));
		assert_eq!(report.stats.received, 0);
	}

	#[tokio::test]
	async fn test_tcp_ping_connection_refused() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let target = listener.local_addr().unwrap();
		drop(listener);

		let report = tcp_ping(&config(target, 1)).await;
		assert_eq!(report.results[0].status, ProbeStatus::Error);
		assert_eq!(report.stats.loss, 100.0);
	}

	#[tokio::test]
	async fn test_udp_ping_ignores_unrelated_datagrams() {
		let target = spawn_udp_echo(true).await;
		let report = udp_ping(&config(target, 2)).await;
		assert!(report.results.iter().all(|r| r.status == ProbeStatus::Success));
		assert_eq!(report.stats.received, 2);
	}

	#[tokio::test]
	async fn test_udp_ping_timeout_and_pacing() {
		// Bound but silent
		let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let target = silent.local_addr().unwrap();

		let start = std::time::Instant::now();
		let report = udp_ping(&config(target, 2)).await;
		assert!(report.results.iter().all(|r| r.status == ProbeStatus::Timeout));
		assert_eq!(report.stats.loss, 100.0);
		assert!(report.stats.min_rtt.is_none());
		assert!(start.elapsed() >= Duration::from_millis(400));
		drop(silent);
	}
}
