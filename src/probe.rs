use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::doh::{send_doh_json_query, send_doh_wire_query};
use crate::error::ProbeError;
use crate::stats::{ProbeStats, RttAccumulator};
use crate::tcp::send_tcp_query;
use crate::transport::{
	Exchange, ProbeConfig, ProbeResult, ProbeStatus, QueryDescriptor, QueryType, Resolver, TransportKind,
};
use crate::udp::send_udp_query;

/// Outcome of a full DNS test run
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
	pub domain: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub server: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub doh_url: Option<String>,
	pub transport: TransportKind,
	pub query_type: QueryType,
	pub results: Vec<ProbeResult>,
	pub stats: ProbeStats,
}

/// Dispatch one query to the driver for its resolver.
pub async fn send(query: &QueryDescriptor) -> Result<Exchange, ProbeError> {
	match &query.resolver {
		Resolver::Udp(addr) => send_udp_query(*addr, query).await,
		Resolver::Tcp(addr) => send_tcp_query(*addr, query).await,
		Resolver::DohJson(url) => send_doh_json_query(url, query).await,
		Resolver::DohWire(url) => send_doh_wire_query(url, query).await,
	}
}

/// Run `count` attempts in order, sleeping `interval` between them.
///
/// The delay is fixed: it does not account for the time an attempt took, and
/// no sleep follows the last attempt. `attempt` receives the 1-based sequence
/// number.
pub async fn run_sequence<T, F, Fut>(count: u32, interval: Duration, mut attempt: F) -> Vec<T>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = T>,
{
	let mut results = Vec::with_capacity(count as usize);
	for seq in 1..=count {
		results.push(attempt(seq).await);
		if seq < count && !interval.is_zero() {
			tokio::time::sleep(interval).await;
		}
	}
	results
}

/// Execute a validated DNS test and aggregate its statistics.
pub async fn run_probe(config: &ProbeConfig) -> TestReport {
	let descriptor = config.descriptor();
	info!(
		domain = %config.domain,
		resolver = %config.resolver,
		query_type = %config.query_type,
		count = config.count,
		"starting DNS test"
	);

	let results = run_sequence(config.count, config.interval, |seq| {
		let descriptor = &descriptor;
		async move {
			let result = ProbeResult::from_outcome(seq, send(descriptor).await);
			log_result(&result);
			result
		}
	}).await;

	let report = build_report(config, results);
	info!(
		transmitted = report.stats.transmitted,
		received = report.stats.received,
		loss = report.stats.loss,
		"DNS test finished"
	);
	report
}

fn log_result(result: &ProbeResult) {
	match result.status {
		ProbeStatus::Success => debug!(seq = result.seq, rtt = ?result.rtt, "query succeeded"),
		_ => warn!(
			seq = result.seq,
			status = %result.status,
			message = result.message.as_deref().unwrap_or_default(),
			"query failed"
		),
	}
}

/// Assemble a report from per-attempt results.
pub fn build_report(config: &ProbeConfig, results: Vec<ProbeResult>) -> TestReport {
	let mut acc = RttAccumulator::new();
	for result in &results {
		acc.record(result.rtt);
	}

	let server = config.resolver.server_addr();
	TestReport {
		domain: config.domain.clone(),
		server: server.map(|addr| addr.ip().to_string()),
		port: server.map(|addr| addr.port()),
		doh_url: config.resolver.doh_url().map(str::to_string),
		transport: config.resolver.kind(),
		query_type: config.query_type,
		results,
		stats: acc.finish(),
	}
}
