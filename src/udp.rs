use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::{build_query, parse_response, Header};
use crate::error::ProbeError;
use crate::transport::{Exchange, QueryDescriptor};

/// Largest datagram accepted as a reply
const RECV_BUFFER_LEN: usize = 4096;

/// Send a single DNS query over UDP and measure latency.
///
/// A dedicated socket is bound for each attempt and released when the
/// function returns, whatever the outcome. The reply's transaction id must
/// match the query's; a mismatch is a protocol error, never a retry.
pub async fn send_udp_query(
	server: SocketAddr,
	query: &QueryDescriptor,
) -> Result<Exchange, ProbeError> {
	let txid: u16 = rand::random();
	let query_bytes = build_query(&query.domain, query.query_type, txid)?;

	// Bind a socket of the server's address family
	let bind_addr = if server.is_ipv4() {
		"0.0.0.0:0"
	} else {
		"[::]:0"
	};
	let socket = UdpSocket::bind(bind_addr).await
		.map_err(|e| ProbeError::from_io("failed to bind UDP socket", e))?;

	let start = Instant::now();
	timeout(query.timeout, socket.send_to(&query_bytes, server))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to send query", e))?;

	let mut buf = vec![0u8; RECV_BUFFER_LEN];
	let (len, src) = timeout(query.timeout, socket.recv_from(&mut buf))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to receive response", e))?;
	let rtt = start.elapsed();
	let reply = &buf[..len];

	debug!(%server, %src, len, txid, "UDP response received");

	let header = Header::from_bytes(reply)?;
	if header.id != txid {
		return Err(ProbeError::Protocol(format!(
			"txid mismatch: expected {}, got {}",
			txid, header.id
		)));
	}

	let response = parse_response(reply)?;
	debug!(ancount = response.header.ancount, decoded = response.answers.len(), "answers decoded");
	Ok(Exchange { rtt, answers: response.answers })
}
