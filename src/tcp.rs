use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::{build_tcp_query, parse_response, Header};
use crate::error::ProbeError;
use crate::transport::{Exchange, QueryDescriptor};

/// Send a single length-prefixed DNS query over a fresh TCP connection.
///
/// Timing starts before the connect since every attempt pays for its own
/// handshake. The connection is closed when the function returns.
pub async fn send_tcp_query(
	server: SocketAddr,
	query: &QueryDescriptor,
) -> Result<Exchange, ProbeError> {
	let txid: u16 = rand::random();
	let framed = build_tcp_query(&query.domain, query.query_type, txid)?;

	let start = Instant::now();
	let mut stream = timeout(query.timeout, TcpStream::connect(server))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io(&format!("failed to connect to {}", server), e))?;

	timeout(query.timeout, stream.write_all(&framed))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to send query", e))?;

	// Two length bytes, then exactly that many message bytes
	let mut len_buf = [0u8; 2];
	let got = timeout(query.timeout, read_up_to(&mut stream, &mut len_buf))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to receive response length", e))?;
	if got < len_buf.len() {
		return Err(ProbeError::Protocol(
			"connection closed before response length was received".to_string(),
		));
	}

	let expected = u16::from_be_bytes(len_buf) as usize;
	let mut body = vec![0u8; expected];
	let received = timeout(query.timeout, read_up_to(&mut stream, &mut body))
		.await
		.map_err(|_| ProbeError::Timeout)?
		.map_err(|e| ProbeError::from_io("failed to receive response", e))?;
	let rtt = start.elapsed();
	drop(stream);

	if received < expected {
		return Err(ProbeError::Protocol(format!(
			"incomplete response: expected {} bytes, received {}",
			expected, received
		)));
	}

	debug!(%server, len = expected, txid, "TCP response received");

	let header = Header::from_bytes(&body)?;
	if header.id != txid {
		return Err(ProbeError::Protocol(format!(
			"txid mismatch: expected {}, got {}",
			txid, header.id
		)));
	}

	let response = parse_response(&body)?;
	debug!(ancount = response.header.ancount, decoded = response.answers.len(), "answers decoded");
	Ok(Exchange { rtt, answers: response.answers })
}

/// Fill `buf` until it is full or the peer closes; returns the bytes read.
pub(crate) async fn read_up_to<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
	R: AsyncRead + Unpin,
{
	let mut filled = 0;
	while filled < buf.len() {
		let n = reader.read(&mut buf[filled..]).await?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}
