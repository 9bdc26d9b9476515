use std::collections::HashSet;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::WireError;
use crate::transport::QueryType;

/// Size of the fixed DNS message header
pub const HEADER_LEN: usize = 12;

/// Flags for a standard query with recursion desired
const FLAGS_STANDARD_QUERY: u16 = 0x0100;
const FLAG_RESPONSE: u16 = 0x8000;
const CLASS_IN: u16 = 1;

const LABEL_TYPE_MASK: u8 = 0xC0;
const MAX_LABEL_LEN: usize = 63;
/// Longest encoded name, length bytes and terminator included
const MAX_NAME_LEN: usize = 255;

/// The 12-byte header at the start of every DNS message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub id: u16,
	pub flags: u16,
	pub qdcount: u16,
	pub ancount: u16,
	pub nscount: u16,
	pub arcount: u16,
}

impl Header {
	/// Header for a single-question recursive query.
	pub fn query(id: u16) -> Self {
		Header {
			id,
			flags: FLAGS_STANDARD_QUERY,
			qdcount: 1,
			ancount: 0,
			nscount: 0,
			arcount: 0,
		}
	}

	pub fn rcode(&self) -> u8 {
		(self.flags & 0x000F) as u8
	}

	pub fn is_response(&self) -> bool {
		self.flags & FLAG_RESPONSE != 0
	}

	pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
		let mut out = [0u8; HEADER_LEN];
		let fields = [
			self.id, self.flags, self.qdcount,
			self.ancount, self.nscount, self.arcount,
		];
		for (i, field) in fields.iter().enumerate() {
			out[i * 2..i * 2 + 2].copy_from_slice(&field.to_be_bytes());
		}
		out
	}

	/// Unpack the header from the first 12 bytes of a message.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
		if bytes.len() < HEADER_LEN {
			return Err(WireError::TooShort(bytes.len()));
		}
		let field = |i: usize| u16::from_be_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
		Ok(Header {
			id: field(0),
			flags: field(1),
			qdcount: field(2),
			ancount: field(3),
			nscount: field(4),
			arcount: field(5),
		})
	}
}

/// Symbolic name of a response code, e.g. `NXDOMAIN` for 3.
pub fn rcode_name(rcode: u16) -> String {
	match rcode {
		0 => "NOERROR".to_string(),
		1 => "FORMERR".to_string(),
		2 => "SERVFAIL".to_string(),
		3 => "NXDOMAIN".to_string(),
		4 => "NOTIMP".to_string(),
		5 => "REFUSED".to_string(),
		other => format!("unknown({})", other),
	}
}

/// Encode a dotted domain name as length-prefixed labels.
///
/// Empty labels (leading, trailing or doubled dots) are skipped. Labels longer
/// than 63 bytes are rejected since their length byte would collide with the
/// compression pointer bits. The encoded name may not exceed 255 bytes.
pub fn encode_name(domain: &str) -> Result<Vec<u8>, WireError> {
	let mut encoded = Vec::with_capacity(domain.len() + 2);
	for label in domain.split('.').filter(|l| !l.is_empty()) {
		if label.len() > MAX_LABEL_LEN {
			return Err(WireError::LabelTooLong(label.to_string()));
		}
		encoded.push(label.len() as u8);
		encoded.extend_from_slice(label.as_bytes());
	}
	encoded.push(0);
	if encoded.len() > MAX_NAME_LEN {
		return Err(WireError::NameTooLong(encoded.len()));
	}
	Ok(encoded)
}

/// Decode a possibly compressed name starting at `offset`.
///
/// Returns the dotted name and the offset just past the name as it appears
/// at `offset` (after the first pointer if the name is compressed).
/// Pointers must point backwards and no offset may be visited twice.
pub fn decode_name(message: &[u8], offset: usize) -> Result<(String, usize), WireError> {
	let mut labels: Vec<String> = Vec::new();
	let mut visited = HashSet::new();
	let mut next_offset: Option<usize> = None;
	let mut pos = offset;

	loop {
		if !visited.insert(pos) {
			return Err(WireError::MalformedMessage(format!(
				"compression loop revisits offset {}", pos
			)));
		}
		let len = *message.get(pos).ok_or(WireError::Truncated(pos))?;

		match len & LABEL_TYPE_MASK {
			0x00 if len == 0 => {
				let next = *next_offset.get_or_insert(pos + 1);
				return Ok((labels.join("."), next));
			}
			0x00 => {
				let start = pos + 1;
				let end = start + len as usize;
				let label = message.get(start..end)
					.ok_or(WireError::Truncated(start))?;
				labels.push(String::from_utf8_lossy(label).into_owned());
				pos = end;
			}
			LABEL_TYPE_MASK => {
				let low = *message.get(pos + 1).ok_or(WireError::Truncated(pos + 1))?;
				let target = (((len & 0x3F) as usize) << 8) | low as usize;
				if target >= pos {
					return Err(WireError::MalformedMessage(format!(
						"compression pointer at offset {} targets offset {}", pos, target
					)));
				}
				next_offset.get_or_insert(pos + 2);
				pos = target;
			}
			_ => {
				return Err(WireError::MalformedMessage(format!(
					"reserved label type 0x{:02x} at offset {}", len, pos
				)));
			}
		}
	}
}

/// Return the offset just past the name at `offset` without decoding it.
fn skip_name(message: &[u8], offset: usize) -> Result<usize, WireError> {
	let mut pos = offset;
	loop {
		let len = *message.get(pos).ok_or(WireError::Truncated(pos))?;
		if len == 0 {
			return Ok(pos + 1);
		}
		if len & LABEL_TYPE_MASK == LABEL_TYPE_MASK {
			return Ok(pos + 2);
		}
		pos += len as usize + 1;
	}
}

/// Build a DNS query message for the given domain and query type.
///
/// Returns the serialized query bytes ready to send over UDP or as a DoH body.
pub fn build_query(domain: &str, query_type: QueryType, txid: u16) -> Result<Vec<u8>, WireError> {
	let name = encode_name(domain)?;
	let mut bytes = Vec::with_capacity(HEADER_LEN + name.len() + 4);
	bytes.extend_from_slice(&Header::query(txid).to_bytes());
	bytes.extend_from_slice(&name);
	bytes.extend_from_slice(&query_type.code().to_be_bytes());
	bytes.extend_from_slice(&CLASS_IN.to_be_bytes());
	Ok(bytes)
}

/// Build a query prefixed with its 2-byte big-endian length, for stream transports.
pub fn build_tcp_query(domain: &str, query_type: QueryType, txid: u16) -> Result<Vec<u8>, WireError> {
	let query = build_query(domain, query_type, txid)?;
	let mut framed = Vec::with_capacity(query.len() + 2);
	framed.extend_from_slice(&(query.len() as u16).to_be_bytes());
	framed.extend_from_slice(&query);
	Ok(framed)
}

/// Decoded, type-specific payload of a resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
	A([u8; 4]),
	Aaaa([u8; 16]),
	Mx { preference: u16, exchange: String },
	/// NS, CNAME and PTR targets
	Name(String),
	Txt(String),
	/// Unrecognized type, shown as lowercase hex
	Unknown(Vec<u8>),
	/// Data already in presentation form, as delivered by DoH JSON resolvers
	Presentation(String),
}

impl fmt::Display for RecordData {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RecordData::A(octets) => {
				write!(f, "{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
			}
			RecordData::Aaaa(octets) => {
				let groups: Vec<String> = octets.chunks(2)
					.map(|pair| format!("{:02x}{:02x}", pair[0], pair[1]))
					.collect();
				write!(f, "{}", groups.join(":"))
			}
			RecordData::Mx { preference, exchange } => write!(f, "{} {}", preference, exchange),
			RecordData::Name(name) => write!(f, "{}", name),
			RecordData::Txt(text) => write!(f, "{}", text),
			RecordData::Unknown(bytes) => {
				for b in bytes {
					write!(f, "{:02x}", b)?;
				}
				Ok(())
			}
			RecordData::Presentation(text) => write!(f, "{}", text),
		}
	}
}

/// One answer record from a DNS response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
	pub name: String,
	#[serde(rename = "type", serialize_with = "serialize_record_type")]
	pub rtype: u16,
	pub class: u16,
	pub ttl: u32,
	#[serde(skip)]
	pub rdlength: u16,
	#[serde(serialize_with = "serialize_display")]
	pub data: RecordData,
}

impl ResourceRecord {
	/// Type symbol for known types, the decimal code otherwise.
	pub fn type_name(&self) -> String {
		record_type_name(self.rtype)
	}
}

pub fn record_type_name(code: u16) -> String {
	QueryType::from_code(code)
		.map(|qt| qt.as_str().to_string())
		.unwrap_or_else(|| code.to_string())
}

fn serialize_record_type<S: Serializer>(code: &u16, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&record_type_name(*code))
}

fn serialize_display<S: Serializer>(data: &RecordData, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.collect_str(data)
}

/// Decode the RDATA of a record of type `rtype` located at `offset`.
fn decode_rdata(
	message: &[u8],
	offset: usize,
	rtype: u16,
	rdlength: u16,
) -> Result<RecordData, WireError> {
	let rdata = message.get(offset..offset + rdlength as usize)
		.ok_or(WireError::Truncated(offset))?;

	let data = match QueryType::from_code(rtype) {
		// Addresses of the wrong size fall through to the hex form
		Some(QueryType::A) if rdata.len() == 4 => {
			RecordData::A([rdata[0], rdata[1], rdata[2], rdata[3]])
		}
		Some(QueryType::AAAA) if rdata.len() == 16 => {
			let mut octets = [0u8; 16];
			octets.copy_from_slice(rdata);
			RecordData::Aaaa(octets)
		}
		Some(QueryType::MX) => {
			let pref = rdata.get(..2).ok_or(WireError::Truncated(offset))?;
			let (exchange, _) = decode_name(message, offset + 2)?;
			RecordData::Mx {
				preference: u16::from_be_bytes([pref[0], pref[1]]),
				exchange,
			}
		}
		Some(QueryType::NS) | Some(QueryType::CNAME) | Some(QueryType::PTR) => {
			let (name, _) = decode_name(message, offset)?;
			RecordData::Name(name)
		}
		Some(QueryType::TXT) => {
			// Only the first character-string is decoded
			let len = *rdata.first().ok_or(WireError::Truncated(offset))? as usize;
			let text = rdata.get(1..1 + len).ok_or(WireError::Truncated(offset + 1))?;
			RecordData::Txt(String::from_utf8_lossy(text).into_owned())
		}
		_ => RecordData::Unknown(rdata.to_vec()),
	};
	Ok(data)
}

/// Decode one resource record, returning it and the offset of the next one.
fn decode_record(message: &[u8], offset: usize) -> Result<(ResourceRecord, usize), WireError> {
	let (name, next) = decode_name(message, offset)?;
	let fixed = message.get(next..next + 10).ok_or(WireError::Truncated(next))?;
	let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
	let class = u16::from_be_bytes([fixed[2], fixed[3]]);
	let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
	let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]);

	let rdata_offset = next + 10;
	let data = decode_rdata(message, rdata_offset, rtype, rdlength)?;

	Ok((
		ResourceRecord { name, rtype, class, ttl, rdlength, data },
		rdata_offset + rdlength as usize,
	))
}

/// A successfully parsed DNS response
#[derive(Debug, Clone)]
pub struct DnsResponse {
	pub header: Header,
	pub answers: Vec<ResourceRecord>,
}

/// Parse a DNS response and decode its answer section.
///
/// A non-zero response code is returned as `WireError::ErrorResponse`
/// carrying the symbolic code, without decoding any answers. A truncated or
/// malformed answer record ends decoding and keeps the answers read so far.
pub fn parse_response(bytes: &[u8]) -> Result<DnsResponse, WireError> {
	let header = Header::from_bytes(bytes)?;

	if !header.is_response() {
		return Err(WireError::NotResponse);
	}
	if header.rcode() != 0 {
		return Err(WireError::ErrorResponse(rcode_name(header.rcode() as u16)));
	}

	// Skip the question section: name, type and class
	let mut offset = HEADER_LEN;
	for _ in 0..header.qdcount {
		offset = skip_name(bytes, offset)? + 4;
		if offset > bytes.len() {
			return Err(WireError::Truncated(bytes.len()));
		}
	}

	let mut answers = Vec::with_capacity(header.ancount.min(64) as usize);
	for _ in 0..header.ancount {
		match decode_record(bytes, offset) {
			Ok((record, next)) => {
				answers.push(record);
				offset = next;
			}
			Err(WireError::Truncated(at)) => {
				debug!(offset = at, decoded = answers.len(), "answer section truncated");
				break;
			}
			Err(WireError::MalformedMessage(reason)) => {
				debug!(%reason, decoded = answers.len(), "malformed answer record");
				break;
			}
			Err(e) => return Err(e),
		}
	}

	Ok(DnsResponse { header, answers })
}
