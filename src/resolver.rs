use std::net::SocketAddr;

use crate::error::ConfigError;

/// Well-known DNS-over-HTTPS endpoints, selectable by name.
pub const DOH_PROVIDERS: &[(&str, &str)] = &[
	("Google", "https://dns.google/dns-query"),
	("Cloudflare", "https://cloudflare-dns.com/dns-query"),
	("Quad9", "https://dns.quad9.net/dns-query"),
];

/// Provider used when neither a provider nor a URL is given
pub const DEFAULT_DOH_PROVIDER: &str = "Google";

/// Parse a DNS server address into a socket address.
///
/// Supports formats:
///   "1.1.1.1"              -- IPv4, `default_port`
///   "1.1.1.1:5353"         -- IPv4 with explicit port
///   "2606:4700::1111"      -- bare IPv6, `default_port`
///   "[2606:4700::1111]:53" -- bracketed IPv6 with port
pub fn parse_server(input: &str, default_port: u16) -> Result<SocketAddr, ConfigError> {
	let trimmed = input.trim();
	let invalid = || ConfigError::InvalidServer(trimmed.to_string());
	if trimmed.is_empty() {
		return Err(invalid());
	}

	let addr = if trimmed.starts_with('[') {
		// Bracketed IPv6 with port: [::1]:53
		trimmed.parse().map_err(|_| invalid())?
	} else if trimmed.contains("::") || trimmed.matches(':').count() > 1 {
		// Bare IPv6 address without port
		let ip = trimmed.parse().map_err(|_| invalid())?;
		SocketAddr::new(ip, default_port)
	} else if let Ok(addr) = trimmed.parse::<SocketAddr>() {
		// IPv4 with port (e.g. "8.8.8.8:5353")
		addr
	} else {
		// Plain IPv4 without port
		let ip = trimmed.parse().map_err(|_| invalid())?;
		SocketAddr::new(ip, default_port)
	};
	Ok(addr)
}

/// Look up a provider URL by name, ignoring case.
pub fn provider_url(name: &str) -> Option<&'static str> {
	DOH_PROVIDERS.iter()
		.find(|(label, _)| label.eq_ignore_ascii_case(name.trim()))
		.map(|(_, url)| *url)
}

/// Resolve the DoH endpoint: an explicit URL wins over a provider name,
/// and the default provider is used when neither is given.
pub fn doh_endpoint(provider: Option<&str>, url: Option<&str>) -> Result<String, ConfigError> {
	if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
		let parsed = reqwest::Url::parse(url)
			.map_err(|_| ConfigError::InvalidUrl(url.to_string()))?;
		if !matches!(parsed.scheme(), "http" | "https") {
			return Err(ConfigError::InvalidUrl(url.to_string()));
		}
		return Ok(url.to_string());
	}

	let name = provider.unwrap_or(DEFAULT_DOH_PROVIDER);
	provider_url(name)
		.map(str::to_string)
		.ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ipv4_no_port() {
		let addr = parse_server("1.1.1.1", 53).unwrap();
		assert_eq!(addr.port(), 53);
		assert_eq!(addr.ip().to_string(), "1.1.1.1");
	}

	#[test]
	fn test_ipv4_with_port() {
		let addr = parse_server("8.8.8.8:5353", 53).unwrap();
		assert_eq!(addr.port(), 5353);
		assert_eq!(addr.ip().to_string(), "8.8.8.8");
	}

	#[test]
	fn test_default_port_override() {
		let addr = parse_server("9.9.9.9", 8053).unwrap();
		assert_eq!(addr.port(), 8053);
	}

	#[test]
	fn test_ipv6_bare() {
		let addr = parse_server("2606:4700::1111", 53).unwrap();
		assert_eq!(addr.port(), 53);
		assert!(addr.is_ipv6());
	}

	#[test]
	fn test_ipv6_bracketed() {
		let addr = parse_server("[2606:4700::1111]:853", 53).unwrap();
		assert_eq!(addr.port(), 853);
	}

	#[test]
	fn test_invalid_input() {
		assert!(parse_server("not-an-ip", 53).is_err());
		assert!(parse_server("  ", 53).is_err());
	}

	#[test]
	fn test_providers_non_empty() {
		assert!(DOH_PROVIDERS.len() >= 2);
		assert_eq!(provider_url("cloudflare"), Some("https://cloudflare-dns.com/dns-query"));
		assert_eq!(provider_url("nope"), None);
	}

	#[test]
	fn test_doh_endpoint_precedence() {
		assert_eq!(doh_endpoint(None, None).unwrap(), "https://dns.google/dns-query");
		assert_eq!(doh_endpoint(Some("QUAD9"), None).unwrap(), "https://dns.quad9.net/dns-query");
		assert_eq!(
			doh_endpoint(Some("Google"), Some("https://doh.example/dns-query")).unwrap(),
			"https://doh.example/dns-query",
		);
		assert!(matches!(doh_endpoint(Some("Acme"), None), Err(ConfigError::UnknownProvider(_))));
		assert!(matches!(doh_endpoint(None, Some("ftp://x/y")), Err(ConfigError::InvalidUrl(_))));
		assert!(matches!(doh_endpoint(None, Some("not a url")), Err(ConfigError::InvalidUrl(_))));
	}
}
