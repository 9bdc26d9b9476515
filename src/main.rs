mod cli;
mod dns;
mod doh;
mod error;
mod output;
mod ping;
mod probe;
mod resolver;
mod stats;
mod tcp;
mod transport;
mod udp;
mod web;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, OutputArgs, PingArgs};
use crate::transport::{ProbeRequest, TransportKind};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	// Logs go to stderr so JSON on stdout stays parseable
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(&cli.log_level))
		)
		.with_writer(std::io::stderr)
		.init();

	match cli.command {
		Command::Udp { target, query, output } => {
			let mut request = query.to_request(TransportKind::Udp);
			request.server = Some(target.server);
			request.port = Some(target.port);
			run_dns(request, &output).await
		}
		Command::Tcp { target, query, output } => {
			let mut request = query.to_request(TransportKind::Tcp);
			request.server = Some(target.server);
			request.port = Some(target.port);
			run_dns(request, &output).await
		}
		Command::Doh { provider, url, wire, query, output } => {
			let mut request = query.to_request(TransportKind::DohJson);
			request.provider = Some(provider);
			request.doh_url = url;
			request.use_wire_format = wire;
			run_dns(request, &output).await
		}
		Command::TcpPing(args) => run_ping(&args, TransportKind::Tcp).await,
		Command::UdpPing(args) => run_ping(&args, TransportKind::Udp).await,
		Command::Serve { bind } => web::serve(bind).await,
	}
}

async fn run_dns(request: ProbeRequest, output: &OutputArgs) -> Result<()> {
	let config = request.validate()?;

	if !output.json {
		output::print_test_header(
			&config.resolver.kind().to_string(),
			&config.resolver.to_string(),
			&format!("{} {} x{}", config.domain, config.query_type, config.count),
		);
	}

	let report = probe::run_probe(&config).await;

	if output.json {
		output::print_json(&report)?;
	} else {
		output::print_report(&report);
	}
	write_csv_if_requested(output, &report.results)
}

async fn run_ping(args: &PingArgs, transport: TransportKind) -> Result<()> {
	let config = args.to_request().validate()?;

	if !args.output.json {
		output::print_test_header(
			&output::ping_label(transport),
			&config.target.to_string(),
			&format!("with {} bytes of payload", config.packet_len),
		);
	}

	let report = match transport {
		TransportKind::Tcp => ping::tcp_ping(&config).await,
		_ => ping::udp_ping(&config).await,
	};

	if args.output.json {
		output::print_json(&report)?;
	} else {
		output::print_ping_report(&report);
	}
	write_csv_if_requested(&args.output, &report.results)
}

fn write_csv_if_requested(output: &OutputArgs, results: &[transport::ProbeResult]) -> Result<()> {
	if let Some(path) = &output.output {
		output::write_csv(path, results)?;
		if !output.json {
			println!("\nResults written to: {}", path);
		}
	}
	Ok(())
}
