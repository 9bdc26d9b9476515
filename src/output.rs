use comfy_table::{Table, ContentArrangement, presets::UTF8_FULL};
use serde::Serialize;

use anyhow::Result;

use crate::ping::PingReport;
use crate::probe::TestReport;
use crate::stats::ProbeStats;
use crate::transport::{ProbeResult, TransportKind};

/// Print a one-line description of the test about to run.
pub fn print_test_header(kind: &str, target: &str, detail: &str) {
	println!("{} {} {}", kind, target, detail);
	println!();
}

/// Header label for an echo ping, e.g. "TCP ping".
pub fn ping_label(transport: TransportKind) -> String {
	format!("{} ping", transport)
}

fn format_rtt(rtt: Option<f64>) -> String {
	rtt.map(|ms| format!("{:.2} ms", ms)).unwrap_or_else(|| "-".to_string())
}

/// Answers or the failure message, one entry per line.
fn format_detail(result: &ProbeResult) -> String {
	if let Some(message) = &result.message {
		return message.clone();
	}
	match &result.answers {
		Some(answers) if !answers.is_empty() => answers.iter()
			.map(|a| format!("{} {} {} {}", a.name, a.ttl, a.type_name(), a.data))
			.collect::<Vec<_>>()
			.join("\n"),
		Some(_) => "(no answers)".to_string(),
		None => String::new(),
	}
}

fn results_table(results: &[ProbeResult], detail_header: &str) -> Table {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["Seq", "Status", "RTT", detail_header]);

	for r in results {
		table.add_row(vec![
			r.seq.to_string(),
			r.status.to_string(),
			format_rtt(r.rtt),
			format_detail(r),
		]);
	}
	table
}

/// Ping-style summary lines for a finished run.
pub fn format_summary(label: &str, unit: &str, stats: &ProbeStats) -> Vec<String> {
	let mut lines = vec![
		format!("--- {} statistics ---", label),
		format!(
			"{} {} transmitted, {} received, {:.2}% loss",
			stats.transmitted, unit, stats.received, stats.loss,
		),
	];
	if let (Some(min), Some(avg), Some(max)) = (stats.min_rtt, stats.avg_rtt, stats.max_rtt) {
		lines.push(format!("rtt min/avg/max = {:.2}/{:.2}/{:.2} ms", min, avg, max));
	}
	lines
}

/// Print a DNS test report as a table followed by the summary.
pub fn print_report(report: &TestReport) {
	println!("{}", results_table(&report.results, "Answers"));
	println!();
	for line in format_summary(&report.domain, "queries", &report.stats) {
		println!("{}", line);
	}
}

/// Print an echo-ping report as a table followed by the summary.
pub fn print_ping_report(report: &PingReport) {
	println!("{}", results_table(&report.results, "Message"));
	println!();
	let label = format!("{} port {}", report.target, report.port);
	for line in format_summary(&label, "packets", &report.stats) {
		println!("{}", line);
	}
}

/// Print any report as pretty JSON on stdout.
pub fn print_json<T: Serialize>(report: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(report)?);
	Ok(())
}

/// Write per-attempt results to a CSV file.
pub fn write_csv(path: &str, results: &[ProbeResult]) -> Result<()> {
	let mut writer = csv::Writer::from_path(path)?;
	write_rows(&mut writer, results)?;
	writer.flush()?;
	Ok(())
}

fn write_rows<W: std::io::Write>(writer: &mut csv::Writer<W>, results: &[ProbeResult]) -> Result<()> {
	writer.write_record(["seq", "status", "rtt_ms", "answers", "message"])?;

	for r in results {
		let answers = r.answers.as_deref().unwrap_or_default().iter()
			.map(|a| format!("{} {}", a.type_name(), a.data))
			.collect::<Vec<_>>()
			.join("; ");
		writer.write_record([
			r.seq.to_string(),
			r.status.to_string(),
			r.rtt.map(|ms| format!("{:.2}", ms)).unwrap_or_default(),
			answers,
			r.message.clone().unwrap_or_default(),
		])?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dns::{RecordData, ResourceRecord};
	use crate::stats::RttAccumulator;
	use crate::transport::ProbeStatus;

	fn sample_results() -> Vec<ProbeResult> {
		vec![
			ProbeResult {
				seq: 1,
				status: ProbeStatus::Success,
				rtt: Some(12.5),
				answers: Some(vec![ResourceRecord {
					name: "example.com".to_string(),
					rtype: 1,
					class: 1,
					ttl: 60,
					rdlength: 4,
					data: RecordData::A([93, 184, 216, 34]),
				}]),
				message: None,
			},
			ProbeResult {
				seq: 2,
				status: ProbeStatus::Timeout,
				rtt: None,
				answers: None,
				message: Some("query timed out".to_string()),
			},
		]
	}

	#[test]
	fn test_csv_rows() {
		let mut writer = csv::Writer::from_writer(Vec::new());
		write_rows(&mut writer, &sample_results()).unwrap();
		let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines[0], "seq,status,rtt_ms,answers,message");
		assert_eq!(lines[1], "1,success,12.50,A 93.184.216.34,");
		assert_eq!(lines[2], "2,timeout,,,query timed out");
	}

	#[test]
	fn test_summary_lines() {
		let mut acc = RttAccumulator::new();
		acc.record(Some(12.5));
		acc.record(None);
		let lines = format_summary("example.com", "queries", &acc.finish());
		assert_eq!(lines[0], "--- example.com statistics ---");
		assert_eq!(lines[1], "2 queries transmitted, 1 received, 50.00% loss");
		assert_eq!(lines[2], "rtt min/avg/max = 12.50/12.50/12.50 ms");

		let mut acc = RttAccumulator::new();
		acc.record(None);
		assert_eq!(format_summary("x", "packets", &acc.finish()).len(), 2);
	}

	#[test]
	fn test_ping_label() {
		assert_eq!(ping_label(TransportKind::Tcp), "TCP ping");
		assert_eq!(ping_label(TransportKind::Udp), "UDP ping");
	}

	#[test]
	fn test_detail_column() {
		let results = sample_results();
		assert_eq!(format_detail(&results[0]), "example.com 60 A 93.184.216.34");
		assert_eq!(format_detail(&results[1]), "query timed out");
		assert_eq!(format_rtt(results[0].rtt), "12.50 ms");
		assert_eq!(format_rtt(None), "-");
	}
}
