use serde::Serialize;

/// Summary statistics for one test run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeStats {
	pub transmitted: u32,
	pub received: u32,
	/// Loss percentage, 0 when nothing was transmitted
	pub loss: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub min_rtt: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub avg_rtt: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_rtt: Option<f64>,
}

/// Per-run RTT and loss accumulator.
///
/// Each run owns its own accumulator so concurrent runs never share counters.
#[derive(Debug, Clone, Default)]
pub struct RttAccumulator {
	transmitted: u32,
	received: u32,
	rtt_sum: f64,
	rtt_min: Option<f64>,
	rtt_max: Option<f64>,
}

impl RttAccumulator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one attempt; `rtt_ms` is `Some` only for a successful one.
	pub fn record(&mut self, rtt_ms: Option<f64>) {
		self.transmitted += 1;
		if let Some(rtt) = rtt_ms {
			self.received += 1;
			self.rtt_sum += rtt;
			self.rtt_min = Some(self.rtt_min.map_or(rtt, |m| m.min(rtt)));
			self.rtt_max = Some(self.rtt_max.map_or(rtt, |m| m.max(rtt)));
		}
	}

	pub fn finish(&self) -> ProbeStats {
		let avg = if self.received > 0 {
			Some(round2(self.rtt_sum / self.received as f64))
		} else {
			None
		};
		ProbeStats {
			transmitted: self.transmitted,
			received: self.received,
			loss: loss_percent(self.transmitted, self.received),
			min_rtt: self.rtt_min.map(round2),
			avg_rtt: avg,
			max_rtt: self.rtt_max.map(round2),
		}
	}
}

/// Loss percentage rounded to 2 decimals.
pub fn loss_percent(transmitted: u32, received: u32) -> f64 {
	if transmitted == 0 {
		return 0.0;
	}
	let lost = transmitted.saturating_sub(received) as f64;
	round2(lost * 100.0 / transmitted as f64)
}

/// Round to 2 decimal places.
pub fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_mixed_attempts() {
		let mut acc = RttAccumulator::new();
		for rtt in [Some(10.0), Some(20.0), Some(30.0), None, Some(15.0)] {
			acc.record(rtt);
		}
		let stats = acc.finish();
		assert_eq!(stats.transmitted, 5);
		assert_eq!(stats.received, 4);
		assert_eq!(stats.loss, 20.0);
		assert_eq!(stats.min_rtt, Some(10.0));
		assert_eq!(stats.avg_rtt, Some(18.75));
		assert_eq!(stats.max_rtt, Some(30.0));
	}

	#[test]
	fn test_all_lost() {
		let mut acc = RttAccumulator::new();
		acc.record(None);
		acc.record(None);
		let stats = acc.finish();
		assert_eq!(stats.loss, 100.0);
		assert_eq!(stats.min_rtt, None);
		assert_eq!(stats.avg_rtt, None);
		let json = serde_json::to_value(&stats).unwrap();
		assert!(json.get("min_rtt").is_none());
	}

	#[test]
	fn test_empty_run_has_zero_loss() {
		let stats = RttAccumulator::new().finish();
		assert_eq!(stats.transmitted, 0);
		assert_eq!(stats.loss, 0.0);
		assert!(!stats.loss.is_nan());
	}

	#[test]
	fn test_rounding() {
		assert_eq!(round2(12.3456), 12.35);
		assert_eq!(round2(0.004), 0.0);
		assert_eq!(loss_percent(3, 2), 33.33);
	}
}
