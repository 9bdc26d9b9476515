//! HTTP API running each test as a background job.
//!
//! A start request validates its body, spawns the run on its own task and
//! returns a job id. Clients poll `/api/{kind}/status/{id}` until the job is
//! `completed`. Cancelling only forgets the job; the run itself keeps going
//! until it finishes on its own.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::ping::{tcp_ping, udp_ping, PingReport, PingRequest};
use crate::probe::{run_probe, TestReport};
use crate::resolver::DOH_PROVIDERS;
use crate::transport::{ProbeRequest, TransportKind};

/// Which test a job runs; also the first path segment of its status URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
	Dns,
	TcpDns,
	HttpsDns,
	Ping,
	TcpPing,
}

impl JobKind {
	pub fn as_str(self) -> &'static str {
		match self {
			JobKind::Dns => "dns",
			JobKind::TcpDns => "tcpdns",
			JobKind::HttpsDns => "httpsdns",
			JobKind::Ping => "ping",
			JobKind::TcpPing => "tcpping",
		}
	}
}

impl fmt::Display for JobKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for JobKind {
	type Err = ApiError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"dns" => Ok(JobKind::Dns),
			"tcpdns" => Ok(JobKind::TcpDns),
			"httpsdns" => Ok(JobKind::HttpsDns),
			"ping" => Ok(JobKind::Ping),
			"tcpping" => Ok(JobKind::TcpPing),
			_ => Err(ApiError::NotFound),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
	Dns(TestReport),
	Ping(PingReport),
}

enum JobState {
	Running(JoinHandle<JobOutput>),
	Completed(Value),
	Failed(String),
}

struct Job {
	kind: JobKind,
	state: JobState,
}

#[derive(Clone, Default)]
pub struct AppState {
	jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl AppState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Track a spawned run and return its job id.
	async fn register(&self, kind: JobKind, handle: JoinHandle<JobOutput>) -> String {
		let id = format!("{}_{:016x}", kind, rand::random::<u64>());
		self.jobs.lock().await.insert(id.clone(), Job { kind, state: JobState::Running(handle) });
		id
	}
}

pub enum ApiError {
	BadRequest(String),
	NotFound,
}

impl From<ConfigError> for ApiError {
	fn from(err: ConfigError) -> Self {
		ApiError::BadRequest(err.to_string())
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		ApiError::BadRequest(rejection.body_text())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		match self {
			ApiError::BadRequest(message) => {
				(StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
			}
			ApiError::NotFound => {
				(StatusCode::NOT_FOUND, Json(json!({ "status": "not_found" }))).into_response()
			}
		}
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/api/health", get(health))
		.route("/api/doh/providers", get(doh_providers))
		.route("/api/dns", post(start_udp_dns))
		.route("/api/tcpdns", post(start_tcp_dns))
		.route("/api/httpsdns", post(start_https_dns))
		.route("/api/ping", post(start_udp_ping))
		.route("/api/tcpping", post(start_tcp_ping))
		.route("/api/{kind}/status/{id}", get(job_status))
		.route("/api/{kind}/cancel/{id}", post(cancel_job))
		.with_state(state)
}

/// Bind `addr` and serve the API until the process exits.
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr).await
		.with_context(|| format!("failed to bind {}", addr))?;
	info!(addr = %listener.local_addr()?, "API server listening");
	axum::serve(listener, router(AppState::new())).await
		.context("API server failed")?;
	Ok(())
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

async fn doh_providers() -> Json<BTreeMap<&'static str, &'static str>> {
	Json(DOH_PROVIDERS.iter().copied().collect())
}

async fn start_dns(
	state: &AppState,
	kind: JobKind,
	transport: TransportKind,
	mut request: ProbeRequest,
) -> Result<Json<Value>, ApiError> {
	request.transport = transport;
	let config = request.validate()?;
	let handle = tokio::spawn(async move { JobOutput::Dns(run_probe(&config).await) });
	let id = state.register(kind, handle).await;
	info!(%kind, %id, domain = %request.domain, "started DNS job");
	Ok(Json(json!({ "test_id": id, "status": "started" })))
}

async fn start_ping(state: &AppState, kind: JobKind, request: PingRequest) -> Result<Json<Value>, ApiError> {
	let config = request.validate()?;
	let handle = match kind {
		JobKind::TcpPing => tokio::spawn(async move { JobOutput::Ping(tcp_ping(&config).await) }),
		_ => tokio::spawn(async move { JobOutput::Ping(udp_ping(&config).await) }),
	};
	let id = state.register(kind, handle).await;
	info!(%kind, %id, ip = %request.ip, port = request.port, "started ping job");
	Ok(Json(json!({ "test_id": id, "status": "started" })))
}

async fn start_udp_dns(
	State(state): State<AppState>,
	body: Result<Json<ProbeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
	start_dns(&state, JobKind::Dns, TransportKind::Udp, body?.0).await
}

async fn start_tcp_dns(
	State(state): State<AppState>,
	body: Result<Json<ProbeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
	start_dns(&state, JobKind::TcpDns, TransportKind::Tcp, body?.0).await
}

async fn start_https_dns(
	State(state): State<AppState>,
	body: Result<Json<ProbeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
	start_dns(&state, JobKind::HttpsDns, TransportKind::DohJson, body?.0).await
}

async fn start_udp_ping(
	State(state): State<AppState>,
	body: Result<Json<PingRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
	start_ping(&state, JobKind::Ping, body?.0).await
}

async fn start_tcp_ping(
	State(state): State<AppState>,
	body: Result<Json<PingRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
	start_ping(&state, JobKind::TcpPing, body?.0).await
}

async fn job_status(
	State(state): State<AppState>,
	Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
	let kind: JobKind = kind.parse()?;
	let mut jobs = state.jobs.lock().await;
	let job = jobs.get_mut(&id)
		.filter(|job| job.kind == kind)
		.ok_or(ApiError::NotFound)?;

	let finished = match &mut job.state {
		JobState::Running(handle) if handle.is_finished() => Some(handle.await),
		_ => None,
	};
	if let Some(outcome) = finished {
		job.state = match outcome {
			Ok(output) => match serde_json::to_value(&output) {
				Ok(value) => JobState::Completed(value),
				Err(e) => JobState::Failed(format!("failed to serialize result: {}", e)),
			},
			Err(e) => {
				warn!(%kind, %id, error = %e, "job terminated abnormally");
				JobState::Failed(format!("test terminated abnormally: {}", e))
			}
		};
	}

	let body = match &job.state {
		JobState::Running(_) => json!({ "status": "running" }),
		JobState::Completed(result) => json!({ "status": "completed", "result": result }),
		JobState::Failed(message) => json!({ "status": "error", "message": message }),
	};
	Ok(Json(body))
}

async fn cancel_job(
	State(state): State<AppState>,
	Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
	let kind: JobKind = kind.parse()?;
	let mut jobs = state.jobs.lock().await;
	let running = matches!(
		jobs.get(&id),
		Some(Job { kind: k, state: JobState::Running(handle) }) if *k == kind && !handle.is_finished()
	);
	if !running {
		return Err(ApiError::NotFound);
	}

	// Dropping the handle detaches the task; the run finishes unobserved
	jobs.remove(&id);
	debug!(%kind, %id, "job cancelled");
	Ok(Json(json!({ "status": "cancelled" })))
}
