//! Reachability check for the configured audio server

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Outcome of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeState {
    Online,
    Unreachable,
    Error,
}

/// Result of probing `server:port`
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub server: String,
    pub port: u16,
    pub state: ProbeState,
    pub reachable: bool,
    pub response_time_ms: Option<u64>,
    pub timeout_ms: u64,
    pub checked_at: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Try a TCP connection to the server within `timeout`
pub async fn probe_server(server: &str, port: u16, timeout: Duration) -> ServerStatus {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, TcpStream::connect((server, port))).await;

    let (state, response_time_ms, error) = match outcome {
        Ok(Ok(_stream)) => (
            ProbeState::Online,
            Some(started.elapsed().as_millis() as u64),
            None,
        ),
        Ok(Err(e)) => (ProbeState::Error, None, Some(e.to_string())),
        Err(_) => (
            ProbeState::Unreachable,
            None,
            Some(format!("No answer within {} ms", timeout.as_millis())),
        ),
    };

    match state {
        ProbeState::Online => tracing::info!("Server {}:{} is online", server, port),
        _ => tracing::warn!("Server {}:{} is not reachable", server, port),
    }

    ServerStatus {
        server: server.to_string(),
        port,
        state,
        reachable: state == ProbeState::Online,
        response_time_ms,
        timeout_ms: timeout.as_millis() as u64,
        checked_at: Local::now(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = probe_server("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(status.state, ProbeState::Online);
        assert!(status.reachable);
        assert!(status.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let status = probe_server("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(!status.reachable);
        assert!(status.error.is_some());

        let json = serde_json::to_value(&status).unwrap();
        assert_ne!(json["state"], "ONLINE");
    }
}
