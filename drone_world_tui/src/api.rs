use std::time::Duration;

use drone_world_core::protocol::{EpisodeId, EpisodeStart, InitPayload};
use reqwest::{StatusCode, blocking::Client};
use serde::de::DeserializeOwned;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to build HTTP client")]
    BuildClient(#[source] reqwest::Error),
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("could not decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Blocking client for the simulation server's query endpoints.
pub struct ServerApi {
    base_url: String,
    client: Client,
}

impl ServerApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::BuildClient)?;
        Ok(ServerApi {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Grid dimensions, terrain and starting drones.
    pub fn fetch_init(&self) -> Result<InitPayload, ApiError> {
        let url = join_url(&self.base_url, "/init");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;
        let init: InitPayload = parse_response(&url, response)?;
        info!(
            width = init.grid_size[0],
            height = init.grid_size[1],
            drones = init.drones.len(),
            "Fetched environment layout"
        );
        Ok(init)
    }

    /// Asks the server to start an episode and returns its identifier.
    pub fn start_episode(&self) -> Result<EpisodeStart, ApiError> {
        let url = join_url(&self.base_url, "/episode/start");
        let response = self
            .client
            .post(&url)
            .send()
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;
        let start: EpisodeStart = parse_response(&url, response)?;
        info!(
            episode = %start.episode_id,
            drones = start.num_drones,
            "Episode started"
        );
        Ok(start)
    }
}

fn parse_response<T>(url: &str, response: reqwest::blocking::Response) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if status.is_success() {
        response.json::<T>().map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    } else {
        let body = response
            .text()
            .unwrap_or_else(|_| "<unavailable>".to_string());
        Err(ApiError::Status {
            url: url.to_string(),
            status,
            body,
        })
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Streaming endpoint of one episode.
pub fn stream_url(stream_base: &str, episode: &EpisodeId) -> String {
    join_url(stream_base, &format!("/ws/{episode}"))
}
