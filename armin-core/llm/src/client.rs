use futures::stream::Stream;
use futures::{
    StreamExt,
    stream::{self},
};
use reqwest::header::HeaderMap;
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt::Debug, pin::Pin};
use tracing::{Level, event, instrument, warn};

use crate::GenerationError;

#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
}

pub type BoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

impl Client {
    pub fn with_headers(headers: HeaderMap) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| GenerationError::unknown(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Client { client })
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn get<U, T>(&self, url: U) -> Result<T, GenerationError>
    where
        U: reqwest::IntoUrl + std::fmt::Debug,
        T: DeserializeOwned,
    {
        let response = check_status(self.client.get(url).send().await?).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    #[instrument(level = "trace", skip(self, request))]
    pub async fn post<U, S, T>(&self, url: U, request: &S) -> Result<T, GenerationError>
    where
        U: reqwest::IntoUrl + std::fmt::Debug,
        S: Serialize + Sized,
        T: DeserializeOwned,
    {
        let response = check_status(self.client.post(url).json(request).send().await?).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        match decode_event::<T>(&text) {
            Some(result) => result,
            None => Err(GenerationError::unknown("Empty response from backend")),
        }
    }

    /// POST and decode a line-oriented event stream.
    ///
    /// `process` selects the payload of each line (e.g. strips `data: `);
    /// lines it rejects are skipped. A payload carrying an `error` object
    /// becomes an `Err` item.
    #[instrument(level = "trace", skip(self, request, process))]
    pub async fn post_stream<U, S, F, T>(
        &self,
        url: U,
        request: &S,
        process: F,
    ) -> Result<BoxedStream<Result<T, GenerationError>>, GenerationError>
    where
        U: reqwest::IntoUrl + Debug,
        S: Serialize + Sized,
        T: DeserializeOwned + Send + 'static,
        F: Fn(&str) -> Option<&str> + 'static + Send,
    {
        let response = check_status(self.client.post(url).json(request).send().await?).await?;

        let bytes = response.bytes_stream();

        // Buffer raw bytes so multi-byte characters split across chunks survive
        let buffered_stream = bytes.scan(Vec::<u8>::new(), move |buffer, chunk| {
            let items: Vec<Result<T, GenerationError>> = match chunk {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    drain_lines(buffer)
                        .iter()
                        .filter_map(|line| process(line).and_then(decode_event::<T>))
                        .collect()
                }
                Err(e) => vec![Err(GenerationError::from(e))],
            };
            futures::future::ready(Some(items))
        });

        Ok(Box::pin(buffered_stream.flat_map(stream::iter)))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    warn!(%status, "Backend request failed");
    Err(GenerationError::classify(&format!(
        "Request failed with status {}: {}",
        status, error_body
    )))
}

/// Remove every complete line from `buffer`, leaving a trailing partial line.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = buffer.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = buffer.drain(..=last_newline).collect();
    complete
        .split(|b| *b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Decode one payload; malformed payloads are logged and skipped.
pub(crate) fn decode_event<T: DeserializeOwned>(payload: &str) -> Option<Result<T, GenerationError>> {
    if payload.trim().is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream payload");
            return None;
        }
    };
    if let Some(error) = value.get("error") {
        return Some(Err(GenerationError::classify(&error.to_string())));
    }
    match serde_json::from_value::<T>(value) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            warn!(error = %e, "Skipping unrecognized stream payload");
            None
        }
    }
}
