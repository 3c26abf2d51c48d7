//! InfluxDB 1.x HTTP sink.

use async_trait::async_trait;
use reqwest::Client;
use snafu::prelude::*;
use tracing::debug;

use super::MetricSink;
use super::line_protocol;
use crate::config::SinkConfig;
use crate::error::{ClientBuildSnafu, HttpRequestSnafu, SinkError};
use crate::record::MetricRecord;

/// Writes batches with `POST {url}/write?db={database}&precision=ns`.
pub struct InfluxSink {
    client: Client,
    write_url: String,
    database: String,
    credentials: Option<(String, Option<String>)>,
}

impl InfluxSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            write_url: format!("{}/write", config.url.trim_end_matches('/')),
            database: config.database.clone(),
            credentials: config
                .credentials()
                .map(|(user, password)| (user.to_string(), password.map(str::to_string))),
        })
    }
}

#[async_trait]
impl MetricSink for InfluxSink {
    async fn write_batch(&self, records: &[MetricRecord]) -> Result<usize, SinkError> {
        let (body, lines) = line_protocol::encode_counted(records);
        if lines == 0 {
            return Ok(0);
        }

        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.context(HttpRequestSnafu)?;
        let status = response.status();
        if status.is_success() {
            debug!(records = lines, "Wrote batch to InfluxDB");
            return Ok(lines);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}
