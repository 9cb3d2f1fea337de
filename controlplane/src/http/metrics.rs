//! Metrics backend over REST

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::backends::{Dimensions, MetricsBackend};
use crate::errors::PlatformError;
use crate::http::client::HttpClient;

pub struct RestMetrics {
    http: HttpClient,
    token: SecretString,
}

impl RestMetrics {
    pub fn new(http: HttpClient, token: SecretString) -> Self {
        Self { http, token }
    }
}

#[derive(Serialize)]
struct StatisticsRequest<'a> {
    namespace: &'a str,
    metric: &'a str,
    dimensions: &'a Dimensions,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    statistic: &'static str,
}

#[derive(Deserialize)]
struct Datapoint {
    average: f64,
}

#[derive(Deserialize)]
struct StatisticsResponse {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Serialize)]
struct PutMetricRequest<'a> {
    namespace: &'a str,
    metric: &'a str,
    value: f64,
    dimensions: &'a Dimensions,
    timestamp: DateTime<Utc>,
}

#[async_trait]
impl MetricsBackend for RestMetrics {
    async fn average(
        &self,
        namespace: &str,
        metric: &str,
        dimensions: &Dimensions,
        window: Duration,
    ) -> Result<f64, PlatformError> {
        let end = Utc::now();
        let window = chrono::Duration::from_std(window)
            .map_err(|e| PlatformError::Validation(e.to_string()))?;
        let body = StatisticsRequest {
            namespace,
            metric,
            dimensions,
            start: end - window,
            end,
            statistic: "Average",
        };

        let response: StatisticsResponse = self
            .http
            .post("/metrics/statistics", &self.token, &body)
            .await?;

        if response.datapoints.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = response.datapoints.iter().map(|d| d.average).sum();
        Ok(total / response.datapoints.len() as f64)
    }

    async fn put_metric(
        &self,
        namespace: &str,
        metric: &str,
        value: f64,
        dimensions: &Dimensions,
    ) -> Result<(), PlatformError> {
        let body = PutMetricRequest {
            namespace,
            metric,
            value,
            dimensions,
            timestamp: Utc::now(),
        };
        self.http.post_unit("/metrics/data", &self.token, &body).await
    }
}
