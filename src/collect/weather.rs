//! Weather collector. Normalizes a forecast endpoint to the handful of
//! fields the reports and analyzers care about.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::require_url;
use crate::config::SourceConfig;

pub struct WeatherCollector {
    name: String,
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    #[serde(alias = "temperature", alias = "temp")]
    temp_c: Option<f64>,
    #[serde(alias = "precipitation_probability")]
    precip_prob: Option<f64>,
    #[serde(alias = "windspeed")]
    wind_kph: Option<f64>,
    #[serde(default)]
    summary: Option<String>,
}

impl WeatherCollector {
    pub fn new(cfg: &SourceConfig, client: Client) -> Result<Self> {
        Ok(Self {
            name: cfg.name.clone(),
            url: require_url(cfg)?,
            client,
        })
    }

    fn normalize(f: Forecast) -> Option<Value> {
        // A forecast with no numbers at all is worthless; skip the snapshot.
        if f.temp_c.is_none() && f.precip_prob.is_none() && f.wind_kph.is_none() {
            return None;
        }
        Some(json!({
            "temp_c": f.temp_c,
            "precip_prob": f.precip_prob,
            "wind_kph": f.wind_kph,
            "summary": f.summary,
        }))
    }
}

#[async_trait::async_trait]
impl super::Collector for WeatherCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Option<Value>> {
        let forecast: Forecast = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("weather fetch")?
            .error_for_status()
            .context("weather non-2xx")?
            .json()
            .await
            .context("weather parse")?;
        Ok(Self::normalize(forecast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_aliases() {
        let f: Forecast =
            serde_json::from_str(r#"{"temperature": 18.5, "precipitation_probability": 60}"#)
                .unwrap();
        let v = WeatherCollector::normalize(f).unwrap();
        assert_eq!(v["temp_c"], json!(18.5));
        assert_eq!(v["precip_prob"], json!(60.0));
    }

    #[test]
    fn normalize_skips_empty_forecast() {
        let f: Forecast = serde_json::from_str(r#"{"summary": "???"}"#).unwrap();
        assert!(WeatherCollector::normalize(f).is_none());
    }
}
