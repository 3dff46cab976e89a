//! OKX marketplace activity endpoint.
//!
//! Each request returns the most recent `pageSize` activity records for one
//! ticker. There is no cursor: every poll re-fetches the same bounded window,
//! so deduplication is left to the watermark in [`super::FeedWatcher`].

use super::ActivityEvent;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::FeedConfig;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
}

/// A source of activity snapshots.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    /// Fetch the current snapshot, in the order the feed returns it.
    async fn fetch_snapshot(&self) -> Result<Vec<ActivityEvent>, FeedError>;
}

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ActivityResponse {
    data: Option<ActivityData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityData {
    #[serde(default)]
    activity_list: Vec<RawActivity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActivity {
    /// Epoch milliseconds.
    #[serde(deserialize_with = "number_or_string")]
    create_on: f64,
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    type_name: String,
    #[serde(default, deserialize_with = "number_or_string")]
    amount: f64,
    unit_price: Price,
    total_price: Price,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Price {
    #[serde(default, deserialize_with = "number_or_string")]
    usd_price: f64,
}

impl From<RawActivity> for ActivityEvent {
    fn from(raw: RawActivity) -> Self {
        ActivityEvent {
            ticker: raw.ticker,
            type_name: raw.type_name,
            amount: raw.amount,
            unit_price_usd: raw.unit_price.usd_price,
            total_price_usd: raw.total_price.usd_price,
            created_at: raw.create_on / 1000.0,
        }
    }
}

/// The endpoint serialises numbers inconsistently: some fields arrive as JSON
/// numbers, others as decimal strings.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("number out of range"))?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("bad number {s:?}: {e}")))?,
        serde_json::Value::Null => 0.0,
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected number, got {other}"
            )))
        }
    };
    // `"inf"` and `"NaN"` parse as f64 but are not quantities.
    if !value.is_finite() {
        return Err(serde::de::Error::custom(format!(
            "non-finite number {value}"
        )));
    }
    Ok(value)
}

/// Decode a response body into events, keeping the feed's order.
pub fn parse_activity_body(body: &str) -> Result<Vec<ActivityEvent>, FeedError> {
    let resp: ActivityResponse =
        serde_json::from_str(body).map_err(|e| FeedError::Decode(e.to_string()))?;
    let data = resp
        .data
        .ok_or_else(|| FeedError::Decode("missing `data` object".to_string()))?;
    Ok(data.activity_list.into_iter().map(ActivityEvent::from).collect())
}

// ─── HTTP client ────────────────────────────────────────────────────────────

pub struct OkxActivityFeed {
    url: String,
    ticker: String,
    activity_type: u32,
    page_size: u32,
    client: reqwest::Client,
}

impl OkxActivityFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.clone(),
            ticker: config.ticker.clone(),
            activity_type: config.activity_type,
            page_size: config.page_size,
            client,
        })
    }

    /// Query parameters for one request. `t` is a millisecond cache-buster.
    fn query(&self, now_ms: i64) -> Vec<(&'static str, String)> {
        vec![
            ("t", now_ms.to_string()),
            ("tick", self.ticker.clone()),
            ("type", self.activity_type.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("ticker", self.ticker.clone()),
        ]
    }
}

#[async_trait]
impl ActivityFeed for OkxActivityFeed {
    async fn fetch_snapshot(&self) -> Result<Vec<ActivityEvent>, FeedError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&self.query(chrono::Utc::now().timestamp_millis()))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::ApiError { status, body });
        }

        let body = resp.text().await?;
        let events = parse_activity_body(&body)?;
        debug!(ticker = %self.ticker, events = events.len(), "fetched activity snapshot");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "code": 0,
        "data": {
            "activityList": [
                {
                    "createOn": 1701866996000,
                    "ticker": "Dovi",
                    "typeName": "Sold",
                    "amount": "1000",
                    "unitPrice": {"usdPrice": "0.0123"},
                    "totalPrice": {"usdPrice": 12.3}
                },
                {
                    "createOn": 1701866900500,
                    "ticker": "Dovi",
                    "typeName": "Listed",
                    "amount": 250,
                    "unitPrice": {"usdPrice": 0.02},
                    "totalPrice": {"usdPrice": "5"}
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_mixed_number_encodings() {
        let events = parse_activity_body(BODY).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].ticker, "Dovi");
        assert_eq!(events[0].type_name, "Sold");
        assert_eq!(events[0].amount, 1000.0);
        assert_eq!(events[0].unit_price_usd, 0.0123);
        assert_eq!(events[0].total_price_usd, 12.3);
        assert_eq!(events[0].created_at, 1701866996.0);

        assert_eq!(events[1].type_name, "Listed");
        assert_eq!(events[1].created_at, 1701866900.5);
        assert_eq!(events[1].total_price_usd, 5.0);
    }

    #[test]
    fn test_parse_empty_list() {
        let events = parse_activity_body(r#"{"data": {"activityList": []}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_missing_data_is_error() {
        let err = parse_activity_body(r#"{"code": 50011, "msg": "rate limited"}"#).unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));

        let err = parse_activity_body("<html>gateway timeout</html>").unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }

    #[test]
    fn test_parse_rejects_non_finite_numbers() {
        for create_on in [r#""inf""#, r#""-infinity""#, r#""NaN""#] {
            let body = format!(
                r#"{{"data": {{"activityList": [{{
                    "createOn": {create_on},
                    "ticker": "Dovi",
                    "typeName": "Sold",
                    "amount": "1",
                    "unitPrice": {{"usdPrice": "1"}},
                    "totalPrice": {{"usdPrice": "1"}}
                }}]}}}}"#
            );
            let err = parse_activity_body(&body).unwrap_err();
            assert!(matches!(err, FeedError::Decode(_)), "{create_on}: {err:?}");
        }

        let body = BODY.replace(r#""amount": "1000""#, r#""amount": "NaN""#);
        assert!(matches!(
            parse_activity_body(&body),
            Err(FeedError::Decode(_))
        ));
    }

    #[test]
    fn test_query_params() {
        let feed = OkxActivityFeed::new(&FeedConfig::default()).unwrap();
        let query = feed.query(1701866996986);
        assert_eq!(
            query,
            vec![
                ("t", "1701866996986".to_string()),
                ("tick", "Dovi".to_string()),
                ("type", "21".to_string()),
                ("pageSize", "20".to_string()),
                ("ticker", "Dovi".to_string()),
            ]
        );
    }
}
