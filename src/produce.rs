use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_MESSAGE: &str = "Hello from REST API";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `POST {base}/topics/{topic}/records` on the Event Streams REST producer.
pub fn records_url(rest_api_url: &str, topic: &str) -> String {
    format!("{}/topics/{}/records", rest_api_url.trim_end_matches('/'), topic)
}

/// A lone message goes out as given; a batch is numbered `(i/count)` from 1.
pub fn message_text(message: &str, index: usize, count: usize) -> String {
    if count == 1 {
        message.to_string()
    } else {
        format!("{} ({}/{})", message, index + 1, count)
    }
}

/// Where the broker put a record, as far as the response says.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    Placed {
        partition: Option<Value>,
        offset: Option<Value>,
    },
    /// Neither `metadata` nor a non-empty `offsets` list.
    Unrecognised(Value),
}

impl Delivery {
    pub fn from_response(body: Value) -> Delivery {
        let placement = match body.get("metadata") {
            Some(metadata) => Some(metadata),
            None => body
                .get("offsets")
                .and_then(Value::as_array)
                .and_then(|offsets| offsets.first()),
        };
        match placement {
            Some(place) => Delivery::Placed {
                partition: place.get("partition").cloned(),
                offset: place.get("offset").cloned(),
            },
            None => Delivery::Unrecognised(body),
        }
    }
}

fn or_unknown(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "?".to_string(),
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Delivery::Placed { partition, offset } => write!(
                f,
                "[partition {}] at offset {}",
                or_unknown(partition),
                or_unknown(offset)
            ),
            Delivery::Unrecognised(body) => write!(f, "sent (response: {})", body),
        }
    }
}

pub struct RestProducer {
    client: reqwest::Client,
    records_url: String,
    username: String,
    password: String,
}

impl RestProducer {
    /// `insecure` skips certificate checks for routes signed by the cluster CA.
    pub fn new(
        rest_api_url: &str,
        topic: &str,
        username: &str,
        password: &str,
        insecure: bool,
    ) -> Result<RestProducer, Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(RestProducer {
            client,
            records_url: records_url(rest_api_url, topic),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn records_url(&self) -> &str {
        &self.records_url
    }

    pub async fn send(&self, value: &str) -> Result<Delivery, Error> {
        debug!(url = %self.records_url, "Producing record");
        let response = self
            .client
            .post(&self.records_url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "records": [{ "value": value }] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ProduceRejected { status, body });
        }
        let body: Value = response.json().await?;
        Ok(Delivery::from_response(body))
    }
}
