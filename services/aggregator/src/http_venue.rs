//! HTTP quote venue
//!
//! `GET {base}/quote?token_in=..&token_out=..&amount_in=..` returning
//! `{ "amount_out": "<decimal string>", "route_ref": ... }`. Amounts travel
//! as strings so 128-bit values survive JSON.

use crate::error::VenueError;
use crate::venue::{ExternalQuote, QuoteRequest, QuoteVenue};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    amount_out: String,
    #[serde(default)]
    route_ref: Option<String>,
}

pub struct HttpQuoteVenue {
    name: String,
    client: Client,
    endpoint: Url,
}

impl HttpQuoteVenue {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self, VenueError> {
        let invalid = |reason: String| VenueError::InvalidQuote {
            venue: name.to_string(),
            reason,
        };
        let endpoint = Url::parse(base_url)
            .and_then(|mut base| {
                // without a trailing '/' join would drop the last segment
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                base.join("quote")
            })
            .map_err(|e| invalid(format!("bad base url {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(format!("http client: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn unavailable(&self, reason: impl ToString) -> VenueError {
        VenueError::Unavailable {
            venue: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Parse the venue's decimal amount string
pub fn parse_amount(venue: &str, raw: &str) -> Result<u128, VenueError> {
    raw.trim().parse::<u128>().map_err(|e| VenueError::InvalidQuote {
        venue: venue.to_string(),
        reason: format!("amount_out {raw:?}: {e}"),
    })
}

#[async_trait]
impl QuoteVenue for HttpQuoteVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<ExternalQuote, VenueError> {
        let amount_in = request.amount_in.to_string();
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("token_in", request.token_in.as_str()),
                ("token_out", request.token_out.as_str()),
                ("amount_in", amount_in.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(VenueError::NoRoute {
                venue: self.name.clone(),
            });
        }
        if !status.is_success() {
            return Err(self.unavailable(format!("status {status}")));
        }

        let body: QuoteResponse = response.json().await.map_err(|e| VenueError::InvalidQuote {
            venue: self.name.clone(),
            reason: e.to_string(),
        })?;
        let amount_out = parse_amount(&self.name, &body.amount_out)?;
        debug!(venue = %self.name, amount_in = request.amount_in, amount_out, "venue quoted");
        Ok(ExternalQuote {
            amount_out,
            route_ref: body.route_ref,
        })
    }
}
