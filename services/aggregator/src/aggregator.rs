//! Best-quote aggregation
//!
//! The aggregator fee comes off the input first; the native pool and every
//! external venue are then quoted on the net amount in parallel. External
//! answers are untrusted: errors, timeouts and outputs under the sanity floor
//! are dropped. Native wins unless an external venue beats it by more than
//! the preference margin.

use crate::error::{AggregatorError, Result, VenueError};
use crate::venue::{ExternalQuote, QuoteRequest, QuoteVenue, Venue};
use futures::future::join_all;
use kestrel_amm::arith::{bps_of, validate_fee, widen, BPS_DENOMINATOR};
use kestrel_amm::V2Math;
use pool_state::PoolRegistry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::{PairKey, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub fee_bps: u32,
    /// Native is kept while within this many bps of the best external output
    pub native_preference_bps: u32,
    pub sanity_floor_divisor: u128,
    pub venue_timeout: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            fee_bps: 30,
            native_preference_bps: 100,
            sanity_floor_divisor: 1_000_000,
            venue_timeout: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestQuote {
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: u128,
    /// Aggregator fee, deducted even when there is no route
    pub fee_taken: u128,
    pub net_in: u128,
    /// `None` means no route
    pub venue: Option<Venue>,
    pub amount_out: u128,
    pub route_ref: Option<String>,
    /// Native quotes only, in percent
    pub price_impact: Option<Decimal>,
}

impl BestQuote {
    pub fn has_route(&self) -> bool {
        self.venue.is_some()
    }
}

/// Which side the preference rule picks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Native,
    External,
    NoRoute,
}

/// `native * 10000 >= external * (10000 - preference_bps)` keeps native
pub fn choose(native: Option<u128>, external: Option<u128>, preference_bps: u32) -> Choice {
    match (native, external) {
        (None, None) => Choice::NoRoute,
        (Some(_), None) => Choice::Native,
        (None, Some(_)) => Choice::External,
        (Some(native), Some(external)) => {
            let margin = BPS_DENOMINATOR.saturating_sub(preference_bps as u128);
            if widen(native) * widen(BPS_DENOMINATOR) >= widen(external) * widen(margin) {
                Choice::Native
            } else {
                Choice::External
            }
        }
    }
}

struct NativeQuote {
    amount_out: u128,
    price_impact: Decimal,
}

pub struct QuoteAggregator {
    registry: Arc<PoolRegistry>,
    venues: Vec<Arc<dyn QuoteVenue>>,
    settings: AggregatorSettings,
}

impl QuoteAggregator {
    pub fn new(
        registry: Arc<PoolRegistry>,
        venues: Vec<Arc<dyn QuoteVenue>>,
        settings: AggregatorSettings,
    ) -> Result<Self> {
        validate_fee(settings.fee_bps)?;
        validate_fee(settings.native_preference_bps)?;
        Ok(Self {
            registry,
            venues,
            settings,
        })
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn venue_count(&self) -> usize {
        self.venues.len()
    }

    pub async fn get_best_quote(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: u128,
    ) -> Result<BestQuote> {
        if amount_in == 0 {
            return Err(AggregatorError::ZeroAmount);
        }
        let pair = PairKey::new(token_in, token_out)?;

        let fee_taken = bps_of(amount_in, self.settings.fee_bps)?;
        let net_in = amount_in - fee_taken;
        let floor = net_in / self.settings.sanity_floor_divisor.max(1);

        let request = QuoteRequest {
            token_in: token_in.clone(),
            token_out: token_out.clone(),
            amount_in: net_in,
        };
        let native = self.native_quote(&pair, token_in, net_in);
        let external = self.best_external(&request, floor).await;

        let mut quote = BestQuote {
            token_in: token_in.clone(),
            token_out: token_out.clone(),
            amount_in,
            fee_taken,
            net_in,
            venue: None,
            amount_out: 0,
            route_ref: None,
            price_impact: None,
        };

        let choice = choose(
            native.as_ref().map(|n| n.amount_out),
            external.as_ref().map(|(_, q)| q.amount_out),
            self.settings.native_preference_bps,
        );
        match (choice, native, external) {
            (Choice::Native, Some(native), _) => {
                quote.venue = Some(Venue::Native);
                quote.amount_out = native.amount_out;
                quote.price_impact = Some(native.price_impact);
            }
            (Choice::External, _, Some((name, external))) => {
                quote.venue = Some(Venue::External(name));
                quote.amount_out = external.amount_out;
                quote.route_ref = external.route_ref;
            }
            _ => {
                info!(%token_in, %token_out, amount_in, "no route");
            }
        }

        debug!(
            %token_in,
            %token_out,
            amount_in,
            net_in,
            venue = ?quote.venue,
            amount_out = quote.amount_out,
            "best quote"
        );
        Ok(quote)
    }

    fn native_quote(&self, pair: &PairKey, token_in: &TokenId, net_in: u128) -> Option<NativeQuote> {
        let pool_id = self.registry.get(&pair.token0, &pair.token1).ok()?;
        let pool = self.registry.pool(&pool_id).ok()?;
        let amount_out = match pool.quote_out(token_in, net_in) {
            Ok(out) if out > 0 => out,
            Ok(_) => return None,
            Err(e) => {
                debug!(pool = %pool_id, error = %e, "native pool cannot quote");
                return None;
            }
        };
        let token_out = pair.other(token_in)?;
        let reserve_in = pool.reserve_of(token_in).ok()?;
        let reserve_out = pool.reserve_of(token_out).ok()?;
        let price_impact =
            V2Math::calculate_price_impact(net_in, amount_out, reserve_in, reserve_out).ok()?;
        Some(NativeQuote {
            amount_out,
            price_impact,
        })
    }

    /// Highest acceptable external quote; ties go to the earlier venue
    async fn best_external(&self, request: &QuoteRequest, floor: u128) -> Option<(String, ExternalQuote)> {
        let timeout = self.settings.venue_timeout;
        let queries = self.venues.iter().map(|venue| async move {
            let name = venue.name().to_string();
            match tokio::time::timeout(timeout, venue.quote(request)).await {
                Ok(Ok(quote)) if quote.amount_out > 0 && quote.amount_out >= floor => {
                    Some((name, quote))
                }
                Ok(Ok(quote)) => {
                    warn!(venue = %name, amount_out = quote.amount_out, floor, "venue quote below sanity floor");
                    None
                }
                Ok(Err(e)) => {
                    warn!(venue = %name, error = %e, "venue quote failed");
                    None
                }
                Err(_) => {
                    let e = VenueError::Timeout {
                        venue: name,
                        timeout_ms: timeout.as_millis() as u64,
                    };
                    warn!(error = %e, "venue quote dropped");
                    None
                }
            }
        });

        join_all(queries)
            .await
            .into_iter()
            .flatten()
            .fold(None, |best: Option<(String, ExternalQuote)>, candidate| match best {
                Some(current) if current.1.amount_out >= candidate.1.amount_out => Some(current),
                _ => Some(candidate),
            })
    }
}
