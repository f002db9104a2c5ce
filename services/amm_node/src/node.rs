//! Component wiring and background loops

use anyhow::{Context, Result};
use kestrel_config::NodeConfig;
use pool_state::{
    ApyEstimator, EventBus, FeeSchedule, LiquidityEngine, LiquidityLedger, PoolRegistry,
    PriceOracle, Router, SnapshotBook, StateCheckpointer, StateStore, StaticPriceOracle, Treasury,
};
use quote_aggregator::{AggregatorSettings, HttpQuoteVenue, QuoteAggregator, QuoteVenue};
use settlement::{
    HttpSettlementLedger, JsonFileTransactionStore, LocalLedger, RetryPolicy, SettlementLedger,
    TransactionCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::{AccountId, Clock, SystemClock, TokenId};

pub struct Node {
    pub config: NodeConfig,
    pub engine: Arc<LiquidityEngine>,
    pub router: Router,
    pub snapshots: Arc<SnapshotBook>,
    pub apy: ApyEstimator,
    pub coordinator: Arc<TransactionCoordinator>,
    pub aggregator: Arc<QuoteAggregator>,
    checkpoints: Arc<StateCheckpointer>,
}

impl Node {
    pub fn build(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.global.data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", config.global.data_dir))?;

        let operator = AccountId::new(config.global.operator.as_str()).context("Invalid operator account")?;
        let treasury = AccountId::new(config.fees.treasury.as_str()).context("Invalid treasury account")?;
        let fees = FeeSchedule::new(config.fees.lp_fee_bps, config.fees.protocol_fee_bps)
            .context("Invalid fee schedule")?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(PoolRegistry::new(fees.lp_fee_bps, EventBus::default()));
        let engine = LiquidityEngine::new(
            registry.clone(),
            Arc::new(LiquidityLedger::new()),
            Arc::new(Treasury::new(treasury)),
            fees,
            clock,
        );
        let snapshots = Arc::new(SnapshotBook::new(config.snapshots.interval_secs));

        let state_store = StateStore::new(config.state_file());
        match state_store.load().context("Failed to read state file")? {
            Some(state) => {
                let pools = state.apply(&engine, &snapshots);
                info!("Restored {} pools from {:?}", pools, state_store.path());
            }
            None => info!("No state file at {:?}, starting empty", state_store.path()),
        }
        // attached after the load so restoring does not rewrite the file
        let checkpoints = Arc::new(StateCheckpointer::new(state_store, snapshots.clone()));
        let engine = Arc::new(engine.with_checkpoints(checkpoints.clone()));

        let ledger: Arc<dyn SettlementLedger> = match &config.settlement.ledger_url {
            Some(url) => Arc::new(
                HttpSettlementLedger::new(url, Duration::from_millis(config.settlement.ledger_timeout_ms))
                    .context("Failed to build ledger client")?,
            ),
            None => {
                warn!("No settlement.ledger_url configured, settling against the in-process ledger");
                Arc::new(LocalLedger::new())
            }
        };
        let store = JsonFileTransactionStore::open(config.transactions_file())
            .context("Failed to open transaction store")?;
        let retry = RetryPolicy::new(
            config.settlement.max_attempts,
            config.settlement.initial_backoff_ms,
            config.settlement.max_backoff_ms,
        );
        let coordinator = Arc::new(TransactionCoordinator::new(
            engine.clone(),
            Arc::new(store),
            ledger.clone(),
            retry,
            operator.clone(),
        ));
        coordinator.release_finished();

        let venues = build_venues(&config)?;
        let settings = AggregatorSettings {
            fee_bps: config.aggregator.fee_bps,
            native_preference_bps: config.aggregator.native_preference_bps,
            sanity_floor_divisor: config.aggregator.sanity_floor_divisor as u128,
            venue_timeout: Duration::from_millis(config.aggregator.venue_timeout_ms),
        };
        let aggregator = Arc::new(
            QuoteAggregator::new(registry, venues, settings).context("Invalid aggregator settings")?,
        );

        let oracle = build_oracle(&config)?;
        let apy = ApyEstimator::new(snapshots.clone(), oracle, config.snapshots.lookback_secs);

        info!(
            operator = %operator,
            ledger = ledger.name(),
            venues = aggregator.venue_count(),
            lp_fee_bps = fees.lp_fee_bps,
            protocol_fee_bps = fees.protocol_fee_bps,
            "node components ready"
        );

        Ok(Self {
            router: Router::new(engine.clone()),
            config,
            engine,
            snapshots,
            apy,
            coordinator,
            aggregator,
            checkpoints,
        })
    }

    /// Snapshot every pool and log its current APY estimate
    pub fn take_snapshots(&self) {
        let now = self.engine.clock().unix_seconds();
        let pools = self.engine.registry().pools();
        let recorded = self.snapshots.record_all(&pools, now);
        debug!(recorded, pools = pools.len(), "snapshot tick");
        if recorded > 0 {
            if let Err(e) = self.engine.checkpoint() {
                warn!(error = %e, "snapshots not saved");
            }
        }

        for pool in &pools {
            match self.apy.estimate(pool, now) {
                Ok(estimate) => debug!(
                    pool = %pool.id(),
                    apy = %estimate.apy,
                    volume_24h = %estimate.volume_24h,
                    tvl_usd = %estimate.tvl_usd,
                    "apy estimate"
                ),
                Err(e) => debug!(pool = %pool.id(), error = %e, "apy unavailable"),
            }
        }
    }

    pub async fn resume_stuck(&self) {
        let older_than = chrono::Duration::minutes(self.config.settlement.stuck_after_minutes as i64);
        let report = self.coordinator.resume_stuck(older_than).await;
        if report.settled + report.failed + report.skipped > 0 {
            info!(
                settled = report.settled,
                failed = report.failed,
                skipped = report.skipped,
                "resumed stuck settlements"
            );
        }
    }

    /// Write the state file now; mutations already do this on their own
    pub fn persist(&self) -> Result<()> {
        self.engine.checkpoint().context("Failed to save state")?;
        info!(
            "Saved {} pools to {:?}",
            self.engine.registry().len(),
            self.checkpoints.store().path()
        );
        Ok(())
    }

    /// Runs until cancelled
    pub async fn snapshot_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.snapshots.interval_secs));
        loop {
            ticker.tick().await;
            self.take_snapshots();
        }
    }

    /// Runs until cancelled. The first tick fires immediately, covering startup.
    pub async fn resume_loop(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.settlement.resume_interval_secs.max(1)));
        loop {
            ticker.tick().await;
            self.resume_stuck().await;
        }
    }
}

fn build_venues(config: &NodeConfig) -> Result<Vec<Arc<dyn QuoteVenue>>> {
    let timeout = Duration::from_millis(config.aggregator.venue_timeout_ms);
    let mut venues: Vec<Arc<dyn QuoteVenue>> = Vec::new();
    for venue in config.aggregator.venues.iter().filter(|v| v.enabled) {
        let client = HttpQuoteVenue::new(&venue.name, &venue.base_url, timeout)
            .with_context(|| format!("Failed to configure venue {}", venue.name))?;
        info!(venue = %venue.name, endpoint = %client.endpoint(), "quote venue enabled");
        venues.push(Arc::new(client));
    }
    Ok(venues)
}

fn build_oracle(config: &NodeConfig) -> Result<Arc<dyn PriceOracle>> {
    let mut oracle = StaticPriceOracle::new();
    for price in &config.snapshots.prices {
        let token = TokenId::new(price.token.as_str())
            .with_context(|| format!("Invalid token in snapshots.prices: {}", price.token))?;
        oracle = oracle.with_price(token, price.usd, price.decimals);
    }
    debug!(tokens = oracle.len(), "static price oracle loaded");
    Ok(Arc::new(oracle))
}
