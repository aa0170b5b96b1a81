//! Prometheus metrics for the hall

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct HallMetrics {
    registry: Registry,
    pub games_scheduled: IntCounter,
    pub games_completed: IntCounterVec,
    pub draws_total: IntCounter,
    pub claims_total: IntCounterVec,
    pub cards_sold: IntCounter,
    pub settlement_failures: IntCounter,
    pub jackpot_balance: IntGauge,
    pub websocket_connections: IntGauge,
}

impl HallMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("bingohall".to_string()), None)?;

        let games_scheduled = IntCounter::new("games_scheduled_total", "Games scheduled")?;
        let games_completed = IntCounterVec::new(
            Opts::new("games_completed_total", "Games completed by reason"),
            &["reason"],
        )?;
        let draws_total = IntCounter::new("draws_total", "Numbers drawn across all games")?;
        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Claims by kind and outcome code"),
            &["kind", "outcome"],
        )?;
        let cards_sold = IntCounter::new("cards_sold_total", "Cards sold")?;
        let settlement_failures =
            IntCounter::new("settlement_failures_total", "Allocations flagged for reconciliation")?;
        let jackpot_balance = IntGauge::new("jackpot_balance", "Current progressive jackpot")?;
        let websocket_connections = IntGauge::new("websocket_connections", "Open player sockets")?;

        registry.register(Box::new(games_scheduled.clone()))?;
        registry.register(Box::new(games_completed.clone()))?;
        registry.register(Box::new(draws_total.clone()))?;
        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(cards_sold.clone()))?;
        registry.register(Box::new(settlement_failures.clone()))?;
        registry.register(Box::new(jackpot_balance.clone()))?;
        registry.register(Box::new(websocket_connections.clone()))?;

        Ok(Self {
            registry,
            games_scheduled,
            games_completed,
            draws_total,
            claims_total,
            cards_sold,
            settlement_failures,
            jackpot_balance,
            websocket_connections,
        })
    }

    pub fn record_claim(&self, kind: &str, outcome: &str) {
        self.claims_total.with_label_values(&[kind, outcome]).inc();
    }

    pub fn set_jackpot(&self, balance: u64) {
        self.jackpot_balance.set(balance.min(i64::MAX as u64) as i64);
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
