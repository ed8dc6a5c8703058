//! Pure session-cost computation.
//!
//! `cost = energy_kwh × rate(start_hour)` where the rate is the base rate
//! outside the peak window `[peak_start, peak_end)` and `base × multiplier`
//! inside it, plus an idle fee once a session overstays its estimated
//! charging time by more than the grace period.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Assumed average charging rate for the idle-time estimate, W.
pub const ESTIMATED_CHARGE_RATE_W: f64 = 7_000.0;

/// Cost-function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Base rate per kWh.
    pub base_rate: f64,
    pub peak_multiplier: f64,
    /// Peak window start hour (inclusive), 0-23.
    pub peak_start_hour: u32,
    /// Peak window end hour (exclusive), 0-23.
    pub peak_end_hour: u32,
    pub idle_fee_per_min: f64,
    /// Minutes past the estimated charging time before the idle fee starts.
    pub idle_grace_min: i64,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_rate: 0.75,
            peak_multiplier: 1.5,
            peak_start_hour: 18,
            peak_end_hour: 21,
            idle_fee_per_min: 0.05,
            idle_grace_min: 15,
            currency: "EUR".to_string(),
        }
    }
}

/// Itemized cost of one charging session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub energy_cost: f64,
    pub idle_fee: f64,
    pub total: f64,
    pub currency: String,
}

/// Whether `hour` falls inside the peak window. A window with
/// `start > end` wraps around midnight.
pub fn is_peak_hour(config: &PricingConfig, hour: u32) -> bool {
    let (start, end) = (config.peak_start_hour, config.peak_end_hour);
    if start == end {
        false
    } else if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Rate per kWh applicable to a session starting at `hour`.
pub fn rate_for_hour(config: &PricingConfig, hour: u32) -> f64 {
    if is_peak_hour(config, hour) {
        config.base_rate * config.peak_multiplier
    } else {
        config.base_rate
    }
}

/// Compute the full cost of a session.
pub fn session_cost(
    config: &PricingConfig,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    energy_wh: f64,
) -> CostBreakdown {
    let energy_kwh = (energy_wh.max(0.0)) / 1000.0;
    let energy_cost = energy_kwh * rate_for_hour(config, started_at.hour());

    let actual_min = (ended_at - started_at).num_minutes().max(0);
    let estimated_min = (energy_wh.max(0.0) / ESTIMATED_CHARGE_RATE_W * 60.0).ceil() as i64;
    let overstay_min = actual_min - estimated_min - config.idle_grace_min;
    let idle_fee = if overstay_min > 0 {
        overstay_min as f64 * config.idle_fee_per_min
    } else {
        0.0
    };

    CostBreakdown {
        energy_cost,
        idle_fee,
        total: energy_cost + idle_fee,
        currency: config.currency.clone(),
    }
}
