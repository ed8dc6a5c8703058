//! Pricing oracle backed by the configured tariff.
//!
//! Derives the hourly forecast from the static peak window. A market-feed
//! implementation would sit behind the same `PricingOracle` port.

use async_trait::async_trait;
use chrono::{Duration, Timelike, Utc};

use crate::application::services::pricing::{is_peak_hour, rate_for_hour, PricingConfig};
use crate::domain::{CoreResult, PriceSlot, PricingOracle};

pub struct TariffOracle {
    config: PricingConfig,
}

impl TariffOracle {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PricingOracle for TariffOracle {
    async fn get_current_price(&self) -> CoreResult<f64> {
        Ok(rate_for_hour(&self.config, Utc::now().hour()))
    }

    async fn is_peak_hour(&self) -> CoreResult<bool> {
        Ok(is_peak_hour(&self.config, Utc::now().hour()))
    }

    async fn get_price_forecast(&self, hours: u32) -> CoreResult<Vec<PriceSlot>> {
        let start_of_hour = Utc::now()
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or_else(Utc::now);

        Ok((0..hours)
            .map(|offset| {
                let starts_at = start_of_hour + Duration::hours(offset as i64);
                let hour = starts_at.hour();
                PriceSlot {
                    starts_at,
                    price: rate_for_hour(&self.config, hour),
                    is_peak: is_peak_hour(&self.config, hour),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forecast_marks_peak_window() {
        let oracle = TariffOracle::new(PricingConfig {
            base_rate: 1.0,
            peak_multiplier: 2.0,
            peak_start_hour: 18,
            peak_end_hour: 21,
            idle_fee_per_min: 0.0,
            idle_grace_min: 0,
            currency: "EUR".into(),
        });

        let forecast = oracle.get_price_forecast(24).await.unwrap();
        assert_eq!(forecast.len(), 24);
        for slot in &forecast {
            let hour = slot.starts_at.hour();
            let expected_peak = (18..21).contains(&hour);
            assert_eq!(slot.is_peak, expected_peak, "hour {hour}");
            let expected_price = if expected_peak { 2.0 } else { 1.0 };
            assert_eq!(slot.price, expected_price, "hour {hour}");
        }
    }
}
