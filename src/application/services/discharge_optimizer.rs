//! Pure discharge-window optimization.
//!
//! Given an hourly grid-price forecast, picks the single best 1- or 2-hour
//! contiguous peak window for exporting energy, maximizing
//! `energy_kwh × avg_price × (1 − operator_margin)`. Earliest start wins
//! ties.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::PriceSlot;

/// Battery-side constraints for the search.
#[derive(Debug, Clone)]
pub struct DischargeConstraints {
    /// Current state of charge, percent.
    pub soc: f64,
    /// Floor the battery may not discharge below, percent.
    pub min_soc: f64,
    pub battery_capacity_kwh: f64,
    pub max_discharge_power_kw: f64,
    /// Operator-imposed cap on exported energy.
    pub max_discharge_kwh: f64,
    /// Fraction of revenue retained by the operator.
    pub operator_margin: f64,
}

impl DischargeConstraints {
    /// Energy available for export, bounded by the SOC floor and the
    /// operator cap.
    pub fn available_energy_kwh(&self) -> f64 {
        let headroom = ((self.soc - self.min_soc).max(0.0) / 100.0) * self.battery_capacity_kwh;
        headroom.min(self.max_discharge_kwh)
    }
}

/// The selected export window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DischargeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub energy_kwh: f64,
    pub avg_price: f64,
    /// Expected revenue after the operator margin.
    pub revenue: f64,
}

/// Find the best contiguous 1- or 2-hour peak window in the forecast.
///
/// Returns `None` when no peak hour exists or no energy is available.
pub fn best_discharge_window(
    forecast: &[PriceSlot],
    constraints: &DischargeConstraints,
) -> Option<DischargeWindow> {
    let available = constraints.available_energy_kwh();
    if available <= 0.0 || constraints.max_discharge_power_kw <= 0.0 {
        return None;
    }

    let mut best: Option<DischargeWindow> = None;

    let mut consider = |slots: &[&PriceSlot]| {
        let hours = slots.len() as f64;
        let energy = (constraints.max_discharge_power_kw * hours).min(available);
        let avg_price = slots.iter().map(|s| s.price).sum::<f64>() / hours;
        let revenue = energy * avg_price * (1.0 - constraints.operator_margin);
        let candidate = DischargeWindow {
            start: slots[0].starts_at,
            end: slots[0].starts_at + Duration::hours(slots.len() as i64),
            energy_kwh: energy,
            avg_price,
            revenue,
        };
        let better = match &best {
            None => true,
            // Strictly-greater keeps the earliest start on ties.
            Some(current) => candidate.revenue > current.revenue,
        };
        if better {
            best = Some(candidate);
        }
    };

    for (i, slot) in forecast.iter().enumerate() {
        if !slot.is_peak {
            continue;
        }
        consider(&[slot]);

        if let Some(next) = forecast.get(i + 1) {
            let contiguous = next.starts_at - slot.starts_at == Duration::hours(1);
            if next.is_peak && contiguous {
                consider(&[slot, next]);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn slot(hour: u32, price: f64, is_peak: bool) -> PriceSlot {
        PriceSlot {
            starts_at: Utc.with_ymd_and_hms(2025, 6, 15, hour, 0, 0).unwrap(),
            price,
            is_peak,
        }
    }

    fn constraints() -> DischargeConstraints {
        DischargeConstraints {
            soc: 80.0,
            min_soc: 20.0,
            battery_capacity_kwh: 60.0,
            max_discharge_power_kw: 10.0,
            max_discharge_kwh: 100.0,
            operator_margin: 0.1,
        }
    }

    #[test]
    fn two_hour_peak_window_beats_single_hours() {
        let forecast = vec![
            slot(18, 1.20, true),
            slot(19, 1.30, true),
            slot(20, 0.90, false),
        ];
        let window = best_discharge_window(&forecast, &constraints()).unwrap();

        assert_eq!(window.start, slot(18, 0.0, true).starts_at);
        assert_eq!(window.end, slot(20, 0.0, false).starts_at);
        assert!((window.energy_kwh - 20.0).abs() < 1e-9);
        assert!((window.avg_price - 1.25).abs() < 1e-9);
        assert!((window.revenue - 22.5).abs() < 1e-9);
    }

    #[test]
    fn earliest_start_wins_ties() {
        // Two identical isolated peak hours.
        let forecast = vec![
            slot(18, 1.0, true),
            slot(19, 0.5, false),
            slot(20, 1.0, true),
        ];
        let window = best_discharge_window(&forecast, &constraints()).unwrap();
        assert_eq!(window.start, slot(18, 0.0, true).starts_at);
    }

    #[test]
    fn energy_is_bounded_by_available() {
        let mut c = constraints();
        c.soc = 25.0; // only (25-20)/100 × 60 = 3 kWh available
        let forecast = vec![slot(18, 1.0, true), slot(19, 1.0, true)];
        let window = best_discharge_window(&forecast, &c).unwrap();
        assert!((window.energy_kwh - 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_window_without_peaks_or_energy() {
        let forecast = vec![slot(18, 1.0, false), slot(19, 1.0, false)];
        assert!(best_discharge_window(&forecast, &constraints()).is_none());

        let mut drained = constraints();
        drained.soc = 20.0;
        let forecast = vec![slot(18, 1.0, true)];
        assert!(best_discharge_window(&forecast, &drained).is_none());
    }

    #[test]
    fn non_contiguous_peaks_do_not_pair() {
        // Peak at 18 and 20 with an off-peak gap: only 1-hour windows allowed.
        let forecast = vec![
            slot(18, 1.0, true),
            slot(19, 0.2, false),
            slot(20, 1.1, true),
        ];
        let window = best_discharge_window(&forecast, &constraints()).unwrap();
        assert_eq!(window.end - window.start, Duration::hours(1));
        assert_eq!(window.start, slot(20, 0.0, true).starts_at);
    }

    proptest! {
        #[test]
        fn revenue_and_energy_are_consistent(
            soc in 0.0..100.0f64,
            prices in proptest::collection::vec((0.01..5.0f64, any::<bool>()), 1..24),
        ) {
            let mut c = constraints();
            c.soc = soc;
            let forecast: Vec<PriceSlot> = prices
                .iter()
                .enumerate()
                .map(|(i, (p, peak))| slot(i as u32 % 24, *p, *peak))
                .collect();

            if let Some(w) = best_discharge_window(&forecast, &c) {
                prop_assert!(w.energy_kwh <= c.available_energy_kwh() + 1e-9);
                prop_assert!(w.energy_kwh <= c.max_discharge_power_kw * 2.0 + 1e-9);
                prop_assert!(w.revenue >= 0.0);
                let expected = w.energy_kwh * w.avg_price * (1.0 - c.operator_margin);
                prop_assert!((w.revenue - expected).abs() < 1e-6);
            }
        }
    }
}
