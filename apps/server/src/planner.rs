//! Day-ahead plan from hourly prices and a weather forecast.

use crate::state::Plan;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::BTreeSet;

/// EUR/MWh at or above which an hour counts as expensive.
pub const PRICE_HIGH: f64 = 200.0;
/// Share of the day treated as cheap.
pub const CHEAP_SHARE: f64 = 0.2;
const HOURS: usize = 24;
const CLOUDY_PERCENT: f64 = 40.0;
const SUNNY_GHI: f64 = 300.0;
const RESERVE_SOC_SUNNY: u8 = 35;
const RESERVE_SOC_CLOUDY: u8 = 80;

/// Hourly forecast series starting at today's midnight.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Weather {
    pub ghi: Vec<f64>,
    pub cloud: Vec<f64>,
}

fn tomorrow(series: &[f64]) -> &[f64] {
    series.get(HOURS..series.len().min(2 * HOURS)).unwrap_or(&[])
}

/// An empty forecast counts as sunny.
fn sunny_tomorrow(weather: &Weather) -> bool {
    let cloud = tomorrow(&weather.cloud);
    let ghi = tomorrow(&weather.ghi);
    let mean_cloud = if cloud.is_empty() {
        0.0
    } else {
        cloud.iter().sum::<f64>() / cloud.len() as f64
    };
    let peak_ghi = ghi.iter().copied().fold(0.0, f64::max);
    mean_cloud < CLOUDY_PERCENT || peak_ghi > SUNNY_GHI
}

fn hours_where(prices: &[f64], pred: impl Fn(f64) -> bool) -> BTreeSet<u8> {
    (0u8..)
        .zip(prices.iter().take(HOURS))
        .filter(|(_, price)| pred(**price))
        .map(|(hour, _)| hour)
        .collect()
}

pub fn compute_plan(prices: &[f64], weather: &Weather) -> Result<Plan> {
    if prices.len() < HOURS {
        bail!("need {HOURS} hourly prices, got {}", prices.len());
    }
    if prices.iter().take(HOURS).any(|p| !p.is_finite()) {
        bail!("prices must be finite numbers");
    }

    let mut sorted = prices[..HOURS].to_vec();
    sorted.sort_by(f64::total_cmp);
    let cheap_threshold = sorted[(HOURS as f64 * CHEAP_SHARE) as usize];

    Ok(Plan {
        cheap_hours: hours_where(prices, |p| p <= cheap_threshold),
        expensive_hours: hours_where(prices, |p| p >= PRICE_HIGH),
        reserve_soc: if sunny_tomorrow(weather) {
            RESERVE_SOC_SUNNY
        } else {
            RESERVE_SOC_CLOUDY
        },
        ..Plan::default()
    })
}
