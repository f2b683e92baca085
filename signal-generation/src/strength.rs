// Currency Strength Aggregator
// Folds per-pair log returns into a per-currency strength on a display scale

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAJOR_CURRENCIES: [&str; 8] = ["USD", "EUR", "GBP", "JPY", "AUD", "CAD", "CHF", "NZD"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthConfig {
    /// Scales the mean log return before normalization
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_display_min")]
    pub display_min: f64,
    #[serde(default = "default_display_max")]
    pub display_max: f64,
}

fn default_multiplier() -> f64 {
    1000.0
}

fn default_display_min() -> f64 {
    10.0
}

fn default_display_max() -> f64 {
    90.0
}

impl Default for StrengthConfig {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            display_min: default_display_min(),
            display_max: default_display_max(),
        }
    }
}

impl StrengthConfig {
    pub fn midpoint(&self) -> f64 {
        (self.display_min + self.display_max) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        self.multiplier.is_finite()
            && self.display_min.is_finite()
            && self.display_max.is_finite()
            && self.display_min < self.display_max
    }
}

/// Split a pair symbol into (base, quote)
///
/// Accepts `EURUSD`, `EUR/USD`, `EUR_USD` and broker suffixes like `EURUSDm`.
pub fn parse_pair(symbol: &str) -> Option<(String, String)> {
    let cleaned: String = symbol
        .trim()
        .chars()
        .filter(|c| *c != '/' && *c != '_' && *c != '-')
        .collect();

    let letters: Vec<char> = cleaned.chars().take(6).collect();
    if letters.len() < 6 || !letters.iter().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let base: String = letters[..3].iter().collect::<String>().to_ascii_uppercase();
    let quote: String = letters[3..].iter().collect::<String>().to_ascii_uppercase();
    if base == quote {
        return None;
    }
    Some((base, quote))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyReading {
    pub currency: String,
    /// Normalized strength on the display scale
    pub strength: f64,
    /// Mean return times multiplier; `None` without contributions
    pub raw: Option<f64>,
    pub contributions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrencyStrength {
    pub readings: BTreeMap<String, CurrencyReading>,
    pub pairs_used: usize,
}

impl CurrencyStrength {
    pub fn strength(&self, currency: &str) -> Option<f64> {
        self.readings.get(currency).map(|r| r.strength)
    }

    /// Strongest first
    pub fn ranked(&self) -> Vec<&CurrencyReading> {
        let mut ranked: Vec<&CurrencyReading> = self.readings.values().collect();
        ranked.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        ranked
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurrencyStrengthAggregator {
    config: StrengthConfig,
}

impl CurrencyStrengthAggregator {
    pub fn new(config: StrengthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrengthConfig {
        &self.config
    }

    /// `pairs` yields (symbol, prices oldest first); the last two prices give the return
    pub fn compute<'a, I>(&self, pairs: I) -> CurrencyStrength
    where
        I: IntoIterator<Item = (&'a str, &'a [f64])>,
    {
        let mut returns: BTreeMap<String, Vec<f64>> = MAJOR_CURRENCIES
            .iter()
            .map(|c| (c.to_string(), Vec::new()))
            .collect();
        let mut pairs_used = 0;

        for (symbol, prices) in pairs {
            let Some((base, quote)) = parse_pair(symbol) else {
                debug!("Skipping {}: not a currency pair", symbol);
                continue;
            };
            let [.., prev, last] = prices else {
                continue;
            };
            if *prev <= 0.0 || *last <= 0.0 || !prev.is_finite() || !last.is_finite() {
                debug!("Skipping {}: non-positive price", symbol);
                continue;
            }

            let r = (last / prev).ln();
            returns.entry(base).or_default().push(r);
            returns.entry(quote).or_default().push(-r);
            pairs_used += 1;
        }

        let raw: BTreeMap<&String, Option<f64>> = returns
            .iter()
            .map(|(ccy, rs)| {
                let mean = if rs.is_empty() {
                    None
                } else {
                    Some(rs.iter().sum::<f64>() / rs.len() as f64 * self.config.multiplier)
                };
                (ccy, mean)
            })
            .collect();

        let active = raw.values().flatten().copied();
        let (min, max) = active.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let range = max - min;
        let midpoint = self.config.midpoint();
        let span = self.config.display_max - self.config.display_min;

        let readings = raw
            .into_iter()
            .map(|(ccy, raw)| {
                let strength = match raw {
                    Some(v) if range > f64::EPSILON => {
                        self.config.display_min + (v - min) / range * span
                    }
                    _ => midpoint,
                };
                let reading = CurrencyReading {
                    currency: ccy.clone(),
                    strength,
                    raw,
                    contributions: returns[ccy].len(),
                };
                (ccy.clone(), reading)
            })
            .collect();

        CurrencyStrength {
            readings,
            pairs_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_parse_pair_variants() {
        let eurusd = Some(("EUR".to_string(), "USD".to_string()));
        assert_eq!(parse_pair("EURUSD"), eurusd);
        assert_eq!(parse_pair("EUR/USD"), eurusd);
        assert_eq!(parse_pair("eur_usd"), eurusd);
        assert_eq!(parse_pair("EURUSDm"), eurusd);
        assert_eq!(parse_pair("XAU"), None);
        assert_eq!(parse_pair("US30.cash"), None);
        assert_eq!(parse_pair("USDUSD"), None);
    }

    #[test]
    fn test_no_data_is_neutral() {
        let result = CurrencyStrengthAggregator::default().compute(Vec::<(&str, &[f64])>::new());
        assert_eq!(result.pairs_used, 0);
        assert_eq!(result.readings.len(), MAJOR_CURRENCIES.len());
        for ccy in MAJOR_CURRENCIES {
            assert!(approx(result.strength(ccy).unwrap(), 50.0));
        }
    }

    #[test]
    fn test_single_pair_spreads_to_extremes() {
        let prices = [1.1000, 1.1011];
        let result = CurrencyStrengthAggregator::default().compute([("EURUSD", &prices[..])]);

        assert_eq!(result.pairs_used, 1);
        assert!(approx(result.strength("EUR").unwrap(), 90.0));
        assert!(approx(result.strength("USD").unwrap(), 10.0));
        // untouched currencies stay at the midpoint
        assert!(approx(result.strength("JPY").unwrap(), 50.0));
        assert_eq!(result.readings["JPY"].raw, None);
        assert_eq!(result.readings["EUR"].contributions, 1);
    }

    #[test]
    fn test_mixed_pairs_rank_currencies() {
        let eurusd = [1.1000, 1.1022];
        let usdjpy = [150.0, 150.15];
        let gbpusd = [1.2500, 1.2500];
        let result = CurrencyStrengthAggregator::default().compute([
            ("EURUSD", &eurusd[..]),
            ("USDJPY", &usdjpy[..]),
            ("GBPUSD", &gbpusd[..]),
        ]);

        assert_eq!(result.pairs_used, 3);
        let ranked = result.ranked();
        assert_eq!(ranked.first().map(|r| r.currency.as_str()), Some("EUR"));
        assert_eq!(ranked.last().map(|r| r.currency.as_str()), Some("JPY"));
        for reading in result.readings.values() {
            assert!(reading.strength >= 10.0 && reading.strength <= 90.0);
        }
    }

    #[test]
    fn test_flat_prices_sit_at_midpoint() {
        let flat = [1.3, 1.3];
        let result = CurrencyStrengthAggregator::default().compute([("USDCAD", &flat[..])]);
        assert!(approx(result.strength("USD").unwrap(), 50.0));
        assert!(approx(result.strength("CAD").unwrap(), 50.0));
    }

    #[test]
    fn test_short_or_invalid_series_are_skipped() {
        let single = [1.1];
        let negative = [-1.0, 1.0];
        let result = CurrencyStrengthAggregator::default()
            .compute([("EURUSD", &single[..]), ("GBPUSD", &negative[..])]);
        assert_eq!(result.pairs_used, 0);
    }

    #[test]
    fn test_custom_display_range() {
        let config = StrengthConfig {
            display_min: 0.0,
            display_max: 100.0,
            ..StrengthConfig::default()
        };
        assert!(config.is_valid());
        let prices = [1.0, 1.01];
        let result = CurrencyStrengthAggregator::new(config).compute([("AUDNZD", &prices[..])]);
        assert!(approx(result.strength("AUD").unwrap(), 100.0));
        assert!(approx(result.strength("NZD").unwrap(), 0.0));
        assert!(approx(result.strength("EUR").unwrap(), 50.0));
    }
}
