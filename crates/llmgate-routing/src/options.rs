//! Routing tuning knobs, persisted through the `options` key-value table and
//! mirrored in an `RwLock` for lock-free-ish hot reads (§6 options table).

use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RoutingOptions {
    pub health_adjustment_enabled: bool,
    pub health_window_hours: i64,
    pub cost_window_hours: i64,
    pub alpha: f64,
    pub beta: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub min_samples: i64,
    pub base_factor: f64,
    pub value_factor: f64,
    /// Outbound proxy used for `http://` upstream bases, admin-writable (§6).
    pub http_proxy: Option<String>,
    /// Outbound proxy used for `https://` upstream bases, admin-writable (§6).
    pub https_proxy: Option<String>,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            health_adjustment_enabled: true,
            health_window_hours: 6,
            cost_window_hours: 6,
            alpha: 4.0,
            beta: 0.08,
            min_multiplier: 0.05,
            max_multiplier: 1.12,
            min_samples: 5,
            base_factor: 0.2,
            value_factor: 0.8,
            http_proxy: None,
            https_proxy: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{field} must be an http(s) URL, got {value:?}")]
    InvalidProxyUrl { field: &'static str, value: String },
}

impl RoutingOptions {
    /// Validates ranges per the options table: health/cost windows allow up
    /// to 720h, min_samples up to 1000, and the multiplier/factor knobs all
    /// live in [0, 10] rather than the tighter [0, 1] a naive reading suggests.
    pub fn validate(&self) -> Result<(), OptionsError> {
        check_range("health_window_hours", self.health_window_hours as f64, 1.0, 720.0)?;
        check_range("cost_window_hours", self.cost_window_hours as f64, 1.0, 720.0)?;
        check_range("alpha", self.alpha, 0.0, 20.0)?;
        check_range("beta", self.beta, 0.0, 2.0)?;
        check_range("min_multiplier", self.min_multiplier, 0.0, 10.0)?;
        check_range("max_multiplier", self.max_multiplier, 0.0, 10.0)?;
        check_range("min_samples", self.min_samples as f64, 1.0, 1_000.0)?;
        check_range("base_factor", self.base_factor, 0.0, 10.0)?;
        check_range("value_factor", self.value_factor, 0.0, 10.0)?;
        check_proxy_url("http_proxy", self.http_proxy.as_deref())?;
        check_proxy_url("https_proxy", self.https_proxy.as_deref())?;
        Ok(())
    }

    /// §4.E step 4: if both user-configured base/value factors are zero,
    /// fall back to the defaults rather than zeroing every contribution.
    pub fn effective_factors(&self) -> (f64, f64) {
        if self.base_factor == 0.0 && self.value_factor == 0.0 {
            let defaults = RoutingOptions::default();
            (defaults.base_factor, defaults.value_factor)
        } else {
            (self.base_factor, self.value_factor)
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), OptionsError> {
    if value < min || value > max {
        Err(OptionsError::OutOfRange { field, min, max, value })
    } else {
        Ok(())
    }
}

/// Empty/absent is allowed (no proxy); non-empty must parse as an http(s) URL.
fn check_proxy_url(field: &'static str, value: Option<&str>) -> Result<(), OptionsError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(());
    };
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(OptionsError::InvalidProxyUrl { field, value: value.to_string() })
    }
}

/// Process-wide holder, refreshed from the `options` table after each sync
/// tick and read on every route-selection pass.
pub struct SharedRoutingOptions(RwLock<RoutingOptions>);

impl SharedRoutingOptions {
    pub fn new(initial: RoutingOptions) -> Self {
        Self(RwLock::new(initial))
    }

    pub fn get(&self) -> RoutingOptions {
        self.0.read().expect("routing options lock poisoned").clone()
    }

    pub fn set(&self, options: RoutingOptions) {
        *self.0.write().expect("routing options lock poisoned") = options;
    }
}

impl Default for SharedRoutingOptions {
    fn default() -> Self {
        Self::new(RoutingOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RoutingOptions::default().validate().unwrap();
    }

    #[test]
    fn health_window_hours_allows_up_to_720() {
        let mut options = RoutingOptions::default();
        options.health_window_hours = 720;
        assert!(options.validate().is_ok());
        options.health_window_hours = 721;
        assert!(options.validate().is_err());
    }

    #[test]
    fn beta_rejects_above_two() {
        let mut options = RoutingOptions::default();
        options.beta = 2.0;
        assert!(options.validate().is_ok());
        options.beta = 2.1;
        assert!(options.validate().is_err());
    }

    #[test]
    fn max_multiplier_allows_up_to_ten() {
        let mut options = RoutingOptions::default();
        options.max_multiplier = 10.0;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn proxy_url_must_be_http_or_https() {
        let mut options = RoutingOptions::default();
        options.http_proxy = Some("socks5://localhost:1080".to_string());
        assert!(matches!(options.validate(), Err(OptionsError::InvalidProxyUrl { .. })));
        options.http_proxy = Some("http://localhost:8080".to_string());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn empty_proxy_url_is_treated_as_unset() {
        let mut options = RoutingOptions::default();
        options.https_proxy = Some(String::new());
        assert!(options.validate().is_ok());
    }
}
