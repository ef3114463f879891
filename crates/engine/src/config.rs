//! Per-bot strategy configuration.

use crate::bot::StrategyKind;
use crate::errors::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strategy parameters, persisted verbatim in the bot snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Number of levels on each side (grid) or total entries (DCA).
    pub grid_levels: u32,
    /// Distance between levels, in quote units.
    pub grid_spread: Decimal,
    /// Quote budget per grid level; base quantity per DCA entry.
    pub order_size: Decimal,
    /// Margin over/under the average entry for the DCA exit order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    /// Auto-stop after this many minutes; 0 = unbounded.
    #[serde(default)]
    pub duration_minutes: u64,
    /// Grid anchor price. Set on first placement, never overwritten
    /// while the bot is alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_start_price: Option<Decimal>,
    #[serde(default)]
    pub options: BotOptions,
}

/// Extended options. Only `recenter_enabled` carries runtime
/// semantics; the rest are accepted and persisted for forward
/// compatibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capital: Option<Decimal>,
    #[serde(default)]
    pub recenter_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recenter_minutes: Option<u64>,
    #[serde(default)]
    pub sell_on_stop_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_on_stop_minutes: Option<u64>,
}

impl BotConfig {
    pub fn validate(&self, strategy: StrategyKind) -> Result<(), EngineError> {
        if self.grid_levels == 0 {
            return Err(EngineError::InvalidConfig("gridLevels must be positive".into()));
        }
        if self.grid_spread <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig("gridSpread must be positive".into()));
        }
        if self.order_size <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig("orderSize must be positive".into()));
        }
        if let Some(tp) = self.take_profit {
            if tp <= Decimal::ZERO {
                return Err(EngineError::InvalidConfig("takeProfit must be positive".into()));
            }
        }
        if matches!(strategy, StrategyKind::DcaBuy | StrategyKind::DcaSell)
            && self.take_profit.is_none()
        {
            return Err(EngineError::InvalidConfig(
                "takeProfit is required for DCA strategies".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> BotConfig {
        BotConfig {
            grid_levels: 2,
            grid_spread: dec!(10),
            order_size: dec!(0.001),
            take_profit: Some(dec!(5)),
            duration_minutes: 0,
            initial_start_price: None,
            options: BotOptions::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate(StrategyKind::Grid).is_ok());
        assert!(base_config().validate(StrategyKind::DcaBuy).is_ok());
    }

    #[test]
    fn rejects_zero_levels_and_sizes() {
        let mut config = base_config();
        config.grid_levels = 0;
        assert!(config.validate(StrategyKind::Grid).is_err());

        let mut config = base_config();
        config.grid_spread = Decimal::ZERO;
        assert!(config.validate(StrategyKind::Grid).is_err());

        let mut config = base_config();
        config.order_size = dec!(-1);
        assert!(config.validate(StrategyKind::Grid).is_err());
    }

    #[test]
    fn dca_requires_take_profit() {
        let mut config = base_config();
        config.take_profit = None;
        assert!(config.validate(StrategyKind::Grid).is_ok());
        assert!(config.validate(StrategyKind::DcaBuy).is_err());
        assert!(config.validate(StrategyKind::DcaSell).is_err());
    }

    #[test]
    fn reserved_options_round_trip() {
        let mut config = base_config();
        config.options.capital = Some(dec!(1000));
        config.options.recenter_minutes = Some(90);
        config.options.sell_on_stop_enabled = true;

        let json = serde_json::to_string(&config).unwrap();
        let back: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn config_uses_camel_case_keys() {
        let json = serde_json::to_value(base_config()).unwrap();
        assert!(json.get("gridLevels").is_some());
        assert!(json.get("gridSpread").is_some());
        assert!(json.get("orderSize").is_some());
        assert!(json.get("durationMinutes").is_some());
    }
}
