//! Floor rounding against exchange filter increments.
//!
//! Every price sent to the exchange must be a multiple of the symbol's
//! tick size and every quantity a multiple of its step size, both
//! rounded downward. The result is rescaled to the increment's own
//! decimal precision so the serialized form never carries residual
//! digits the exchange would reject.

use rust_decimal::Decimal;

/// Number of fractional digits in the canonical form of an increment
/// (`0.010` and `0.01` both have precision 2).
pub fn increment_precision(increment: Decimal) -> u32 {
    increment.normalize().scale()
}

/// Floor `value` to a multiple of `tick`. Non-positive ticks leave the
/// value unchanged.
pub fn floor_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    floor_to_increment(value, tick)
}

/// Floor `value` to a multiple of `step`. Non-positive steps leave the
/// value unchanged.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    floor_to_increment(value, step)
}

fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }

    let units = (value / increment).floor();
    (units * increment)
        .round_dp(increment_precision(increment))
        .normalize()
}
