//! Fixed-point price conversion.
//!
//! The book only ever sees integer ticks. Decimal prices from the outside
//! world are converted here, once, at the boundary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::PriceError;

/// Converts between decimal prices and integer ticks for one instrument.
///
/// # Example
/// ```
/// use flash_core::price::PriceScale;
/// use rust_decimal::Decimal;
///
/// let scale = PriceScale::new(Decimal::new(1, 2)).unwrap(); // 0.01
/// assert_eq!(scale.to_ticks(Decimal::new(15000, 2)).unwrap(), 15_000);
/// assert_eq!(scale.from_ticks(14_900).unwrap(), Decimal::new(14900, 2));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceScale {
    tick: Decimal,
}

impl PriceScale {
    pub fn new(tick: Decimal) -> Result<Self, PriceError> {
        if tick <= Decimal::ZERO {
            return Err(PriceError::InvalidTickSize);
        }
        Ok(Self { tick })
    }

    /// Scale with a tick of `10^-decimals`.
    pub fn with_decimals(decimals: u32) -> Result<Self, PriceError> {
        if decimals > 28 {
            return Err(PriceError::InvalidTickSize);
        }
        Self::new(Decimal::new(1, decimals))
    }

    #[inline]
    pub fn tick(&self) -> Decimal {
        self.tick
    }

    /// Convert a decimal price into ticks.
    ///
    /// # Returns
    /// The exact tick count, or an error when the price is negative, not a
    /// multiple of the tick, or too large for `u64`.
    pub fn to_ticks(&self, price: Decimal) -> Result<u64, PriceError> {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(PriceError::Negative(price.to_string()));
        }
        let ticks = price
            .checked_div(self.tick)
            .ok_or_else(|| PriceError::Overflow(price.to_string()))?;
        if !ticks.fract().is_zero() {
            return Err(PriceError::OffTick {
                price: price.to_string(),
                tick: self.tick.to_string(),
            });
        }
        ticks
            .to_u64()
            .ok_or_else(|| PriceError::Overflow(price.to_string()))
    }

    /// Convert ticks back into a decimal price.
    ///
    /// # Returns
    /// `PriceError::Overflow` when the product exceeds `Decimal`'s range.
    pub fn from_ticks(&self, ticks: u64) -> Result<Decimal, PriceError> {
        Decimal::from(ticks)
            .checked_mul(self.tick)
            .map(|price| price.normalize())
            .ok_or_else(|| PriceError::Overflow(format!("{ticks} ticks")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_cents() {
        let scale = PriceScale::with_decimals(2).unwrap();
        assert_eq!(scale.to_ticks(dec("150.00")).unwrap(), 15_000);
        assert_eq!(scale.to_ticks(dec("0")).unwrap(), 0);
        assert_eq!(scale.from_ticks(15_025).unwrap(), dec("150.25"));
    }

    #[test]
    fn test_non_decimal_tick() {
        let scale = PriceScale::new(dec("0.25")).unwrap();
        assert_eq!(scale.to_ticks(dec("10.75")).unwrap(), 43);
        assert!(matches!(
            scale.to_ticks(dec("10.10")),
            Err(PriceError::OffTick { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(PriceScale::new(Decimal::ZERO), Err(PriceError::InvalidTickSize));
        let scale = PriceScale::with_decimals(2).unwrap();
        assert!(matches!(scale.to_ticks(dec("-1.00")), Err(PriceError::Negative(_))));
        assert!(matches!(
            scale.to_ticks(dec("999999999999999999999")),
            Err(PriceError::Overflow(_))
        ));
    }

    #[test]
    fn test_from_ticks_overflow() {
        let scale = PriceScale::new(dec("10000000000")).unwrap();
        assert!(matches!(scale.from_ticks(u64::MAX), Err(PriceError::Overflow(_))));
        assert_eq!(scale.from_ticks(3).unwrap(), dec("30000000000"));
    }
}
