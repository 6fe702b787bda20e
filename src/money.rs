//! Fixed-point money helpers.
//!
//! Every amount in the engine is a [`Decimal`] held at cent precision. Rounding
//! happens once per computed amount (a discounted unit price, a coupon discount)
//! so that line totals always add up to the subtotal they are reported under.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits carried by money values.
pub const SCALE: u32 = 2;

/// Largest amount a `NUMERIC(12,2)` column can hold.
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, SCALE)
}

/// Round to whole cents, half away from zero, and pin the scale to two digits.
pub fn cents(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// `pct` percent of `amount`, rounded to cents.
pub fn percent_of(amount: Decimal, pct: Decimal) -> Decimal {
    cents(amount * pct / Decimal::ONE_HUNDRED)
}

/// Clamp a money value at zero.
pub fn non_negative(value: Decimal) -> Decimal {
    cents(value.max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_amount_is_the_column_ceiling() {
        assert_eq!(max_amount().to_string(), "9999999999.99");
    }

    #[test]
    fn cents_rounds_half_away_from_zero() {
        assert_eq!(cents(Decimal::new(12345, 3)), Decimal::new(1235, 2));
        assert_eq!(cents(Decimal::new(12344, 3)), Decimal::new(1234, 2));
        assert_eq!(cents(Decimal::from(15)).to_string(), "15.00");
    }

    #[test]
    fn percent_of_keeps_cent_precision() {
        assert_eq!(percent_of(Decimal::from(15), Decimal::from(10)), Decimal::new(150, 2));
        assert_eq!(percent_of(Decimal::new(999, 2), Decimal::from(33)), Decimal::new(330, 2));
    }

    #[test]
    fn non_negative_floors_at_zero() {
        assert_eq!(non_negative(Decimal::new(-500, 2)), Decimal::ZERO);
        assert_eq!(non_negative(Decimal::new(500, 2)), Decimal::new(500, 2));
    }
}
