//! On-demand list prices and right-sizing steps.
//!
//! Prices are Linux on-demand USD per hour in us-east-1. Other regions are
//! priced with the same table and the report says so.

use rust_decimal::Decimal;

/// Hours billed per month.
pub const HOURS_PER_MONTH: u32 = 730;

/// Fraction saved by a one-year, no-upfront standard reserved instance.
pub const RESERVED_DISCOUNT: Decimal = Decimal::from_parts(40, 0, 0, false, 2);

/// Hourly price in ten-thousandths of a dollar.
const PRICES: &[(&str, i64)] = &[
    ("t2.nano", 58),
    ("t2.micro", 116),
    ("t2.small", 230),
    ("t2.medium", 464),
    ("t2.large", 928),
    ("t2.xlarge", 1856),
    ("t2.2xlarge", 3712),
    ("t3.nano", 52),
    ("t3.micro", 104),
    ("t3.small", 208),
    ("t3.medium", 416),
    ("t3.large", 832),
    ("t3.xlarge", 1664),
    ("t3.2xlarge", 3328),
    ("m4.large", 1000),
    ("m4.xlarge", 2000),
    ("m4.2xlarge", 4000),
    ("m4.4xlarge", 8000),
    ("m5.large", 960),
    ("m5.xlarge", 1920),
    ("m5.2xlarge", 3840),
    ("m5.4xlarge", 7680),
    ("c4.large", 1000),
    ("c4.xlarge", 1990),
    ("c4.2xlarge", 3980),
    ("c5.large", 850),
    ("c5.xlarge", 1700),
    ("c5.2xlarge", 3400),
    ("c5.4xlarge", 6800),
    ("r4.large", 1330),
    ("r4.xlarge", 2660),
    ("r4.2xlarge", 5320),
    ("r5.large", 1260),
    ("r5.xlarge", 2520),
    ("r5.2xlarge", 5040),
];

/// Previous-generation family to its current replacement.
const SUCCESSORS: &[(&str, &str)] = &[("t2", "t3"), ("m4", "m5"), ("c4", "c5"), ("r4", "r5")];

const SIZES: &[&str] = &[
    "nano", "micro", "small", "medium", "large", "xlarge", "2xlarge", "4xlarge",
];

/// On-demand hourly price, if listed.
#[must_use]
pub fn hourly(instance_type: &str) -> Option<Decimal> {
    PRICES
        .iter()
        .find(|(t, _)| *t == instance_type)
        .map(|(_, p)| Decimal::new(*p, 4))
}

/// On-demand monthly price, if listed.
#[must_use]
pub fn monthly(instance_type: &str) -> Option<Decimal> {
    hourly(instance_type).map(|h| (h * Decimal::from(HOURS_PER_MONTH)).round_dp(2))
}

/// The cheaper type an under-used instance should move to: one size down
/// within the family, on the current generation. Falls back to a generation
/// move alone when the smaller size does not exist.
#[must_use]
pub fn right_size(instance_type: &str) -> Option<&'static str> {
    let (family, size) = instance_type.split_once('.')?;
    let family = SUCCESSORS
        .iter()
        .find(|(old, _)| *old == family)
        .map_or(family, |(_, new)| *new);

    let current = monthly(instance_type)?;
    let at = SIZES.iter().position(|s| *s == size)?;
    let candidates = at
        .checked_sub(1)
        .map(|smaller| SIZES[smaller])
        .into_iter()
        .chain(std::iter::once(size));
    candidates
        .filter_map(|s| listed(&format!("{family}.{s}")))
        .find(|t| monthly(t).is_some_and(|m| m < current))
}

fn listed(instance_type: &str) -> Option<&'static str> {
    PRICES
        .iter()
        .find(|(t, _)| *t == instance_type)
        .map(|(t, _)| *t)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn monthly_uses_730_hours() {
        assert_eq!(monthly("t3.medium").unwrap(), Decimal::from_str("30.37").unwrap());
        assert_eq!(monthly("m5.xlarge").unwrap(), Decimal::from_str("140.16").unwrap());
        assert!(monthly("x2iedn.metal").is_none());
    }

    #[test]
    fn right_sizing_steps() {
        assert_eq!(right_size("t2.large"), Some("t3.medium"));
        assert_eq!(right_size("m5.xlarge"), Some("m5.large"));
        // No m5.medium: generation move only.
        assert_eq!(right_size("m4.large"), Some("m5.large"));
        assert_eq!(right_size("t3.nano"), None);
        assert_eq!(right_size("m5.large"), None);
        assert_eq!(right_size("unknown"), None);
    }

    #[test]
    fn discount_is_forty_percent() {
        assert_eq!(RESERVED_DISCOUNT, Decimal::from_str("0.40").unwrap());
    }
}
