//! Money helpers
//!
//! Amounts are carried as `i64` minor currency units (cents) everywhere.

/// `unit_price × quantity + adjustment`, saturating instead of overflowing.
pub fn line_total_cents(unit_price_cents: i64, quantity: i32, adjustment_cents: i64) -> i64 {
    unit_price_cents
        .saturating_mul(i64::from(quantity))
        .saturating_add(adjustment_cents)
}

/// Render cents as a plain decimal amount, e.g. `19500` -> `"195.00"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total_with_adjustment() {
        assert_eq!(line_total_cents(7000, 2, 0), 14000);
        assert_eq!(line_total_cents(6000, 1, -500), 5500);
    }

    #[test]
    fn test_line_total_saturates() {
        assert_eq!(line_total_cents(i64::MAX, 2, 0), i64::MAX);
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(19500), "195.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-1250), "-12.50");
        assert_eq!(format_cents(0), "0.00");
    }
}
