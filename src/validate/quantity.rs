//! Kubernetes resource quantities
//!
//! Parses the quantity notation used for CPU and memory requests and limits
//! (`100m`, `1.5`, `250Mi`, `1e3`) into an exact representation that can be
//! compared at a chosen precision.

use thiserror::Error;

/// A quantity string that does not follow the Kubernetes notation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$'")]
pub struct InvalidQuantity;

const MAX_DIGITS: usize = 30;

/// An exact quantity: `mantissa * 10^exp10 * 2^exp2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    mantissa: i128,
    exp10: i32,
    exp2: u32,
}

impl Quantity {
    /// Parse a quantity such as `100m`, `2`, `1.5Gi`, or `5e-3`.
    pub fn parse(input: &str) -> Result<Self, InvalidQuantity> {
        let s = input.trim();
        let (negative, s) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(number_len);

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(InvalidQuantity);
        }
        if frac.contains('.') || whole.len() + frac.len() > MAX_DIGITS {
            return Err(InvalidQuantity);
        }

        let digits = format!("{}{}", whole, frac);
        let mut mantissa: i128 = digits.parse().map_err(|_| InvalidQuantity)?;
        if negative {
            mantissa = -mantissa;
        }
        let frac_len = i32::try_from(frac.len()).map_err(|_| InvalidQuantity)?;

        let (exp10, exp2) = parse_suffix(suffix)?;
        Ok(Self {
            mantissa,
            exp10: exp10 - frac_len,
            exp2,
        })
    }

    /// The quantity in thousandths, rounded up.
    pub fn milli_value(&self) -> Option<i128> {
        self.scaled(3)
    }

    /// The quantity in whole units, rounded up.
    pub fn value(&self) -> Option<i128> {
        self.scaled(0)
    }

    /// Whole CPU cores for a CPU quantity: rounded up, never less than one.
    pub fn whole_cores(&self) -> Option<i64> {
        let cores = self.value()?.max(1);
        i64::try_from(cores).ok()
    }

    /// `ceil(self * 10^scale)`, or `None` on overflow.
    fn scaled(&self, scale: i32) -> Option<i128> {
        let base = self.mantissa.checked_mul(1i128.checked_shl(self.exp2)?)?;
        let exp = self.exp10 + scale;
        if exp >= 0 {
            base.checked_mul(10i128.checked_pow(exp.unsigned_abs())?)
        } else {
            let divisor = 10i128.checked_pow(exp.unsigned_abs())?;
            let quotient = base.div_euclid(divisor);
            if base.rem_euclid(divisor) == 0 {
                Some(quotient)
            } else {
                quotient.checked_add(1)
            }
        }
    }
}

fn parse_suffix(suffix: &str) -> Result<(i32, u32), InvalidQuantity> {
    let parsed = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))
                .ok_or(InvalidQuantity)?;
            let unsigned = exponent.trim_start_matches(['+', '-']);
            if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                return Err(InvalidQuantity);
            }
            (exponent.parse().map_err(|_| InvalidQuantity)?, 0)
        }
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    #[test]
    fn cpu_quantities_compare_in_millis() {
        assert_eq!(q("100m").milli_value(), Some(100));
        assert_eq!(q("1").milli_value(), Some(1000));
        assert_eq!(q("1.5").milli_value(), Some(1500));
        assert_eq!(q("0.25").milli_value(), Some(250));
        assert_eq!(q("5e-3").milli_value(), Some(5));
    }

    #[test]
    fn memory_quantities_in_bytes() {
        assert_eq!(q("20Mi").value(), Some(20 * 1024 * 1024));
        assert_eq!(q("1Gi").value(), Some(1 << 30));
        assert_eq!(q("250M").value(), Some(250_000_000));
        assert_eq!(q("1k").value(), Some(1000));
        assert_eq!(q("1E3").value(), Some(1000));
        assert_eq!(q("1E").value(), Some(1_000_000_000_000_000_000));
    }

    #[test]
    fn fractional_values_round_up() {
        assert_eq!(q("100m").value(), Some(1));
        assert_eq!(q("1500m").value(), Some(2));
        assert_eq!(q("1n").milli_value(), Some(1));
    }

    #[test]
    fn whole_cores_is_at_least_one() {
        assert_eq!(q("100m").whole_cores(), Some(1));
        assert_eq!(q("0").whole_cores(), Some(1));
        assert_eq!(q("2").whole_cores(), Some(2));
        assert_eq!(q("2100m").whole_cores(), Some(3));
    }

    #[test]
    fn rejects_malformed_quantities() {
        for bad in ["", "m", "abc", "1.2.3", "10 Mi", "1Zi", "1e", "1e+", "--1", "1mm"] {
            assert_eq!(Quantity::parse(bad), Err(InvalidQuantity), "{bad:?}");
        }
    }

    #[test]
    fn signs_are_accepted() {
        assert_eq!(q("+1").value(), Some(1));
        assert_eq!(q("-1").value(), Some(-1));
    }
}
