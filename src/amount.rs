//! Fixed-point token amounts
//!
//! Balances cross the backend boundary as integer strings in the smallest
//! unit. All arithmetic stays in `u128`; floats are never involved.

use std::fmt;

use thiserror::Error;

use crate::error::ClientError;

const SATS_PER_BTC_DECIMALS: u8 = 8;
/// Below this, bitcoin values are shown in satoshis
const SAT_DISPLAY_THRESHOLD: u64 = 100_000;
const PRICE_DECIMALS: u8 = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Invalid amount '{0}'")]
    Invalid(String),

    #[error("Amount '{0}' overflows")]
    Overflow(String),
}

impl From<AmountError> for ClientError {
    fn from(err: AmountError) -> Self {
        ClientError::Validation(err.to_string())
    }
}

/// Non-negative decimal amount stored as `raw / 10^decimals`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Amount {
    raw: u128,
    decimals: u8,
}

impl Amount {
    pub fn new(raw: u128, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self { raw: 0, decimals }
    }

    /// Parse an integer string in smallest units (as the backend sends balances)
    pub fn from_raw_str(raw: &str, decimals: u8) -> Result<Self, AmountError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AmountError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        let value = raw
            .parse::<u128>()
            .map_err(|_| AmountError::Overflow(raw.to_string()))?;
        Ok(Self::new(value, decimals))
    }

    /// Parse a user-entered decimal such as `"1.25"` or `".5"`.
    ///
    /// Digits beyond `decimals` are rounded half-up.
    pub fn parse_decimal(input: &str, decimals: u8) -> Result<Self, AmountError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, frac) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Invalid(input.to_string()));
        }

        let overflow = || AmountError::Overflow(input.to_string());
        let scale = pow10(decimals).ok_or_else(overflow)?;

        let whole_value = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| overflow())?
        };

        let places = decimals as usize;
        let (kept, dropped) = if frac.len() > places {
            frac.split_at(places)
        } else {
            (frac, "")
        };
        let mut frac_value = if kept.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", kept, width = places);
            padded.parse::<u128>().map_err(|_| overflow())?
        };
        if dropped.as_bytes().first().is_some_and(|d| *d >= b'5') {
            frac_value += 1;
        }

        let raw = whole_value
            .checked_mul(scale)
            .and_then(|w| w.checked_add(frac_value))
            .ok_or_else(overflow)?;
        Ok(Self::new(raw, decimals))
    }

    pub fn raw(&self) -> u128 {
        self.raw
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Round half-up to `precision` fractional digits, keeping the scale
    pub fn round_to(&self, precision: u32) -> Self {
        let decimals = u32::from(self.decimals);
        if precision >= decimals {
            return *self;
        }
        let Some(factor) = 10u128.checked_pow(decimals - precision) else {
            return *self;
        };
        let quotient = self.raw / factor;
        let remainder = self.raw % factor;
        let rounded = if remainder >= factor - remainder {
            quotient.saturating_add(1)
        } else {
            quotient
        };
        Self::new(rounded.saturating_mul(factor), self.decimals)
    }

    /// Render with exactly `precision` fractional digits
    pub fn to_fixed(&self, precision: u32) -> String {
        let rounded = self.round_to(precision);
        let (whole, frac) = rounded.split_digits();
        if precision == 0 {
            return whole;
        }
        let mut frac: String = frac.chars().take(precision as usize).collect();
        while frac.len() < precision as usize {
            frac.push('0');
        }
        format!("{whole}.{frac}")
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        if self.decimals != other.decimals {
            return None;
        }
        self.raw
            .checked_add(other.raw)
            .map(|raw| Self::new(raw, self.decimals))
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.decimals != other.decimals {
            return None;
        }
        self.raw
            .checked_sub(other.raw)
            .map(|raw| Self::new(raw, self.decimals))
    }

    /// Whole part and zero-padded fractional part
    fn split_digits(&self) -> (String, String) {
        let digits = self.raw.to_string();
        let places = self.decimals as usize;
        if places == 0 {
            return (digits, String::new());
        }
        if digits.len() > places {
            let (w, f) = digits.split_at(digits.len() - places);
            (w.to_string(), f.to_string())
        } else {
            ("0".to_string(), format!("{:0>width$}", digits, width = places))
        }
    }
}

/// Trailing zeros trimmed; no decimal point for whole values
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (whole, frac) = self.split_digits();
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            write!(f, "{whole}")
        } else {
            write!(f, "{whole}.{frac}")
        }
    }
}

fn pow10(exp: u8) -> Option<u128> {
    10u128.checked_pow(u32::from(exp))
}

/// Satoshis as a trimmed BTC string, e.g. `150000000` sat -> `"1.5"`
pub fn sat_to_btc(amount: bitcoin::Amount) -> String {
    Amount::new(u128::from(amount.to_sat()), SATS_PER_BTC_DECIMALS).to_string()
}

/// `"{n} sat"` for small values, `"₿{btc}"` otherwise
pub fn display_sat(amount: bitcoin::Amount) -> String {
    if amount.to_sat() < SAT_DISPLAY_THRESHOLD {
        format!("{} sat", amount.to_sat())
    } else {
        format!("₿{}", sat_to_btc(amount))
    }
}

/// USD value of `amount`, whole dollars only.
///
/// The price is truncated to whole dollars before multiplying.
pub fn sat_to_usd(amount: bitcoin::Amount, usd_price: &str) -> Result<String, AmountError> {
    let price = Amount::parse_decimal(usd_price, PRICE_DECIMALS)?;
    let price_int = price.raw() / 10u128.pow(u32::from(PRICE_DECIMALS));
    let usd = u128::from(amount.to_sat())
        .checked_mul(price_int)
        .ok_or_else(|| AmountError::Overflow(usd_price.to_string()))?
        / 100_000_000;
    Ok(format!("${}", group_thousands(&usd.to_string())))
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
