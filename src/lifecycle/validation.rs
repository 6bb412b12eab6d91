//! Input validation for operation payloads
//!
//! Pure, synchronous checks run before any network call. Safe to call on
//! every keystroke.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{OperationKind, Payload};

// ============================================================================
// Payload field names
// ============================================================================

pub mod fields {
    pub const AMOUNT: &str = "amount";
    pub const ACCOUNT_NUMBER: &str = "accountNumber";
    pub const ACCOUNT_NAME: &str = "accountName";
    pub const BANK_NAME: &str = "bankName";
    pub const BANK_CODE: &str = "bankCode";
    pub const ADDRESS: &str = "address";
    pub const NETWORK: &str = "network";
    pub const PIN: &str = "pin";
    pub const TWO_FACTOR_CODE: &str = "twoFactorCode";
}

pub const AMOUNT_NOT_POSITIVE: &str = "Amount must be a positive number";
pub const AMOUNT_OUT_OF_RANGE: &str = "Amount is too large";

// ============================================================================
// Rules
// ============================================================================

/// Inclusive amount bounds for one operation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountBounds {
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
}

impl AmountBounds {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Static business rules for one operation kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationRules {
    pub amount: AmountBounds,
    /// Bank account number, name, bank name, and bank code
    pub require_bank_destination: bool,
    /// Crypto address + network
    pub require_crypto_destination: bool,
    pub require_pin: bool,
    pub require_two_factor: bool,
}

impl ValidationRules {
    /// Default rule set for a kind with caller-supplied bounds.
    pub fn for_kind(kind: OperationKind, amount: AmountBounds) -> Self {
        match kind {
            OperationKind::InternalTransfer => Self {
                amount,
                require_pin: true,
                ..Default::default()
            },
            OperationKind::ExternalWithdrawal => Self {
                amount,
                require_crypto_destination: true,
                require_pin: true,
                require_two_factor: true,
                ..Default::default()
            },
            OperationKind::FiatWithdrawal => Self {
                amount,
                require_bank_destination: true,
                require_pin: true,
                ..Default::default()
            },
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: ValidationRules,
}

impl Validator {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Return every failed rule; empty means valid.
    pub fn validate(&self, payload: &Payload) -> Vec<String> {
        let mut errors = Vec::new();

        match payload.get(fields::AMOUNT).map(parse_amount) {
            Some(AmountInput::Parsed(amount)) if amount > Decimal::ZERO => {
                if let Some(min) = self.rules.amount.min
                    && amount < min
                {
                    errors.push(format!("Amount must be at least {}", min.normalize()));
                }
                if let Some(max) = self.rules.amount.max
                    && amount > max
                {
                    errors.push(format!("Amount must not exceed {}", max.normalize()));
                }
            }
            Some(AmountInput::TooLarge) => errors.push(match self.rules.amount.max {
                Some(max) => format!("Amount must not exceed {}", max.normalize()),
                None => AMOUNT_OUT_OF_RANGE.to_string(),
            }),
            _ => errors.push(AMOUNT_NOT_POSITIVE.to_string()),
        }

        if self.rules.require_bank_destination {
            for (field, label) in [
                (fields::ACCOUNT_NUMBER, "Account number"),
                (fields::ACCOUNT_NAME, "Account name"),
                (fields::BANK_NAME, "Bank name"),
                (fields::BANK_CODE, "Bank code"),
            ] {
                if !non_empty(payload, field) {
                    errors.push(format!("{label} is required"));
                }
            }
        }

        if self.rules.require_crypto_destination {
            if !non_empty(payload, fields::ADDRESS) {
                errors.push("Destination address is required".to_string());
            }
            if !non_empty(payload, fields::NETWORK) {
                errors.push("Network is required".to_string());
            }
        }

        if self.rules.require_pin && !is_six_digit_pin(payload.get(fields::PIN)) {
            errors.push("PIN must be exactly 6 digits".to_string());
        }

        if self.rules.require_two_factor && !non_empty(payload, fields::TWO_FACTOR_CODE) {
            errors.push("Two-factor code is required".to_string());
        }

        errors
    }
}

enum AmountInput {
    Parsed(Decimal),
    /// Finite and positive, but beyond what `Decimal` can hold
    TooLarge,
    Invalid,
}

/// Accepts JSON numbers and numeric strings. Non-finite values are rejected.
fn parse_amount(value: &Value) -> AmountInput {
    let (decimal, float) = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return AmountInput::Parsed(Decimal::from(i));
            }
            if let Some(u) = n.as_u64() {
                return AmountInput::Parsed(Decimal::from(u));
            }
            let float = n.as_f64();
            (
                float.filter(|f| f.is_finite()).and_then(Decimal::from_f64),
                float,
            )
        }
        Value::String(s) => {
            let s = s.trim();
            (
                Decimal::from_str(s)
                    .or_else(|_| Decimal::from_scientific(s))
                    .ok(),
                s.parse::<f64>().ok(),
            )
        }
        _ => return AmountInput::Invalid,
    };

    match (decimal, float) {
        (Some(d), _) => AmountInput::Parsed(d),
        (None, Some(f)) if f.is_finite() && f > 0.0 => AmountInput::TooLarge,
        _ => AmountInput::Invalid,
    }
}

fn non_empty(payload: &Payload, field: &str) -> bool {
    match payload.get(field) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

fn is_six_digit_pin(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    fn fiat() -> Validator {
        Validator::new(ValidationRules::for_kind(
            OperationKind::FiatWithdrawal,
            AmountBounds::new(dec("100"), dec("1000000")),
        ))
    }

    #[test]
    fn test_negative_amount() {
        let v = Validator::new(ValidationRules::default());
        assert_eq!(
            v.validate(&payload(json!({ "amount": -5 }))),
            vec![AMOUNT_NOT_POSITIVE.to_string()]
        );
    }

    #[test]
    fn test_amount_forms() {
        let v = Validator::new(ValidationRules::default());
        assert!(v.validate(&payload(json!({ "amount": 12.5 }))).is_empty());
        assert!(v.validate(&payload(json!({ "amount": "250.00" }))).is_empty());
        assert!(v.validate(&payload(json!({ "amount": "1e3" }))).is_empty());
        assert_eq!(v.validate(&payload(json!({ "amount": 0 }))).len(), 1);
        assert_eq!(v.validate(&payload(json!({ "amount": "NaN" }))).len(), 1);
        assert_eq!(v.validate(&payload(json!({ "amount": "abc" }))).len(), 1);
        assert_eq!(v.validate(&payload(json!({}))).len(), 1);
    }

    #[test]
    fn test_amount_beyond_decimal_range() {
        let unbounded = Validator::new(ValidationRules::default());
        assert_eq!(
            unbounded.validate(&payload(json!({ "amount": 1e30 }))),
            vec![AMOUNT_OUT_OF_RANGE.to_string()]
        );
        assert_eq!(
            unbounded.validate(&payload(json!({ "amount": "1e40" }))),
            vec![AMOUNT_OUT_OF_RANGE.to_string()]
        );
        assert_eq!(
            unbounded.validate(&payload(json!({ "amount": -1e30 }))),
            vec![AMOUNT_NOT_POSITIVE.to_string()]
        );

        let bounded = Validator::new(ValidationRules {
            amount: AmountBounds::new(dec("1"), dec("5000")),
            ..Default::default()
        });
        assert_eq!(
            bounded.validate(&payload(json!({ "amount": 1e30 }))),
            vec!["Amount must not exceed 5000".to_string()]
        );
    }

    #[test]
    fn test_amount_bounds() {
        let v = Validator::new(ValidationRules {
            amount: AmountBounds::new(dec("100"), dec("5000")),
            ..Default::default()
        });
        assert_eq!(
            v.validate(&payload(json!({ "amount": 50 }))),
            vec!["Amount must be at least 100".to_string()]
        );
        assert_eq!(
            v.validate(&payload(json!({ "amount": "5000.01" }))),
            vec!["Amount must not exceed 5000".to_string()]
        );
        assert!(v.validate(&payload(json!({ "amount": 100 }))).is_empty());
        assert!(v.validate(&payload(json!({ "amount": 5000 }))).is_empty());
    }

    #[test]
    fn test_bank_destination_required() {
        let errors = fiat().validate(&payload(json!({
            "amount": 500,
            "accountNumber": "0123456789",
            "accountName": "  ",
            "pin": "123456"
        })));
        assert_eq!(
            errors,
            vec![
                "Account name is required".to_string(),
                "Bank name is required".to_string(),
                "Bank code is required".to_string(),
            ]
        );
    }

    #[test]
    fn test_pin_format() {
        let v = Validator::new(ValidationRules {
            require_pin: true,
            ..Default::default()
        });
        let base = json!({ "amount": 1 });
        for bad in [json!("12345"), json!("1234567"), json!("12a456"), json!(123456)] {
            let mut p = payload(base.clone());
            p.insert("pin".into(), bad);
            assert_eq!(v.validate(&p), vec!["PIN must be exactly 6 digits".to_string()]);
        }
        let mut p = payload(base);
        p.insert("pin".into(), json!("004219"));
        assert!(v.validate(&p).is_empty());
    }

    #[test]
    fn test_external_withdrawal_rules() {
        let v = Validator::new(ValidationRules::for_kind(
            OperationKind::ExternalWithdrawal,
            AmountBounds::default(),
        ));
        let errors = v.validate(&payload(json!({
            "amount": "0.5",
            "address": "0xabc",
            "pin": "123456",
            "twoFactorCode": ""
        })));
        assert_eq!(
            errors,
            vec![
                "Network is required".to_string(),
                "Two-factor code is required".to_string(),
            ]
        );
    }

    #[test]
    fn test_valid_fiat_payload() {
        let errors = fiat().validate(&payload(json!({
            "amount": 2500,
            "accountNumber": "0123456789",
            "accountName": "Ada Obi",
            "bankName": "First Bank",
            "bankCode": "011",
            "pin": "123456"
        })));
        assert!(errors.is_empty(), "{errors:?}");
    }
}
