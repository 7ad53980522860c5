use crate::error::FulfillmentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// External, stable user identifier assigned by the presentation layer.
pub type UserId = u64;

/// Represents a spendable monetary value.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific
/// rules and provide type safety for financial calculations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount for debits and credits.
///
/// Ensures that money moved in or out of an account is always positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, FulfillmentError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(FulfillmentError::Validation(
                "amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = FulfillmentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// A user's durable account row.
///
/// Holds the spendable balance (invariant: never negative) and the
/// monotonic purchased-unit counter. Rows are created lazily on first
/// touch and never deleted by this core.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct UserAccount {
    pub user_id: UserId,
    pub balance: Balance,
    pub purchased: u32,
}

impl UserAccount {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Balance::ZERO,
            purchased: 0,
        }
    }

    /// Adds funds to the balance.
    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount.into();
    }

    /// Removes funds if the balance covers the amount.
    pub fn debit(&mut self, amount: Amount) -> Result<(), FulfillmentError> {
        if self.balance >= amount.into() {
            self.balance -= amount.into();
            Ok(())
        } else {
            Err(FulfillmentError::InsufficientFunds {
                needed: amount.value(),
                available: self.balance.value(),
            })
        }
    }

    /// Records `n` newly committed claims against the account.
    pub fn record_purchase(&mut self, n: u32) {
        self.purchased += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10.0));
        let b2 = Balance::new(dec!(5.0));
        assert_eq!(b1 + b2, Balance::new(dec!(15.0)));
        assert_eq!(b1 - b2, Balance::new(dec!(5.0)));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(FulfillmentError::Validation(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(FulfillmentError::Validation(_))
        ));
    }

    #[test]
    fn test_account_credit() {
        let mut account = UserAccount::new(1);
        account.credit(Amount::new(dec!(10.0)).unwrap());
        assert_eq!(account.balance, Balance::new(dec!(10.0)));
    }

    #[test]
    fn test_account_debit_success() {
        let mut account = UserAccount::new(1);
        account.credit(Amount::new(dec!(10.0)).unwrap());

        let result = account.debit(Amount::new(dec!(4.0)).unwrap());
        assert!(result.is_ok());
        assert_eq!(account.balance, Balance::new(dec!(6.0)));
    }

    #[test]
    fn test_account_debit_insufficient() {
        let mut account = UserAccount::new(1);
        account.credit(Amount::new(dec!(10.0)).unwrap());

        let result = account.debit(Amount::new(dec!(20.0)).unwrap());
        assert!(matches!(
            result,
            Err(FulfillmentError::InsufficientFunds { .. })
        ));
        assert_eq!(account.balance, Balance::new(dec!(10.0)));
    }

    #[test]
    fn test_account_debit_exact_balance() {
        let mut account = UserAccount::new(1);
        account.credit(Amount::new(dec!(10.0)).unwrap());

        account.debit(Amount::new(dec!(10.0)).unwrap()).unwrap();
        assert_eq!(account.balance, Balance::ZERO);
    }

    #[test]
    fn test_purchased_counter_monotonic() {
        let mut account = UserAccount::new(1);
        account.record_purchase(3);
        account.record_purchase(2);
        assert_eq!(account.purchased, 5);
    }
}
