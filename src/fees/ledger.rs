//! Pure balance arithmetic for the fee engine.
//!
//! Balances are never persisted: for a student and fee type,
//! `balance = max(0, scheduled - paid)`, recomputed from source rows on
//! every read. Payment acceptance and reconciliation validate against the
//! same schedule amounts before any row is written.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The six fee categories a class schedules amounts for. Labels are
/// case-insensitive on the way in and normalized on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeType {
    Registration,
    Bus,
    Internship,
    Remedial,
    Tuition,
    Pta,
}

impl FeeType {
    pub const ALL: [FeeType; 6] = [
        FeeType::Registration,
        FeeType::Bus,
        FeeType::Internship,
        FeeType::Remedial,
        FeeType::Tuition,
        FeeType::Pta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Registration => "Registration",
            FeeType::Bus => "Bus",
            FeeType::Internship => "Internship",
            FeeType::Remedial => "Remedial",
            FeeType::Tuition => "Tuition",
            FeeType::Pta => "PTA",
        }
    }
}

impl FromStr for FeeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "registration" => Ok(FeeType::Registration),
            "bus" => Ok(FeeType::Bus),
            "internship" => Ok(FeeType::Internship),
            "remedial" => Ok(FeeType::Remedial),
            "tuition" => Ok(FeeType::Tuition),
            "pta" => Ok(FeeType::Pta),
            _ => Err(()),
        }
    }
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FeeType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A class's scheduled amount per fee type. Mutated only via class update.
#[derive(Debug, Clone, FromRow)]
pub struct FeeSchedule {
    pub registration_fee: Decimal,
    pub bus_fee: Decimal,
    pub internship_fee: Decimal,
    pub remedial_fee: Decimal,
    pub tuition_fee: Decimal,
    pub pta_fee: Decimal,
}

impl FeeSchedule {
    pub fn amount_for(&self, fee_type: FeeType) -> Decimal {
        match fee_type {
            FeeType::Registration => self.registration_fee,
            FeeType::Bus => self.bus_fee,
            FeeType::Internship => self.internship_fee,
            FeeType::Remedial => self.remedial_fee,
            FeeType::Tuition => self.tuition_fee,
            FeeType::Pta => self.pta_fee,
        }
    }

    pub fn total(&self) -> Decimal {
        FeeType::ALL
            .iter()
            .map(|ft| self.amount_for(*ft))
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TypeBalance {
    pub fee_type: FeeType,
    pub scheduled: Decimal,
    pub paid: Decimal,
    pub balance: Decimal,
}

/// Per-type breakdown for one student. A type with zero scheduled amount
/// reports a zero balance no matter what has been paid against it.
pub fn balances(schedule: &FeeSchedule, paid: &HashMap<FeeType, Decimal>) -> Vec<TypeBalance> {
    FeeType::ALL
        .iter()
        .map(|&fee_type| {
            let scheduled = schedule.amount_for(fee_type);
            let paid = paid.get(&fee_type).copied().unwrap_or(Decimal::ZERO);
            TypeBalance {
                fee_type,
                scheduled,
                paid,
                balance: (scheduled - paid).max(Decimal::ZERO),
            }
        })
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum PaymentError {
    NonPositiveAmount,
    ExceedsRemaining { remaining: Decimal },
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentError::NonPositiveAmount => write!(f, "Amount must be greater than zero"),
            PaymentError::ExceedsRemaining { remaining } => {
                write!(f, "Payment exceeds remaining balance of {}", remaining)
            }
        }
    }
}

/// Gate for payment acceptance: the new payment added to the cumulative
/// paid total must not exceed the scheduled amount. Violations are
/// rejected, never clamped.
pub fn check_payment(
    scheduled: Decimal,
    already_paid: Decimal,
    amount: Decimal,
) -> Result<(), PaymentError> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::NonPositiveAmount);
    }

    let remaining = (scheduled - already_paid).max(Decimal::ZERO);
    if amount > remaining {
        return Err(PaymentError::ExceedsRemaining { remaining });
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
pub enum ReconcileError {
    NegativeTotal,
    ExceedsScheduled { scheduled: Decimal },
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::NegativeTotal => write!(f, "Total must not be negative"),
            ReconcileError::ExceedsScheduled { scheduled } => {
                write!(f, "Total exceeds scheduled amount of {}", scheduled)
            }
        }
    }
}

/// Gate for reconciliation: the consolidated total must stay within the
/// scheduled amount. There is deliberately no lower bound: reconciling
/// downward forgives prior payments (admin override).
pub fn check_reconciliation(scheduled: Decimal, total: Decimal) -> Result<(), ReconcileError> {
    if total < Decimal::ZERO {
        return Err(ReconcileError::NegativeTotal);
    }
    if total > scheduled {
        return Err(ReconcileError::ExceedsScheduled { scheduled });
    }
    Ok(())
}

/// The replacement for one fee type's payment history: no row when the
/// consolidated total is zero, otherwise a single row carrying it. An
/// error means the existing rows must stay exactly as they are.
pub fn consolidated_row(scheduled: Decimal, total: Decimal) -> Result<Option<Decimal>, ReconcileError> {
    check_reconciliation(scheduled, total)?;
    Ok(if total > Decimal::ZERO { Some(total) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn schedule() -> FeeSchedule {
        FeeSchedule {
            registration_fee: dec!(5000),
            bus_fee: dec!(0),
            internship_fee: dec!(12000),
            remedial_fee: dec!(3000),
            tuition_fee: dec!(50000),
            pta_fee: dec!(1500),
        }
    }

    #[test]
    fn labels_are_case_insensitive_and_closed() {
        assert_eq!("tuition".parse::<FeeType>(), Ok(FeeType::Tuition));
        assert_eq!("PTA".parse::<FeeType>(), Ok(FeeType::Pta));
        assert_eq!(" Bus ".parse::<FeeType>(), Ok(FeeType::Bus));
        assert!("library".parse::<FeeType>().is_err());
        assert_eq!(FeeType::Pta.as_str(), "PTA");
    }

    #[test]
    fn balance_is_clamped_difference() {
        let mut paid = HashMap::new();
        paid.insert(FeeType::Tuition, dec!(40000));
        paid.insert(FeeType::Remedial, dec!(3000));

        let result = balances(&schedule(), &paid);
        let by_type = |ft: FeeType| result.iter().find(|b| b.fee_type == ft).unwrap().clone();

        assert_eq!(by_type(FeeType::Tuition).balance, dec!(10000));
        assert_eq!(by_type(FeeType::Remedial).balance, dec!(0));
        assert_eq!(by_type(FeeType::Registration).balance, dec!(5000));
        // Every fee type is present even with no payments against it.
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn zero_scheduled_amount_never_goes_negative() {
        let mut paid = HashMap::new();
        paid.insert(FeeType::Bus, dec!(700));

        let result = balances(&schedule(), &paid);
        let bus = result.iter().find(|b| b.fee_type == FeeType::Bus).unwrap();
        assert_eq!(bus.scheduled, dec!(0));
        assert_eq!(bus.paid, dec!(700));
        assert_eq!(bus.balance, dec!(0));
    }

    #[test]
    fn balance_never_negative_over_payment_sequences() {
        let scheduled = dec!(50000);
        let payments = [dec!(20000), dec!(20000), dec!(10000)];
        let mut running = Decimal::ZERO;

        for p in payments {
            assert!(check_payment(scheduled, running, p).is_ok());
            running += p;
            let balance = (scheduled - running).max(Decimal::ZERO);
            assert!(balance >= Decimal::ZERO);
        }
        assert_eq!(running, scheduled);
    }

    #[test]
    fn payment_past_schedule_is_rejected() {
        // Tuition 50000: 20000 + 20000 leaves 10000 remaining.
        let scheduled = dec!(50000);
        let already_paid = dec!(40000);

        assert_eq!(
            check_payment(scheduled, already_paid, dec!(15000)),
            Err(PaymentError::ExceedsRemaining { remaining: dec!(10000) })
        );
        assert!(check_payment(scheduled, already_paid, dec!(10000)).is_ok());
    }

    #[test]
    fn non_positive_payments_are_rejected() {
        assert_eq!(
            check_payment(dec!(1000), dec!(0), dec!(0)),
            Err(PaymentError::NonPositiveAmount)
        );
        assert_eq!(
            check_payment(dec!(1000), dec!(0), dec!(-5)),
            Err(PaymentError::NonPositiveAmount)
        );
    }

    #[test]
    fn reconciliation_bounds() {
        let scheduled = dec!(50000);
        assert!(check_reconciliation(scheduled, dec!(0)).is_ok());
        assert!(check_reconciliation(scheduled, dec!(50000)).is_ok());
        // No lower bound: reconciling downward is allowed.
        assert!(check_reconciliation(scheduled, dec!(1)).is_ok());
        assert_eq!(
            check_reconciliation(scheduled, dec!(50001)),
            Err(ReconcileError::ExceedsScheduled { scheduled })
        );
        assert_eq!(
            check_reconciliation(scheduled, dec!(-1)),
            Err(ReconcileError::NegativeTotal)
        );
    }

    #[test]
    fn consolidated_row_is_empty_at_zero_and_single_otherwise() {
        assert_eq!(consolidated_row(dec!(50000), dec!(0)), Ok(None));
        assert_eq!(consolidated_row(dec!(50000), dec!(30000)), Ok(Some(dec!(30000))));
        assert_eq!(
            consolidated_row(dec!(50000), dec!(50001)),
            Err(ReconcileError::ExceedsScheduled { scheduled: dec!(50000) })
        );
    }

    #[test]
    fn schedule_total_sums_all_types() {
        assert_eq!(schedule().total(), dec!(71500));
    }
}
