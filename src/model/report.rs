use crate::error::Res;
use crate::model::{Amount, YearMonth};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The financial record of a single month.
///
/// `incomes` and `expenses` are kept in the order the user arranged them. Nothing in this crate
/// reorders them.
///
/// Every field except `year` and `month` may be missing when deserializing, which is what partially
/// formed reports from an import look like. Missing numbers become zero and missing lists become
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    /// The date the salary arrived, `YYYY-MM-DD`. Empty until the user sets it.
    #[serde(default)]
    pub payday: String,
    /// The account balance as of `payday`.
    #[serde(default)]
    pub balance: Amount,
    #[serde(default)]
    pub salary: Amount,
    #[serde(default)]
    pub salary13: Amount,
    #[serde(default)]
    pub salary14: Amount,
    #[serde(default)]
    pub incomes: Vec<Income>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub notes: String,
}

/// A single expense line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
    /// Derived from `amount` and `shared`. See `Expense::normalize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Amount>,
}

/// A single extra income line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: Amount,
}

/// Aggregates shown for one month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub expenses: Amount,
    pub incomes: Amount,
    /// `salary + incomes + salary13 + salary14`
    pub salary: Amount,
    pub shared_count: usize,
    pub shared_total: Amount,
}

impl MonthlyReport {
    /// The zero-value report for a month that has no data yet. It is not persisted until the first
    /// mutation is applied to it.
    pub fn empty(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            payday: String::new(),
            balance: Amount::ZERO,
            salary: Amount::ZERO,
            salary13: Amount::ZERO,
            salary14: Amount::ZERO,
            incomes: Vec::new(),
            expenses: Vec::new(),
            notes: String::new(),
        }
    }

    /// The `(year, month)` key of this report.
    pub fn key(&self) -> Res<YearMonth> {
        YearMonth::new(self.year, self.month)
            .with_context(|| format!("Report for year {} has an invalid month", self.year))
    }

    /// Whether the payday has been recorded for this month.
    pub fn has_payday(&self) -> bool {
        !self.payday.trim().is_empty()
    }

    /// Assigns ids to lines that lack one and recomputes the derived `total_amount` of every
    /// expense. Lines that already have an id keep it, so calling this repeatedly is harmless.
    pub fn normalize(&mut self) {
        for expense in &mut self.expenses {
            expense.normalize();
        }
        for income in &mut self.incomes {
            if income.id.trim().is_empty() {
                income.id = new_id();
            }
        }
    }

    /// Checks the constraints of the data model: the month is in `1..=12`, no amount is negative
    /// and the month's totals do not overflow.
    pub fn validate(&self) -> Res<()> {
        let key = self.key()?;
        let money = [
            ("balance", &self.balance),
            ("salary", &self.salary),
            ("salary13", &self.salary13),
            ("salary14", &self.salary14),
        ];
        for (name, value) in money {
            if value.is_negative() {
                bail!("{key}: {name} cannot be negative ({value})");
            }
        }
        for expense in &self.expenses {
            if expense.amount.is_negative() {
                bail!(
                    "{key}: expense '{}' has a negative amount ({})",
                    expense.description,
                    expense.amount
                );
            }
        }
        for income in &self.incomes {
            if income.amount.is_negative() {
                bail!(
                    "{key}: income '{}' has a negative amount ({})",
                    income.description,
                    income.amount
                );
            }
        }
        if !self.totals_fit() {
            bail!("{key}: the amounts are too large to add up");
        }
        Ok(())
    }

    /// Whether every total in `totals` can be computed without overflowing.
    fn totals_fit(&self) -> bool {
        let shared: Option<Vec<Amount>> = self
            .expenses
            .iter()
            .filter(|e| e.is_shared())
            .map(|e| e.amount.checked_doubled())
            .collect();
        let Some(shared) = shared else {
            return false;
        };
        let expenses = Amount::checked_sum(self.expenses.iter().map(|e| &e.amount));
        let incomes = Amount::checked_sum(self.incomes.iter().map(|i| &i.amount));
        let salary = incomes.and_then(|incomes| {
            Amount::checked_sum(&[self.salary, incomes, self.salary13, self.salary14])
        });
        expenses.is_some() && salary.is_some() && Amount::checked_sum(&shared).is_some()
    }

    /// Computes the month's totals.
    pub fn totals(&self) -> ReportTotals {
        let expenses: Amount = self.expenses.iter().map(|e| e.amount).sum();
        let incomes: Amount = self.incomes.iter().map(|i| i.amount).sum();
        let shared: Vec<&Expense> = self.expenses.iter().filter(|e| e.is_shared()).collect();
        ReportTotals {
            expenses,
            incomes,
            salary: self.salary + incomes + self.salary13 + self.salary14,
            shared_count: shared.len(),
            shared_total: shared.iter().map(|e| e.effective_total()).sum(),
        }
    }
}

impl Expense {
    pub fn new(description: impl Into<String>, amount: impl Into<Amount>, shared: bool) -> Self {
        let mut expense = Self {
            id: new_id(),
            description: description.into(),
            amount: amount.into(),
            shared: Some(shared),
            total_amount: None,
        };
        expense.normalize();
        expense
    }

    pub fn is_shared(&self) -> bool {
        self.shared.unwrap_or(false)
    }

    /// Ensures an id and sets `total_amount` from `amount` and `shared`.
    pub fn normalize(&mut self) {
        if self.id.trim().is_empty() {
            self.id = new_id();
        }
        self.total_amount = Some(self.derived_total());
    }

    /// The stored total, or the derived one when nothing is stored.
    pub fn effective_total(&self) -> Amount {
        match self.total_amount {
            Some(total) if !total.is_zero() => total,
            _ => self.derived_total(),
        }
    }

    fn derived_total(&self) -> Amount {
        if self.is_shared() {
            self.amount.doubled()
        } else {
            self.amount
        }
    }
}

impl Income {
    pub fn new(description: impl Into<String>, amount: impl Into<Amount>) -> Self {
        Self {
            id: new_id(),
            description: description.into(),
            amount: amount.into(),
        }
    }
}

/// A fresh opaque identifier for a line item.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}
