//! Fund movement seam.
//!
//! The engine decides amounts and recipients; a [`Ledger`] moves the coins.
//! [`MemoryLedger`] keeps plain balances plus the module's escrow, deposit, and
//! tax pools, which is all the tests need to check accounting.
//!
//! The keeper wraps the host ledger in a [`JournaledLedger`] for each
//! operation; when the operation fails, every move it made is reversed.

use std::collections::BTreeMap;

use conduit_core::coins::Coins;
use conduit_core::types::Address;
use conduit_core::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: String,
        needed: Coins,
        available: Coins,
    },
    #[error("{pool} pool cannot cover {needed}")]
    PoolShortfall { pool: &'static str, needed: Coins },
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        ServiceError::Ledger(e.to_string())
    }
}

pub trait Ledger {
    /// Move `amount` from `payer` into the service escrow.
    fn escrow(&mut self, payer: &Address, amount: &Coins) -> Result<(), LedgerError>;
    /// Pay `amount` out of escrow to a provider (or its withdraw address).
    fn pay_earned(&mut self, payee: &Address, amount: &Coins) -> Result<(), LedgerError>;
    /// Return `amount` from escrow to the consumer that paid it.
    fn refund(&mut self, payee: &Address, amount: &Coins) -> Result<(), LedgerError>;
    /// Move `amount` from escrow to the tax collector.
    fn collect_tax(&mut self, amount: &Coins) -> Result<(), LedgerError>;
    /// Move `amount` from the tax collector back into escrow.
    fn return_tax(&mut self, amount: &Coins) -> Result<(), LedgerError>;
    /// Move a binding deposit from `owner` into the deposit pool.
    fn lock_deposit(&mut self, owner: &Address, amount: &Coins) -> Result<(), LedgerError>;
    /// Return a binding deposit from the pool to `owner`.
    fn release_deposit(&mut self, owner: &Address, amount: &Coins) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    balances: BTreeMap<Address, Coins>,
    escrow: Coins,
    deposits: Coins,
    tax: Coins,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air.
    pub fn mint(&mut self, account: &Address, amount: &Coins) {
        let entry = self.balances.entry(account.clone()).or_default();
        *entry = entry.add(amount);
    }

    pub fn balance(&self, account: &Address) -> Coins {
        self.balances.get(account).cloned().unwrap_or_default()
    }

    pub fn escrowed(&self) -> &Coins {
        &self.escrow
    }

    pub fn deposits(&self) -> &Coins {
        &self.deposits
    }

    pub fn tax_collected(&self) -> &Coins {
        &self.tax
    }

    fn debit(&mut self, account: &Address, amount: &Coins) -> Result<(), LedgerError> {
        let available = self.balance(account);
        let rest = available
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                account: account.to_string(),
                needed: amount.clone(),
                available: available.clone(),
            })?;
        self.balances.insert(account.clone(), rest);
        Ok(())
    }

    fn draw(pool: &mut Coins, name: &'static str, amount: &Coins) -> Result<(), LedgerError> {
        *pool = pool
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::PoolShortfall {
                pool: name,
                needed: amount.clone(),
            })?;
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn escrow(&mut self, payer: &Address, amount: &Coins) -> Result<(), LedgerError> {
        self.debit(payer, amount)?;
        self.escrow = self.escrow.add(amount);
        Ok(())
    }

    fn pay_earned(&mut self, payee: &Address, amount: &Coins) -> Result<(), LedgerError> {
        Self::draw(&mut self.escrow, "escrow", amount)?;
        self.mint(payee, amount);
        Ok(())
    }

    fn refund(&mut self, payee: &Address, amount: &Coins) -> Result<(), LedgerError> {
        Self::draw(&mut self.escrow, "escrow", amount)?;
        self.mint(payee, amount);
        Ok(())
    }

    fn collect_tax(&mut self, amount: &Coins) -> Result<(), LedgerError> {
        Self::draw(&mut self.escrow, "escrow", amount)?;
        self.tax = self.tax.add(amount);
        Ok(())
    }

    fn return_tax(&mut self, amount: &Coins) -> Result<(), LedgerError> {
        Self::draw(&mut self.tax, "tax", amount)?;
        self.escrow = self.escrow.add(amount);
        Ok(())
    }

    fn lock_deposit(&mut self, owner: &Address, amount: &Coins) -> Result<(), LedgerError> {
        self.debit(owner, amount)?;
        self.deposits = self.deposits.add(amount);
        Ok(())
    }

    fn release_deposit(&mut self, owner: &Address, amount: &Coins) -> Result<(), LedgerError> {
        Self::draw(&mut self.deposits, "deposit", amount)?;
        self.mint(owner, amount);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Move {
    Escrow(Address, Coins),
    PayEarned(Address, Coins),
    Refund(Address, Coins),
    CollectTax(Coins),
    LockDeposit(Address, Coins),
    ReleaseDeposit(Address, Coins),
}

/// Records the moves applied to `inner` so a failed operation can undo them.
pub(crate) struct JournaledLedger<'a> {
    inner: &'a mut dyn Ledger,
    journal: Vec<Move>,
}

impl<'a> JournaledLedger<'a> {
    pub(crate) fn new(inner: &'a mut dyn Ledger) -> Self {
        Self {
            inner,
            journal: Vec::new(),
        }
    }

    /// Reverse every recorded move, newest first.
    pub(crate) fn rollback(&mut self) -> Result<(), LedgerError> {
        let undone = self.journal.len();
        while let Some(m) = self.journal.pop() {
            match &m {
                Move::Escrow(payer, amount) => self.inner.refund(payer, amount)?,
                Move::PayEarned(payee, amount) | Move::Refund(payee, amount) => {
                    self.inner.escrow(payee, amount)?
                }
                Move::CollectTax(amount) => self.inner.return_tax(amount)?,
                Move::LockDeposit(owner, amount) => self.inner.release_deposit(owner, amount)?,
                Move::ReleaseDeposit(owner, amount) => self.inner.lock_deposit(owner, amount)?,
            }
        }
        if undone > 0 {
            tracing::debug!(moves = undone, "ledger moves rolled back");
        }
        Ok(())
    }

    fn record(&mut self, m: Move, applied: Result<(), LedgerError>) -> Result<(), LedgerError> {
        applied?;
        self.journal.push(m);
        Ok(())
    }
}

impl Ledger for JournaledLedger<'_> {
    fn escrow(&mut self, payer: &Address, amount: &Coins) -> Result<(), LedgerError> {
        let applied = self.inner.escrow(payer, amount);
        self.record(Move::Escrow(payer.clone(), amount.clone()), applied)
    }

    fn pay_earned(&mut self, payee: &Address, amount: &Coins) -> Result<(), LedgerError> {
        let applied = self.inner.pay_earned(payee, amount);
        self.record(Move::PayEarned(payee.clone(), amount.clone()), applied)
    }

    fn refund(&mut self, payee: &Address, amount: &Coins) -> Result<(), LedgerError> {
        let applied = self.inner.refund(payee, amount);
        self.record(Move::Refund(payee.clone(), amount.clone()), applied)
    }

    fn collect_tax(&mut self, amount: &Coins) -> Result<(), LedgerError> {
        let applied = self.inner.collect_tax(amount);
        self.record(Move::CollectTax(amount.clone()), applied)
    }

    fn return_tax(&mut self, amount: &Coins) -> Result<(), LedgerError> {
        self.inner.return_tax(amount)
    }

    fn lock_deposit(&mut self, owner: &Address, amount: &Coins) -> Result<(), LedgerError> {
        let applied = self.inner.lock_deposit(owner, amount);
        self.record(Move::LockDeposit(owner.clone(), amount.clone()), applied)
    }

    fn release_deposit(&mut self, owner: &Address, amount: &Coins) -> Result<(), LedgerError> {
        let applied = self.inner.release_deposit(owner, amount);
        self.record(Move::ReleaseDeposit(owner.clone(), amount.clone()), applied)
    }
}
