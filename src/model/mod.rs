//! Model structures: wire form, name grammar, normalized form, loader

pub mod data;
pub mod loader;
pub mod names;
pub mod norm;

pub use data::{
    Asset, Expense, Income, Model, Setting, SettingKind, Transaction, TransactionKind,
    CASH_ASSET_NAME,
};
pub use names::{decode, encode, DecodedName, Role};
pub use norm::{
    NormAsset, NormExpense, NormIncome, NormModel, NormTransaction, Recurrence, ValueSpec,
};
