use serde::{Deserialize, Serialize};

use super::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Recette,
    Depense,
}

/// One income or expense line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub programme_id: i64,
    #[serde(rename = "libelle")]
    pub label: String,
    #[serde(rename = "montant")]
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub date: Option<String>,
}

impl Entity for FinanceEntry {
    const COLLECTION: &'static str = "finances";
}

impl FinanceEntry {
    /// Amount with expenses negative.
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            EntryKind::Recette => self.amount,
            EntryKind::Depense => -self.amount,
        }
    }
}

/// Net balance of a set of entries.
pub fn balance(entries: &[FinanceEntry]) -> f64 {
    entries.iter().map(FinanceEntry::signed_amount).sum()
}
