use serde::{Deserialize, Serialize};

use crate::id::{CategoryId, IncomeSourceId, UserId};

/// Placeholder names that stand for "no category". Nothing automated may target them.
pub const SENTINEL_CATEGORY_NAMES: &[&str] = &["Uncategorized", "N/A"];

pub fn is_sentinel_name(name: &str) -> bool {
    let name = name.trim();
    SENTINEL_CATEGORY_NAMES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseCategory {
    pub id: Option<CategoryId>,
    pub user_id: UserId,
    pub name: String,
    pub color: Option<String>,
}

impl ExpenseCategory {
    pub fn new(user_id: UserId, name: &str) -> Self {
        ExpenseCategory {
            id: None,
            user_id,
            name: name.trim().to_string(),
            color: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        is_sentinel_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeSource {
    pub id: Option<IncomeSourceId>,
    pub user_id: UserId,
    pub name: String,
}

impl IncomeSource {
    pub fn new(user_id: UserId, name: &str) -> Self {
        IncomeSource {
            id: None,
            user_id,
            name: name.trim().to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        is_sentinel_name(&self.name)
    }
}

/// Categories every new user starts with. "Uncategorized" is the sentinel bucket.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Uncategorized",
    "Groceries",
    "Dining",
    "Transportation",
    "Utilities",
    "Housing",
    "Shopping",
    "Health",
    "Entertainment",
    "Fees",
];

pub const CATEGORY_PALETTE: &[&str] = &[
    "#4E79A7", "#F28E2B", "#E15759", "#76B7B2", "#59A14F", "#EDC948", "#B07AA1", "#FF9DA7",
    "#9C755F", "#BAB0AC",
];

/// Picks the colour for a new category given the colours already in use.
///
/// Returns the first palette entry not in `used`. Once every entry is taken the
/// palette is reused in order, keyed on how many colours are in use.
pub fn next_category_color<'a, I>(used: I) -> &'static str
where
    I: IntoIterator<Item = &'a str>,
{
    let used: Vec<&str> = used.into_iter().collect();
    CATEGORY_PALETTE
        .iter()
        .copied()
        .find(|candidate| !used.iter().any(|u| u.eq_ignore_ascii_case(candidate)))
        .unwrap_or(CATEGORY_PALETTE[used.len() % CATEGORY_PALETTE.len()])
}
