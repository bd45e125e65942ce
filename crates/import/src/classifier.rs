//! Fallback categorization for expenses no rule matched.
//!
//! A fixed keyword table maps well-known merchants onto category names, which
//! are then resolved against the user's own categories. Weaker amount and
//! word-overlap heuristics run only when the table has nothing to say.

use serde::Serialize;
use tally_core::{normalize, CategoryId, ExpenseCategory, Money};

use crate::util::similarity;

/// Minimum similarity for two category names to count as the same.
pub const NAME_SIMILARITY_THRESHOLD: f64 = 0.85;

struct KeywordEntry {
    category: &'static str,
    aliases: &'static [&'static str],
    keywords: &'static [&'static str],
    confidence: f32,
}

// Order matters: the first entry with any hit wins.
static KEYWORD_TABLE: &[KeywordEntry] = &[
    KeywordEntry {
        category: "Groceries",
        aliases: &["Grocery", "Supermarkets"],
        keywords: &[
            "WHOLE FOODS", "TRADER JOE", "SAFEWAY", "KROGER", "ALDI", "PUBLIX", "WEGMANS",
            "COSTCO", "GROCERY", "SPROUTS", "MARKET BASKET",
        ],
        confidence: 0.85,
    },
    KeywordEntry {
        category: "Dining",
        aliases: &["Restaurants", "Restaurant", "Food & Drink", "Food"],
        keywords: &[
            "UBER EATS", "DOORDASH", "GRUBHUB", "STARBUCKS", "CHIPOTLE", "MCDONALD",
            "RESTAURANT", "CAFE", "COFFEE", "PIZZA", "BURGER", "SUSHI", "TAQUERIA", "BAKERY",
        ],
        confidence: 0.8,
    },
    KeywordEntry {
        category: "Transportation",
        aliases: &["Transport", "Auto & Transport", "Gas", "Gas & Fuel"],
        keywords: &[
            "UBER", "LYFT", "SHELL", "CHEVRON", "EXXON", "PARKING", "TRANSIT", "METRO", "TOLL",
        ],
        confidence: 0.75,
    },
    KeywordEntry {
        category: "Subscriptions",
        aliases: &["Subscription", "Software", "Streaming"],
        keywords: &[
            "NETFLIX", "SPOTIFY", "HULU", "YOUTUBE", "APPLE.COM/BILL", "ICLOUD", "GITHUB",
            "OPENAI", "DISNEY PLUS",
        ],
        confidence: 0.85,
    },
    KeywordEntry {
        category: "Utilities",
        aliases: &["Utility", "Bills & Utilities", "Bills"],
        keywords: &[
            "COMCAST", "XFINITY", "VERIZON", "T-MOBILE", "AT&T", "ELECTRIC", "PG&E", "WATER",
            "INTERNET",
        ],
        confidence: 0.8,
    },
    KeywordEntry {
        category: "Shopping",
        aliases: &["Shops", "General Merchandise", "Merchandise"],
        keywords: &["AMAZON", "AMZN", "TARGET", "WALMART", "BEST BUY", "EBAY", "ETSY", "IKEA"],
        confidence: 0.7,
    },
    KeywordEntry {
        category: "Health",
        aliases: &["Medical", "Healthcare", "Health & Wellness", "Pharmacy"],
        keywords: &["CVS", "WALGREENS", "PHARMACY", "DENTAL", "CLINIC", "HOSPITAL", "RITE AID"],
        confidence: 0.75,
    },
    KeywordEntry {
        category: "Fitness",
        aliases: &["Gym", "Fitness & Gym"],
        keywords: &["PLANET FITNESS", "EQUINOX", "PELOTON", "GYM", "YOGA", "CROSSFIT"],
        confidence: 0.75,
    },
    KeywordEntry {
        category: "Travel",
        aliases: &["Travel & Vacation", "Vacation", "Airfare", "Hotels"],
        keywords: &[
            "AIRLINES", "DELTA AIR", "UNITED AIR", "SOUTHWEST", "AIRBNB", "MARRIOTT", "HILTON",
            "HOTEL", "EXPEDIA",
        ],
        confidence: 0.75,
    },
    KeywordEntry {
        category: "Housing",
        aliases: &["Rent", "Mortgage", "Home", "Rent & Mortgage"],
        keywords: &["RENT", "LEASE", "APARTMENT", "LANDLORD", "PROPERTY MGMT", "MORTGAGE"],
        confidence: 0.7,
    },
    KeywordEntry {
        category: "Insurance",
        aliases: &["Insurance Premiums"],
        keywords: &["INSURANCE", "GEICO", "STATE FARM", "PROGRESSIVE", "ALLSTATE"],
        confidence: 0.8,
    },
    KeywordEntry {
        category: "Fees",
        aliases: &["Bank Fees", "Fees & Charges", "Service Charges"],
        keywords: &["FEE", "OVERDRAFT", "SERVICE CHARGE", "INTEREST CHARGE", "ATM"],
        confidence: 0.7,
    },
];

const SMALL_AMOUNT_CENTS: i64 = 500;
const LARGE_AMOUNT_CENTS: i64 = 100_000;
const SMALL_AMOUNT_NAMES: &[&str] = &["fee", "misc"];
const LARGE_AMOUNT_NAMES: &[&str] = &["rent", "insurance", "mortgage"];
const MIN_TOKEN_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CategoryProposal {
    Existing { id: CategoryId, name: String },
    /// No equivalent category exists yet; create it on commit.
    New { name: String },
}

impl CategoryProposal {
    pub fn name(&self) -> &str {
        match self {
            CategoryProposal::Existing { name, .. } | CategoryProposal::New { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub proposal: CategoryProposal,
    pub confidence: f32,
    pub reason: String,
}

pub struct HeuristicClassifier<'a> {
    categories: Vec<&'a ExpenseCategory>,
}

impl<'a> HeuristicClassifier<'a> {
    /// Sentinel categories and unsaved categories are never candidates.
    pub fn new(categories: &'a [ExpenseCategory]) -> Self {
        Self {
            categories: categories
                .iter()
                .filter(|c| c.id.is_some() && !c.is_sentinel())
                .collect(),
        }
    }

    pub fn classify(
        &self,
        merchant: Option<&str>,
        description: &str,
        amount: Money,
    ) -> Option<Classification> {
        let haystack = tokens(&format!("{} {}", merchant.unwrap_or_default(), description));

        if let Some((entry, keyword)) = find_keyword(&haystack) {
            let proposal = match self.find_equivalent(entry.category, entry.aliases) {
                Some(existing) => existing,
                None => CategoryProposal::New {
                    name: entry.category.to_string(),
                },
            };
            return Some(Classification {
                proposal,
                confidence: entry.confidence,
                reason: format!("keyword '{keyword}'"),
            });
        }

        let cents = amount.abs().to_cents();
        if cents <= SMALL_AMOUNT_CENTS {
            if let Some(c) = self.find_containing(SMALL_AMOUNT_NAMES) {
                return Some(existing(c, 0.4, "small amount".to_string()));
            }
        }
        if cents >= LARGE_AMOUNT_CENTS {
            if let Some(c) = self.find_containing(LARGE_AMOUNT_NAMES) {
                return Some(existing(c, 0.4, "large recurring amount".to_string()));
            }
        }

        let words = tokens(merchant.unwrap_or(description));
        self.find_token_overlap(&words)
            .map(|(c, word)| existing(c, 0.5, format!("merchant word '{word}'")))
    }

    /// Maps a bank-supplied category label onto one of the user's categories.
    pub fn resolve_hint(&self, raw_category: &str) -> Option<CategoryProposal> {
        if raw_category.trim().is_empty() || tally_core::is_sentinel_name(raw_category) {
            return None;
        }
        if let Some(found) = self.find_equivalent(raw_category, &[]) {
            return Some(found);
        }
        // Bank labels like "Food & Drink" resolve through the table's aliases.
        KEYWORD_TABLE
            .iter()
            .find(|e| {
                names_equivalent(e.category, raw_category)
                    || e.aliases.iter().any(|a| names_equivalent(a, raw_category))
            })
            .and_then(|e| self.find_equivalent(e.category, e.aliases))
    }

    /// An existing category whose name is `name`, one of `aliases`, or close enough.
    pub fn find_equivalent(&self, name: &str, aliases: &[&str]) -> Option<CategoryProposal> {
        let wanted: Vec<String> = std::iter::once(name)
            .chain(aliases.iter().copied())
            .map(comparable)
            .filter(|s| !s.is_empty())
            .collect();
        if wanted.is_empty() {
            return None;
        }

        let exact = self
            .categories
            .iter()
            .find(|c| wanted.contains(&comparable(&c.name)));
        if let Some(c) = exact {
            return to_existing(c);
        }

        self.categories
            .iter()
            .filter_map(|c| {
                let have = comparable(&c.name);
                let best = wanted
                    .iter()
                    .map(|w| similarity(w, &have))
                    .fold(0.0_f64, f64::max);
                (best >= NAME_SIMILARITY_THRESHOLD).then_some((c, best))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .and_then(|(c, _)| to_existing(c))
    }

    fn find_containing(&self, needles: &[&str]) -> Option<&'a ExpenseCategory> {
        self.categories.iter().copied().find(|c| {
            let name = c.name.to_lowercase();
            needles.iter().any(|n| name.contains(n))
        })
    }

    fn find_token_overlap(&self, words: &[String]) -> Option<(&'a ExpenseCategory, String)> {
        let words: Vec<&String> = words.iter().filter(|w| w.len() >= MIN_TOKEN_LEN).collect();
        for c in self.categories.iter().copied() {
            for name_word in tokens(&c.name).into_iter().filter(|w| w.len() >= MIN_TOKEN_LEN) {
                if let Some(word) = words
                    .iter()
                    .find(|w| w.starts_with(name_word.as_str()) || name_word.starts_with(w.as_str()))
                {
                    return Some((c, word.to_string()));
                }
            }
        }
        None
    }
}

fn existing(c: &ExpenseCategory, confidence: f32, reason: String) -> Classification {
    Classification {
        proposal: CategoryProposal::Existing {
            id: c.id.unwrap_or(CategoryId(0)),
            name: c.name.clone(),
        },
        confidence,
        reason,
    }
}

fn to_existing(c: &ExpenseCategory) -> Option<CategoryProposal> {
    c.id.map(|id| CategoryProposal::Existing {
        id,
        name: c.name.clone(),
    })
}

fn find_keyword(haystack: &[String]) -> Option<(&'static KeywordEntry, &'static str)> {
    KEYWORD_TABLE.iter().find_map(|entry| {
        entry
            .keywords
            .iter()
            .copied()
            .find(|kw| keyword_hits(haystack, kw))
            .map(|kw| (entry, kw))
    })
}

/// Single-word keywords match a whole word, or a word prefix once the keyword
/// is at least five characters. Phrases match a run of consecutive words.
fn keyword_hits(haystack: &[String], keyword: &str) -> bool {
    let needle = tokens(keyword);
    match needle.as_slice() {
        [] => false,
        [single] => haystack
            .iter()
            .any(|w| w == single || (single.len() >= 5 && w.starts_with(single.as_str()))),
        phrase => haystack.windows(phrase.len()).any(|window| window == phrase),
    }
}

/// Uppercased alphanumeric words.
fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased name with punctuation and whitespace removed.
fn comparable(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn names_equivalent(a: &str, b: &str) -> bool {
    let (a, b) = (comparable(a), comparable(b));
    !a.is_empty() && !b.is_empty() && (a == b || similarity(&a, &b) >= NAME_SIMILARITY_THRESHOLD)
}
