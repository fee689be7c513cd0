use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of rating states, including DEFAULT.
pub const NUM_RATINGS: usize = 18;

/// Rank of the absorbing DEFAULT state.
pub const DEFAULT_RANK: u8 = 18;

/// Zero-based index of the DEFAULT state in matrices and bucket arrays.
pub const DEFAULT_INDEX: usize = NUM_RATINGS - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    #[serde(rename = "AAA")]
    Aaa,
    #[serde(rename = "AA+")]
    AaPlus,
    #[serde(rename = "AA")]
    Aa,
    #[serde(rename = "AA-")]
    AaMinus,
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "BBB+")]
    BbbPlus,
    #[serde(rename = "BBB")]
    Bbb,
    #[serde(rename = "BBB-")]
    BbbMinus,
    #[serde(rename = "BB+")]
    BbPlus,
    #[serde(rename = "BB")]
    Bb,
    #[serde(rename = "BB-")]
    BbMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "CCC")]
    Ccc,
    #[serde(rename = "D")]
    Default,
}

impl Rating {
    /// All states, best to worst.
    pub const ALL: [Rating; NUM_RATINGS] = [
        Rating::Aaa,
        Rating::AaPlus,
        Rating::Aa,
        Rating::AaMinus,
        Rating::APlus,
        Rating::A,
        Rating::AMinus,
        Rating::BbbPlus,
        Rating::Bbb,
        Rating::BbbMinus,
        Rating::BbPlus,
        Rating::Bb,
        Rating::BbMinus,
        Rating::BPlus,
        Rating::B,
        Rating::BMinus,
        Rating::Ccc,
        Rating::Default,
    ];

    /// Rank on the 1..=18 scale (1 = AAA, 18 = D).
    pub fn rank(self) -> u8 {
        self.index() as u8 + 1
    }

    /// Zero-based position, used for matrix rows and bucket arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_rank(rank: u8) -> Option<Rating> {
        match rank {
            1..=DEFAULT_RANK => Some(Self::ALL[rank as usize - 1]),
            _ => None,
        }
    }

    pub fn from_index(index: usize) -> Option<Rating> {
        Self::ALL.get(index).copied()
    }

    /// Canonical symbol, e.g. "BBB-" or "D".
    pub fn symbol(self) -> &'static str {
        match self {
            Rating::Aaa => "AAA",
            Rating::AaPlus => "AA+",
            Rating::Aa => "AA",
            Rating::AaMinus => "AA-",
            Rating::APlus => "A+",
            Rating::A => "A",
            Rating::AMinus => "A-",
            Rating::BbbPlus => "BBB+",
            Rating::Bbb => "BBB",
            Rating::BbbMinus => "BBB-",
            Rating::BbPlus => "BB+",
            Rating::Bb => "BB",
            Rating::BbMinus => "BB-",
            Rating::BPlus => "B+",
            Rating::B => "B",
            Rating::BMinus => "B-",
            Rating::Ccc => "CCC",
            Rating::Default => "D",
        }
    }

    pub fn is_default(self) -> bool {
        self == Rating::Default
    }

    /// Strict parse. Returns `None` for anything outside the scale.
    pub fn parse(symbol: &str) -> Option<Rating> {
        let mut s = symbol.trim().to_ascii_uppercase();
        if let Some(stripped) = s.strip_suffix('*') {
            s = stripped.trim_end().to_string();
        }
        if let Some(stripped) = s.strip_suffix("(SF)") {
            s = stripped.trim_end().to_string();
        } else if let Some(stripped) = s.strip_suffix("SF") {
            s = stripped.trim_end().to_string();
        }

        let rating = match s.as_str() {
            "AAA" => Rating::Aaa,
            "AA+" => Rating::AaPlus,
            "AA" => Rating::Aa,
            "AA-" => Rating::AaMinus,
            "A+" => Rating::APlus,
            "A" => Rating::A,
            "A-" => Rating::AMinus,
            "BBB+" => Rating::BbbPlus,
            "BBB" => Rating::Bbb,
            "BBB-" => Rating::BbbMinus,
            "BB+" => Rating::BbPlus,
            "BB" => Rating::Bb,
            "BB-" => Rating::BbMinus,
            "B+" => Rating::BPlus,
            "B" => Rating::B,
            "B-" => Rating::BMinus,
            "CCC+" | "CCC" | "CCC-" | "CC" | "C" => Rating::Ccc,
            "D" | "SD" | "DEFAULT" => Rating::Default,
            _ => return None,
        };
        Some(rating)
    }

    /// Lenient parse used everywhere a pool supplies a rating.
    ///
    /// Missing, empty and unrecognised symbols resolve through
    /// [`unrecognised_rating`].
    pub fn from_symbol(symbol: Option<&str>) -> Rating {
        symbol
            .and_then(Rating::parse)
            .unwrap_or_else(|| unrecognised_rating(symbol))
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Rating assigned to a symbol the scale cannot place.
///
/// Absent or unreadable ratings are treated as already defaulted. This is a
/// conservative credit policy, not an error path.
pub fn unrecognised_rating(_symbol: Option<&str>) -> Rating {
    Rating::Default
}

/// Rank (1..=18) of a rating symbol. Unknown or empty symbols give 18.
pub fn rank_of(symbol: &str) -> u8 {
    Rating::from_symbol(Some(symbol)).rank()
}

/// Canonical symbol for a rank. Ranks outside 1..=18 give "D".
pub fn symbol_of(rank: u8) -> &'static str {
    Rating::from_rank(rank).unwrap_or(Rating::Default).symbol()
}

/// Direction of a single rating transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Migration {
    Upgrade,
    Downgrade,
    Unchanged,
}

impl Migration {
    pub fn classify(old: Rating, new: Rating) -> Migration {
        match new.rank().cmp(&old.rank()) {
            std::cmp::Ordering::Less => Migration::Upgrade,
            std::cmp::Ordering::Greater => Migration::Downgrade,
            std::cmp::Ordering::Equal => Migration::Unchanged,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
