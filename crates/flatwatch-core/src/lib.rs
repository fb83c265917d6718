//! Core domain model for flatwatch: listings, prices, source identity and dispositions.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "flatwatch-core";

/// Flat-size category used to narrow adapter queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Flat1kk,
    Flat1,
    Flat2kk,
    Flat2,
    Flat3kk,
    Flat3,
    Flat4kk,
    Flat4,
    Flat5Up,
    Others,
}

impl Disposition {
    pub const ALL: [Disposition; 10] = [
        Disposition::Flat1kk,
        Disposition::Flat1,
        Disposition::Flat2kk,
        Disposition::Flat2,
        Disposition::Flat3kk,
        Disposition::Flat3,
        Disposition::Flat4kk,
        Disposition::Flat4,
        Disposition::Flat5Up,
        Disposition::Others,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Disposition::Flat1kk => "1+kk",
            Disposition::Flat1 => "1+1",
            Disposition::Flat2kk => "2+kk",
            Disposition::Flat2 => "2+1",
            Disposition::Flat3kk => "3+kk",
            Disposition::Flat3 => "3+1",
            Disposition::Flat4kk => "4+kk",
            Disposition::Flat4 => "4+1",
            Disposition::Flat5Up => "5++",
            Disposition::Others => "others",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispositionError {
    #[error("unknown disposition category: {0:?}")]
    UnknownCategory(String),
}

impl FromStr for Disposition {
    type Err = DispositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Disposition::ALL
            .into_iter()
            .find(|d| d.token().eq_ignore_ascii_case(token))
            .ok_or_else(|| DispositionError::UnknownCategory(token.to_string()))
    }
}

/// Bitset of dispositions. The empty set means no category filter is applied upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DispositionSet(u16);

impl DispositionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Disposition::ALL.into_iter().collect()
    }

    /// Parse a sequence of category tokens such as `["2+kk", "3+1"]`.
    ///
    /// Tokens are trimmed and blank tokens are skipped.
    pub fn parse<I, S>(tokens: I) -> Result<Self, DispositionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            set.insert(token.parse()?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, disposition: Disposition) {
        self.0 |= disposition.bit();
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, disposition: Disposition) -> bool {
        self.0 & disposition.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Disposition> {
        Disposition::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl std::ops::BitOr for DispositionSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl From<Disposition> for DispositionSet {
    fn from(disposition: Disposition) -> Self {
        Self(disposition.bit())
    }
}

impl FromIterator<Disposition> for DispositionSet {
    fn from_iter<T: IntoIterator<Item = Disposition>>(iter: T) -> Self {
        let mut set = Self::empty();
        for d in iter {
            set.insert(d);
        }
        set
    }
}

impl FromStr for DispositionSet {
    type Err = DispositionError;

    /// Comma-separated form, e.g. `2+kk,2+1,others`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.split(','))
    }
}

impl fmt::Display for DispositionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self.iter().map(Disposition::token).collect::<Vec<_>>();
        f.write_str(&tokens.join(","))
    }
}

/// Monthly rent as normalized by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Price {
    Amount(u64),
    /// Rent plus separately listed service charges.
    WithCharges { rent: u64, charges: u64 },
    /// The source text did not contain a readable number.
    Unparsed(String),
}

impl Price {
    /// Reads the digits out of text like `"12 500 Kč"`; falls back to `Unparsed`.
    pub fn from_digits(text: &str) -> Self {
        let digits = text.chars().filter(char::is_ascii_digit).collect::<String>();
        match digits.parse() {
            Ok(amount) => Price::Amount(amount),
            Err(_) => Price::Unparsed(text.trim().to_string()),
        }
    }

    /// Value used for numeric range checks. Charges are not included.
    pub fn comparable(&self) -> Option<u64> {
        match self {
            Price::Amount(amount) => Some(*amount),
            Price::WithCharges { rent, .. } => Some(*rent),
            Price::Unparsed(_) => None,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Amount(amount) => write!(f, "{} Kč", group_thousands(*amount)),
            Price::WithCharges { rent, charges } => write!(
                f,
                "{} / {} Kč",
                group_thousands(*rent),
                group_thousands(*charges)
            ),
            Price::Unparsed(text) => f.write_str(text),
        }
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Display metadata for a listing source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub name: String,
    pub brand_color: u32,
    pub logo_url: String,
}

impl SourceIdentity {
    pub fn new(name: impl Into<String>, brand_color: u32, logo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brand_color,
            logo_url: logo_url.into(),
        }
    }
}

/// One rental offer as normalized by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub link: String,
    pub title: String,
    pub location: String,
    pub price: Price,
    pub image_url: Option<String>,
    pub source: Arc<SourceIdentity>,
    /// Near-duplicates absorbed into this listing. Only the deduplicator fills this.
    pub duplicates: Vec<Listing>,
}

impl Listing {
    pub fn new(
        source: Arc<SourceIdentity>,
        link: impl Into<String>,
        title: impl Into<String>,
        location: impl Into<String>,
        price: Price,
        image_url: Option<String>,
    ) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            location: location.into(),
            price,
            image_url: image_url.filter(|url| !url.trim().is_empty()),
            source,
            duplicates: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_dispositions() {
        let set: DispositionSet = "2+kk, 2+1,5++".parse().unwrap();
        assert!(set.contains(Disposition::Flat2kk));
        assert!(set.contains(Disposition::Flat2));
        assert!(set.contains(Disposition::Flat5Up));
        assert!(!set.contains(Disposition::Flat1kk));
        assert_eq!(set.to_string(), "2+kk,2+1,5++");
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = DispositionSet::parse(["1+kk", "7+7"]).unwrap_err();
        assert_eq!(err, DispositionError::UnknownCategory("7+7".to_string()));
    }

    #[test]
    fn empty_input_yields_empty_set() {
        let set: DispositionSet = "".parse().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    fn union_combines_members() {
        let a = DispositionSet::from(Disposition::Flat1);
        let b = DispositionSet::from(Disposition::Others);
        let both = a | b;
        assert!(both.contains(Disposition::Flat1));
        assert!(both.contains(Disposition::Others));
        assert_eq!(a.union(b), both);
        assert_eq!(DispositionSet::all().iter().count(), 10);
    }

    #[test]
    fn price_reads_digits_and_formats_with_spaces() {
        assert_eq!(Price::from_digits("12 500 Kč/měsíc"), Price::Amount(12_500));
        assert_eq!(
            Price::from_digits("Cena na dotaz"),
            Price::Unparsed("Cena na dotaz".to_string())
        );
        assert_eq!(Price::Amount(1_234_567).to_string(), "1 234 567 Kč");
        assert_eq!(
            Price::WithCharges { rent: 15_000, charges: 3_500 }.to_string(),
            "15 000 / 3 500 Kč"
        );
    }

    #[test]
    fn comparable_price_ignores_charges() {
        assert_eq!(Price::WithCharges { rent: 900, charges: 100 }.comparable(), Some(900));
        assert_eq!(Price::Unparsed("?".into()).comparable(), None);
    }

    #[test]
    fn blank_image_url_is_dropped() {
        let source = Arc::new(SourceIdentity::new("test", 0, ""));
        let listing = Listing::new(source, "https://a", "t", "l", Price::Amount(1), Some("  ".into()));
        assert_eq!(listing.image_url, None);
        assert!(listing.duplicates.is_empty());
    }
}
