use flatwatch_core::Listing;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriceError {
    #[error("listing {link} has no comparable price ({raw:?})")]
    InvalidPrice { link: String, raw: String },
}

/// Inclusive rent bounds. With neither bound set every listing passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceFilter {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl PriceFilter {
    pub fn new(min: Option<u64>, max: Option<u64>) -> Self {
        Self { min, max }
    }

    pub fn is_active(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn admits(&self, amount: u64) -> bool {
        self.min.map_or(true, |min| amount >= min) && self.max.map_or(true, |max| amount <= max)
    }

    /// Strict form: the first listing whose price cannot be compared fails the whole batch.
    pub fn try_filter(&self, listings: Vec<Listing>) -> Result<Vec<Listing>, PriceError> {
        if !self.is_active() {
            return Ok(listings);
        }
        let mut kept = Vec::with_capacity(listings.len());
        for listing in listings {
            let amount = listing.price.comparable().ok_or_else(|| PriceError::InvalidPrice {
                link: listing.link.clone(),
                raw: listing.price.to_string(),
            })?;
            if self.admits(amount) {
                kept.push(listing);
            }
        }
        Ok(kept)
    }

    /// Lenient form used by the scheduler: uncomparable prices are dropped with a warning.
    pub fn filter(&self, listings: Vec<Listing>) -> Vec<Listing> {
        if !self.is_active() {
            return listings;
        }
        listings
            .into_iter()
            .filter(|listing| match listing.price.comparable() {
                Some(amount) => self.admits(amount),
                None => {
                    warn!(
                        link = %listing.link,
                        source = %listing.source.name,
                        price = %listing.price,
                        "excluding listing without a comparable price"
                    );
                    false
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatwatch_core::{Price, SourceIdentity};
    use std::sync::Arc;

    fn mk_listing(link: &str, price: Price) -> Listing {
        let source = Arc::new(SourceIdentity::new("test", 0, ""));
        Listing::new(source, link, "Byt", "Brno", price, None)
    }

    fn sample() -> Vec<Listing> {
        vec![
            mk_listing("a", Price::Amount(8_000)),
            mk_listing("b", Price::Amount(10_000)),
            mk_listing("c", Price::WithCharges { rent: 15_000, charges: 4_000 }),
            mk_listing("d", Price::Amount(20_000)),
            mk_listing("e", Price::Unparsed("Info v RK".into())),
        ]
    }

    fn links(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.link.as_str()).collect()
    }

    #[test]
    fn bounds_are_inclusive_and_order_is_kept() {
        let filter = PriceFilter::new(Some(10_000), Some(15_000));
        assert_eq!(links(&filter.filter(sample())), vec!["b", "c"]);
    }

    #[test]
    fn no_bounds_is_identity_even_for_unparsed_prices() {
        let filter = PriceFilter::default();
        assert_eq!(filter.filter(sample()).len(), 5);
        assert_eq!(filter.try_filter(sample()).unwrap().len(), 5);
    }

    #[test]
    fn filtering_is_idempotent() {
        let filter = PriceFilter::new(None, Some(15_000));
        let once = filter.filter(sample());
        let twice = filter.filter(once.clone());
        assert_eq!(once, twice);
        assert_eq!(links(&once), vec!["a", "b", "c"]);
    }

    #[test]
    fn strict_filter_reports_uncomparable_price() {
        let filter = PriceFilter::new(Some(1), None);
        assert_eq!(
            filter.try_filter(sample()),
            Err(PriceError::InvalidPrice {
                link: "e".into(),
                raw: "Info v RK".into(),
            })
        );
    }
}
