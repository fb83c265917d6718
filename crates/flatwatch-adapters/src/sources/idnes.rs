use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, Price, SourceIdentity};
use flatwatch_storage::HttpFetcher;
use scraper::Html;
use tracing::debug;

use crate::{
    mapped_tokens, require, select_first_attr, select_first_text, selector, AdapterError,
    AdapterSettings, SourceAdapter,
};

const BASE_URL: &str = "https://reality.idnes.cz/s/pronajem/byty";
const AD_TILE_CLASS: &str = "c-products__item-advertisment";

pub struct IdnesReality {
    identity: Arc<SourceIdentity>,
    settings: AdapterSettings,
}

impl IdnesReality {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            identity: Arc::new(SourceIdentity::new(
                "iDNES Reality",
                0x1D80D7,
                "https://sta-reality2.1gr.cz/ui/image/favicons/favicon-32x32.png",
            )),
            settings,
        }
    }

    /// Price bounds are part of the path, categories are repeated query parameters.
    pub fn search_url(&self) -> String {
        let mut url = BASE_URL.to_string();
        match (self.settings.min_price, self.settings.max_price) {
            (Some(min), Some(max)) => url.push_str(&format!("/nad-{min}-do-{max}-za-mesic")),
            (Some(min), None) => url.push_str(&format!("/nad-{min}-za-mesic")),
            (None, Some(max)) => url.push_str(&format!("/do-{max}-za-mesic")),
            (None, None) => {}
        }
        url.push_str("/brno-mesto/?");
        url.push_str(&self.category_tokens(self.settings.dispositions).join("&"));
        url
    }

    pub fn parse(&self, html: &str) -> Result<Vec<Listing>, AdapterError> {
        let document = Html::parse_document(html);
        let items = selector("#snippet-s-result-articles div.c-products__item")?;

        let mut listings = Vec::new();
        for item in document.select(&items) {
            if item.value().classes().any(|c| c == AD_TILE_CLASS) {
                debug!("skipping advertisement tile");
                continue;
            }

            let link = require(
                select_first_attr(item, "a.c-products__link", "href")?,
                "link",
                "iDNES",
            )?;
            let title = require(
                select_first_text(item, "h2.c-products__title")?,
                "title",
                "iDNES",
            )?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
            let location = require(
                select_first_text(item, "p.c-products__info")?,
                "location",
                "iDNES",
            )?;
            let price = select_first_text(item, "p.c-products__price")?.unwrap_or_default();

            listings.push(Listing::new(
                Arc::clone(&self.identity),
                link,
                title,
                location,
                Price::from_digits(&price),
                select_first_attr(item, "img", "data-src")?,
            ));
        }
        Ok(listings)
    }
}

fn tokens_for(disposition: Disposition) -> &'static [&'static str] {
    match disposition {
        Disposition::Flat1kk => &["s-qc%5BsubtypeFlat%5D%5B%5D=1k"],
        Disposition::Flat1 => &["s-qc%5BsubtypeFlat%5D%5B%5D=11"],
        Disposition::Flat2kk => &["s-qc%5BsubtypeFlat%5D%5B%5D=2k"],
        Disposition::Flat2 => &["s-qc%5BsubtypeFlat%5D%5B%5D=21"],
        Disposition::Flat3kk => &["s-qc%5BsubtypeFlat%5D%5B%5D=3k"],
        Disposition::Flat3 => &["s-qc%5BsubtypeFlat%5D%5B%5D=31"],
        Disposition::Flat4kk => &["s-qc%5BsubtypeFlat%5D%5B%5D=4k"],
        Disposition::Flat4 => &["s-qc%5BsubtypeFlat%5D%5B%5D=41"],
        Disposition::Flat5Up => &[
            "s-qc%5BsubtypeFlat%5D%5B%5D=5k",
            "s-qc%5BsubtypeFlat%5D%5B%5D=51",
            "s-qc%5BsubtypeFlat%5D%5B%5D=6k",
        ],
        Disposition::Others => &["s-qc%5BsubtypeFlat%5D%5B%5D=atypical"],
    }
}

#[async_trait]
impl SourceAdapter for IdnesReality {
    fn identity(&self) -> &Arc<SourceIdentity> {
        &self.identity
    }

    fn category_tokens(&self, dispositions: DispositionSet) -> Vec<String> {
        mapped_tokens(dispositions, tokens_for)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError> {
        let html = http.get_text(self.name(), &self.search_url()).await?;
        self.parse(&html)
    }
}
