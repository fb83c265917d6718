use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, Price, SourceIdentity};
use flatwatch_storage::HttpFetcher;
use reqwest::Url;
use scraper::Html;
use serde_json::json;
use tracing::debug;

use crate::{
    mapped_tokens, require, select_first_attr, select_first_text, selector, AdapterError,
    AdapterSettings, SourceAdapter,
};

const SITE_URL: &str = "https://www.realcity.cz";
const SEARCH_URL: &str = "https://www.realcity.cz/pronajem-bytu/brno-mesto-68/";
const BRNO_LOCALITY_ID: u32 = 68;

pub struct Realcity {
    identity: Arc<SourceIdentity>,
    settings: AdapterSettings,
}

impl Realcity {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            identity: Arc::new(SourceIdentity::new(
                "REALCITY",
                0xB60D1C,
                "https://files.janchaloupka.cz/realcity.png",
            )),
            settings,
        }
    }

    /// The search filter travels as form-encoded JSON in the `sp` parameter.
    pub fn search_url(&self) -> Result<Url, AdapterError> {
        let filters = json!({
            "locality": [BRNO_LOCALITY_ID],
            "transactionTypes": ["rent"],
            "propertyTypes": [{
                "propertyType": "flat",
                "options": { "disposition": self.category_tokens(self.settings.dispositions) },
            }],
        });
        Url::parse_with_params(SEARCH_URL, &[("sp", filters.to_string())])
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }

    pub fn parse(&self, html: &str) -> Result<Vec<Listing>, AdapterError> {
        let document = Html::parse_document(html);
        let items = selector("#rc-advertise-result .media.advertise.item")?;
        let bodies = selector("div.media-body")?;

        let mut listings = Vec::new();
        for item in document.select(&items) {
            let body = require(item.select(&bodies).next(), "body", "REALCITY")?;
            let href = require(
                select_first_attr(body, "div.title a", "href")?,
                "link",
                "REALCITY",
            )?;
            let title = select_first_text(body, "div.title a")?
                .unwrap_or_else(|| "Chybí titulek".to_string());
            let location = select_first_text(body, "div.address")?
                .unwrap_or_else(|| "Chybí adresa".to_string());
            let price = select_first_text(body, "div.price")?.unwrap_or_default();
            let image_url = select_first_attr(item, "div.pull-left.image img", "src")?
                .map(|src| absolutize_protocol_relative(&src));

            listings.push(Listing::new(
                Arc::clone(&self.identity),
                format!("{SITE_URL}{href}"),
                title,
                location,
                Price::from_digits(&price),
                image_url,
            ));
        }
        debug!(count = listings.len(), "parsed REALCITY result page");
        Ok(listings)
    }
}

fn absolutize_protocol_relative(src: &str) -> String {
    if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src.to_string()
    }
}

fn tokens_for(disposition: Disposition) -> &'static [&'static str] {
    match disposition {
        Disposition::Flat1kk => &["1+kk"],
        Disposition::Flat1 => &["1+1"],
        Disposition::Flat2kk => &["2+kk"],
        Disposition::Flat2 => &["2+1"],
        Disposition::Flat3kk => &["3+kk"],
        Disposition::Flat3 => &["3+1"],
        Disposition::Flat4kk => &["4+kk"],
        Disposition::Flat4 => &["4+1", "4+2"],
        Disposition::Flat5Up => &["5+kk", "5+1", "5+2", "6+kk", "6+1", "disp_more"],
        Disposition::Others => &["atyp", "disp_nospec"],
    }
}

#[async_trait]
impl SourceAdapter for Realcity {
    fn identity(&self) -> &Arc<SourceIdentity> {
        &self.identity
    }

    fn category_tokens(&self, dispositions: DispositionSet) -> Vec<String> {
        mapped_tokens(dispositions, tokens_for)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError> {
        let url = self.search_url()?;
        let html = http.get_text(self.name(), url.as_str()).await?;
        self.parse(&html)
    }
}
