use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, Price, SourceIdentity};
use flatwatch_storage::HttpFetcher;
use reqwest::Url;
use scraper::Html;

use crate::{
    mapped_tokens, require, select_first_attr, select_first_text, selector, AdapterError,
    AdapterSettings, SourceAdapter,
};

const BASE_URL: &str = "https://www.bravis.cz/pronajem-bytu";
const SEARCH_SUFFIX: &str =
    "typ-nabidky=pronajem-bytu&lokalita=cele-brno&vybavenost=nezalezi&q=&action=search&s=1-20-order-0";

pub struct Bravis {
    identity: Arc<SourceIdentity>,
    settings: AdapterSettings,
}

impl Bravis {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            identity: Arc::new(SourceIdentity::new(
                "BRAVIS",
                0xCE0020,
                "https://www.bravis.cz/content/img/logo-small.png",
            )),
            settings,
        }
    }

    pub fn search_url(&self) -> String {
        let mut url = format!("{BASE_URL}?");
        for token in self.category_tokens(self.settings.dispositions) {
            url.push_str(&token);
            url.push('&');
        }
        url.push_str(SEARCH_SUFFIX);
        url
    }

    pub fn parse(&self, html: &str) -> Result<Vec<Listing>, AdapterError> {
        let base = Url::parse(BASE_URL).map_err(|e| AdapterError::Parse(e.to_string()))?;
        let document = Html::parse_document(html);
        let items = selector("#search > .in > content > .itemslist .item > a")?;
        let params_sel = selector(".params li")?;
        let price_sel = selector(".price")?;

        let mut listings = Vec::new();
        for item in document.select(&items) {
            let href = require(item.value().attr("href"), "link", "BRAVIS")?;
            let link = base
                .join(href)
                .map_err(|e| AdapterError::Parse(format!("BRAVIS: bad link {href}: {e}")))?;

            let params = item
                .select(&params_sel)
                .map(|li| li.text().collect::<String>().trim().to_string())
                .collect::<Vec<_>>();
            let [kind, area, ..] = params.as_slice() else {
                return Err(AdapterError::Parse(format!(
                    "BRAVIS: expected at least two params for {link}"
                )));
            };

            let location = require(select_first_text(item, ".location")?, "location", "BRAVIS")?;
            let price_el = require(item.select(&price_sel).next(), "price", "BRAVIS")?;
            let price_text = price_el
                .text()
                .map(str::trim)
                .find(|s| !s.is_empty())
                .unwrap_or_default();

            listings.push(Listing::new(
                Arc::clone(&self.identity),
                link.to_string(),
                format!("Pronájem {kind}, {area}"),
                location,
                Price::from_digits(price_text),
                select_first_attr(item, "picture > img", "src")?,
            ));
        }
        Ok(listings)
    }
}

fn tokens_for(disposition: Disposition) -> &'static [&'static str] {
    match disposition {
        Disposition::Flat1kk | Disposition::Flat1 => &["typ-nemovitosti-byt+1="],
        Disposition::Flat2kk | Disposition::Flat2 => &["typ-nemovitosti-byt+2="],
        Disposition::Flat3kk | Disposition::Flat3 => &["typ-nemovitosti-byt+3="],
        Disposition::Flat4kk | Disposition::Flat4 => &["typ-nemovitosti-byt+4="],
        Disposition::Flat5Up => &["typ-nemovitosti-byt+5="],
        Disposition::Others => &[],
    }
}

#[async_trait]
impl SourceAdapter for Bravis {
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
