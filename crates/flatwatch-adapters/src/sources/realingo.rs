use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, Price, SourceIdentity};
use flatwatch_storage::HttpFetcher;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::{mapped_tokens, AdapterError, AdapterSettings, GraphQlResponse, SourceAdapter};

const GRAPHQL_URL: &str = "https://www.realingo.cz/graphql";
const SEARCH_QUERY: &str = include_str!("../../graphql/realingo.graphql");

pub struct Realingo {
    identity: Arc<SourceIdentity>,
    settings: AdapterSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    search_offer: SearchOffer,
}

#[derive(Debug, Deserialize)]
struct SearchOffer {
    items: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
struct Offer {
    url: String,
    category: String,
    area: OfferArea,
    location: OfferLocation,
    price: OfferPrice,
    photos: OfferPhotos,
}

#[derive(Debug, Deserialize)]
struct OfferArea {
    main: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct OfferLocation {
    address: String,
}

#[derive(Debug, Deserialize)]
struct OfferPrice {
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OfferPhotos {
    main: Option<String>,
}

impl Realingo {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            identity: Arc::new(SourceIdentity::new(
                "realingo",
                0x00BC78,
                "https://www.realingo.cz/_next/static/media/images/android-chrome-144x144-cf1233ce.png",
            )),
            settings,
        }
    }

    pub fn request_body(&self) -> JsonValue {
        json!({
            "query": SEARCH_QUERY,
            "operationName": "SearchOffer",
            "variables": {
                "purpose": "RENT",
                "property": "FLAT",
                "address": "Brno",
                "saved": false,
                "categories": self.category_tokens(self.settings.dispositions),
                "sort": "NEWEST",
                "first": 300,
                "skip": 0,
                "price": {
                    "from": self.settings.min_price,
                    "to": self.settings.max_price,
                },
            },
        })
    }

    pub fn parse(&self, body: &str) -> Result<Vec<Listing>, AdapterError> {
        let response: GraphQlResponse<SearchData> = serde_json::from_str(body)
            .map_err(|e| AdapterError::Parse(format!("realingo: {e}")))?;
        self.listings_from(response)
    }

    fn listings_from(&self, response: GraphQlResponse<SearchData>) -> Result<Vec<Listing>, AdapterError> {
        let base = Url::parse(GRAPHQL_URL).map_err(|e| AdapterError::Parse(e.to_string()))?;
        let data = response.into_data()?;

        data.search_offer
            .items
            .into_iter()
            .map(|offer| {
                let link = base
                    .join(&offer.url)
                    .map_err(|e| AdapterError::Parse(format!("realingo: bad link {}: {e}", offer.url)))?;
                let area = offer
                    .area
                    .main
                    .map(|a| format!(", {a} m²"))
                    .unwrap_or_default();
                let image_url = offer
                    .photos
                    .main
                    .filter(|path| !path.is_empty())
                    .and_then(|path| base.join(&format!("/static/images/{path}")).ok())
                    .map(|url| url.to_string());
                let price = match offer.price.total {
                    Some(total) => Price::Amount(total),
                    None => Price::Unparsed("Cena neuvedena".to_string()),
                };

                Ok(Listing::new(
                    Arc::clone(&self.identity),
                    link.to_string(),
                    format!("{}{area}", category_label(&offer.category)),
                    offer.location.address,
                    price,
                    image_url,
                ))
            })
            .collect()
    }
}

fn category_label(id: &str) -> &'static str {
    match id {
        "FLAT1_KK" => "Byt 1+kk",
        "FLAT11" => "Byt 1+1",
        "FLAT2_KK" => "Byt 2+kk",
        "FLAT21" => "Byt 2+1",
        "FLAT3_KK" => "Byt 3+kk",
        "FLAT31" => "Byt 3+1",
        "FLAT4_KK" => "Byt 4+kk",
        "FLAT41" => "Byt 4+1",
        "FLAT5_KK" => "Byt 5+kk",
        "FLAT51" => "Byt 5+1",
        "FLAT6_AND_MORE" => "Byt 6+kk a větší",
        "OTHERS_FLAT" => "Atypický",
        _ => "Byt",
    }
}

fn tokens_for(disposition: Disposition) -> &'static [&'static str] {
    match disposition {
        Disposition::Flat1kk => &["FLAT1_KK"],
        Disposition::Flat1 => &["FLAT11"],
        Disposition::Flat2kk => &["FLAT2_KK"],
        Disposition::Flat2 => &["FLAT21"],
        Disposition::Flat3kk => &["FLAT3_KK"],
        Disposition::Flat3 => &["FLAT31"],
        Disposition::Flat4kk => &["FLAT4_KK"],
        Disposition::Flat4 => &["FLAT41"],
        Disposition::Flat5Up => &["FLAT5_KK", "FLAT51", "FLAT6_AND_MORE"],
        Disposition::Others => &["OTHERS_FLAT"],
    }
}

#[async_trait]
impl SourceAdapter for Realingo {
    fn identity(&self) -> &Arc<SourceIdentity> {
        &self.identity
    }

    fn category_tokens(&self, dispositions: DispositionSet) -> Vec<String> {
        mapped_tokens(dispositions, tokens_for)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError> {
        let response: GraphQlResponse<SearchData> = http
            .post_json(self.name(), GRAPHQL_URL, &self.request_body())
            .await?;
        self.listings_from(response)
    }
}
