use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, Price, SourceIdentity};
use flatwatch_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::{mapped_tokens, AdapterError, AdapterSettings, SourceAdapter};

const SEARCH_URL: &str = "https://ud.api.ulovdomov.cz/v1/offer/find?page=1&perPage=20&sorting=latest";

pub struct UlovDomov {
    identity: Arc<SourceIdentity>,
    settings: AdapterSettings,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    data: FindData,
}

#[derive(Debug, Deserialize)]
struct FindData {
    offers: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Offer {
    absolute_url: String,
    disposition: String,
    area: JsonValue,
    village: Titled,
    street: Option<Titled>,
    village_part: Option<Titled>,
    rental_price: Option<Amount>,
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Titled {
    title: String,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    path: String,
}

impl UlovDomov {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            identity: Arc::new(SourceIdentity::new(
                "UlovDomov",
                0xFFFFFF,
                "https://www.ulovdomov.cz/favicon.png",
            )),
            settings,
        }
    }

    pub fn request_body(&self) -> JsonValue {
        let mut price = serde_json::Map::new();
        if let Some(min) = self.settings.min_price {
            price.insert("min".into(), json!(min));
        }
        if let Some(max) = self.settings.max_price {
            price.insert("max".into(), json!(max));
        }

        json!({
            "bounds": {
                "northEast": { "lat": 49.294485, "lng": 16.7278532 },
                "southWest": { "lat": 49.1096552, "lng": 16.4280678 },
            },
            "offerType": "rent",
            "propertyType": "flat",
            "disposition": self.category_tokens(self.settings.dispositions),
            "price": price,
        })
    }

    pub fn parse(&self, body: &str) -> Result<Vec<Listing>, AdapterError> {
        let response: FindResponse = serde_json::from_str(body)
            .map_err(|e| AdapterError::Parse(format!("UlovDomov: {e}")))?;
        Ok(self.listings_from(response))
    }

    fn listings_from(&self, response: FindResponse) -> Vec<Listing> {
        response
            .data
            .offers
            .into_iter()
            .map(|offer| {
                let mut location = offer.village.title;
                if let Some(street) = offer.street {
                    location = format!("{}, {location}", street.title);
                }
                if let Some(part) = offer.village_part {
                    location.push_str(" - ");
                    location.push_str(&part.title);
                }

                let price = match offer.rental_price.and_then(|p| p.value) {
                    Some(value) => Price::Amount(value),
                    None => Price::Unparsed("Cena neuvedena".to_string()),
                };

                Listing::new(
                    Arc::clone(&self.identity),
                    offer.absolute_url,
                    format!(
                        "Pronájem {} {} m²",
                        disposition_label(&offer.disposition),
                        offer.area
                    ),
                    location,
                    price,
                    offer.photos.into_iter().next().map(|p| p.path),
                )
            })
            .collect()
    }
}

fn disposition_label(id: &str) -> &'static str {
    match id {
        "onePlusKk" => "1+kk",
        "onePlusOne" => "1+1",
        "twoPlusKk" => "2+kk",
        "twoPlusOne" => "2+1",
        "threePlusKk" => "3+kk",
        "threePlusOne" => "3+1",
        "fourPlusKk" => "4+kk",
        "fourPlusOne" => "4+1",
        "fivePlusKk" => "5+kk",
        "fivePlusOne" => "5+1",
        "sixAndMore" => "6+",
        "atypical" => "Atypický",
        _ => "",
    }
}

fn tokens_for(disposition: Disposition) -> &'static [&'static str] {
    match disposition {
        Disposition::Flat1kk => &["onePlusKk"],
        Disposition::Flat1 => &["onePlusOne"],
        Disposition::Flat2kk => &["twoPlusKk"],
        Disposition::Flat2 => &["twoPlusOne"],
        Disposition::Flat3kk => &["threePlusKk"],
        Disposition::Flat3 => &["threePlusOne"],
        Disposition::Flat4kk => &["fourPlusKk"],
        Disposition::Flat4 => &["fourPlusOne"],
        Disposition::Flat5Up => &["fivePlusKk", "fivePlusOne", "sixAndMore"],
        Disposition::Others => &["atypical"],
    }
}

#[async_trait]
impl SourceAdapter for UlovDomov {
    fn identity(&self) -> &Arc<SourceIdentity> {
        &self.identity
    }

    fn category_tokens(&self, dispositions: DispositionSet) -> Vec<String> {
        mapped_tokens(dispositions, tokens_for)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError> {
        let response: FindResponse = http
            .post_json(self.name(), SEARCH_URL, &self.request_body())
            .await?;
        Ok(self.listings_from(response))
    }
}
