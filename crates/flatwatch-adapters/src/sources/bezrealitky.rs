use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, Price, SourceIdentity};
use flatwatch_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::{mapped_tokens, AdapterError, AdapterSettings, GraphQlResponse, SourceAdapter};

const SITE_URL: &str = "https://www.bezrealitky.cz";
const OFFERS_ROUTE: &str = "nemovitosti-byty-domy/";
const GRAPHQL_URL: &str = "https://api.bezrealitky.cz/graphql/";
const ADVERT_LIST_QUERY: &str = include_str!("../../graphql/bezrealitky.graphql");
const BRNO_OSM_ID: &str = "R438171";

pub struct BezRealitky {
    identity: Arc<SourceIdentity>,
    settings: AdapterSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvertListData {
    list_adverts: AdvertList,
}

#[derive(Debug, Deserialize)]
struct AdvertList {
    list: Vec<Advert>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Advert {
    uri: String,
    image_alt_text: String,
    address: String,
    price: Option<u64>,
    charges: Option<u64>,
    main_image: Option<AdvertImage>,
}

#[derive(Debug, Deserialize)]
struct AdvertImage {
    url: Option<String>,
}

impl BezRealitky {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            identity: Arc::new(SourceIdentity::new(
                "BezRealitky",
                0x00CC00,
                "https://www.bezrealitky.cz/manifest-icon-192.maskable.png",
            )),
            settings,
        }
    }

    pub fn request_body(&self) -> JsonValue {
        let mut variables = json!({
            "limit": 15,
            "offset": 0,
            "order": "TIMEORDER_DESC",
            "locale": "CS",
            "offerType": "PRONAJEM",
            "estateType": "BYT",
            "disposition": self.category_tokens(self.settings.dispositions),
            "regionOsmIds": [BRNO_OSM_ID],
        });
        if let Some(min) = self.settings.min_price {
            variables["priceFrom"] = json!(min);
        }
        if let Some(max) = self.settings.max_price {
            variables["priceTo"] = json!(max);
        }

        json!({
            "operationName": "AdvertList",
            "query": ADVERT_LIST_QUERY,
            "variables": variables,
        })
    }

    pub fn parse(&self, body: &str) -> Result<Vec<Listing>, AdapterError> {
        let response: GraphQlResponse<AdvertListData> = serde_json::from_str(body)
            .map_err(|e| AdapterError::Parse(format!("BezRealitky: {e}")))?;
        self.listings_from(response)
    }

    fn listings_from(
        &self,
        response: GraphQlResponse<AdvertListData>,
    ) -> Result<Vec<Listing>, AdapterError> {
        let data = response.into_data()?;
        Ok(data
            .list_adverts
            .list
            .into_iter()
            .map(|advert| {
                Listing::new(
                    Arc::clone(&self.identity),
                    format!("{SITE_URL}/{OFFERS_ROUTE}{}", advert.uri),
                    advert.image_alt_text,
                    advert.address,
                    advert_price(advert.price, advert.charges),
                    advert.main_image.and_then(|image| image.url),
                )
            })
            .collect())
    }
}

/// Rent and service charges are listed separately; both are kept.
fn advert_price(price: Option<u64>, charges: Option<u64>) -> Price {
    match (price, charges) {
        (Some(rent), Some(charges)) => Price::WithCharges { rent, charges },
        (Some(rent), None) => Price::Amount(rent),
        (None, _) => Price::Unparsed("Cena neuvedena".to_string()),
    }
}

fn tokens_for(disposition: Disposition) -> &'static [&'static str] {
    match disposition {
        Disposition::Flat1kk => &["DISP_1_KK"],
        Disposition::Flat1 => &["DISP_1_1"],
        Disposition::Flat2kk => &["DISP_2_KK"],
        Disposition::Flat2 => &["DISP_2_1"],
        Disposition::Flat3kk => &["DISP_3_KK"],
        Disposition::Flat3 => &["DISP_3_1"],
        Disposition::Flat4kk => &["DISP_4_KK"],
        Disposition::Flat4 => &["DISP_4_1"],
        Disposition::Flat5Up | Disposition::Others => &[],
    }
}

#[async_trait]
impl SourceAdapter for BezRealitky {
    fn identity(&self) -> &Arc<SourceIdentity> {
        &self.identity
    }

    fn category_tokens(&self, dispositions: DispositionSet) -> Vec<String> {
        mapped_tokens(dispositions, tokens_for)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError> {
        let response: GraphQlResponse<AdvertListData> = http
            .post_json(self.name(), GRAPHQL_URL, &self.request_body())
            .await?;
        self.listings_from(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
      "data": {
        "listAdverts": {
          "list": [
            {
              "uri": "812345-nabidka-pronajem-bytu-brno",
              "imageAltText": "Pronájem bytu 2+1 60 m², Cejl, Brno",
              "address": "Cejl, Brno - Zábrdovice",
              "price": 15000,
              "charges": 3500,
              "mainImage": { "url": "https://api.bezrealitky.cz/media/1.jpg" }
            },
            {
              "uri": "812346-nabidka",
              "imageAltText": "Pronájem bytu 1+kk",
              "address": "Brno",
              "price": 9800,
              "charges": null,
              "mainImage": null
            }
          ]
        }
      }
    }"#;

    #[test]
    fn composite_price_is_normalized() {
        let adapter = BezRealitky::new(AdapterSettings::default());
        let listings = adapter.parse(BODY).unwrap();
        assert_eq!(listings.len(), 2);

        assert_eq!(
            listings[0].link,
            "https://www.bezrealitky.cz/nemovitosti-byty-domy/812345-nabidka-pronajem-bytu-brno"
        );
        assert_eq!(
            listings[0].price,
            Price::WithCharges { rent: 15_000, charges: 3_500 }
        );
        assert_eq!(listings[0].price.comparable(), Some(15_000));
        assert_eq!(listings[0].price.to_string(), "15 000 / 3 500 Kč");

        assert_eq!(listings[1].price, Price::Amount(9_800));
        assert_eq!(listings[1].image_url, None);
    }

    #[test]
    fn request_body_only_sets_configured_bounds() {
        let adapter = BezRealitky::new(AdapterSettings {
            dispositions: "2+kk,5++".parse().unwrap(),
            min_price: Some(8_000),
            max_price: None,
        });
        let body = adapter.request_body();
        let variables = &body["variables"];
        assert_eq!(variables["priceFrom"], 8000);
        assert!(variables.get("priceTo").is_none());
        assert_eq!(variables["disposition"], json!(["DISP_2_KK"]));
        assert_eq!(variables["regionOsmIds"], json!(["R438171"]));
    }
}
