//! PostgREST (Supabase REST) implementation of [`RecordStore`].

use super::{
    CardEntity, CardId, CardPriceSummary, CardQuery, CardWithPrice, PriceEntryRecord, RecordStore,
};
use crate::config::StoreCredentials;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const CARDS: &str = "cards";
const PRICE_ENTRIES: &str = "price_entries";
const CARD_PRICES: &str = "card_prices";
const CARDS_WITH_PRICES: &str = "cards_with_prices";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the `/rest/v1` interface of a Supabase project.
#[derive(Clone)]
pub struct PostgrestStore {
    client: reqwest::Client,
    base: Url,
    key: String,
}

impl PostgrestStore {
    /// Client with a 30 second request timeout.
    pub fn new(credentials: &StoreCredentials) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Self::with_client(client, credentials)
    }

    /// Use an existing HTTP client.
    pub fn with_client(client: reqwest::Client, credentials: &StoreCredentials) -> StoreResult<Self> {
        let base = Url::parse(&format!(
            "{}/rest/v1/",
            credentials.url.trim_end_matches('/')
        ))?;
        Ok(Self {
            client,
            base,
            key: credentials.key.clone(),
        })
    }

    fn url(&self, table: &str) -> StoreResult<Url> {
        Ok(self.base.join(table)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Content-Type", "application/json")
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: Url, table: &'static str) -> StoreResult<Vec<T>> {
        debug!(%url, "store select");
        let resp = self.request(Method::GET, url).send().await?;
        let resp = check(resp, "select", table).await?;
        Ok(resp.json().await?)
    }
}

/// Turn a non-2xx response into [`StoreError::Status`].
async fn check(resp: Response, operation: &'static str, table: &'static str) -> StoreResult<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status {
        operation,
        table,
        status,
        body,
    })
}

#[async_trait]
impl RecordStore for PostgrestStore {
    async fn find_card(&self, name: &str) -> StoreResult<Option<CardEntity>> {
        let mut url = self.url(CARDS)?;
        url.query_pairs_mut()
            .append_pair("name", &format!("eq.{name}"))
            .append_pair("select", "id,name,created_at")
            .append_pair("limit", "1");
        let rows: Vec<CardEntity> = self.fetch_rows(url, CARDS).await?;
        Ok(rows.into_iter().next())
    }

    async fn create_card(&self, name: &str) -> StoreResult<Option<CardEntity>> {
        let mut url = self.url(CARDS)?;
        url.query_pairs_mut().append_pair("on_conflict", "name");
        let resp = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation,resolution=ignore-duplicates")
            .json(&[serde_json::json!({ "name": name })])
            .send()
            .await?;
        let resp = check(resp, "insert", CARDS).await?;
        let rows: Vec<CardEntity> = resp.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_price_entries(&self, entries: &[PriceEntryRecord]) -> StoreResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let resp = self
            .request(Method::POST, self.url(PRICE_ENTRIES)?)
            .header("Prefer", "return=minimal")
            .json(entries)
            .send()
            .await?;
        check(resp, "insert", PRICE_ENTRIES).await?;
        Ok(entries.len())
    }

    async fn find_summary(&self, card_id: CardId) -> StoreResult<Option<CardPriceSummary>> {
        let mut url = self.url(CARD_PRICES)?;
        url.query_pairs_mut()
            .append_pair("card_id", &format!("eq.{card_id}"))
            .append_pair("select", "*")
            .append_pair("limit", "1");
        let rows: Vec<CardPriceSummary> = self.fetch_rows(url, CARD_PRICES).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_summary(&self, summary: &CardPriceSummary) -> StoreResult<()> {
        let resp = self
            .request(Method::POST, self.url(CARD_PRICES)?)
            .header("Prefer", "return=minimal")
            .json(summary)
            .send()
            .await?;
        check(resp, "insert", CARD_PRICES).await?;
        Ok(())
    }

    async fn update_summary(&self, summary: &CardPriceSummary) -> StoreResult<()> {
        let mut url = self.url(CARD_PRICES)?;
        url.query_pairs_mut()
            .append_pair("card_id", &format!("eq.{}", summary.card_id));
        let resp = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(summary)
            .send()
            .await?;
        check(resp, "update", CARD_PRICES).await?;
        Ok(())
    }

    async fn cards_with_prices(&self, query: &CardQuery) -> StoreResult<Vec<CardWithPrice>> {
        let mut url = self.url(CARDS_WITH_PRICES)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(
                "select",
                "id,name,created_at,latest_price,last_price_update,price_count",
            );
            if let Some(needle) = &query.name_contains {
                pairs.append_pair("name", &format!("ilike.*{needle}*"));
            }
            if query.only_priced {
                pairs.append_pair("latest_price", "gt.0");
            }
            if let Some(min) = query.min_price {
                pairs.append_pair("latest_price", &format!("gte.{min}"));
            }
            if let Some(max) = query.max_price {
                pairs.append_pair("latest_price", &format!("lte.{max}"));
            }
            let direction = if query.descending { "desc" } else { "asc" };
            pairs.append_pair(
                "order",
                &format!("{}.{direction}.nullslast", query.order_by.column()),
            );
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        self.fetch_rows(url, CARDS_WITH_PRICES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CardOrder;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> PostgrestStore {
        PostgrestStore::new(&StoreCredentials {
            url: server.uri(),
            key: "service-key".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_find_card_sends_auth_and_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/cards"))
            .and(query_param("name", "eq.Charizard PSA 10"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 7, "name": "Charizard PSA 10", "created_at": "2024-01-01T00:00:00+00:00"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let card = store(&server).await.find_card("Charizard PSA 10").await.unwrap();
        let card = card.expect("card found");
        assert_eq!(card.id, 7);
        assert_eq!(
            card.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_find_card_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        assert!(store(&server).await.find_card("Nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_card_ignores_duplicates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/cards"))
            .and(query_param("on_conflict", "name"))
            .and(header("prefer", "return=representation"))
            .and(header("prefer", "resolution=ignore-duplicates"))
            .and(body_json(serde_json::json!([{"name": "Pikachu PSA 9"}])))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let created = store(&server).await.create_card("Pikachu PSA 9").await.unwrap();
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn test_insert_entries_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/price_entries"))
            .respond_with(ResponseTemplate::new(413).set_body_string("payload too large"))
            .mount(&server)
            .await;

        let entry = PriceEntryRecord {
            card_id: 1,
            price: 150.0,
            source: "ebay_sold".into(),
            scraped_at: Utc::now(),
            metadata: serde_json::Value::Null,
        };
        let err = store(&server)
            .await
            .insert_price_entries(&[entry])
            .await
            .unwrap_err();
        match err {
            StoreError::Status { status, table, body, .. } => {
                assert_eq!(status, 413);
                assert_eq!(table, "price_entries");
                assert_eq!(body, "payload too large");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_summary_patches_by_card_id() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/card_prices"))
            .and(query_param("card_id", "eq.42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let summary = CardPriceSummary {
            card_id: 42,
            average_price: 162.5,
            lowest_price: 150.0,
            highest_price: 175.0,
            price_count: 3,
            last_seen: Utc::now(),
        };
        store(&server).await.update_summary(&summary).await.unwrap();
    }

    #[tokio::test]
    async fn test_cards_with_prices_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/cards_with_prices"))
            .and(query_param("name", "ilike.*PSA 10*"))
            .and(query_param("order", "latest_price.desc.nullslast"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "name": "Charizard PSA 10", "created_at": null,
                 "latest_price": 250.0, "last_price_update": null, "price_count": 12}
            ])))
            .mount(&server)
            .await;

        let rows = store(&server)
            .await
            .cards_with_prices(&CardQuery {
                name_contains: Some("PSA 10".into()),
                only_priced: true,
                order_by: CardOrder::LatestPrice,
                descending: true,
                limit: Some(5),
                ..CardQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].latest_price, Some(250.0));
        assert_eq!(rows[0].price_count, Some(12));
    }
}
