use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use tracing::debug;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const TMDB_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";

/// One movie as returned by a catalog listing. Read-only input to the
/// forwarder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
}

impl CatalogRecord {
    pub fn new(title: impl Into<String>, popularity: f64) -> Self {
        Self {
            title: title.into(),
            popularity,
            ..Default::default()
        }
    }

    /// Field by its wire name, `None` when absent.
    pub fn field(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove(name),
            _ => None,
        }
    }

    /// e.g. `poster_url("w300")`
    pub fn poster_url(&self, size: &str) -> Option<String> {
        let path = self.poster_path.as_deref()?;
        Some(format!("{TMDB_IMAGE_BASE_URL}/{size}/{}", path.trim_start_matches('/')))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CatalogCategory {
    Trending,
    TopRated,
    NowPlaying,
}

impl CatalogCategory {
    pub fn path(self) -> &'static str {
        match self {
            CatalogCategory::Trending => "trending/movie/day",
            CatalogCategory::TopRated => "movie/top_rated",
            CatalogCategory::NowPlaying => "movie/now_playing",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<CatalogRecord>,
}

/// Plain request/response client for the TMDB v3 API.
#[derive(Debug, Clone)]
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "catalog request");
        let rsp = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("catalog returned an error for {url}"))?;
        Ok(rsp.json().await?)
    }

    pub async fn fetch(&self, category: CatalogCategory) -> Result<Vec<CatalogRecord>> {
        let page: Page = serde_json::from_value(self.get_json(category.path()).await?)
            .context("unexpected catalog listing shape")?;
        Ok(page.results)
    }

    pub async fn movie_details(&self, id: u64) -> Result<Value> {
        self.get_json(&format!("movie/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_tolerates_missing_fields() {
        let page: Page = serde_json::from_value(json!({
            "page": 1,
            "results": [
                {
                    "id": 438631,
                    "title": "Dune",
                    "popularity": 88.1,
                    "poster_path": "/d5NXSklXo0qyIYkgV94XAgMIckC.jpg",
                    "adult": false
                },
                {"title": "Untitled"}
            ]
        }))
        .unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].id, Some(438631));
        assert_eq!(page.results[1].popularity, 0.0);
    }

    #[test]
    fn field_lookup_uses_wire_names() {
        let record = CatalogRecord::new("Dune", 88.1);
        assert_eq!(record.field("title"), Some(json!("Dune")));
        assert_eq!(record.field("popularity"), Some(json!(88.1)));
        assert_eq!(record.field("poster_path"), None);
    }

    #[test]
    fn urls() {
        let client = TmdbClient::new("https://example.test/3/", "k");
        assert_eq!(
            client.url(CatalogCategory::TopRated.path()),
            "https://example.test/3/movie/top_rated"
        );

        let record = CatalogRecord {
            poster_path: Some("/abc.jpg".into()),
            ..CatalogRecord::new("x", 1.0)
        };
        assert_eq!(
            record.poster_url("w300").as_deref(),
            Some("https://image.tmdb.org/t/p/w300/abc.jpg")
        );
    }

    #[test]
    fn category_names() {
        assert_eq!(CatalogCategory::NowPlaying.to_string(), "now-playing");
        assert_eq!("top-rated".parse::<CatalogCategory>().unwrap(), CatalogCategory::TopRated);
    }
}
