//! Google Custom Search JSON API, image search mode.

use async_trait::async_trait;
use imagefetch_common::{ImageFormat, ProviderKind};
use serde::Deserialize;

use super::http::HttpClient;
use super::{CandidateRef, ImageSearch, ProviderError, SearchQuery};
use crate::credentials::Credential;

const GOOGLE_BASE_URL: &str = "https://www.googleapis.com";
const SEARCH_PATH: &str = "/customsearch/v1";
/// The API refuses `num` above ten.
const MAX_NUM: usize = 10;

// ---------------------------------------------------------------------------
// Response types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
    title: Option<String>,
    mime: Option<String>,
    image: Option<ImageMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageMeta {
    width: Option<u32>,
    height: Option<u32>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GoogleClient {
    http: HttpClient,
    base_url: String,
}

impl GoogleClient {
    pub fn new(http: HttpClient, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| GOOGLE_BASE_URL.to_string()),
        }
    }
}

fn into_candidates(response: SearchResponse) -> Result<Vec<CandidateRef>, ProviderError> {
    if response.items.is_empty() {
        return Err(ProviderError::NoResults);
    }
    Ok(response
        .items
        .into_iter()
        .map(|item| {
            let format = item
                .mime
                .as_deref()
                .and_then(ImageFormat::from_mime)
                .or_else(|| ImageFormat::from_extension(&item.link));
            CandidateRef {
                provider: ProviderKind::Google,
                width: item.image.as_ref().and_then(|i| i.width),
                height: item.image.as_ref().and_then(|i| i.height),
                url: item.link,
                format,
                title: item.title,
            }
        })
        .collect())
}

#[async_trait]
impl ImageSearch for GoogleClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credential: &Credential,
        marketplace: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<CandidateRef>, ProviderError> {
        let Some(engine_id) = credential.tag.as_deref() else {
            return Err(ProviderError::AuthFailure(format!(
                "credential '{}' has no search engine id",
                credential.id
            )));
        };

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), SEARCH_PATH);
        let num = max_results.clamp(1, MAX_NUM).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("key", credential.key.as_str()),
            ("cx", engine_id),
            ("q", query.text.as_str()),
            ("searchType", "image"),
            ("num", num.as_str()),
            ("safe", "active"),
        ];
        let country = marketplace.map(str::to_ascii_lowercase);
        if let Some(gl) = country.as_deref() {
            params.push(("gl", gl));
        }

        let response: SearchResponse = self
            .http
            .send_json(ProviderKind::Google, |client| client.get(&url).query(&params))
            .await?;

        into_candidates(response)
    }
}
