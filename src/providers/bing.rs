//! Bing Image Search v7.

use async_trait::async_trait;
use imagefetch_common::{ImageFormat, ProviderKind};
use serde::Deserialize;

use super::http::HttpClient;
use super::{CandidateRef, ImageSearch, ProviderError, SearchQuery};
use crate::credentials::Credential;

const BING_BASE_URL: &str = "https://api.cognitive.microsoft.com";
const SEARCH_PATH: &str = "/bing/v7.0/images/search";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const MAX_COUNT: usize = 150;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<ImageResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResult {
    content_url: String,
    name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    encoding_format: Option<String>,
}

pub struct BingClient {
    http: HttpClient,
    base_url: String,
}

impl BingClient {
    pub fn new(http: HttpClient, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| BING_BASE_URL.to_string()),
        }
    }
}

/// Map a marketplace code to a Bing market, e.g. "DE" to "de-DE".
fn market(marketplace: &str) -> String {
    let code = marketplace.to_ascii_uppercase();
    match code.as_str() {
        "UK" | "GB" => "en-GB".to_string(),
        "US" | "CA" => format!("en-{}", code),
        "JP" => "ja-JP".to_string(),
        _ => format!("{}-{}", code.to_ascii_lowercase(), code),
    }
}

fn into_candidates(response: SearchResponse) -> Result<Vec<CandidateRef>, ProviderError> {
    if response.value.is_empty() {
        return Err(ProviderError::NoResults);
    }
    Ok(response
        .value
        .into_iter()
        .map(|image| {
            let format = image
                .encoding_format
                .as_deref()
                .and_then(|f| f.parse::<ImageFormat>().ok())
                .or_else(|| ImageFormat::from_extension(&image.content_url));
            CandidateRef {
                provider: ProviderKind::Bing,
                url: image.content_url,
                width: image.width,
                height: image.height,
                format,
                title: image.name,
            }
        })
        .collect())
}

#[async_trait]
impl ImageSearch for BingClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bing
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credential: &Credential,
        marketplace: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<CandidateRef>, ProviderError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), SEARCH_PATH);
        let count = max_results.clamp(1, MAX_COUNT).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("q", query.text.as_str()),
            ("imageType", "Photo"),
            ("size", "Large"),
            ("count", count.as_str()),
        ];
        let mkt = marketplace.map(market);
        if let Some(mkt) = mkt.as_deref() {
            params.push(("mkt", mkt));
        }

        let response: SearchResponse = self
            .http
            .send_json(ProviderKind::Bing, |client| {
                client
                    .get(&url)
                    .header(KEY_HEADER, credential.key.as_str())
                    .query(&params)
            })
            .await?;

        into_candidates(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_value() {
        let body = r#"{
            "_type": "Images",
            "value": [
                {"contentUrl": "https://img.example.com/a", "name": "Drill",
                 "width": 1000, "height": 1000, "encodingFormat": "jpeg"},
                {"contentUrl": "https://img.example.com/b.png", "width": 640, "height": 480}
            ]
        }"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let refs = into_candidates(response).unwrap();
        assert_eq!(refs[0].format, Some(ImageFormat::Jpeg));
        assert_eq!(refs[0].title.as_deref(), Some("Drill"));
        assert_eq!(refs[1].format, Some(ImageFormat::Png));
        assert_eq!(refs[1].width, Some(640));
    }

    #[test]
    fn test_empty_value_is_no_results() {
        let response: SearchResponse = serde_json::from_str(r#"{"value": []}"#).unwrap();
        assert_matches!(into_candidates(response), Err(ProviderError::NoResults));
    }

    #[test]
    fn test_market() {
        assert_eq!(market("DE"), "de-DE");
        assert_eq!(market("uk"), "en-GB");
        assert_eq!(market("US"), "en-US");
        assert_eq!(market("JP"), "ja-JP");
    }
}
