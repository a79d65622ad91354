//! Amazon Product Advertising API 5.0 client.
//!
//! Issues signed `SearchItems` requests. Barcode queries are sent as item
//! ids, everything else as keywords across all search indexes. Each result
//! item contributes its primary image, large preferred over medium.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use imagefetch_common::{ImageFormat, ProviderKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::http::HttpClient;
use super::{CandidateRef, ImageSearch, ProviderError, QueryKind, SearchQuery};
use crate::credentials::Credential;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const SERVICE: &str = "ProductAdvertisingAPI";
const SEARCH_PATH: &str = "/paapi5/searchitems";
const SEARCH_TARGET: &str = "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.SearchItems";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const CONTENT_ENCODING: &str = "amz-1.0";
const MAX_ITEM_COUNT: usize = 10;

const RESOURCES: &[&str] = &[
    "Images.Primary.Large",
    "Images.Primary.Medium",
    "ItemInfo.Title",
    "ItemInfo.ProductInfo",
];

/// API host for a marketplace code. Unknown codes fall back to US.
pub fn marketplace_host(marketplace: &str) -> &'static str {
    match marketplace.to_ascii_uppercase().as_str() {
        "CA" => "webservices.amazon.ca",
        "UK" | "GB" => "webservices.amazon.co.uk",
        "DE" => "webservices.amazon.de",
        "FR" => "webservices.amazon.fr",
        "IT" => "webservices.amazon.it",
        "ES" => "webservices.amazon.es",
        "JP" => "webservices.amazon.co.jp",
        _ => "webservices.amazon.com",
    }
}

/// Signing region for a marketplace code.
pub fn marketplace_region(marketplace: &str) -> &'static str {
    match marketplace.to_ascii_uppercase().as_str() {
        "UK" | "GB" | "DE" | "FR" | "IT" | "ES" => "eu-west-1",
        "JP" => "us-west-2",
        _ => "us-east-1",
    }
}

// ---------------------------------------------------------------------------
// Request / response types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SearchItemsRequest<'a> {
    partner_tag: &'a str,
    partner_type: &'a str,
    marketplace: String,
    resources: &'a [&'a str],
    item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    keywords: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_index: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_ids: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_id_type: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchItemsResponse {
    search_result: Option<SearchResult>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResult {
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiItem {
    images: Option<ApiImages>,
    item_info: Option<ApiItemInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiImages {
    primary: Option<ApiPrimary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiPrimary {
    large: Option<ApiImage>,
    medium: Option<ApiImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiImage {
    #[serde(rename = "URL")]
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiItemInfo {
    title: Option<ApiDisplayValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiDisplayValue {
    display_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

fn hmac(key: &[u8], msg: &str) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(msg.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the SigV4 signing key for one day, region and service.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    hmac(&k_service, "aws4_request")
}

/// Headers for one signed `SearchItems` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

/// Sign a `SearchItems` payload with AWS Signature Version 4.
pub fn sign_request(
    access_key: &str,
    secret: &str,
    host: &str,
    region: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-encoding:{}\ncontent-type:{}\nhost:{}\nx-amz-date:{}\nx-amz-target:{}\n",
        CONTENT_ENCODING, CONTENT_TYPE, host, amz_date, SEARCH_TARGET
    );
    let signed_headers = "content-encoding;content-type;host;x-amz-date;x-amz-target";
    let canonical_request = format!(
        "POST\n{}\n\n{}\n{}\n{}",
        SEARCH_PATH,
        canonical_headers,
        signed_headers,
        sha256_hex(payload.as_bytes())
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(secret, &date, region, SERVICE);
    let signature = hex::encode(hmac(&key, &string_to_sign));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            access_key, scope, signed_headers, signature
        ),
        amz_date,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AmazonClient {
    http: HttpClient,
    base_url: Option<String>,
}

impl AmazonClient {
    pub fn new(http: HttpClient, base_url: Option<String>) -> Self {
        Self { http, base_url }
    }

    fn payload(
        query: &SearchQuery,
        partner_tag: &str,
        host: &str,
        max_results: usize,
    ) -> Result<String, ProviderError> {
        let marketplace = format!("www.{}", host.trim_start_matches("webservices."));
        let mut request = SearchItemsRequest {
            partner_tag,
            partner_type: "Associates",
            marketplace,
            resources: RESOURCES,
            item_count: max_results.clamp(1, MAX_ITEM_COUNT),
            keywords: None,
            search_index: None,
            item_ids: None,
            item_id_type: None,
        };
        match query.kind {
            QueryKind::Ean => {
                request.item_ids = Some(vec![query.text.as_str()]);
                request.item_id_type = Some("EAN");
            }
            QueryKind::Upc => {
                request.item_ids = Some(vec![query.text.as_str()]);
                request.item_id_type = Some("UPC");
            }
            QueryKind::Mpn | QueryKind::Sku | QueryKind::Name => {
                request.keywords = Some(query.text.as_str());
                request.search_index = Some("All");
            }
        }
        serde_json::to_string(&request).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

fn parse_response(response: SearchItemsResponse) -> Result<Vec<CandidateRef>, ProviderError> {
    if let Some(error) = response.errors.first() {
        return Err(match error.code.as_str() {
            "NoResults" => ProviderError::NoResults,
            "TooManyRequests" | "RequestThrottled" => {
                ProviderError::QuotaExceeded(error.code.clone())
            }
            "InvalidSignature" | "IncompleteSignature" | "UnrecognizedClient"
            | "InvalidPartnerTag" | "AccessDenied" | "AccessDeniedAwsUsers" => {
                ProviderError::AuthFailure(error.code.clone())
            }
            _ => ProviderError::MalformedResponse(format!("{}: {}", error.code, error.message)),
        });
    }

    let items = response.search_result.map(|r| r.items).unwrap_or_default();
    let candidates: Vec<CandidateRef> = items
        .into_iter()
        .filter_map(|item| {
            let title = item
                .item_info
                .and_then(|i| i.title)
                .and_then(|t| t.display_value);
            let primary = item.images?.primary?;
            let image = primary.large.or(primary.medium)?;
            Some(CandidateRef {
                provider: ProviderKind::Amazon,
                format: ImageFormat::from_extension(&image.url),
                url: image.url,
                width: image.width,
                height: image.height,
                title,
            })
        })
        .collect();

    if candidates.is_empty() {
        Err(ProviderError::NoResults)
    } else {
        Ok(candidates)
    }
}

#[async_trait]
impl ImageSearch for AmazonClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Amazon
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credential: &Credential,
        marketplace: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<CandidateRef>, ProviderError> {
        let (Some(secret), Some(partner_tag)) = (credential.secret.as_deref(), credential.tag.as_deref())
        else {
            return Err(ProviderError::AuthFailure(format!(
                "credential '{}' lacks secret or partner tag",
                credential.id
            )));
        };

        let marketplace = marketplace.unwrap_or("US");
        let host = marketplace_host(marketplace);
        let region = marketplace_region(marketplace);
        let payload = Self::payload(query, partner_tag, host, max_results)?;
        let url = match &self.base_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), SEARCH_PATH),
            None => format!("https://{}{}", host, SEARCH_PATH),
        };

        debug!(kind = ?query.kind, marketplace, "Amazon SearchItems");

        let response: SearchItemsResponse = self
            .http
            .send_json(ProviderKind::Amazon, |client| {
                let signed = sign_request(&credential.key, secret, host, region, &payload, Utc::now());
                client
                    .post(&url)
                    .header("content-encoding", CONTENT_ENCODING)
                    .header("content-type", CONTENT_TYPE)
                    .header("x-amz-date", signed.amz_date)
                    .header("x-amz-target", SEARCH_TARGET)
                    .header("authorization", signed.authorization)
                    .body(payload.clone())
            })
            .await?;

        parse_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_matches_aws_vector() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sign_request_shape() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let signed = sign_request("AKID", "secret", "webservices.amazon.de", "eu-west-1", "{}", now);
        assert_eq!(signed.amz_date, "20260102T030405Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20260102/eu-west-1/ProductAdvertisingAPI/aws4_request, "
        ));
        assert!(signed
            .authorization
            .contains("SignedHeaders=content-encoding;content-type;host;x-amz-date;x-amz-target"));

        let again = sign_request("AKID", "secret", "webservices.amazon.de", "eu-west-1", "{}", now);
        assert_eq!(signed, again);
        let other = sign_request("AKID", "secret", "webservices.amazon.de", "eu-west-1", "{\"a\":1}", now);
        assert_ne!(signed.authorization, other.authorization);
    }

    #[test]
    fn test_marketplace_tables() {
        assert_eq!(marketplace_host("de"), "webservices.amazon.de");
        assert_eq!(marketplace_region("DE"), "eu-west-1");
        assert_eq!(marketplace_host("JP"), "webservices.amazon.co.jp");
        assert_eq!(marketplace_region("JP"), "us-west-2");
        assert_eq!(marketplace_host("XX"), "webservices.amazon.com");
        assert_eq!(marketplace_region("XX"), "us-east-1");
    }

    #[test]
    fn test_payload_for_barcode_and_keywords() {
        let ean = SearchQuery::new("4006381333931", QueryKind::Ean);
        let payload = AmazonClient::payload(&ean, "tag-21", "webservices.amazon.de", 5).unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["ItemIds"][0], "4006381333931");
        assert_eq!(json["ItemIdType"], "EAN");
        assert_eq!(json["Marketplace"], "www.amazon.de");
        assert_eq!(json["PartnerType"], "Associates");
        assert!(json.get("Keywords").is_none());

        let name = SearchQuery::new("Bosch Drill", QueryKind::Name);
        let payload = AmazonClient::payload(&name, "tag-21", "webservices.amazon.com", 50).unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["Keywords"], "Bosch Drill");
        assert_eq!(json["SearchIndex"], "All");
        assert_eq!(json["ItemCount"], 10);
        assert_eq!(json["Resources"][0], "Images.Primary.Large");
    }

    #[test]
    fn test_parse_prefers_large_image() {
        let body = r#"{
            "SearchResult": {"Items": [
                {"Images": {"Primary": {
                    "Large": {"URL": "https://m.media-amazon.com/images/I/a.jpg", "Width": 500, "Height": 500},
                    "Medium": {"URL": "https://m.media-amazon.com/images/I/a._SL160_.jpg", "Width": 160, "Height": 160}
                }}, "ItemInfo": {"Title": {"DisplayValue": "Drill"}}},
                {"Images": {"Primary": {
                    "Medium": {"URL": "https://m.media-amazon.com/images/I/b.png", "Width": 160, "Height": 120}
                }}},
                {"ItemInfo": {"Title": {"DisplayValue": "No image"}}}
            ]}
        }"#;
        let response: SearchItemsResponse = serde_json::from_str(body).unwrap();
        let refs = parse_response(response).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].width, Some(500));
        assert_eq!(refs[0].format, Some(ImageFormat::Jpeg));
        assert_eq!(refs[0].title.as_deref(), Some("Drill"));
        assert_eq!(refs[1].format, Some(ImageFormat::Png));
    }

    #[test]
    fn test_parse_errors() {
        let body = r#"{"Errors": [{"Code": "NoResults", "Message": "No results"}]}"#;
        let response: SearchItemsResponse = serde_json::from_str(body).unwrap();
        assert_matches!(parse_response(response), Err(ProviderError::NoResults));

        let body = r#"{"Errors": [{"Code": "InvalidPartnerTag", "Message": "bad tag"}]}"#;
        let response: SearchItemsResponse = serde_json::from_str(body).unwrap();
        assert_matches!(parse_response(response), Err(ProviderError::AuthFailure(_)));

        let response: SearchItemsResponse = serde_json::from_str("{}").unwrap();
        assert_matches!(parse_response(response), Err(ProviderError::NoResults));
    }
}
