//! S3-compatible object store.
//!
//! Implements [`ObjectStore`] against the S3 REST API with AWS Signature V4
//! authentication. Requests use path-style addressing
//! (`<endpoint>/<bucket>/<key>`), which MinIO and most S3-compatible
//! services accept, and keep the endpoint's scheme so plain-HTTP MinIO
//! deployments work.
//!
//! # Configuration
//!
//! ```toml
//! [object_store]
//! backend = "s3"
//! endpoint_url = "http://minio:9000"
//! region = "us-east-1"
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional)
//!
//! # Operations
//!
//! | Trait method | Request |
//! |--------------|---------|
//! | `bucket_exists` | `HEAD /<bucket>` |
//! | `create_bucket` | `PUT /<bucket>` |
//! | `delete_bucket` | `DELETE` every object, then `DELETE /<bucket>` |
//! | `list_buckets` | `GET /` |
//! | `put_object` / `get_object` / `delete_object` | `PUT` / `GET` / `DELETE /<bucket>/<key>` |
//! | `list_objects` | `GET /<bucket>?list-type=2` (paginated) |
//! | `set_bucket_notification` | `PUT /<bucket>?notification` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};

use rag_indices_core::store::{BucketNotification, ObjectInfo, ObjectStore, StoredObject};

use crate::config::ObjectStoreConfig;

type HmacSha256 = Hmac<Sha256>;

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self::new(access_key_id, secret_access_key, session_token))
    }
}

// ============ Store ============

pub struct S3ObjectStore {
    client: reqwest::Client,
    /// `http` or `https`.
    scheme: String,
    /// Host and optional port, as signed in the `host` header.
    host: String,
    region: String,
    creds: AwsCredentials,
}

/// A single object-store request before signing.
struct S3Request<'a> {
    method: Method,
    bucket: Option<&'a str>,
    key: Option<&'a str>,
    query: Vec<(String, String)>,
    body: Vec<u8>,
    content_type: Option<&'a str>,
}

impl<'a> S3Request<'a> {
    fn new(method: Method) -> Self {
        Self {
            method,
            bucket: None,
            key: None,
            query: Vec::new(),
            body: Vec::new(),
            content_type: None,
        }
    }

    fn bucket(mut self, bucket: &'a str) -> Self {
        self.bucket = Some(bucket);
        self
    }

    fn key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }

    fn query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    fn body(mut self, body: Vec<u8>, content_type: &'a str) -> Self {
        self.body = body;
        self.content_type = Some(content_type);
        self
    }
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig, creds: AwsCredentials) -> Result<Self> {
        let endpoint = config.endpoint_url.trim_end_matches('/');
        let (scheme, host) = match endpoint.split_once("://") {
            Some((scheme, host)) => (scheme.to_string(), host.to_string()),
            None => ("https".to_string(), endpoint.to_string()),
        };
        if host.is_empty() {
            bail!("object_store.endpoint_url must include a host");
        }

        Ok(Self {
            client: reqwest::Client::new(),
            scheme,
            host,
            region: config.region.clone(),
            creds,
        })
    }

    pub fn from_env(config: &ObjectStoreConfig) -> Result<Self> {
        Self::new(config, AwsCredentials::from_env()?)
    }

    fn canonical_uri(bucket: Option<&str>, key: Option<&str>) -> String {
        let mut uri = String::from("/");
        if let Some(bucket) = bucket {
            uri.push_str(&uri_encode(bucket));
            if let Some(key) = key {
                uri.push('/');
                uri.push_str(&key.split('/').map(uri_encode).collect::<Vec<_>>().join("/"));
            }
        }
        uri
    }

    /// Sign and send a request, returning the raw response.
    async fn send(&self, req: S3Request<'_>) -> Result<reqwest::Response> {
        let canonical_uri = Self::canonical_uri(req.bucket, req.key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical query string must be sorted
        let mut sorted_params = req.query.clone();
        sorted_params.sort();
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(&req.body);

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            req.method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut builder = self
            .client
            .request(req.method.clone(), &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }
        if let Some(content_type) = req.content_type {
            builder = builder.header("Content-Type", content_type);
        }
        if !req.body.is_empty() || req.method == Method::PUT {
            builder = builder.body(req.body);
        }

        builder
            .send()
            .await
            .with_context(|| format!("S3 {} {} failed", req.method, canonical_uri))
    }

    /// Send a request and fail on any non-success status.
    async fn send_ok(&self, req: S3Request<'_>, operation: &str) -> Result<reqwest::Response> {
        let resp = self.send(req).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 {} failed (HTTP {}): {}",
                operation,
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(resp)
    }

    fn create_bucket_body(&self) -> Vec<u8> {
        if self.region.is_empty() || self.region == "us-east-1" {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.region
            )
            .into_bytes()
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let resp = self.send(S3Request::new(Method::HEAD).bucket(bucket)).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            bail!("S3 HeadBucket failed (HTTP {}) for bucket '{}'", status, bucket)
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let body = self.create_bucket_body();
        self.send_ok(
            S3Request::new(Method::PUT)
                .bucket(bucket)
                .body(body, "application/xml"),
            "CreateBucket",
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        for object in self.list_objects(bucket).await? {
            self.delete_object(bucket, &object.key)
                .await
                .with_context(|| format!("failed to remove object {}", object.key))?;
        }
        self.send_ok(S3Request::new(Method::DELETE).bucket(bucket), "DeleteBucket")
            .await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let resp = self
            .send_ok(S3Request::new(Method::GET), "ListBuckets")
            .await?;
        let xml = resp.text().await?;
        Ok(parse_list_buckets_response(&xml))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.send_ok(
            S3Request::new(Method::PUT)
                .bucket(bucket)
                .key(key)
                .body(data, content_type),
            "PutObject",
        )
        .await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let resp = self
            .send(S3Request::new(Method::GET).bucket(bucket).key(key))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = resp.bytes().await?.to_vec();
        Ok(Some(StoredObject { data, content_type }))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.send_ok(
            S3Request::new(Method::DELETE).bucket(bucket).key(key),
            "DeleteObject",
        )
        .await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = S3Request::new(Method::GET)
                .bucket(bucket)
                .query("list-type", "2")
                .query("max-keys", "1000");
            if let Some(ref token) = continuation_token {
                req = req.query("continuation-token", token);
            }

            let resp = self.send_ok(req, "ListObjectsV2").await?;
            let xml = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml);
            objects.extend(batch);

            match (is_truncated, next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn set_bucket_notification(
        &self,
        bucket: &str,
        notification: &BucketNotification,
    ) -> Result<()> {
        let xml = notification_xml(notification);
        self.send_ok(
            S3Request::new(Method::PUT)
                .bucket(bucket)
                .query("notification", "")
                .body(xml.into_bytes(), "application/xml"),
            "PutBucketNotificationConfiguration",
        )
        .await?;
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving `A-Z a-z 0-9 - _ . ~` as is.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML (minimal, no extra deps) ============

/// Render a bucket notification as S3 `NotificationConfiguration` XML.
fn notification_xml(notification: &BucketNotification) -> String {
    let events: String = notification
        .events
        .iter()
        .map(|e| format!("<Event>{}</Event>", xml_escape(e)))
        .collect();
    format!(
        "<NotificationConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <QueueConfiguration><Id>{}</Id><Queue>{}</Queue>{}</QueueConfiguration>\
         </NotificationConfiguration>",
        xml_escape(&notification.id),
        xml_escape(&notification.target_arn),
        events
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Iterate over the inner text of every `<tag>...</tag>` block.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        let block_start = start + open.len();
        match remaining[block_start..].find(&close) {
            Some(end) => {
                blocks.push(&remaining[block_start..block_start + end]);
                remaining = &remaining[block_start + end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    xml_blocks(xml, tag).first().map(|v| xml_unescape(v))
}

fn parse_list_buckets_response(xml: &str) -> Vec<String> {
    xml_blocks(xml, "Bucket")
        .into_iter()
        .filter_map(|block| extract_xml_value(block, "Name"))
        .collect()
}

/// Parse a `ListObjectsV2` response into objects, truncation flag, and
/// the next continuation token.
fn parse_list_objects_response(xml: &str) -> (Vec<ObjectInfo>, bool, Option<String>) {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let objects = xml_blocks(xml, "Contents")
        .into_iter()
        .filter_map(|block| {
            let key = extract_xml_value(block, "Key")?;
            if key.is_empty() {
                return None;
            }
            let last_modified = extract_xml_value(block, "LastModified")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default();
            let size = extract_xml_value(block, "Size")
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            Some(ObjectInfo {
                key,
                size,
                content_type: None,
                last_modified,
            })
        })
        .collect();

    (objects, is_truncated, next_token)
}
