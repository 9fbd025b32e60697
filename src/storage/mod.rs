//! Storage REST (buckets and objects), sharing Transport with PostgREST
//!
//! File MIME probing and the byte-transfer mechanics of multipart bodies
//! are external collaborators (§1 Non-goals): callers supply an explicit
//! `content_type` rather than the SDK sniffing it.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::Result;
use crate::transport::Transport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub file_size_limit: Option<i64>,
    #[serde(default)]
    pub allowed_mime_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BucketOptions {
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_mime_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ListOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortBy {
    pub column: String,
    pub order: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct UploadOptions {
    pub content_type: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub upsert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
}

/// Entry point: `storage.from(bucket)` mirrors the fluent handle supabase-js
/// exposes for object operations scoped to one bucket.
#[derive(Clone)]
pub struct Storage {
    transport: Transport,
}

impl Storage {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn storage_path(&self, suffix: &str) -> String {
        format!("{}{}", self.transport.config().paths().storage, suffix)
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let request = self.transport.new_request(Method::GET, &self.storage_path("/bucket"))?;
        self.transport.send_json(request).await
    }

    pub async fn get_bucket(&self, id: &str) -> Result<Bucket> {
        let request = self
            .transport
            .new_request(Method::GET, &self.storage_path(&format!("/bucket/{id}")))?;
        self.transport.send_json(request).await
    }

    pub async fn create_bucket(&self, id: &str, options: BucketOptions) -> Result<Bucket> {
        let mut body = json!({ "id": id, "name": id });
        merge_bucket_options(&mut body, &options);
        let request = self
            .transport
            .new_request(Method::POST, &self.storage_path("/bucket"))?
            .json(&body);
        self.transport.send_json(request).await
    }

    pub async fn update_bucket(&self, id: &str, options: BucketOptions) -> Result<Bucket> {
        let mut body = json!({});
        merge_bucket_options(&mut body, &options);
        let request = self
            .transport
            .new_request(Method::PUT, &self.storage_path(&format!("/bucket/{id}")))?
            .json(&body);
        self.transport.send_json(request).await
    }

    pub async fn empty_bucket(&self, id: &str) -> Result<()> {
        let request = self
            .transport
            .new_request(Method::POST, &self.storage_path(&format!("/bucket/{id}/empty")))?;
        self.transport.send_response(request).await?;
        Ok(())
    }

    pub async fn delete_bucket(&self, id: &str) -> Result<()> {
        let request = self
            .transport
            .new_request(Method::DELETE, &self.storage_path(&format!("/bucket/{id}")))?;
        self.transport.send_response(request).await?;
        Ok(())
    }

    /// A handle scoped to object operations within `bucket`
    pub fn from(&self, bucket: &str) -> StorageBucket {
        StorageBucket {
            transport: self.transport.clone(),
            bucket: bucket.to_string(),
        }
    }
}

fn merge_bucket_options(body: &mut JsonValue, options: &BucketOptions) {
    let object = body.as_object_mut().expect("body is always constructed as a JSON object");
    object.insert("public".to_string(), json!(options.public));
    if let Some(limit) = options.file_size_limit {
        object.insert("file_size_limit".to_string(), json!(limit));
    }
    if let Some(mime_types) = &options.allowed_mime_types {
        object.insert("allowed_mime_types".to_string(), json!(mime_types));
    }
}

/// Object operations scoped to one bucket
pub struct StorageBucket {
    transport: Transport,
    bucket: String,
}

impl StorageBucket {
    fn storage_path(&self, suffix: &str) -> String {
        format!("{}{}", self.transport.config().paths().storage, suffix)
    }

    pub async fn upload(&self, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<FileObject> {
        let path_suffix = self.storage_path(&format!("/object/{}/{}", self.bucket, path));
        let mut request = self
            .transport
            .new_request(Method::POST, &path_suffix)?
            .header("Content-Type", &options.content_type)
            .header("x-upsert", options.upsert.to_string());
        if let Some(cache_control) = &options.cache_control {
            request = request.header("Cache-Control", cache_control);
        }
        let request = request.body(bytes);
        self.transport.send_json(request).await
    }

    pub async fn update(&self, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<FileObject> {
        let path_suffix = self.storage_path(&format!("/object/{}/{}", self.bucket, path));
        let request = self
            .transport
            .new_request(Method::PUT, &path_suffix)?
            .header("Content-Type", &options.content_type)
            .body(bytes);
        self.transport.send_json(request).await
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let path_suffix = self.storage_path(&format!("/object/{}/{}", self.bucket, path));
        let request = self.transport.new_request(Method::GET, &path_suffix)?;
        self.transport.send_bytes(request).await
    }

    pub async fn list(&self, prefix: &str, options: ListOptions) -> Result<Vec<FileObject>> {
        let path_suffix = self.storage_path(&format!("/object/list/{}", self.bucket));
        let body = json!({
            "prefix": prefix,
            "limit": options.limit,
            "offset": options.offset,
            "sortBy": options.sort_by.map(|s| json!({"column": s.column, "order": s.order})),
        });
        let request = self
            .transport
            .new_request(Method::POST, &path_suffix)?
            .json(&body);
        self.transport.send_json(request).await
    }

    pub async fn copy(&self, from_path: &str, to_path: &str) -> Result<()> {
        let path_suffix = self.storage_path("/object/copy");
        let body = json!({
            "bucketId": self.bucket,
            "sourceKey": from_path,
            "destinationKey": to_path,
        });
        let request = self
            .transport
            .new_request(Method::POST, &path_suffix)?
            .json(&body);
        self.transport.send_response(request).await?;
        Ok(())
    }

    pub async fn move_(&self, from_path: &str, to_path: &str) -> Result<()> {
        let path_suffix = self.storage_path("/object/move");
        let body = json!({
            "bucketId": self.bucket,
            "sourceKey": from_path,
            "destinationKey": to_path,
        });
        let request = self
            .transport
            .new_request(Method::POST, &path_suffix)?
            .json(&body);
        self.transport.send_response(request).await?;
        Ok(())
    }

    pub async fn create_signed_url(&self, path: &str, expires_in: u64) -> Result<String> {
        let path_suffix = self.storage_path(&format!("/object/sign/{}/{}", self.bucket, path));
        let request = self
            .transport
            .new_request(Method::POST, &path_suffix)?
            .json(&json!({ "expiresIn": expires_in }));
        #[derive(Deserialize)]
        struct SignedUrlResponse {
            #[serde(rename = "signedURL")]
            signed_url: String,
        }
        let response: SignedUrlResponse = self.transport.send_json(request).await?;
        Ok(self.absolute_url(&response.signed_url))
    }

    pub async fn create_signed_urls(&self, paths: Vec<String>, expires_in: u64) -> Result<Vec<String>> {
        let path_suffix = self.storage_path(&format!("/object/sign/{}", self.bucket));
        let request = self
            .transport
            .new_request(Method::POST, &path_suffix)?
            .json(&json!({ "expiresIn": expires_in, "paths": paths }));
        #[derive(Deserialize)]
        struct SignedUrlEntry {
            #[serde(rename = "signedURL")]
            signed_url: String,
        }
        let entries: Vec<SignedUrlEntry> = self.transport.send_json(request).await?;
        Ok(entries.into_iter().map(|e| self.absolute_url(&e.signed_url)).collect())
    }

    /// Client-side URL composition, no request: `<base><storagePath>/object/public/<bucket>/<path>`
    pub fn public_url(&self, path: &str) -> String {
        let relative = self.storage_path(&format!("/object/public/{}/{}", self.bucket, path));
        self.absolute_url(&relative)
    }

    fn absolute_url(&self, relative_or_absolute: &str) -> String {
        if relative_or_absolute.starts_with("http://") || relative_or_absolute.starts_with("https://") {
            return relative_or_absolute.to_string();
        }
        self.transport
            .config()
            .resolve_url(relative_or_absolute)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| relative_or_absolute.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_storage(base_url: &str) -> Storage {
        let config = Config::builder(base_url, "anon-key").build().unwrap();
        Storage::new(Transport::new(config).unwrap())
    }

    #[test]
    fn public_url_composes_without_request() {
        let storage = test_storage("https://project.supabase.co");
        let url = storage.from("avatars").public_url("user/1.png");
        assert_eq!(
            url,
            "https://project.supabase.co/storage/v1/object/public/avatars/user/1.png"
        );
    }

    #[tokio::test]
    async fn create_signed_url_resolves_against_base() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/avatars/user/1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signedURL": "/object/sign/avatars/user/1.png?token=abc"
            })))
            .mount(&server)
            .await;

        let storage = test_storage(&server.uri());
        let url = storage.from("avatars").create_signed_url("user/1.png", 3600).await.unwrap();
        assert!(url.ends_with("/object/sign/avatars/user/1.png?token=abc"));
        assert!(url.starts_with(&server.uri()));
    }

    #[tokio::test]
    async fn list_buckets_deserializes_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/bucket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "avatars", "name": "avatars", "public": true }
            ])))
            .mount(&server)
            .await;

        let storage = test_storage(&server.uri());
        let buckets = storage.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].id, "avatars");
    }
}
