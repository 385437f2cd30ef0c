//! A small client for the Backblaze B2 native API (v2).
//!
//! Only the calls needed to publish releases are implemented: authorizing, looking up a bucket,
//! finding a file by exact name, single-part uploads, and deleting a file version.
use crate::{
    config::B2Credentials,
    hashing,
    http::{check, sensitive},
};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client, RequestBuilder,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{fs, path::Path};

const API_PREFIX: &str = "b2api/v2";
/// Tells B2 to guess the content type from the file name.
pub const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

// B2 wants file names URL encoded, but with `/` left alone.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorization {
    account_id: String,
    authorization_token: String,
    api_url: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_id: String,
    pub bucket_name: String,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    buckets: Vec<Bucket>,
}

/// A stored version of a file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    files: Vec<FileVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug)]
pub struct B2Client {
    client: Client,
    account_id: String,
    api_url: String,
    token: String,
}

impl B2Client {
    /// Authorizes with B2 using an application key.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or B2 rejects the key.
    pub async fn authorize(
        client: &Client,
        api_url: &str,
        credentials: B2Credentials<'_>,
    ) -> Result<Self> {
        let url = format!(
            "{}/{API_PREFIX}/b2_authorize_account",
            api_url.trim_end_matches('/')
        );
        debug!("authorizing with B2 at `{url}`");
        let resp = client
            .get(&url)
            .basic_auth(credentials.key_id, Some(credentials.key))
            .send()
            .await
            .context("Could not connect to B2")?;
        let auth = check(resp, "Could not connect to B2")
            .await?
            .json::<Authorization>()
            .await
            .context("Could not connect to B2: unexpected response")?;

        Ok(Self {
            client: client.clone(),
            account_id: auth.account_id,
            api_url: auth.api_url.trim_end_matches('/').to_string(),
            token: auth.authorization_token,
        })
    }

    /// Looks up a bucket by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no bucket has this name.
    pub async fn bucket(&self, name: &str) -> Result<Bucket> {
        let list: BucketList = self
            .call(
                "b2_list_buckets",
                &json!({ "accountId": self.account_id, "bucketName": name }),
                "Could not list B2 buckets",
            )
            .await?;
        list.buckets
            .into_iter()
            .find(|b| b.bucket_name == name)
            .ok_or_else(|| anyhow!("B2 bucket `{name}` does not exist"))
    }

    /// Returns the latest version of the file with exactly this name, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn find_file(&self, bucket: &Bucket, path: &str) -> Result<Option<FileVersion>> {
        let list: FileList = self
            .call(
                "b2_list_file_names",
                &json!({
                    "bucketId": bucket.bucket_id,
                    "startFileName": path,
                    "maxFileCount": 1,
                }),
                "Could not list B2 files",
            )
            .await?;
        Ok(list.files.into_iter().find(|f| f.file_name == path))
    }

    /// Uploads a local file to `remote_path` in the bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the upload fails.
    pub async fn upload(
        &self,
        bucket: &Bucket,
        local: &Path,
        remote_path: &str,
    ) -> Result<FileVersion> {
        let bytes =
            fs::read(local).with_context(|| format!("could not read {}", local.display()))?;
        info!(
            "uploading {} ({} bytes) to b2://{}/{remote_path}",
            local.display(),
            bytes.len(),
            bucket.bucket_name,
        );
        self.upload_bytes(bucket, bytes, remote_path, AUTO_CONTENT_TYPE)
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the upload fails.
    pub async fn upload_bytes(
        &self,
        bucket: &Bucket,
        bytes: Vec<u8>,
        remote_path: &str,
        content_type: &str,
    ) -> Result<FileVersion> {
        let target: UploadUrl = self
            .call(
                "b2_get_upload_url",
                &json!({ "bucketId": bucket.bucket_id }),
                "Could not upload file",
            )
            .await?;

        let sha1 = hashing::sha1_bytes(&bytes);
        let file_name = utf8_percent_encode(remote_path, FILE_NAME).to_string();
        // The body is a `Vec`, so reqwest sets Content-Length itself.
        debug!("uploading {} bytes as `{file_name}`, sha1 {sha1}", bytes.len());

        let req = self
            .client
            .post(&target.upload_url)
            .header(AUTHORIZATION, sensitive(&target.authorization_token)?)
            .header("X-Bz-File-Name", file_name)
            .header(CONTENT_TYPE, content_type)
            .header("X-Bz-Content-Sha1", sha1)
            .body(bytes);
        let resp = req.send().await.context("Could not upload file")?;
        check(resp, "Could not upload file")
            .await?
            .json::<FileVersion>()
            .await
            .context("Could not upload file: unexpected response")
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete(&self, file: &FileVersion) -> Result<()> {
        info!("deleting {} ({})", file.file_name, file.file_id);
        let _: serde_json::Value = self
            .call(
                "b2_delete_file_version",
                &json!({ "fileName": file.file_name, "fileId": file.file_id }),
                "Failed to delete file",
            )
            .await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &str,
        body: &serde_json::Value,
        failure: &str,
    ) -> Result<T> {
        let url = format!("{}/{API_PREFIX}/{op}", self.api_url);
        debug!("calling B2 `{op}`");
        let req = self.add_token_header(self.client.post(&url).json(body))?;
        let resp = req
            .send()
            .await
            .with_context(|| failure.to_string())?;
        check(resp, failure)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("{failure}: unexpected response from `{op}`"))
    }

    fn add_token_header(&self, req_builder: RequestBuilder) -> Result<RequestBuilder> {
        Ok(req_builder.header(AUTHORIZATION, sensitive(&self.token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_log::test;

    const CREDS: B2Credentials<'static> = B2Credentials {
        key_id: "id",
        key: "key",
    };

    async fn authorized(server: &mut ServerGuard) -> Result<B2Client> {
        let auth = server
            .mock("GET", "/b2api/v2/b2_authorize_account")
            // base64 of "id:key"
            .match_header("authorization", "Basic aWQ6a2V5")
            .with_status(200)
            .with_body(
                json!({
                    "accountId": "acct",
                    "authorizationToken": "tok",
                    "apiUrl": server.url(),
                })
                .to_string(),
            )
            .create_async()
            .await;
        let b2 = B2Client::authorize(&Client::new(), &server.url(), CREDS).await?;
        auth.assert_async().await;
        Ok(b2)
    }

    fn bucket() -> Bucket {
        Bucket {
            bucket_id: "bkt-id".to_string(),
            bucket_name: "lykos-1".to_string(),
        }
    }

    #[test(tokio::test)]
    async fn authorize_failure() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/b2api/v2/b2_authorize_account")
            .with_status(401)
            .with_body(r#"{"code":"unauthorized"}"#)
            .create_async()
            .await;
        let err = B2Client::authorize(&Client::new(), &server.url(), CREDS)
            .await
            .unwrap_err();
        m.assert_async().await;
        let msg = err.to_string();
        assert!(msg.starts_with("Could not connect to B2: 401"), "{msg}");
        Ok(())
    }

    #[test(tokio::test)]
    async fn bucket_lookup() -> Result<()> {
        let mut server = Server::new_async().await;
        let b2 = authorized(&mut server).await?;

        let m = server
            .mock("POST", "/b2api/v2/b2_list_buckets")
            .match_header("authorization", "tok")
            .match_body(Matcher::Json(
                json!({ "accountId": "acct", "bucketName": "lykos-1" }),
            ))
            .with_status(200)
            .with_body(
                json!({ "buckets": [{ "bucketId": "bkt-id", "bucketName": "lykos-1" }] })
                    .to_string(),
            )
            .create_async()
            .await;
        assert_eq!(b2.bucket("lykos-1").await?, bucket());
        m.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn unknown_bucket() -> Result<()> {
        let mut server = Server::new_async().await;
        let b2 = authorized(&mut server).await?;
        server
            .mock("POST", "/b2api/v2/b2_list_buckets")
            .with_status(200)
            .with_body(r#"{"buckets":[]}"#)
            .create_async()
            .await;
        assert!(b2.bucket("nope").await.is_err());
        Ok(())
    }

    #[test(tokio::test)]
    async fn find_file_requires_exact_name() -> Result<()> {
        let mut server = Server::new_async().await;
        let b2 = authorized(&mut server).await?;
        let list = server
            .mock("POST", "/b2api/v2/b2_list_file_names")
            .match_body(Matcher::PartialJson(
                json!({ "bucketId": "bkt-id", "maxFileCount": 1 }),
            ))
            .with_status(200)
            .with_body(
                json!({ "files": [{ "fileId": "f1", "fileName": "sm/a.zip.old" }] }).to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        assert_eq!(b2.find_file(&bucket(), "sm/a.zip").await?, None);
        let found = b2.find_file(&bucket(), "sm/a.zip.old").await?;
        assert_eq!(found.map(|f| f.file_id), Some("f1".to_string()));
        list.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn upload_file() -> Result<()> {
        let mut server = Server::new_async().await;
        let b2 = authorized(&mut server).await?;

        let get_url = server
            .mock("POST", "/b2api/v2/b2_get_upload_url")
            .match_header("authorization", "tok")
            .with_status(200)
            .with_body(
                json!({
                    "bucketId": "bkt-id",
                    "uploadUrl": format!("{}/upload/here", server.url()),
                    "authorizationToken": "upload-tok",
                })
                .to_string(),
            )
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload/here")
            .match_header("authorization", "upload-tok")
            .match_header("x-bz-file-name", "sm/v2.9.0/Stability%20Matrix.zip")
            .match_header("content-type", AUTO_CONTENT_TYPE)
            .match_header("content-length", "3")
            .match_header("x-bz-content-sha1", "a9993e364706816aba3e25717850c26c9cd0d89d")
            .match_body("abc")
            .with_status(200)
            .with_body(
                json!({
                    "fileId": "new-id",
                    "fileName": "sm/v2.9.0/Stability Matrix.zip",
                    "contentLength": 3,
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut f = NamedTempFile::new()?;
        f.write_all(b"abc")?;
        f.flush()?;
        let uploaded = b2
            .upload(&bucket(), f.path(), "sm/v2.9.0/Stability Matrix.zip")
            .await?;

        get_url.assert_async().await;
        upload.assert_async().await;
        assert_eq!(uploaded.file_id, "new-id");
        assert_eq!(uploaded.content_length, 3);
        Ok(())
    }

    #[test(tokio::test)]
    async fn upload_failure() -> Result<()> {
        let mut server = Server::new_async().await;
        let b2 = authorized(&mut server).await?;
        server
            .mock("POST", "/b2api/v2/b2_get_upload_url")
            .with_status(200)
            .with_body(
                json!({
                    "uploadUrl": format!("{}/upload", server.url()),
                    "authorizationToken": "upload-tok",
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/upload")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let err = b2
            .upload_bytes(&bucket(), b"{}".to_vec(), "update.json", "application/json")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Could not upload file: 503"));
        Ok(())
    }

    #[test(tokio::test)]
    async fn delete_file() -> Result<()> {
        let mut server = Server::new_async().await;
        let b2 = authorized(&mut server).await?;
        let m = server
            .mock("POST", "/b2api/v2/b2_delete_file_version")
            .match_body(Matcher::Json(
                json!({ "fileName": "sm/a.zip", "fileId": "f1" }),
            ))
            .with_status(200)
            .with_body(r#"{"fileId":"f1","fileName":"sm/a.zip"}"#)
            .create_async()
            .await;
        let file = FileVersion {
            file_id: "f1".to_string(),
            file_name: "sm/a.zip".to_string(),
            content_length: 0,
            content_sha1: None,
        };
        b2.delete(&file).await?;
        m.assert_async().await;
        m.remove_async().await;

        server
            .mock("POST", "/b2api/v2/b2_delete_file_version")
            .with_status(400)
            .with_body("bad")
            .create_async()
            .await;
        let err = b2.delete(&file).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to delete file"));
        Ok(())
    }
}
