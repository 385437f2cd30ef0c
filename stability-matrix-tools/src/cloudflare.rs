use crate::{
    config::CloudflareCredentials,
    http::{check, sensitive},
};
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

/// The outcome of a successful purge request.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Debug)]
pub struct Cloudflare<'a> {
    client: &'a Client,
    api_url: &'a str,
    credentials: CloudflareCredentials<'a>,
}

impl<'a> Cloudflare<'a> {
    #[must_use]
    pub fn new(client: &'a Client, api_url: &'a str, credentials: CloudflareCredentials<'a>) -> Self {
        Self {
            client,
            api_url,
            credentials,
        }
    }

    /// Purges the CDN cache for the given URLs. Does nothing and returns `None` if `urls` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Cloudflare responds with a non-2xx status.
    pub async fn purge<S: AsRef<str>>(&self, urls: &[S]) -> Result<Option<PurgeResponse>> {
        if urls.is_empty() {
            debug!("no URLs to purge");
            return Ok(None);
        }
        let files = urls.iter().map(AsRef::as_ref).collect::<Vec<_>>();
        info!("purging the CDN cache for {}", files.join(", "));

        let url = format!(
            "{}/zones/{}/purge_cache",
            self.api_url.trim_end_matches('/'),
            self.credentials.zone_id,
        );
        let req = self.add_token_header(self.client.post(&url).json(&json!({ "files": files })))?;
        let resp = req
            .send()
            .await
            .context("Could not connect to Cloudflare")?;

        let resp = check(resp, "Failed to purge the CDN cache").await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        debug!("purge response: {body}");

        Ok(Some(PurgeResponse { status, body }))
    }

    fn add_token_header(&self, req_builder: RequestBuilder) -> Result<RequestBuilder> {
        let bearer = format!("Bearer {}", self.credentials.token);
        Ok(req_builder.header(AUTHORIZATION, sensitive(&bearer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use test_log::test;

    const CREDS: CloudflareCredentials<'static> = CloudflareCredentials {
        zone_id: "zone",
        token: "cf-token",
    };

    #[test(tokio::test)]
    async fn purge_nothing() -> Result<()> {
        let client = Client::new();
        let cf = Cloudflare::new(&client, "http://127.0.0.1:1", CREDS);
        assert_eq!(cf.purge::<&str>(&[]).await?, None);
        Ok(())
    }

    #[test(tokio::test)]
    async fn purge_urls() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/zones/zone/purge_cache")
            .match_header("authorization", "Bearer cf-token")
            .match_body(Matcher::Json(json!({
                "files": ["https://cdn.lykos.ai/update.json", "https://cdn.lykos.ai/sm/a.zip"],
            })))
            .with_status(200)
            .with_body(r#"{"success":true,"result":{"id":"zone"}}"#)
            .create_async()
            .await;

        let client = Client::new();
        let api_url = server.url();
        let cf = Cloudflare::new(&client, &api_url, CREDS);
        let resp = cf
            .purge(&[
                "https://cdn.lykos.ai/update.json",
                "https://cdn.lykos.ai/sm/a.zip",
            ])
            .await?
            .expect("a response");

        m.assert_async().await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body["success"], true);
        Ok(())
    }

    #[test(tokio::test)]
    async fn purge_failure() -> Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/zones/zone/purge_cache")
            .with_status(403)
            .with_body(r#"{"success":false}"#)
            .create_async()
            .await;

        let client = Client::new();
        let api_url = server.url();
        let cf = Cloudflare::new(&client, &api_url, CREDS);
        let err = cf.purge(&["https://cdn.lykos.ai/x"]).await.unwrap_err();
        assert!(err.to_string().contains("403"));
        Ok(())
    }
}
