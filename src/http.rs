use std::{io::BufRead, time::Duration};

use reqwest::blocking::{Client, Response};
use serde::{Serialize, de::DeserializeOwned};

use crate::{config::HttpConfig, error::Result};

/// Build the single HTTP client shared by every remote backend.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// A JSON-over-HTTP service rooted at one base URL.
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ServiceClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn send<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        Ok(request.send()?.error_for_status()?)
    }

    /// POST a JSON body and decode a JSON response.
    pub fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        Ok(self.send(path, body)?.json()?)
    }

    /// POST a JSON body and feed each server-sent event payload to `on_event`.
    pub fn post_events<B, F>(&self, path: &str, body: &B, on_event: F) -> Result<()>
    where
        B: Serialize + ?Sized,
        F: FnMut(serde_json::Value),
    {
        let response = self.send(path, body)?;
        read_events(std::io::BufReader::new(response), on_event)
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Parse a `text/event-stream` body. Consecutive `data:` lines form one
/// event, which ends at a blank line or at the end of the body. Empty
/// payloads and the `[DONE]` marker are ignored.
pub fn read_events<R, F>(reader: R, mut on_event: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(serde_json::Value),
{
    let mut data = String::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            dispatch(&mut data, &mut on_event)?;
            continue;
        }
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        if !data.is_empty() {
            data.push('\n');
        }
        data.push_str(value.strip_prefix(' ').unwrap_or(value));
    }
    dispatch(&mut data, &mut on_event)
}

fn dispatch<F>(data: &mut String, on_event: &mut F) -> Result<()>
where
    F: FnMut(serde_json::Value),
{
    let payload = std::mem::take(data);
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(());
    }
    on_event(serde_json::from_str(payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slashes() {
        let client = ServiceClient::new(
            Client::new(),
            "http://localhost:8080/",
            None,
        );
        assert_eq!(client.url("/v1/chat"), "http://localhost:8080/v1/chat");
        assert_eq!(client.url("v1/chat"), "http://localhost:8080/v1/chat");
    }

    #[test]
    fn reads_data_lines_only() {
        let body = "event: message\n\
                    data: {\"text\": \"Hel\"}\n\
                    \n\
                    : keep-alive\n\
                    data: {\"text\": \"lo\"}\n\
                    \n\
                    data: [DONE]\n";

        let mut texts = Vec::new();
        read_events(body.as_bytes(), |event| {
            texts.push(event["text"].as_str().unwrap_or_default().to_string());
        })
        .unwrap();

        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[test]
    fn data_lines_of_one_event_are_joined() {
        let body = "data: {\"text\":\n\
                    data:  \"split\"}\n\
                    \n\
                    data: {\"text\": \"last\"}";

        let mut texts = Vec::new();
        read_events(body.as_bytes(), |event| {
            texts.push(event["text"].as_str().unwrap_or_default().to_string());
        })
        .unwrap();

        assert_eq!(texts, vec!["split", "last"]);
    }

    #[test]
    fn malformed_event_is_an_error() {
        let body = "data: {not json}\n";
        assert!(read_events(body.as_bytes(), |_| {}).is_err());
    }
}
