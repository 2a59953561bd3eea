use crate::error::{Result, WatchdogError};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("wp-watchdog/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retries: u32,
    timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: Self::build_client(DEFAULT_TIMEOUT),
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn build_client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = Self::build_client(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET a JSON document, retrying transport errors and 5xx answers with a
    /// short exponential pause. 4xx answers are returned immediately.
    pub async fn get_json<T>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json().await.map_err(|e| WatchdogError::Http {
                        url: url.to_string(),
                        source: e,
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let error = WatchdogError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    if !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => WatchdogError::Http {
                    url: url.to_string(),
                    source: e,
                },
            };

            if attempt >= self.retries {
                return Err(error);
            }

            tracing::debug!(url, attempt, error = %error, "Retrying request");
            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            attempt += 1;
        }
    }

    /// POST a raw body once and report the response status. Retrying is the
    /// caller's business.
    pub async fn post_body(
        &self,
        url: &str,
        body: String,
        headers: &BTreeMap<String, String>,
    ) -> Result<u16> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| WatchdogError::Http {
            url: url.to_string(),
            source: e,
        })?;

        Ok(response.status().as_u16())
    }

    /// Single GET whose body is ignored. Anything but a 2xx answer is an
    /// error, so a rejected key is not mistaken for a triggered run.
    pub async fn ping(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WatchdogError::Http {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WatchdogError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
