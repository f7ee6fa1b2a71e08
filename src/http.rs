use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::DicomError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct GetRequest<'a> {
    pub url: &'a str,
    pub bearer_token: &'a str,
    pub accept: Option<&'a str>,
}

/// Blocking GET capability. Transport failures are errors; any HTTP status is a response.
pub trait HttpFetcher: Send + Sync {
    fn get(&self, request: &GetRequest<'_>) -> Result<HttpResponse, DicomError>;
}

#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    max_retries: usize,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, max_retries: usize) -> Result<Self, DicomError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dicom-pull/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DicomError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| DicomError::Network(err.to_string()))?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, DicomError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        tracing::warn!(status, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        tracing::warn!(error = %err, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(DicomError::Network(err.to_string()));
                }
            }
        }
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, request: &GetRequest<'_>) -> Result<HttpResponse, DicomError> {
        let authorization = HeaderValue::from_str(&format!("Bearer {}", request.bearer_token))
            .map_err(|err| DicomError::Authentication(err.to_string()))?;
        let accept = request
            .accept
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|err| DicomError::Network(err.to_string()))?;

        tracing::debug!(url = request.url, "GET");
        let response = self.send_with_retries(|| {
            let builder = self
                .client
                .get(request.url)
                .header(AUTHORIZATION, authorization.clone());
            match &accept {
                Some(value) => builder.header(ACCEPT, value.clone()),
                None => builder,
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|err| DicomError::Network(err.to_string()))?
            .to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve;

    fn get(fetcher: &ReqwestFetcher, url: &str) -> HttpResponse {
        fetcher
            .get(&GetRequest {
                url,
                bearer_token: "tok",
                accept: Some("application/dicom; transfer-syntax=*"),
            })
            .unwrap()
    }

    #[test]
    fn retries_transient_status_until_success() {
        let (url, requests) = serve(vec![
            (503, "busy".to_string()),
            (200, "dicom".to_string()),
        ]);
        let fetcher = ReqwestFetcher::new(Duration::from_secs(5), 2).unwrap();

        let response = get(&fetcher, &url);

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"dicom");
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].contains("Bearer tok"));
        assert!(requests[1].contains("application/dicom; transfer-syntax=*"));
    }

    #[test]
    fn no_retries_returns_first_status() {
        let (url, requests) = serve(vec![(503, "busy".to_string())]);
        let fetcher = ReqwestFetcher::new(Duration::from_secs(5), 0).unwrap();

        let response = get(&fetcher, &url);

        assert_eq!(response.status, 503);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn retries_stop_at_limit() {
        let (url, requests) = serve(vec![
            (500, String::new()),
            (502, String::new()),
            (200, String::new()),
        ]);
        let fetcher = ReqwestFetcher::new(Duration::from_secs(5), 1).unwrap();

        let response = get(&fetcher, &url);

        assert_eq!(response.status, 502);
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn non_retryable_status_is_returned_at_once() {
        let (url, requests) = serve(vec![(404, String::new()), (200, String::new())]);
        let fetcher = ReqwestFetcher::new(Duration::from_secs(5), 3).unwrap();

        assert_eq!(get(&fetcher, &url).status, 404);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn success_is_any_2xx() {
        let response = |status| HttpResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(301).is_success());
        assert!(!response(404).is_success());
    }
}
