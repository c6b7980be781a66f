pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::error::FetchError;
use async_trait::async_trait;

pub use self::http_client::HttpClient;

// ── Transport trait ───────────────────────────────────────────────────────────

/// Status and body of one exchange. A non-2xx status is not an error here;
/// each pipeline decides whether it is fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a successful response, `FetchError::Status` otherwise.
    pub fn into_success_body(self, url: &str) -> Result<String, FetchError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(FetchError::Status { url: url.to_string(), status: self.status })
        }
    }
}

/// Swappable fetch capability.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<RawResponse, FetchError>;

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&'static str, String)],
    ) -> Result<RawResponse, FetchError>;
}

/// Join a base URL and a path segment with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalises_slashes() {
        assert_eq!(join_url("https://x.org/a/", "YF"), "https://x.org/a/YF");
        assert_eq!(join_url("https://x.org/a", "/YF"), "https://x.org/a/YF");
    }

    #[test]
    fn non_success_body_is_a_status_error() {
        let resp = RawResponse { status: 503, body: "down".into() };
        match resp.into_success_body("http://u") {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 503),
            other => panic!("unexpected {:?}", other),
        }
    }
}
