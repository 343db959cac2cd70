//! Server credentials.
//!
//! Only HTTP Basic is produced; other schemes go through caller-supplied
//! `Authorization` headers untouched.

use base64::{engine::general_purpose, Engine as _};
use http::HeaderValue;
use percent_encoding::percent_decode_str;
use url::Url;

/// Username and password for Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Generate the Authorization header value.
    pub fn to_header_value(&self) -> HeaderValue {
        let creds = format!("{}:{}", self.username, self.password);
        let encoded = general_purpose::STANDARD.encode(creds);
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
        value.set_sensitive(true);
        value
    }
}

/// Split userinfo out of a URL.
///
/// Returns the URL without credentials and the decoded credentials, if the
/// URL carried a username.
pub fn extract_credentials(url: &Url) -> (Url, Option<Credentials>) {
    if url.username().is_empty() && url.password().is_none() {
        return (url.clone(), None);
    }

    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
    let credentials =
        Credentials::new(decode(url.username()), decode(url.password().unwrap_or("")));

    let mut stripped = url.clone();
    // Only fails for cannot-be-a-base URLs, which carry no userinfo.
    let _ = stripped.set_username("");
    let _ = stripped.set_password(None);
    (stripped, Some(credentials))
}
