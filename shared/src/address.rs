//! Connection address builder
//!
//! Turns an HTTP(S) base address and a bearer token into the streaming
//! endpoint URI: `http → ws`, `https → wss`, fixed path, token in the query.

use crate::defaults;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use url::Url;

/// Characters left untouched when encoding a URI component
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors that can occur while building a connection address
#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid base address: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("Unsupported scheme: {0} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("Base address has no host")]
    MissingHost,
}

/// Builds connection URIs from a base address and a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBuilder {
    /// Endpoint path that replaces the base address path
    pub path: String,
    /// Query parameter name for the token
    pub token_param: String,
}

impl Default for AddressBuilder {
    fn default() -> Self {
        Self {
            path: defaults::CONNECT_PATH.into(),
            token_param: defaults::TOKEN_PARAM.into(),
        }
    }
}

impl AddressBuilder {
    /// Build the connection URI for `base` carrying `token`
    pub fn build(&self, base: &str, token: &str) -> Result<Url, AddressError> {
        let mut url = Url::parse(base)?;

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };
        if url.host_str().is_none() {
            return Err(AddressError::MissingHost);
        }
        url.set_scheme(scheme)
            .map_err(|_| AddressError::UnsupportedScheme(url.scheme().to_string()))?;

        url.set_path(&self.path);
        url.set_fragment(None);
        let query = format!(
            "{}={}",
            self.token_param,
            utf8_percent_encode(token, URI_COMPONENT)
        );
        url.set_query(Some(&query));

        Ok(url)
    }
}
