//! Canonical room URL encoding.
//!
//! Format: `<base>?push=<push_id>[&audience=<audience>]`. An empty audience
//! is encoded by omitting the parameter; `audience=` with no value is not
//! canonical and does not decode.

use crate::error::{LinkError, Result};
use crate::link::{is_unreserved, CanonicalUrl, RoomLink, MAX_FIELD_LEN};

pub const CODEC_VERSION: u32 = 1;
pub const DEFAULT_BASE_ENDPOINT: &str = "https://vdo.ninja/";

const PUSH_PARAM: &str = "push";
const AUDIENCE_PARAM: &str = "audience";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCodec {
    base: String,
}

impl LinkCodec {
    pub fn new(base_endpoint: &str) -> Result<Self> {
        validate_base(base_endpoint)?;
        Ok(Self {
            base: base_endpoint.to_owned(),
        })
    }

    pub fn base_endpoint(&self) -> &str {
        &self.base
    }

    pub fn encode(&self, link: &RoomLink) -> CanonicalUrl {
        let mut url = format!("{}?{}={}", self.base, PUSH_PARAM, link.push_id());
        if link.has_audience() {
            url.push('&');
            url.push_str(AUDIENCE_PARAM);
            url.push('=');
            url.push_str(link.audience());
        }
        CanonicalUrl::from_canonical(url)
    }

    pub fn decode(&self, url: &CanonicalUrl) -> Result<RoomLink> {
        self.decode_str(url.as_str())
    }

    /// Validates arbitrary text (e.g. read back from disk) as a URL this codec
    /// produces.
    pub fn parse(&self, raw: &str) -> Result<CanonicalUrl> {
        let link = self.decode_str(raw)?;
        Ok(self.encode(&link))
    }

    fn decode_str(&self, raw: &str) -> Result<RoomLink> {
        let query = raw
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('?'))
            .ok_or_else(|| malformed("unexpected base endpoint"))?;

        let mut params = query.split('&');
        let push_id = match params.next().and_then(|p| p.split_once('=')) {
            Some((PUSH_PARAM, value)) => value,
            _ => return Err(malformed("first parameter must be push")),
        };
        let audience = match params.next() {
            None => "",
            Some(param) => match param.split_once('=') {
                Some((AUDIENCE_PARAM, value)) if !value.is_empty() => value,
                Some((AUDIENCE_PARAM, _)) => return Err(malformed("empty audience parameter")),
                _ => return Err(malformed("unexpected parameter")),
            },
        };
        if params.next().is_some() {
            return Err(malformed("unexpected parameter"));
        }

        check_value(PUSH_PARAM, push_id)?;
        if push_id.is_empty() {
            return Err(malformed("empty push parameter"));
        }
        check_value(AUDIENCE_PARAM, audience)?;

        RoomLink::new(push_id, audience).map_err(|e| malformed(&e.to_string()))
    }
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_ENDPOINT.to_owned(),
        }
    }
}

fn check_value(name: &str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_LEN || !value.chars().all(is_unreserved) {
        return Err(malformed(&format!("invalid characters in {name}")));
    }
    Ok(())
}

fn validate_base(base: &str) -> Result<()> {
    let host = base
        .strip_prefix("https://")
        .ok_or_else(|| LinkError::Settings("base endpoint must use https".into()))?;
    if !base.ends_with('/') || host.len() <= 1 {
        return Err(LinkError::Settings(
            "base endpoint must name a host and end with '/'".into(),
        ));
    }
    if base.contains(['?', '#', '&']) || base.chars().any(char::is_whitespace) {
        return Err(LinkError::Settings(
            "base endpoint must not carry a query or fragment".into(),
        ));
    }
    Ok(())
}

// Keep the offending URL out of the message: it holds the secret.
fn malformed(reason: &str) -> LinkError {
    LinkError::MalformedUrl(reason.to_owned())
}
