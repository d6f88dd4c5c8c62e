// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Determines which scheme a request has effectively been made with.

use http::HeaderName;
use log::trace;
use pandora_module_utils::pingora::SessionWrapper;

/// Scheme the client used to reach the site, as opposed to the scheme of the connection the
/// server received the request on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveScheme {
    /// Request arrived without transport encryption
    Plaintext,
    /// Request arrived encrypted or the scheme could not be determined
    Encrypted,
}

impl EffectiveScheme {
    /// Scheme name as used in URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "http",
            Self::Encrypted => "https",
        }
    }
}

/// Raw request values that the effective scheme is derived from
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestSignals {
    /// Value of the header set by the reverse proxy. This is `Some` whenever the header is
    /// present, an empty string if its value isn’t valid UTF-8.
    pub proxy_proto: Option<String>,

    /// Scheme the server received the request with: `https` for TLS connections, otherwise the
    /// scheme of an absolute request URI, otherwise `http` for plain connections.
    pub native_scheme: Option<String>,
}

impl RequestSignals {
    /// Extracts the signals from a session. `proxy_header` is the name of the header that a
    /// trusted reverse proxy puts the original protocol into.
    pub fn from_session(session: &impl SessionWrapper, proxy_header: &HeaderName) -> Self {
        let proxy_proto = session
            .req_header()
            .headers
            .get(proxy_header)
            .map(|value| value.to_str().unwrap_or_default().to_owned());

        let tls = session
            .digest()
            .map(|digest| digest.ssl_digest.is_some());
        let native_scheme = match (tls, session.req_header().uri.scheme_str()) {
            (Some(true), _) => Some("https".to_owned()),
            (_, Some(scheme)) => Some(scheme.to_owned()),
            (Some(false), None) => Some("http".to_owned()),
            (None, None) => None,
        };

        let signals = Self {
            proxy_proto,
            native_scheme,
        };
        trace!("Request scheme signals: {signals:?}");
        signals
    }
}

fn is_http(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.eq_ignore_ascii_case("http"))
}

/// Decides whether a request arrived via plain HTTP.
///
/// The proxy header wins whenever it is present. Only without it will the native scheme be
/// considered. Anything that cannot be recognized as `http` counts as encrypted.
pub fn detect(signals: &RequestSignals) -> EffectiveScheme {
    let plaintext = match signals.proxy_proto.as_deref() {
        Some(proto) => is_http(Some(proto)),
        None => is_http(signals.native_scheme.as_deref()),
    };

    if plaintext {
        EffectiveScheme::Plaintext
    } else {
        EffectiveScheme::Encrypted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pandora_module_utils::pingora::{RequestHeader, TestSession};
    use test_log::test;

    fn signals(proxy_proto: Option<&str>, native_scheme: Option<&str>) -> RequestSignals {
        RequestSignals {
            proxy_proto: proxy_proto.map(|s| s.to_owned()),
            native_scheme: native_scheme.map(|s| s.to_owned()),
        }
    }

    #[test]
    fn proxy_header() {
        assert_eq!(
            detect(&signals(Some("http"), Some("https"))),
            EffectiveScheme::Plaintext
        );
        assert_eq!(
            detect(&signals(Some("Http"), None)),
            EffectiveScheme::Plaintext
        );
        assert_eq!(
            detect(&signals(Some("HTTP"), Some("https"))),
            EffectiveScheme::Plaintext
        );
        assert_eq!(
            detect(&signals(Some("https"), Some("http"))),
            EffectiveScheme::Encrypted
        );
    }

    #[test]
    fn proxy_header_wins_when_present() {
        // Unrecognized proxy values never fall back to the native scheme
        assert_eq!(
            detect(&signals(Some(""), Some("http"))),
            EffectiveScheme::Encrypted
        );
        assert_eq!(
            detect(&signals(Some("ftp"), Some("http"))),
            EffectiveScheme::Encrypted
        );
    }

    #[test]
    fn native_scheme() {
        assert_eq!(
            detect(&signals(None, Some("http"))),
            EffectiveScheme::Plaintext
        );
        assert_eq!(
            detect(&signals(None, Some("HTTP"))),
            EffectiveScheme::Plaintext
        );
        assert_eq!(
            detect(&signals(None, Some("HTTPS"))),
            EffectiveScheme::Encrypted
        );
    }

    #[test]
    fn no_signals() {
        assert_eq!(detect(&signals(None, None)), EffectiveScheme::Encrypted);
        assert_eq!(
            detect(&RequestSignals::default()),
            EffectiveScheme::Encrypted
        );
    }

    #[test]
    fn scheme_names() {
        assert_eq!(EffectiveScheme::Plaintext.as_str(), "http");
        assert_eq!(EffectiveScheme::Encrypted.as_str(), "https");
    }

    #[test(tokio::test)]
    async fn from_session() {
        let proxy_header = HeaderName::from_static("x-forwarded-proto");

        let header = RequestHeader::build("GET", b"/", None).unwrap();
        let mut session = TestSession::from(header).await;
        assert_eq!(
            RequestSignals::from_session(&session, &proxy_header).proxy_proto,
            None
        );

        session
            .req_header_mut()
            .insert_header("X-Forwarded-Proto", "HTTP")
            .unwrap();
        let signals = RequestSignals::from_session(&session, &proxy_header);
        assert_eq!(signals.proxy_proto.as_deref(), Some("HTTP"));
        assert_eq!(detect(&signals), EffectiveScheme::Plaintext);

        let other_header = HeaderName::from_static("x-edge-proto");
        assert_eq!(
            RequestSignals::from_session(&session, &other_header).proxy_proto,
            None
        );
    }

    #[test(tokio::test)]
    async fn from_session_absolute_uri() {
        let proxy_header = HeaderName::from_static("x-forwarded-proto");

        let header = RequestHeader::build("GET", b"http://example.com/robots.txt", None).unwrap();
        let session = TestSession::from(header).await;
        let signals = RequestSignals::from_session(&session, &proxy_header);
        assert_eq!(signals.proxy_proto, None);
        assert_eq!(signals.native_scheme.as_deref(), Some("http"));
        assert_eq!(detect(&signals), EffectiveScheme::Plaintext);

        let header = RequestHeader::build("GET", b"https://example.com/robots.txt", None).unwrap();
        let session = TestSession::from(header).await;
        let signals = RequestSignals::from_session(&session, &proxy_header);
        assert_eq!(signals.native_scheme.as_deref(), Some("https"));
        assert_eq!(detect(&signals), EffectiveScheme::Encrypted);

        // The proxy header still takes precedence
        let header = RequestHeader::build("GET", b"https://example.com/robots.txt", None).unwrap();
        let mut session = TestSession::from(header).await;
        session
            .req_header_mut()
            .insert_header("X-Forwarded-Proto", "http")
            .unwrap();
        assert_eq!(
            detect(&RequestSignals::from_session(&session, &proxy_header)),
            EffectiveScheme::Plaintext
        );
    }
}
