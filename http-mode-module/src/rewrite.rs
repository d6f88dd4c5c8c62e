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

//! Rewriting of site URLs and robots.txt contents for plain HTTP requests.

use log::trace;
use std::borrow::Cow;
use url::Url;

use crate::scheme::EffectiveScheme;
use crate::settings::SiteSettings;

const HTTPS_PREFIX: &str = "https://";
const HTTP_PREFIX: &str = "http://";

/// Produces the URL that should be presented to the client.
///
/// URLs are only changed if plain HTTP is enabled for the site and the request arrived via plain
/// HTTP. In that case an `https://` prefix is replaced by `http://`, everything else is left
/// untouched. URLs that cannot be parsed are returned unchanged.
pub fn rewrite_url<'a>(
    candidate: &'a str,
    settings: &SiteSettings,
    scheme: EffectiveScheme,
) -> Cow<'a, str> {
    if !settings.http_enabled || scheme != EffectiveScheme::Plaintext {
        return Cow::Borrowed(candidate);
    }

    match Url::parse(candidate) {
        Ok(url) if url.scheme() == "https" => {}
        _ => return Cow::Borrowed(candidate),
    }

    if let Some(rest) = candidate.strip_prefix(HTTPS_PREFIX) {
        let rewritten = format!("{HTTP_PREFIX}{rest}");
        trace!("Rewrote URL {candidate} to {rewritten}");
        Cow::Owned(rewritten)
    } else {
        Cow::Borrowed(candidate)
    }
}

/// Produces the robots.txt document for a request.
///
/// If plain HTTP isn’t enabled, `base_output` is the response. Otherwise a new document is
/// composed from the rules configured for the request’s scheme.
pub fn select_robots_text<'a>(
    base_output: &'a str,
    settings: &SiteSettings,
    scheme: EffectiveScheme,
) -> Cow<'a, str> {
    if !settings.http_enabled {
        return Cow::Borrowed(base_output);
    }

    let body = match scheme {
        EffectiveScheme::Plaintext => &settings.http_robots_text,
        EffectiveScheme::Encrypted => &settings.https_robots_text,
    };

    Cow::Owned(format!(
        "# robots.txt generated by {}\n# mode: {}\n\n{body}",
        env!("CARGO_PKG_NAME"),
        scheme.as_str()
    ))
}

/// robots.txt rules for plain HTTP requests: keeps crawlers out of the administration area and
/// temporary files below `site_path`.
pub fn default_http_robots(site_path: &str) -> String {
    format!(
        "User-agent: *\n\
        Disallow: {site_path}admin/\n\
        Disallow: {site_path}tmp/\n\
        Allow: {site_path}admin/ajax\n"
    )
}

/// robots.txt rules for HTTPS requests: the encrypted mirror shouldn’t be indexed at all.
pub fn default_https_robots() -> String {
    "User-agent: *\nDisallow: /\n".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn enabled() -> SiteSettings {
        SiteSettings {
            http_enabled: true,
            http_robots_text: default_http_robots("/"),
            https_robots_text: default_https_robots(),
        }
    }

    fn disabled() -> SiteSettings {
        SiteSettings {
            http_enabled: false,
            ..enabled()
        }
    }

    #[test]
    fn url_rewritten() {
        let settings = enabled();
        assert_eq!(
            rewrite_url(
                "https://example.com/page?x=1",
                &settings,
                EffectiveScheme::Plaintext
            ),
            "http://example.com/page?x=1"
        );
        assert_eq!(
            rewrite_url(
                "https://example.com:8443/blog/#top",
                &settings,
                EffectiveScheme::Plaintext
            ),
            "http://example.com:8443/blog/#top"
        );
    }

    #[test]
    fn url_unchanged() {
        let settings = enabled();
        for url in [
            "http://example.com/",
            "/relative/path",
            "",
            "not a url",
            "ftp://example.com/",
            // Only the lower-case prefix is replaced
            "HTTPS://example.com/",
        ] {
            assert_eq!(
                rewrite_url(url, &settings, EffectiveScheme::Plaintext),
                url,
                "URL {url:?}"
            );
        }

        assert_eq!(
            rewrite_url(
                "https://example.com/",
                &settings,
                EffectiveScheme::Encrypted
            ),
            "https://example.com/"
        );
        assert_eq!(
            rewrite_url(
                "https://example.com/",
                &disabled(),
                EffectiveScheme::Plaintext
            ),
            "https://example.com/"
        );
    }

    #[test]
    fn url_scheme_only() {
        let settings = enabled();
        let url = "https://example.com/redirect?to=https://example.net/";
        assert_eq!(
            rewrite_url(url, &settings, EffectiveScheme::Plaintext),
            "http://example.com/redirect?to=https://example.net/"
        );
    }

    #[test]
    fn url_idempotent() {
        let settings = enabled();
        let once = rewrite_url(
            "https://example.com/a",
            &settings,
            EffectiveScheme::Plaintext,
        )
        .into_owned();
        let twice = rewrite_url(&once, &settings, EffectiveScheme::Plaintext);
        assert_eq!(twice, once);
        assert!(matches!(twice, Cow::Borrowed(_)));
    }

    #[test]
    fn robots_disabled() {
        let settings = disabled();
        for base in ["", "User-agent: *\nAllow: /\n", "garbage\0"] {
            for scheme in [EffectiveScheme::Plaintext, EffectiveScheme::Encrypted] {
                assert_eq!(select_robots_text(base, &settings, scheme), base);
            }
        }
    }

    #[test]
    fn robots_plaintext() {
        let settings = enabled();
        assert_eq!(
            select_robots_text("ignored", &settings, EffectiveScheme::Plaintext),
            "# robots.txt generated by http-mode-module\n\
            # mode: http\n\
            \n\
            User-agent: *\n\
            Disallow: /admin/\n\
            Disallow: /tmp/\n\
            Allow: /admin/ajax\n"
        );
    }

    #[test]
    fn robots_encrypted() {
        let settings = SiteSettings {
            https_robots_text: "User-agent: *\nDisallow: /private/".to_owned(),
            ..enabled()
        };
        assert_eq!(
            select_robots_text("ignored", &settings, EffectiveScheme::Encrypted),
            "# robots.txt generated by http-mode-module\n\
            # mode: https\n\
            \n\
            User-agent: *\n\
            Disallow: /private/"
        );
    }

    #[test]
    fn default_texts() {
        assert_eq!(
            default_http_robots("/blog/"),
            "User-agent: *\nDisallow: /blog/admin/\nDisallow: /blog/tmp/\nAllow: /blog/admin/ajax\n"
        );
        assert_eq!(default_https_robots(), "User-agent: *\nDisallow: /\n");
    }
}
