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

use async_trait::async_trait;
use http::{header, HeaderName, HeaderValue, Method};
use log::{debug, trace};
use pandora_module_utils::pingora::{Error, ErrorType, ResponseHeader, SessionWrapper};
use pandora_module_utils::{RequestFilter, RequestFilterResult};
use std::borrow::Cow;
use std::sync::Arc;

use crate::activation::check_store;
use crate::configuration::HttpModeConf;
use crate::rewrite::{rewrite_url, select_robots_text};
use crate::scheme::{detect, EffectiveScheme, RequestSignals};
use crate::settings::{get_options, store_from_conf, SettingsStore, SiteSettings, StoredSettings};

/// Scheme and site settings determined for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestState {
    /// Effective scheme of the request
    pub scheme: EffectiveScheme,
    /// Settings of the site the request belongs to
    pub settings: SiteSettings,
}

/// Handler for Pingora’s `request_filter` and `response_filter` phases
#[derive(Debug, Clone)]
pub struct HttpModeHandler {
    store: Arc<dyn SettingsStore>,
    proxy_header: HeaderName,
    robots_path: String,
}

impl PartialEq for HttpModeHandler {
    fn eq(&self, _other: &Self) -> bool {
        // Settings stores cannot be compared
        false
    }
}

impl Eq for HttpModeHandler {}

impl TryFrom<HttpModeConf> for HttpModeHandler {
    type Error = Box<Error>;

    fn try_from(conf: HttpModeConf) -> Result<Self, Self::Error> {
        debug!("HTTP mode configuration received: {conf:#?}");

        let proxy_header =
            HeaderName::try_from(conf.http_mode_proxy_header.as_str()).map_err(|err| {
                Error::because(
                    ErrorType::InternalError,
                    format!("invalid proxy header name {}", conf.http_mode_proxy_header),
                    err,
                )
            })?;

        let store = store_from_conf(&conf)?;
        trace!("Settings store: {store:?}");
        check_store(store.as_ref())?;

        Ok(Self {
            store,
            proxy_header,
            robots_path: conf.http_mode_robots_path,
        })
    }
}

impl HttpModeHandler {
    /// Determines scheme and site settings for a request
    pub fn request_state(&self, session: &impl SessionWrapper) -> RequestState {
        let signals = RequestSignals::from_session(session, &self.proxy_header);
        let scheme = detect(&signals);

        let scope = self.store.scope_for(session.host().as_deref());
        let settings = get_options(self.store.as_ref(), &scope, self.store.site_path(&scope));
        trace!("Settings for {scope:?}: {settings:?}, scheme {scheme:?}");

        RequestState { scheme, settings }
    }

    /// Adjusts a site URL generated while processing the request, e.g. by a custom handler.
    pub fn rewrite_url_for<'a>(
        &self,
        session: &impl SessionWrapper,
        url: &'a str,
    ) -> Cow<'a, str> {
        let state = self.request_state(session);
        rewrite_url(url, &state.settings, state.scheme)
    }

    /// Stores new settings for a host, or the global settings if `host` is `None`. Returns
    /// `false` if the settings could not be stored.
    pub fn save_settings(&self, host: Option<&str>, settings: StoredSettings) -> bool {
        let scope = self.store.scope_for(host);
        self.store.save(&scope, settings)
    }

    async fn send_robots(
        &self,
        session: &mut impl SessionWrapper,
        text: &str,
    ) -> Result<(), Box<Error>> {
        let mut header = ResponseHeader::build(200, Some(2))?;
        header.insert_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")?;
        header.insert_header(header::CONTENT_LENGTH, text.len().to_string())?;

        let send_body = session.req_header().method != Method::HEAD;
        session
            .write_response_header(Box::new(header), !send_body)
            .await?;

        if send_body {
            session
                .write_response_body(Some(text.to_owned().into()), true)
                .await?;
        }
        Ok(())
    }
}

fn rewrite_header(response: &mut ResponseHeader, name: HeaderName, state: &RequestState) {
    let mut changed = false;
    let values: Vec<HeaderValue> = response
        .headers
        .get_all(&name)
        .iter()
        .map(|value| {
            let rewritten = value
                .to_str()
                .map(|value| rewrite_url(value, &state.settings, state.scheme));
            match rewritten {
                Ok(Cow::Owned(rewritten)) => match HeaderValue::try_from(rewritten) {
                    Ok(rewritten) => {
                        changed = true;
                        rewritten
                    }
                    Err(_) => value.clone(),
                },
                _ => value.clone(),
            }
        })
        .collect();

    if !changed {
        return;
    }

    trace!("Rewriting {name} response header to {values:?}");
    response.remove_header(&name);
    for value in values {
        // Values were valid before, ignore errors.
        let _ = response.append_header(name.clone(), value);
    }
}

#[async_trait]
impl RequestFilter for HttpModeHandler {
    type Conf = HttpModeConf;

    type CTX = Option<RequestState>;

    fn new_ctx() -> Self::CTX {
        None
    }

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let state = self.request_state(session);

        let is_robots = session.uri().path() == self.robots_path
            && [Method::GET, Method::HEAD].contains(&session.req_header().method);
        if is_robots && state.settings.http_enabled {
            trace!("Serving robots.txt for {} request", state.scheme.as_str());
            let text = select_robots_text("", &state.settings, state.scheme);
            self.send_robots(session, &text).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }

        session.extensions_mut().insert(state);
        Ok(RequestFilterResult::Unhandled)
    }

    fn request_filter_done(
        &self,
        session: &mut impl SessionWrapper,
        ctx: &mut Self::CTX,
        result: RequestFilterResult,
    ) {
        if result != RequestFilterResult::ResponseSent {
            // Keep request state for the response_filter phase
            if let Some(state) = session.extensions_mut().remove::<RequestState>() {
                *ctx = Some(state);
            }
        }
    }

    fn response_filter(
        &self,
        session: &mut impl SessionWrapper,
        response: &mut ResponseHeader,
        ctx: Option<&mut <Self as RequestFilter>::CTX>,
    ) {
        let state = match ctx {
            Some(Some(state)) => state.clone(),
            _ => match session.extensions().get::<RequestState>() {
                Some(state) => state.clone(),
                None => return,
            },
        };

        if !state.settings.http_enabled || state.scheme != EffectiveScheme::Plaintext {
            return;
        }

        rewrite_header(response, header::LOCATION, &state);
        rewrite_header(response, header::CONTENT_LOCATION, &state);
    }
}
