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

use log::warn;
use pandora_module_utils::pingora::{Error, ErrorType};

use crate::configuration::HttpModeConf;
use crate::settings::{store_from_conf, SettingsStore, SiteInfo};

/// Verifies that the sites are configured for HTTPS, this module is pointless otherwise.
///
/// Any configured site URL has to use HTTPS. Plain HTTP must not be enabled for a site without
/// an HTTPS URL, regardless of whether it is enabled by the configuration or by the settings
/// file. Setting `http_mode_force_activation` skips this check.
pub fn check_activation(conf: &HttpModeConf) -> Result<(), Box<Error>> {
    if conf.http_mode_force_activation {
        warn!("HTTP mode activation forced, HTTPS configuration not verified");
        return Ok(());
    }

    for (_, site) in conf.sites() {
        if let Some(site_url) = &site.site_url {
            if !SiteInfo::from_url(Some(site_url))?.https {
                return Err(Error::explain(
                    ErrorType::InternalError,
                    format!("HTTP mode can only be used with sites configured for HTTPS, site URL is {site_url}"),
                ));
            }
        }
    }

    check_store(store_from_conf(conf)?.as_ref())
}

/// Verifies that plain HTTP is only enabled where the store allows it.
pub(crate) fn check_store(store: &dyn SettingsStore) -> Result<(), Box<Error>> {
    for scope in store.enabled_scopes() {
        if !store.allows_http(&scope) {
            return Err(Error::explain(
                ErrorType::InternalError,
                format!("HTTP mode enabled for {scope:?} but the site isn’t configured for HTTPS"),
            ));
        }
    }
    Ok(())
}
