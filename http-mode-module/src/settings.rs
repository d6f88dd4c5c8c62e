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

//! Storage of site settings.
//!
//! Settings are either shared by all hosts ([`GlobalSettingsStore`]) or kept per host
//! ([`HostSettingsStore`]). Which one is used is decided once when the handler is created,
//! everything else accesses settings through the [`SettingsStore`] trait.

use log::{debug, trace, warn};
use pandora_module_utils::pingora::{Error, ErrorType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use url::Url;

use crate::configuration::{HttpModeConf, SettingsScope, SiteConf};
use crate::rewrite::{default_http_robots, default_https_robots};

/// Site settings as persisted. Missing robots.txt rules are replaced by defaults when the
/// settings are resolved.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
    /// Whether plain HTTP access is enabled
    pub enabled: bool,
    /// robots.txt rules for plain HTTP requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_robots: Option<String>,
    /// robots.txt rules for HTTPS requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_robots: Option<String>,
}

impl From<&SiteConf> for StoredSettings {
    fn from(conf: &SiteConf) -> Self {
        Self {
            enabled: conf.http_enabled,
            http_robots: conf.http_robots.clone(),
            https_robots: conf.https_robots.clone(),
        }
    }
}

/// Resolved settings of a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    /// If `true`, URLs and robots.txt will be adjusted for plain HTTP requests
    pub http_enabled: bool,
    /// robots.txt rules for plain HTTP requests
    pub http_robots_text: String,
    /// robots.txt rules for HTTPS requests
    pub https_robots_text: String,
}

impl SiteSettings {
    /// Resolves stored settings, filling in defaults for anything missing
    pub fn resolve(stored: Option<StoredSettings>, site_path: &str) -> Self {
        let stored = stored.unwrap_or_default();
        Self {
            http_enabled: stored.enabled,
            http_robots_text: stored
                .http_robots
                .unwrap_or_else(|| default_http_robots(site_path)),
            https_robots_text: stored.https_robots.unwrap_or_else(default_https_robots),
        }
    }
}

/// Key that settings are stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SiteScope {
    /// Settings shared by all hosts, or default settings with per-host storage
    Global,
    /// Settings of a particular host, the host name is normalized
    Host(String),
}

/// Read/write access to site settings
pub trait SettingsStore: Debug + Send + Sync {
    /// Determines the scope that a request for the given host belongs to
    fn scope_for(&self, host: Option<&str>) -> SiteScope;

    /// Path of the site within its host, always starting and ending with `/`
    fn site_path(&self, scope: &SiteScope) -> &str;

    /// Checks whether plain HTTP may be enabled for a scope. This requires the site to be
    /// configured for HTTPS unless activation has been forced.
    fn allows_http(&self, scope: &SiteScope) -> bool;

    /// Lists the scopes that currently have plain HTTP enabled
    fn enabled_scopes(&self) -> Vec<SiteScope>;

    /// Retrieves the stored settings of a scope if there are any
    fn load(&self, scope: &SiteScope) -> Option<StoredSettings>;

    /// Replaces the settings of a scope. Returns `false` if the settings could not be stored,
    /// also if plain HTTP isn’t allowed for the scope.
    fn save(&self, scope: &SiteScope, settings: StoredSettings) -> bool;
}

/// Retrieves the settings of a scope, using defaults for anything not stored
pub fn get_options(
    store: &dyn SettingsStore,
    scope: &SiteScope,
    site_path: &str,
) -> SiteSettings {
    SiteSettings::resolve(store.load(scope), site_path)
}

/// YAML file that settings are persisted in
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    /// Creates a settings file helper for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the settings file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file contents. A missing file isn’t an error and produces `None`.
    pub fn load<T: DeserializeOwned + Debug>(&self) -> Result<Option<T>, Box<Error>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("Settings file {:?} doesn’t exist yet", self.path);
                return Ok(None);
            }
            Err(err) => {
                return Err(Error::because(
                    ErrorType::FileOpenError,
                    format!("failed opening settings file {:?}", self.path),
                    err,
                ))
            }
        };

        let settings = serde_yaml::from_reader(BufReader::new(file)).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading settings file {:?}", self.path),
                err,
            )
        })?;
        trace!("Loaded settings file: {settings:#?}");
        Ok(Some(settings))
    }

    /// Replaces the file contents. The data is written to a temporary file next to the settings
    /// file first which then replaces the settings file, so that it is never partially written.
    pub fn save<T: Serialize>(&self, settings: &T) -> Result<(), Box<Error>> {
        let contents = serde_yaml::to_string(settings).map_err(|err| {
            Error::because(
                ErrorType::InternalError,
                "failed serializing settings",
                err,
            )
        })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(|err| {
            Error::because(
                ErrorType::FileCreateError,
                format!("failed creating temporary file in {dir:?}"),
                err,
            )
        })?;
        file.write_all(contents.as_bytes()).map_err(|err| {
            Error::because(
                ErrorType::FileWriteError,
                format!("failed writing temporary file {:?}", file.path()),
                err,
            )
        })?;
        file.persist(&self.path).map_err(|err| {
            Error::because(
                ErrorType::FileWriteError,
                format!("failed replacing settings file {:?}", self.path),
                err.error,
            )
        })?;
        Ok(())
    }
}

/// Properties of a site derived from its configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteInfo {
    /// Path of the site within its host, always starting and ending with `/`
    pub path: String,
    /// `true` if the site URL uses HTTPS
    pub https: bool,
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            path: "/".to_owned(),
            https: false,
        }
    }
}

impl SiteInfo {
    /// Derives site properties from the site URL, defaults are used if there is none.
    pub fn from_url(site_url: Option<&str>) -> Result<Self, Box<Error>> {
        let Some(site_url) = site_url else {
            return Ok(Self::default());
        };

        let url = Url::parse(site_url).map_err(|err| {
            Error::because(
                ErrorType::InternalError,
                format!("invalid site URL {site_url}"),
                err,
            )
        })?;

        let path = url.path();
        let mut result = String::with_capacity(path.len() + 2);
        if !path.starts_with('/') {
            result.push('/');
        }
        result.push_str(path);
        if !result.ends_with('/') {
            result.push('/');
        }

        Ok(Self {
            path: result,
            https: url.scheme() == "https",
        })
    }
}

/// Normalizes a host name for lookup: lower-cased and without port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if host.starts_with('[') {
        // IPv6 address, keep the brackets and drop anything after them
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
            _ => host,
        }
    };
    host.to_ascii_lowercase()
}

fn normalize_hosts<V>(map: HashMap<String, V>) -> Result<HashMap<String, V>, Box<Error>> {
    let mut result = HashMap::with_capacity(map.len());
    let mut names = HashMap::with_capacity(map.len());
    for (host, value) in map {
        let key = normalize_host(&host);
        if let Some(other) = names.insert(key.clone(), host.clone()) {
            return Err(Error::explain(
                ErrorType::InternalError,
                format!("host names {other:?} and {host:?} refer to the same site"),
            ));
        }
        result.insert(key, value);
    }
    Ok(result)
}

/// Settings store shared by all hosts
#[derive(Debug)]
pub struct GlobalSettingsStore {
    site: SiteInfo,
    force: bool,
    settings: RwLock<Option<StoredSettings>>,
    file: Option<SettingsFile>,
}

impl GlobalSettingsStore {
    /// Creates a store with initial settings. If a settings file is given and exists, its
    /// contents replace the initial settings. With `force` set plain HTTP is allowed even if the
    /// site isn’t configured for HTTPS.
    pub fn new(
        site: SiteInfo,
        settings: Option<StoredSettings>,
        file: Option<SettingsFile>,
        force: bool,
    ) -> Result<Self, Box<Error>> {
        let settings = match &file {
            Some(file) => file.load()?.or(settings),
            None => settings,
        };

        Ok(Self {
            site,
            force,
            settings: RwLock::new(settings),
            file,
        })
    }
}

impl SettingsStore for GlobalSettingsStore {
    fn scope_for(&self, _host: Option<&str>) -> SiteScope {
        SiteScope::Global
    }

    fn site_path(&self, _scope: &SiteScope) -> &str {
        &self.site.path
    }

    fn allows_http(&self, _scope: &SiteScope) -> bool {
        self.force || self.site.https
    }

    fn enabled_scopes(&self) -> Vec<SiteScope> {
        match self.load(&SiteScope::Global) {
            Some(settings) if settings.enabled => vec![SiteScope::Global],
            _ => Vec::new(),
        }
    }

    fn load(&self, scope: &SiteScope) -> Option<StoredSettings> {
        if *scope != SiteScope::Global {
            return None;
        }

        self.settings.read().ok()?.clone()
    }

    fn save(&self, scope: &SiteScope, settings: StoredSettings) -> bool {
        if *scope != SiteScope::Global {
            warn!("Cannot store settings for {scope:?}, only global settings are supported");
            return false;
        }

        if settings.enabled && !self.allows_http(scope) {
            warn!("Not enabling plain HTTP, the site isn’t configured for HTTPS");
            return false;
        }

        let mut guard = match self.settings.write() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Settings lock poisoned, not storing settings");
                return false;
            }
        };

        if let Some(file) = &self.file {
            if let Err(err) = file.save(&settings) {
                warn!("Failed persisting settings: {err}");
                return false;
            }
        }

        debug!("Stored global settings: {settings:?}");
        *guard = Some(settings);
        true
    }
}

/// Settings store keeping separate settings for each host. Sites and settings under an empty host
/// name apply to hosts without their own.
#[derive(Debug)]
pub struct HostSettingsStore {
    sites: HashMap<String, SiteInfo>,
    force: bool,
    settings: RwLock<HashMap<String, StoredSettings>>,
    file: Option<SettingsFile>,
}

impl HostSettingsStore {
    /// Creates a store with initial per-host settings. If a settings file is given and exists,
    /// its entries replace the initial settings of the respective hosts. With `force` set plain
    /// HTTP is allowed even for sites not configured for HTTPS.
    ///
    /// Host names are normalized, names referring to the same host are an error.
    pub fn new(
        sites: HashMap<String, SiteInfo>,
        settings: HashMap<String, StoredSettings>,
        file: Option<SettingsFile>,
        force: bool,
    ) -> Result<Self, Box<Error>> {
        let sites = normalize_hosts(sites)?;
        let mut settings = normalize_hosts(settings)?;

        if let Some(file) = &file {
            if let Some(stored) = file.load::<HashMap<String, StoredSettings>>()? {
                settings.extend(normalize_hosts(stored)?);
            }
        }

        Ok(Self {
            sites,
            force,
            settings: RwLock::new(settings),
            file,
        })
    }

    fn key(scope: &SiteScope) -> &str {
        match scope {
            SiteScope::Global => "",
            SiteScope::Host(host) => host,
        }
    }

    fn scope(key: &str) -> SiteScope {
        if key.is_empty() {
            SiteScope::Global
        } else {
            SiteScope::Host(key.to_owned())
        }
    }

    fn site(&self, scope: &SiteScope) -> Option<&SiteInfo> {
        self.sites
            .get(Self::key(scope))
            .or_else(|| self.sites.get(""))
    }
}

impl SettingsStore for HostSettingsStore {
    fn scope_for(&self, host: Option<&str>) -> SiteScope {
        match host.map(normalize_host) {
            Some(host) if !host.is_empty() => SiteScope::Host(host),
            _ => SiteScope::Global,
        }
    }

    fn site_path(&self, scope: &SiteScope) -> &str {
        self.site(scope).map(|site| site.path.as_str()).unwrap_or("/")
    }

    fn allows_http(&self, scope: &SiteScope) -> bool {
        self.force || self.site(scope).is_some_and(|site| site.https)
    }

    fn enabled_scopes(&self) -> Vec<SiteScope> {
        let Ok(settings) = self.settings.read() else {
            return Vec::new();
        };

        // Configured sites without settings of their own inherit the fallback settings
        let mut keys: Vec<&str> = settings
            .keys()
            .chain(self.sites.keys())
            .map(|key| key.as_str())
            .collect();
        keys.sort_unstable();
        keys.dedup();

        keys.into_iter()
            .filter(|key| {
                settings
                    .get(*key)
                    .or_else(|| settings.get(""))
                    .is_some_and(|settings| settings.enabled)
            })
            .map(Self::scope)
            .collect()
    }

    fn load(&self, scope: &SiteScope) -> Option<StoredSettings> {
        let settings = self.settings.read().ok()?;
        settings
            .get(Self::key(scope))
            .or_else(|| settings.get(""))
            .cloned()
    }

    fn save(&self, scope: &SiteScope, settings: StoredSettings) -> bool {
        if settings.enabled && !self.allows_http(scope) {
            warn!("Not enabling plain HTTP for {scope:?}, the site isn’t configured for HTTPS");
            return false;
        }

        let mut guard = match self.settings.write() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Settings lock poisoned, not storing settings");
                return false;
            }
        };

        let key = Self::key(scope).to_owned();
        if let Some(file) = &self.file {
            let mut updated = guard.clone();
            updated.insert(key.clone(), settings.clone());
            if let Err(err) = file.save(&updated) {
                warn!("Failed persisting settings: {err}");
                return false;
            }
        }

        debug!("Stored settings for {scope:?}: {settings:?}");
        guard.insert(key, settings);
        true
    }
}

/// Creates the settings store for the configured scope
pub fn store_from_conf(conf: &HttpModeConf) -> Result<Arc<dyn SettingsStore>, Box<Error>> {
    let file = conf.http_mode_settings_file.clone().map(SettingsFile::new);
    let force = conf.http_mode_force_activation;

    Ok(match conf.http_mode_scope {
        SettingsScope::Global => {
            let site = &conf.http_mode_site;
            Arc::new(GlobalSettingsStore::new(
                SiteInfo::from_url(site.site_url.as_deref())?,
                Some(site.into()),
                file,
                force,
            )?)
        }
        SettingsScope::Host => {
            let mut sites = HashMap::new();
            let mut settings = HashMap::new();
            for (host, site) in &conf.http_mode_hosts {
                sites.insert(host.clone(), SiteInfo::from_url(site.site_url.as_deref())?);
                settings.insert(host.clone(), site.into());
            }
            Arc::new(HostSettingsStore::new(sites, settings, file, force)?)
        }
    })
}
