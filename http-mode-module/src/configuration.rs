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

//! Structures required to deserialize HTTP Mode Module configuration from YAML configuration
//! files.

use clap::Parser;
use pandora_module_utils::DeserializeMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Command line options of the HTTP mode module
#[derive(Debug, Parser)]
pub struct HttpModeOpt {
    /// Allow plain HTTP access to the site, rewriting generated URLs accordingly. Only affects
    /// the global site settings, per-host settings have to be changed in the configuration file.
    #[clap(long)]
    pub http_mode_enabled: bool,

    /// Start even though the site isn’t configured for HTTPS
    #[clap(long)]
    pub http_mode_force_activation: bool,
}

/// Determines which key site settings are stored under
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsScope {
    /// One set of settings applies to all requests
    #[default]
    Global,
    /// Each host name has its own settings
    Host,
}

/// Settings of a single site
#[derive(Debug, Default, Clone, PartialEq, Eq, DeserializeMap)]
pub struct SiteConf {
    /// Canonical URL of the site as configured, e.g. `https://example.com/blog/`. Its path is
    /// used as prefix for the default robots.txt rules.
    pub site_url: Option<String>,

    /// If `true`, requests arriving via plain HTTP will get `http://` URLs and the HTTP variant
    /// of robots.txt.
    pub http_enabled: bool,

    /// robots.txt rules to serve for plain HTTP requests. Rules disallowing the administration
    /// area will be used if omitted.
    pub http_robots: Option<String>,

    /// robots.txt rules to serve for HTTPS requests. Rules disallowing everything will be used if
    /// omitted.
    pub https_robots: Option<String>,
}

/// Configuration file settings of the HTTP mode module
#[derive(Debug, Clone, PartialEq, Eq, DeserializeMap)]
pub struct HttpModeConf {
    /// Whether settings are shared by all hosts (`global`, default) or kept per host (`host`)
    pub http_mode_scope: SettingsScope,

    /// Site settings used with the `global` scope
    pub http_mode_site: SiteConf,

    /// Site settings by host name, used with the `host` scope
    pub http_mode_hosts: HashMap<String, SiteConf>,

    /// HTTP header set by a trusted reverse proxy to indicate the protocol of the original
    /// request
    pub http_mode_proxy_header: String,

    /// Path that robots.txt is requested under
    pub http_mode_robots_path: String,

    /// File to store site settings in. Contents of this file take precedence over the settings in
    /// the configuration file.
    pub http_mode_settings_file: Option<PathBuf>,

    /// If `true`, the module will be activated even though the site isn’t configured for HTTPS
    pub http_mode_force_activation: bool,
}

impl Default for HttpModeConf {
    fn default() -> Self {
        Self {
            http_mode_scope: SettingsScope::default(),
            http_mode_site: SiteConf::default(),
            http_mode_hosts: HashMap::new(),
            http_mode_proxy_header: "X-Forwarded-Proto".to_owned(),
            http_mode_robots_path: "/robots.txt".to_owned(),
            http_mode_settings_file: None,
            http_mode_force_activation: false,
        }
    }
}

impl HttpModeConf {
    /// Merges the command line options into the current configuration. Command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: HttpModeOpt) {
        if opt.http_mode_enabled {
            self.http_mode_site.http_enabled = true;
        }

        if opt.http_mode_force_activation {
            self.http_mode_force_activation = true;
        }
    }

    /// Lists the site configurations relevant for the configured scope along with their host
    /// names. The host name is empty for the global scope.
    pub fn sites(&self) -> Vec<(&str, &SiteConf)> {
        match self.http_mode_scope {
            SettingsScope::Global => vec![("", &self.http_mode_site)],
            SettingsScope::Host => self
                .http_mode_hosts
                .iter()
                .map(|(host, site)| (host.as_str(), site))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pandora_module_utils::FromYaml;
    use test_log::test;

    #[test]
    fn defaults() {
        let conf = HttpModeConf::from_yaml("{}").unwrap();
        assert_eq!(conf, HttpModeConf::default());
        assert_eq!(conf.http_mode_proxy_header, "X-Forwarded-Proto");
        assert_eq!(conf.http_mode_robots_path, "/robots.txt");
        assert!(!conf.http_mode_site.http_enabled);
        assert_eq!(conf.sites(), vec![("", &SiteConf::default())]);
    }

    #[test]
    fn host_scope() {
        let conf = HttpModeConf::from_yaml(
            r#"
                http_mode_scope: host
                http_mode_proxy_header: X-Edge-Proto
                http_mode_hosts:
                    example.com:
                        site_url: https://example.com/
                        http_enabled: true
                    example.net:
                        site_url: https://example.net/blog/
                        https_robots: "User-agent: *"
            "#,
        )
        .unwrap();

        assert_eq!(conf.http_mode_scope, SettingsScope::Host);
        assert_eq!(conf.http_mode_proxy_header, "X-Edge-Proto");

        let mut sites = conf.sites();
        sites.sort_by_key(|(host, _)| *host);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].0, "example.com");
        assert!(sites[0].1.http_enabled);
        assert_eq!(sites[1].0, "example.net");
        assert!(!sites[1].1.http_enabled);
        assert_eq!(sites[1].1.https_robots.as_deref(), Some("User-agent: *"));
    }

    #[test]
    fn merging() {
        let conf = HttpModeConf::from_yaml(
            r#"
                http_mode_hosts:
                    example.com:
                        site_url: https://example.com/
            "#,
        )
        .unwrap()
        .merge_from_yaml(
            r#"
                http_mode_hosts:
                    example.com:
                        http_enabled: true
                    example.net:
                        site_url: https://example.net/
            "#,
        )
        .unwrap();

        assert_eq!(
            conf.http_mode_hosts.get("example.com"),
            Some(&SiteConf {
                site_url: Some("https://example.com/".to_owned()),
                http_enabled: true,
                ..Default::default()
            })
        );
        assert!(conf.http_mode_hosts.contains_key("example.net"));
    }

    #[test]
    fn unknown_fields() {
        assert!(HttpModeConf::from_yaml("http_mode_unknown: true").is_err());
        assert!(HttpModeConf::from_yaml("http_mode_scope: tenant").is_err());
    }

    #[test]
    fn command_line() {
        let mut conf = HttpModeConf::default();
        conf.merge_with_opt(HttpModeOpt {
            http_mode_enabled: false,
            http_mode_force_activation: false,
        });
        assert_eq!(conf, HttpModeConf::default());

        conf.merge_with_opt(HttpModeOpt {
            http_mode_enabled: true,
            http_mode_force_activation: true,
        });
        assert!(conf.http_mode_site.http_enabled);
        assert!(conf.http_mode_force_activation);
    }
}
