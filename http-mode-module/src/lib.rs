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

//! # HTTP Mode Module for Pandora Web Server
//!
//! This crate allows serving a site configured for HTTPS via plain HTTP as well. Typically, a
//! reverse proxy terminates TLS and indicates the original protocol via the `X-Forwarded-Proto`
//! header. Whenever a request arrives via plain HTTP and the functionality is enabled for the
//! site, the module will:
//!
//! * Rewrite `https://` URLs in `Location` and `Content-Location` response headers to `http://`.
//! * Serve a robots.txt document with rules specific to plain HTTP. HTTPS requests get rules of
//!   their own, by default disallowing crawlers from indexing the encrypted mirror.
//!
//! If the functionality is disabled, neither responses nor robots.txt are touched.
//!
//! ## Scheme detection
//!
//! A request is considered plain HTTP if the proxy header is present and its value is `http`
//! (case-insensitive). If the header is absent, TLS connections count as HTTPS. Otherwise the
//! scheme of an absolute request URI is used, falling back to plain HTTP for plain connections.
//! Anything else is treated as HTTPS.
//!
//! ## Configuration
//!
//! With the default `global` scope one set of settings applies to all requests:
//!
//! ```yaml
//! http_mode_site:
//!     site_url: https://example.com/blog/
//!     http_enabled: true
//! ```
//!
//! With the `host` scope each host has its own settings, an entry with an empty host name
//! applies to hosts without settings of their own:
//!
//! ```yaml
//! http_mode_scope: host
//! http_mode_proxy_header: X-Edge-Proto
//! http_mode_settings_file: /var/lib/pandora/http-mode.yaml
//! http_mode_hosts:
//!     example.com:
//!         site_url: https://example.com/
//!         http_enabled: true
//!         http_robots: |
//!             User-agent: *
//!             Disallow: /private/
//!     example.net:
//!         site_url: https://example.net/
//! ```
//!
//! The site URL has to use HTTPS, the server will refuse to start otherwise. This also applies if
//! plain HTTP is enabled by the settings file, and enabling plain HTTP at runtime is refused for
//! sites without an HTTPS URL. Host names referring to the same host are an error. Setting
//! `http_mode_force_activation` to `true` or supplying `--http-mode-force-activation` command
//! line flag skips this check. Plain HTTP can also be enabled for the global site via
//! `--http-mode-enabled` command line flag.
//!
//! ## Using the module
//!
//! This module’s handler should be called prior to any handlers producing responses:
//!
//! ```rust
//! use clap::Parser;
//! use http_mode_module::{check_activation, HttpModeHandler, HttpModeOpt};
//! use pandora_module_utils::{merge_conf, merge_opt, FromYaml, RequestFilter};
//! use startup_module::{DefaultApp, StartupConf, StartupOpt};
//! use static_files_module::{StaticFilesHandler, StaticFilesOpt};
//!
//! #[derive(Debug, RequestFilter)]
//! struct Handler {
//!     http_mode: HttpModeHandler,
//!     static_files: StaticFilesHandler,
//! }
//!
//! #[merge_conf]
//! struct Conf {
//!     startup: StartupConf,
//!     handler: <Handler as RequestFilter>::Conf,
//! }
//!
//! #[merge_opt]
//! struct Opt {
//!     startup: StartupOpt,
//!     http_mode: HttpModeOpt,
//!     static_files: StaticFilesOpt,
//! }
//!
//! let opt = Opt::parse();
//! let mut conf = Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[])).unwrap();
//! conf.handler.http_mode.merge_with_opt(opt.http_mode);
//! conf.handler.static_files.merge_with_opt(opt.static_files);
//! check_activation(&conf.handler.http_mode).unwrap();
//!
//! let app = DefaultApp::<Handler>::from_conf(conf.handler).unwrap();
//! let server = conf.startup.into_server(app, Some(opt.startup)).unwrap();
//!
//! // Do something with the server here, e.g. call server.run_forever()
//! ```

mod activation;
pub mod configuration;
mod handler;
pub mod rewrite;
pub mod scheme;
pub mod settings;

pub use activation::check_activation;
pub use configuration::{HttpModeConf, HttpModeOpt};
pub use handler::{HttpModeHandler, RequestState};
