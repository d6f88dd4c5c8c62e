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

#![doc = include_str!("../README.md")]

use clap::Parser;
use http_mode_module::{check_activation, HttpModeHandler, HttpModeOpt};
use log::error;
use pandora_module_utils::{merge_conf, merge_opt, FromYaml, RequestFilter};
use startup_module::{DefaultApp, StartupConf, StartupOpt};

#[derive(Debug, Clone, PartialEq, Eq, RequestFilter)]
struct Handler {
    http_mode: HttpModeHandler,
    #[cfg(feature = "upstream")]
    upstream: upstream_module::UpstreamHandler,
    #[cfg(feature = "static-files")]
    static_files: static_files_module::StaticFilesHandler,
}

/// Run Pandora Web Server
#[merge_opt]
struct Opt {
    startup: StartupOpt,
    http_mode: HttpModeOpt,
    #[cfg(feature = "static-files")]
    static_files: static_files_module::StaticFilesOpt,
}

/// The configuration of Pandora Web Server
#[merge_conf]
struct Conf {
    startup: StartupConf,
    handler: <Handler as RequestFilter>::Conf,
}

fn main() {
    env_logger::init();

    let opt = Opt::parse();

    let mut conf = match Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[])) {
        Ok(conf) => conf,
        Err(err) => {
            error!("{err}");
            Conf::default()
        }
    };

    conf.handler.http_mode.merge_with_opt(opt.http_mode);
    #[cfg(feature = "static-files")]
    conf.handler.static_files.merge_with_opt(opt.static_files);

    if let Err(err) = check_activation(&conf.handler.http_mode) {
        error!("{err}");
        return;
    }

    let server = match DefaultApp::<Handler>::from_conf(conf.handler)
        .and_then(|app| conf.startup.into_server(app, Some(opt.startup)))
    {
        Ok(server) => server,
        Err(err) => {
            error!("{err}");
            return;
        }
    };

    server.run_forever();
}
