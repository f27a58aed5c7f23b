use std::net::SocketAddr;

const WEBWATCH_CONFIG: &str = "WEBWATCH_CONFIG";

const DEFAULT_CONFIG: &str = "webwatch.json";

/// Config file from the command line, else the environment, else the default path
pub fn get_config_path(from_args: Option<String>) -> String {
    from_args
        .or_else(|| std::env::var(WEBWATCH_CONFIG).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}

const WEBWATCH_BIND: &str = "WEBWATCH_BIND";

/// API bind address override; unparsable values are ignored
pub fn get_bind_override() -> Option<SocketAddr> {
    let bind_from_env = std::env::var(WEBWATCH_BIND);
    bind_from_env.ok().and_then(|res| res.parse().ok())
}

const WEBWATCH_LOG: &str = "WEBWATCH_LOG";

const DEFAULT_LOG: &str = "info";

/// Log directive string, e.g. `info,webwatch=trace`
pub fn get_log_directives() -> String {
    std::env::var(WEBWATCH_LOG).unwrap_or_else(|_| DEFAULT_LOG.to_string())
}
