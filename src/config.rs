use ::config::{Config, ConfigError};

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

// Missing keys fall back to the default, but a key that is present with the
// wrong type is reported.
fn or_default<T>(result: Result<T, ConfigError>, default: T) -> Result<T, ConfigError> {
    match result {
        Ok(value) => Ok(value),
        Err(ConfigError::NotFound(_)) => Ok(default),
        Err(err) => Err(err),
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    or_default(
        get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key)),
        default,
    )
}

pub(crate) fn get_namespaced_u64(
    config: &Config,
    name: &str,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    or_default(
        get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u64>(key)),
        default,
    )
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    or_default(
        get_namespaced_value(config, name, key, Config::get_bool),
        default,
    )
}

pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
    default: &str,
) -> Result<String, ConfigError> {
    or_default(
        get_namespaced_value(config, name, key, Config::get_string),
        default.to_string(),
    )
}

pub(crate) fn get_namespaced_strings(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<Vec<String>, ConfigError> {
    or_default(
        get_namespaced_value(config, name, key, |cfg, key| cfg.get::<Vec<String>>(key)),
        Vec::new(),
    )
}
