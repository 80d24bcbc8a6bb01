//! Configuration settings for the random numbers server.
//!
//! [`load_settings`] accepts a map of string values, typically assembled from
//! command line arguments or environment variables. Keys are matched
//! case-insensitively and processed in this order, later keys overriding
//! earlier ones:
//!
//! - `config_file`: load configuration from a file, json or toml by extension
//! - `config_b64`: base64-encoded json
//! - `config_json`: raw json
//! - `address`, `port`, `accept_count`, `cors`, `openapi`, `timeout_ms`,
//!   `cache_control`, `seed`: individual settings
//!
//! If no configuration is provided, the defaults are:
//! - listener bound to 127.0.0.1 port 8000
//! - the `/randomnumbers/{count}` route is served
//! - CORS is disabled; once enabled it allows all origins, methods and headers
//!   unless lists are given
//! - no OpenAPI document, no timeout, no cache-control header
//! - the random number generator is seeded from OS entropy

use core::fmt;
use core::str::FromStr;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use base64::engine::Engine as _;
use base64::prelude::BASE64_STANDARD_NO_PAD;
use http::Uri;
use serde::{de, de::Deserializer, de::Visitor, Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::HttpServerError;

const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);

pub const CORS_DEFAULT_MAX_AGE_SECS: u64 = 300;

/// Default address to listen on when none is configured
#[must_use]
pub fn default_listen_address() -> SocketAddr {
    DEFAULT_ADDR
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Bind address
    #[serde(default)]
    pub address: Option<SocketAddr>,

    /// Serve `/randomnumbers/{count}` in addition to `/randomnumbers`
    #[serde(default)]
    pub accept_count: Option<bool>,

    /// cors config
    #[serde(default)]
    pub cors: Cors,

    /// Serve an OpenAPI document at `/openapi.json`
    #[serde(default)]
    pub openapi: Option<bool>,

    /// How long (milliseconds) to wait for a sample before answering
    /// with 408. Unbounded if not set.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// cache control header value appended to sampling responses
    #[serde(default)]
    pub cache_control: Option<String>,

    /// Fixed seed for the random number generator.
    /// Every server started with the same seed produces the same sequence.
    #[serde(default)]
    pub seed: Option<u64>,

    /// capture any other configuration values
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

impl Default for ServiceSettings {
    fn default() -> ServiceSettings {
        ServiceSettings {
            address: Some(DEFAULT_ADDR),
            accept_count: Some(true),
            cors: Cors::default(),
            openapi: Some(false),
            timeout_ms: None,
            cache_control: None,
            seed: None,
            extra: HashMap::default(),
        }
    }
}

macro_rules! merge {
    ( $self:ident, $other: ident, $( $field:ident),+ ) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )*
    };
}

impl ServiceSettings {
    /// load Settings from a file with .toml or .json extension
    fn from_file<P: AsRef<Path>>(fpath: P) -> Result<Self, HttpServerError> {
        let fpath = fpath.as_ref();
        let data = std::fs::read_to_string(fpath).map_err(|e| {
            HttpServerError::Settings(format!("reading file {}: {e}", fpath.display()))
        })?;
        match fpath.extension().map(|ext| ext.to_string_lossy()) {
            Some(ext) if ext == "json" => ServiceSettings::from_json(&data),
            Some(ext) if ext == "toml" => ServiceSettings::from_toml(&data),
            Some(ext) => Err(HttpServerError::Settings(format!(
                "unrecognized extension {ext}"
            ))),
            None => Err(HttpServerError::Settings(format!(
                "unrecognized file type {}",
                fpath.display()
            ))),
        }
    }

    /// load settings from json
    fn from_json(data: &str) -> Result<Self, HttpServerError> {
        serde_json::from_str(data)
            .map_err(|e| HttpServerError::Settings(format!("invalid json: {e}")))
    }

    /// load settings from toml
    fn from_toml(data: &str) -> Result<Self, HttpServerError> {
        toml::from_str(data).map_err(HttpServerError::SettingsToml)
    }

    /// Merge settings from other into self
    fn merge(&mut self, other: ServiceSettings) {
        merge!(
            self,
            other,
            address,
            accept_count,
            openapi,
            timeout_ms,
            cache_control,
            seed
        );
        self.cors.merge(other.cors);
        self.extra.extend(other.extra);
    }

    /// Whether the `/randomnumbers/{count}` route is served
    #[must_use]
    pub fn accept_count(&self) -> bool {
        self.accept_count.unwrap_or(true)
    }

    /// Whether `/openapi.json` is served
    #[must_use]
    pub fn openapi(&self) -> bool {
        self.openapi.unwrap_or(false)
    }

    /// Configuration keys that were not recognized
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.extra.keys().map(String::as_str)
    }

    /// perform additional validation checks on settings.
    /// Several checks have already been done during deserialization.
    /// All errors found are combined into a single error message
    fn validate(&self) -> Result<(), HttpServerError> {
        let mut errors = Vec::new();
        if self.timeout_ms == Some(0) {
            errors.push("timeout_ms must be greater than zero".to_string());
        }
        if let Some(ref methods) = self.cors.allowed_methods {
            for m in methods.iter() {
                if http::Method::from_str(m).is_err() {
                    errors.push(format!("invalid CORS method: '{m}'"));
                }
            }
        }
        for (name, headers) in [
            ("allowed", &self.cors.allowed_headers),
            ("exposed", &self.cors.exposed_headers),
        ] {
            for h in headers.iter().flat_map(|h| h.iter()) {
                if http::HeaderName::from_str(h).is_err() {
                    errors.push(format!("invalid CORS {name} header: '{h}'"));
                }
            }
        }
        if let Some(cache_control) = self.cache_control.as_ref() {
            if http::HeaderValue::from_str(cache_control).is_err() {
                errors.push(format!("Invalid Cache Control header : '{cache_control}'"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HttpServerError::Settings(format!(
                "\nInvalid randomnumbers settings: \n{}\n",
                errors.join("\n")
            )))
        }
    }
}

/// Lowercase every key, failing if two keys collide (e.g. "Port" and "PORT")
fn lowercase_keys(values: &HashMap<String, String>) -> Option<HashMap<String, String>> {
    let mut out = HashMap::with_capacity(values.len());
    for (k, v) in values {
        if out.insert(k.to_ascii_lowercase(), v.clone()).is_some() {
            return None;
        }
    }
    Some(out)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, HttpServerError> {
    value
        .trim()
        .parse()
        .map_err(|_| HttpServerError::InvalidParameter(format!("invalid {key}: {value}")))
}

/// Load settings provides a flexible means for loading configuration.
///   config_file: load from file name. Interprets file as json or toml, based on file extension.
///   config_b64:  base64-encoded json string
///   config_json: raw json string
/// Also accepts the individual settings `address` (a string representing SocketAddr),
/// `port` (a localhost port), `accept_count`, `cors`, `openapi`, `timeout_ms`,
/// `cache_control` and `seed`.
/// If more than one key is provided, they are processed in the order above.
///   (later names override earlier names in the list)
///
/// # Errors
///
/// Returns [`HttpServerError`] if any source fails to parse or the merged settings are invalid
#[instrument(skip(values))]
pub fn load_settings(values: &HashMap<String, String>) -> Result<ServiceSettings, HttpServerError> {
    trace!("load settings");
    let values = lowercase_keys(values).ok_or_else(|| {
        HttpServerError::InvalidParameter(
            "Key collision: settings have one or more keys that are not unique based on case-insensitivity"
                .to_string(),
        )
    })?;

    let mut settings = ServiceSettings::default();

    if let Some(fpath) = values.get("config_file") {
        settings.merge(ServiceSettings::from_file(fpath)?);
    }

    if let Some(str) = values.get("config_b64") {
        let bytes = BASE64_STANDARD_NO_PAD
            .decode(str.trim_end_matches('='))
            .map_err(|e| HttpServerError::Settings(format!("invalid base64 encoding: {e}")))?;
        settings.merge(ServiceSettings::from_json(&String::from_utf8_lossy(
            &bytes,
        ))?);
    }

    if let Some(str) = values.get("config_json") {
        settings.merge(ServiceSettings::from_json(str)?);
    }

    if let Some(addr) = values.get("address") {
        settings.address = Some(parse_value("address", addr)?);
    }

    // port is shorthand for a localhost address
    if let Some(port) = values.get("port") {
        let port: u16 = parse_value("port", port)?;
        settings.address = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }

    if let Some(v) = values.get("accept_count") {
        settings.accept_count = Some(parse_value("accept_count", v)?);
    }

    if let Some(v) = values.get("cors") {
        settings.cors.enabled = Some(parse_value("cors", v)?);
    }

    if let Some(v) = values.get("openapi") {
        settings.openapi = Some(parse_value("openapi", v)?);
    }

    if let Some(v) = values.get("timeout_ms") {
        settings.timeout_ms = Some(parse_value("timeout_ms", v)?);
    }

    if let Some(cache_control) = values.get("cache_control") {
        settings.cache_control = Some(cache_control.to_string());
    }

    if let Some(v) = values.get("seed") {
        settings.seed = Some(parse_value("seed", v)?);
    }

    settings.validate()?;
    Ok(settings)
}

/// Cross-origin settings. Empty or missing lists allow anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cors {
    pub enabled: Option<bool>,

    pub allowed_origins: Option<AllowedOrigins>,

    pub allowed_headers: Option<Vec<String>>,

    pub allowed_methods: Option<Vec<String>>,

    pub exposed_headers: Option<Vec<String>>,

    pub max_age_secs: Option<u64>,
}

impl Cors {
    fn merge(&mut self, other: Cors) {
        merge!(
            self,
            other,
            enabled,
            allowed_origins,
            allowed_headers,
            allowed_methods,
            exposed_headers,
            max_age_secs
        );
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CorsOrigin(String);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedOrigins(Vec<CorsOrigin>);

impl<'de> Deserialize<'de> for CorsOrigin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CorsOriginVisitor;
        impl Visitor<'_> for CorsOriginVisitor {
            type Value = CorsOrigin;

            fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                write!(fmt, "an origin in format http[s]://example.com[:3000]",)
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                CorsOrigin::from_str(v).map_err(E::custom)
            }
        }
        deserializer.deserialize_str(CorsOriginVisitor)
    }
}

impl FromStr for CorsOrigin {
    type Err = std::io::Error;

    fn from_str(origin: &str) -> Result<Self, Self::Err> {
        let uri = Uri::from_str(origin).map_err(|invalid_uri| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("Invalid uri: {origin}.\n{invalid_uri}"),
            )
        })?;
        match uri.scheme_str() {
            Some("http" | "https") => {}
            Some(s) => {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "Cors origin invalid schema {s}, only [http] and [https] are supported: "
                    ),
                ))
            }
            None => {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "Cors origin missing schema, only [http] or [https] are supported",
                ))
            }
        }

        if let Some(p) = uri.path_and_query() {
            if p.as_str() != "/" {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("Invalid value {} in cors schema.", p.as_str()),
                ));
            }
        }
        Ok(CorsOrigin(origin.trim_end_matches('/').to_owned()))
    }
}

impl AsRef<str> for CorsOrigin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::ops::Deref for AllowedOrigins {
    type Target = Vec<CorsOrigin>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
