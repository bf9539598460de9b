use std::env;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Upper bound for `FORUM_OLD_POST_DAYS`, about a century.
pub const MAX_OLD_POST_DAYS: i64 = 36_500;

/// How names render for callers without the view-full-names capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullnameDisplay {
    FirstLast,
    LastFirst,
    FirstOnly,
}

impl FullnameDisplay {
    fn parse(v: &str) -> Option<Self> {
        match v.trim() {
            "firstname lastname" => Some(FullnameDisplay::FirstLast),
            "lastname firstname" => Some(FullnameDisplay::LastFirst),
            "firstname" => Some(FullnameDisplay::FirstOnly),
            _ => None,
        }
    }
}

/// Site-wide forum settings consulted while listing discussions and posts.
#[derive(Debug, Clone, PartialEq)]
pub struct ForumSettings {
    pub track_read_posts: bool,
    pub old_post_days: i64,
    pub fullname_display: FullnameDisplay,
}

impl Default for ForumSettings {
    fn default() -> Self {
        ForumSettings {
            track_read_posts: true,
            old_post_days: 14,
            fullname_display: FullnameDisplay::FirstLast,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub log_filter: String,
    pub wwwroot: String,
    pub forum: ForumSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let port = parsed(&get, "PORT", 8082, |v| v.parse().ok())?;
        let defaults = ForumSettings::default();
        let forum = ForumSettings {
            track_read_posts: parsed(&get, "FORUM_TRACK_READ_POSTS", defaults.track_read_posts, |v| {
                match v {
                    "1" | "true" | "yes" => Some(true),
                    "0" | "false" | "no" => Some(false),
                    _ => None,
                }
            })?,
            old_post_days: parsed(&get, "FORUM_OLD_POST_DAYS", defaults.old_post_days, |v| {
                v.parse().ok().filter(|d: &i64| (0..=MAX_OLD_POST_DAYS).contains(d))
            })?,
            fullname_display: parsed(
                &get,
                "FULLNAME_DISPLAY",
                defaults.fullname_display,
                FullnameDisplay::parse,
            )?,
        };
        Ok(Config {
            database_url,
            port,
            log_filter: get("RUST_LOG")
                .unwrap_or_else(|| "coursews_runtime=info,tower_http=info".into()),
            wwwroot: get("WWWROOT").unwrap_or_else(|| format!("http://localhost:{}", port)),
            forum,
        })
    }
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(v) => parse(&v).ok_or(ConfigError::Invalid { name, value: v }),
    }
}
