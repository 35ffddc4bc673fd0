use crate::error::AppError;
use crate::refresh::types::{RefreshConfig, RefreshSettingsArgs, SessionIdentity};

const API_BASE_URL_ENV: &str = "WATCHLIST_API_BASE_URL";
const TICK_PERIOD_MS_ENV: &str = "WATCHLIST_TICK_PERIOD_MS";
const CODES_ENV: &str = "WATCHLIST_CODES";
const USER_ID_ENV: &str = "WATCHLIST_USER_ID";
const TOKEN_ENV: &str = "WATCHLIST_TOKEN";
const DEFAULT_USER_ID: &str = "desktop";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub refresh: RefreshConfig,
    pub watch_codes: Vec<String>,
    pub session: Option<SessionIdentity>,
}

pub fn load_from_env() -> Result<AppConfig, AppError> {
    load_with(|key| std::env::var(key).ok())
}

pub fn load_with<F>(lookup: F) -> Result<AppConfig, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let tick_period_ms = resolve(TICK_PERIOD_MS_ENV)
        .map(|value| {
            value.parse::<u64>().map_err(|error| {
                AppError::InvalidArgument(format!("{TICK_PERIOD_MS_ENV}='{value}': {error}"))
            })
        })
        .transpose()?;

    let refresh = RefreshSettingsArgs {
        tick_period_ms,
        api_base_url: resolve(API_BASE_URL_ENV),
        ..RefreshSettingsArgs::default()
    }
    .normalize()?;

    let watch_codes = resolve(CODES_ENV)
        .map(|value| parse_codes(&value))
        .unwrap_or_default();

    let session = resolve(TOKEN_ENV).map(|token| SessionIdentity {
        user_id: resolve(USER_ID_ENV).unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
        token: Some(token),
    });

    Ok(AppConfig {
        refresh,
        watch_codes,
        session,
    })
}

fn parse_codes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}
