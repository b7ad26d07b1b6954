use std::env;
use std::fmt::Display;
use std::str::FromStr;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub seat_lock: SeatLockConfig,
    pub payment: PaymentConfig,
}

// Настройки приложения
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// text | json
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Настройки Redis
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub seat_map_ttl_seconds: u64,
}

// Удержание мест
#[derive(Debug, Clone)]
pub struct SeatLockConfig {
    pub ttl_seconds: i64,
    pub sweep_interval_seconds: u64,
    pub events_capacity: usize,
}

// Окно оплаты и проверка callback'ов шлюза
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub hold_seconds: i64,
    pub callback_secret: Option<String>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Сборка конфигурации из произвольного источника переменных (в тестах: HashMap).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let or_default = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let required = |name: &'static str| lookup(name).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(name));

        let config = Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parse_var("PORT", lookup("PORT"), 8000)?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "bus_ticketing=debug,tower_http=debug"),
                log_format: or_default("LOG_FORMAT", "text"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parse_var("DB_POOL_SIZE", lookup("DB_POOL_SIZE"), 20)?,
                acquire_timeout_seconds: 5,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
                seat_map_ttl_seconds: parse_var(
                    "SEAT_MAP_CACHE_TTL_SECONDS",
                    lookup("SEAT_MAP_CACHE_TTL_SECONDS"),
                    3600,
                )?,
            },
            seat_lock: SeatLockConfig {
                ttl_seconds: parse_var("SEAT_LOCK_TTL_SECONDS", lookup("SEAT_LOCK_TTL_SECONDS"), 120)?,
                sweep_interval_seconds: parse_var(
                    "SEAT_SWEEP_INTERVAL_SECONDS",
                    lookup("SEAT_SWEEP_INTERVAL_SECONDS"),
                    15,
                )?,
                events_capacity: parse_var("SEAT_EVENTS_CAPACITY", lookup("SEAT_EVENTS_CAPACITY"), 1024)?,
            },
            payment: PaymentConfig {
                hold_seconds: parse_var("PAYMENT_HOLD_SECONDS", lookup("PAYMENT_HOLD_SECONDS"), 600)?,
                callback_secret: lookup("PAYMENT_CALLBACK_SECRET").filter(|s| !s.is_empty()),
            },
        };

        ensure_positive("SEAT_LOCK_TTL_SECONDS", config.seat_lock.ttl_seconds)?;
        ensure_positive("PAYMENT_HOLD_SECONDS", config.payment.hold_seconds)?;
        ensure_positive("SEAT_SWEEP_INTERVAL_SECONDS", config.seat_lock.sweep_interval_seconds as i64)?;

        Ok(config)
    }

    pub fn seat_lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seat_lock.ttl_seconds)
    }

    pub fn payment_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment.hold_seconds)
    }

    pub fn json_logs(&self) -> bool {
        self.app.log_format.eq_ignore_ascii_case("json")
    }
}

fn parse_var<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn ensure_positive(var: &'static str, value: i64) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be positive".to_string(),
        })
    }
}
