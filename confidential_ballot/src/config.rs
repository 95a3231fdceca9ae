use crate::Error;
use std::env::var;
use std::str::FromStr;

/// Limits applied by the ballot ledger and its decryption coordinator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Most options a single ballot may carry
    pub max_options: usize,

    pub min_duration_days: u64,
    pub max_duration_days: u64,

    /// Most ballot definitions in one `create_ballots_batch` call (at least 2 are required)
    pub max_create_batch: usize,

    /// Most casts in one `cast_votes_batch` call
    pub max_cast_batch: usize,

    /// How long a decryption authorization built by the coordinator stays valid
    pub authorization_validity_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            max_options: 10,
            min_duration_days: 1,
            max_duration_days: 365,
            max_create_batch: 10,
            max_cast_batch: 5,
            authorization_validity_secs: 3600,
        }
    }
}

impl LedgerConfig {
    /// Read overrides from `CONFIDENTIAL_BALLOT_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, Error> {
        let defaults = LedgerConfig::default();

        let config = LedgerConfig {
            max_options: env_or("CONFIDENTIAL_BALLOT_MAX_OPTIONS", defaults.max_options)?,
            min_duration_days: env_or(
                "CONFIDENTIAL_BALLOT_MIN_DURATION_DAYS",
                defaults.min_duration_days,
            )?,
            max_duration_days: env_or(
                "CONFIDENTIAL_BALLOT_MAX_DURATION_DAYS",
                defaults.max_duration_days,
            )?,
            max_create_batch: env_or(
                "CONFIDENTIAL_BALLOT_MAX_CREATE_BATCH",
                defaults.max_create_batch,
            )?,
            max_cast_batch: env_or("CONFIDENTIAL_BALLOT_MAX_CAST_BATCH", defaults.max_cast_batch)?,
            authorization_validity_secs: env_or(
                "CONFIDENTIAL_BALLOT_AUTHORIZATION_VALIDITY_SECS",
                defaults.authorization_validity_secs,
            )?,
        };

        config.check()?;
        Ok(config)
    }

    /// Reject limits that would make the ledger unusable
    pub fn check(&self) -> Result<(), Error> {
        if self.max_options < 2 {
            return Err(Error::Config("max_options must be at least 2".into()));
        }
        if self.min_duration_days == 0 || self.min_duration_days > self.max_duration_days {
            return Err(Error::Config(
                "duration bounds must satisfy 1 <= min <= max".into(),
            ));
        }
        if self.max_create_batch < 2 {
            return Err(Error::Config("max_create_batch must be at least 2".into()));
        }
        if self.max_cast_batch == 0 {
            return Err(Error::Config("max_cast_batch must be at least 1".into()));
        }
        if self.authorization_validity_secs == 0 {
            return Err(Error::Config(
                "authorization_validity_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, Error> {
    match var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, val))),
        Err(_e) => Ok(default),
    }
}
