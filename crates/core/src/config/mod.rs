//! Client parameters and their command-line / file configuration.
//!
//! [`ConfigArgs`] is what users type (or put in a TOML file); it is turned
//! into an immutable, validated [`ClientParams`] once, before any client is
//! constructed. Invalid combinations are reported as [`ConfigError`].

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Default number of primary guards under absolute thresholds (utopic pool).
pub const DEFAULT_GUARD_THRESHOLD_UTOPIC: usize = 3;
/// Default number of primary guards under absolute thresholds (dystopic pool).
pub const DEFAULT_GUARD_THRESHOLD_DYSTOPIC: usize = 3;
/// Default share of the consensus used as guard threshold (utopic pool).
pub const DEFAULT_GUARD_FRACTION_UTOPIC: f64 = 0.05;
/// Default share of the consensus used as guard threshold (dystopic pool).
pub const DEFAULT_GUARD_FRACTION_DYSTOPIC: f64 = 0.05;
/// Default share of the guard threshold that must be exhausted before failing over.
pub const DEFAULT_FAILOVER_FRACTION: f64 = 1.0;
/// Adding this many guards within [`DEFAULT_TOO_RECENTLY_SECS`] makes the client give up.
pub const DEFAULT_TOO_MANY_GUARDS: usize = 6;
/// Default recency window for the guard-churn circuit breaker (one day).
pub const DEFAULT_TOO_RECENTLY_SECS: u64 = 86_400;
/// Default initial delay of retry timers.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;
/// Default growth factor of retry timers.
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;

/// Which guard selection proposal to follow where the two diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proposal {
    /// Absolute guard-count thresholds.
    Prop241,
    /// Thresholds as a fraction of the consensus, with failover to the
    /// dystopic pool and network-down detection.
    Prop259,
}

impl Proposal {
    /// Resolve the two mutually exclusive selection flags.
    pub fn from_flags(prop241: bool, prop259: bool) -> Result<Self, ConfigError> {
        match (prop241, prop259) {
            (true, false) => Ok(Proposal::Prop241),
            (false, true) => Ok(Proposal::Prop259),
            (true, true) => Err(ConfigError::ConflictingProposals),
            (false, false) => Err(ConfigError::MissingProposal),
        }
    }

    pub fn uses_fractional_thresholds(self) -> bool {
        self == Proposal::Prop259
    }

    pub fn is_failover_aware(self) -> bool {
        self == Proposal::Prop259
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("both --prop241 and --prop259 were given, pick one")]
    ConflictingProposals,
    #[error("one of --prop241 or --prop259 is required")]
    MissingProposal,
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
    #[error("failed reading parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed parsing parameter file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Immutable, validated parameters of the guard selection algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientParams {
    pub proposal: Proposal,
    /// Primary list ceiling for the utopic pool (prop241).
    pub guard_threshold_utopic: usize,
    /// Primary list ceiling for the dystopic pool (prop241).
    pub guard_threshold_dystopic: usize,
    /// Utopic ceiling as a share of the consensus (prop259).
    pub guard_fraction_utopic: f64,
    /// Dystopic ceiling as a share of the consensus (prop259).
    pub guard_fraction_dystopic: f64,
    /// Share of the ceiling that must be exhausted before failing over (prop259).
    pub failover_fraction: f64,
    pub too_many_guards: usize,
    pub too_recently_secs: u64,
    pub retry_delay_secs: u64,
    pub retry_multiplier: f64,
    /// Keep primary lists sorted by descending relay bandwidth.
    pub prioritize_by_bandwidth: bool,
    /// Sample new guards weighted by bandwidth instead of uniformly.
    pub weighted_sampling: bool,
}

impl ClientParams {
    /// Defaults for the given proposal.
    pub fn new(proposal: Proposal) -> Self {
        Self {
            proposal,
            guard_threshold_utopic: DEFAULT_GUARD_THRESHOLD_UTOPIC,
            guard_threshold_dystopic: DEFAULT_GUARD_THRESHOLD_DYSTOPIC,
            guard_fraction_utopic: DEFAULT_GUARD_FRACTION_UTOPIC,
            guard_fraction_dystopic: DEFAULT_GUARD_FRACTION_DYSTOPIC,
            failover_fraction: DEFAULT_FAILOVER_FRACTION,
            too_many_guards: DEFAULT_TOO_MANY_GUARDS,
            too_recently_secs: DEFAULT_TOO_RECENTLY_SECS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
            prioritize_by_bandwidth: false,
            weighted_sampling: false,
        }
    }

    pub fn too_recently(&self) -> Duration {
        Duration::from_secs(self.too_recently_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }
        fn fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(invalid(field, format!("{value} is not in (0, 1]")))
            }
        }

        match self.proposal {
            Proposal::Prop241 => {
                if self.guard_threshold_utopic == 0 {
                    return Err(invalid("guard-threshold-utopic", "must be at least 1"));
                }
                if self.guard_threshold_dystopic == 0 {
                    return Err(invalid("guard-threshold-dystopic", "must be at least 1"));
                }
            }
            Proposal::Prop259 => {
                fraction("guard-fraction-utopic", self.guard_fraction_utopic)?;
                fraction("guard-fraction-dystopic", self.guard_fraction_dystopic)?;
                fraction("failover-fraction", self.failover_fraction)?;
            }
        }
        if self.too_many_guards == 0 {
            return Err(invalid("too-many-guards", "must be at least 1"));
        }
        if !(self.retry_multiplier.is_finite() && self.retry_multiplier >= 1.0) {
            return Err(invalid(
                "retry-multiplier",
                format!("{} is below 1, delays would shrink", self.retry_multiplier),
            ));
        }
        Ok(())
    }
}

impl Default for ClientParams {
    fn default() -> Self {
        Self::new(Proposal::Prop241)
    }
}

/// Client parameters as given on the command line or in a TOML file.
///
/// Every field is optional so a file and command-line flags can be layered;
/// flags take precedence.
#[derive(clap::Args, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConfigArgs {
    /// Where the proposals diverge, follow prop#241 (absolute guard counts).
    #[arg(long, conflicts_with = "prop259")]
    pub prop241: bool,

    /// Where the proposals diverge, follow prop#259 (fractional thresholds, failover).
    #[arg(long)]
    pub prop259: bool,

    /// TOML file with client parameters. Command-line flags override it.
    #[arg(long = "params", env = "GUARDSIM_PARAMS")]
    #[serde(skip)]
    pub params_file: Option<PathBuf>,

    /// Primary guard ceiling for the utopic pool (prop241).
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard_threshold_utopic: Option<usize>,

    /// Primary guard ceiling for the dystopic pool (prop241).
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard_threshold_dystopic: Option<usize>,

    /// Utopic ceiling as a share of the consensus (prop259).
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard_fraction_utopic: Option<f64>,

    /// Dystopic ceiling as a share of the consensus (prop259).
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard_fraction_dystopic: Option<f64>,

    /// Share of the ceiling that must be exhausted before failing over (prop259).
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failover_fraction: Option<f64>,

    /// Give up after adding this many guards within the recency window.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub too_many_guards: Option<usize>,

    /// Recency window of the guard-churn circuit breaker, in seconds.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub too_recently_secs: Option<u64>,

    /// Initial delay of the retry timers, in seconds.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,

    /// Growth factor of the retry timers.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_multiplier: Option<f64>,

    /// Keep primary guard lists ordered by descending bandwidth.
    #[arg(long)]
    pub prioritize_by_bandwidth: bool,

    /// Sample new guards weighted by bandwidth.
    #[arg(long)]
    pub weighted_sampling: bool,
}

impl ConfigArgs {
    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = ?path, "Reading parameter file");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Layer `self` (higher precedence) over `other`.
    fn merge(self, other: ConfigArgs) -> ConfigArgs {
        ConfigArgs {
            prop241: self.prop241 || other.prop241,
            prop259: self.prop259 || other.prop259,
            params_file: self.params_file,
            guard_threshold_utopic: self.guard_threshold_utopic.or(other.guard_threshold_utopic),
            guard_threshold_dystopic: self
                .guard_threshold_dystopic
                .or(other.guard_threshold_dystopic),
            guard_fraction_utopic: self.guard_fraction_utopic.or(other.guard_fraction_utopic),
            guard_fraction_dystopic: self
                .guard_fraction_dystopic
                .or(other.guard_fraction_dystopic),
            failover_fraction: self.failover_fraction.or(other.failover_fraction),
            too_many_guards: self.too_many_guards.or(other.too_many_guards),
            too_recently_secs: self.too_recently_secs.or(other.too_recently_secs),
            retry_delay_secs: self.retry_delay_secs.or(other.retry_delay_secs),
            retry_multiplier: self.retry_multiplier.or(other.retry_multiplier),
            prioritize_by_bandwidth: self.prioritize_by_bandwidth || other.prioritize_by_bandwidth,
            weighted_sampling: self.weighted_sampling || other.weighted_sampling,
        }
    }

    /// Resolve the parameter file (if any), apply defaults and validate.
    pub fn build(self) -> Result<ClientParams, ConfigError> {
        let args = match self.params_file.clone() {
            Some(path) => {
                let file = Self::read_file(&path)?;
                self.merge(file)
            }
            None => self,
        };

        let proposal = Proposal::from_flags(args.prop241, args.prop259)?;
        let defaults = ClientParams::new(proposal);
        let params = ClientParams {
            proposal,
            guard_threshold_utopic: args
                .guard_threshold_utopic
                .unwrap_or(defaults.guard_threshold_utopic),
            guard_threshold_dystopic: args
                .guard_threshold_dystopic
                .unwrap_or(defaults.guard_threshold_dystopic),
            guard_fraction_utopic: args
                .guard_fraction_utopic
                .unwrap_or(defaults.guard_fraction_utopic),
            guard_fraction_dystopic: args
                .guard_fraction_dystopic
                .unwrap_or(defaults.guard_fraction_dystopic),
            failover_fraction: args.failover_fraction.unwrap_or(defaults.failover_fraction),
            too_many_guards: args.too_many_guards.unwrap_or(defaults.too_many_guards),
            too_recently_secs: args.too_recently_secs.unwrap_or(defaults.too_recently_secs),
            retry_delay_secs: args.retry_delay_secs.unwrap_or(defaults.retry_delay_secs),
            retry_multiplier: args.retry_multiplier.unwrap_or(defaults.retry_multiplier),
            prioritize_by_bandwidth: args.prioritize_by_bandwidth,
            weighted_sampling: args.weighted_sampling,
        };
        params.validate()?;
        tracing::debug!(?params, "Client parameters resolved");
        Ok(params)
    }
}

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: std::sync::atomic::AtomicBool =
            std::sync::atomic::AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConfigArgs {
        ConfigArgs::default()
    }

    #[test]
    fn exactly_one_proposal_required() {
        assert!(matches!(
            args().build(),
            Err(ConfigError::MissingProposal)
        ));
        let both = ConfigArgs {
            prop241: true,
            prop259: true,
            ..args()
        };
        assert!(matches!(both.build(), Err(ConfigError::ConflictingProposals)));

        let one = ConfigArgs {
            prop259: true,
            ..args()
        };
        assert_eq!(one.build().unwrap().proposal, Proposal::Prop259);
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let params = ConfigArgs {
            prop241: true,
            too_many_guards: Some(10),
            retry_delay_secs: Some(5),
            prioritize_by_bandwidth: true,
            ..args()
        }
        .build()
        .unwrap();
        assert_eq!(params.too_many_guards, 10);
        assert_eq!(params.retry_delay(), Duration::from_secs(5));
        assert_eq!(params.too_recently_secs, DEFAULT_TOO_RECENTLY_SECS);
        assert!(params.prioritize_by_bandwidth);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_fraction = ConfigArgs {
            prop259: true,
            guard_fraction_utopic: Some(1.5),
            ..args()
        };
        assert!(matches!(
            bad_fraction.build(),
            Err(ConfigError::Invalid {
                field: "guard-fraction-utopic",
                ..
            })
        ));

        let shrinking = ConfigArgs {
            prop241: true,
            retry_multiplier: Some(0.5),
            ..args()
        };
        assert!(shrinking.build().is_err());

        let zero_ceiling = ConfigArgs {
            prop241: true,
            guard_threshold_dystopic: Some(0),
            ..args()
        };
        assert!(zero_ceiling.build().is_err());
    }

    #[test]
    fn parameter_file_is_layered_under_flags() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("guardsim-params-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("params.toml");
        fs::write(
            &path,
            r#"
prop259 = true
guard-fraction-utopic = 0.1
too-many-guards = 12
retry-delay-secs = 30
"#,
        )?;

        let params = ConfigArgs {
            params_file: Some(path.clone()),
            retry_delay_secs: Some(90),
            ..args()
        }
        .build()?;
        assert_eq!(params.proposal, Proposal::Prop259);
        assert_eq!(params.guard_fraction_utopic, 0.1);
        assert_eq!(params.too_many_guards, 12);
        assert_eq!(params.retry_delay_secs, 90);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn missing_parameter_file() {
        let missing = ConfigArgs {
            prop241: true,
            params_file: Some(PathBuf::from("/definitely/not/here.toml")),
            ..args()
        };
        assert!(matches!(missing.build(), Err(ConfigError::Io { .. })));
    }
}
