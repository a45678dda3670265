use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ConfigError;

/// Kind of data the model is trained on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Token sequences.
    Text,
    /// Images flattened to pixel tokens.
    Image,
}

/// Masking schedule of the diffusion process.
///
/// Written `linear`, `cosine` or `poly<exponent>` (e.g. `poly3`) in configs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NoiseSchedule {
    /// Masking probability grows linearly with time.
    Linear,
    /// Cosine shaped masking probability.
    Cosine,
    /// Masking probability `t^exponent`.
    Poly(f64),
}

impl fmt::Display for NoiseSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseSchedule::Linear => f.write_str("linear"),
            NoiseSchedule::Cosine => f.write_str("cosine"),
            NoiseSchedule::Poly(exponent) => write!(f, "poly{exponent}"),
        }
    }
}

impl FromStr for NoiseSchedule {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |message: String| ConfigError::InvalidValue {
            field: "noise_schedule",
            message,
        };

        match value {
            "linear" => Ok(NoiseSchedule::Linear),
            "cosine" => Ok(NoiseSchedule::Cosine),
            _ => {
                let exponent = value
                    .strip_prefix("poly")
                    .ok_or_else(|| invalid(format!("`{value}` is not linear, cosine or poly<exponent>")))?;
                let exponent: f64 = exponent
                    .parse()
                    .map_err(|err| invalid(format!("bad exponent in `{value}`: {err}")))?;
                if !exponent.is_finite() || exponent <= 0.0 {
                    return Err(invalid(format!("exponent of `{value}` must be positive")));
                }
                Ok(NoiseSchedule::Poly(exponent))
            }
        }
    }
}

impl TryFrom<String> for NoiseSchedule {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoiseSchedule> for String {
    fn from(schedule: NoiseSchedule) -> Self {
        schedule.to_string()
    }
}

/// How tokens are unmasked when sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Sampler {
    /// Draws every unmasked token from the model distribution.
    Ancestral,
    /// Takes the most likely token.
    Mean,
    /// Nucleus sampling, see `topp` in [`Md4Config`](crate::Md4Config).
    TopP,
}

/// Spacing of the time steps visited while sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SamplingGrid {
    /// Equally spaced steps.
    Uniform,
    /// Cosine spaced steps.
    Cosine,
}

/// Random seed of a run: a single integer or a tuple of them.
///
/// Configs leave the seed unset (`null`) to have one derived from the work unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    /// One integer.
    Single(u64),
    /// Several integers, typically an experiment id and a work unit id.
    Tuple(Vec<u64>),
}

impl Default for Seed {
    fn default() -> Self {
        Seed::Single(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("linear", NoiseSchedule::Linear)]
    #[case("cosine", NoiseSchedule::Cosine)]
    #[case("poly3", NoiseSchedule::Poly(3.0))]
    #[case("poly0.5", NoiseSchedule::Poly(0.5))]
    fn test_noise_schedule_parses(#[case] value: &str, #[case] expected: NoiseSchedule) {
        let schedule: NoiseSchedule = value.parse().unwrap();

        assert_eq!(schedule, expected);
        assert_eq!(schedule.to_string(), value);
    }

    #[rstest]
    #[case("quadratic")]
    #[case("poly")]
    #[case("poly-1")]
    fn test_noise_schedule_rejects(#[case] value: &str) {
        let result = value.parse::<NoiseSchedule>();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "noise_schedule", .. })
        ));
    }

    #[test]
    fn test_options_use_config_spelling() {
        assert_eq!(serde_json::to_string(&Sampler::TopP).unwrap(), "\"topp\"");
        assert_eq!("topp".parse::<Sampler>().unwrap(), Sampler::TopP);
        assert_eq!(TaskType::Image.to_string(), "image");
        assert_eq!(
            serde_json::from_str::<NoiseSchedule>("\"poly2\"").unwrap(),
            NoiseSchedule::Poly(2.0)
        );
    }

    #[test]
    fn test_seed_accepts_integer_or_tuple() {
        assert_eq!(serde_json::from_str::<Seed>("7").unwrap(), Seed::Single(7));
        assert_eq!(
            serde_json::from_str::<Seed>("[1, 2]").unwrap(),
            Seed::Tuple(vec![1, 2])
        );
    }
}
