//! Tunable parameters of the web browsing model.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use trafficgen_core::validate::{
    validate_non_negative, validate_ordered, validate_pareto_shape, validate_positive,
    validate_range,
};
use trafficgen_core::{
    duration_from_millis_f64, BoundedLogNormal, BoundedPareto, Exponential, IntegerSampler,
    RandomStreams, SimRng, Validate, ValidationError, ValidationResult,
};

use crate::error::ModelError;

/// Number of random streams one [`HttpVariables`] draws from.
pub const HTTP_STREAM_COUNT: u64 = 6;

/// Parameters of the web browsing model.
///
/// Sizes are in bytes, times in milliseconds. Defaults are the calibrated values
/// of the 3GPP web browsing model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpVariablesConfig {
    /// Size of every request on the wire, header included.
    pub request_size: u32,
    pub main_object_generation_delay_ms: f64,
    pub embedded_object_generation_delay_ms: f64,
    pub main_object_size_mean: f64,
    pub main_object_size_std_dev: f64,
    pub main_object_size_min: u32,
    pub main_object_size_max: u32,
    pub embedded_object_size_mean: f64,
    pub embedded_object_size_std_dev: f64,
    pub embedded_object_size_min: u32,
    pub embedded_object_size_max: u32,
    /// Upper bound of the embedded object count before normalisation.
    pub num_of_embedded_objects_max: u32,
    pub num_of_embedded_objects_shape: f64,
    pub num_of_embedded_objects_scale: f64,
    pub reading_time_mean_ms: f64,
    pub parsing_time_mean_ms: f64,
    /// Fixed delay before the server starts serving any object.
    pub response_delay_ms: f64,
    pub high_mtu_size: u32,
    pub low_mtu_size: u32,
    pub high_mtu_probability: f64,
    /// First random stream; `None` assigns streams automatically.
    pub stream: Option<u64>,
}

impl Default for HttpVariablesConfig {
    fn default() -> Self {
        Self {
            request_size: 350,
            main_object_generation_delay_ms: 0.0,
            embedded_object_generation_delay_ms: 0.0,
            main_object_size_mean: 10710.0,
            main_object_size_std_dev: 25032.0,
            main_object_size_min: 100,
            main_object_size_max: 2_000_000,
            embedded_object_size_mean: 7758.0,
            embedded_object_size_std_dev: 126168.0,
            embedded_object_size_min: 50,
            embedded_object_size_max: 2_000_000,
            num_of_embedded_objects_max: 55,
            num_of_embedded_objects_shape: 1.1,
            num_of_embedded_objects_scale: 2.0,
            reading_time_mean_ms: 30_000.0,
            parsing_time_mean_ms: 130.0,
            response_delay_ms: 0.0,
            high_mtu_size: 1460,
            low_mtu_size: 536,
            high_mtu_probability: 0.76,
            stream: None,
        }
    }
}

impl HttpVariablesConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> ValidationResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Validate for HttpVariablesConfig {
    fn validate(&self) -> ValidationResult<()> {
        validate_positive("request_size", self.request_size)?;
        validate_non_negative("main_object_generation_delay_ms", self.main_object_generation_delay_ms)?;
        validate_non_negative(
            "embedded_object_generation_delay_ms",
            self.embedded_object_generation_delay_ms,
        )?;
        validate_positive("main_object_size_mean", self.main_object_size_mean)?;
        validate_non_negative("main_object_size_std_dev", self.main_object_size_std_dev)?;
        validate_ordered(
            "main_object_size_min",
            self.main_object_size_min,
            "main_object_size_max",
            self.main_object_size_max,
        )?;
        validate_positive("embedded_object_size_mean", self.embedded_object_size_mean)?;
        validate_non_negative("embedded_object_size_std_dev", self.embedded_object_size_std_dev)?;
        validate_ordered(
            "embedded_object_size_min",
            self.embedded_object_size_min,
            "embedded_object_size_max",
            self.embedded_object_size_max,
        )?;
        validate_pareto_shape("num_of_embedded_objects_shape", self.num_of_embedded_objects_shape)?;
        validate_positive("num_of_embedded_objects_scale", self.num_of_embedded_objects_scale)?;
        validate_ordered(
            "num_of_embedded_objects_scale",
            self.num_of_embedded_objects_scale,
            "num_of_embedded_objects_max",
            f64::from(self.num_of_embedded_objects_max),
        )?;
        validate_non_negative("reading_time_mean_ms", self.reading_time_mean_ms)?;
        validate_non_negative("parsing_time_mean_ms", self.parsing_time_mean_ms)?;
        validate_non_negative("response_delay_ms", self.response_delay_ms)?;
        // every chunk must have room for a header and at least one byte
        validate_range("low_mtu_size", self.low_mtu_size, 15, u32::MAX)?;
        validate_range("high_mtu_size", self.high_mtu_size, 15, u32::MAX)?;
        validate_range("high_mtu_probability", self.high_mtu_probability, 0.0, 1.0)?;
        Ok(())
    }
}

/// Random variables and constants of one web browsing application.
pub struct HttpVariables {
    config: HttpVariablesConfig,
    main_object_size: BoundedLogNormal,
    embedded_object_size: BoundedLogNormal,
    num_of_embedded_objects: Box<dyn IntegerSampler>,
    reading_time: Exponential,
    parsing_time: Exponential,
    mtu_rng: SimRng,
}

impl std::fmt::Debug for HttpVariables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVariables").field("config", &self.config).finish_non_exhaustive()
    }
}

impl HttpVariables {
    /// Validate `config` and bind its variables to streams from `streams`.
    pub fn new(config: HttpVariablesConfig, streams: &mut RandomStreams) -> Result<Self, ModelError> {
        config.validate()?;
        let mut block = streams.assign(config.stream, HTTP_STREAM_COUNT);
        let main_object_size = BoundedLogNormal::new(
            config.main_object_size_mean,
            config.main_object_size_std_dev,
            u64::from(config.main_object_size_min),
            u64::from(config.main_object_size_max),
            block.next_rng(),
        )?;
        let embedded_object_size = BoundedLogNormal::new(
            config.embedded_object_size_mean,
            config.embedded_object_size_std_dev,
            u64::from(config.embedded_object_size_min),
            u64::from(config.embedded_object_size_max),
            block.next_rng(),
        )?;
        let num_of_embedded_objects = BoundedPareto::new(
            config.num_of_embedded_objects_shape,
            config.num_of_embedded_objects_scale,
            f64::from(config.num_of_embedded_objects_max),
            block.next_rng(),
        )?
        .normalized();
        let reading_time = Exponential::new(config.reading_time_mean_ms, block.next_rng())?;
        let parsing_time = Exponential::new(config.parsing_time_mean_ms, block.next_rng())?;
        let mtu_rng = block.next_rng();
        Ok(Self {
            config,
            main_object_size,
            embedded_object_size,
            num_of_embedded_objects: Box::new(num_of_embedded_objects),
            reading_time,
            parsing_time,
            mtu_rng,
        })
    }

    pub fn config(&self) -> &HttpVariablesConfig {
        &self.config
    }

    /// Replace the embedded object count distribution, e.g. with a constant.
    pub fn set_num_of_embedded_objects_sampler(&mut self, sampler: Box<dyn IntegerSampler>) {
        self.num_of_embedded_objects = sampler;
    }

    pub fn request_size(&self) -> u32 {
        self.config.request_size
    }

    pub fn main_object_generation_delay(&self) -> Duration {
        duration_from_millis_f64(self.config.main_object_generation_delay_ms)
    }

    pub fn embedded_object_generation_delay(&self) -> Duration {
        duration_from_millis_f64(self.config.embedded_object_generation_delay_ms)
    }

    pub fn response_delay(&self) -> Duration {
        duration_from_millis_f64(self.config.response_delay_ms)
    }

    pub fn main_object_size(&mut self) -> u32 {
        to_u32(self.main_object_size.sample_bounded_integer())
    }

    pub fn embedded_object_size(&mut self) -> u32 {
        to_u32(self.embedded_object_size.sample_bounded_integer())
    }

    pub fn num_of_embedded_objects(&mut self) -> u32 {
        to_u32(self.num_of_embedded_objects.sample_integer())
    }

    pub fn reading_time(&mut self) -> Duration {
        duration_from_millis_f64(self.reading_time.sample())
    }

    pub fn parsing_time(&mut self) -> Duration {
        duration_from_millis_f64(self.parsing_time.sample())
    }

    /// MTU of a new connection: the high size with `high_mtu_probability`, else the low one.
    pub fn mtu_size(&mut self) -> u32 {
        if self.mtu_rng.gen_bool(self.config.high_mtu_probability) {
            self.config.high_mtu_size
        } else {
            self.config.low_mtu_size
        }
    }
}

fn to_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trafficgen_core::ConstantInteger;

    #[test]
    fn test_defaults_validate() {
        assert!(HttpVariablesConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HttpVariablesConfig::from_json_str(r#"{"reading_time_mean_ms": 1000.0, "stream": 7}"#).unwrap();
        assert_eq!(config.reading_time_mean_ms, 1000.0);
        assert_eq!(config.stream, Some(7));
        assert_eq!(config.request_size, 350);
    }

    #[test]
    fn test_bad_configs_rejected() {
        let inverted = HttpVariablesConfig {
            main_object_size_min: 5000,
            main_object_size_max: 100,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ValidationError::ConstraintViolation { field, .. }) if field == "main_object_size_min"
        ));

        let shape_one = HttpVariablesConfig {
            num_of_embedded_objects_shape: 1.0,
            ..Default::default()
        };
        assert!(HttpVariables::new(shape_one, &mut RandomStreams::default()).is_err());

        assert!(matches!(
            HttpVariablesConfig::from_json_str("{ not json"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_samples_respect_bounds() {
        let mut vars = HttpVariables::new(HttpVariablesConfig::default(), &mut RandomStreams::new(3)).unwrap();
        for _ in 0..2_000 {
            assert!((100..=2_000_000).contains(&vars.main_object_size()));
            assert!((50..=2_000_000).contains(&vars.embedded_object_size()));
            assert!(vars.num_of_embedded_objects() <= 53);
            let mtu = vars.mtu_size();
            assert!(mtu == 1460 || mtu == 536);
        }
    }

    #[test]
    fn test_fixed_embedded_object_count() {
        let mut vars = HttpVariables::new(HttpVariablesConfig::default(), &mut RandomStreams::new(3)).unwrap();
        vars.set_num_of_embedded_objects_sampler(Box::new(ConstantInteger(3)));
        assert_eq!(vars.num_of_embedded_objects(), 3);
    }

    #[test]
    fn test_explicit_stream_reproduces_draws() {
        let config = HttpVariablesConfig {
            stream: Some(100),
            ..Default::default()
        };
        let mut a = HttpVariables::new(config.clone(), &mut RandomStreams::new(5)).unwrap();
        let mut streams = RandomStreams::new(5);
        // other containers drawing from the automatic range do not matter
        let _other = HttpVariables::new(HttpVariablesConfig::default(), &mut streams).unwrap();
        let mut b = HttpVariables::new(config, &mut streams).unwrap();
        for _ in 0..50 {
            assert_eq!(a.main_object_size(), b.main_object_size());
            assert_eq!(a.reading_time(), b.reading_time());
        }
    }
}
