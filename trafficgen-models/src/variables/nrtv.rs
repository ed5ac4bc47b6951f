//! Tunable parameters of the near-real-time video model.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trafficgen_core::validate::{
    validate_non_negative, validate_ordered, validate_pareto_shape, validate_positive,
};
use trafficgen_core::{
    duration_from_millis_f64, BoundedPareto, Exponential, RandomStreams, Validate,
    ValidationError, ValidationResult,
};

use crate::error::ModelError;

/// Number of random streams one [`NrtvVariables`] draws from.
pub const NRTV_STREAM_COUNT: u64 = 4;

/// Parameters of the video streaming model.
///
/// Defaults follow the NGMN near-real-time video model: 10 frames per second,
/// 8 slices per frame, Pareto distributed slice sizes and encoding delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NrtvVariablesConfig {
    /// Mean number of frames in one video.
    pub num_of_frames_mean: f64,
    pub frame_interval_ms: f64,
    pub num_of_slices: u16,
    pub slice_size_max: u32,
    pub slice_size_shape: f64,
    pub slice_size_scale: f64,
    pub slice_encode_delay_max_ms: f64,
    pub slice_encode_delay_shape: f64,
    pub slice_encode_delay_scale_ms: f64,
    /// Client side playback buffer target. Carried for completeness; no buffering
    /// logic consumes it.
    pub dejitter_buffer_window_size_ms: f64,
    /// Mean pause between two videos.
    pub idle_time_mean_ms: f64,
    /// First random stream; `None` assigns streams automatically.
    pub stream: Option<u64>,
}

impl Default for NrtvVariablesConfig {
    fn default() -> Self {
        Self {
            num_of_frames_mean: 3000.0,
            frame_interval_ms: 100.0,
            num_of_slices: 8,
            slice_size_max: 250,
            slice_size_shape: 1.2,
            slice_size_scale: 40.0,
            slice_encode_delay_max_ms: 12.5,
            slice_encode_delay_shape: 1.2,
            slice_encode_delay_scale_ms: 2.5,
            dejitter_buffer_window_size_ms: 5000.0,
            idle_time_mean_ms: 5000.0,
            stream: None,
        }
    }
}

impl NrtvVariablesConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> ValidationResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Validate for NrtvVariablesConfig {
    fn validate(&self) -> ValidationResult<()> {
        validate_positive("num_of_frames_mean", self.num_of_frames_mean)?;
        validate_positive("frame_interval_ms", self.frame_interval_ms)?;
        validate_positive("num_of_slices", self.num_of_slices)?;
        validate_pareto_shape("slice_size_shape", self.slice_size_shape)?;
        validate_positive("slice_size_scale", self.slice_size_scale)?;
        validate_ordered(
            "slice_size_scale",
            self.slice_size_scale,
            "slice_size_max",
            f64::from(self.slice_size_max),
        )?;
        validate_pareto_shape("slice_encode_delay_shape", self.slice_encode_delay_shape)?;
        validate_positive("slice_encode_delay_scale_ms", self.slice_encode_delay_scale_ms)?;
        validate_ordered(
            "slice_encode_delay_scale_ms",
            self.slice_encode_delay_scale_ms,
            "slice_encode_delay_max_ms",
            self.slice_encode_delay_max_ms,
        )?;
        validate_non_negative("dejitter_buffer_window_size_ms", self.dejitter_buffer_window_size_ms)?;
        validate_non_negative("idle_time_mean_ms", self.idle_time_mean_ms)?;
        Ok(())
    }
}

/// Random variables and constants of one video streaming application.
#[derive(Debug)]
pub struct NrtvVariables {
    config: NrtvVariablesConfig,
    num_of_frames: Exponential,
    slice_size: BoundedPareto,
    /// Sampled in microseconds.
    slice_encode_delay: BoundedPareto,
    idle_time: Exponential,
}

impl NrtvVariables {
    /// Validate `config` and bind its variables to streams from `streams`.
    pub fn new(config: NrtvVariablesConfig, streams: &mut RandomStreams) -> Result<Self, ModelError> {
        config.validate()?;
        let mut block = streams.assign(config.stream, NRTV_STREAM_COUNT);
        let num_of_frames = Exponential::new(config.num_of_frames_mean, block.next_rng())?;
        let slice_size = BoundedPareto::new(
            config.slice_size_shape,
            config.slice_size_scale,
            f64::from(config.slice_size_max),
            block.next_rng(),
        )?;
        let slice_encode_delay = BoundedPareto::new(
            config.slice_encode_delay_shape,
            config.slice_encode_delay_scale_ms * 1000.0,
            config.slice_encode_delay_max_ms * 1000.0,
            block.next_rng(),
        )?;
        let idle_time = Exponential::new(config.idle_time_mean_ms, block.next_rng())?;
        Ok(Self {
            config,
            num_of_frames,
            slice_size,
            slice_encode_delay,
            idle_time,
        })
    }

    pub fn config(&self) -> &NrtvVariablesConfig {
        &self.config
    }

    /// Length of a video in frames, at least one.
    pub fn num_of_frames(&mut self) -> u32 {
        let frames = self.num_of_frames.sample().ceil();
        if frames >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            (frames as u32).max(1)
        }
    }

    pub fn frame_interval(&self) -> Duration {
        duration_from_millis_f64(self.config.frame_interval_ms)
    }

    pub fn num_of_slices(&self) -> u16 {
        self.config.num_of_slices
    }

    /// Payload bytes of one slice.
    pub fn slice_size(&mut self) -> u32 {
        u32::try_from(self.slice_size.sample_bounded_integer()).unwrap_or(u32::MAX)
    }

    pub fn slice_encoding_delay(&mut self) -> Duration {
        Duration::from_micros(self.slice_encode_delay.sample_bounded_integer())
    }

    pub fn dejitter_buffer_window_size(&self) -> Duration {
        duration_from_millis_f64(self.config.dejitter_buffer_window_size_ms)
    }

    pub fn idle_time(&mut self) -> Duration {
        duration_from_millis_f64(self.idle_time.sample())
    }
}
