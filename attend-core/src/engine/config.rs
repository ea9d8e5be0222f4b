use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AttendError, Result};
use crate::speech::SpeechThresholds;

/// Configuration for [`TurnEngine`](super::TurnEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TurnConfig {
    /// Capture sample rate (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Interleaved channels per frame. Default: 1.
    pub channels: u16,
    /// Samples per channel in one captured frame. Default: 512 (32 ms at 16 kHz).
    pub frame_samples: usize,
    /// Seconds of audio kept in the rolling buffer. Default: 30.
    pub buffer_seconds: f64,
    /// Seconds a speech start must hold before it counts. Default: 0.25.
    pub speech_start_threshold: f64,
    /// Seconds of silence before a speech end is confirmed. Default: 0.8.
    pub speech_end_threshold: f64,
    /// Where the per-turn STT hand-off WAV is written. `None` keeps it in
    /// memory only.
    pub handoff_dir: Option<PathBuf>,
    /// Mode the conversation starts in. Default: `discuss_activities`.
    pub initial_mode: String,
    /// Speak the initial mode's greeting when the engine starts. Default: true.
    pub greet_on_start: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frame_samples: 512,
            buffer_seconds: 30.0,
            speech_start_threshold: 0.25,
            speech_end_threshold: 0.8,
            handoff_dir: None,
            initial_mode: crate::mode::Mode::DISCUSS_ACTIVITIES.to_owned(),
            greet_on_start: true,
        }
    }
}

/// File name of the per-turn hand-off inside `handoff_dir`.
pub const HANDOFF_FILE: &str = "to-process-for-STT.wav";

impl TurnConfig {
    /// Parse from JSON text; missing keys take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| AttendError::InvalidConfig(e.to_string()))?;
        let config = config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Clamp recoverable out-of-range values.
    pub fn normalize(mut self) -> Self {
        self.channels = self.channels.max(1);
        if !self.buffer_seconds.is_finite() || self.buffer_seconds < 1.0 {
            self.buffer_seconds = 1.0;
        }
        self.buffer_seconds = self.buffer_seconds.min(600.0);
        for threshold in [
            &mut self.speech_start_threshold,
            &mut self.speech_end_threshold,
        ] {
            if !threshold.is_finite() || *threshold < 0.0 {
                *threshold = 0.0;
            }
            *threshold = threshold.min(10.0);
        }
        self
    }

    /// # Errors
    /// `InvalidConfig` for values no clamp can repair.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AttendError::InvalidConfig("sampleRate must be > 0".into()));
        }
        if self.frame_samples == 0 {
            return Err(AttendError::InvalidConfig("frameSamples must be > 0".into()));
        }
        if crate::mode::Mode::from_name(&self.initial_mode, "").is_none() {
            return Err(AttendError::InvalidConfig(format!(
                "unknown initialMode {:?}",
                self.initial_mode
            )));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> SpeechThresholds {
        SpeechThresholds::from_secs(self.speech_start_threshold, self.speech_end_threshold)
    }

    /// Frames per second of captured audio.
    pub fn frames_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.frame_samples.max(1) as f64
    }

    pub fn buffer_capacity_frames(&self) -> usize {
        (self.frames_per_second() * self.buffer_seconds).ceil().max(1.0) as usize
    }

    /// Frames to back off before a segment's start: one end threshold's worth,
    /// covering onset lost to the start-confirmation delay.
    pub fn lead_in_frames(&self) -> usize {
        (self.frames_per_second() * self.speech_end_threshold).floor() as usize
    }

    pub fn handoff_path(&self) -> Option<PathBuf> {
        self.handoff_dir.as_ref().map(|dir| dir.join(HANDOFF_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_buffer_sizes() {
        let cfg = TurnConfig::default();
        assert_eq!(cfg.buffer_capacity_frames(), 938);
        assert_eq!(cfg.lead_in_frames(), 25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn lead_in_rounds_down_to_whole_frames() {
        let cfg = TurnConfig {
            speech_end_threshold: 0.3,
            ..TurnConfig::default()
        };
        // 31.25 frames/s * 0.3 s = 9.375 frames
        assert_eq!(cfg.lead_in_frames(), 9);
    }

    #[test]
    fn non_finite_thresholds_are_clamped() {
        let cfg = TurnConfig {
            speech_start_threshold: f64::NAN,
            speech_end_threshold: f64::INFINITY,
            ..TurnConfig::default()
        }
        .normalize();
        assert_eq!(cfg.speech_start_threshold, 0.0);
        assert_eq!(cfg.speech_end_threshold, 0.0);
        assert_eq!(cfg.lead_in_frames(), 0);
    }

    #[test]
    fn json_uses_camel_case_and_fills_defaults() {
        let cfg = TurnConfig::from_json_str(r#"{"speechEndThreshold": 1.2, "handoffDir": "/tmp/attend"}"#)
            .expect("valid config");
        assert_eq!(cfg.speech_end_threshold, 1.2);
        assert_eq!(cfg.sample_rate, 16_000);
        assert_eq!(
            cfg.handoff_path(),
            Some(PathBuf::from("/tmp/attend").join(HANDOFF_FILE))
        );
    }

    #[test]
    fn normalize_clamps_thresholds_and_retention() {
        let cfg = TurnConfig {
            buffer_seconds: 0.0,
            speech_start_threshold: -1.0,
            speech_end_threshold: f64::NAN,
            channels: 0,
            ..TurnConfig::default()
        }
        .normalize();
        assert_eq!(cfg.buffer_seconds, 1.0);
        assert_eq!(cfg.speech_start_threshold, 0.0);
        assert_eq!(cfg.speech_end_threshold, 0.0);
        assert_eq!(cfg.channels, 1);
    }

    #[test]
    fn unusable_values_are_rejected() {
        let err = TurnConfig::from_json_str(r#"{"sampleRate": 0}"#).unwrap_err();
        assert!(matches!(err, AttendError::InvalidConfig(_)));

        let err = TurnConfig::from_json_str(r#"{"initialMode": "nap"}"#).unwrap_err();
        assert!(err.to_string().contains("nap"));

        assert!(TurnConfig::from_json_str("not json").is_err());
    }
}
