//! Parameter schemas validated at the call boundary.
//!
//! Ranges and defaults mirror the knobs the Omost reference UI exposes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ParamsError> {
    if value < min || value > max {
        return Err(ParamsError::OutOfRange {
            name,
            min,
            max,
            value,
        });
    }
    Ok(())
}

/// Sampling parameters for one chat turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatParams {
    pub max_new_tokens: usize,
    pub top_p: f64,
    pub temperature: f64,
    pub seed: Option<u64>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 4096,
            top_p: 0.9,
            temperature: 0.6,
            seed: None,
        }
    }
}

impl ChatParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_range("max_new_tokens", self.max_new_tokens as f64, 128.0, 4096.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        Ok(())
    }
}

/// Blend strengths applied to the encoded regions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub global_strength: f32,
    pub region_strength: f32,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            global_strength: 0.2,
            region_strength: 0.8,
        }
    }
}

impl LayoutParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_range("global_strength", self.global_strength as f64, 0.0, 1.0)?;
        check_range("region_strength", self.region_strength as f64, 0.0, 1.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_defaults_are_valid() {
        assert!(ChatParams::default().validate().is_ok());
    }

    #[test]
    fn layout_defaults_are_valid() {
        let params = LayoutParams::default();
        assert!(params.validate().is_ok());
        assert!((params.global_strength - 0.2).abs() < f32::EPSILON);
        assert!((params.region_strength - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn max_new_tokens_bounds() {
        let mut params = ChatParams {
            max_new_tokens: 127,
            ..Default::default()
        };
        assert!(params.validate().is_err());
        params.max_new_tokens = 128;
        assert!(params.validate().is_ok());
        params.max_new_tokens = 4097;
        assert!(params.validate().is_err());
    }

    #[test]
    fn temperature_and_top_p_bounds() {
        let mut params = ChatParams::default();
        params.temperature = 2.5;
        assert!(params.validate().is_err());
        params.temperature = 0.0;
        params.top_p = 1.1;
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("top_p"));
    }

    #[test]
    fn strengths_out_of_range() {
        let params = LayoutParams {
            global_strength: -0.1,
            region_strength: 0.8,
        };
        assert!(matches!(
            params.validate(),
            Err(ParamsError::OutOfRange { name: "global_strength", .. })
        ));
    }
}
