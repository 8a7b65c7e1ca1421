//! Output size resolution for a pass.

use postfx_config::ScaleDesc;

use crate::error::{ChainError, Result};

/// Resolve one axis of a scale rule.
///
/// `input` is the pass's source size on that axis and `viewport` the final
/// viewport size. Results are rounded to the nearest pixel.
pub fn resolve_axis(rule: ScaleDesc, input: u32, viewport: u32) -> Result<u32> {
    validate(rule)?;
    let (factor, base) = match rule {
        ScaleDesc::Absolute { size } => return Ok(size),
        ScaleDesc::Input { factor } => (factor, input),
        ScaleDesc::Viewport { factor } => (factor, viewport),
    };
    let out = (factor as f64 * base as f64).round();
    if out < 1.0 {
        return Err(ChainError::Config(format!(
            "scale {:?} of {} resolves to an empty axis",
            rule, base
        )));
    }
    if out > u32::MAX as f64 {
        return Err(ChainError::Config(format!(
            "scale {:?} of {} overflows",
            rule, base
        )));
    }
    Ok(out as u32)
}

/// Reject rules that can never resolve, independent of any input size.
pub fn validate(rule: ScaleDesc) -> Result<()> {
    match rule {
        ScaleDesc::Absolute { size: 0 } => {
            Err(ChainError::Config("absolute scale of 0 pixels".into()))
        }
        ScaleDesc::Absolute { .. } => Ok(()),
        ScaleDesc::Input { factor } | ScaleDesc::Viewport { factor } => {
            if factor.is_finite() && factor > 0.0 {
                Ok(())
            } else {
                Err(ChainError::Config(format!(
                    "scale factor must be positive, got {}",
                    factor
                )))
            }
        }
    }
}

/// Resolve both axes of a pass's scale rules.
pub fn resolve(
    rules: (ScaleDesc, ScaleDesc),
    input: (u32, u32),
    viewport: (u32, u32),
) -> Result<(u32, u32)> {
    Ok((
        resolve_axis(rules.0, input.0, viewport.0)?,
        resolve_axis(rules.1, input.1, viewport.1)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both(rule: ScaleDesc) -> (ScaleDesc, ScaleDesc) {
        (rule, rule)
    }

    #[test]
    fn input_rule_scales_source() {
        let out = resolve(both(ScaleDesc::Input { factor: 2.0 }), (320, 240), (1920, 1080));
        assert_eq!(out.unwrap(), (640, 480));
    }

    #[test]
    fn viewport_rule_scales_viewport() {
        let out = resolve(both(ScaleDesc::Viewport { factor: 1.0 }), (320, 240), (1920, 1080));
        assert_eq!(out.unwrap(), (1920, 1080));
    }

    #[test]
    fn absolute_rule_ignores_inputs() {
        let rules = (ScaleDesc::Absolute { size: 256 }, ScaleDesc::Absolute { size: 224 });
        for (input, viewport) in [((1, 1), (1, 1)), ((4096, 4096), (640, 480))] {
            assert_eq!(resolve(rules, input, viewport).unwrap(), (256, 224));
        }
    }

    #[test]
    fn mixed_axes_and_rounding() {
        let rules = (ScaleDesc::Input { factor: 1.5 }, ScaleDesc::Viewport { factor: 0.5 });
        assert_eq!(resolve(rules, (255, 100), (800, 601)).unwrap(), (383, 301));
    }

    #[test]
    fn resolution_is_deterministic() {
        let rules = both(ScaleDesc::Input { factor: 1.333 });
        let first = resolve(rules, (333, 777), (10, 10)).unwrap();
        for _ in 0..8 {
            assert_eq!(resolve(rules, (333, 777), (10, 10)).unwrap(), first);
        }
    }

    #[test]
    fn invalid_factors_are_config_errors() {
        for factor in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let err = resolve_axis(ScaleDesc::Input { factor }, 320, 640).unwrap_err();
            assert!(matches!(err, ChainError::Config(_)), "factor {}", factor);
        }
        assert!(matches!(
            resolve_axis(ScaleDesc::Absolute { size: 0 }, 320, 640),
            Err(ChainError::Config(_))
        ));
        assert!(validate(ScaleDesc::Viewport { factor: 0.001 }).is_ok());
        assert!(validate(ScaleDesc::Input { factor: -2.0 }).is_err());
        // 0.001 * 100 rounds to zero.
        assert!(matches!(
            resolve_axis(ScaleDesc::Viewport { factor: 0.001 }, 320, 100),
            Err(ChainError::Config(_))
        ));
    }
}
