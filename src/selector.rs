//! Picks the smallest model variant whose context capacity covers an
//! estimated token requirement.

use crate::config::{Model, Variant};
use crate::error::{Error, Result};

/// Safety margin applied on top of a raw token estimate.
pub fn required_capacity(estimate: u32, safety_absolute: u32, safety_fraction: f64) -> u32 {
    let fractional = (estimate as f64 * safety_fraction).ceil() as u32;
    estimate + safety_absolute.max(fractional)
}

/// Picks the first variant (in ascending-context order) whose context
/// covers `required`. Ties broken by declaration order, which the
/// ascending-context ordering already preserves.
pub fn select_variant<'a>(model: &'a Model, required: u32) -> Result<&'a Variant> {
    model
        .variants
        .iter()
        .find(|v| v.context >= required)
        .ok_or_else(|| Error::ContextTooLarge {
            required,
            max_context: model.max_context(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;

    fn model_with_contexts(contexts: &[u32]) -> Model {
        Model {
            name: "qwen3-30b-instruct".to_string(),
            engine_type: EngineKind::LlamaCpp,
            connect: None,
            tokenization: None,
            health_check_timeout_secs: None,
            engine_startup_timeout_secs: None,
            engine_idle_timeout_secs: None,
            variants: contexts
                .iter()
                .map(|&context| Variant {
                    binary: "llama-server".to_string(),
                    args: vec![],
                    context,
                    connect: None,
                    health_check_timeout_secs: None,
                    engine_startup_timeout_secs: None,
                    engine_idle_timeout_secs: None,
                })
                .collect(),
        }
    }

    #[test]
    fn safety_margin_uses_absolute_floor() {
        // scenario 3: estimate 126, absolute 512 dominates 10% (13).
        assert_eq!(required_capacity(126, 512, 0.10), 126 + 512);
    }

    #[test]
    fn safety_margin_uses_fractional_when_larger() {
        // scenario 2: estimate 22000, 10% = 2200 > 512.
        assert_eq!(required_capacity(22000, 512, 0.10), 22000 + 2200);
    }

    #[test]
    fn selects_smallest_sufficient_variant() {
        let model = model_with_contexts(&[20480, 40960, 81920]);
        let required = required_capacity(18000 + 4000, 512, 0.10);
        let picked = select_variant(&model, required).unwrap();
        assert_eq!(picked.context, 40960);
    }

    #[test]
    fn offline_scenario_picks_smallest_variant_above_639() {
        let model = model_with_contexts(&[512, 1024, 4096]);
        let estimate = 10 + 2 * 8; // scenario 3, extra_tokens=0, max_tokens=100 already folded in by caller
        let required = required_capacity(estimate + 100, 512, 0.10);
        assert_eq!(required, 639);
        let picked = select_variant(&model, required).unwrap();
        assert_eq!(picked.context, 1024);
    }

    #[test]
    fn context_too_large_reports_max() {
        let model = model_with_contexts(&[8192, 16384, 32000]);
        let err = select_variant(&model, 40000).unwrap_err();
        match err {
            Error::ContextTooLarge { required, max_context } => {
                assert_eq!(required, 40000);
                assert_eq!(max_context, 32000);
            }
            _ => panic!("expected ContextTooLarge"),
        }
    }

    #[test]
    fn no_earlier_variant_would_also_satisfy_requirement() {
        let model = model_with_contexts(&[1000, 2000, 3000]);
        let required = 1500;
        let picked = select_variant(&model, required).unwrap();
        assert_eq!(picked.context, 2000);
        assert!(!model.variants.iter().take_while(|v| v.context != picked.context).any(|v| v.context >= required));
    }
}
