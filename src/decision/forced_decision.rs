use crate::{
    project_config::{ProjectConfig, Variation},
    reasons::{DecisionReasons, Reason},
    user_context::DecisionContext,
    UserContext,
};

/// Look up the user's forced decision for `context` and validate it against the flag's
/// variations. Unknown variation keys are reported and ignored.
pub(crate) fn find_validated_forced_decision<'a>(
    config: &'a ProjectConfig,
    user: &UserContext,
    context: &DecisionContext,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_key = user.forced_decision(context)?;

    match config.flag_variation(&context.flag_key, &variation_key) {
        Some(variation) => {
            reasons.add_info(format_args!(
                "{} for flag \"{}\"{}: variation \"{}\".",
                Reason::ForcedDecisionFound,
                context.flag_key,
                rule_suffix(context),
                variation_key
            ));
            Some(variation)
        }
        None => {
            reasons.add_info(format_args!(
                "{} for flag \"{}\"{}.",
                Reason::InvalidForcedDecisionAssignment,
                context.flag_key,
                rule_suffix(context)
            ));
            None
        }
    }
}

fn rule_suffix(context: &DecisionContext) -> String {
    context
        .rule_key
        .as_ref()
        .map(|rule| format!(" and rule \"{rule}\""))
        .unwrap_or_default()
}
