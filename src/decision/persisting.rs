use std::sync::Arc;

use crate::{
    reasons::{DecisionReasons, Reason},
    user_profile::{UserProfile, UserProfileService},
    DecideOptions, Result, UserContext,
};

use super::{ExperimentDecision, ExperimentDecisionContext, ExperimentService};

/// Sticky bucketing: reads saved assignments from a [`UserProfileService`] before bucketing and
/// writes new assignments back.
///
/// Store failures are logged and never fail the decision.
pub struct PersistingExperimentService {
    inner: Box<dyn ExperimentService>,
    profiles: Arc<dyn UserProfileService>,
}

impl PersistingExperimentService {
    /// Wrap `inner` with sticky bucketing backed by `profiles`.
    pub fn new(
        inner: Box<dyn ExperimentService>,
        profiles: Arc<dyn UserProfileService>,
    ) -> PersistingExperimentService {
        PersistingExperimentService { inner, profiles }
    }
}

impl ExperimentService for PersistingExperimentService {
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        if options.ignore_user_profile_service {
            return self.inner.get_decision(context, user, options, reasons);
        }

        let experiment = context.experiment;
        let user_id = user.user_id();

        // `None` when the store failed: in that case the record is never written back, so a
        // transient read error cannot clobber saved assignments.
        let profile = match self.profiles.lookup(user_id) {
            Ok(profile) => Some(profile.unwrap_or_else(|| UserProfile::new(user_id))),
            Err(err) => {
                log::warn!(target: "optiflag", user_id; "failed to look up user profile: {err}");
                None
            }
        };

        if let Some(variation) = profile
            .as_ref()
            .and_then(|profile| profile.variation_for(&experiment.id))
            .and_then(|variation_id| experiment.variation(variation_id))
        {
            reasons.add_info(format_args!(
                "{} (user \"{user_id}\", experiment \"{}\", variation \"{}\").",
                Reason::UserProfileVariationFound,
                experiment.key,
                variation.key
            ));
            return Ok(ExperimentDecision::with_variation(variation));
        }

        let decision = self.inner.get_decision(context, user, options, reasons)?;

        if let (Some(variation), Some(mut profile)) = (decision.variation, profile) {
            profile
                .experiment_bucket_map
                .insert(experiment.id.clone(), variation.id.clone());
            if let Err(err) = self.profiles.save(profile) {
                log::warn!(target: "optiflag", user_id; "failed to save user profile: {err}");
            } else {
                log::trace!(target: "optiflag", user_id, experiment_id:% = experiment.id;
                            "saved variation to user profile");
            }
        }

        Ok(decision)
    }
}
