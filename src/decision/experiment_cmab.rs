use std::sync::Arc;

use crate::{
    audience::check_audience,
    bucketer::{Bucketer, Murmur3Bucketer},
    cmab::CmabService,
    project_config::TrafficRange,
    reasons::{DecisionReasons, Reason},
    DecideOptions, Error, Result, UserContext,
};

use super::{
    experiment_bucketer::admitted_by_group, ExperimentDecision, ExperimentDecisionContext,
    ExperimentService,
};

/// Placeholder entity for the CMAB traffic slice. Only membership matters.
const CMAB_TRAFFIC_ENTITY: &str = "$";

/// Turns CMAB predictions into experiment decisions.
///
/// Users pass the audience gate and the group mutex, then must fall into the experiment's CMAB
/// traffic slice before the prediction service is consulted. Every error is terminal for the
/// experiment.
#[derive(Clone)]
pub struct ExperimentCmabService {
    cmab: Option<Arc<dyn CmabService>>,
    bucketer: Arc<dyn Bucketer>,
}

impl ExperimentCmabService {
    /// Create the adapter. Without a CMAB service every CMAB experiment fails with
    /// [`Error::CmabServiceUnavailable`].
    pub fn new(cmab: Option<Arc<dyn CmabService>>) -> ExperimentCmabService {
        ExperimentCmabService {
            cmab,
            bucketer: Arc::new(Murmur3Bucketer),
        }
    }

    /// Replace the bucketer used for the group and traffic checks.
    pub fn with_bucketer(mut self, bucketer: Arc<dyn Bucketer>) -> ExperimentCmabService {
        self.bucketer = bucketer;
        self
    }
}

impl ExperimentService for ExperimentCmabService {
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        let experiment = context.experiment;
        let Some(cmab) = &experiment.cmab else {
            return Ok(ExperimentDecision::default());
        };
        let Some(service) = &self.cmab else {
            return Err(Error::CmabServiceUnavailable);
        };

        if !check_audience(
            experiment.audience_conditions.as_ref(),
            context.config.audiences(),
            &experiment.key,
            user,
            reasons,
        ) {
            reasons.add_info(Reason::FailedAudienceTargeting);
            return Ok(ExperimentDecision::default());
        }

        let bucketing_id = user.bucketing_id();
        if !admitted_by_group(
            self.bucketer.as_ref(),
            context.config,
            experiment,
            bucketing_id,
            reasons,
        ) {
            return Ok(ExperimentDecision::default());
        }

        let slice = [TrafficRange {
            entity_id: CMAB_TRAFFIC_ENTITY.to_owned(),
            end_of_range: cmab.traffic_allocation,
        }];
        if self
            .bucketer
            .bucket_into(bucketing_id, &experiment.id, &slice)
            .is_none()
        {
            reasons.add_info(Reason::NotInCmabTrafficAllocation);
            return Ok(ExperimentDecision::default());
        }

        let decision = service.get_decision(context.config, user, &experiment.id, options, reasons)?;
        let Some(variation) = experiment.variation(&decision.variation_id) else {
            return Err(Error::CmabVariationNotFound {
                variation_id: decision.variation_id,
                experiment_key: experiment.key.clone(),
            });
        };

        reasons.add_info(format_args!(
            "{}: variation \"{}\" of experiment \"{}\".",
            Reason::CmabVariationAssigned,
            variation.key,
            experiment.key
        ));
        Ok(ExperimentDecision {
            variation: Some(variation),
            cmab_uuid: Some(decision.cmab_uuid),
        })
    }
}
