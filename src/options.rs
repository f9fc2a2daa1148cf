use serde::{Deserialize, Serialize};

/// Options altering a single `decide` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecideOption {
    /// Do not dispatch an impression event.
    DisableDecisionEvent,
    /// When deciding several flags, omit disabled ones.
    EnabledFlagsOnly,
    /// Skip user profile reads and writes.
    IgnoreUserProfileService,
    /// Include info-level reasons in the output.
    IncludeReasons,
    /// Omit variable values.
    ExcludeVariables,
    /// Bypass CMAB cache lookup and write.
    IgnoreCmabCache,
    /// Clear the whole CMAB cache before deciding.
    ResetCmabCache,
    /// Drop this user's CMAB cache entries before deciding.
    InvalidateUserCmabCache,
}

/// A set of [`DecideOption`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecideOptions {
    /// Skip impression events.
    pub disable_decision_event: bool,
    /// Drop disabled flags from bulk results.
    pub enabled_flags_only: bool,
    /// Neither read nor write sticky bucketing.
    pub ignore_user_profile_service: bool,
    /// Report info reasons as well as errors.
    pub include_reasons: bool,
    /// Leave `variables` empty.
    pub exclude_variables: bool,
    /// Fetch a fresh prediction and skip the cache.
    pub ignore_cmab_cache: bool,
    /// Clear the whole CMAB cache before deciding.
    pub reset_cmab_cache: bool,
    /// Drop this user's CMAB cache entries before deciding.
    pub invalidate_user_cmab_cache: bool,
}

impl DecideOptions {
    /// Add a single option.
    pub fn insert(&mut self, option: DecideOption) {
        match option {
            DecideOption::DisableDecisionEvent => self.disable_decision_event = true,
            DecideOption::EnabledFlagsOnly => self.enabled_flags_only = true,
            DecideOption::IgnoreUserProfileService => self.ignore_user_profile_service = true,
            DecideOption::IncludeReasons => self.include_reasons = true,
            DecideOption::ExcludeVariables => self.exclude_variables = true,
            DecideOption::IgnoreCmabCache => self.ignore_cmab_cache = true,
            DecideOption::ResetCmabCache => self.reset_cmab_cache = true,
            DecideOption::InvalidateUserCmabCache => self.invalidate_user_cmab_cache = true,
        }
    }

    /// Union of two option sets.
    pub fn merge(self, other: DecideOptions) -> DecideOptions {
        DecideOptions {
            disable_decision_event: self.disable_decision_event || other.disable_decision_event,
            enabled_flags_only: self.enabled_flags_only || other.enabled_flags_only,
            ignore_user_profile_service: self.ignore_user_profile_service
                || other.ignore_user_profile_service,
            include_reasons: self.include_reasons || other.include_reasons,
            exclude_variables: self.exclude_variables || other.exclude_variables,
            ignore_cmab_cache: self.ignore_cmab_cache || other.ignore_cmab_cache,
            reset_cmab_cache: self.reset_cmab_cache || other.reset_cmab_cache,
            invalidate_user_cmab_cache: self.invalidate_user_cmab_cache
                || other.invalidate_user_cmab_cache,
        }
    }
}

impl FromIterator<DecideOption> for DecideOptions {
    fn from_iter<T: IntoIterator<Item = DecideOption>>(iter: T) -> DecideOptions {
        let mut options = DecideOptions::default();
        for option in iter {
            options.insert(option);
        }
        options
    }
}

impl From<&[DecideOption]> for DecideOptions {
    fn from(value: &[DecideOption]) -> DecideOptions {
        value.iter().copied().collect()
    }
}
