//! Reconciliation orchestrator: the single entry point every delivery path calls
use super::campaign::{Campaign, CampaignStore};
use super::config::Config;
use super::contribution::{Contribution, ContributionStore, NewContribution};
use super::error::ReconcileError;
use super::history::{ContributorHistory, ContributorPolicy};
use super::types::{Amount, Currency};
use super::utils;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

/// A payment confirmation as handed over by any entry path.
///
/// Also used for constructing confirmations in tooling and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    session_key: String,
    campaign_ref: String,
    user_ref: String,
    amount_minor_units: i64,
    currency: Option<Currency>,
    message: Option<String>,
    anonymous: bool,
}

impl ReconcileRequest {
    pub fn new(session_key: &str) -> Self {
        Self {
            session_key: session_key.to_string(),
            ..Self::default()
        }
    }
    pub fn set_campaign(mut self, campaign_ref: &str) -> Self {
        self.campaign_ref = campaign_ref.to_string();
        self
    }
    pub fn set_user(mut self, user_ref: &str) -> Self {
        self.user_ref = user_ref.to_string();
        self
    }
    pub fn set_amount_minor(mut self, amount: i64) -> Self {
        self.amount_minor_units = amount;
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }
    pub fn set_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }
    pub fn set_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    // Checks fields and returns the contribution to write, fingerprinted
    pub fn validate_and_finalise(
        &self,
        default_currency: Currency,
    ) -> Result<NewContribution, ReconcileError> {
        if self.session_key.is_empty() {
            return Err(ReconcileError::invalid("session key is empty"));
        }
        if self.campaign_ref.is_empty() {
            return Err(ReconcileError::invalid("campaign ref is empty"));
        }
        if self.user_ref.is_empty() {
            return Err(ReconcileError::invalid("user ref is empty"));
        }
        // NUL separates the parts of history index keys
        if self.campaign_ref.contains('\0') || self.user_ref.contains('\0') {
            return Err(ReconcileError::invalid("refs must not contain NUL"));
        }
        let amount = Amount::try_from_minor(self.amount_minor_units)?;
        let currency = self.currency.unwrap_or(default_currency);
        let message = self
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        let fingerprint = utils::fingerprint(&[
            &self.session_key,
            &self.campaign_ref,
            &self.user_ref,
            &amount.minor_units().to_string(),
            &currency.to_string(),
            message.as_deref().unwrap_or(""),
            if self.anonymous { "1" } else { "0" },
        ]);

        Ok(NewContribution {
            session_key: self.session_key.clone(),
            campaign_ref: self.campaign_ref.clone(),
            user_ref: self.user_ref.clone(),
            amount,
            currency,
            message,
            anonymous: self.anonymous,
            fingerprint,
        })
    }
}

/// The uniform result every entry path receives.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Reconciliation {
    pub contribution: Contribution,
    pub campaign: Campaign,
    /// false when the session was already reconciled and nothing was written
    pub created: bool,
}

pub struct Reconciler {
    instance: Arc<sled::Db>,
    contributions: ContributionStore,
    campaigns: CampaignStore,
    history: ContributorHistory,
    default_currency: Currency,
}

impl Reconciler {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, ReconcileError> {
        Self::from_config(instance, &Config::default())
    }

    pub fn from_config(instance: Arc<sled::Db>, config: &Config) -> Result<Self, ReconcileError> {
        let contributions = ContributionStore::open(&instance)?;
        let campaigns = CampaignStore::open(&instance)?;
        let history =
            ContributorHistory::open(&instance, contributions.clone(), config.contributor_policy)?;

        Ok(Self {
            instance,
            contributions,
            campaigns,
            history,
            default_currency: config.default_currency,
        })
    }

    pub fn contributions(&self) -> &ContributionStore {
        &self.contributions
    }

    pub fn campaigns(&self) -> &CampaignStore {
        &self.campaigns
    }

    pub fn contributor_policy(&self) -> ContributorPolicy {
        self.history.policy()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), ReconcileError> {
        self.instance.flush()?;
        Ok(())
    }

    /// Turn a confirmed payment into exactly one contribution and one aggregate update.
    ///
    /// A session key that was already reconciled returns the stored
    /// contribution with `created = false` and writes nothing. A missing
    /// campaign after the contribution was written returns
    /// [`ReconcileError::CampaignNotFound`] carrying that contribution; it is
    /// not rolled back.
    pub fn reconcile(&self, request: &ReconcileRequest) -> Result<Reconciliation, ReconcileError> {
        let span = info_span!(
            "reconcile",
            session_key = %request.session_key,
            campaign_ref = %request.campaign_ref,
        );
        let _enter = span.enter();

        let draft = request.validate_and_finalise(self.default_currency)?;

        // Start: ledger check
        if let Some(existing) = self.contributions.find_by_session_key(&draft.session_key)? {
            return self.already_processed(existing, &draft);
        }

        // Writing
        let contribution = match self.contributions.create_contribution(draft.clone()) {
            Ok(contribution) => contribution,
            Err(err @ ReconcileError::DuplicateOrPersistence { .. }) => {
                warn!(error = %err, "write collided, re-checking ledger");
                match self.contributions.find_by_session_key(&draft.session_key)? {
                    Some(existing) => return self.already_processed(existing, &draft),
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        // Resolving, then Aggregating
        let campaign = self
            .resolve_and_aggregate(&contribution)
            .map_err(|err| Self::partial_failure(err, &contribution))?;

        info!(
            record_id = %contribution.record_id,
            total_raised = %campaign.total_raised,
            status = ?campaign.status,
            "reconciliation completed"
        );

        Ok(Reconciliation {
            contribution,
            campaign,
            created: true,
        })
    }

    fn resolve_and_aggregate(&self, contribution: &Contribution) -> Result<Campaign, ReconcileError> {
        let is_new_contributor = self.history.is_first_contribution(
            &contribution.campaign_ref,
            &contribution.user_ref,
            &contribution.record_id,
        )?;

        self.campaigns.apply_contribution(
            &contribution.campaign_ref,
            contribution.amount,
            is_new_contributor,
        )
    }

    fn already_processed(
        &self,
        existing: Contribution,
        draft: &NewContribution,
    ) -> Result<Reconciliation, ReconcileError> {
        if existing.fingerprint != draft.fingerprint {
            warn!(
                record_id = %existing.record_id,
                stored_amount = %existing.amount,
                replayed_amount = %draft.amount,
                "replayed confirmation differs from the recorded one; keeping the original"
            );
        }

        let Some(campaign) = self.campaigns.find_by_ref(&existing.campaign_ref)? else {
            let err = ReconcileError::CampaignNotFound {
                campaign_ref: existing.campaign_ref.clone(),
                contribution: None,
            };
            return Err(Self::partial_failure(err, &existing));
        };

        info!(record_id = %existing.record_id, "session already reconciled");

        Ok(Reconciliation {
            contribution: existing,
            campaign,
            created: false,
        })
    }

    // The contribution stays recorded whatever failed after it was written.
    fn partial_failure(err: ReconcileError, contribution: &Contribution) -> ReconcileError {
        error!(
            record_id = %contribution.record_id,
            campaign_ref = %contribution.campaign_ref,
            amount = %contribution.amount,
            error = %err,
            "contribution recorded without aggregate update"
        );

        match err {
            ReconcileError::CampaignNotFound { campaign_ref, .. } => {
                ReconcileError::CampaignNotFound {
                    campaign_ref,
                    contribution: Some(Box::new(contribution.clone())),
                }
            }
            other => other,
        }
    }
}
