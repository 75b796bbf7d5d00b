//! Campaign records and the aggregate updater
use super::error::ReconcileError;
use super::types::{Amount, Currency, TimeStamp};
use super::utils;
use chrono::Utc;
use tracing::{debug, info};

const CAMPAIGNS_TREE: &str = "campaigns";

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, serde::Serialize,
)]
pub enum FundingStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Funded,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode, serde::Serialize)]
pub struct Campaign {
    #[n(0)]
    pub campaign_ref: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub funding_goal: Amount,
    #[n(3)]
    pub currency: Currency,
    #[n(4)]
    pub total_raised: Amount,
    #[n(5)]
    pub contribution_count: u64,
    #[n(6)]
    pub unique_contributor_count: u64, // never above contribution_count
    #[n(7)]
    pub status: FundingStatus,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

/// Increment applied to a campaign aggregate in one atomic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateDelta {
    pub total: Amount,
    pub count: u64,
    pub unique: u64,
    pub new_status_if_threshold_met: Option<FundingStatus>,
}

impl Campaign {
    pub fn new(campaign_ref: &str, title: &str, funding_goal: Amount, currency: Currency) -> Self {
        Self {
            campaign_ref: campaign_ref.to_string(),
            title: title.to_string(),
            funding_goal,
            currency,
            total_raised: Amount::ZERO,
            contribution_count: 0,
            unique_contributor_count: 0,
            status: FundingStatus::Active,
            created_at: TimeStamp::new(),
        }
    }

    /// Seed an existing aggregate, e.g. a campaign migrated with money already raised.
    pub fn with_raised(mut self, total_raised: Amount, contributions: u64, contributors: u64) -> Self {
        self.total_raised = total_raised;
        self.contribution_count = contributions;
        self.unique_contributor_count = contributors.min(contributions);
        if self.total_raised >= self.funding_goal {
            self.status = FundingStatus::Funded;
        }
        self
    }

    /// Whether adding `amount` to the current total reaches the goal.
    pub fn goal_met_with(&self, amount: Amount) -> Result<bool, ReconcileError> {
        let projected = self
            .total_raised
            .checked_add(amount)
            .ok_or_else(|| ReconcileError::AmountOverflow {
                campaign_ref: self.campaign_ref.clone(),
            })?;
        Ok(projected >= self.funding_goal)
    }

    /// Apply `delta` to a copy of this aggregate. Funded never reverts to Active.
    pub fn incremented(&self, delta: &AggregateDelta) -> Result<Campaign, ReconcileError> {
        let overflow = || ReconcileError::AmountOverflow {
            campaign_ref: self.campaign_ref.clone(),
        };

        let mut next = self.clone();
        next.total_raised = self.total_raised.checked_add(delta.total).ok_or_else(overflow)?;
        next.contribution_count = self
            .contribution_count
            .checked_add(delta.count)
            .ok_or_else(overflow)?;
        next.unique_contributor_count = self
            .unique_contributor_count
            .checked_add(delta.unique)
            .ok_or_else(overflow)?;
        if let Some(status) = delta.new_status_if_threshold_met {
            if self.status == FundingStatus::Active {
                next.status = status;
            }
        }
        Ok(next)
    }
}

#[derive(Clone)]
pub struct CampaignStore {
    campaigns: sled::Tree,
}

impl CampaignStore {
    pub fn open(instance: &sled::Db) -> Result<Self, ReconcileError> {
        Ok(Self {
            campaigns: instance.open_tree(CAMPAIGNS_TREE)?,
        })
    }

    /// Register a campaign. Refuses to overwrite an existing aggregate.
    pub fn insert(&self, campaign: &Campaign) -> Result<(), ReconcileError> {
        if campaign.campaign_ref.is_empty() {
            return Err(ReconcileError::invalid("campaign ref is empty"));
        }
        let encoded = utils::to_cbor(campaign)?;

        self.campaigns
            .compare_and_swap(
                campaign.campaign_ref.as_bytes(),
                None as Option<&[u8]>,
                Some(encoded),
            )?
            .map_err(|_| {
                ReconcileError::invalid(format!(
                    "campaign {} already exists",
                    campaign.campaign_ref
                ))
            })
    }

    pub fn find_by_ref(&self, campaign_ref: &str) -> Result<Option<Campaign>, ReconcileError> {
        self.campaigns
            .get(campaign_ref.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()
    }

    /// Atomically apply `delta` to the stored aggregate and return the new state.
    ///
    /// Runs as a compare-and-swap loop, so concurrent increments on the same
    /// campaign never overwrite each other.
    pub fn atomic_increment(
        &self,
        campaign_ref: &str,
        delta: &AggregateDelta,
    ) -> Result<Campaign, ReconcileError> {
        let mut failure: Option<ReconcileError> = None;

        let updated = self
            .campaigns
            .update_and_fetch(campaign_ref.as_bytes(), |current| {
                let bytes = current?;
                failure = None;

                let next = utils::from_cbor::<Campaign>(bytes)
                    .and_then(|campaign| campaign.incremented(delta))
                    .and_then(|campaign| utils::to_cbor(&campaign));
                match next {
                    Ok(encoded) => Some(encoded),
                    Err(e) => {
                        // leave the stored aggregate untouched
                        failure = Some(e);
                        Some(bytes.to_vec())
                    }
                }
            })?;

        if let Some(e) = failure {
            return Err(e);
        }

        match updated {
            Some(bytes) => utils::from_cbor(&bytes),
            None => Err(ReconcileError::CampaignNotFound {
                campaign_ref: campaign_ref.to_string(),
                contribution: None,
            }),
        }
    }

    /// Fold one contribution into the campaign aggregate.
    ///
    /// The funded decision is taken against the snapshot read just before the
    /// increment, then carried inside the same increment.
    pub fn apply_contribution(
        &self,
        campaign_ref: &str,
        amount: Amount,
        is_new_contributor: bool,
    ) -> Result<Campaign, ReconcileError> {
        let before = self
            .find_by_ref(campaign_ref)?
            .ok_or_else(|| ReconcileError::CampaignNotFound {
                campaign_ref: campaign_ref.to_string(),
                contribution: None,
            })?;

        let threshold_met = before.goal_met_with(amount)?;
        let delta = AggregateDelta {
            total: amount,
            count: 1,
            unique: u64::from(is_new_contributor),
            new_status_if_threshold_met: threshold_met.then_some(FundingStatus::Funded),
        };
        debug!(campaign_ref, ?delta, "applying aggregate delta");

        let after = self.atomic_increment(campaign_ref, &delta)?;

        if before.status == FundingStatus::Active && after.status == FundingStatus::Funded {
            info!(
                campaign_ref,
                total_raised = %after.total_raised,
                funding_goal = %after.funding_goal,
                "campaign funded"
            );
        }

        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CampaignStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        CampaignStore::open(&db).unwrap()
    }

    fn delta(total: u64, unique: u64, funded: bool) -> AggregateDelta {
        AggregateDelta {
            total: Amount::from_minor(total),
            count: 1,
            unique,
            new_status_if_threshold_met: funded.then_some(FundingStatus::Funded),
        }
    }

    #[test]
    fn incremented_never_reverts_funded() {
        let campaign = Campaign::new("c1", "Roof", Amount::from_minor(100), Currency::USD)
            .with_raised(Amount::from_minor(150), 2, 2);
        assert_eq!(campaign.status, FundingStatus::Funded);

        let next = campaign.incremented(&delta(10, 0, false)).unwrap();
        assert_eq!(next.status, FundingStatus::Funded);
        assert_eq!(next.total_raised, Amount::from_minor(160));
        assert_eq!(next.contribution_count, 3);
    }

    #[test]
    fn incremented_rejects_overflow() {
        let campaign = Campaign::new("c1", "Roof", Amount::from_minor(100), Currency::USD)
            .with_raised(Amount::from_minor(u64::MAX), 1, 1);

        assert!(matches!(
            campaign.incremented(&delta(1, 0, false)),
            Err(ReconcileError::AmountOverflow { .. })
        ));
    }

    #[test]
    fn insert_refuses_existing_campaign() {
        let store = store();
        let campaign = Campaign::new("c1", "Roof", Amount::from_minor(100), Currency::USD);

        store.insert(&campaign).unwrap();
        assert!(store.insert(&campaign).is_err());
        assert_eq!(store.find_by_ref("c1").unwrap(), Some(campaign));
    }

    #[test]
    fn atomic_increment_on_missing_campaign() {
        let store = store();
        let result = store.atomic_increment("nope", &delta(10, 1, false));

        assert!(matches!(
            result,
            Err(ReconcileError::CampaignNotFound { contribution: None, .. })
        ));
        assert_eq!(store.find_by_ref("nope").unwrap(), None);
    }

    #[test]
    fn apply_contribution_crosses_threshold() {
        let store = store();
        let campaign = Campaign::new("c1", "Roof", Amount::from_minor(1_000), Currency::USD)
            .with_raised(Amount::from_minor(900), 3, 2);
        store.insert(&campaign).unwrap();

        let after = store
            .apply_contribution("c1", Amount::from_minor(150), true)
            .unwrap();

        assert_eq!(after.total_raised, Amount::from_minor(1_050));
        assert_eq!(after.contribution_count, 4);
        assert_eq!(after.unique_contributor_count, 3);
        assert_eq!(after.status, FundingStatus::Funded);
    }

    #[test]
    fn apply_contribution_below_threshold_stays_active() {
        let store = store();
        store
            .insert(&Campaign::new("c1", "Roof", Amount::from_minor(1_000), Currency::USD))
            .unwrap();

        let after = store
            .apply_contribution("c1", Amount::from_minor(999), false)
            .unwrap();

        assert_eq!(after.status, FundingStatus::Active);
        assert_eq!(after.unique_contributor_count, 0);
    }
}
