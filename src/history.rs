//! Contributor history: decides whether a contribution comes from a first-time contributor
use super::contribution::{ContributionStore, history_key};
use super::error::ReconcileError;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

const MARKERS_TREE: &str = "contributor_markers";

/// How first-time contributors are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContributorPolicy {
    /// Count records in the history index written before this one. A record
    /// stamped earlier but committed after a later one has already scanned is
    /// missed by that scan, so two concurrent first contributions from the
    /// same user can both count as new.
    #[default]
    HistoryScan,
    /// Claim a per (campaign, user) marker with compare-and-swap. Only the
    /// claimant counts as new. Markers are backfilled from the history index
    /// when the store is opened.
    ClaimMarker,
}

impl FromStr for ContributorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "history-scan" => Ok(ContributorPolicy::HistoryScan),
            "claim-marker" => Ok(ContributorPolicy::ClaimMarker),
            other => Err(format!(
                "expected 'history-scan' or 'claim-marker', got '{other}'"
            )),
        }
    }
}

impl fmt::Display for ContributorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContributorPolicy::HistoryScan => f.write_str("history-scan"),
            ContributorPolicy::ClaimMarker => f.write_str("claim-marker"),
        }
    }
}

#[derive(Clone)]
pub struct ContributorHistory {
    contributions: ContributionStore,
    markers: sled::Tree,
    policy: ContributorPolicy,
}

impl ContributorHistory {
    pub fn open(
        instance: &sled::Db,
        contributions: ContributionStore,
        policy: ContributorPolicy,
    ) -> Result<Self, ReconcileError> {
        let history = Self {
            contributions,
            markers: instance.open_tree(MARKERS_TREE)?,
            policy,
        };
        if policy == ContributorPolicy::ClaimMarker {
            history.backfill_markers()?;
        }
        Ok(history)
    }

    /// Claim a marker for every (campaign, user) pair already in the history
    /// index. Returns how many markers were created.
    pub fn backfill_markers(&self) -> Result<usize, ReconcileError> {
        let mut created = 0;
        for (campaign_ref, user_ref, record_id) in self.contributions.history_entries()? {
            let key = history_key(&campaign_ref, &user_ref, None);
            if self
                .markers
                .compare_and_swap(key, None as Option<&[u8]>, Some(record_id.as_bytes()))?
                .is_ok()
            {
                created += 1;
            }
        }
        if created > 0 {
            info!(created, "contributor markers backfilled");
        }
        Ok(created)
    }

    pub fn policy(&self) -> ContributorPolicy {
        self.policy
    }

    /// True iff `user_ref` has no completed contribution to `campaign_ref`
    /// recorded before `excluding_record_id`.
    ///
    /// `excluding_record_id` is the record just written. Records written after
    /// it may already be visible and are ignored.
    pub fn is_first_contribution(
        &self,
        campaign_ref: &str,
        user_ref: &str,
        excluding_record_id: &str,
    ) -> Result<bool, ReconcileError> {
        match self.policy {
            ContributorPolicy::HistoryScan => {
                let prior = self.contributions.count_completed_by(
                    campaign_ref,
                    user_ref,
                    Some(excluding_record_id),
                )?;
                debug!(campaign_ref, user_ref, prior, "prior contributions counted");
                Ok(prior == 0)
            }
            ContributorPolicy::ClaimMarker => {
                self.claim_marker(campaign_ref, user_ref, excluding_record_id)
            }
        }
    }

    fn claim_marker(
        &self,
        campaign_ref: &str,
        user_ref: &str,
        record_id: &str,
    ) -> Result<bool, ReconcileError> {
        let key = history_key(campaign_ref, user_ref, None);
        let claimed = self.markers.compare_and_swap(
            key,
            None as Option<&[u8]>,
            Some(record_id.as_bytes()),
        )?;

        match claimed {
            Ok(()) => Ok(true),
            // a retry of the same record still owns its marker
            Err(conflict) => Ok(conflict
                .current
                .is_some_and(|owner| &owner[..] == record_id.as_bytes())),
        }
    }
}
