//! Contribution records, the session-key ledger and the contribution writer
use super::error::ReconcileError;
use super::types::{Amount, Currency, TimeStamp};
use super::utils;
use chrono::Utc;
use sled::transaction::{self, TransactionError, Transactional};
use tracing::{debug, info};

const RECORDS_TREE: &str = "contributions";
const SESSIONS_TREE: &str = "contribution_sessions";
const HISTORY_TREE: &str = "contribution_history";

/// Prefix for bech32-encoded contribution record ids.
pub const RECORD_ID_HRP: &str = "contrib_";

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, serde::Serialize,
)]
pub enum ContributionStatus {
    // failed and pending payments never reach the ledger
    #[n(0)]
    Completed,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode, serde::Serialize)]
pub struct Contribution {
    #[n(0)]
    pub record_id: String, // uuid7, bech32 with the contrib_ prefix
    #[n(1)]
    pub session_key: String, // provider session, unique across the ledger
    #[n(2)]
    pub campaign_ref: String,
    #[n(3)]
    pub user_ref: String,
    #[n(4)]
    pub amount: Amount,
    #[n(5)]
    pub currency: Currency,
    #[n(6)]
    pub message: Option<String>,
    #[n(7)]
    pub anonymous: bool,
    #[n(8)]
    pub status: ContributionStatus,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub fingerprint: String, // sha256 of the confirmation that created this record
}

/// A validated confirmation, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContribution {
    pub session_key: String,
    pub campaign_ref: String,
    pub user_ref: String,
    pub amount: Amount,
    pub currency: Currency,
    pub message: Option<String>,
    pub anonymous: bool,
    pub fingerprint: String,
}

impl Contribution {
    fn from_new(new: NewContribution) -> Result<Self, ReconcileError> {
        let record_id = utils::new_uuid_to_bech32(RECORD_ID_HRP)
            .map_err(|e| ReconcileError::Identifier(e.to_string()))?;

        Ok(Self {
            record_id,
            session_key: new.session_key,
            campaign_ref: new.campaign_ref,
            user_ref: new.user_ref,
            amount: new.amount,
            currency: new.currency,
            message: new.message,
            anonymous: new.anonymous,
            status: ContributionStatus::Completed,
            created_at: TimeStamp::new(),
            fingerprint: new.fingerprint,
        })
    }
}

/// Contribution storage over three sled trees: the records themselves, the
/// unique session-key index and a (campaign, user) history index.
#[derive(Clone)]
pub struct ContributionStore {
    records: sled::Tree,
    sessions: sled::Tree,
    history: sled::Tree,
}

impl ContributionStore {
    pub fn open(instance: &sled::Db) -> Result<Self, ReconcileError> {
        Ok(Self {
            records: instance.open_tree(RECORDS_TREE)?,
            sessions: instance.open_tree(SESSIONS_TREE)?,
            history: instance.open_tree(HISTORY_TREE)?,
        })
    }

    /// Idempotency ledger check. A read only, never a lock.
    pub fn find_by_session_key(
        &self,
        session_key: &str,
    ) -> Result<Option<Contribution>, ReconcileError> {
        let Some(record_id) = self.sessions.get(session_key.as_bytes())? else {
            return Ok(None);
        };
        let record_id = String::from_utf8_lossy(&record_id).into_owned();

        match self.find_by_record_id(&record_id)? {
            Some(contribution) => Ok(Some(contribution)),
            // the index and the record are written in one transaction
            None => Err(ReconcileError::Codec(format!(
                "session {session_key} points at missing record {record_id}"
            ))),
        }
    }

    pub fn find_by_record_id(
        &self,
        record_id: &str,
    ) -> Result<Option<Contribution>, ReconcileError> {
        self.records
            .get(record_id.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()
    }

    /// Generate an id, stamp the record and persist it under the session-key constraint.
    pub fn create_contribution(
        &self,
        new: NewContribution,
    ) -> Result<Contribution, ReconcileError> {
        let contribution = Contribution::from_new(new)?;
        self.insert_unique(&contribution)?;

        info!(
            record_id = %contribution.record_id,
            session_key = %contribution.session_key,
            campaign_ref = %contribution.campaign_ref,
            amount = %contribution.amount,
            currency = %contribution.currency,
            "contribution recorded"
        );

        Ok(contribution)
    }

    /// Persist a record, rejecting it if the session key is already taken.
    ///
    /// The record, the session index entry and the history entry commit together
    /// or not at all.
    pub fn insert_unique(&self, contribution: &Contribution) -> Result<(), ReconcileError> {
        let encoded = utils::to_cbor(contribution)?;
        let history_key = history_key(
            &contribution.campaign_ref,
            &contribution.user_ref,
            Some(&contribution.record_id),
        );

        let result: Result<(), TransactionError<()>> = (
            &self.records,
            &self.sessions,
            &self.history,
        )
            .transaction(|(records, sessions, history)| {
                if sessions.get(contribution.session_key.as_bytes())?.is_some() {
                    return transaction::abort(());
                }
                sessions.insert(
                    contribution.session_key.as_bytes(),
                    contribution.record_id.as_bytes(),
                )?;
                records.insert(contribution.record_id.as_bytes(), encoded.as_slice())?;
                history.insert(history_key.as_slice(), contribution.record_id.as_bytes())?;
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => {
                debug!(session_key = %contribution.session_key, "session key already recorded");
                Err(ReconcileError::DuplicateOrPersistence {
                    session_key: contribution.session_key.clone(),
                    reason: "session key already recorded".into(),
                })
            }
            Err(TransactionError::Storage(e)) => Err(ReconcileError::DuplicateOrPersistence {
                session_key: contribution.session_key.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Completed contributions by `user_ref` to `campaign_ref` recorded before
    /// `excluding_record_id`, ordered by `(created_at, record_id)`.
    ///
    /// Records written later than the excluded one are not prior, even when
    /// they are already visible. With `None` every completed record counts.
    pub fn count_completed_by(
        &self,
        campaign_ref: &str,
        user_ref: &str,
        excluding_record_id: Option<&str>,
    ) -> Result<usize, ReconcileError> {
        let cutoff = match excluding_record_id {
            Some(record_id) => self
                .find_by_record_id(record_id)?
                .map(|excluded| (excluded.created_at, excluded.record_id)),
            None => None,
        };

        let prefix = history_key(campaign_ref, user_ref, None);
        let mut count = 0;

        for entry in self.history.scan_prefix(prefix) {
            let (_, record_id) = entry?;
            if excluding_record_id.is_some_and(|excluded| excluded.as_bytes() == &record_id[..]) {
                continue;
            }
            let record_id = String::from_utf8_lossy(&record_id).into_owned();
            let Some(contribution) = self.find_by_record_id(&record_id)? else {
                continue;
            };
            if contribution.status != ContributionStatus::Completed {
                continue;
            }
            if let Some((created_at, cutoff_id)) = &cutoff {
                let earlier = (&contribution.created_at, &contribution.record_id)
                    < (created_at, cutoff_id);
                if !earlier {
                    continue;
                }
            }
            count += 1;
        }

        Ok(count)
    }

    /// All contributions recorded against a campaign, in history-index order.
    pub fn list_for_campaign(&self, campaign_ref: &str) -> Result<Vec<Contribution>, ReconcileError> {
        let mut prefix = campaign_ref.as_bytes().to_vec();
        prefix.push(0);

        let mut contributions = Vec::new();
        for entry in self.history.scan_prefix(prefix) {
            let (_, record_id) = entry?;
            let record_id = String::from_utf8_lossy(&record_id).into_owned();
            if let Some(contribution) = self.find_by_record_id(&record_id)? {
                contributions.push(contribution);
            }
        }
        Ok(contributions)
    }

    /// Every (campaign, user, record id) triple in the history index.
    pub fn history_entries(&self) -> Result<Vec<(String, String, String)>, ReconcileError> {
        let mut entries = Vec::new();
        for entry in self.history.iter() {
            let (key, record_id) = entry?;
            let mut parts = key.splitn(3, |b| *b == 0);
            let (Some(campaign_ref), Some(user_ref)) = (parts.next(), parts.next()) else {
                return Err(ReconcileError::Codec("malformed history key".into()));
            };
            entries.push((
                String::from_utf8_lossy(campaign_ref).into_owned(),
                String::from_utf8_lossy(user_ref).into_owned(),
                String::from_utf8_lossy(&record_id).into_owned(),
            ));
        }
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// campaign \0 user \0 [record]
pub(crate) fn history_key(campaign_ref: &str, user_ref: &str, record_id: Option<&str>) -> Vec<u8> {
    let mut key = Vec::with_capacity(campaign_ref.len() + user_ref.len() + 32);
    key.extend_from_slice(campaign_ref.as_bytes());
    key.push(0);
    key.extend_from_slice(user_ref.as_bytes());
    key.push(0);
    if let Some(record_id) = record_id {
        key.extend_from_slice(record_id.as_bytes());
    }
    key
}
