//! Quorum approval of irreversible actions.
//!
//! A vote is applied in two steps against the request document:
//!
//! 1. A guarded write of the voter's own map entry. It refuses voters
//!    outside the snapshot and requests that are already decided, and
//!    touches no other key, so concurrent voters never clobber each other.
//! 2. An atomic read-modify-write that recomputes `status` from the full
//!    vote map. Concurrent voters are serialized here, so exactly one of
//!    them observes the move into APPROVED or REJECTED.
//!
//! Only the voter whose recompute made that terminal move notifies the
//! subject, which gives one outcome event per request.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use tether_core::config::ApprovalConfig;
use tether_core::paths;
use tether_messages::{EventKind, EventPayload, FanoutSender, NotificationTasks, Recipient};
use tether_storage::{DocumentStore, DocumentStoreExt};

use crate::directory::AuthorityDirectory;
use crate::request::{aggregate, ApprovalRequest, ApprovalStatus, Vote};
use crate::{Error, Result};

/// Outcome of one accepted vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteReceipt {
    /// Aggregate status after this vote.
    pub status: ApprovalStatus,
    /// Aggregate status before the recompute.
    pub previous: ApprovalStatus,
    /// This vote's recompute moved the request into a terminal status.
    pub transitioned: bool,
}

/// Why the guarded vote write refused.
enum Refusal {
    UnknownAuthority,
    Closed(ApprovalStatus),
}

/// Creates approval requests and records votes.
pub struct ApprovalConsensus {
    store: Arc<dyn DocumentStore>,
    directory: Arc<dyn AuthorityDirectory>,
    sender: Option<Arc<FanoutSender>>,
    tasks: Arc<NotificationTasks>,
    config: ApprovalConfig,
}

impl ApprovalConsensus {
    pub fn new(store: Arc<dyn DocumentStore>, directory: Arc<dyn AuthorityDirectory>) -> Self {
        Self {
            store,
            directory,
            sender: None,
            tasks: Arc::new(NotificationTasks::new()),
            config: ApprovalConfig::default(),
        }
    }

    pub fn with_sender(mut self, sender: Arc<FanoutSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<NotificationTasks>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_config(mut self, config: ApprovalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tasks(&self) -> &Arc<NotificationTasks> {
        &self.tasks
    }

    /// Snapshot the subject's authorities into a new PENDING request.
    pub async fn create_request(
        &self,
        subject: &str,
        action: Option<&str>,
    ) -> Result<ApprovalRequest> {
        let authorities = self.directory.authorities_for(subject).await?;
        if authorities.is_empty() {
            return Err(Error::NoAuthorities(subject.to_string()));
        }

        let mut request = ApprovalRequest::new(subject, authorities);
        if let Some(action) = action {
            request = request.with_action(action);
        }
        let path = request.path();
        self.store
            .create_as(&path, &request)
            .await
            .map_err(Error::StoreWrite)?;

        info!(
            subject_device_id = %subject,
            request_id = %request.request_id,
            authorities = request.approvals.len(),
            "Approval requested"
        );

        if self.config.notify_authorities_on_create {
            for authority in request.approvals.keys() {
                self.notify(
                    Recipient::authority(authority.clone()),
                    EventKind::ApprovalRequested,
                    &request,
                    Some(authority.as_str()),
                );
            }
        }
        Ok(request)
    }

    pub async fn get_request(
        &self,
        subject: &str,
        request_id: &str,
    ) -> Result<Option<ApprovalRequest>> {
        let path = paths::approval_request(subject, request_id);
        self.store
            .get_as(&path)
            .await
            .map_err(|e| Error::from_read(&path, e))
    }

    /// Every request of a subject, oldest first.
    pub async fn list_requests(&self, subject: &str) -> Result<Vec<ApprovalRequest>> {
        let path = paths::approval_requests(subject);
        let mut requests: Vec<ApprovalRequest> = self
            .store
            .list_as(&path)
            .await
            .map_err(|e| Error::from_read(&path, e))?;
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    /// Record `authority`'s vote and recompute the aggregate status.
    pub async fn cast_vote(
        &self,
        subject: &str,
        request_id: &str,
        authority: &str,
        vote: Vote,
    ) -> Result<VoteReceipt> {
        if vote == Vote::Pending {
            return Err(Error::InvalidVote(vote.to_string()));
        }
        let path = paths::approval_request(subject, request_id);

        self.write_vote(&path, request_id, authority, vote).await?;
        let (receipt, request) = self.recompute(&path).await?;

        debug!(
            request_id = %request_id,
            authority_id = %authority,
            vote = %vote,
            status = %receipt.status,
            "Vote recorded"
        );

        if receipt.transitioned {
            info!(request_id = %request_id, status = %receipt.status, "Approval decided");
            let kind = if receipt.status == ApprovalStatus::Approved {
                EventKind::ApprovalGranted
            } else {
                EventKind::ApprovalDenied
            };
            self.notify(Recipient::device(subject), kind, &request, Some(authority));
        } else if receipt.status == ApprovalStatus::Partial && self.config.notify_partial {
            self.notify(
                Recipient::device(subject),
                EventKind::ApprovalPartial,
                &request,
                Some(authority),
            );
        }
        Ok(receipt)
    }

    /// Step 1: the voter's own map entry, nothing else.
    async fn write_vote(
        &self,
        path: &str,
        request_id: &str,
        authority: &str,
        vote: Vote,
    ) -> Result<()> {
        let mut refusal: Option<Refusal> = None;
        let mut guard = |doc: &mut Value| -> tether_storage::Result<()> {
            let status: ApprovalStatus = serde_json::from_value(doc["status"].clone())?;
            if status.is_terminal() {
                refusal = Some(Refusal::Closed(status));
                return Err(tether_storage::Error::Aborted("request closed".to_string()));
            }
            let Some(entry) = doc
                .get_mut("approvals")
                .and_then(Value::as_object_mut)
                .and_then(|approvals| approvals.get_mut(authority))
            else {
                refusal = Some(Refusal::UnknownAuthority);
                return Err(tether_storage::Error::Aborted("unknown authority".to_string()));
            };
            *entry = json!(vote);
            Ok(())
        };

        match self.store.update(path, &mut guard).await {
            Ok(_) => Ok(()),
            Err(tether_storage::Error::Aborted(_)) => match refusal {
                Some(Refusal::Closed(status)) => Err(Error::RequestClosed {
                    request_id: request_id.to_string(),
                    status,
                }),
                Some(Refusal::UnknownAuthority) | None => Err(Error::UnknownAuthority {
                    request_id: request_id.to_string(),
                    authority_id: authority.to_string(),
                }),
            },
            Err(e) => Err(Error::from_write(path, e)),
        }
    }

    /// Step 2: recompute the aggregate in one transaction.
    async fn recompute(&self, path: &str) -> Result<(VoteReceipt, ApprovalRequest)> {
        let mut receipt = VoteReceipt {
            status: ApprovalStatus::Pending,
            previous: ApprovalStatus::Pending,
            transitioned: false,
        };
        let request = self
            .store
            .update_as(path, |request: &mut ApprovalRequest| {
                let previous = request.status;
                // A decided request keeps its decision.
                let next = if previous.is_terminal() {
                    previous
                } else {
                    aggregate(&request.approvals)
                };
                request.status = next;
                receipt = VoteReceipt {
                    status: next,
                    previous,
                    transitioned: next.is_terminal() && !previous.is_terminal(),
                };
                Ok(())
            })
            .await
            .map_err(|e| Error::from_write(path, e))?;
        Ok((receipt, request))
    }

    fn notify(
        &self,
        recipient: Recipient,
        kind: EventKind,
        request: &ApprovalRequest,
        authority: Option<&str>,
    ) {
        let Some(sender) = self.sender.clone() else {
            return;
        };
        let mut payload = EventPayload::new()
            .with_subject(request.subject_device_id.clone())
            .with_request_id(request.request_id.clone())
            .with_extra("status", request.status.as_str());
        if let Some(authority) = authority {
            payload = payload.with_authority(authority);
        }
        if let Some(action) = &request.action {
            payload = payload.with_extra("action", action.clone());
        }

        self.tasks.spawn(
            format!("{}:{}:{}", kind, request.request_id, recipient.id()),
            async move {
                sender.send(&recipient, kind, &payload).await?;
                Ok(())
            },
        );
    }
}
