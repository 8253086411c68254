//! # Pre-Save Analysis
//!
//! Compares the stored record with an incoming edit before it is written and
//! produces a [`SaveAnalysis`]. The lifecycle layer hands that value to the
//! post-save remote step, so nothing about "what changed" has to be stashed
//! on the record itself.
//!
//! ```text
//! previous (ledger) ─┐
//!                    ├──► analyze() ──► SaveAnalysis ──► post-save remote step
//! SubscriberInput ───┘                  (secrets, plan_changed,
//!                                        pending docs, removed doc ids)
//! ```

use std::collections::HashSet;

use crate::types::{CorrelationKind, SecretInput, Subscriber};

/// A user edit: the record as it should be stored plus any secrets typed
/// alongside it.
#[derive(Debug, Clone)]
pub struct SubscriberInput {
    pub record: Subscriber,
    pub secrets: SecretInput,
}

impl SubscriberInput {
    pub fn new(record: Subscriber) -> Self {
        SubscriberInput {
            record,
            secrets: SecretInput::default(),
        }
    }

    pub fn with_secrets(mut self, secrets: SecretInput) -> Self {
        self.secrets = secrets;
        self
    }
}

/// What a save means for the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveAnalysis {
    /// No stored record existed before this save.
    pub is_new: bool,
    /// Secrets entered with this save, blanks already dropped.
    pub secrets: SecretInput,
    /// The plan link points at a different plan than before.
    pub plan_changed: bool,
    /// At least one attachment row still has to be uploaded.
    pub has_pending_documents: bool,
    /// Backend document ids that were mirrored before and are gone now.
    pub removed_remote_document_ids: Vec<i64>,
}

impl SaveAnalysis {
    /// Returns true if the save needs the unified secret reset.
    pub fn needs_secret_reset(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Returns true if the document roster needs any remote work.
    pub fn touches_documents(&self) -> bool {
        self.has_pending_documents || !self.removed_remote_document_ids.is_empty()
    }
}

/// Runs the pre-save analysis.
pub fn analyze(previous: Option<&Subscriber>, input: &SubscriberInput) -> SaveAnalysis {
    let incoming = &input.record;
    let has_pending_documents = incoming.documents.iter().any(|d| d.needs_upload() && d.file_path.is_some());

    let Some(previous) = previous else {
        return SaveAnalysis {
            is_new: true,
            secrets: input.secrets.non_blank(),
            plan_changed: incoming.links.get(CorrelationKind::Plan).is_some(),
            has_pending_documents,
            removed_remote_document_ids: Vec::new(),
        };
    };

    let plan_changed = previous.links.local_id(CorrelationKind::Plan)
        != incoming.links.local_id(CorrelationKind::Plan);

    let kept: HashSet<i64> = incoming.remote_document_ids().into_iter().collect();
    let removed_remote_document_ids = previous
        .remote_document_ids()
        .into_iter()
        .filter(|id| !kept.contains(id))
        .collect();

    SaveAnalysis {
        is_new: false,
        secrets: input.secrets.non_blank(),
        plan_changed,
        has_pending_documents,
        removed_remote_document_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrelatedLink, DocumentAttachment, Secret};

    fn stored() -> Subscriber {
        let mut sub = Subscriber::new("alice", "alice");
        sub.external_id = Some(42);
        sub.links.plan = Some(CorrelatedLink::resolved("FIBER-100", 77));
        let mut a = DocumentAttachment::pending("a", "/tmp/a.pdf");
        a.remote_document_id = Some(1);
        a.uploaded = true;
        let mut b = DocumentAttachment::pending("b", "/tmp/b.pdf");
        b.remote_document_id = Some(2);
        b.uploaded = true;
        sub.documents = vec![a, b];
        sub
    }

    #[test]
    fn test_unchanged_save_needs_nothing() {
        let previous = stored();
        let analysis = analyze(Some(&previous), &SubscriberInput::new(previous.clone()));

        assert!(!analysis.is_new);
        assert!(!analysis.plan_changed);
        assert!(!analysis.needs_secret_reset());
        assert!(!analysis.touches_documents());
    }

    #[test]
    fn test_detects_plan_change_and_removed_document() {
        let previous = stored();
        let mut edited = previous.clone();
        edited.links.plan = Some(CorrelatedLink::resolved("FIBER-200", 78));
        edited.documents.retain(|d| d.row_id != "b");
        edited
            .documents
            .push(DocumentAttachment::pending("c", "/tmp/c.pdf"));

        let input = SubscriberInput::new(edited).with_secrets(SecretInput {
            portal_password: Some(Secret::new("new-portal")),
            connection_password: Some(Secret::new("")),
        });
        let analysis = analyze(Some(&previous), &input);

        assert!(analysis.plan_changed);
        assert!(analysis.has_pending_documents);
        assert_eq!(analysis.removed_remote_document_ids, vec![2]);
        assert!(analysis.needs_secret_reset());
        assert!(analysis.secrets.connection_password.is_none());
    }

    #[test]
    fn test_new_record() {
        let mut draft = Subscriber::new("bob", "bob");
        draft.documents.push(DocumentAttachment::pending("x", "/tmp/x.pdf"));
        let analysis = analyze(None, &SubscriberInput::new(draft));
        assert!(analysis.is_new);
        assert!(analysis.has_pending_documents);
    }
}
