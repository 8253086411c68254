//! # Validation
//!
//! Create-time defaults and the required-field rules that must hold before
//! the provisioning saga may run.
//!
//! Everything here is checked locally; a failure never reaches the backend.

use crate::codes::{ConnectionType, ProfileStatus};
use crate::error::ValidationError;
use crate::types::{ConnectionStatus, CorrelationKind, SecretInput, Subscriber};

/// Fills the defaults a brand-new record gets before validation.
///
/// - status Active
/// - profile status "Active (*)", connection type PPPoE
/// - SMS and e-mail notifications on unless explicitly chosen
/// - local id falls back to the username
pub fn apply_create_defaults(sub: &mut Subscriber) {
    sub.status = ConnectionStatus::Active;
    sub.profile.profile_status.get_or_insert(ProfileStatus::Active);
    sub.profile.connection_type.get_or_insert(ConnectionType::Pppoe);
    sub.profile.flags.sms.get_or_insert(true);
    sub.profile.flags.email.get_or_insert(true);
    if sub.local_id.trim().is_empty() {
        sub.local_id = sub.username.clone();
    }
}

fn require_text(field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ValidationError::required(field)),
    }
}

fn require_resolved_link(sub: &Subscriber, kind: CorrelationKind) -> Result<(), ValidationError> {
    let link = sub
        .links
        .get(kind)
        .ok_or_else(|| ValidationError::required(kind.as_str()))?;
    if link.external_id.is_none() {
        return Err(ValidationError::UnsyncedLink {
            field: kind.as_str().to_string(),
            local_id: link.local_id.clone(),
        });
    }
    Ok(())
}

/// Every attachment row must point at something: a local file to upload or
/// an already mirrored backend document.
pub fn validate_document_rows(sub: &Subscriber) -> Result<(), ValidationError> {
    for (index, row) in sub.documents.iter().enumerate() {
        let has_file = row.file_path.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_remote = row.remote_document_id.is_some()
            || row.remote_file_link.as_deref().is_some_and(|l| !l.is_empty());
        if !has_file && !has_remote {
            return Err(ValidationError::InvalidFormat {
                field: format!("documents[{}]", index + 1),
                reason: "attach a file or link a backend document".to_string(),
            });
        }
    }
    Ok(())
}

/// Checks everything the saga assumes before its first remote call.
pub fn validate_for_create(sub: &Subscriber, secrets: &SecretInput) -> Result<(), ValidationError> {
    if sub.external_id.is_some() {
        return Err(ValidationError::precondition(format!(
            "subscriber '{}' is already provisioned",
            sub.local_id
        )));
    }

    require_text("username", Some(&sub.username))?;
    require_text("full_name", Some(&sub.full_name))?;
    require_text("phone", sub.phone.as_deref())?;
    require_text("email", sub.email.as_deref())?;

    require_resolved_link(sub, CorrelationKind::Salesperson)?;
    require_resolved_link(sub, CorrelationKind::Plan)?;

    let p = &sub.profile;
    require_text("billing.address", p.billing.line.as_deref())?;
    require_text("billing.city", p.billing.city.as_deref())?;
    require_text("billing.zip", p.billing.zip.as_deref())?;
    require_text("installation.address", p.installation.line.as_deref())?;
    require_text("installation.city", p.installation.city.as_deref())?;
    require_text("installation.zip", p.installation.zip.as_deref())?;

    if p.id_proof_type.is_none() {
        return Err(ValidationError::required("id_proof_type"));
    }
    require_text("id_proof_number", p.id_proof_number.as_deref())?;

    if sub.documents.is_empty() {
        return Err(ValidationError::required("documents"));
    }
    validate_document_rows(sub)?;

    let secrets = secrets.non_blank();
    if secrets.portal_password.is_none() {
        return Err(ValidationError::required("portal_password"));
    }
    if secrets.connection_password.is_none() {
        return Err(ValidationError::required("connection_password"));
    }

    Ok(())
}

/// Checks an edit of an existing record before it is pushed.
pub fn validate_for_update(sub: &Subscriber) -> Result<(), ValidationError> {
    if sub.external_id.is_none() {
        return Err(ValidationError::precondition(format!(
            "subscriber '{}' has no external id; provision it first",
            sub.local_id
        )));
    }
    require_text("username", Some(&sub.username))?;
    validate_document_rows(sub)
}

// =============================================================================
// Unit Tests
// =============================================================================
