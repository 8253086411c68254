//! # Field Mapper
//!
//! Pure translation between ledger records and the backend's JSON wire
//! representation.
//!
//! ## Directions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Field Mapper                                    │
//! │                                                                         │
//! │   Subscriber ──build_subscriber_payload──► { "username", "fullname",    │
//! │                                              "installation_address":    │
//! │                                              "{\"address\":..}", ... }  │
//! │                                                                         │
//! │   { "data": { ... } } ──apply_remote_detail──► Subscriber (mirror)      │
//! │   { "data": [ ... ] } ──parse_list_page──────► ListPage / ListRow       │
//! │   [ {document}, ... ] ──parse_remote_documents► Vec<RemoteDocument>     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend is inconsistent about envelopes (`{data: ...}` vs bare) and
//! about scalar types (`"1"` vs `1`), so every read goes through the lenient
//! accessors at the top of this module.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};

use crate::codes::{CodedValue, ConnectionType, DiscountType, IdProofType, ProfileStatus};
use crate::error::{CoreError, CoreResult};
use crate::types::{
    Actor, Address, ConnectionStatus, CorrelatedLink, CorrelationEntry, CorrelationKind,
    DocumentAttachment, SecretInput, Subscriber,
};
use crate::{DOCUMENT_INITIAL_VERIFICATION, DOCUMENT_OWNER_TYPE_SUBSCRIBER, POLICY_GROUP_PRIORITY};

/// Wire format for plain timestamps (`2025-09-23 03:39:11`).
pub const WIRE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Display convention the RADIUS expiration attribute expects.
pub const RADIUS_DATETIME_FORMAT: &str = "%d %b %Y %H:%M:%S";

const QUOTA_FIELDS: [&str; 4] = [
    "total_data_quota",
    "used_data_quota",
    "total_session_quota",
    "used_session_quota",
];

// =============================================================================
// Lenient JSON Access
// =============================================================================

/// Returns the `data` envelope when present, the value itself otherwise.
pub fn unwrap_data(value: &Value) -> &Value {
    match value.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

/// Looks a key up on the value, then inside its `data` envelope.
/// `null` counts as missing.
pub fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| value.get("data").and_then(|d| d.get(key)).filter(|v| !v.is_null()))
}

pub fn as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

pub fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Non-empty text; numbers are rendered as text.
pub fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `"1"`, `1` and `true` are on; everything else is off.
pub fn as_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => s.trim() == "1",
        _ => false,
    }
}

/// Any non-empty, non-zero value is on.
pub fn as_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.trim().is_empty() && s.trim() != "0",
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        _ => false,
    }
}

fn flag_value(on: bool) -> Value {
    Value::from(if on { 1 } else { 0 })
}

fn put<V: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<V>) {
    if let Some(v) = value {
        body.insert(key.to_string(), v.into());
    }
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Dates
// =============================================================================

/// Keeps the date part of a date or datetime string (`2025-09-23T...`).
pub fn clean_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split(['T', ' ']).next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parses the backend's timestamps into naive UTC.
///
/// Accepts RFC 3339 (`2025-09-23T03:39:11.000Z`), ISO without zone,
/// `YYYY-MM-DD HH:MM:SS`, and a bare date (midnight).
pub fn clean_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc().with_nanosecond_trimmed());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.with_nanosecond_trimmed());
        }
    }
    clean_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0))
}

trait TrimNanos {
    fn with_nanosecond_trimmed(self) -> Self;
}

impl TrimNanos for NaiveDateTime {
    fn with_nanosecond_trimmed(self) -> Self {
        use chrono::Timelike;
        self.with_nanosecond(0).unwrap_or(self)
    }
}

/// Formats an expiration instant in the backend's display timezone as
/// `DD Mon YYYY HH:MM:SS`. Values without an offset are taken as UTC.
///
/// ## Example
/// ```rust
/// use ledger_core::mapper::format_radius_datetime;
///
/// let tz: chrono_tz::Tz = "Asia/Kolkata".parse().unwrap();
/// assert_eq!(
///     format_radius_datetime("2025-09-23T03:39:11.000Z", tz).as_deref(),
///     Some("23 Sep 2025 09:09:11")
/// );
/// ```
pub fn format_radius_datetime(raw: &str, tz: Tz) -> Option<String> {
    let utc = clean_datetime(raw)?;
    let zoned = tz.from_utc_datetime(&utc);
    Some(zoned.format(RADIUS_DATETIME_FORMAT).to_string())
}

pub fn format_wire_datetime(dt: &NaiveDateTime) -> String {
    dt.format(WIRE_DATETIME_FORMAT).to_string()
}

// =============================================================================
// Installation Address
// =============================================================================

/// Encodes the installation block the way the backend stores it: a JSON
/// string, each part falling back to the billing block.
pub fn encode_installation_address(billing: &Address, installation: &Address) -> String {
    let pick = |own: &Option<String>, fallback: &Option<String>| {
        own.clone()
            .filter(|s| !s.is_empty())
            .or_else(|| fallback.clone())
            .map(Value::String)
            .unwrap_or(Value::Null)
    };
    json!({
        "address": pick(&installation.line, &billing.line),
        "city": pick(&installation.city, &billing.city),
        "zip": pick(&installation.zip, &billing.zip),
    })
    .to_string()
}

/// Decodes an installation address sent as an object, a JSON-encoded
/// object, or free text. Returns `None` when the field is absent.
pub fn parse_installation_address(value: Option<&Value>) -> Option<Address> {
    let from_object = |obj: &Value| Address {
        line: as_text(obj.get("address")),
        city: as_text(obj.get("city")),
        zip: as_text(obj.get("zip")),
    };

    match value? {
        obj @ Value::Object(_) => Some(from_object(obj)),
        Value::String(raw) if raw.trim().is_empty() => None,
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => Some(from_object(&parsed)),
            _ => Some(Address {
                line: Some(raw.clone()),
                city: None,
                zip: None,
            }),
        },
        _ => None,
    }
}

// =============================================================================
// Outbound: Subscriber Payload
// =============================================================================

/// Whether a payload is for the initial create or a later update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    Create,
    Update,
}

/// Everything besides the record itself that shapes the outbound payload.
#[derive(Debug, Clone)]
pub struct PayloadContext<'a> {
    pub mode: PayloadMode,
    /// Correlation row of the linked salesperson, if any.
    pub salesperson: Option<&'a CorrelationEntry>,
    pub default_isp_id: Option<i64>,
    pub default_branch_id: Option<i64>,
    pub actor: &'a Actor,
}

/// Resolves the ISP id: explicit link, then the salesperson's ISP, then the
/// configured default.
pub fn resolve_isp_id(sub: &Subscriber, ctx: &PayloadContext<'_>) -> Option<i64> {
    sub.links
        .external_id(CorrelationKind::Isp)
        .or_else(|| ctx.salesperson.and_then(|sp| sp.parent_isp_external_id))
        .or(ctx.default_isp_id)
}

/// Resolves the branch id: explicit link, then the configured default.
pub fn resolve_branch_id(sub: &Subscriber, ctx: &PayloadContext<'_>) -> Option<i64> {
    sub.links
        .external_id(CorrelationKind::Branch)
        .or(ctx.default_branch_id)
}

/// Who a remote write is attributed to: the linked salesperson, falling back
/// to the acting user.
pub fn provenance(
    salesperson: Option<&CorrelationEntry>,
    actor: &Actor,
) -> (Option<i64>, Option<String>) {
    let id = salesperson
        .map(|sp| sp.external_id)
        .or(actor.remote_user_id);
    let username = salesperson
        .and_then(|sp| sp.username.clone())
        .or_else(|| actor.remote_username.clone())
        .or_else(|| Some(actor.login.clone()).filter(|l| !l.is_empty()));
    (id, username)
}

/// Builds the full subscriber body for `POST /subscribers` and
/// `PUT /subscribers/{id}`.
///
/// ## Rules
/// - Absent values are omitted, never sent as `null`
/// - Link ids are sent only when the cached correlation id is known
/// - On create: profile status defaults to "Active (*)", connection type to
///   PPPoE, SMS/e-mail notifications to on, quota counters are left to the
///   backend, and a `created_by_*` provenance block is attached
pub fn build_subscriber_payload(sub: &Subscriber, ctx: &PayloadContext<'_>) -> Value {
    let is_create = ctx.mode == PayloadMode::Create;
    let p = &sub.profile;
    let mut body = Map::new();

    body.insert("username".into(), Value::String(sub.username.clone()));
    body.insert("fullname".into(), Value::String(sub.full_name.clone()));
    put(&mut body, "phone", sub.phone.clone());
    put(&mut body, "email", sub.email.clone());
    put(&mut body, "gender", p.gender.as_deref().map(capitalize));
    put(&mut body, "country", p.country.clone());
    put(&mut body, "company", p.company.clone());
    put(
        &mut body,
        "dob",
        p.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
    );
    body.insert("connection_status".into(), Value::from(sub.status.wire_flag()));

    put(&mut body, "address", p.billing.line.clone());
    put(&mut body, "city", p.billing.city.clone());
    put(&mut body, "zip", p.billing.zip.clone());
    body.insert(
        "installation_address".into(),
        Value::String(encode_installation_address(&p.billing, &p.installation)),
    );

    put(&mut body, "cpe_ip_address", p.cpe_ip_address.clone());
    put(&mut body, "latitude", p.latitude);
    put(&mut body, "longitude", p.longitude);
    put(&mut body, "identity_type", p.id_proof_type.map(|t| t.label()));
    put(&mut body, "identity", p.id_proof_number.clone());
    put(&mut body, "simultaneous_use", p.simultaneous_use);

    let profile_status = p
        .profile_status
        .or(is_create.then_some(ProfileStatus::Active));
    put(&mut body, "profile_status", profile_status.map(|s| s.code()));
    let connection_type = p
        .connection_type
        .or(is_create.then_some(ConnectionType::Pppoe));
    put(&mut body, "connection_type", connection_type.map(|c| c.code()));

    put(&mut body, "expiration_date", p.expiration.as_ref().map(format_wire_datetime));
    put(&mut body, "mac_address", p.mac_address.clone());
    put(&mut body, "static_ip", p.static_ip.clone());

    let flags = &p.flags;
    let notify_default = is_create;
    body.insert("auto_renew_status".into(), flag_value(flags.auto_renew));
    body.insert(
        "sms_status".into(),
        flag_value(flags.sms.unwrap_or(notify_default)),
    );
    body.insert(
        "email_status".into(),
        flag_value(flags.email.unwrap_or(notify_default)),
    );
    body.insert("mac_lock_status".into(), flag_value(flags.mac_lock));
    body.insert("lock_volume_status".into(), flag_value(flags.lock_volume));
    body.insert("login_log_status".into(), flag_value(flags.login_log));
    body.insert("lock_session_status".into(), flag_value(flags.lock_session));

    put(&mut body, "total_data_quota", p.quota.total_data);
    put(&mut body, "used_data_quota", p.quota.used_data);
    put(&mut body, "total_session_quota", p.quota.total_session);
    put(&mut body, "used_session_quota", p.quota.used_session);
    put(&mut body, "discount_type", p.discount_type.map(|d| d.code()));
    put(&mut body, "discount", p.discount);

    for kind in [
        CorrelationKind::Salesperson,
        CorrelationKind::Plan,
        CorrelationKind::Nas,
        CorrelationKind::IpPool,
        CorrelationKind::IpAddress,
    ] {
        put(&mut body, kind.wire_field(), sub.links.external_id(kind));
    }
    put(&mut body, "branch_id", resolve_branch_id(sub, ctx));
    put(&mut body, "isp_id", resolve_isp_id(sub, ctx));

    if is_create {
        let (created_by_id, created_by_username) = provenance(ctx.salesperson, ctx.actor);
        put(&mut body, "created_by_id", created_by_id);
        put(&mut body, "created_by_username", created_by_username);

        for key in QUOTA_FIELDS {
            body.remove(key);
        }
    }

    Value::Object(body)
}

/// Adds the create-only secrets: a throwaway portal secret, and the
/// connection secret the RADIUS check record stores as cleartext anyway.
pub fn with_create_secrets(mut payload: Value, temporary: &str, secrets: &SecretInput) -> Value {
    if let Some(body) = payload.as_object_mut() {
        body.insert("password".into(), Value::String(temporary.to_string()));
        if let Some(conn) = secrets.non_blank().connection_password {
            body.insert(
                "connection_password".into(),
                Value::String(conn.expose().to_string()),
            );
        }
    }
    payload
}

/// Builds the unified reset body. Returns `None` when no non-blank secret
/// was entered, in which case the call must be skipped.
pub fn password_reset_body(username: &str, secrets: &SecretInput) -> Option<Value> {
    let secrets = secrets.non_blank();
    if secrets.portal_password.is_none() && secrets.connection_password.is_none() {
        return None;
    }
    let mut body = Map::new();
    body.insert("username".into(), Value::String(username.to_string()));
    put(
        &mut body,
        "portal_password",
        secrets.portal_password.map(|s| s.expose().to_string()),
    );
    put(
        &mut body,
        "connection_password",
        secrets.connection_password.map(|s| s.expose().to_string()),
    );
    Some(Value::Object(body))
}

pub fn expiration_body(formatted: &str) -> Value {
    json!({ "expirationDate": formatted })
}

pub fn policy_binding_body(username: &str, group: &str) -> Value {
    json!({
        "username": username,
        "groupname": group,
        "priority": POLICY_GROUP_PRIORITY,
    })
}

/// Service-history entry linking a subscriber to a plan.
pub fn service_history_body(
    subscriber_external_id: i64,
    plan_external_id: i64,
    description: &str,
    action_by: (Option<i64>, Option<String>),
    now: NaiveDateTime,
) -> Value {
    let stamp = format_wire_datetime(&now);
    let mut body = Map::new();
    body.insert("subscriber_id".into(), Value::from(subscriber_external_id));
    body.insert("package_id".into(), Value::from(plan_external_id));
    body.insert("created_at".into(), Value::String(stamp.clone()));
    body.insert("updated_at".into(), Value::String(stamp));
    if !description.is_empty() {
        body.insert("description".into(), Value::String(description.to_string()));
    }
    put(&mut body, "action_by_id", action_by.0);
    put(&mut body, "action_by_username", action_by.1.filter(|u| !u.is_empty()));
    Value::Object(body)
}

// =============================================================================
// Inbound: Create Response / Plan
// =============================================================================

/// What the backend tells us after `POST /subscribers`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSubscriber {
    pub external_id: i64,
    pub username: Option<String>,
    pub expiration: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

pub fn parse_create_response(value: &Value) -> CoreResult<CreatedSubscriber> {
    let external_id = as_i64(lookup(value, "id")).ok_or_else(|| {
        CoreError::MalformedPayload("create response did not include a subscriber id".into())
    })?;
    Ok(CreatedSubscriber {
        external_id,
        username: as_text(lookup(value, "username")),
        expiration: as_text(lookup(value, "expiration_date")),
        created_at: as_text(lookup(value, "created_at")).and_then(|s| clean_datetime(&s)),
    })
}

/// Policy group named by a plan definition (`GET /packages/{id}`).
pub fn policy_group_from_plan(value: &Value) -> Option<String> {
    as_text(unwrap_data(value).get("policy_group"))
}

// =============================================================================
// Inbound: List Rows
// =============================================================================

/// One page of `GET /subscribers?limit&offset`.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub rows: Vec<Value>,
    /// `pagination.hasMore` when the backend sent it.
    pub has_more: Option<bool>,
}

/// Accepts `{data: [...], pagination: {hasMore}}` or a bare array.
pub fn parse_list_page(value: &Value) -> ListPage {
    match value {
        Value::Array(rows) => ListPage {
            rows: rows.clone(),
            has_more: None,
        },
        Value::Object(obj) => ListPage {
            rows: obj
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            has_more: obj
                .get("pagination")
                .and_then(|p| p.get("hasMore"))
                .and_then(Value::as_bool),
        },
        _ => ListPage::default(),
    }
}

/// The cheap identity fields carried by a list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub external_id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: ConnectionStatus,
}

/// Returns `None` for rows without an id or username.
pub fn parse_list_row(value: &Value) -> Option<ListRow> {
    let external_id = as_i64(value.get("id"))?;
    let username = as_text(value.get("username"))?;
    Some(ListRow {
        external_id,
        username,
        full_name: as_text(value.get("fullname")),
        phone: as_text(value.get("phone")),
        email: as_text(value.get("email")),
        status: ConnectionStatus::from_wire_flag(as_flag(value.get("connection_status"))),
    })
}

/// Overwrites only the identity fields a list row carries.
pub fn apply_list_row(sub: &mut Subscriber, row: &ListRow) {
    sub.username = row.username.clone();
    if let Some(name) = &row.full_name {
        sub.full_name = name.clone();
    }
    sub.phone = row.phone.clone();
    sub.email = row.email.clone();
    sub.status = row.status;
}

/// Fresh ledger record for a subscriber first seen in a list sweep.
pub fn subscriber_from_list_row(row: &ListRow) -> Subscriber {
    let mut sub = Subscriber::new(row.username.clone(), row.username.clone());
    sub.external_id = Some(row.external_id);
    sub.full_name = row.full_name.clone().unwrap_or_else(|| row.username.clone());
    apply_list_row(&mut sub, row);
    sub
}

// =============================================================================
// Inbound: Full Detail
// =============================================================================

/// Links a detail record carries, in the order they are resolved.
const DETAIL_LINKS: [CorrelationKind; 6] = [
    CorrelationKind::Nas,
    CorrelationKind::Plan,
    CorrelationKind::Salesperson,
    CorrelationKind::Branch,
    CorrelationKind::IpPool,
    CorrelationKind::IpAddress,
];

/// Backend ids of every foreign entity referenced by a detail record.
pub fn detail_link_ids(detail: &Value) -> Vec<(CorrelationKind, i64)> {
    let detail = unwrap_data(detail);
    DETAIL_LINKS
        .iter()
        .filter_map(|kind| as_i64(detail.get(kind.wire_field())).map(|id| (*kind, id)))
        .collect()
}

/// Salesperson display name, used when the salesperson id is unknown locally.
pub fn detail_salesperson_name(detail: &Value) -> Option<String> {
    as_text(unwrap_data(detail).get("salesperson_name"))
}

/// Field labels whose backend code had no entry in its table.
pub type UnknownCodes = Vec<(&'static str, String)>;

fn decode_coded<T: CodedValue>(
    field: &'static str,
    value: Option<&Value>,
    unknown: &mut UnknownCodes,
) -> Option<T> {
    let raw = as_text(value)?;
    let decoded = T::parse_select(&raw);
    if decoded.is_none() {
        unknown.push((field, raw));
    }
    decoded
}

/// Overwrites every mirror field of `sub` from a full detail record.
///
/// `links` holds the correlation rows already resolved for
/// [`detail_link_ids`]; a referenced link missing from it is cleared. The ISP
/// link is not part of the detail record and is left untouched, as are the
/// lifecycle flags, which the caller owns.
///
/// Returns the codes that could not be decoded so the caller can log them.
pub fn apply_remote_detail(
    sub: &mut Subscriber,
    detail: &Value,
    links: &HashMap<CorrelationKind, CorrelatedLink>,
) -> UnknownCodes {
    let d = unwrap_data(detail);
    let mut unknown = UnknownCodes::new();

    if let Some(username) = as_text(d.get("username")) {
        sub.username = username;
    }
    if let Some(name) = as_text(d.get("fullname")) {
        sub.full_name = name;
    }
    sub.phone = as_text(d.get("phone"));
    sub.email = as_text(d.get("email"));
    sub.status = ConnectionStatus::from_wire_flag(as_flag(d.get("connection_status")));

    let p = &mut sub.profile;
    p.gender = as_text(d.get("gender")).map(|g| capitalize(&g));
    if let Some(country) = as_text(d.get("country")) {
        p.country = Some(country);
    }
    p.company = as_text(d.get("company"));
    p.date_of_birth = as_text(d.get("dob")).and_then(|s| clean_date(&s));
    p.profile_status = decode_coded::<ProfileStatus>("profile_status", d.get("profile_status"), &mut unknown);
    p.connection_type =
        decode_coded::<ConnectionType>("connection_type", d.get("connection_type"), &mut unknown);
    p.expiration = as_text(d.get("expiration_date")).and_then(|s| clean_datetime(&s));

    p.billing = Address {
        line: as_text(d.get("address")),
        city: as_text(d.get("city")),
        zip: as_text(d.get("zip")),
    };
    if let Some(installation) = parse_installation_address(d.get("installation_address")) {
        p.installation = installation;
    }

    p.cpe_ip_address = as_text(d.get("cpe_ip_address"));
    p.latitude = as_f64(d.get("latitude"));
    p.longitude = as_f64(d.get("longitude"));
    p.mac_address = as_text(d.get("mac_address"));
    p.static_ip = as_text(d.get("static_ip"));
    p.simultaneous_use = as_i64(d.get("simultaneous_use"));

    p.flags.portal_login = as_truthy(d.get("self_activation_status"));
    p.flags.auto_renew = as_flag(d.get("auto_renew_status"));
    p.flags.sms = Some(as_flag(d.get("sms_status")));
    p.flags.email = Some(as_flag(d.get("email_status")));
    p.flags.mac_lock = as_flag(d.get("mac_lock_status"));
    p.flags.lock_volume = as_flag(d.get("lock_volume_status"));
    p.flags.login_log = as_flag(d.get("login_log_status"));
    p.flags.lock_session = as_flag(d.get("lock_session_status"));

    p.quota.total_data = as_f64(d.get("total_data_quota"));
    p.quota.used_data = as_f64(d.get("used_data_quota"));
    p.quota.total_session = as_i64(d.get("total_session_quota"));
    p.quota.used_session = as_i64(d.get("used_session_quota"));
    p.discount_type =
        decode_coded::<DiscountType>("discount_type", d.get("discount_type"), &mut unknown);
    p.discount = as_f64(d.get("discount"));

    let identity_raw = as_text(d.get("identity_type"));
    p.id_proof_type = identity_raw.as_deref().and_then(IdProofType::parse_select);
    if let (None, Some(raw)) = (p.id_proof_type, identity_raw) {
        unknown.push(("identity_type", raw));
    }
    p.id_proof_number = as_text(d.get("identity"));

    for kind in DETAIL_LINKS {
        *sub.links.slot_mut(kind) = links.get(&kind).cloned();
    }

    sub.remote_created_at = as_text(d.get("created_at")).and_then(|s| clean_datetime(&s));

    unknown
}

// =============================================================================
// Documents
// =============================================================================

/// A document as listed by `GET /documents/subscriber/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    pub id: i64,
    pub file_name: Option<String>,
    pub note: Option<String>,
    pub file_link: Option<String>,
    pub verification_status: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

/// Accepts `{data: [...]}` or a bare array; rows without an id are dropped.
pub fn parse_remote_documents(value: &Value) -> Vec<RemoteDocument> {
    let rows = match value {
        Value::Array(rows) => rows.as_slice(),
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };
    rows.iter()
        .filter_map(|row| {
            Some(RemoteDocument {
                id: as_i64(row.get("id"))?,
                file_name: as_text(row.get("file_name")),
                note: as_text(row.get("note")),
                file_link: as_text(row.get("file_link")),
                verification_status: as_text(row.get("verification_status")),
                created_at: as_text(row.get("created_at")).and_then(|s| clean_datetime(&s)),
            })
        })
        .collect()
}

/// Overwrites a row from its remote counterpart.
///
/// `uploaded_at` comes from the remote creation time, falling back to the
/// row's previous value and finally to `now`, so repeated syncs are stable.
pub fn apply_remote_document(row: &mut DocumentAttachment, remote: &RemoteDocument, now: NaiveDateTime) {
    if let Some(name) = &remote.file_name {
        row.label = Some(name.clone());
    }
    row.note = remote.note.clone();
    row.remote_document_id = Some(remote.id);
    row.remote_file_link = remote.file_link.clone();
    row.verification_status = remote.verification_status.clone();
    row.uploaded = true;
    row.uploaded_at = remote.created_at.or(row.uploaded_at).or(Some(now));
    row.last_upload_error = None;
}

/// Result of `POST /documents`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub remote_document_id: i64,
    pub file_link: Option<String>,
    pub verification_status: Option<String>,
}

pub fn parse_upload_response(value: &Value) -> CoreResult<UploadReceipt> {
    let remote_document_id = as_i64(lookup(value, "id")).ok_or_else(|| {
        CoreError::MalformedPayload("upload response did not include a document id".into())
    })?;
    Ok(UploadReceipt {
        remote_document_id,
        file_link: as_text(lookup(value, "file_link")),
        verification_status: as_text(lookup(value, "verification_status")),
    })
}

/// Correlation ids attached to an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOwner {
    pub subscriber_id: i64,
    pub subscriber_username: String,
    pub uploaded_by_id: Option<i64>,
    pub uploaded_by_username: Option<String>,
    pub isp_id: Option<i64>,
    pub branch_id: Option<i64>,
}

/// Text fields of the multipart upload form. Empty values are omitted.
pub fn upload_form_fields(
    document_name: &str,
    owner: &UploadOwner,
    now: NaiveDateTime,
) -> Vec<(&'static str, String)> {
    let stamp = now.format("%Y-%m-%dT%H:%M:%S").to_string();
    let subscriber_id = owner.subscriber_id.to_string();
    let fields = [
        ("file_name", Some(document_name.to_string())),
        ("subscriber_id", Some(subscriber_id.clone())),
        ("owner_type", Some(DOCUMENT_OWNER_TYPE_SUBSCRIBER.to_string())),
        ("owner_id", Some(subscriber_id)),
        ("owner_username", Some(owner.subscriber_username.clone())),
        ("uploaded_by_id", owner.uploaded_by_id.map(|id| id.to_string())),
        ("uploaded_by_username", owner.uploaded_by_username.clone()),
        ("isp_id", owner.isp_id.map(|id| id.to_string())),
        ("branch_id", owner.branch_id.map(|id| id.to_string())),
        ("verification_status", Some(DOCUMENT_INITIAL_VERIFICATION.to_string())),
        ("created_at", Some(stamp.clone())),
        ("updated_at", Some(stamp)),
    ];
    fields
        .into_iter()
        .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v)))
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureFlags, Secret};

    fn sample_subscriber() -> Subscriber {
        let mut sub = Subscriber::new("alice", "alice");
        sub.full_name = "Alice Example".into();
        sub.phone = Some("9000000001".into());
        sub.email = Some("alice@example.net".into());
        sub.status = ConnectionStatus::Active;
        sub.profile.gender = Some("FEMALE".into());
        sub.profile.billing = Address::new("1 Main St", "Pune", "411001");
        sub.profile.installation = Address {
            line: Some("2 Tower Rd".into()),
            city: None,
            zip: None,
        };
        sub.profile.id_proof_type = Some(IdProofType::Aadhaar);
        sub.profile.id_proof_number = Some("1234-5678".into());
        sub.profile.quota.total_data = Some(100.0);
        sub.links.plan = Some(CorrelatedLink::resolved("FIBER-100", 77));
        sub.links.nas = Some(CorrelatedLink::local("NAS-UNSYNCED"));
        sub
    }

    fn salesperson() -> CorrelationEntry {
        let mut sp = CorrelationEntry::new(CorrelationKind::Salesperson, "SP-1", 501);
        sp.username = Some("sales.one".into());
        sp.parent_isp_external_id = Some(9);
        sp
    }

    #[test]
    fn test_create_payload_defaults_and_omissions() {
        let sub = sample_subscriber();
        let actor = Actor::new("clerk");
        let sp = salesperson();
        let ctx = PayloadContext {
            mode: PayloadMode::Create,
            salesperson: Some(&sp),
            default_isp_id: Some(1),
            default_branch_id: Some(3),
            actor: &actor,
        };

        let payload = build_subscriber_payload(&sub, &ctx);

        assert_eq!(payload["gender"], "Female");
        assert_eq!(payload["connection_status"], 1);
        assert_eq!(payload["profile_status"], 2);
        assert_eq!(payload["connection_type"], 1);
        assert_eq!(payload["sms_status"], 1);
        assert_eq!(payload["email_status"], 1);
        assert_eq!(payload["identity_type"], "Aadhaar Card");
        assert_eq!(payload["package_id"], 77);
        assert!(payload.get("nas_id").is_none(), "unresolved link must be omitted");
        assert_eq!(payload["isp_id"], 9, "salesperson ISP beats the default");
        assert_eq!(payload["branch_id"], 3);
        assert_eq!(payload["created_by_id"], 501);
        assert_eq!(payload["created_by_username"], "sales.one");
        assert!(payload.get("total_data_quota").is_none());
        assert!(payload.get("company").is_none());

        let installation: Value =
            serde_json::from_str(payload["installation_address"].as_str().unwrap()).unwrap();
        assert_eq!(installation["address"], "2 Tower Rd");
        assert_eq!(installation["city"], "Pune");
        assert_eq!(installation["zip"], "411001");
    }

    #[test]
    fn test_update_payload_keeps_quota_and_skips_provenance() {
        let mut sub = sample_subscriber();
        sub.profile.flags = FeatureFlags {
            sms: Some(false),
            ..FeatureFlags::default()
        };
        let actor = Actor::new("clerk");
        let ctx = PayloadContext {
            mode: PayloadMode::Update,
            salesperson: None,
            default_isp_id: Some(1),
            default_branch_id: None,
            actor: &actor,
        };

        let payload = build_subscriber_payload(&sub, &ctx);

        assert_eq!(payload["total_data_quota"], 100.0);
        assert_eq!(payload["sms_status"], 0);
        assert_eq!(payload["email_status"], 0);
        assert!(payload.get("profile_status").is_none());
        assert!(payload.get("created_by_id").is_none());
        assert_eq!(payload["isp_id"], 1);
        assert!(payload.get("branch_id").is_none());
    }

    #[test]
    fn test_password_reset_body_skips_blank() {
        let secrets = SecretInput {
            portal_password: Some(Secret::new("  ")),
            connection_password: None,
        };
        assert!(password_reset_body("alice", &secrets).is_none());

        let secrets = SecretInput {
            portal_password: Some(Secret::new("portal-1")),
            connection_password: Some(Secret::new("")),
        };
        let body = password_reset_body("alice", &secrets).unwrap();
        assert_eq!(body, json!({"username": "alice", "portal_password": "portal-1"}));
    }

    #[test]
    fn test_create_secrets_use_temporary_portal_secret() {
        let payload = with_create_secrets(json!({}), "TEMP-abc", &SecretInput::new("real", "conn"));
        assert_eq!(payload["password"], "TEMP-abc");
        assert_eq!(payload["connection_password"], "conn");
    }

    #[test]
    fn test_clean_datetime_variants() {
        let expected = NaiveDate::from_ymd_opt(2025, 9, 23)
            .unwrap()
            .and_hms_opt(3, 39, 11)
            .unwrap();
        assert_eq!(clean_datetime("2025-09-23T03:39:11.000Z"), Some(expected));
        assert_eq!(clean_datetime("2025-09-23 03:39:11"), Some(expected));
        assert_eq!(
            clean_datetime("2025-09-23"),
            NaiveDate::from_ymd_opt(2025, 9, 23).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(clean_datetime("not a date"), None);
        assert_eq!(
            clean_date("1990-05-01T00:00:00.000Z"),
            NaiveDate::from_ymd_opt(1990, 5, 1)
        );
    }

    #[test]
    fn test_radius_datetime_treats_naive_as_utc() {
        let utc: Tz = "UTC".parse().unwrap();
        assert_eq!(
            format_radius_datetime("2025-01-05 10:00:00", utc).as_deref(),
            Some("05 Jan 2025 10:00:00")
        );
    }

    #[test]
    fn test_installation_address_representations() {
        let from_obj = parse_installation_address(Some(&json!({"address": "A", "city": "B", "zip": "C"})));
        assert_eq!(from_obj, Some(Address::new("A", "B", "C")));

        let encoded = json!(r#"{"address":"A","city":"B","zip":"C"}"#);
        assert_eq!(parse_installation_address(Some(&encoded)), Some(Address::new("A", "B", "C")));

        let raw = json!("Behind the water tank");
        assert_eq!(
            parse_installation_address(Some(&raw)).unwrap().line.as_deref(),
            Some("Behind the water tank")
        );

        assert_eq!(parse_installation_address(Some(&Value::Null)), None);
    }

    #[test]
    fn test_list_page_shapes() {
        let wrapped = json!({"data": [{"id": 1, "username": "a"}], "pagination": {"hasMore": true}});
        let page = parse_list_page(&wrapped);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.has_more, Some(true));

        let bare = json!([{"id": "2", "username": "b"}, {"username": "no-id"}]);
        let page = parse_list_page(&bare);
        assert_eq!(page.has_more, None);
        let rows: Vec<_> = page.rows.iter().filter_map(parse_list_row).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].external_id, 2);
    }

    #[test]
    fn test_apply_remote_detail_maps_codes_and_links() {
        let mut sub = sample_subscriber();
        sub.links.isp = Some(CorrelatedLink::resolved("ISP-1", 9));
        let detail = json!({
            "data": {
                "id": 42,
                "username": "alice",
                "fullname": "Alice Remote",
                "connection_status": "1",
                "profile_status": 3,
                "connection_type": "2",
                "discount_type": 99,
                "identity_type": "1",
                "installation_address": "{\"address\":\"X\",\"city\":\"Y\",\"zip\":\"Z\"}",
                "sms_status": "1",
                "self_activation_status": 1,
                "package_id": 77,
                "nas_id": 5,
                "created_at": "2025-09-23T03:39:11.000Z"
            }
        });
        let mut links = HashMap::new();
        links.insert(CorrelationKind::Plan, CorrelatedLink::resolved("FIBER-100", 77));

        let unknown = apply_remote_detail(&mut sub, &detail, &links);

        assert_eq!(sub.full_name, "Alice Remote");
        assert_eq!(sub.profile.profile_status, Some(ProfileStatus::Disable));
        assert_eq!(sub.profile.connection_type, Some(ConnectionType::Hotspot));
        assert_eq!(sub.profile.discount_type, None);
        assert_eq!(unknown, vec![("discount_type", "99".to_string())]);
        assert_eq!(sub.profile.id_proof_type, Some(IdProofType::Aadhaar));
        assert_eq!(sub.profile.installation, Address::new("X", "Y", "Z"));
        assert_eq!(sub.profile.flags.sms, Some(true));
        assert!(sub.profile.flags.portal_login);
        assert_eq!(sub.links.external_id(CorrelationKind::Plan), Some(77));
        assert!(sub.links.nas.is_none(), "unresolvable NAS is cleared");
        assert_eq!(sub.links.external_id(CorrelationKind::Isp), Some(9));
        assert!(sub.remote_created_at.is_some());
        assert_eq!(detail_link_ids(&detail).len(), 2);
    }

    #[test]
    fn test_create_response_id_in_either_envelope() {
        let bare = parse_create_response(&json!({"id": 10, "username": "alice1"})).unwrap();
        assert_eq!(bare.external_id, 10);
        assert_eq!(bare.username.as_deref(), Some("alice1"));

        let wrapped = parse_create_response(&json!({"data": {"id": "11"}})).unwrap();
        assert_eq!(wrapped.external_id, 11);

        assert!(parse_create_response(&json!({"ok": true})).is_err());
    }

    #[test]
    fn test_upload_fields_omit_empty_values() {
        let owner = UploadOwner {
            subscriber_id: 42,
            subscriber_username: "alice".into(),
            ..UploadOwner::default()
        };
        let now = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let fields = upload_form_fields("id-front", &owner, now);
        let keys: Vec<_> = fields.iter().map(|(k, _)| *k).collect();

        assert!(keys.contains(&"owner_type"));
        assert!(!keys.contains(&"isp_id"));
        assert!(!keys.contains(&"uploaded_by_username"));
        assert!(fields.contains(&("verification_status", "0".to_string())));
    }

    #[test]
    fn test_remote_document_keeps_previous_upload_time() {
        let earlier = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let now = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut row = DocumentAttachment::pending("r1", "/tmp/a.pdf");
        row.uploaded_at = Some(earlier);
        row.last_upload_error = Some("timeout".into());

        let remote = RemoteDocument {
            id: 1,
            file_name: Some("a.pdf".into()),
            note: None,
            file_link: Some("/files/a.pdf".into()),
            verification_status: Some("1".into()),
            created_at: None,
        };
        apply_remote_document(&mut row, &remote, now);

        assert_eq!(row.uploaded_at, Some(earlier));
        assert!(row.uploaded);
        assert!(row.last_upload_error.is_none());
    }
}
