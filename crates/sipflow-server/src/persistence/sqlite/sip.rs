use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::user::{self, JoinedUser};
use super::{
    begin, classify, decode_time, encode_time, finish, opt_time, opt_uuid, parse_enum,
    parse_opt_time, parse_opt_uuid, parse_uuid, updater_error, validate_name,
    validate_started_completed, Tx,
};
use crate::models::Sip;
use crate::persistence::filter::{Filter, SortableField, SortableFields};
use crate::persistence::{Page, PersistenceError, Result, SipFilter, Updater};

const SELECT: &str = "SELECT sips.id, sips.uuid, sips.name, sips.aip_id, sips.location_id, \
     sips.status, sips.created_at, sips.started_at, sips.completed_at, sips.failed_as, \
     sips.failed_key, users.id AS uploader_id, users.uuid AS uploader_uuid, \
     users.email AS uploader_email, users.name AS uploader_name, \
     users.oidc_iss AS uploader_oidc_iss, users.oidc_sub AS uploader_oidc_sub, \
     users.created_at AS uploader_created_at \
     FROM sips LEFT JOIN users ON users.id = sips.uploader_id";

const SORTABLE: SortableFields = &[
    ("id", SortableField::default_column("sips.id")),
    ("name", SortableField::column("sips.name")),
    ("status", SortableField::column("sips.status")),
    ("created_at", SortableField::column("sips.created_at")),
    ("started_at", SortableField::column("sips.started_at")),
    ("completed_at", SortableField::column("sips.completed_at")),
];

#[derive(sqlx::FromRow)]
struct SipRow {
    id: i64,
    uuid: String,
    name: String,
    aip_id: Option<String>,
    location_id: Option<String>,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    failed_as: Option<String>,
    failed_key: Option<String>,
    uploader_id: Option<i64>,
    uploader_uuid: Option<String>,
    uploader_email: Option<String>,
    uploader_name: Option<String>,
    uploader_oidc_iss: Option<String>,
    uploader_oidc_sub: Option<String>,
    uploader_created_at: Option<String>,
}

impl SipRow {
    fn into_sip(self) -> Result<Sip> {
        let uploader = JoinedUser {
            id: self.uploader_id,
            uuid: self.uploader_uuid,
            email: self.uploader_email,
            name: self.uploader_name,
            oidc_iss: self.uploader_oidc_iss,
            oidc_sub: self.uploader_oidc_sub,
            created_at: self.uploader_created_at,
        }
        .into_user()?;

        Ok(Sip {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            name: self.name,
            aip_id: parse_opt_uuid(self.aip_id)?,
            location_id: parse_opt_uuid(self.location_id)?,
            status: parse_enum(&self.status)?,
            created_at: decode_time(&self.created_at)?,
            started_at: parse_opt_time(self.started_at)?,
            completed_at: parse_opt_time(self.completed_at)?,
            failed_as: self.failed_as.as_deref().map(parse_enum).transpose()?,
            failed_key: self.failed_key,
            uploader,
        })
    }
}

pub(super) async fn create(pool: &SqlitePool, now: DateTime<Utc>, sip: Sip) -> Result<Sip> {
    const CONTEXT: &str = "create SIP";
    if sip.uuid.is_nil() {
        return Err(PersistenceError::required_field("UUID"));
    }
    if sip.name.is_empty() {
        return Err(PersistenceError::required_field("Name"));
    }
    validate_name(CONTEXT, &sip.name)?;

    let mut tx = begin(pool, CONTEXT).await?;
    let result = insert(&mut tx, now, sip).await;
    finish(tx, result, CONTEXT).await
}

async fn insert(tx: &mut Tx<'_>, now: DateTime<Utc>, mut sip: Sip) -> Result<Sip> {
    sip.uploader = match sip.uploader.take() {
        Some(uploader) => Some(user::find_or_create(tx, now, uploader).await?),
        None => None,
    };
    sip.created_at = now;
    sip.id = sqlx::query_scalar(
        "INSERT INTO sips (uuid, name, aip_id, location_id, status, created_at, started_at, \
         completed_at, failed_as, failed_key, uploader_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(sip.uuid.to_string())
    .bind(sip.name.clone())
    .bind(opt_uuid(&sip.aip_id))
    .bind(opt_uuid(&sip.location_id))
    .bind(sip.status.as_str())
    .bind(encode_time(&sip.created_at))
    .bind(opt_time(&sip.started_at))
    .bind(opt_time(&sip.completed_at))
    .bind(sip.failed_as.map(|f| f.as_str()))
    .bind(sip.failed_key.clone())
    .bind(sip.uploader.as_ref().map(|u| u.id))
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify(e, "create SIP"))?;
    Ok(sip)
}

pub(super) async fn update(pool: &SqlitePool, id: i64, updater: Updater<Sip>) -> Result<Sip> {
    const CONTEXT: &str = "update SIP";
    let mut tx = begin(pool, CONTEXT).await?;
    let result = update_in(&mut tx, id, updater).await;
    finish(tx, result, CONTEXT).await
}

async fn update_in(tx: &mut Tx<'_>, id: i64, updater: Updater<Sip>) -> Result<Sip> {
    const CONTEXT: &str = "update SIP";

    let current = sqlx::query_as::<_, SipRow>(&format!("{SELECT} WHERE sips.id = ?"))
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| classify(e, CONTEXT))?
        .into_sip()?;

    let updated = updater(current.clone()).map_err(|e| updater_error(CONTEXT, e))?;
    let next = merge(&current, updated)?;

    sqlx::query(
        "UPDATE sips SET name = ?, status = ?, aip_id = ?, started_at = ?, completed_at = ?, \
         failed_as = ?, failed_key = ? WHERE id = ?",
    )
    .bind(next.name.clone())
    .bind(next.status.as_str())
    .bind(opt_uuid(&next.aip_id))
    .bind(opt_time(&next.started_at))
    .bind(opt_time(&next.completed_at))
    .bind(next.failed_as.map(|f| f.as_str()))
    .bind(next.failed_key.clone())
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| classify(e, CONTEXT))?;

    Ok(next)
}

/// Copy the whitelisted fields of `updated` onto `current`.
fn merge(current: &Sip, updated: Sip) -> Result<Sip> {
    const CONTEXT: &str = "update SIP";

    validate_name(CONTEXT, &updated.name)?;
    if current.status.is_terminal() && updated.status != current.status {
        return Err(PersistenceError::not_valid(format!(
            "{CONTEXT}: cannot transition from terminal status {} to {}",
            current.status, updated.status
        )));
    }
    validate_started_completed(CONTEXT, updated.started_at, updated.completed_at)?;

    let mut next = current.clone();
    next.name = updated.name;
    next.status = updated.status;
    next.aip_id = updated.aip_id;
    next.started_at = updated.started_at;
    next.completed_at = updated.completed_at;
    if updated.failed_as.is_some() {
        next.failed_as = updated.failed_as;
    }
    if let Some(key) = updated.failed_key.filter(|k| !k.is_empty()) {
        next.failed_key = Some(key);
    }
    Ok(next)
}

pub(super) async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM sips WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| classify(e, "delete SIP"))?;
    if result.rows_affected() == 0 {
        return Err(PersistenceError::not_found("delete SIP: not found"));
    }
    Ok(())
}

pub(super) async fn read(pool: &SqlitePool, uuid: Uuid) -> Result<Sip> {
    sqlx::query_as::<_, SipRow>(&format!("{SELECT} WHERE sips.uuid = ?"))
        .bind(uuid.to_string())
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, "read SIP"))?
        .into_sip()
}

pub(super) async fn list(pool: &SqlitePool, filter: &SipFilter) -> Result<(Vec<Sip>, Page)> {
    const CONTEXT: &str = "list SIPs";

    let mut f = Filter::new(SORTABLE);
    f.contains("sips.name", filter.name.as_deref())
        .equals("sips.aip_id", filter.aip_id.as_ref())
        .equals("sips.location_id", filter.location_id.as_ref())
        .equals("sips.status", filter.status.as_ref())
        .add_date_range("sips.created_at", filter.created_at.as_ref())
        .equals("users.uuid", filter.uploader_id.as_ref())
        .order_by(&filter.sort)
        .page(filter.limit, filter.offset);

    let (mut page, mut whole) = f.apply(SELECT);
    let rows: Vec<SipRow> = page
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| classify(e, CONTEXT))?;
    let total: i64 = whole
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, CONTEXT))?;

    let sips = rows
        .into_iter()
        .map(SipRow::into_sip)
        .collect::<Result<Vec<_>>>()?;

    Ok((
        sips,
        Page {
            limit: f.limit(),
            offset: f.offset(),
            total,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailedAs, SipStatus};

    fn sip(status: SipStatus) -> Sip {
        Sip {
            id: 1,
            ..Sip::new(Uuid::from_u128(1), "sip.zip", status)
        }
    }

    #[test]
    fn test_merge_ignores_non_whitelisted_fields() {
        let current = sip(SipStatus::Processing);
        let mut updated = current.clone();
        updated.id = 99;
        updated.uuid = Uuid::from_u128(2);
        updated.created_at = Utc::now();
        updated.location_id = Some(Uuid::from_u128(3));
        updated.status = SipStatus::Pending;

        let next = merge(&current, updated).unwrap();
        assert_eq!(next.id, 1);
        assert_eq!(next.uuid, current.uuid);
        assert_eq!(next.created_at, current.created_at);
        assert_eq!(next.location_id, None);
        assert_eq!(next.status, SipStatus::Pending);
    }

    #[test]
    fn test_merge_rejects_terminal_transition() {
        let current = sip(SipStatus::Ingested);
        let mut updated = current.clone();
        updated.status = SipStatus::Processing;
        let err = merge(&current, updated).unwrap_err();
        assert_eq!(err.kind(), crate::persistence::ErrorKind::NotValid);

        assert!(merge(&current, current.clone()).is_ok());
    }

    #[test]
    fn test_merge_keeps_failed_key_when_cleared() {
        let mut current = sip(SipStatus::Processing);
        current.failed_as = Some(FailedAs::Sip);
        current.failed_key = Some("failed/sip.zip".into());

        let mut updated = current.clone();
        updated.failed_as = None;
        updated.failed_key = Some(String::new());

        let next = merge(&current, updated).unwrap();
        assert_eq!(next.failed_as, Some(FailedAs::Sip));
        assert_eq!(next.failed_key.as_deref(), Some("failed/sip.zip"));
    }

    #[test]
    fn test_merge_rejects_inverted_times() {
        let current = sip(SipStatus::Processing);
        let mut updated = current.clone();
        updated.started_at = Some(Utc::now());
        updated.completed_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(merge(&current, updated).is_err());
    }
}
