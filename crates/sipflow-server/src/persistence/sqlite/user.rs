use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{begin, classify, decode_time, encode_time, finish, parse_uuid, Tx};
use crate::models::User;
use crate::persistence::filter::{Filter, SortableField, SortableFields};
use crate::persistence::{Page, PersistenceError, Result, UserFilter};

const SELECT: &str = "SELECT users.id, users.uuid, users.email, users.name, users.oidc_iss, \
                      users.oidc_sub, users.created_at FROM users";

const SORTABLE: SortableFields = &[
    ("id", SortableField::default_column("users.id")),
    ("email", SortableField::column("users.email")),
    ("name", SortableField::column("users.name")),
    ("created_at", SortableField::column("users.created_at")),
];

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    email: Option<String>,
    name: Option<String>,
    oidc_iss: Option<String>,
    oidc_sub: Option<String>,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            email: self.email,
            name: self.name,
            oidc_iss: self.oidc_iss,
            oidc_sub: self.oidc_sub,
            created_at: decode_time(&self.created_at)?,
        })
    }
}

/// Uploader columns joined onto SIP and batch rows.
pub(super) struct JoinedUser {
    pub id: Option<i64>,
    pub uuid: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub oidc_iss: Option<String>,
    pub oidc_sub: Option<String>,
    pub created_at: Option<String>,
}

impl JoinedUser {
    pub fn into_user(self) -> Result<Option<User>> {
        let (Some(id), Some(uuid), Some(created_at)) = (self.id, self.uuid, self.created_at) else {
            return Ok(None);
        };
        UserRow {
            id,
            uuid,
            email: self.email,
            name: self.name,
            oidc_iss: self.oidc_iss,
            oidc_sub: self.oidc_sub,
            created_at,
        }
        .into_user()
        .map(Some)
    }
}

pub(super) async fn create(pool: &SqlitePool, now: DateTime<Utc>, user: User) -> Result<User> {
    const CONTEXT: &str = "create user";
    if user.uuid.is_nil() {
        return Err(PersistenceError::required_field("UUID"));
    }
    let mut tx = begin(pool, CONTEXT).await?;
    let result = insert(&mut tx, now, user).await;
    finish(tx, result, CONTEXT).await
}

pub(super) async fn read(pool: &SqlitePool, uuid: Uuid) -> Result<User> {
    if uuid.is_nil() {
        return Err(PersistenceError::required_field("UUID"));
    }
    sqlx::query_as::<_, UserRow>(&format!("{SELECT} WHERE users.uuid = ?"))
        .bind(uuid.to_string())
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, "read user"))?
        .into_user()
}

pub(super) async fn read_oidc(pool: &SqlitePool, iss: &str, sub: &str) -> Result<User> {
    if iss.is_empty() {
        return Err(PersistenceError::required_field("OIDCIss"));
    }
    if sub.is_empty() {
        return Err(PersistenceError::required_field("OIDCSub"));
    }
    sqlx::query_as::<_, UserRow>(&format!(
        "{SELECT} WHERE users.oidc_iss = ? AND users.oidc_sub = ?"
    ))
    .bind(iss)
    .bind(sub)
    .fetch_one(pool)
    .await
    .map_err(|e| classify(e, "read OIDC user"))?
    .into_user()
}

pub(super) async fn list(pool: &SqlitePool, filter: &UserFilter) -> Result<(Vec<User>, Page)> {
    const CONTEXT: &str = "list users";

    let mut f = Filter::new(SORTABLE);
    f.contains("users.email", filter.email.as_deref())
        .contains("users.name", filter.name.as_deref())
        .order_by(&filter.sort)
        .page(filter.limit, filter.offset);

    let (mut page, mut whole) = f.apply(SELECT);
    let rows: Vec<UserRow> = page
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| classify(e, CONTEXT))?;
    let total: i64 = whole
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, CONTEXT))?;

    let users = rows
        .into_iter()
        .map(UserRow::into_user)
        .collect::<Result<Vec<_>>>()?;

    Ok((
        users,
        Page {
            limit: f.limit(),
            offset: f.offset(),
            total,
        },
    ))
}

/// Resolve `user` by OIDC identity, then by UUID, inserting it when neither
/// matches. Runs inside the caller's transaction.
pub(super) async fn find_or_create(tx: &mut Tx<'_>, now: DateTime<Utc>, user: User) -> Result<User> {
    const CONTEXT: &str = "find or create user";

    if let Some((iss, sub)) = user.oidc_identity() {
        let found = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT} WHERE users.oidc_iss = ? AND users.oidc_sub = ?"
        ))
        .bind(iss.to_string())
        .bind(sub.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| classify(e, CONTEXT))?;
        if let Some(row) = found {
            return row.into_user();
        }
    } else if !user.uuid.is_nil() {
        let found = sqlx::query_as::<_, UserRow>(&format!("{SELECT} WHERE users.uuid = ?"))
            .bind(user.uuid.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| classify(e, CONTEXT))?;
        if let Some(row) = found {
            return row.into_user();
        }
    }

    if user.uuid.is_nil() {
        return Err(PersistenceError::required_field("Uploader.UUID"));
    }
    insert(tx, now, user).await
}

async fn insert(tx: &mut Tx<'_>, now: DateTime<Utc>, mut user: User) -> Result<User> {
    user.created_at = now;
    user.id = sqlx::query_scalar(
        "INSERT INTO users (uuid, email, name, oidc_iss, oidc_sub, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user.uuid.to_string())
    .bind(user.email.clone())
    .bind(user.name.clone())
    .bind(user.oidc_iss.clone())
    .bind(user.oidc_sub.clone())
    .bind(encode_time(&user.created_at))
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify(e, "create user"))?;
    Ok(user)
}
