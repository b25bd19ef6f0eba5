//! Persistence integration tests against an in-memory SQLite database
//!
//! Coverage includes:
//! - Filtered and paged SIP listings
//! - Created-at date ranges
//! - Uploader linkage and reuse
//! - Update whitelists
//! - Workflows, tasks and batches

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use sipflow_server::models::{
    Batch, BatchStatus, FailedAs, Sip, SipStatus, Task, TaskStatus, User, Workflow,
    WorkflowStatus, WorkflowType,
};
use sipflow_server::persistence::{
    ErrorKind, Service, SipFilter, Sort, SqlitePersistence, UserFilter,
};
use sipflow_server::timerange::Range;

mod common;

async fn persistence() -> SqlitePersistence {
    SqlitePersistence::new(common::memory_pool().await)
}

fn uploader(sub: &str) -> User {
    User {
        uuid: Uuid::new_v4(),
        email: Some(format!("{sub}@example.com")),
        name: Some(sub.to_uppercase()),
        oidc_iss: Some("https://idp".into()),
        oidc_sub: Some(sub.into()),
        ..Default::default()
    }
}

// ============================================================================
// SIP listing
// ============================================================================

#[tokio::test]
async fn test_list_sips_pages_in_id_order() {
    let db = persistence().await;
    let mut created = Vec::new();
    for i in 1..=25 {
        let sip = db
            .create_sip(Sip::new(Uuid::new_v4(), format!("sip-{i:02}.zip"), SipStatus::Queued))
            .await
            .unwrap();
        created.push(sip);
    }

    let filter = SipFilter {
        limit: 10,
        offset: 10,
        ..Default::default()
    };
    let (items, page) = db.list_sips(&filter).await.unwrap();

    assert_eq!(page.total, 25);
    assert_eq!(page.limit, 10);
    assert_eq!(page.offset, 10);
    let names: Vec<_> = items.iter().map(|s| s.name.as_str()).collect();
    let expected: Vec<_> = created[10..20].iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_list_sips_filters_and_sort() {
    let db = persistence().await;
    let aip = Uuid::new_v4();

    db.create_sip(Sip::new(Uuid::new_v4(), "alpha.zip", SipStatus::Queued))
        .await
        .unwrap();
    let mut beta = Sip::new(Uuid::new_v4(), "beta.zip", SipStatus::Ingested);
    beta.aip_id = Some(aip);
    db.create_sip(beta).await.unwrap();
    db.create_sip(Sip::new(Uuid::new_v4(), "alphabet.tar", SipStatus::Processing))
        .await
        .unwrap();

    let (items, page) = db
        .list_sips(&SipFilter {
            name: Some("alpha".into()),
            sort: Sort::parse("-name"),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(items[0].name, "alphabet.tar");
    assert_eq!(items[1].name, "alpha.zip");

    let (items, _) = db
        .list_sips(&SipFilter {
            status: Some(SipStatus::Ingested),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].aip_id, Some(aip));

    let (items, _) = db
        .list_sips(&SipFilter {
            aip_id: Some(Uuid::new_v4()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_list_sips_created_at_range() {
    let created_at = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    let db = persistence().await.with_clock(move || created_at);
    db.create_sip(Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Queued))
        .await
        .unwrap();

    let august = Range::new(
        created_at,
        Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
    )
    .unwrap();
    let september = Range::new(
        Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap(),
    )
    .unwrap();

    let (items, _) = db
        .list_sips(&SipFilter {
            created_at: Some(august),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(items.len(), 1);

    let (items, page) = db
        .list_sips(&SipFilter {
            created_at: Some(september),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(page.total, 0);
}

// ============================================================================
// Uploaders
// ============================================================================

#[tokio::test]
async fn test_create_sip_reuses_oidc_uploader() {
    let db = persistence().await;

    let mut first = Sip::new(Uuid::new_v4(), "first.zip", SipStatus::Queued);
    first.uploader = Some(uploader("u1"));
    let first = db.create_sip(first).await.unwrap();

    let mut second = Sip::new(Uuid::new_v4(), "second.zip", SipStatus::Queued);
    second.uploader = Some(uploader("u1"));
    let second = db.create_sip(second).await.unwrap();

    let a = first.uploader.unwrap();
    let b = second.uploader.unwrap();
    assert_eq!(a.uuid, b.uuid);

    let (users, page) = db.list_users(&UserFilter::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(users[0].email.as_deref(), Some("u1@example.com"));

    let (sips, _) = db
        .list_sips(&SipFilter {
            uploader_id: Some(a.uuid),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sips.len(), 2);

    let found = db.read_oidc_user("https://idp", "u1").await.unwrap();
    assert_eq!(found.uuid, a.uuid);
}

#[tokio::test]
async fn test_list_users_filters() {
    let db = persistence().await;
    for sub in ["ana", "bob", "anabel"] {
        db.create_user(uploader(sub)).await.unwrap();
    }

    let (users, page) = db
        .list_users(&UserFilter {
            name: Some("ANA".into()),
            sort: Sort::parse("-email"),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(users[0].email.as_deref(), Some("anabel@example.com"));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn test_update_sip_copies_whitelisted_fields_only() {
    let db = persistence().await;
    let sip = db
        .create_sip(Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Queued))
        .await
        .unwrap();
    let started = Utc::now();

    let updated = db
        .update_sip(
            sip.id,
            Box::new(move |mut s: Sip| -> anyhow::Result<Sip> {
                s.status = SipStatus::Processing;
                s.started_at = Some(started);
                s.uuid = Uuid::new_v4();
                s.location_id = Some(Uuid::new_v4());
                Ok(s)
            }),
        )
        .await
        .unwrap();

    assert_eq!(updated.status, SipStatus::Processing);
    assert_eq!(updated.uuid, sip.uuid);
    assert_eq!(updated.location_id, None);

    let read = db.read_sip(sip.uuid).await.unwrap();
    assert_eq!(read, updated);
}

#[tokio::test]
async fn test_update_sip_keeps_failed_key() {
    let db = persistence().await;
    let sip = db
        .create_sip(Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Processing))
        .await
        .unwrap();

    db.update_sip(
        sip.id,
        Box::new(|mut s: Sip| -> anyhow::Result<Sip> {
            s.failed_as = Some(FailedAs::Pip);
            s.failed_key = Some("failed/pip.zip".into());
            Ok(s)
        }),
    )
    .await
    .unwrap();

    let updated = db
        .update_sip(
            sip.id,
            Box::new(|mut s: Sip| -> anyhow::Result<Sip> {
                s.failed_key = Some(String::new());
                s.status = SipStatus::Failed;
                Ok(s)
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated.failed_key.as_deref(), Some("failed/pip.zip"));
    assert_eq!(updated.failed_as, Some(FailedAs::Pip));
}

#[tokio::test]
async fn test_update_sip_rolls_back_on_updater_error() {
    let db = persistence().await;
    let sip = db
        .create_sip(Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Queued))
        .await
        .unwrap();

    let err = db
        .update_sip(
            sip.id,
            Box::new(|_: Sip| -> anyhow::Result<Sip> { anyhow::bail!("nope") }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotValid);

    let err = db
        .update_sip(
            9999,
            Box::new(|s: Sip| -> anyhow::Result<Sip> { Ok(s) }),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(db.read_sip(sip.uuid).await.unwrap().status, SipStatus::Queued);
}

#[tokio::test]
async fn test_create_sip_requires_fields() {
    let db = persistence().await;
    let err = db
        .create_sip(Sip::new(Uuid::nil(), "sip.zip", SipStatus::Queued))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let err = db
        .create_sip(Sip::new(Uuid::new_v4(), "", SipStatus::Queued))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(err.message(), "missing required field: Name");

    let err = db.read_sip(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Workflows and tasks
// ============================================================================

#[tokio::test]
async fn test_workflows_and_tasks() {
    let db = persistence().await;
    let sip = db
        .create_sip(Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Processing))
        .await
        .unwrap();

    let workflow = db
        .create_workflow(Workflow {
            uuid: Uuid::new_v4(),
            temporal_id: "processing-workflow-1".into(),
            workflow_type: WorkflowType::CreateAip,
            status: WorkflowStatus::InProgress,
            started_at: Some(Utc::now()),
            sip_uuid: sip.uuid,
            ..Default::default()
        })
        .await
        .unwrap();

    let tasks: Vec<Task> = (0..3)
        .map(|i| Task {
            uuid: Uuid::new_v4(),
            name: format!("task {i}"),
            status: TaskStatus::InProgress,
            workflow_uuid: workflow.uuid,
            ..Default::default()
        })
        .collect();
    let created = db.create_tasks(tasks).await.unwrap();
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|t| t.workflow_id == workflow.id && t.id > 0));

    let done = db
        .update_task(
            created[0].id,
            Box::new(|mut t: Task| -> anyhow::Result<Task> {
                t.status = TaskStatus::Done;
                t.note = "ok".into();
                t.workflow_id = 999;
                Ok(t)
            }),
        )
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.note, "ok");
    assert_eq!(done.workflow_id, workflow.id);

    let updated = db
        .update_workflow(
            workflow.id,
            Box::new(|mut w: Workflow| -> anyhow::Result<Workflow> {
                w.status = WorkflowStatus::Unspecified;
                w.completed_at = Some(Utc::now());
                Ok(w)
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, WorkflowStatus::InProgress);
    assert!(updated.completed_at.is_some());

    let workflows = db.list_workflows(sip.uuid).await.unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(db.list_tasks(workflow.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_create_tasks_rejects_unknown_workflow() {
    let db = persistence().await;
    let err = db
        .create_tasks(vec![Task {
            uuid: Uuid::new_v4(),
            name: "orphan".into(),
            workflow_uuid: Uuid::new_v4(),
            ..Default::default()
        }])
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = db
        .create_workflow(Workflow {
            uuid: Uuid::new_v4(),
            temporal_id: "wf".into(),
            sip_uuid: Uuid::new_v4(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_deleting_sip_cascades() {
    let db = persistence().await;
    let sip = db
        .create_sip(Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Queued))
        .await
        .unwrap();
    db.create_workflow(Workflow {
        uuid: Uuid::new_v4(),
        temporal_id: "wf".into(),
        sip_uuid: sip.uuid,
        ..Default::default()
    })
    .await
    .unwrap();

    db.delete_sip(sip.id).await.unwrap();
    assert!(db.read_sip(sip.uuid).await.unwrap_err().is_not_found());
    assert!(db.list_workflows(sip.uuid).await.unwrap().is_empty());
    assert!(db.delete_sip(sip.id).await.unwrap_err().is_not_found());
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test]
async fn test_batches() {
    let db = persistence().await;

    let batch = db
        .create_batch(Batch {
            uuid: Uuid::new_v4(),
            identifier: "batch-1".into(),
            status: BatchStatus::default(),
            sips_count: 2,
            uploader: Some(uploader("u2")),
            ..Default::default()
        })
        .await
        .unwrap();

    let read = db.read_batch(batch.uuid).await.unwrap();
    assert_eq!(read.identifier, "batch-1");
    assert_eq!(read.sips_count, 2);
    assert_eq!(
        read.uploader.as_ref().and_then(|u| u.oidc_sub.as_deref()),
        Some("u2")
    );

    db.delete_batch(batch.id).await.unwrap();
    assert!(db.read_batch(batch.uuid).await.unwrap_err().is_not_found());
}
