use isvc_models::{IntegratedServiceStatus, Spec};
use isvc_storage::memory::MemoryIntegratedServiceRepository;
use isvc_storage::{IntegratedServiceReader, IntegratedServiceRepository};
use serde_json::json;

fn spec(version: &str) -> Spec {
    let mut spec = Spec::new();
    spec.insert("version".into(), json!(version));
    spec
}

#[tokio::test]
async fn get_missing_record_is_not_found() {
    let repo = MemoryIntegratedServiceRepository::new();
    let err = repo.get(1, "dns").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn save_update_and_delete_lifecycle() {
    let repo = MemoryIntegratedServiceRepository::new();
    repo.save(1, "dns", spec("1.0.0"), IntegratedServiceStatus::Pending)
        .await
        .unwrap();

    let stored = repo.get(1, "dns").await.unwrap();
    assert_eq!(stored.name, "dns");
    assert_eq!(stored.status, IntegratedServiceStatus::Pending);
    assert_eq!(stored.spec["version"], "1.0.0");

    repo.update_spec(1, "dns", spec("2.0.0")).await.unwrap();
    repo.update_status(1, "dns", IntegratedServiceStatus::Active)
        .await
        .unwrap();
    let stored = repo.get(1, "dns").await.unwrap();
    assert_eq!(stored.spec["version"], "2.0.0");
    assert_eq!(stored.status, IntegratedServiceStatus::Active);

    repo.delete(1, "dns").await.unwrap();
    assert!(repo.get(1, "dns").await.unwrap_err().is_not_found());
    // deleting twice is fine
    repo.delete(1, "dns").await.unwrap();
}

#[tokio::test]
async fn updates_on_missing_record_fail_with_not_found() {
    let repo = MemoryIntegratedServiceRepository::new();
    assert!(
        repo.update_status(7, "backup", IntegratedServiceStatus::Error)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        repo.update_spec(7, "backup", Spec::new())
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn list_is_scoped_to_cluster() {
    let repo = MemoryIntegratedServiceRepository::new();
    repo.save(1, "vault", Spec::new(), IntegratedServiceStatus::Active)
        .await
        .unwrap();
    repo.save(1, "dns", Spec::new(), IntegratedServiceStatus::Pending)
        .await
        .unwrap();
    repo.save(2, "backup", Spec::new(), IntegratedServiceStatus::Active)
        .await
        .unwrap();

    let names: Vec<String> =
        repo.list(1).await.unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["dns".to_string(), "vault".to_string()]);
    assert!(repo.list(3).await.unwrap().is_empty());
}
