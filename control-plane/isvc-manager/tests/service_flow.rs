mod common;

use common::{eventually, spec};
use envconfig::Envconfig;
use isvc_manager::config::AppConfig;
use isvc_manager::errors::IntegratedServiceError;
use isvc_manager::{IntegratedServices, Service, build_from_config};
use isvc_models::{IntegratedServiceStatus, Spec};
use isvc_storage::IntegratedServiceReader;
use serde_json::json;
use std::collections::HashMap;

fn config(dispatcher: &str) -> AppConfig {
    let vars: HashMap<String, String> = [
        ("ISVC_DISPATCHER", dispatcher),
        ("ISVC_CLUSTER_BACKEND", "memory"),
        ("ISVC_LEGACY_SERVICES", "logging"),
        ("ISVC_V2_SERVICES", "dns,vault"),
        ("ISVC_POLL_INTERVAL_SECS", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    AppConfig::init_from_hashmap(&vars).unwrap()
}

async fn wait_for_status(
    stack: &IntegratedServices,
    cluster_id: u32,
    service: &str,
    status: IntegratedServiceStatus,
) {
    eventually(&format!("{service} to become {status}"), move || async move {
        stack.router.details(cluster_id, service).await.unwrap().status == status
    })
    .await;
}

#[test_log::test(tokio::test)]
async fn v2_service_lifecycle() {
    let stack = build_from_config(&config("workflow")).await.unwrap();

    let listed = stack.router.list(1).await.unwrap();
    let names: Vec<_> = listed.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["dns", "vault"]);
    assert!(listed.iter().all(|s| s.is_inactive()));

    stack
        .router
        .activate(1, "dns", spec(json!({ "zone": "example.org" })))
        .await
        .unwrap();
    wait_for_status(&stack, 1, "dns", IntegratedServiceStatus::Active).await;

    let details = stack.router.details(1, "dns").await.unwrap();
    assert_eq!(details.spec.get("zone"), Some(&json!("example.org")));
    assert_eq!(details.output.get("version"), Some(&json!("1.0.0")));

    let err = stack.router.activate(1, "dns", Spec::new()).await.unwrap_err();
    assert!(matches!(err, IntegratedServiceError::AlreadyActive(_)));

    stack
        .router
        .update(1, "dns", spec(json!({ "zone": "example.net", "version": "1.0.0" })))
        .await
        .unwrap();
    let router = &stack.router;
    eventually("dns update to land", move || async move {
        let details = router.details(1, "dns").await.unwrap();
        details.status == IntegratedServiceStatus::Active
            && details.spec.get("zone") == Some(&json!("example.net"))
    })
    .await;

    stack.router.deactivate(1, "dns").await.unwrap();
    wait_for_status(&stack, 1, "dns", IntegratedServiceStatus::Inactive).await;

    // the legacy engine never saw it
    assert!(stack.legacy_repository.list(1).await.unwrap().is_empty());
    stack.shutdown();
}

#[test_log::test(tokio::test)]
async fn legacy_only_service_falls_back_to_the_legacy_engine() {
    let stack = build_from_config(&config("workflow")).await.unwrap();

    stack.router.activate(2, "logging", Spec::new()).await.unwrap();
    wait_for_status(&stack, 2, "logging", IntegratedServiceStatus::Active).await;
    assert_eq!(
        stack.legacy_repository.get(2, "logging").await.unwrap().status,
        IntegratedServiceStatus::Active
    );

    let names: Vec<_> = stack
        .router
        .list(2)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["logging", "dns", "vault"]);

    stack.router.deactivate(2, "logging").await.unwrap();
    let repository = &stack.legacy_repository;
    eventually("legacy record to be removed", move || async move {
        repository
            .get(2, "logging")
            .await
            .is_err_and(|e| e.is_not_found())
    })
    .await;
    assert!(stack.router.details(2, "logging").await.unwrap().is_inactive());
    stack.shutdown();
}

#[test_log::test(tokio::test)]
async fn requests_are_rejected_before_dispatch() {
    let stack = build_from_config(&config("workflow")).await.unwrap();

    let err = stack
        .router
        .activate(1, "vault", spec(json!({ "version": "latest" })))
        .await
        .unwrap_err();
    assert!(matches!(err, IntegratedServiceError::InvalidSpec { .. }));

    let err = stack.router.activate(1, "mystery", Spec::new()).await.unwrap_err();
    assert!(err.is_unknown_service());

    let err = stack.router.deactivate(1, "vault").await.unwrap_err();
    assert!(err.is_not_found());

    assert!(stack.router.details(1, "vault").await.unwrap().is_inactive());
    stack.shutdown();
}

#[test_log::test(tokio::test)]
async fn local_dispatcher_drives_both_engines() {
    let stack = build_from_config(&config("local")).await.unwrap();

    stack.router.activate(3, "vault", Spec::new()).await.unwrap();
    stack.router.activate(3, "logging", Spec::new()).await.unwrap();
    wait_for_status(&stack, 3, "vault", IntegratedServiceStatus::Active).await;
    wait_for_status(&stack, 3, "logging", IntegratedServiceStatus::Active).await;

    stack.router.deactivate(3, "vault").await.unwrap();
    wait_for_status(&stack, 3, "vault", IntegratedServiceStatus::Inactive).await;
    stack.shutdown();
}

#[test_log::test(tokio::test)]
async fn cleanup_disables_every_instance_on_the_cluster() {
    let stack = build_from_config(&config("workflow")).await.unwrap();

    for service in ["dns", "vault"] {
        stack.router.activate(4, service, Spec::new()).await.unwrap();
        wait_for_status(&stack, 4, service, IntegratedServiceStatus::Active).await;
    }

    stack.cleaner.disable_service_instances(4).await.unwrap();

    for service in ["dns", "vault"] {
        assert!(stack.router.details(4, service).await.unwrap().is_inactive());
    }
    stack.shutdown();
}
