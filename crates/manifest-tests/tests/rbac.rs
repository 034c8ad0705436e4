use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding, Subject};
use manifest_tests::{load, load_documents};
use serde_yaml::Value;
use onedemo_operator::rbac;

#[test]
fn manager_role_matches_code() -> Result<()> {
    let role: ClusterRole = load("rbac/role.yaml")?;
    assert_eq!(role.metadata.name.as_deref(), Some(rbac::MANAGER_ROLE));
    assert_eq!(role.rules.unwrap_or_default(), rbac::manager_rules());
    Ok(())
}

#[test]
fn leader_election_role_matches_code() -> Result<()> {
    let role: Role = load("rbac/leader_election_role.yaml")?;
    assert_eq!(role.metadata.name.as_deref(), Some(rbac::LEADER_ELECTION_ROLE));
    let rules = role.rules.unwrap_or_default();
    assert_eq!(rules, rbac::leader_election_rules());
    for verb in ["get", "create", "update"] {
        assert!(rbac::allows(&rules, "coordination.k8s.io", "leases", verb), "leases {verb}");
    }
    Ok(())
}

fn service_account_subject(subjects: Option<Vec<Subject>>) -> Option<(String, Option<String>)> {
    subjects?.into_iter().find(|s| s.kind == "ServiceAccount").map(|s| (s.name, s.namespace))
}

#[test]
fn roles_are_bound_to_the_manager_service_account() -> Result<()> {
    let sa: ServiceAccount = load("rbac/service_account.yaml")?;
    let sa_ref = (sa.metadata.name.clone().unwrap_or_default(), sa.metadata.namespace.clone());

    let cluster: ClusterRoleBinding = load("rbac/role_binding.yaml")?;
    assert_eq!((cluster.role_ref.kind.as_str(), cluster.role_ref.name.as_str()), ("ClusterRole", rbac::MANAGER_ROLE));
    assert_eq!(service_account_subject(cluster.subjects), Some(sa_ref.clone()));

    let leader: RoleBinding = load("rbac/leader_election_role_binding.yaml")?;
    assert_eq!((leader.role_ref.kind.as_str(), leader.role_ref.name.as_str()), ("Role", rbac::LEADER_ELECTION_ROLE));
    assert_eq!(leader.metadata.namespace, sa.metadata.namespace);
    assert_eq!(service_account_subject(leader.subjects), Some(sa_ref));

    let deployment: Value = load_documents::<Value>("manager/manager.yaml")?
        .into_iter()
        .find(|d| d["kind"] == "Deployment")
        .context("no Deployment")?;
    assert_eq!(deployment["spec"]["template"]["spec"]["serviceAccountName"].as_str(), sa.metadata.name.as_deref());
    Ok(())
}
