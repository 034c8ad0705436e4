//! Authorization the manager needs, as typed RBAC objects.
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, Role};
use kube::api::ObjectMeta;

use crate::api::v1::GROUP;

pub const MANAGER_ROLE: &str = "manager-role";
pub const LEADER_ELECTION_ROLE: &str = "leader-election-role";

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..PolicyRule::default()
    }
}

/// Access to `App` objects, their status and their finalizers.
pub fn manager_rules() -> Vec<PolicyRule> {
    vec![
        rule(GROUP, &["apps"], &["create", "delete", "get", "list", "patch", "update", "watch"]),
        rule(GROUP, &["apps/finalizers"], &["update"]),
        rule(GROUP, &["apps/status"], &["get", "patch", "update"]),
    ]
}

pub fn leader_election_rules() -> Vec<PolicyRule> {
    let all = ["get", "list", "watch", "create", "update", "patch", "delete"];
    vec![
        rule("", &["configmaps"], &all),
        rule("coordination.k8s.io", &["leases"], &all),
        rule("", &["events"], &["create", "patch"]),
    ]
}

pub fn cluster_role(name: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta { name: Some(name.to_string()), ..ObjectMeta::default() },
        rules: Some(manager_rules()),
        ..ClusterRole::default()
    }
}

pub fn leader_election_role(name: &str, namespace: Option<&str>) -> Role {
    Role {
        metadata: ObjectMeta { name: Some(name.to_string()), namespace: namespace.map(str::to_string), ..ObjectMeta::default() },
        rules: Some(leader_election_rules()),
    }
}

/// True when some rule grants `verb` on `group`/`resource`.
pub fn allows(rules: &[PolicyRule], group: &str, resource: &str, verb: &str) -> bool {
    rules.iter().any(|r| {
        let has = |list: &Option<Vec<String>>, want: &str| list.as_ref().is_some_and(|l| l.iter().any(|v| v == want || v == "*"));
        has(&r.api_groups, group) && has(&r.resources, resource) && r.verbs.iter().any(|v| v == verb || v == "*")
    })
}
