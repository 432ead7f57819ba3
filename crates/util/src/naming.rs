//! Naming conventions for runbook identifiers.
//!
//! Runbooks are addressed as `product/kebab-case-name`, where the name is
//! derived from the tree's PascalCase type name.

use heck::ToKebabCase;

/// Converts a PascalCase or camelCase identifier into kebab-case.
///
/// Consecutive capitals are treated as one word, and input that is already
/// kebab-case is returned unchanged.
///
/// ```rust
/// use gcpdiag_util::camel_to_kebab;
///
/// assert_eq!(camel_to_kebab("PascalCase"), "pascal-case");
/// assert_eq!(camel_to_kebab("pascal-case"), "pascal-case");
/// assert_eq!(camel_to_kebab("VmSSHConnectivity"), "vm-ssh-connectivity");
/// ```
pub fn camel_to_kebab(name: &str) -> String {
    name.trim().to_kebab_case()
}

/// Normalizes a runbook identifier by kebab-casing each `/`-separated segment.
///
/// ```rust
/// use gcpdiag_util::normalize_runbook_id;
///
/// assert_eq!(normalize_runbook_id("gce/VmRunningState"), "gce/vm-running-state");
/// assert_eq!(normalize_runbook_id("gce/vm-running-state"), "gce/vm-running-state");
/// ```
pub fn normalize_runbook_id(id: &str) -> String {
    id.trim()
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.trim().is_empty())
        .map(camel_to_kebab)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_consecutive_capitals() {
        assert_eq!(camel_to_kebab("HTTPLoadBalancer"), "http-load-balancer");
        assert_eq!(camel_to_kebab("GkeIPMasqStandard"), "gke-ip-masq-standard");
    }

    #[test]
    fn normalization_is_idempotent() {
        for id in ["gce/VmRunningState", "lb/SslCertificates", "gke/node_auto_repair", "dataproc/ClusterCreation"] {
            let once = normalize_runbook_id(id);
            assert_eq!(normalize_runbook_id(&once), once, "not idempotent for {id}");
        }
    }

    #[test]
    fn normalization_trims_separators_and_snake_case() {
        assert_eq!(normalize_runbook_id(" /GCE/vm_running_state/ "), "gce/vm-running-state");
    }
}
