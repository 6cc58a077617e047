//! Role-to-host assignment

/// Logical host category used to filter which hosts a task targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Primary database host
    Database,

    /// Application server
    Application,

    /// Web frontend
    Web,
}

/// Which role a task fans out to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFilter {
    /// Every host assigned to any role
    All,

    /// Only hosts assigned to one role
    Only(Role),
}

/// Mapping from roles to ordered, deduplicated host sets
#[derive(Debug, Clone)]
pub struct RoleMap {
    database: Vec<String>,
    application: Vec<String>,
    web: Vec<String>,
}

impl RoleMap {
    /// Build a single-tier role map: one webserver pool fulfills every role
    pub fn build(hosts: &[String]) -> Self {
        let mut pool: Vec<String> = Vec::with_capacity(hosts.len());
        for host in hosts {
            if !pool.contains(host) {
                pool.push(host.clone());
            }
        }

        Self {
            database: pool.clone(),
            application: pool.clone(),
            web: pool,
        }
    }

    /// Hosts assigned to a role, in the order they were supplied.
    /// An empty slice means "skip this task for this run", never an error.
    pub fn hosts_for(&self, role: Role) -> &[String] {
        match role {
            Role::Database => &self.database,
            Role::Application => &self.application,
            Role::Web => &self.web,
        }
    }

    /// Hosts matching a task's role filter, deduplicated across roles
    pub fn hosts_for_filter(&self, filter: RoleFilter) -> Vec<String> {
        match filter {
            RoleFilter::Only(role) => self.hosts_for(role).to_vec(),
            RoleFilter::All => {
                let mut merged: Vec<String> = Vec::new();
                for role in [Role::Database, Role::Application, Role::Web] {
                    for host in self.hosts_for(role) {
                        if !merged.contains(host) {
                            merged.push(host.clone());
                        }
                    }
                }
                merged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_roles_share_the_pool() {
        let map = RoleMap::build(&hosts(&["h1", "h2"]));
        for role in [Role::Database, Role::Application, Role::Web] {
            assert_eq!(map.hosts_for(role), hosts(&["h1", "h2"]).as_slice());
        }
    }

    #[test]
    fn test_build_deduplicates_preserving_order() {
        let map = RoleMap::build(&hosts(&["h2", "h1", "h2", "h1"]));
        assert_eq!(map.hosts_for(Role::Web), hosts(&["h2", "h1"]).as_slice());
    }

    #[test]
    fn test_empty_pool_is_not_an_error() {
        let map = RoleMap::build(&[]);
        assert!(map.hosts_for(Role::Database).is_empty());
        assert!(map.hosts_for_filter(RoleFilter::All).is_empty());
    }

    #[test]
    fn test_filter_all_deduplicates_across_roles() {
        let map = RoleMap::build(&hosts(&["h1", "h2"]));
        assert_eq!(
            map.hosts_for_filter(RoleFilter::All),
            hosts(&["h1", "h2"])
        );
    }
}
