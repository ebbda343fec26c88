//! Client settings shared by every subcommand.

use std::time::Duration;

/// User agent of a stock container engine. Some registries only answer
/// blob requests coming from something that looks like docker.
pub const DOCKER_USER_AGENT: &str = "docker/20.10.8 go/go1.13.15 git-commit/fa9b5b2 kernel/4.19.128-microsoft-standard os/linux arch/amd64 UpstreamClient(Docker-Client/19.03.13 (linux))";

/// Connect timeout for catalog and tag listings.
pub const LISTING_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Read timeout for catalog and tag listings.
pub const LISTING_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Repositories that are never enumerated or cloned.
pub const EXCLUDED_REPOSITORIES: &[&str] = &["www.dreher.in"];

/// Which scheme manifest and blob requests go out over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Scheme for manifest and blob transfers. Listings always try both.
    pub transfer_scheme: Scheme,
    pub transfer_connect_timeout: Duration,
    pub transfer_read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DOCKER_USER_AGENT.to_string(),
            transfer_scheme: Scheme::Http,
            transfer_connect_timeout: Duration::from_secs(10),
            transfer_read_timeout: Duration::from_secs(60),
        }
    }
}

pub fn is_excluded_repository(repo: &str) -> bool {
    EXCLUDED_REPOSITORIES.contains(&repo)
}
