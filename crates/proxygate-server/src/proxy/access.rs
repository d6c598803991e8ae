//! Tunnel access decisions.
//!
//! A request from a trusted origin tunnels straight through. Anything else
//! must present basic credentials that the configured verifier accepts.

use super::verifier::{
    BasicCredentials, CredentialVerifier, StaticCredentialVerifier, StoreCredentialVerifier,
    VerifiedIdentity,
};
use crate::config::{BasicAuthMode, ConfigError, ProxyConfig};
use crate::store::CredentialStore;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// One allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    /// Compared verbatim against the origin host.
    Exact(String),
    /// Subnet containment.
    Network(IpNet),
}

impl AccessRule {
    /// Entries containing `/` are CIDR blocks; everything else is exact.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(ConfigError::InvalidAccessRule {
                entry: entry.to_string(),
                reason: "empty entry".to_string(),
            });
        }

        if entry.contains('/') {
            entry
                .parse::<IpNet>()
                .map(AccessRule::Network)
                .map_err(|e| ConfigError::InvalidAccessRule {
                    entry: entry.to_string(),
                    reason: e.to_string(),
                })
        } else {
            Ok(AccessRule::Exact(entry.to_string()))
        }
    }

    fn matches(&self, host: &str, ip: IpAddr) -> bool {
        match self {
            AccessRule::Exact(exact) => {
                exact == host || exact.parse::<IpAddr>().map_or(false, |rule| rule == ip)
            }
            AccessRule::Network(net) => net.contains(&ip),
        }
    }
}

/// Set of access rules. Any single match trusts the origin.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    rules: Vec<AccessRule>,
}

impl AllowList {
    /// Build from configured entries, skipping malformed ones.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        let (list, rejected) = Self::parse_entries(entries);
        for err in &rejected {
            warn!(error = %err, "Skipping malformed allow-list entry");
        }
        list
    }

    /// Build from configured entries, returning the rejected ones alongside.
    pub fn parse_entries<S: AsRef<str>>(entries: &[S]) -> (Self, Vec<ConfigError>) {
        let mut rules = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();

        for entry in entries {
            match AccessRule::parse(entry.as_ref()) {
                Ok(rule) => rules.push(rule),
                Err(e) => rejected.push(e),
            }
        }

        (Self { rules }, rejected)
    }

    /// Number of usable rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `ip` matches any rule.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let host = ip.to_string();
        self.rules.iter().any(|rule| rule.matches(&host, ip))
    }

    /// Whether `origin` (an address, with or without port) is trusted.
    ///
    /// An unparseable origin is never trusted.
    pub fn is_trusted(&self, origin: &str) -> bool {
        let Some((host, ip)) = parse_origin(origin) else {
            debug!(origin, "Unparseable tunnel origin");
            return false;
        };
        self.rules.iter().any(|rule| rule.matches(&host, ip))
    }
}

fn parse_origin(origin: &str) -> Option<(String, IpAddr)> {
    let origin = origin.trim();
    if let Ok(addr) = origin.parse::<SocketAddr>() {
        return Some((addr.ip().to_string(), addr.ip()));
    }
    let bare = origin.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>().ok().map(|ip| (bare.to_string(), ip))
}

/// How a tunnel request was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Origin matched the allow-list.
    TrustedNetwork,
    /// Basic credentials accepted for this identity.
    Credentials(VerifiedIdentity),
}

impl Grant {
    /// Store identity behind the grant, if any.
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Grant::TrustedNetwork => None,
            Grant::Credentials(identity) => identity.user_id,
        }
    }
}

/// Outcome of one access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow(Grant),
    /// Credentials missing or rejected; ask the client for them.
    Challenge,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow(_))
    }
}

/// Allow-list plus fallback verifier.
#[derive(Clone)]
pub struct AccessPolicy {
    allow_list: Arc<AllowList>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AccessPolicy {
    /// Policy trusting `allow_list` and otherwise asking `verifier`.
    pub fn new(allow_list: AllowList, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            allow_list: Arc::new(allow_list),
            verifier,
        }
    }

    /// Build the policy described by the tunnel configuration.
    pub fn from_config(config: &ProxyConfig, store: Arc<dyn CredentialStore>) -> Self {
        let verifier: Arc<dyn CredentialVerifier> = match config.basic_auth.mode {
            BasicAuthMode::Static => Arc::new(StaticCredentialVerifier::new(
                config.basic_auth.username.clone(),
                config.basic_auth.password.clone(),
            )),
            BasicAuthMode::Store => Arc::new(StoreCredentialVerifier::new(store)),
        };
        Self::new(AllowList::from_entries(&config.allowed_ips), verifier)
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Decide one tunnel request in a single pass.
    ///
    /// `proxy_authorization` is the raw `Proxy-Authorization` header value.
    /// The verifier runs only when the origin is not trusted.
    pub async fn decide(&self, origin: &str, proxy_authorization: Option<&str>) -> AccessDecision {
        if self.allow_list.is_trusted(origin) {
            debug!(origin, "Tunnel origin on allow-list");
            return AccessDecision::Allow(Grant::TrustedNetwork);
        }

        let Some(credentials) = proxy_authorization.and_then(BasicCredentials::parse) else {
            debug!(origin, "Untrusted origin without usable credentials");
            return AccessDecision::Challenge;
        };

        match self.verifier.verify(&credentials).await {
            Some(identity) => {
                debug!(origin, username = %identity.username, "Tunnel credentials accepted");
                AccessDecision::Allow(Grant::Credentials(identity))
            }
            None => {
                debug!(origin, username = %credentials.username, "Tunnel credentials rejected");
                AccessDecision::Challenge
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::verifier::StaticCredentialVerifier;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use proptest::prelude::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Verifier that counts calls and accepts everything.
    #[derive(Default)]
    struct CountingVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialVerifier for CountingVerifier {
        async fn verify(&self, credentials: &BasicCredentials) -> Option<VerifiedIdentity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(VerifiedIdentity {
                username: credentials.username.clone(),
                user_id: None,
            })
        }
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    fn static_policy(entries: &[&str]) -> AccessPolicy {
        AccessPolicy::new(
            AllowList::from_entries(entries),
            Arc::new(StaticCredentialVerifier::new("proxy", "secret".into())),
        )
    }

    #[test]
    fn test_rule_parsing() {
        assert_eq!(
            AccessRule::parse("10.0.0.0/8").unwrap(),
            AccessRule::Network("10.0.0.0/8".parse().unwrap())
        );
        assert_eq!(
            AccessRule::parse(" 127.0.0.1 ").unwrap(),
            AccessRule::Exact("127.0.0.1".into())
        );
        assert!(matches!(
            AccessRule::parse("10.0.0.0/99"),
            Err(ConfigError::InvalidAccessRule { .. })
        ));
        assert!(AccessRule::parse("").is_err());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let (list, rejected) =
            AllowList::parse_entries(&["not-a-cidr/x", "192.168.0.0/16", "10.0.0.0/33"]);
        assert_eq!(list.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert!(list.is_trusted("192.168.4.2:5000"));
    }

    #[test]
    fn test_exact_and_cidr_matching() {
        let list = AllowList::from_entries(&["203.0.113.7", "10.0.0.0/8", "::1"]);

        assert!(list.is_trusted("203.0.113.7:40000"));
        assert!(list.is_trusted("10.200.1.1:1"));
        assert!(list.is_trusted("[::1]:8080"));
        assert!(list.is_trusted("::1"));
        assert!(!list.is_trusted("203.0.113.8:40000"));
        assert!(!list.is_trusted("11.0.0.1:1"));
    }

    #[test]
    fn test_unparseable_origin_untrusted() {
        let list = AllowList::from_entries(&["0.0.0.0/0"]);
        assert!(!list.is_trusted("somewhere"));
        assert!(!list.is_trusted(""));
    }

    #[tokio::test]
    async fn test_trusted_origin_skips_verifier() {
        let verifier = Arc::new(CountingVerifier::default());
        let policy = AccessPolicy::new(AllowList::from_entries(&["10.0.0.0/8"]), verifier.clone());

        let decision = policy.decide("10.1.2.3:5555", Some(basic("x", "y").as_str())).await;
        assert_eq!(decision, AccessDecision::Allow(Grant::TrustedNetwork));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_allow_list_challenges_everyone() {
        let policy = static_policy(&[]);
        assert_eq!(policy.decide("127.0.0.1:1", None).await, AccessDecision::Challenge);
    }

    #[tokio::test]
    async fn test_fallback_credentials() {
        let policy = static_policy(&["10.0.0.0/8"]);

        assert_eq!(
            policy.decide("192.0.2.1:1", Some(basic("proxy", "secret").as_str())).await,
            AccessDecision::Allow(Grant::Credentials(VerifiedIdentity {
                username: "proxy".into(),
                user_id: None,
            }))
        );
        assert_eq!(
            policy.decide("192.0.2.1:1", Some(basic("proxy", "nope").as_str())).await,
            AccessDecision::Challenge
        );
        assert_eq!(
            policy.decide("192.0.2.1:1", Some("Bearer token")).await,
            AccessDecision::Challenge
        );
    }

    #[tokio::test]
    async fn test_from_config_selects_verifier() {
        let store: Arc<dyn CredentialStore> = Arc::new(crate::store::MemoryStore::new());
        let mut config = ProxyConfig {
            allowed_ips: vec!["10.0.0.0/8".into()],
            ..ProxyConfig::default()
        };
        config.basic_auth.username = "proxy".into();
        config.basic_auth.password = "secret".into();

        let policy = AccessPolicy::from_config(&config, store.clone());
        assert_eq!(policy.allow_list().len(), 1);
        assert!(policy
            .decide("192.0.2.1:1", Some(basic("proxy", "secret").as_str()))
            .await
            .is_allowed());

        config.basic_auth.mode = BasicAuthMode::Store;
        let policy = AccessPolicy::from_config(&config, store);
        assert!(!policy
            .decide("192.0.2.1:1", Some(basic("proxy", "secret").as_str()))
            .await
            .is_allowed());
    }

    #[test]
    fn test_contains_bare_address() {
        let list = AllowList::from_entries(&["10.0.0.0/8", "::1"]);
        assert!(list.contains("10.9.8.7".parse().unwrap()));
        assert!(list.contains("::1".parse().unwrap()));
        assert!(!list.contains("192.0.2.1".parse().unwrap()));
        assert!(!AllowList::default().contains("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_block_valid_ranges() {
        let policy = static_policy(&["bogus/12", "172.16.0.0/12"]);
        assert!(policy.decide("172.20.0.9:1", None).await.is_allowed());
    }

    proptest! {
        #[test]
        fn prop_cidr_member_allowed_without_verifier(
            octets in any::<[u8; 4]>(),
            prefix in 0u8..=32,
        ) {
            let ip = Ipv4Addr::from(octets);
            let net = ipnet::Ipv4Net::new(ip, prefix).unwrap().trunc();
            let verifier = Arc::new(CountingVerifier::default());
            let policy = AccessPolicy::new(AllowList::from_entries(&[net.to_string()]), verifier.clone());

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decision = runtime.block_on(policy.decide(&format!("{ip}:443"), None));

            prop_assert_eq!(decision, AccessDecision::Allow(Grant::TrustedNetwork));
            prop_assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        }
    }
}
