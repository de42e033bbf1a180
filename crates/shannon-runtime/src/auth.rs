//! Permission lookup, per-user rate limiting, and sudo escalation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use shannon_config::AuthConfig;
use shannon_core::{PermissionLevel, Result, ShannonError};

/// A pending sudo request awaiting admin approval.
#[derive(Debug, Clone)]
pub struct SudoRequest {
    pub request_id: String,
    pub platform: String,
    pub user_id: String,
    pub requested_level: PermissionLevel,
    pub reason: String,
}

#[derive(Default)]
struct AuthState {
    /// (platform, user_id) → message timestamps inside the current window.
    rate_log: HashMap<(String, String), Vec<Instant>>,
    /// (platform, user_id) → (elevated level, expiry).
    sudo_grants: HashMap<(String, String), (PermissionLevel, Instant)>,
    pending_sudo: HashMap<String, SudoRequest>,
    sudo_counter: u64,
}

/// Authorization: list-based permission lookup, a sliding-window rate
/// limiter, and time-bounded sudo escalation. All state is process-local.
pub struct AuthManager {
    config: AuthConfig,
    state: Mutex<AuthState>,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AuthState::default()),
        }
    }

    /// Effective permission for a user right now: an unexpired sudo grant,
    /// else the highest auth list the identity appears in, else PUBLIC.
    /// Lists match either `platform:user_id` or bare `user_id`.
    pub fn effective_permission(&self, platform: &str, user_id: &str) -> PermissionLevel {
        let key = (platform.to_string(), user_id.to_string());
        {
            let mut state = self.state.lock();
            if let Some(&(level, expiry)) = state.sudo_grants.get(&key) {
                if Instant::now() < expiry {
                    return level;
                }
                state.sudo_grants.remove(&key);
                info!(platform, user_id, "sudo grant expired");
            }
        }

        let scoped = format!("{platform}:{user_id}");
        let lists = [
            (PermissionLevel::Admin, &self.config.admin_users),
            (PermissionLevel::Operator, &self.config.operator_users),
            (PermissionLevel::Trusted, &self.config.trusted_users),
        ];
        for (level, list) in lists {
            if list.iter().any(|id| id == &scoped || id.as_str() == user_id) {
                return level;
            }
        }
        PermissionLevel::Public
    }

    pub fn check_permission(
        &self,
        platform: &str,
        user_id: &str,
        required: PermissionLevel,
    ) -> bool {
        self.effective_permission(platform, user_id) >= required
    }

    // ── Rate limiting ──────────────────────────────────────────

    /// Sliding one-minute window per (platform, user). A denied request
    /// does not consume budget. Idle buckets are pruned as they are
    /// touched.
    pub fn check_rate_limit(&self, platform: &str, user_id: &str) -> bool {
        let key = (platform.to_string(), user_id.to_string());
        let now = Instant::now();
        let window = Duration::from_secs(60);

        let mut state = self.state.lock();
        let log = state.rate_log.entry(key).or_default();
        log.retain(|t| now.duration_since(*t) < window);

        if log.len() >= self.config.rate_limit_per_minute {
            warn!(platform, user_id, "rate limit exceeded");
            return false;
        }
        log.push(now);
        true
    }

    // ── Sudo escalation ────────────────────────────────────────

    /// Request temporary elevation. Returns the request id an admin must
    /// approve.
    pub fn request_sudo(
        &self,
        platform: &str,
        user_id: &str,
        requested_level: PermissionLevel,
        reason: &str,
    ) -> String {
        let mut state = self.state.lock();
        state.sudo_counter += 1;
        let request_id = format!("sudo-{}", state.sudo_counter);
        state.pending_sudo.insert(
            request_id.clone(),
            SudoRequest {
                request_id: request_id.clone(),
                platform: platform.to_string(),
                user_id: user_id.to_string(),
                requested_level,
                reason: reason.to_string(),
            },
        );
        info!(
            request_id,
            platform,
            user_id,
            level = %requested_level,
            "sudo requested"
        );
        request_id
    }

    /// Approve a pending request. The approver must be an admin. A repeat
    /// approval while a grant is active extends the window.
    pub fn approve_sudo(
        &self,
        request_id: &str,
        admin_platform: &str,
        admin_id: &str,
    ) -> Result<()> {
        if !self.check_permission(admin_platform, admin_id, PermissionLevel::Admin) {
            warn!(admin_id, request_id, "sudo approval denied: not an admin");
            return Err(ShannonError::PermissionDenied(
                "admin access required to approve sudo".into(),
            ));
        }

        let mut state = self.state.lock();
        let request = state
            .pending_sudo
            .remove(request_id)
            .ok_or_else(|| ShannonError::NotFound(format!("sudo request {request_id}")))?;

        let expiry = Instant::now() + Duration::from_secs(self.config.sudo_timeout_seconds);
        state.sudo_grants.insert(
            (request.platform.clone(), request.user_id.clone()),
            (request.requested_level, expiry),
        );
        info!(
            request_id,
            platform = %request.platform,
            user_id = %request.user_id,
            level = %request.requested_level,
            expires_in = self.config.sudo_timeout_seconds,
            "sudo approved"
        );
        Ok(())
    }

    /// Deny a pending request.
    pub fn deny_sudo(&self, request_id: &str) -> Result<()> {
        self.state
            .lock()
            .pending_sudo
            .remove(request_id)
            .ok_or_else(|| ShannonError::NotFound(format!("sudo request {request_id}")))?;
        info!(request_id, "sudo denied");
        Ok(())
    }

    /// All requests awaiting approval.
    pub fn list_pending_sudo(&self) -> Vec<SudoRequest> {
        let mut pending: Vec<SudoRequest> =
            self.state.lock().pending_sudo.values().cloned().collect();
        pending.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        pending
    }

    /// Revoke an active grant.
    pub fn revoke_sudo(&self, platform: &str, user_id: &str) -> bool {
        let removed = self
            .state
            .lock()
            .sudo_grants
            .remove(&(platform.to_string(), user_id.to_string()))
            .is_some();
        if removed {
            info!(platform, user_id, "sudo revoked");
        }
        removed
    }

    #[cfg(test)]
    fn grant_sudo_expiring(&self, platform: &str, user_id: &str, expiry: Instant) {
        self.state.lock().sudo_grants.insert(
            (platform.to_string(), user_id.to_string()),
            (PermissionLevel::Admin, expiry),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthManager {
        AuthManager::new(AuthConfig {
            admin_users: vec!["discord:1".into()],
            operator_users: vec!["ops".into()],
            trusted_users: vec!["signal:+555".into()],
            rate_limit_per_minute: 3,
            sudo_timeout_seconds: 300,
        })
    }

    #[test]
    fn test_scoped_match() {
        let auth = manager();
        assert_eq!(
            auth.effective_permission("discord", "1"),
            PermissionLevel::Admin
        );
        // Same user id on another platform does not match a scoped entry.
        assert_eq!(
            auth.effective_permission("signal", "1"),
            PermissionLevel::Public
        );
    }

    #[test]
    fn test_bare_match_any_platform() {
        let auth = manager();
        assert_eq!(
            auth.effective_permission("discord", "ops"),
            PermissionLevel::Operator
        );
        assert_eq!(
            auth.effective_permission("signal", "ops"),
            PermissionLevel::Operator
        );
    }

    #[test]
    fn test_unknown_user_is_public() {
        let auth = manager();
        assert_eq!(
            auth.effective_permission("discord", "stranger"),
            PermissionLevel::Public
        );
    }

    #[test]
    fn test_highest_list_wins() {
        let auth = AuthManager::new(AuthConfig {
            admin_users: vec!["dual".into()],
            trusted_users: vec!["dual".into()],
            ..AuthConfig::default()
        });
        assert_eq!(
            auth.effective_permission("discord", "dual"),
            PermissionLevel::Admin
        );
    }

    #[test]
    fn test_rate_limit_window() {
        let auth = manager();
        assert!(auth.check_rate_limit("discord", "u"));
        assert!(auth.check_rate_limit("discord", "u"));
        assert!(auth.check_rate_limit("discord", "u"));
        // Fourth within the window is denied, and denial doesn't consume:
        // the budget stays exhausted but no further slots are taken.
        assert!(!auth.check_rate_limit("discord", "u"));
        assert!(!auth.check_rate_limit("discord", "u"));
        // Another user has an independent bucket.
        assert!(auth.check_rate_limit("discord", "v"));
    }

    #[test]
    fn test_sudo_flow() {
        let auth = manager();
        let id = auth.request_sudo("discord", "stranger", PermissionLevel::Operator, "deploy");
        assert_eq!(
            auth.effective_permission("discord", "stranger"),
            PermissionLevel::Public
        );

        auth.approve_sudo(&id, "discord", "1").unwrap();
        assert_eq!(
            auth.effective_permission("discord", "stranger"),
            PermissionLevel::Operator
        );

        assert!(auth.revoke_sudo("discord", "stranger"));
        assert_eq!(
            auth.effective_permission("discord", "stranger"),
            PermissionLevel::Public
        );
    }

    #[test]
    fn test_sudo_approve_requires_admin() {
        let auth = manager();
        let id = auth.request_sudo("discord", "u", PermissionLevel::Operator, "x");
        let err = auth.approve_sudo(&id, "discord", "ops").unwrap_err();
        assert!(matches!(err, ShannonError::PermissionDenied(_)));
        // The request is still pending after a failed approval.
        assert_eq!(auth.list_pending_sudo().len(), 1);
    }

    #[test]
    fn test_sudo_unknown_request() {
        let auth = manager();
        let err = auth.approve_sudo("sudo-99", "discord", "1").unwrap_err();
        assert!(matches!(err, ShannonError::NotFound(_)));
        assert!(auth.deny_sudo("sudo-99").is_err());
    }

    #[test]
    fn test_sudo_expiry_is_silent() {
        let auth = manager();
        auth.grant_sudo_expiring("discord", "u", Instant::now() - Duration::from_secs(1));
        assert_eq!(
            auth.effective_permission("discord", "u"),
            PermissionLevel::Public
        );
    }

    #[test]
    fn test_sudo_deny() {
        let auth = manager();
        let id = auth.request_sudo("discord", "u", PermissionLevel::Admin, "x");
        auth.deny_sudo(&id).unwrap();
        assert!(auth.list_pending_sudo().is_empty());
        assert_eq!(
            auth.effective_permission("discord", "u"),
            PermissionLevel::Public
        );
    }
}
