use planpilot_schema::{Profile, ProfilePatch};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{GatewayError, PilotError};
use crate::gateway::{self, AuthGateway, AuthUser, Gateway, Query};

const MIN_PASSWORD_LEN: usize = 8;

/// Signed-in user and their profile row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Registration form input.
#[derive(Debug, Clone, Default)]
pub struct SignUp {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

impl SignUp {
    pub fn validate(&self) -> Result<(), PilotError> {
        if self.full_name.trim().is_empty() {
            return Err(PilotError::validation("Full name is required"));
        }
        validate_email(&self.email)?;
        validate_new_password(&self.password, "Password")
    }
}

fn validate_email(email: &str) -> Result<(), PilotError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(PilotError::validation("Email is required"));
    }
    if !looks_like_email(email) {
        return Err(PilotError::validation("Enter a valid email"));
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty() && !host.is_empty() && !tld.is_empty()
}

fn validate_new_password(password: &str, field: &str) -> Result<(), PilotError> {
    if password.is_empty() {
        return Err(PilotError::validation(format!("{field} is required")));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PilotError::validation(format!(
            "{field} must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Authentication state for one client.
#[derive(Clone)]
pub struct AuthStore {
    auth: Arc<dyn AuthGateway>,
    gateway: Arc<dyn Gateway>,
    state: Arc<watch::Sender<AuthState>>,
}

impl AuthStore {
    pub fn new(auth: Arc<dyn AuthGateway>, gateway: Arc<dyn Gateway>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            auth,
            gateway,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.state.borrow().user.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    /// Picks up a session the auth service already holds.
    pub async fn restore(&self) -> Option<AuthUser> {
        let user = self.auth.current_user().await?;
        self.signed_in(user.clone()).await;
        Some(user)
    }

    pub async fn sign_up(&self, form: &SignUp) -> Result<AuthUser, PilotError> {
        form.validate()?;
        self.begin();
        let result = self
            .auth
            .sign_up(form.email.trim(), &form.password, form.full_name.trim())
            .await;
        let user = self.finish(result)?;
        info!(user_id = %user.id, "account created");
        self.signed_in(user.clone()).await;
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, PilotError> {
        if email.trim().is_empty() {
            return Err(PilotError::validation("Email is required"));
        }
        if password.is_empty() {
            return Err(PilotError::validation("Password is required"));
        }
        self.begin();
        let result = self.auth.sign_in(email.trim(), password).await;
        let user = self.finish(result)?;
        self.signed_in(user.clone()).await;
        Ok(user)
    }

    /// Clears local state even when the remote sign-out fails.
    pub async fn sign_out(&self) -> Result<(), PilotError> {
        let result = self.auth.sign_out().await;
        self.state.send_replace(AuthState::default());
        if let Err(err) = &result {
            warn!(error = %err, "remote sign-out failed");
        }
        result.map_err(PilotError::from)
    }

    pub async fn fetch_profile(&self) -> Result<Option<Profile>, PilotError> {
        let Some(user) = self.user() else {
            return Err(PilotError::from(GatewayError::Unauthenticated));
        };
        let rows: Vec<Profile> = gateway::fetch(
            self.gateway.as_ref(),
            &Query::table("profiles").eq("id", user.id).limit(1),
        )
        .await?;
        let profile = rows.into_iter().next();
        self.state.send_modify(|s| s.profile.clone_from(&profile));
        Ok(profile)
    }

    /// Saves name, username (blank clears it) and accent color.
    pub async fn update_profile(
        &self,
        full_name: &str,
        username: &str,
        accent_color: &str,
    ) -> Result<Profile, PilotError> {
        let Some(user) = self.user() else {
            return Err(PilotError::from(GatewayError::Unauthenticated));
        };
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(PilotError::validation("Full name is required"));
        }
        let username = username.trim();
        let patch = ProfilePatch {
            full_name: full_name.to_string(),
            username: (!username.is_empty()).then(|| username.to_string()),
            accent_color: accent_color.to_string(),
        };

        let before = self.profile();
        self.state.send_modify(|s| {
            let profile = s.profile.get_or_insert_with(|| Profile {
                id: user.id,
                ..Profile::default()
            });
            patch.apply(profile);
        });

        let body = serde_json::to_value(&patch)?;
        let result = self
            .gateway
            .update(&Query::table("profiles").eq("id", user.id), body)
            .await;
        match result {
            Ok(rows) => {
                let stored: Option<Profile> = gateway::decode_rows(rows)?.into_iter().next();
                if let Some(stored) = &stored {
                    self.state.send_modify(|s| s.profile = Some(stored.clone()));
                }
                Ok(self.profile().unwrap_or_default())
            }
            Err(err) => {
                warn!(user_id = %user.id, error = %err, "profile update failed, reverting");
                self.state.send_modify(|s| s.profile = before);
                Err(err.into())
            }
        }
    }

    pub async fn change_password(&self, password: &str, confirm: &str) -> Result<(), PilotError> {
        validate_new_password(password, "New password")?;
        if password != confirm {
            return Err(PilotError::validation("Passwords do not match"));
        }
        self.auth.update_password(password).await?;
        info!("password updated");
        Ok(())
    }

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn finish(
        &self,
        result: Result<AuthUser, GatewayError>,
    ) -> Result<AuthUser, PilotError> {
        match result {
            Ok(user) => Ok(user),
            Err(err) => {
                let err = PilotError::from(err);
                warn!(error = %err, "authentication failed");
                let message = err.user_message();
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
                Err(err)
            }
        }
    }

    async fn signed_in(&self, user: AuthUser) {
        self.state.send_modify(|s| {
            s.user = Some(user);
            s.loading = false;
            s.error = None;
        });
        if let Err(err) = self.fetch_profile().await {
            warn!(error = %err, "profile fetch after sign-in failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryGateway, Op};

    fn store(gw: &MemoryGateway) -> AuthStore {
        AuthStore::new(Arc::new(gw.clone()), Arc::new(gw.clone()))
    }

    fn form(full_name: &str, email: &str, password: &str) -> SignUp {
        SignUp {
            full_name: full_name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn sign_up_validation_messages() {
        let cases = [
            (form(" ", "a@b.co", "password1"), "Full name is required"),
            (form("Ana", "", "password1"), "Email is required"),
            (form("Ana", "ana@nowhere", "password1"), "Enter a valid email"),
            (form("Ana", "ana@b.co", ""), "Password is required"),
            (
                form("Ana", "ana@b.co", "short"),
                "Password must be at least 8 characters",
            ),
        ];
        for (input, message) in cases {
            assert_eq!(input.validate().unwrap_err().user_message(), message);
        }
        assert!(form("Ana", "ana@b.co", "longenough").validate().is_ok());
    }

    #[tokio::test]
    async fn sign_up_loads_profile_and_sign_out_clears() {
        let gw = MemoryGateway::new();
        let auth = store(&gw);
        let user = auth
            .sign_up(&form("Ana Lima", "ana@example.com", "password1"))
            .await
            .unwrap();
        let state = auth.state();
        assert_eq!(state.user.as_ref().map(|u| u.id), Some(user.id));
        assert_eq!(
            state.profile.and_then(|p| p.full_name).as_deref(),
            Some("Ana Lima")
        );

        auth.sign_out().await.unwrap();
        assert_eq!(auth.state(), AuthState::default());

        assert!(auth.sign_in("ana@example.com", "wrong-pass").await.is_err());
        assert!(auth.state().error.is_some());
        assert!(auth.user().is_none());
        auth.sign_in("ana@example.com", "password1").await.unwrap();
        assert!(auth.user().is_some());
    }

    #[tokio::test]
    async fn update_profile_blanks_username_and_reverts_on_failure() {
        let gw = MemoryGateway::new();
        let auth = store(&gw);
        auth.sign_up(&form("Ana", "ana@example.com", "password1"))
            .await
            .unwrap();

        let profile = auth.update_profile("Ana B", "  ", "#ec4899").await.unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Ana B"));
        assert_eq!(profile.username, None);
        assert_eq!(profile.accent_color.as_deref(), Some("#ec4899"));

        gw.fail_once(Op::Update, "profiles").await;
        assert!(auth.update_profile("Other", "other", "#000000").await.is_err());
        assert_eq!(auth.profile().and_then(|p| p.full_name).as_deref(), Some("Ana B"));
    }

    #[tokio::test]
    async fn change_password_checks_length_and_confirmation() {
        let gw = MemoryGateway::new();
        let auth = store(&gw);
        auth.sign_up(&form("Ana", "ana@example.com", "password1"))
            .await
            .unwrap();

        let err = auth.change_password("short", "short").await.unwrap_err();
        assert_eq!(err.user_message(), "New password must be at least 8 characters");
        let err = auth.change_password("password2", "password3").await.unwrap_err();
        assert_eq!(err.user_message(), "Passwords do not match");

        auth.change_password("password2", "password2").await.unwrap();
        auth.sign_out().await.unwrap();
        auth.sign_in("ana@example.com", "password2").await.unwrap();
    }
}
