use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    google::IdentityProvider,
    jwt::{Credentials, TokenService},
    otp::{OtpPurpose, OtpService},
    password::PasswordHasher,
};
use crate::{
    db::{paranoid::QueryOptions, Filter, Repository, Update},
    error::{AppError, AppResult},
    users::model::{Provider, User},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex");
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account lifecycle: signup, confirmation, login and password reset.
#[derive(Clone)]
pub struct AuthService {
    users: Repository<User>,
    otp: OtpService,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn PasswordHasher>,
    identity: Arc<dyn IdentityProvider>,
}

impl AuthService {
    pub fn new(
        users: Repository<User>,
        otp: OtpService,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn PasswordHasher>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            users,
            otp,
            tokens,
            hasher,
            identity,
        }
    }

    fn credentials(&self, user: &User) -> AppResult<Credentials> {
        Ok(self.tokens.create_login_credentials(user)?)
    }

    fn hash(&self, plain: &str) -> AppResult<String> {
        self.hasher.hash(plain).map_err(AppError::Internal)
    }

    /// Creates an unconfirmed account and mails a confirmation code.
    #[instrument(skip(self, password))]
    pub async fn signup(&self, email: &str, password: &str, display_name: &str) -> AppResult<&'static str> {
        let email = normalize_email(email);
        let taken = self
            .users
            .find_one(Filter::new().eq("email", &email), QueryOptions::include_frozen())
            .await?;
        if taken.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::conflict("user already exists"));
        }

        let digest = self.hash(password)?;
        let user = self
            .users
            .create(vec![User::system(email, digest, display_name)])
            .await?
            .pop()
            .ok_or_else(|| AppError::bad_request("failed to signup"))?;

        self.otp.issue(&user, OtpPurpose::ConfirmEmail).await?;
        info!(user_id = %user.id, email = %user.email, "user signed up");
        Ok("user signed up successfully, check your email")
    }

    async fn google_identity(&self, id_token: &str) -> AppResult<super::google::ExternalIdentity> {
        let identity = self.identity.verify_identity_token(id_token).await?;
        if !identity.email_verified {
            warn!(email = %identity.email, "google email not verified");
            return Err(AppError::bad_request("failed to verify this google account"));
        }
        Ok(identity)
    }

    #[instrument(skip_all)]
    pub async fn signup_with_google(&self, id_token: &str) -> AppResult<Credentials> {
        let identity = self.google_identity(id_token).await?;
        let existing = self
            .users
            .find_one(Filter::new().eq("email", &identity.email), QueryOptions::default())
            .await?;
        if let Some(user) = existing {
            if user.provider == Provider::Google {
                info!(user_id = %user.id, "google signup for existing account, logging in");
                return self.credentials(&user);
            }
            warn!(email = %identity.email, "google signup for a system account");
            return Err(AppError::conflict("email exists"));
        }

        let user = self
            .users
            .create(vec![User::google(
                identity.email,
                identity.given_name,
                identity.family_name,
                identity.picture,
            )])
            .await?
            .pop()
            .ok_or_else(|| AppError::bad_request("failed to create user with google"))?;
        info!(user_id = %user.id, email = %user.email, "google user signed up");
        self.credentials(&user)
    }

    #[instrument(skip_all)]
    pub async fn login_with_google(&self, id_token: &str) -> AppResult<Credentials> {
        let identity = self.google_identity(id_token).await?;
        let filter = Filter::new()
            .eq("email", &identity.email)
            .eq("provider", Provider::Google.as_str());
        let user = self
            .users
            .find_one(filter, QueryOptions::default())
            .await?
            .ok_or_else(|| {
                AppError::not_found("not registered account or registered with another provider")
            })?;
        info!(user_id = %user.id, "user logged in with google");
        self.credentials(&user)
    }

    fn unconfirmed(email: &str) -> Filter {
        Filter::new().eq("email", email).missing("confirmed_at")
    }

    #[instrument(skip(self))]
    pub async fn resend_confirmation_email(&self, email: &str) -> AppResult<&'static str> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_one(Self::unconfirmed(&email), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist or is already confirmed"))?;

        self.otp
            .ensure_no_live_code(user.id, OtpPurpose::ConfirmEmail)
            .await?;
        self.otp.issue(&user, OtpPurpose::ConfirmEmail).await?;
        Ok("done")
    }

    #[instrument(skip(self, code))]
    pub async fn confirm_email(&self, email: &str, code: &str) -> AppResult<&'static str> {
        let email = normalize_email(email);
        let mut user = self
            .users
            .find_one_hydrated(Self::unconfirmed(&email), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist or is already confirmed"))?;

        let live = self
            .otp
            .verify(user.id, OtpPurpose::ConfirmEmail, code)
            .await?;

        user.confirmed_at = Some(OffsetDateTime::now_utc());
        user.save().await?;
        self.otp.consume(live.id).await?;
        info!(user_id = %user.id, "email confirmed");
        Ok("user confirmed successfully")
    }

    /// Identity and credential failures are reported identically.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AppResult<Credentials> {
        let email = normalize_email(email);
        let filter = Filter::new()
            .eq("email", &email)
            .exists("confirmed_at")
            .eq("provider", Provider::System.as_str());
        let user = self
            .users
            .find_one(filter, QueryOptions::default())
            .await?
            .ok_or_else(|| {
                warn!(email = %email, "login for unknown or unconfirmed account");
                AppError::not_found("failed to find matching account or user is not confirmed")
            })?;

        let matches = user
            .password
            .as_deref()
            .is_some_and(|digest| self.hasher.compare(password, digest));
        if !matches {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::not_found("failed to find matching account"));
        }

        info!(user_id = %user.id, "user logged in");
        self.credentials(&user)
    }

    fn resettable(email: &str) -> Filter {
        Filter::new()
            .eq("email", email)
            .eq("provider", Provider::System.as_str())
    }

    #[instrument(skip(self))]
    pub async fn send_reset_code(&self, email: &str) -> AppResult<&'static str> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_one(Self::resettable(&email).exists("confirmed_at"), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("user does not exist or is not confirmed"))?;

        self.otp
            .ensure_no_live_code(user.id, OtpPurpose::ResetPassword)
            .await?;
        let issued = self.otp.issue(&user, OtpPurpose::ResetPassword).await?;

        let proof = self.hash(&issued.code)?;
        let res = self
            .users
            .update_one(
                Filter::by_id(user.id),
                Update::new().set("reset_password_code", proof),
                QueryOptions::default(),
            )
            .await?;
        if res.matched_count == 0 {
            return Err(AppError::bad_request("failed to send code"));
        }
        info!(user_id = %user.id, "reset code sent");
        Ok("code sent")
    }

    /// Sets a new password and revokes every token issued before it.
    #[instrument(skip(self, code, new_password))]
    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> AppResult<&'static str> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_one(
                Self::resettable(&email).exists("reset_password_code"),
                QueryOptions::default(),
            )
            .await?
            .ok_or_else(|| AppError::not_found("invalid account"))?;

        let live = self
            .otp
            .verify(user.id, OtpPurpose::ResetPassword, code)
            .await?;
        let proof_ok = user
            .reset_password_code
            .as_deref()
            .is_some_and(|digest| self.hasher.compare(code, digest));
        if !proof_ok {
            warn!(user_id = %user.id, "reset proof mismatch");
            return Err(AppError::bad_request("invalid otp"));
        }

        let digest = self.hash(new_password)?;
        let update = Update::new()
            .set("password", digest)
            .set("change_credentials_time", OffsetDateTime::now_utc())
            .unset("reset_password_code");
        let res = self
            .users
            .update_one(
                Filter::by_id(user.id).exists("reset_password_code"),
                update,
                QueryOptions::default(),
            )
            .await?;
        if res.matched_count == 0 {
            return Err(AppError::bad_request("failed to reset password"));
        }

        self.otp.consume(live.id).await?;
        info!(user_id = %user.id, "password reset");
        Ok("password changed successfully")
    }
}
