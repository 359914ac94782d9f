//! One-time code lifecycle: issue, look up, verify, consume, expire.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, Duration as TimeDuration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::password::PasswordHasher;
use crate::{
    db::{Collection, Entity, Filter, Repository, StoreError},
    error::AppError,
    mail::{self, Mailer, OtpEmail},
    users::model::User,
};

pub const CODE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    ConfirmEmail,
    ResetPassword,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            OtpPurpose::ConfirmEmail => "confirm_email",
            OtpPurpose::ResetPassword => "reset_password",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeCode {
    pub id: Uuid,
    /// Argon2 digest of the code.
    pub code: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub created_by: Uuid,
    pub purpose: OtpPurpose,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Entity for OneTimeCode {
    const COLLECTION: Collection = Collection {
        name: "otps",
        unique: &[],
    };
    const PARANOID: bool = false;

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A freshly stored code together with its plaintext, which only ever lives
/// in memory.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub record: OneTimeCode,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("no live code")]
    NotFound,
    #[error("code does not match")]
    Mismatch,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("hashing failed: {0}")]
    Hash(#[source] anyhow::Error),
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::NotFound | OtpError::Mismatch => AppError::bad_request("invalid otp"),
            OtpError::Store(e) => e.into(),
            OtpError::Hash(e) => AppError::Internal(e),
        }
    }
}

pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:0width$}", width = CODE_LEN)
}

fn format_expiry(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

#[derive(Clone)]
pub struct OtpService {
    codes: Repository<OneTimeCode>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn Mailer>,
    ttl: TimeDuration,
}

impl OtpService {
    pub fn new(
        codes: Repository<OneTimeCode>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn Mailer>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            codes,
            hasher,
            mailer,
            ttl: TimeDuration::seconds(ttl_seconds),
        }
    }

    /// Stores a new code for `owner` and mails the plaintext.
    ///
    /// Callers check [`OtpService::ensure_no_live_code`] first.
    pub async fn issue(&self, owner: &User, purpose: OtpPurpose) -> Result<IssuedCode, OtpError> {
        let code = generate_code();
        let digest = self.hasher.hash(&code).map_err(OtpError::Hash)?;
        let record = OneTimeCode {
            id: Uuid::new_v4(),
            code: digest,
            expires_at: OffsetDateTime::now_utc() + self.ttl,
            created_by: owner.id,
            purpose,
            created_at: None,
            updated_at: None,
        };
        let record = self
            .codes
            .create(vec![record])
            .await?
            .pop()
            .ok_or(StoreError::Malformed {
                collection: OneTimeCode::COLLECTION.name,
                reason: "insert returned nothing".into(),
            })?;

        mail::notify(
            self.mailer.clone(),
            OtpEmail {
                purpose,
                to: owner.email.clone(),
                code: code.clone(),
            },
        );
        info!(user_id = %owner.id, purpose = purpose.as_str(), expires_at = %record.expires_at, "otp issued");
        Ok(IssuedCode { record, code })
    }

    /// The owner's non-expired code for `purpose`, if any.
    pub async fn live_code(
        &self,
        owner_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<OneTimeCode>, StoreError> {
        let matching = Filter::new()
            .eq("purpose", purpose.as_str())
            .gt("expires_at", OffsetDateTime::now_utc());
        let codes = self
            .codes
            .populate_owned("created_by", owner_id, matching)
            .await?;
        Ok(codes.into_iter().next())
    }

    /// `Conflict` carrying the expiry of the code that is still live.
    pub async fn ensure_no_live_code(&self, owner_id: Uuid, purpose: OtpPurpose) -> Result<(), AppError> {
        if let Some(live) = self.live_code(owner_id, purpose).await? {
            return Err(AppError::conflict(format!(
                "we can not send you a new code until the existing one expires, please try again after {}",
                format_expiry(live.expires_at)
            )));
        }
        Ok(())
    }

    /// Checks `candidate` against the live code. Does not consume it.
    pub async fn verify(
        &self,
        owner_id: Uuid,
        purpose: OtpPurpose,
        candidate: &str,
    ) -> Result<OneTimeCode, OtpError> {
        let live = self
            .live_code(owner_id, purpose)
            .await?
            .ok_or(OtpError::NotFound)?;
        if !self.hasher.compare(candidate, &live.code) {
            debug!(user_id = %owner_id, purpose = purpose.as_str(), "otp mismatch");
            return Err(OtpError::Mismatch);
        }
        Ok(live)
    }

    pub async fn consume(&self, code_id: Uuid) -> Result<bool, StoreError> {
        let res = self.codes.delete_one(Filter::by_id(code_id)).await?;
        Ok(res.deleted_count > 0)
    }

    /// Physically removes every expired code.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        self.codes
            .delete_many(Filter::new().lte("expires_at", OffsetDateTime::now_utc()))
            .await
    }

    pub fn spawn_expiry_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                match this.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => debug!(removed = n, "expired otps swept"),
                    Err(e) => error!(error = %e, "otp sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{MemoryStore, QueryOptions},
        state::testing::{cheap_hasher, RecordingMailer},
    };

    fn service(ttl_seconds: i64) -> (OtpService, tokio::sync::mpsc::UnboundedReceiver<OtpEmail>) {
        let (mailer, rx) = RecordingMailer::new();
        let codes = Repository::new(Arc::new(MemoryStore::new()));
        (
            OtpService::new(codes, cheap_hasher(), Arc::new(mailer), ttl_seconds),
            rx,
        )
    }

    fn owner() -> User {
        User::system("a@x.com", "digest".into(), "Ann Lee")
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..50 {
            let c = generate_code();
            assert_eq!(c.len(), CODE_LEN);
            assert!(c.chars().all(|ch| ch.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn only_the_digest_is_stored_and_the_plaintext_is_mailed() {
        let (otp, mut rx) = service(120);
        let u = owner();
        let issued = otp.issue(&u, OtpPurpose::ConfirmEmail).await.unwrap();

        assert_ne!(issued.record.code, issued.code);
        assert!(cheap_hasher().compare(&issued.code, &issued.record.code));
        let window = issued.record.expires_at - OffsetDateTime::now_utc();
        assert!(window <= TimeDuration::seconds(120) && window > TimeDuration::seconds(100));

        let mail = rx.recv().await.unwrap();
        assert_eq!(mail.to, "a@x.com");
        assert_eq!(mail.code, issued.code);
        assert_eq!(mail.purpose, OtpPurpose::ConfirmEmail);
    }

    #[tokio::test]
    async fn live_code_is_per_purpose_and_blocks_reissue() {
        let (otp, _rx) = service(120);
        let u = owner();
        otp.issue(&u, OtpPurpose::ResetPassword).await.unwrap();

        assert!(otp.live_code(u.id, OtpPurpose::ConfirmEmail).await.unwrap().is_none());
        assert!(otp.ensure_no_live_code(u.id, OtpPurpose::ConfirmEmail).await.is_ok());

        let err = otp
            .ensure_no_live_code(u.id, OtpPurpose::ResetPassword)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("try again after")));
    }

    #[tokio::test]
    async fn verify_then_consume() {
        let (otp, _rx) = service(120);
        let u = owner();
        let issued = otp.issue(&u, OtpPurpose::ConfirmEmail).await.unwrap();
        let wrong = if issued.code == "000000" { "000001" } else { "000000" };

        assert!(matches!(
            otp.verify(u.id, OtpPurpose::ConfirmEmail, wrong).await,
            Err(OtpError::Mismatch)
        ));
        let live = otp
            .verify(u.id, OtpPurpose::ConfirmEmail, &issued.code)
            .await
            .unwrap();
        // verification alone leaves the code in place
        assert!(otp.verify(u.id, OtpPurpose::ConfirmEmail, &issued.code).await.is_ok());

        assert!(otp.consume(live.id).await.unwrap());
        assert!(matches!(
            otp.verify(u.id, OtpPurpose::ConfirmEmail, &issued.code).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_codes_behave_as_missing_and_get_swept() {
        let (otp, _rx) = service(0);
        let u = owner();
        let issued = otp.issue(&u, OtpPurpose::ConfirmEmail).await.unwrap();

        assert!(matches!(
            otp.verify(u.id, OtpPurpose::ConfirmEmail, &issued.code).await,
            Err(OtpError::NotFound)
        ));
        assert!(otp.ensure_no_live_code(u.id, OtpPurpose::ConfirmEmail).await.is_ok());

        assert_eq!(otp.sweep_expired().await.unwrap(), 1);
        assert_eq!(
            otp.codes.count(Filter::new(), QueryOptions::default()).await.unwrap(),
            0
        );
    }
}
