use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ProfileView, UpdateProfile},
    model::User,
};
use crate::{
    auth::jwt::{Credentials, TokenService},
    db::{Filter, QueryOptions, Repository, Update, UpdateOptions},
    error::{AppError, AppResult},
    products::model::Product,
    storage::{self, StorageClient, UploadItem},
};

/// Account-level operations on an already authenticated user.
#[derive(Clone)]
pub struct UserService {
    users: Repository<User>,
    products: Repository<Product>,
    tokens: Arc<TokenService>,
    storage: Arc<dyn StorageClient>,
}

impl UserService {
    pub fn new(
        users: Repository<User>,
        products: Repository<Product>,
        tokens: Arc<TokenService>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            users,
            products,
            tokens,
            storage,
        }
    }

    async fn picture_url(&self, user: &User) -> Option<String> {
        let picture = user.profile_picture.as_deref()?;
        if picture.starts_with("http://") || picture.starts_with("https://") {
            return Some(picture.to_string());
        }
        match storage::presign(self.storage.as_ref(), picture).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = ?e, user_id = %user.id, "profile picture presign failed");
                None
            }
        }
    }

    async fn view(&self, user: User) -> AppResult<ProfileView> {
        let url = self.picture_url(&user).await;
        let wishlist = self.products.populate_refs(&user.wishlist).await?;
        Ok(ProfileView::new(user, url, wishlist))
    }

    #[instrument(skip(self))]
    pub async fn profile(&self, user_id: Uuid) -> AppResult<ProfileView> {
        let user = self
            .users
            .find_one(Filter::by_id(user_id), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        self.view(user).await
    }

    /// Username is written through as first and last name.
    #[instrument(skip(self, user, input), fields(user_id = %user.id))]
    pub async fn update_profile(&self, user: &User, input: UpdateProfile) -> AppResult<ProfileView> {
        let mut update = Update::new();
        if let Some(username) = input.username.as_deref().map(str::trim) {
            update = update.set("username", username);
        }
        if let Some(gender) = input.gender {
            update = update.set("gender", gender.as_str());
        }
        let updated = self
            .users
            .find_one_and_update(Filter::by_id(user.id), update, UpdateOptions::returning_new())
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        info!("profile updated");
        self.view(updated).await
    }

    /// Fresh credential pair for the owner of a valid refresh token.
    pub fn refresh(&self, user: &User) -> AppResult<Credentials> {
        info!(user_id = %user.id, "token refreshed");
        Ok(self.tokens.create_login_credentials(user)?)
    }

    #[instrument(skip(self, user, file), fields(user_id = %user.id))]
    pub async fn upload_profile_picture(&self, user: &User, file: UploadItem) -> AppResult<ProfileView> {
        let folder = format!("users/{}", user.id);
        let key = storage::upload(self.storage.as_ref(), file, &folder).await?;

        let before = self
            .users
            .find_one_and_update(
                Filter::by_id(user.id),
                Update::new().set("profile_picture", key.as_str()),
                UpdateOptions::default(),
            )
            .await?;
        let Some(before) = before else {
            storage::remove(self.storage.as_ref(), &key).await;
            return Err(AppError::not_found("user not found"));
        };

        if let Some(old) = before.profile_picture.as_deref() {
            if !old.starts_with("http") {
                storage::remove(self.storage.as_ref(), old).await;
            }
        }
        info!(key = %key, "profile picture updated");
        self.profile(user.id).await
    }

    /// Revokes every token issued so far.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn logout_everywhere(&self, user: &User) -> AppResult<()> {
        let res = self
            .users
            .update_one(
                Filter::by_id(user.id),
                Update::new().set("change_credentials_time", OffsetDateTime::now_utc()),
                QueryOptions::default(),
            )
            .await?;
        if res.matched_count == 0 {
            return Err(AppError::not_found("user not found"));
        }
        info!("logged out from all devices");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn freeze(&self, user_id: Uuid, actor: Uuid) -> AppResult<()> {
        self.users
            .freeze(Filter::by_id(user_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("user not found or account is already freezed"))?;
        info!(user_id = %user_id, actor = %actor, "account freezed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, user_id: Uuid, actor: Uuid) -> AppResult<ProfileView> {
        let user = self
            .users
            .restore(Filter::by_id(user_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("user not found or account is not freezed"))?;
        info!(user_id = %user_id, actor = %actor, "account restored");
        self.view(user).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid) -> AppResult<()> {
        let user = self
            .users
            .find_one_and_delete(Filter::by_id(user_id))
            .await?
            .ok_or_else(|| AppError::not_found("user not found or account must be freezed first"))?;
        if let Some(key) = user.profile_picture.as_deref() {
            if !key.starts_with("http") {
                storage::remove(self.storage.as_ref(), key).await;
            }
        }
        info!(user_id = %user_id, "account deleted");
        Ok(())
    }
}
