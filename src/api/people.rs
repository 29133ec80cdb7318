//! People API (current user profile)

use super::client::ApiClient;
use super::multipart::Form;
use crate::auth::SessionStore;
use crate::error::Result;
use crate::models::Profile;

pub const SELF_ENDPOINT: &str = "/2/people/@me/@self/";

impl<S: SessionStore> ApiClient<S> {
    /// Profile of the authenticated user, fetched once and cached unless `force`.
    pub async fn current_user(&mut self, force: bool) -> Result<&Profile> {
        let cached = if force { None } else { self.user.take() };
        let profile = match cached {
            Some(profile) => profile,
            None => {
                let value = self
                    .get(SELF_ENDPOINT, Form::new())
                    .await?
                    .into_json()
                    .unwrap_or_default();
                serde_json::from_value(value)?
            }
        };
        let profile: &Profile = self.user.insert(profile);
        Ok(profile)
    }

    pub async fn user_id(&mut self) -> Result<String> {
        Ok(self.current_user(false).await?.entry.id.clone())
    }

    pub async fn user_name(&mut self) -> Result<Option<String>> {
        Ok(self.current_user(false).await?.entry.display_name.clone())
    }

    pub async fn user_thumbnail_url(&mut self) -> Result<Option<String>> {
        Ok(self.current_user(false).await?.entry.thumbnail_url.clone())
    }
}
