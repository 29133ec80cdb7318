//! mixi Voice status updates

use reqwest::Method;

use super::client::{ApiClient, ApiResponse};
use super::multipart::Form;
use crate::auth::SessionStore;
use crate::error::Result;

pub const STATUS_UPDATE_ENDPOINT: &str = "/2/voice/statuses/update";

/// Field carrying an attached photo
pub const PHOTO_FIELD: &str = "photo";

impl<S: SessionStore> ApiClient<S> {
    /// Post a voice status. Sent as multipart when a `photo` is attached.
    pub async fn post_voice(&mut self, params: Form) -> Result<ApiResponse> {
        let multipart = params.contains(PHOTO_FIELD);
        self.call(STATUS_UPDATE_ENDPOINT, Method::POST, params, true, multipart)
            .await
    }
}
