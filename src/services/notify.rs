use std::sync::Arc;

use axum::body::Bytes;
use http::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::db::{CredentialsRepository, NewPicture, PictureRepository};
use crate::error::{AppError, AppResult};
use crate::services::blobstore::write_blob;
use crate::services::mirror::{
    Location, Media, MenuAction, MenuItem, MirrorApi, NotificationConfig, NotificationLevel,
    TimelineItem,
};
use crate::services::palette;
use crate::AppState;

const COLLECTION_LOCATIONS: &str = "locations";
const COLLECTION_TIMELINE: &str = "timeline";

const ACTION_SHARE: &str = "SHARE";

const JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserAction {
    #[serde(rename = "type", default)]
    pub action_type: String,
}

/// Body of a Mirror push notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub user_token: String,
    pub collection: Option<String>,
    pub item_id: Option<String>,
    /// Absent and `null` both mean no actions.
    #[serde(default)]
    pub user_actions: Option<Vec<UserAction>>,
    pub operation: Option<String>,
    pub verify_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Location {
        item_id: String,
    },
    /// `item_id` is only needed once a SHARE is seen.
    Timeline {
        item_id: Option<String>,
        user_actions: Vec<UserAction>,
    },
    Ignored {
        collection: Option<String>,
    },
}

impl NotificationPayload {
    pub fn notification(&self) -> AppResult<Notification> {
        let item_id = self.item_id.clone().filter(|id| !id.is_empty());

        match self.collection.as_deref() {
            Some(COLLECTION_LOCATIONS) => Ok(Notification::Location {
                item_id: item_id.ok_or_else(missing_item_id)?,
            }),
            Some(COLLECTION_TIMELINE) => Ok(Notification::Timeline {
                item_id,
                user_actions: self.user_actions.clone().unwrap_or_default(),
            }),
            other => Ok(Notification::Ignored {
                collection: other.map(str::to_string),
            }),
        }
    }
}

/// What a notification led to. Only used for logging and tests; the sender
/// always sees a plain 200 once the payload is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    LocationPosted,
    Shared { picture_id: String },
    Duplicate { picture_id: String },
    NoUserAction,
    UnrecognizedAction(String),
    NoAttachment,
    AttachmentUnavailable(u16),
    Ignored,
    Failed(String),
}

pub struct NotifyService;

impl NotifyService {
    /// Handle one raw notification body.
    ///
    /// Malformed payloads and unknown users are returned as errors so the
    /// route can answer 4xx. Anything failing after that point is logged and
    /// reported as [`NotifyOutcome::Failed`].
    pub async fn handle(state: &Arc<AppState>, body: &[u8]) -> AppResult<NotifyOutcome> {
        tracing::info!(
            "Got a notification with payload {}",
            String::from_utf8_lossy(body)
        );

        match Self::dispatch(state, body).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                tracing::error!("Failed to handle notification: {}", e);
                Ok(NotifyOutcome::Failed(e.to_string()))
            }
        }
    }

    pub fn parse_payload(body: &[u8]) -> AppResult<NotificationPayload> {
        let payload: NotificationPayload = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedPayload(format!("Invalid payload: {}", e)))?;

        if payload.user_token.is_empty() {
            return Err(AppError::MalformedPayload("Empty userToken".to_string()));
        }
        Ok(payload)
    }

    async fn dispatch(state: &Arc<AppState>, body: &[u8]) -> AppResult<NotifyOutcome> {
        let payload = Self::parse_payload(body)?;

        if let Some(ref expected) = state.config.notify.verify_token {
            if payload.verify_token.as_deref() != Some(expected.as_str()) {
                return Err(AppError::UnauthorizedUser(format!(
                    "Verify token mismatch for user {}",
                    payload.user_token
                )));
            }
        }

        let notification = payload.notification()?;
        tracing::debug!(
            "Notification operation={:?} collection={:?}",
            payload.operation,
            payload.collection
        );
        let user_token = payload.user_token;

        let credentials = CredentialsRepository::find_by_user_token(&state.db, &user_token)
            .await?
            .ok_or_else(|| {
                AppError::UnauthorizedUser(format!("No stored credentials for user {}", user_token))
            })?;

        match notification {
            Notification::Location { item_id } => {
                let client = state.mirror.client_for(&state.db, credentials).await?;
                Self::react_to_location(client.as_ref(), &item_id).await?;
                Ok(NotifyOutcome::LocationPosted)
            }
            Notification::Timeline {
                item_id,
                user_actions,
            } => {
                let client = state.mirror.client_for(&state.db, credentials).await?;
                Self::react_to_timeline(
                    state,
                    client.as_ref(),
                    &user_token,
                    item_id.as_deref(),
                    &user_actions,
                )
                .await
            }
            Notification::Ignored { collection } => {
                tracing::info!(
                    "Ignoring notification for collection {:?} (user {})",
                    collection,
                    user_token
                );
                Ok(NotifyOutcome::Ignored)
            }
        }
    }

    /// Post a card describing the user's new location.
    pub async fn react_to_location(client: &dyn MirrorApi, item_id: &str) -> AppResult<()> {
        let location = client.get_location(item_id).await?;
        let text = location_text(&location);

        let card = TimelineItem {
            text: Some(text),
            location: Some(location),
            menu_items: vec![MenuItem::new(MenuAction::Navigate)],
            notification: Some(default_notification()),
            ..Default::default()
        };
        let inserted = client.insert_timeline_item(&card, None).await?;

        tracing::info!("Posted location card {:?}", inserted.id);
        Ok(())
    }

    /// Only the first user action is looked at, whatever it is.
    pub async fn react_to_timeline(
        state: &Arc<AppState>,
        client: &dyn MirrorApi,
        user_token: &str,
        item_id: Option<&str>,
        user_actions: &[UserAction],
    ) -> AppResult<NotifyOutcome> {
        let Some(action) = user_actions.first() else {
            tracing::debug!("Timeline notification for {:?} carries no user action", item_id);
            return Ok(NotifyOutcome::NoUserAction);
        };

        if action.action_type != ACTION_SHARE {
            tracing::info!(
                "I don't know what to do with this notification: {:?}",
                action
            );
            return Ok(NotifyOutcome::UnrecognizedAction(action.action_type.clone()));
        }

        let item_id = item_id.ok_or_else(missing_item_id)?;
        Self::react_to_share(state, client, user_token, item_id).await
    }

    async fn react_to_share(
        state: &Arc<AppState>,
        client: &dyn MirrorApi,
        user_token: &str,
        item_id: &str,
    ) -> AppResult<NotifyOutcome> {
        let item = client.get_timeline_item(item_id).await?;
        let Some(first) = item.attachments.first() else {
            tracing::debug!("Shared item {} has no attachments", item_id);
            return Ok(NotifyOutcome::NoAttachment);
        };

        let source_key = share_source_key(item_id, &first.id);
        if state.config.notify.share_dedup {
            if let Some(existing) =
                PictureRepository::find_by_source_key(&state.db, user_token, &source_key).await?
            {
                tracing::info!(
                    "Share of item {} attachment {} already processed as picture {}",
                    item_id,
                    first.id,
                    existing.id
                );
                return Ok(NotifyOutcome::Duplicate {
                    picture_id: existing.id,
                });
            }
        }

        let attachment = client.get_attachment(item_id, &first.id).await?;
        let content_url = attachment
            .content_url
            .or_else(|| first.content_url.clone())
            .ok_or_else(|| {
                AppError::UpstreamFetch(format!("Attachment {} has no content URL", first.id))
            })?;

        let content = client.fetch_content(&content_url).await?;
        if content.status != StatusCode::OK {
            tracing::info!("Unable to retrieve attachment: {}", content.status);
            return Ok(NotifyOutcome::AttachmentUnavailable(content.status.as_u16()));
        }
        let picture = content.body;

        let palette = {
            let picture = picture.clone();
            let config = state.config.palette.clone();
            tokio::task::spawn_blocking(move || palette::render_palette(&picture, &config))
                .await
                .map_err(|e| AppError::Internal(e.into()))??
        };

        let picture_type = attachment
            .content_type
            .or_else(|| first.content_type.clone())
            .unwrap_or_else(|| JPEG_MIME.to_string());
        let picture_key = write_blob(state.blobs.as_ref(), &picture_type, &picture).await?;
        let palette_key = write_blob(state.blobs.as_ref(), JPEG_MIME, &palette).await?;

        let record = PictureRepository::create(
            &state.db,
            &NewPicture {
                owner: user_token,
                picture: picture_key.as_str(),
                palette: palette_key.as_str(),
                source_key: Some(&source_key),
            },
        )
        .await?;

        let card = TimelineItem {
            menu_items: vec![
                MenuItem::new(MenuAction::Share),
                MenuItem::new(MenuAction::Delete),
            ],
            notification: Some(default_notification()),
            ..Default::default()
        };
        let media = Media {
            content_type: JPEG_MIME.to_string(),
            data: Bytes::from(palette),
        };
        client.insert_timeline_item(&card, Some(media)).await?;
        client.delete_timeline_item(item_id).await?;

        tracing::info!(
            "Processed shared picture {} for user {} (picture={}, palette={})",
            record.id,
            user_token,
            picture_key,
            palette_key
        );
        Ok(NotifyOutcome::Shared {
            picture_id: record.id,
        })
    }
}

fn missing_item_id() -> AppError {
    AppError::MalformedPayload("Missing itemId".to_string())
}

fn default_notification() -> NotificationConfig {
    NotificationConfig {
        level: NotificationLevel::Default,
    }
}

/// Coordinates are printed exactly as the API returned them.
fn location_text(location: &Location) -> String {
    let coord = |n: &Option<serde_json::Number>| {
        n.as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };
    format!(
        "New location is {}, {}",
        coord(&location.latitude),
        coord(&location.longitude)
    )
}

/// Stable key for one attachment of one timeline item.
fn share_source_key(item_id: &str, attachment_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item_id.as_bytes());
    hasher.update(b":");
    hasher.update(attachment_id.as_bytes());
    hex::encode(hasher.finalize())
}
