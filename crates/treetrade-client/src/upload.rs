use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use treetrade_types::models::ListingDraft;

use crate::backend::Backend;
use crate::error::{ClientError, Result};

/// Image attachment for the listing form, with a progress value for a
/// progress bar. `None` means no upload is running.
pub struct ImageUpload {
    progress: Arc<watch::Sender<Option<f64>>>,
}

impl ImageUpload {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            progress: Arc::new(tx),
        }
    }

    pub fn progress(&self) -> Option<f64> {
        *self.progress.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<f64>> {
        self.progress.subscribe()
    }

    /// Upload `bytes` and make the result the draft's only image.
    pub async fn upload<B: Backend>(
        &self,
        backend: &B,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        draft: &mut ListingDraft,
    ) -> Result<String> {
        if !content_type.starts_with("image/") {
            return Err(ClientError::InvalidImage);
        }

        let ext = file_name.rsplit('.').next().unwrap_or("bin");
        let path = format!("listings/{}.{}", Uuid::new_v4().simple(), ext);

        self.progress.send_replace(Some(0.0));
        let tx = self.progress.clone();
        let result = backend
            .upload_image(path.clone(), bytes, move |p| {
                tx.send_replace(Some(p.percent()));
            })
            .await;
        self.progress.send_replace(None);

        match result {
            Ok(url) => {
                info!("Uploaded {} as {}", file_name, path);
                draft.images = vec![url.clone()];
                Ok(url)
            }
            Err(ClientError::NotSignedIn) => Err(ClientError::NotSignedIn),
            Err(e) => {
                error!("Error uploading image: {}", e);
                Err(ClientError::Upload(e.to_string()))
            }
        }
    }
}

impl Default for ImageUpload {
    fn default() -> Self {
        Self::new()
    }
}

/// Content type guessed from a file extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_image_types() {
        assert_eq!(guess_content_type("lamp.PNG"), "image/png");
        assert_eq!(guess_content_type("photo.final.jpeg"), "image/jpeg");
        assert_eq!(guess_content_type("notes.txt"), "application/octet-stream");
        assert_eq!(guess_content_type("README"), "application/octet-stream");
    }

    #[test]
    fn starts_idle() {
        let upload = ImageUpload::new();
        assert_eq!(upload.progress(), None);
        assert_eq!(*upload.watch().borrow(), None);
    }
}
