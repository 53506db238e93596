use tracing::info;

use crate::{
    backend::Backend,
    error::{AppError, AppResult},
    models::Requester,
};

pub const POSTER_BUCKET: &str = "posters";
const MAX_POSTER_BYTES: usize = 5 * 1024 * 1024;

/// Object-safe file name: ASCII letters, digits, `.`, `-` and `_`, with
/// everything else collapsed to a single `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches(['_', '.']).to_string();
    if out.is_empty() { "poster".to_string() } else { out }
}

/// Store a poster image and return its public URL. Admin only.
pub async fn upload_poster<B: Backend>(
    backend: &B,
    requester: &Requester,
    bytes: Vec<u8>,
    file_name: &str,
    content_type: &str,
) -> AppResult<String> {
    if !requester.is_admin {
        return Err(AppError::forbidden("only admins can upload posters"));
    }
    if bytes.is_empty() {
        return Err(AppError::invalid("poster file is empty"));
    }
    if bytes.len() > MAX_POSTER_BYTES {
        return Err(AppError::invalid("poster file is larger than 5 MB"));
    }
    if !content_type.starts_with("image/") {
        return Err(AppError::invalid("poster must be an image"));
    }

    let path = format!("{}_{}", jiff::Timestamp::now().as_millisecond(), sanitize_file_name(file_name));
    let url = backend.upload(POSTER_BUCKET, &path, bytes, content_type).await?;
    info!(user_id = %requester.id, %path, "poster uploaded");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn admin() -> Requester {
        Requester { id: "admin".into(), is_admin: true }
    }

    #[test]
    fn file_names_are_made_object_safe() {
        assert_eq!(sanitize_file_name("My Poster (final).JPG"), "My_Poster_final_.JPG");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("  "), "poster");
    }

    #[tokio::test]
    async fn admin_upload_lands_in_poster_bucket() {
        let backend = MemoryBackend::new();

        let url = upload_poster(&backend, &admin(), vec![0xFF; 16], "dune part two.png", "image/png")
            .await
            .unwrap();

        let uploads = backend.uploads();
        assert_eq!(uploads.len(), 1);
        let (bucket, path, size) = &uploads[0];
        assert_eq!(bucket, POSTER_BUCKET);
        assert!(path.ends_with("_dune_part_two.png"), "{path}");
        assert!(path.split('_').next().unwrap().parse::<i64>().is_ok());
        assert_eq!(*size, 16);
        assert!(url.ends_with(path.as_str()));
    }

    #[tokio::test]
    async fn non_admins_and_bad_files_are_rejected() {
        let backend = MemoryBackend::new();
        let user = Requester { id: "u".into(), is_admin: false };

        assert_matches!(
            upload_poster(&backend, &user, vec![1], "a.png", "image/png").await,
            Err(AppError::Forbidden(_))
        );
        assert_matches!(
            upload_poster(&backend, &admin(), Vec::new(), "a.png", "image/png").await,
            Err(AppError::InvalidArgument(_))
        );
        assert_matches!(
            upload_poster(&backend, &admin(), vec![1], "a.txt", "text/plain").await,
            Err(AppError::InvalidArgument(_))
        );
        assert!(backend.uploads().is_empty());
    }

    #[tokio::test]
    async fn storage_failures_propagate() {
        let backend = MemoryBackend::new();
        backend.fail_uploads();

        assert_matches!(
            upload_poster(&backend, &admin(), vec![1], "a.png", "image/png").await,
            Err(AppError::Backend { status: Some(503), .. })
        );
    }
}
