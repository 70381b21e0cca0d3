//! Article file storage.
//!
//! Three backends share one interface: a local directory, a Supabase Storage
//! bucket reached over its REST API, and the `articles.file_data` column.
//! For the database backend the bytes travel through the article queries;
//! this module only produces the key and validates the upload.

use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::AppError;

const ALLOWED_MIMETYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
    "text/plain",
];

/// A validated upload ready to be stored.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

/// `text/plain; charset=utf-8` becomes `text/plain`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl Upload {
    /// Checks size and type. The declared content type wins unless it is
    /// missing or generic, in which case the file name decides.
    pub fn new(
        original_name: &str,
        declared_type: Option<&str>,
        data: Vec<u8>,
        max_bytes: usize,
    ) -> Result<Self, AppError> {
        if data.is_empty() {
            return Err(AppError::bad_request("Uploaded file is empty"));
        }
        if data.len() > max_bytes {
            return Err(AppError::bad_request(format!(
                "Uploaded file exceeds the {} byte limit",
                max_bytes
            )));
        }

        let declared = declared_type.map(essence);
        let mimetype = match declared {
            Some(t) if !t.is_empty() && t != "application/octet-stream" => t,
            _ => mime_guess::from_path(original_name)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string(),
        };

        if !ALLOWED_MIMETYPES.contains(&mimetype.as_str()) {
            return Err(AppError::bad_request(format!(
                "File type '{}' is not accepted",
                mimetype
            )));
        }

        Ok(Self {
            original_name: sanitize_filename(original_name),
            mimetype,
            data,
        })
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }
}

/// Keeps ASCII letters, digits, dot, dash and underscore. Path separators
/// and anything else become underscores.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

pub fn generate_object_key(original_name: &str) -> String {
    format!(
        "{}_{}_{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &Uuid::new_v4().simple().to_string()[..8],
        sanitize_filename(original_name)
    )
}

pub enum FileStore {
    Local {
        upload_folder: PathBuf,
    },
    Supabase {
        client: reqwest::Client,
        url: String,
        key: String,
        bucket: String,
    },
    Database,
}

impl FileStore {
    pub fn from_config(config: &StorageConfig) -> std::io::Result<Self> {
        Ok(match config {
            StorageConfig::Local { upload_folder } => {
                ensure_dir(upload_folder)?;
                FileStore::Local {
                    upload_folder: upload_folder.clone(),
                }
            }
            StorageConfig::Supabase { url, key, bucket } => FileStore::Supabase {
                client: reqwest::Client::new(),
                url: url.clone(),
                key: key.clone(),
                bucket: bucket.clone(),
            },
            StorageConfig::Database => FileStore::Database,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            FileStore::Local { .. } => "local",
            FileStore::Supabase { .. } => "supabase",
            FileStore::Database => "database",
        }
    }

    /// Whether the bytes belong in the `file_data` column.
    pub fn stores_in_database(&self) -> bool {
        matches!(self, FileStore::Database)
    }

    /// Stores the upload and returns the key to keep in `file_path`.
    pub async fn save(&self, upload: &Upload) -> Result<String, AppError> {
        let key = generate_object_key(&upload.original_name);
        match self {
            FileStore::Local { upload_folder } => {
                let path = upload_folder.join(&key);
                tokio::fs::write(&path, &upload.data)
                    .await
                    .map_err(|e| AppError::Storage(format!("write {}: {}", path.display(), e)))?;
            }
            FileStore::Supabase {
                client,
                url,
                key: api_key,
                bucket,
            } => {
                let endpoint = format!("{}/storage/v1/object/{}/{}", url, bucket, key);
                let response = client
                    .post(&endpoint)
                    .bearer_auth(api_key)
                    .header("apikey", api_key.as_str())
                    .header("Content-Type", upload.mimetype.as_str())
                    .header("x-upsert", "false")
                    .body(upload.data.clone())
                    .send()
                    .await
                    .map_err(|e| AppError::Storage(format!("supabase upload: {}", e)))?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::Storage(format!(
                        "supabase upload returned {}: {}",
                        status, body
                    )));
                }
            }
            FileStore::Database => {}
        }
        tracing::info!(backend = self.backend_name(), key = %key, "Stored article file");
        Ok(key)
    }

    /// Reads a stored object. Returns `None` for the database backend, whose
    /// bytes are loaded with the article row.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        match self {
            FileStore::Local { upload_folder } => {
                let path = local_path(upload_folder, key)?;
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(AppError::not_found("Stored file not found"))
                    }
                    Err(e) => Err(AppError::Storage(format!("read {}: {}", path.display(), e))),
                }
            }
            FileStore::Supabase {
                client,
                url,
                key: api_key,
                bucket,
            } => {
                let endpoint = format!("{}/storage/v1/object/authenticated/{}/{}", url, bucket, key);
                let response = client
                    .get(&endpoint)
                    .bearer_auth(api_key)
                    .header("apikey", api_key.as_str())
                    .send()
                    .await
                    .map_err(|e| AppError::Storage(format!("supabase download: {}", e)))?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(AppError::not_found("Stored file not found"));
                }
                if !response.status().is_success() {
                    return Err(AppError::Storage(format!(
                        "supabase download returned {}",
                        response.status()
                    )));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| AppError::Storage(format!("supabase download: {}", e)))?;
                Ok(Some(bytes.to_vec()))
            }
            FileStore::Database => Ok(None),
        }
    }

    /// Removes a stored object. A missing object is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        match self {
            FileStore::Local { upload_folder } => {
                let path = local_path(upload_folder, key)?;
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(AppError::Storage(format!("remove {}: {}", path.display(), e))),
                }
            }
            FileStore::Supabase {
                client,
                url,
                key: api_key,
                bucket,
            } => {
                let endpoint = format!("{}/storage/v1/object/{}/{}", url, bucket, key);
                let response = client
                    .delete(&endpoint)
                    .bearer_auth(api_key)
                    .header("apikey", api_key.as_str())
                    .send()
                    .await
                    .map_err(|e| AppError::Storage(format!("supabase delete: {}", e)))?;
                let status = response.status();
                if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
                    Ok(())
                } else {
                    Err(AppError::Storage(format!(
                        "supabase delete returned {}",
                        status
                    )))
                }
            }
            FileStore::Database => Ok(()),
        }
    }
}

fn local_path(upload_folder: &Path, key: &str) -> Result<PathBuf, AppError> {
    if key.is_empty() || key.contains("..") || key.contains('/') || key.contains('\\') {
        return Err(AppError::bad_request("Invalid file key"));
    }
    Ok(upload_folder.join(key))
}

pub fn ensure_dir(upload_folder: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(upload_folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("paper.pdf", "paper.pdf")]
    #[case("../../etc/passwd", "passwd")]
    #[case("C:\\docs\\My Paper (v2).pdf", "My_Paper__v2_.pdf")]
    #[case(".hidden", "hidden")]
    #[case("", "file")]
    fn sanitizes_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_filename(input), expected);
    }

    #[test]
    fn object_key_keeps_sanitized_name() {
        let key = generate_object_key("my paper.pdf");
        assert!(key.ends_with("_my_paper.pdf"));
        assert!(!key.contains('/'));
    }

    #[test]
    fn upload_rejects_empty_and_oversized() {
        assert!(Upload::new("a.pdf", Some("application/pdf"), vec![], 10).is_err());
        assert!(Upload::new("a.pdf", Some("application/pdf"), vec![0; 11], 10).is_err());
    }

    #[test]
    fn upload_guesses_type_from_name() {
        let upload = Upload::new("paper.pdf", None, b"%PDF-1.4".to_vec(), 1024).unwrap();
        assert_eq!(upload.mimetype, "application/pdf");

        let upload = Upload::new(
            "notes.txt",
            Some("application/octet-stream"),
            b"hi".to_vec(),
            1024,
        )
        .unwrap();
        assert_eq!(upload.mimetype, "text/plain");
    }

    #[rstest]
    #[case("text/plain; charset=utf-8", "text/plain")]
    #[case("Application/PDF", "application/pdf")]
    #[case("application/pdf ; name=paper.pdf", "application/pdf")]
    fn upload_ignores_content_type_parameters(#[case] declared: &str, #[case] expected: &str) {
        let upload = Upload::new("paper", Some(declared), b"data".to_vec(), 1024).unwrap();
        assert_eq!(upload.mimetype, expected);
    }

    #[test]
    fn upload_rejects_disallowed_type() {
        let err = Upload::new("run.exe", None, vec![1, 2, 3], 1024).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn local_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::from_config(&StorageConfig::Local {
            upload_folder: dir.path().join("uploads"),
        })
        .unwrap();

        let upload = Upload::new("draft.txt", Some("text/plain"), b"hello".to_vec(), 1024).unwrap();
        let key = store.save(&upload).await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), Some(b"hello".to_vec()));

        store.delete(&key).await.unwrap();
        assert!(matches!(store.read(&key).await, Err(AppError::NotFound(_))));
        // Deleting twice is fine.
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn local_store_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::Local {
            upload_folder: dir.path().to_path_buf(),
        };
        assert!(matches!(
            store.read("../secret").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn database_store_keeps_nothing_outside_rows() {
        let store = FileStore::Database;
        assert!(store.stores_in_database());
        let upload = Upload::new("a.pdf", None, vec![1], 10).unwrap();
        let key = store.save(&upload).await.unwrap();
        assert!(key.ends_with("_a.pdf"));
        assert_eq!(store.read(&key).await.unwrap(), None);
    }
}
