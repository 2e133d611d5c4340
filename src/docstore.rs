//! Remote document store: session handling, archive rotation and upload.

use crate::config::DocStoreConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use log::{info, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;

const ODATA_JSON: &str = "application/json;odata=nometadata";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ServerRelativeUrl")]
    pub path: String,
}

/// Operations the archive/upload routine needs from an authenticated store session.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteEntry>, PipelineError>;

    /// Creates `folder` if it does not exist yet.
    async fn ensure_folder(&self, folder: &str) -> Result<(), PipelineError>;

    /// Moves a file, replacing anything already at `to`.
    async fn move_file(&self, from: &str, to: &str) -> Result<(), PipelineError>;

    async fn upload(&self, folder: &str, name: &str, bytes: Vec<u8>) -> Result<(), PipelineError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct FileListing {
    value: Vec<RemoteEntry>,
}

#[derive(Deserialize)]
struct FolderInfo {
    #[serde(rename = "Exists", default)]
    exists: bool,
}

/// An authenticated session against a SharePoint-style REST store.
pub struct SharePointStore {
    client: reqwest::Client,
    site_url: String,
    bearer: String,
}

impl SharePointStore {
    pub async fn connect(
        client: reqwest::Client,
        config: &DocStoreConfig,
    ) -> Result<Self, PipelineError> {
        let resp = client
            .post(&config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("scope", config.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::RemoteAuth(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::RemoteAuth(PipelineError::describe_response(
                status, &body,
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::RemoteAuth(format!("invalid token response: {}", e)))?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::RemoteAuth("token response had no access_token".into()))?;

        Ok(Self {
            client,
            site_url: config.site_url.trim_end_matches('/').to_string(),
            bearer: format!("Bearer {}", access_token),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/_api/web/{}", self.site_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, (Option<StatusCode>, String)> {
        let resp = request
            .header(AUTHORIZATION, &self.bearer)
            .header(ACCEPT, ODATA_JSON)
            .send()
            .await
            .map_err(|e| (None, e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err((Some(status), PipelineError::describe_response(status, &body)))
        }
    }
}

/// Quotes a value as an OData string literal.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl RemoteStore for SharePointStore {
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteEntry>, PipelineError> {
        let url = self.api(&format!(
            "GetFolderByServerRelativeUrl({})/Files",
            odata_literal(folder)
        ));
        let resp = self
            .send(self.client.get(url))
            .await
            .map_err(|(_, msg)| PipelineError::Archive(format!("listing {}: {}", folder, msg)))?;
        let listing: FileListing = resp
            .json()
            .await
            .map_err(|e| PipelineError::Archive(format!("listing {}: {}", folder, e)))?;
        Ok(listing.value)
    }

    async fn ensure_folder(&self, folder: &str) -> Result<(), PipelineError> {
        let probe = self.api(&format!(
            "GetFolderByServerRelativeUrl({})",
            odata_literal(folder)
        ));
        match self.send(self.client.get(probe)).await {
            Ok(resp) => {
                let info: FolderInfo = resp.json().await.map_err(|e| {
                    PipelineError::Archive(format!("probing {}: {}", folder, e))
                })?;
                if info.exists {
                    return Ok(());
                }
            }
            Err((Some(StatusCode::NOT_FOUND), _)) => {}
            Err((_, msg)) => {
                return Err(PipelineError::Archive(format!("probing {}: {}", folder, msg)))
            }
        }

        info!("Creating folder {}", folder);
        let create = self.api(&format!("folders/add({})", odata_literal(folder)));
        self.send(self.client.post(create))
            .await
            .map_err(|(_, msg)| PipelineError::Archive(format!("creating {}: {}", folder, msg)))?;
        Ok(())
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<(), PipelineError> {
        let url = self.api(&format!(
            "GetFileByServerRelativeUrl({})/moveto(newurl={},flags=1)",
            odata_literal(from),
            odata_literal(to)
        ));
        self.send(self.client.post(url))
            .await
            .map_err(|(_, msg)| PipelineError::Archive(format!("moving {}: {}", from, msg)))?;
        Ok(())
    }

    async fn upload(&self, folder: &str, name: &str, bytes: Vec<u8>) -> Result<(), PipelineError> {
        let url = self.api(&format!(
            "GetFolderByServerRelativeUrl({})/Files/add(url={},overwrite=true)",
            odata_literal(folder),
            odata_literal(name)
        ));
        self.send(self.client.post(url).body(bytes))
            .await
            .map_err(|(_, msg)| {
                PipelineError::Upload(format!("uploading {} to {}: {}", name, folder, msg))
            })?;
        Ok(())
    }
}

/// `report.csv` at `2025-01-31 14:25:01` becomes `report_20250131_142501.csv`.
pub fn timestamped_name(filename: &str, now: NaiveDateTime) -> String {
    let (stem, ext) = split_extension(filename);
    format!("{}_{}{}", stem, now.format("%Y%m%d_%H%M%S"), ext)
}

/// `report.csv` archived on 2025-01-31 becomes `report_20250131.csv`.
pub fn archived_name(filename: &str, date: NaiveDate) -> String {
    let (stem, ext) = split_extension(filename);
    format!("{}_{}{}", stem, date.format("%Y%m%d"), ext)
}

/// Splits off the extension including its dot; `""` when there is none.
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(i) if i > 0 => filename.split_at(i),
        _ => (filename, ""),
    }
}

/// The report series a remote filename belongs to: its stem without a trailing
/// `_YYYYMMDD_HHMMSS` stamp.
fn series_of(filename: &str) -> &str {
    let (stem, _) = split_extension(filename);
    let stamp_len = "_YYYYMMDD_HHMMSS".len();
    if stem.len() > stamp_len && stem.is_char_boundary(stem.len() - stamp_len) {
        let (base, stamp) = stem.split_at(stem.len() - stamp_len);
        if NaiveDateTime::parse_from_str(stamp, "_%Y%m%d_%H%M%S").is_ok() {
            return base;
        }
    }
    stem
}

fn belongs_to_series(filename: &str, series: &str, ext: &str) -> bool {
    let (_, file_ext) = split_extension(filename);
    file_ext.eq_ignore_ascii_case(ext) && series_of(filename) == series
}

/// Moves every file of `series` with extension `ext` out of `folder` into its archive
/// subfolder under a date-suffixed name. Best-effort: failures are logged and skipped.
/// Returns the number of files archived.
pub async fn archive_existing<S: RemoteStore + ?Sized>(
    store: &S,
    folder: &str,
    archive_folder: &str,
    series: &str,
    ext: &str,
    today: NaiveDate,
) -> usize {
    let entries = match store.list_files(folder).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Skipping archive of {}: {}", folder, e);
            return 0;
        }
    };

    let targets: Vec<RemoteEntry> = entries
        .into_iter()
        .filter(|e| belongs_to_series(&e.name, series, ext))
        .collect();
    if targets.is_empty() {
        return 0;
    }

    let archive_path = format!("{}/{}", folder.trim_end_matches('/'), archive_folder);
    if let Err(e) = store.ensure_folder(&archive_path).await {
        warn!("Skipping archive of {}: {}", folder, e);
        return 0;
    }

    let mut archived = 0;
    for entry in targets {
        let destination = format!("{}/{}", archive_path, archived_name(&entry.name, today));
        match store.move_file(&entry.path, &destination).await {
            Ok(()) => {
                info!("Archived {} -> {}", entry.path, destination);
                archived += 1;
            }
            Err(e) => warn!("Could not archive {}: {}", entry.path, e),
        }
    }
    archived
}

/// Publishes local report files: authenticates, rotates the previous copies into the
/// archive folder, then uploads the new file.
pub struct Gateway {
    client: reqwest::Client,
    config: DocStoreConfig,
}

impl Gateway {
    pub fn new(client: reqwest::Client, config: DocStoreConfig) -> Self {
        Self { client, config }
    }

    pub fn target_folder(&self) -> &str {
        &self.config.target_folder
    }

    pub async fn publish(
        &self,
        local_path: &Path,
        remote_filename: &str,
        target_folder: &str,
    ) -> Result<(), PipelineError> {
        let store = SharePointStore::connect(self.client.clone(), &self.config).await?;
        let today = chrono::Local::now().date_naive();
        publish_to(
            &store,
            local_path,
            remote_filename,
            target_folder,
            &self.config.archive_folder,
            today,
        )
        .await
    }
}

pub async fn publish_to<S: RemoteStore + ?Sized>(
    store: &S,
    local_path: &Path,
    remote_filename: &str,
    target_folder: &str,
    archive_folder: &str,
    today: NaiveDate,
) -> Result<(), PipelineError> {
    let (_, ext) = split_extension(remote_filename);
    let series = series_of(remote_filename);
    let archived = archive_existing(store, target_folder, archive_folder, series, ext, today).await;
    if archived > 0 {
        info!("Archived {} previous file(s) of {}", archived, series);
    }

    let bytes = tokio::fs::read(local_path).await.map_err(|e| {
        PipelineError::Upload(format!("reading {}: {}", local_path.display(), e))
    })?;
    let size = bytes.len();
    store.upload(target_folder, remote_filename, bytes).await?;
    info!(
        "Uploaded {} ({} bytes) to {}",
        remote_filename, size, target_folder
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use wiremock::matchers::{body_string, body_string_contains, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Files keyed by full path, plus the set of folders that exist.
    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        folders: Mutex<BTreeSet<String>>,
        fail_moves: bool,
        fail_listing: bool,
    }

    impl MemoryStore {
        fn with_files(files: &[(&str, &str)]) -> Self {
            let store = MemoryStore::default();
            for (path, body) in files {
                store
                    .files
                    .lock()
                    .unwrap()
                    .insert(path.to_string(), body.as_bytes().to_vec());
            }
            store
        }

        fn contents(&self, path: &str) -> Option<String> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|b| String::from_utf8(b.clone()).unwrap())
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        async fn list_files(&self, folder: &str) -> Result<Vec<RemoteEntry>, PipelineError> {
            if self.fail_listing {
                return Err(PipelineError::Archive("listing unavailable".into()));
            }
            let prefix = format!("{}/", folder);
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter_map(|p| {
                    let name = p.strip_prefix(&prefix)?;
                    (!name.contains('/')).then(|| RemoteEntry {
                        name: name.to_string(),
                        path: p.clone(),
                    })
                })
                .collect())
        }

        async fn ensure_folder(&self, folder: &str) -> Result<(), PipelineError> {
            self.folders.lock().unwrap().insert(folder.to_string());
            Ok(())
        }

        async fn move_file(&self, from: &str, to: &str) -> Result<(), PipelineError> {
            if self.fail_moves {
                return Err(PipelineError::Archive(format!("cannot move {}", from)));
            }
            let mut files = self.files.lock().unwrap();
            let body = files
                .remove(from)
                .ok_or_else(|| PipelineError::Archive(format!("{} not found", from)))?;
            files.insert(to.to_string(), body);
            Ok(())
        }

        async fn upload(
            &self,
            folder: &str,
            name: &str,
            bytes: Vec<u8>,
        ) -> Result<(), PipelineError> {
            self.files
                .lock()
                .unwrap()
                .insert(format!("{}/{}", folder, name), bytes);
            Ok(())
        }
    }

    fn jan_31() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    #[test]
    fn names_are_stamped_before_the_extension() {
        let now = jan_31().and_hms_opt(14, 25, 1).unwrap();
        assert_eq!(timestamped_name("report.csv", now), "report_20250131_142501.csv");
        assert_eq!(archived_name("report.csv", jan_31()), "report_20250131.csv");
        assert_eq!(archived_name("README", jan_31()), "README_20250131");
    }

    #[test]
    fn series_strips_upload_timestamp_only() {
        assert_eq!(series_of("report_20250131_142501.csv"), "report");
        assert_eq!(series_of("report.csv"), "report");
        assert_eq!(series_of("report_final.csv"), "report_final");
    }

    #[test]
    fn series_membership() {
        assert!(belongs_to_series("report.csv", "report", ".csv"));
        assert!(belongs_to_series("report_20250130_080000.csv", "report", ".CSV"));
        assert!(!belongs_to_series("report_summary.csv", "report", ".csv"));
        assert!(!belongs_to_series("report.xlsx", "report", ".csv"));
        assert!(!belongs_to_series("other.csv", "report", ".csv"));
        assert!(!belongs_to_series(
            "warehouse_locations_2_20250131_085959.csv",
            "warehouse_locations",
            ".csv"
        ));
        assert!(!belongs_to_series("report_2.csv", "report", ".csv"));
    }

    #[tokio::test]
    async fn archive_leaves_sibling_series_alone() {
        let store = MemoryStore::with_files(&[
            ("/Reports/warehouse_locations_20250130_090000.csv", "old"),
            ("/Reports/warehouse_locations_2_20250131_085959.csv", "fresh sibling"),
        ]);

        let archived = archive_existing(
            &store,
            "/Reports",
            "Archive",
            series_of("warehouse_locations_20250131_090000.csv"),
            ".csv",
            jan_31(),
        )
        .await;

        assert_eq!(archived, 1);
        assert_eq!(
            store
                .contents("/Reports/warehouse_locations_2_20250131_085959.csv")
                .as_deref(),
            Some("fresh sibling")
        );
        assert!(store
            .contents("/Reports/Archive/warehouse_locations_20250130_090000_20250131.csv")
            .is_some());
    }

    #[test]
    fn odata_literals_escape_quotes() {
        assert_eq!(odata_literal("/sites/o'neil"), "'/sites/o''neil'");
    }

    #[tokio::test]
    async fn archive_moves_existing_file_with_date_suffix() {
        let store = MemoryStore::with_files(&[
            ("/Reports/report.csv", "old"),
            ("/Reports/Archive/report_20250131.csv", "older"),
            ("/Reports/other.csv", "keep"),
        ]);

        let archived = archive_existing(&store, "/Reports", "Archive", "report", ".csv", jan_31()).await;

        assert_eq!(archived, 1);
        assert_eq!(store.contents("/Reports/report.csv"), None);
        assert_eq!(
            store.contents("/Reports/Archive/report_20250131.csv").as_deref(),
            Some("old")
        );
        assert_eq!(store.contents("/Reports/other.csv").as_deref(), Some("keep"));
        assert!(store.folders.lock().unwrap().contains("/Reports/Archive"));
    }

    #[tokio::test]
    async fn publish_archives_then_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        tokio::fs::write(&local, "x\n1\n").await.unwrap();
        let store = MemoryStore::with_files(&[("/Reports/report_20250130_080000.csv", "old")]);

        publish_to(
            &store,
            &local,
            "report_20250131_090000.csv",
            "/Reports",
            "Archive",
            jan_31(),
        )
        .await
        .unwrap();

        assert_eq!(
            store.contents("/Reports/report_20250131_090000.csv").as_deref(),
            Some("x\n1\n")
        );
        assert_eq!(
            store
                .contents("/Reports/Archive/report_20250130_080000_20250131.csv")
                .as_deref(),
            Some("old")
        );
    }

    #[tokio::test]
    async fn archive_failures_do_not_block_upload() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        tokio::fs::write(&local, "new").await.unwrap();

        let mut store = MemoryStore::with_files(&[("/Reports/report.csv", "old")]);
        store.fail_moves = true;
        publish_to(&store, &local, "report_20250131_090000.csv", "/Reports", "Archive", jan_31())
            .await
            .unwrap();
        assert_eq!(store.contents("/Reports/report.csv").as_deref(), Some("old"));
        assert_eq!(
            store.contents("/Reports/report_20250131_090000.csv").as_deref(),
            Some("new")
        );

        let mut store = MemoryStore::default();
        store.fail_listing = true;
        publish_to(&store, &local, "report_20250131_090000.csv", "/Reports", "Archive", jan_31())
            .await
            .unwrap();
        assert!(store.contents("/Reports/report_20250131_090000.csv").is_some());
    }

    #[tokio::test]
    async fn missing_local_file_is_an_upload_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();

        let err = publish_to(
            &store,
            &dir.path().join("gone.csv"),
            "gone.csv",
            "/Reports",
            "Archive",
            jan_31(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Upload(_)));
    }

    fn docstore_config(server: &MockServer) -> DocStoreConfig {
        DocStoreConfig {
            site_url: format!("{}/sites/ops", server.uri()),
            token_url: format!("{}/oauth/token", server.uri()),
            client_id: "client".to_string(),
            client_secret: "shh".to_string(),
            scope: "docs".to_string(),
            target_folder: "/sites/ops/Reports".to_string(),
            archive_folder: "Archive".to_string(),
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "doc-tok"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn connect_failure_is_remote_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let result = SharePointStore::connect(reqwest::Client::new(), &docstore_config(&server)).await;
        assert!(matches!(result, Err(PipelineError::RemoteAuth(_))));
    }

    #[tokio::test]
    async fn gateway_publish_over_rest() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/sites/ops/_api/web/GetFolderByServerRelativeUrl('/sites/ops/Reports')/Files"))
            .and(header("authorization", "Bearer doc-tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [
                {"Name": "report.csv", "ServerRelativeUrl": "/sites/ops/Reports/report.csv"},
                {"Name": "notes.txt", "ServerRelativeUrl": "/sites/ops/Reports/notes.txt"}
            ]})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sites/ops/_api/web/GetFolderByServerRelativeUrl('/sites/ops/Reports/Archive')"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sites/ops/_api/web/folders/add('/sites/ops/Reports/Archive')"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(
                r"^/sites/ops/_api/web/GetFileByServerRelativeUrl\('/sites/ops/Reports/report\.csv'\)/moveto\(newurl='/sites/ops/Reports/Archive/report_\d{8}\.csv',flags=1\)$",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(
                "/sites/ops/_api/web/GetFolderByServerRelativeUrl('/sites/ops/Reports')/Files/add(url='report_20250131_090000.csv',overwrite=true)",
            ))
            .and(body_string("a,b\n1,2\n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        tokio::fs::write(&local, "a,b\n1,2\n").await.unwrap();

        let gateway = Gateway::new(reqwest::Client::new(), docstore_config(&server));
        gateway
            .publish(&local, "report_20250131_090000.csv", "/sites/ops/Reports")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gateway_upload_rejection_is_upload_error() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/sites/ops/_api/web/GetFolderByServerRelativeUrl('/sites/ops/Reports')/Files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"/Files/add\(.*\)$"))
            .respond_with(ResponseTemplate::new(507).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        tokio::fs::write(&local, "a\n1\n").await.unwrap();

        let gateway = Gateway::new(reqwest::Client::new(), docstore_config(&server));
        let err = gateway
            .publish(&local, "report_20250131_090000.csv", "/sites/ops/Reports")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Upload(_)));
    }
}
