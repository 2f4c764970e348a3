use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authentication failed for {url}; check Jenkins credentials")]
    Auth { url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("request to {url} failed after {attempts} attempts")]
    Request {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write artifact to {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "Jenkins credentials not configured; set JENKINS_URL, JENKINS_USER \
         and JENKINS_API_TOKEN"
    )]
    MissingCredentials,
    #[error("failed to construct HTTP client")]
    Build(#[source] reqwest::Error),
}

/// Jenkins credentials, sourced from the environment and never persisted.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub url: String,
    pub user: String,
    pub token: String,
}

impl Credentials {
    pub fn from_env() -> Result<Credentials, Error> {
        let url = std::env::var("JENKINS_URL").unwrap_or_default();
        let user = std::env::var("JENKINS_USER").unwrap_or_default();
        let token = std::env::var("JENKINS_API_TOKEN").unwrap_or_default();

        if url.is_empty() || user.is_empty() || token.is_empty() {
            return Err(Error::MissingCredentials);
        }
        Ok(Credentials { url, user, token })
    }
}

/// Artifact entry as listed by the Jenkins tree API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Artifact {
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobInfo {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    /// Build start time, Unix milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    #[serde(default)]
    builds: Vec<BuildRef>,
}

#[derive(Debug, Deserialize)]
struct BuildRef {
    number: i64,
}

/// The surface of the Jenkins REST API the ingestion pipeline depends on.
/// Implemented by [`Client`] and by in-memory fakes in tests.
#[async_trait::async_trait]
pub trait JenkinsApi: Send + Sync {
    async fn get_artifacts_list(&self, job_url: &str) -> Result<Vec<Artifact>, Error>;
    async fn download_artifact(
        &self,
        job_url: &str,
        relative_path: &str,
        dest_path: &Path,
    ) -> Result<(), Error>;
    async fn get_job_builds(&self, job_url: &str, min_build: i64) -> Result<Vec<i64>, Error>;
    async fn get_job_info(&self, job_url: &str) -> Result<JobInfo, Error>;
    async fn download_build_map(&self, job_url: &str)
        -> Result<Option<HashMap<String, i64>>, Error>;
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, Error>;
}

/// Typed Jenkins REST client with basic auth and bounded retries.
pub struct Client {
    http: reqwest::Client,
    user: String,
    token: String,
}

impl Client {
    pub fn new(creds: &Credentials) -> Result<Client, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::Build)?;
        Ok(Client {
            http,
            user: creds.user.clone(),
            token: creds.token.clone(),
        })
    }

    /// GET with up to three attempts. 401 and 404 fail immediately; transport
    /// errors and 5xx responses back off 2^attempt seconds and retry.
    async fn request(&self, url: &str) -> Result<reqwest::Response, Error> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .http
                .get(url)
                .basic_auth(&self.user, Some(&self.token))
                .send()
                .await;

            let err = match result {
                Ok(response) => match response.status() {
                    status if status.is_success() => return Ok(response),
                    reqwest::StatusCode::UNAUTHORIZED => {
                        return Err(Error::Auth {
                            url: url.to_string(),
                        })
                    }
                    reqwest::StatusCode::NOT_FOUND => {
                        return Err(Error::NotFound {
                            url: url.to_string(),
                        })
                    }
                    _ => response.error_for_status().unwrap_err(),
                },
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= MAX_ATTEMPTS {
                return Err(Error::Request {
                    url: url.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }
            let wait = Duration::from_secs(1 << (attempt - 1));
            tracing::warn!(%url, %err, ?wait, attempt, "Jenkins request failed, retrying");
            tokio::time::sleep(wait).await;
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let response = self.request(url).await?;
        response.json::<T>().await.map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }
}

fn api_url(job_url: &str, tree: &str) -> String {
    format!("{}/api/json?tree={tree}", job_url.trim_end_matches('/'))
}

fn artifact_url(job_url: &str, relative_path: &str) -> String {
    format!("{}/artifact/{relative_path}", job_url.trim_end_matches('/'))
}

#[async_trait::async_trait]
impl JenkinsApi for Client {
    async fn get_artifacts_list(&self, job_url: &str) -> Result<Vec<Artifact>, Error> {
        let url = api_url(job_url, "artifacts[relativePath,fileName]");
        tracing::debug!(%url, "listing artifacts");
        let response: ArtifactsResponse = self.get_json(&url).await?;
        Ok(response.artifacts)
    }

    async fn download_artifact(
        &self,
        job_url: &str,
        relative_path: &str,
        dest_path: &Path,
    ) -> Result<(), Error> {
        let url = artifact_url(job_url, relative_path);
        tracing::debug!(%url, dest = %dest_path.display(), "downloading artifact");

        let response = self.request(&url).await?;
        let bytes = response.bytes().await.map_err(|source| Error::Decode {
            url: url.clone(),
            source,
        })?;

        let io_err = |source| Error::Io {
            path: dest_path.display().to_string(),
            source,
        };
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(dest_path, &bytes).await.map_err(io_err)
    }

    async fn get_job_builds(&self, job_url: &str, min_build: i64) -> Result<Vec<i64>, Error> {
        let url = api_url(job_url, "builds[number]");
        let response: BuildsResponse = self.get_json(&url).await?;

        let mut numbers: Vec<i64> = response
            .builds
            .into_iter()
            .map(|b| b.number)
            .filter(|n| *n > min_build)
            .collect();
        numbers.sort_unstable_by(|a, b| b.cmp(a));

        tracing::info!(%url, count = numbers.len(), min_build, "found builds");
        Ok(numbers)
    }

    async fn get_job_info(&self, job_url: &str) -> Result<JobInfo, Error> {
        let url = api_url(job_url, "displayName,url,number,result,timestamp");
        self.get_json(&url).await
    }

    async fn download_build_map(
        &self,
        job_url: &str,
    ) -> Result<Option<HashMap<String, i64>>, Error> {
        let artifacts = self.get_artifacts_list(job_url).await?;
        let Some(build_map) = artifacts.iter().find(|a| a.file_name == "build_map.json") else {
            tracing::warn!(%job_url, "build_map.json not found in build artifacts");
            return Ok(None);
        };

        let url = artifact_url(job_url, &build_map.relative_path);
        let map: HashMap<String, i64> = self.get_json(&url).await?;
        Ok(Some(map))
    }

    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, Error> {
        self.get_json(url).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn api_url_strips_trailing_slash() {
        assert_eq!(
            api_url("https://ci.example.com/job/MAIN/12/", "builds[number]"),
            "https://ci.example.com/job/MAIN/12/api/json?tree=builds[number]"
        );
    }

    #[test]
    fn artifact_url_joins_relative_path() {
        assert_eq!(
            artifact_url("https://ci.example.com/job/MAIN/12", "hapy/x.order.txt"),
            "https://ci.example.com/job/MAIN/12/artifact/hapy/x.order.txt"
        );
    }

    #[test]
    fn missing_credentials_is_an_error() {
        std::env::remove_var("JENKINS_URL");
        std::env::remove_var("JENKINS_USER");
        std::env::remove_var("JENKINS_API_TOKEN");
        assert!(matches!(
            Credentials::from_env(),
            Err(Error::MissingCredentials)
        ));
    }

    #[test]
    fn artifacts_response_decodes() {
        let raw = r#"{"artifacts":[
            {"relativePath":"hapy/1_bp_5s.order.txt","fileName":"1_bp_5s.order.txt"},
            {"relativePath":"build_map.json","fileName":"build_map.json"}
        ]}"#;
        let parsed: ArtifactsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.artifacts.len(), 2);
        assert_eq!(parsed.artifacts[1].file_name, "build_map.json");
    }

    #[test]
    fn job_info_tolerates_missing_fields() {
        let info: JobInfo = serde_json::from_str(r#"{"displayName":"VER: 6.4.2.0"}"#).unwrap();
        assert_eq!(info.display_name, "VER: 6.4.2.0");
        assert!(info.timestamp.is_none());
    }
}
