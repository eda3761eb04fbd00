// FREX: Failure-Recovery Experiments on Software-Defined Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Access to the SDN controller and the recovery application running on it.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder};
use tokio::time::{sleep, timeout};

use crate::{
    paths::{parse_path_records, PathError, PathRecord},
    util::PathBufExt,
};

/// Hand-off file with the forwarding path of every flow.
pub const FORWARDING_PATHS_FILE: &str = "traffic_flow_paths.txt";
/// Hand-off file with the backup paths of every flow.
pub const BACKUP_PATHS_FILE: &str = "traffic_flow_backup_paths.txt";
pub const ALGORITHM_READY_FILE: &str = "Algorithm_state->Ready";
pub const ALGORITHM_ERROR_FILE: &str = "Algorithm_state->Error";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unexpected response from the controller: {0}")]
    UnexpectedResponse(String),
    #[error("Path Error: {0}")]
    Path(#[from] PathError),
    #[error("The recovery algorithm reported an error")]
    AlgorithmFailed,
    #[error("Timeout after {1:?} while waiting for {0}")]
    Timeout(&'static str, Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmStatus {
    Pending,
    Ready,
    Failed,
}

#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Number of directed links the controller currently knows.
    async fn link_count(&self) -> Result<usize, ControllerError>;

    /// Raw forwarding-path records. Empty if none were written yet.
    async fn forwarding_paths(&self) -> Result<String, ControllerError>;

    /// Raw backup-path records, if the application writes them.
    async fn backup_paths(&self) -> Result<Option<String>, ControllerError>;

    /// Install and activate the application implementing `algorithm`.
    async fn activate_algorithm(&self, algorithm: &str) -> Result<(), ControllerError>;

    async fn algorithm_status(&self) -> Result<AlgorithmStatus, ControllerError>;

    async fn deactivate_algorithm(&self) -> Result<(), ControllerError>;
}

/// Interval and overall timeout of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Wait until the controller reports both directions of all `num_edges` links. Errors while
/// querying are logged and polled again.
pub async fn wait_for_convergence<C: Controller + ?Sized>(
    controller: &C,
    num_edges: usize,
    poll: PollSettings,
) -> Result<(), ControllerError> {
    let expected = 2 * num_edges;
    let job = async {
        loop {
            match controller.link_count().await {
                Ok(n) if n == expected => break,
                Ok(n) => log::debug!("[controller] {n} of {expected} links discovered"),
                Err(e) => log::warn!("[controller] cannot query links: {e}"),
            }
            sleep(poll.interval).await;
        }
    };
    timeout(poll.timeout, job)
        .await
        .map_err(|_| ControllerError::Timeout("controller convergence", poll.timeout))?;
    log::info!("[controller] all {num_edges} links are established");
    Ok(())
}

/// Wait until the recovery application signals that it is ready.
pub async fn wait_for_algorithm<C: Controller + ?Sized>(
    controller: &C,
    poll: PollSettings,
) -> Result<(), ControllerError> {
    let job = async {
        loop {
            match controller.algorithm_status().await {
                Ok(AlgorithmStatus::Ready) => return Ok(()),
                Ok(AlgorithmStatus::Failed) => return Err(ControllerError::AlgorithmFailed),
                Ok(AlgorithmStatus::Pending) => sleep(poll.interval).await,
                Err(e) => return Err(e),
            }
        }
    };
    timeout(poll.timeout, job)
        .await
        .map_err(|_| ControllerError::Timeout("algorithm readiness", poll.timeout))?
}

/// Wait until the forwarding paths can be read and parsed.
pub async fn wait_for_paths<C: Controller + ?Sized>(
    controller: &C,
    poll: PollSettings,
) -> Result<Vec<PathRecord>, ControllerError> {
    let job = async {
        loop {
            let text = match controller.forwarding_paths().await {
                Ok(text) => text,
                Err(e) => return Err(e),
            };
            match parse_path_records(&text) {
                Ok(records) => return Ok(records),
                Err(PathError::Unavailable) => log::trace!("[controller] no paths yet"),
                Err(e) => log::debug!("[controller] paths not readable yet: {e}"),
            }
            sleep(poll.interval).await;
        }
    };
    timeout(poll.timeout, job)
        .await
        .map_err(|_| ControllerError::Timeout("forwarding paths", poll.timeout))?
}

/// ONOS, reached through its REST API. The recovery application exchanges data through files in
/// the working directory.
#[derive(Debug, Clone)]
pub struct OnosController {
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub work_dir: PathBuf,
    pub apps_dir: PathBuf,
    pub app_name: String,
    http: Client,
}

impl OnosController {
    pub fn new(base_url: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            user: "onos".to_string(),
            password: "rocks".to_string(),
            work_dir: work_dir.into(),
            apps_dir: PathBuf::from("apps"),
            app_name: "org.foo.app".to_string(),
            http: Client::new(),
        }
    }

    pub fn apps_dir(mut self, apps_dir: impl Into<PathBuf>) -> Self {
        self.apps_dir = apps_dir.into();
        self
    }

    /// Application archive of an algorithm.
    pub fn archive(&self, algorithm: &str) -> PathBuf {
        self.apps_dir
            .as_path()
            .then(algorithm)
            .then("target")
            .then(format!("{algorithm}-1.0-SNAPSHOT.oar"))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.user, Some(&self.password))
    }

    /// Activate the OpenFlow provider. Fails while the controller is still starting.
    pub async fn activate_openflow(&self) -> Result<(), ControllerError> {
        self.request(Method::POST, "/applications/org.onosproject.openflow/active")
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, ControllerError> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Number of entries in the `links` array of a topology-cluster reply.
fn count_links(reply: &serde_json::Value) -> Result<usize, ControllerError> {
    reply
        .get("links")
        .and_then(|l| l.as_array())
        .map(|l| l.len())
        .ok_or_else(|| ControllerError::UnexpectedResponse(reply.to_string()))
}

#[async_trait::async_trait]
impl Controller for OnosController {
    async fn link_count(&self) -> Result<usize, ControllerError> {
        let reply = self
            .request(Method::GET, "/topology/clusters/0/links")
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        count_links(&reply)
    }

    async fn forwarding_paths(&self) -> Result<String, ControllerError> {
        let path = self.work_dir.as_path().then(FORWARDING_PATHS_FILE);
        Ok(Self::read_optional(&path).await?.unwrap_or_default())
    }

    async fn backup_paths(&self) -> Result<Option<String>, ControllerError> {
        Self::read_optional(&self.work_dir.as_path().then(BACKUP_PATHS_FILE)).await
    }

    async fn activate_algorithm(&self, algorithm: &str) -> Result<(), ControllerError> {
        log::info!("[controller] activate {algorithm}");
        let archive = tokio::fs::read(self.archive(algorithm)).await?;
        self.request(Method::POST, "/applications")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(archive)
            .send()
            .await?
            .error_for_status()?;
        self.request(Method::POST, &format!("/applications/{}/active", self.app_name))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn algorithm_status(&self) -> Result<AlgorithmStatus, ControllerError> {
        if self.work_dir.as_path().then(ALGORITHM_ERROR_FILE).exists() {
            Ok(AlgorithmStatus::Failed)
        } else if self.work_dir.as_path().then(ALGORITHM_READY_FILE).exists() {
            Ok(AlgorithmStatus::Ready)
        } else {
            Ok(AlgorithmStatus::Pending)
        }
    }

    async fn deactivate_algorithm(&self) -> Result<(), ControllerError> {
        log::info!("[controller] deactivate {}", self.app_name);
        self.request(Method::DELETE, &format!("/applications/{}", self.app_name))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::FakeController;

    fn poll() -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn convergence_retries_transient_errors() {
        let ctrl = FakeController::default().with_link_counts([None, Some(10), Some(70)]);
        let start = tokio::time::Instant::now();
        wait_for_convergence(&ctrl, 35, poll()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn convergence_times_out() {
        let ctrl = FakeController::default().with_link_counts([Some(68)]);
        assert!(matches!(
            wait_for_convergence(&ctrl, 35, poll()).await,
            Err(ControllerError::Timeout(_, _))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn algorithm_readiness() {
        let ctrl = FakeController::default();
        ctrl.set_status(AlgorithmStatus::Ready);
        wait_for_algorithm(&ctrl, poll()).await.unwrap();
        ctrl.set_status(AlgorithmStatus::Failed);
        assert!(matches!(
            wait_for_algorithm(&ctrl, poll()).await,
            Err(ControllerError::AlgorithmFailed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn paths_are_polled() {
        let ctrl = FakeController::default();
        assert!(matches!(
            wait_for_paths(&ctrl, poll()).await,
            Err(ControllerError::Timeout(_, _))
        ));
        ctrl.set_paths("a,b|[0, 1]");
        assert_eq!(wait_for_paths(&ctrl, poll()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn onos_hand_off_files() {
        let dir = tempfile::tempdir().unwrap();
        let onos = OnosController::new("http://127.0.0.1:8181/onos/v1", dir.path());
        assert_eq!(onos.forwarding_paths().await.unwrap(), "");
        assert_eq!(onos.backup_paths().await.unwrap(), None);
        assert_eq!(onos.algorithm_status().await.unwrap(), AlgorithmStatus::Pending);

        std::fs::write(dir.path().join(ALGORITHM_READY_FILE), "").unwrap();
        assert_eq!(onos.algorithm_status().await.unwrap(), AlgorithmStatus::Ready);
        std::fs::write(dir.path().join(BACKUP_PATHS_FILE), "x|{}").unwrap();
        assert_eq!(onos.backup_paths().await.unwrap().as_deref(), Some("x|{}"));
        assert_eq!(
            onos.archive("MP"),
            PathBuf::from("apps/MP/target/MP-1.0-SNAPSHOT.oar")
        );
    }

    #[test]
    fn cluster_links() {
        let reply = serde_json::json!({"links": [{"src": "of:1"}, {"src": "of:2"}]});
        assert_eq!(count_links(&reply).unwrap(), 2);
        assert!(matches!(
            count_links(&serde_json::json!({"code": 404})),
            Err(ControllerError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn missing_archive_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let onos = OnosController::new("http://127.0.0.1:1/onos/v1", dir.path())
            .apps_dir(dir.path().join("apps"));
        assert!(matches!(
            onos.activate_algorithm("MP").await,
            Err(ControllerError::Io(_))
        ));
    }
}
