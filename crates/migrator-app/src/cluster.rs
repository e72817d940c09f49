//! Cluster coordination: evacuation, convergence polling and restore.
//!
//! There is no consensus of our own here. Members are driven through the
//! daemon's member-state API one at a time and readiness is polled.

use std::fmt;

use migrator_api_models::{ClusterMemberStatePost, MemberStatus};
use migrator_client::DaemonClient;
use migrator_config::RetryPolicy;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

/// Message reported by an evacuated member.
pub const EVACUATED_MESSAGE: &str = "Unavailable due to maintenance";
/// Message reported by a healthy online member.
pub const ONLINE_MESSAGE: &str = "Fully operational";

/// Progress of the coordination protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Nothing requested yet.
    Unconverged,
    /// Evacuation requests in flight.
    Evacuating,
    /// Every member evacuated.
    Evacuated,
    /// Polling for every member to run the target.
    AwaitingConvergence,
    /// Every member runs the target and is healthy.
    Converged,
    /// Restore requests in flight.
    Restoring,
    /// Every member restored.
    Restored,
}

impl ClusterState {
    /// Stable identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconverged => "unconverged",
            Self::Evacuating => "evacuating",
            Self::Evacuated => "evacuated",
            Self::AwaitingConvergence => "awaiting_convergence",
            Self::Converged => "converged",
            Self::Restoring => "restoring",
            Self::Restored => "restored",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a member in `status` reporting `message` counts as converged.
#[must_use]
pub fn member_is_converged(status: MemberStatus, message: &str) -> bool {
    matches!(
        (status, message),
        (MemberStatus::Evacuated, EVACUATED_MESSAGE) | (MemberStatus::Online, ONLINE_MESSAGE)
    )
}

/// Drives the cluster through evacuation, convergence and restore.
#[derive(Debug)]
pub struct ClusterCoordinator {
    state: ClusterState,
    retry: RetryPolicy,
}

impl ClusterCoordinator {
    /// Coordinator polling on `retry`.
    #[must_use]
    pub const fn new(retry: RetryPolicy) -> Self {
        Self {
            state: ClusterState::Unconverged,
            retry,
        }
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ClusterState {
        self.state
    }

    fn enter(&mut self, state: ClusterState) {
        debug!(from = %self.state, to = %state, "cluster state change");
        self.state = state;
    }

    /// Evacuate every member, stopping its workloads. Returns the member names.
    ///
    /// # Errors
    ///
    /// Returns the first failed listing, request or operation.
    pub async fn evacuate(&mut self, client: &dyn DaemonClient) -> AppResult<Vec<String>> {
        self.enter(ClusterState::Evacuating);
        let members = transition(
            client,
            &ClusterMemberStatePost::evacuate_stop(),
            "evacuate",
            "==> Stopping all workloads on server",
        )
        .await?;
        self.enter(ClusterState::Evacuated);
        Ok(members)
    }

    /// Poll until every member runs the target and reports a healthy state.
    /// Returns the number of polls performed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConvergenceExhausted`] once a configured bound is exceeded.
    pub async fn await_convergence(&mut self, client: &dyn DaemonClient) -> AppResult<u32> {
        self.enter(ClusterState::AwaitingConvergence);
        sleep(self.retry.warmup).await;

        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            if cluster_converged(client).await {
                info!(attempts, "cluster converged");
                self.enter(ClusterState::Converged);
                return Ok(attempts);
            }
            if !self.retry.allows(attempts) {
                return Err(AppError::ConvergenceExhausted { attempts });
            }
            sleep(self.retry.interval).await;
        }
    }

    /// Restore every member. Returns the member names.
    ///
    /// # Errors
    ///
    /// Returns the first failed listing, request or operation.
    pub async fn restore(&mut self, client: &dyn DaemonClient) -> AppResult<Vec<String>> {
        self.enter(ClusterState::Restoring);
        let members = transition(
            client,
            &ClusterMemberStatePost::restore(),
            "restore",
            "==> Restoring workloads on server",
        )
        .await?;
        self.enter(ClusterState::Restored);
        Ok(members)
    }
}

async fn transition(
    client: &dyn DaemonClient,
    request: &ClusterMemberStatePost,
    operation: &'static str,
    progress: &str,
) -> AppResult<Vec<String>> {
    let members = client
        .cluster_members()
        .await
        .map_err(|err| AppError::client(operation, err))?;
    let mut names = Vec::with_capacity(members.len());
    for member in members {
        println!("{progress} {:?}", member.server_name);
        let handle = client
            .update_member_state(&member.server_name, request)
            .await
            .map_err(|err| AppError::client(operation, err))?;
        client
            .wait_operation(&handle)
            .await
            .map_err(|err| AppError::client(operation, err))?;
        info!(member = %member.server_name, operation, "member transition completed");
        names.push(member.server_name);
    }
    Ok(names)
}

async fn cluster_converged(client: &dyn DaemonClient) -> bool {
    let members = match client.cluster_members().await {
        Ok(members) => members,
        Err(err) => {
            debug!(error = %err, "cluster member listing failed");
            return false;
        }
    };
    for member in members {
        match client.server_info(Some(&member.server_name)).await {
            Ok(info) if info.environment.server == "incus" => {}
            Ok(info) => {
                debug!(
                    member = %member.server_name,
                    server = %info.environment.server,
                    "member not migrated yet"
                );
                return false;
            }
            Err(err) => {
                debug!(member = %member.server_name, error = %err, "member unreachable");
                return false;
            }
        }
        if !member_is_converged(member.status, &member.message) {
            debug!(
                member = %member.server_name,
                status = %member.status,
                message = %member.message,
                "member not ready"
            );
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use migrator_api_models::{ClusterMember, Network, Operation, ServerInfo, StoragePool};
    use migrator_client::{ClientError, ClientResult, OperationHandle, UnixDaemonClient};
    use migrator_test_support::fixtures::{incus_server, lxd_server, member};
    use migrator_test_support::{FakeDaemon, FakeDaemonState};

    /// Serves one scripted member listing per poll; the last one repeats.
    struct PollingCluster {
        listings: Mutex<VecDeque<ClientResult<Vec<ClusterMember>>>>,
        lxd_members: Vec<&'static str>,
        polls: Mutex<u32>,
    }

    impl PollingCluster {
        fn new(listings: Vec<ClientResult<Vec<ClusterMember>>>) -> Self {
            Self {
                listings: Mutex::new(listings.into()),
                lxd_members: Vec::new(),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            self.polls.lock().map(|polls| *polls).unwrap_or_default()
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Api {
            uri: "/1.0/cluster/members".to_string(),
            code: 503,
            message: "cluster database unavailable".to_string(),
        }
    }

    #[async_trait]
    impl DaemonClient for PollingCluster {
        async fn server_info(&self, member: Option<&str>) -> ClientResult<ServerInfo> {
            let name = member.unwrap_or("node1");
            if self.lxd_members.iter().any(|lxd| *lxd == name) {
                Ok(lxd_server("5.21.1", true))
            } else {
                Ok(incus_server(name))
            }
        }

        async fn storage_pools(&self, _member: Option<&str>) -> ClientResult<Vec<StoragePool>> {
            Ok(Vec::new())
        }

        async fn cluster_members(&self) -> ClientResult<Vec<ClusterMember>> {
            if let Ok(mut polls) = self.polls.lock() {
                *polls += 1;
            }
            let Ok(mut listings) = self.listings.lock() else {
                return Err(unavailable());
            };
            if listings.len() > 1 {
                return listings.pop_front().unwrap_or_else(|| Err(unavailable()));
            }
            match listings.front() {
                Some(Ok(members)) => Ok(members.clone()),
                _ => Err(unavailable()),
            }
        }

        async fn instance_names(&self) -> ClientResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn networks(&self) -> ClientResult<Vec<Network>> {
            Ok(Vec::new())
        }

        async fn update_member_state(
            &self,
            _member: &str,
            _request: &ClusterMemberStatePost,
        ) -> ClientResult<OperationHandle> {
            Err(unavailable())
        }

        async fn wait_operation(&self, _handle: &OperationHandle) -> ClientResult<Operation> {
            Err(unavailable())
        }
    }

    #[test]
    fn only_the_two_healthy_pairs_converge() {
        assert!(member_is_converged(MemberStatus::Evacuated, EVACUATED_MESSAGE));
        assert!(member_is_converged(MemberStatus::Online, ONLINE_MESSAGE));
        assert!(!member_is_converged(MemberStatus::Online, EVACUATED_MESSAGE));
        assert!(!member_is_converged(MemberStatus::Evacuated, ONLINE_MESSAGE));
        assert!(!member_is_converged(MemberStatus::Offline, ONLINE_MESSAGE));
        assert!(!member_is_converged(MemberStatus::Online, "fully operational"));
        assert!(!member_is_converged(MemberStatus::Blocked, ""));
    }

    #[tokio::test(start_paused = true)]
    async fn convergence_retries_through_failures() -> anyhow::Result<()> {
        let cluster = PollingCluster::new(vec![
            Err(unavailable()),
            Ok(vec![
                member("node1", MemberStatus::Online, ONLINE_MESSAGE),
                member("node2", MemberStatus::Offline, "No heartbeat for 40s"),
            ]),
            Ok(vec![
                member("node1", MemberStatus::Online, ONLINE_MESSAGE),
                member("node2", MemberStatus::Evacuated, EVACUATED_MESSAGE),
            ]),
        ]);
        let mut coordinator = ClusterCoordinator::new(RetryPolicy::default());
        let started = tokio::time::Instant::now();

        let attempts = coordinator.await_convergence(&cluster).await?;

        assert_eq!(attempts, 3);
        assert_eq!(cluster.polls(), 3);
        assert_eq!(coordinator.state(), ClusterState::Converged);
        assert!(started.elapsed() >= Duration::from_secs(90));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn members_still_on_the_source_block_convergence() {
        let mut cluster = PollingCluster::new(vec![Ok(vec![member(
            "node2",
            MemberStatus::Online,
            ONLINE_MESSAGE,
        )])]);
        cluster.lxd_members.push("node2");
        let policy = RetryPolicy::every(Duration::from_secs(5)).with_max_attempts(4);
        let mut coordinator = ClusterCoordinator::new(policy);

        let result = coordinator.await_convergence(&cluster).await;

        assert!(matches!(
            result,
            Err(AppError::ConvergenceExhausted { attempts: 4 })
        ));
        assert_eq!(cluster.polls(), 4);
        assert_eq!(coordinator.state(), ClusterState::AwaitingConvergence);
    }

    #[tokio::test]
    async fn evacuate_then_restore_each_member_in_order() -> anyhow::Result<()> {
        let mut state = FakeDaemonState::new(lxd_server("5.21.1", true));
        state.members = vec![
            member("node1", MemberStatus::Online, ONLINE_MESSAGE),
            member("node2", MemberStatus::Online, ONLINE_MESSAGE),
        ];
        let daemon = FakeDaemon::start(state)?;
        let client = UnixDaemonClient::new(daemon.socket_path());
        let mut coordinator = ClusterCoordinator::new(RetryPolicy::default());

        assert_eq!(coordinator.evacuate(&client).await?, vec!["node1", "node2"]);
        assert_eq!(coordinator.state(), ClusterState::Evacuated);
        assert!(
            daemon
                .state()
                .members
                .iter()
                .all(|member| member.status == MemberStatus::Evacuated)
        );

        assert_eq!(coordinator.restore(&client).await?.len(), 2);
        assert_eq!(coordinator.state(), ClusterState::Restored);
        let requests: Vec<(String, ClusterMemberStatePost)> = daemon.state().state_requests.clone();
        assert_eq!(
            requests,
            vec![
                ("node1".to_string(), ClusterMemberStatePost::evacuate_stop()),
                ("node2".to_string(), ClusterMemberStatePost::evacuate_stop()),
                ("node1".to_string(), ClusterMemberStatePost::restore()),
                ("node2".to_string(), ClusterMemberStatePost::restore()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn first_failed_evacuation_aborts() -> anyhow::Result<()> {
        let mut state = FakeDaemonState::new(lxd_server("5.21.1", true));
        state.members = vec![
            member("node1", MemberStatus::Online, ONLINE_MESSAGE),
            member("node2", MemberStatus::Online, ONLINE_MESSAGE),
        ];
        state.failing_members.insert("node1".to_string());
        let daemon = FakeDaemon::start(state)?;
        let client = UnixDaemonClient::new(daemon.socket_path());
        let mut coordinator = ClusterCoordinator::new(RetryPolicy::default());

        let result = coordinator.evacuate(&client).await;

        assert!(matches!(
            result,
            Err(AppError::Client {
                operation: "evacuate",
                ..
            })
        ));
        assert_eq!(daemon.state().state_requests.len(), 1);
        assert_eq!(coordinator.state(), ClusterState::Evacuating);
        Ok(())
    }
}
