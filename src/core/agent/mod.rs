/*!
Streaming agent client pool.

One [`client::AgentClient`] per enabled agent, each owning its reconnect
loop. The pool owns the in-memory status map (the only source for
`connected` reads), per-agent import status, and hot reload: adding,
updating or removing an agent restarts only that agent's client.
*/

pub mod client;
pub mod import;
pub mod sse;
pub mod types;

use crate::core::broadcast::Broadcaster;
use crate::core::notifier::Notifier;
use crate::core::store::models::MonitorAgent;
use crate::core::store::Store;
use crate::error::{Error, Result};
use client::AgentClient;
use isahc::config::Configurable;
use isahc::HttpClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use types::{AgentStatus, ImportStatus};

struct ClientHandle {
    status: Arc<StdMutex<AgentStatus>>,
    shutdown: watch::Sender<bool>,
}

pub struct AgentPool {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<Notifier>,
    backoff_floor: Duration,
    http: HttpClient,
    clients: RwLock<HashMap<i64, ClientHandle>>,
    // std mutex: import progress callbacks are synchronous.
    imports: Arc<StdMutex<HashMap<i64, ImportStatus>>>,
}

impl AgentPool {
    pub fn new(
        store: Store,
        broadcaster: Arc<Broadcaster>,
        notifier: Arc<Notifier>,
        reconnect_interval_s: u64,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("build pool client: {e}")))?;
        Ok(Self {
            store,
            broadcaster,
            notifier,
            backoff_floor: Duration::from_secs(reconnect_interval_s.max(1)),
            http,
            clients: RwLock::new(HashMap::new()),
            imports: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    /// Spawn a client for every enabled agent.
    pub async fn start(&self) -> Result<usize> {
        let agents = self.store.enabled_monitor_agents().await?;
        let count = agents.len();
        for agent in agents {
            self.spawn_client(agent).await;
        }
        tracing::info!(agents = count, "agent pool started");
        Ok(count)
    }

    /// Start (or restart) the client for one agent, picking up edits.
    pub async fn restart_agent(&self, id: i64) -> Result<()> {
        self.remove_agent(id).await;
        let agent = self.store.monitor_agent(id).await?;
        if agent.enabled {
            self.spawn_client(agent).await;
        }
        Ok(())
    }

    /// Stop and forget one agent's client.
    pub async fn remove_agent(&self, id: i64) {
        if let Some(handle) = self.clients.write().await.remove(&id) {
            let _ = handle.shutdown.send(true);
        }
    }

    pub async fn stop_all(&self) {
        let mut clients = self.clients.write().await;
        for (_, handle) in clients.drain() {
            let _ = handle.shutdown.send(true);
        }
    }

    /// Live status for one agent, if its client is running.
    pub async fn status(&self, id: i64) -> Option<AgentStatus> {
        let clients = self.clients.read().await;
        clients
            .get(&id)
            .map(|handle| client::lock_status(&handle.status).clone())
    }

    /// Live status for every running client.
    pub async fn statuses(&self) -> Vec<AgentStatus> {
        let clients = self.clients.read().await;
        let mut all: Vec<AgentStatus> = clients
            .values()
            .map(|handle| client::lock_status(&handle.status).clone())
            .collect();
        all.sort_by_key(|status| status.agent_id);
        all
    }

    /// Kick off a one-shot historical import for the agent. Rejected while
    /// a previous import is still running.
    pub async fn start_import(&self, id: i64) -> Result<()> {
        {
            let mut imports = lock_imports(&self.imports);
            if imports.get(&id).map(|s| s.in_progress).unwrap_or(false) {
                return Err(Error::AlreadyRunning(id));
            }
            imports.insert(
                id,
                ImportStatus {
                    in_progress: true,
                    ..Default::default()
                },
            );
        }

        let agent = match self.store.monitor_agent(id).await {
            Ok(agent) => agent,
            Err(err) => {
                lock_imports(&self.imports).remove(&id);
                return Err(err);
            }
        };
        let store = self.store.clone();
        let http = self.http.clone();
        let imports = self.imports.clone();

        tokio::spawn(async move {
            let progress_map = imports.clone();
            let result = import::run(store, http, agent, move |status| {
                lock_imports(&progress_map).insert(id, status);
            })
            .await;

            if let Err(err) = result {
                tracing::warn!(agent = id, %err, "historical import failed");
            }
        });

        Ok(())
    }

    pub async fn import_status(&self, id: i64) -> Option<ImportStatus> {
        lock_imports(&self.imports).get(&id).cloned()
    }

    async fn spawn_client(&self, agent: MonitorAgent) {
        let status = Arc::new(StdMutex::new(AgentStatus::disconnected(
            agent.id,
            &agent.name,
        )));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = match AgentClient::new(
            agent.clone(),
            self.store.clone(),
            self.broadcaster.clone(),
            self.notifier.clone(),
            status.clone(),
            self.backoff_floor,
            shutdown_rx,
        ) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(agent = agent.id, %err, "failed to build agent client");
                return;
            }
        };

        self.clients.write().await.insert(
            agent.id,
            ClientHandle {
                status,
                shutdown: shutdown_tx,
            },
        );

        tokio::spawn(client.run());
    }
}

fn lock_imports(
    imports: &StdMutex<HashMap<i64, ImportStatus>>,
) -> std::sync::MutexGuard<'_, HashMap<i64, ImportStatus>> {
    match imports.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
