//! Serve command implementation.
//!
//! Runs one replica in-process: the sync endpoints for the peer, and an agent
//! that drains the outbox to the peer and pulls its changes. Entities live in
//! memory; only the outbox journal survives a restart.

use catalog_sync_engine::{
    ApplyEngine, FileJournal, HttpTransport, MemoryEntityStore, SyncAgent, SyncConfig,
};
use catalog_sync_protocol::{check_fields, Origin, Payload, SharedSecret};
use catalog_sync_server::{ServerConfig, SyncServer};
use serde_json::Value;
use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Options for `serve`, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address the sync endpoints listen on.
    pub bind: SocketAddr,
    /// Base URL of the peer replica.
    pub peer: String,
    /// Secret shared with the peer.
    pub secret: String,
    /// Which replica this is.
    pub origin: Origin,
    /// Outbox journal file.
    pub outbox: PathBuf,
    /// Entity kind replicated.
    pub entity_kind: String,
    /// Time between pulls from the peer.
    pub pull_interval: Duration,
    /// Entities recorded as local writes at startup.
    pub seed: Option<PathBuf>,
}

/// Runs the serve command until Ctrl-C.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(options))
}

/// Builds the server and agent configuration for a replica.
pub fn build_configs(options: &ServeOptions) -> Result<(ServerConfig, SyncConfig), Box<dyn Error>> {
    if options.secret.is_empty() {
        return Err("shared secret must not be empty".into());
    }
    let secret = SharedSecret::from(options.secret.as_str());

    let server = ServerConfig::new(options.bind, secret.clone())
        .with_origin(options.origin)
        .with_entity_kind(options.entity_kind.as_str());
    server.validate()?;

    let sync = SyncConfig::new(options.origin, options.peer.as_str(), secret)
        .with_entity_kind(options.entity_kind.as_str())
        .with_pull_interval(options.pull_interval);
    Ok((server, sync))
}

/// Reads a seed file: a JSON array of objects, each with a string `id` and
/// otherwise only domain fields.
pub fn load_seed(path: &Path) -> Result<Vec<(String, Payload)>, Box<dyn Error>> {
    let contents = std::fs::read_to_string(path)?;
    let objects: Vec<Payload> = serde_json::from_str(&contents)?;

    objects
        .into_iter()
        .enumerate()
        .map(|(i, mut fields)| -> Result<(String, Payload), Box<dyn Error>> {
            let id = match fields.remove("id") {
                Some(Value::String(id)) if !id.is_empty() => id,
                _ => return Err(format!("seed entry {i} has no string id").into()),
            };
            check_fields(&fields).map_err(|e| format!("seed entry {i} ({id}): {e}"))?;
            Ok((id, fields))
        })
        .collect()
}

async fn serve(options: ServeOptions) -> Result<(), Box<dyn Error>> {
    let (server_config, sync_config) = build_configs(&options)?;

    let store = Arc::new(MemoryEntityStore::new());
    let engine = Arc::new(ApplyEngine::new(store, options.entity_kind.as_str()));
    let server = Arc::new(SyncServer::new(server_config, Arc::clone(&engine))?);

    let journal = FileJournal::open(&options.outbox)?;
    let transport = HttpTransport::new(&sync_config)?;
    let agent = Arc::new(SyncAgent::new(
        sync_config,
        Arc::clone(&engine),
        journal,
        transport,
    )?);

    if let Some(path) = &options.seed {
        let records = load_seed(path)?;
        let count = records.len();
        for (id, fields) in records {
            agent.record_upsert(&id, fields)?;
        }
        info!(count, path = %path.display(), "recorded seed entities");
    }

    let listener = TcpListener::bind(options.bind).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_task = tokio::spawn(server.serve(listener, shutdown_rx.clone()));
    let agent_task = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!(pending = agent.outbox().len(), "shutting down");
    shutdown_tx.send(true)?;

    agent_task.await??;
    server_task.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options(secret: &str) -> ServeOptions {
        ServeOptions {
            bind: "127.0.0.1:0".parse().unwrap(),
            peer: "http://127.0.0.1:9000".into(),
            secret: secret.into(),
            origin: Origin::Local,
            outbox: PathBuf::from("outbox.jsonl"),
            entity_kind: "product".into(),
            pull_interval: Duration::from_secs(5),
            seed: None,
        }
    }

    #[test]
    fn configs_share_origin_and_secret() {
        let (server, sync) = build_configs(&options("s3cret")).unwrap();

        assert_eq!(server.origin, Origin::Local);
        assert_eq!(sync.origin, Origin::Local);
        assert_eq!(server.secret.as_bytes(), b"s3cret");
        assert_eq!(sync.secret.as_bytes(), b"s3cret");
        assert_eq!(sync.peer_url, "http://127.0.0.1:9000");
        assert_eq!(sync.pull_interval, Duration::from_secs(5));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(build_configs(&options("")).is_err());
    }

    #[test]
    fn seed_file_is_split_into_id_and_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"p1","name":"Lamp","price":25.0}},{{"id":"p2","name":"Desk"}}]"#
        )
        .unwrap();

        let records = load_seed(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "p1");
        assert_eq!(records[0].1["name"], "Lamp");
        assert!(!records[0].1.contains_key("id"));
        assert_eq!(records[1].0, "p2");
    }

    #[test]
    fn seed_entry_without_id_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name":"Lamp"}}]"#).unwrap();

        let err = load_seed(file.path()).unwrap_err();
        assert!(err.to_string().contains("seed entry 0"));
    }

    #[test]
    fn seed_entry_with_envelope_key_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"p1","name":"Lamp"}},{{"id":"p2","name":"Desk","rev":3}}]"#
        )
        .unwrap();

        let err = load_seed(file.path()).unwrap_err().to_string();
        assert!(err.contains("seed entry 1 (p2)"));
        assert!(err.contains("`rev`"));
    }
}
