pub mod config;
pub mod diagnostics;
pub mod error;

pub mod auth;
pub mod crypto;
pub mod hap;
pub mod notify;
pub mod reader;
pub mod secure;
pub mod store;
pub mod tlv;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot};

use crate::notify::Notifier;
use crate::notify::gpio::{GpioActions, LogGpioDriver, run_gpio_task};
use crate::notify::mqtt::{LogMqttClient, MqttPublisher, run_mqtt_task};
use crate::reader::{MgmtEvent, NfcEvent, UnavailableTransport};
use crate::store::{BlobStorage, FileStorage, ReaderStore};

/// Load (or create) the reader data kept under `dir`.
pub fn open_store(dir: &Path) -> error::Result<ReaderStore> {
    let storage = FileStorage::new(dir)?;
    Ok(ReaderStore::load(Box::new(storage))?)
}

/// Apply one base64 control-point request and return the base64 response.
pub fn control_point_base64(store: &mut ReaderStore, request: &str) -> error::Result<String> {
    let request = crypto::base64_decode(request)?;
    let response = hap::handle_control_point(store, &request);
    Ok(crypto::base64_encode(&response))
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();
}

fn lock_file(data_dir: &Path) -> anyhow::Result<(fd_lock::RwLock<std::fs::File>, PathBuf)> {
    let lock_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.to_path_buf());
    let lock_path = lock_dir.join(format!("{}.lock", config::APP_NAME));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    Ok((fd_lock::RwLock::new(file), lock_path))
}

pub async fn wipe(cfg: config::Config) -> anyhow::Result<()> {
    let data_dir = cfg.data_dir()?;
    let mut storage = FileStorage::new(&data_dir)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {e}", data_dir.display()))?;
    if storage.erase(config::STORE_KEY)? {
        println!("Deleted reader data from {}", storage.path_for(config::STORE_KEY).display());
    } else {
        println!("No reader data in {}", data_dir.display());
    }
    Ok(())
}

pub async fn control_point(cfg: config::Config, request: &str) -> anyhow::Result<()> {
    init_logging(cfg.verbose);
    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    let (mut lock, lock_path) = lock_file(&data_dir)?;
    let _guard = lock.try_write().map_err(|_| {
        anyhow::anyhow!("{} is already running (lock: {})", config::APP_NAME, lock_path.display())
    })?;

    let mut store = open_store(&data_dir)?;
    println!("{}", control_point_base64(&mut store, request)?);
    Ok(())
}

pub async fn run(cfg: config::Config) -> anyhow::Result<()> {
    init_logging(cfg.verbose);
    tracing::info!("Starting {}", config::APP_NAME);

    let data_dir = cfg.data_dir()?;
    diagnostics::check(&cfg, &data_dir)?;

    // Single-instance lock
    let (mut lock, lock_path) = lock_file(&data_dir)?;
    let _guard = lock.try_write().map_err(|_| {
        anyhow::anyhow!("{} is already running (lock: {})", config::APP_NAME, lock_path.display())
    })?;

    let store = open_store(&data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to load reader data: {e}"))?;
    tracing::info!(
        issuers = store.issuer_count(),
        endpoints = store.endpoint_count(),
        group = %crypto::hex(&store.data().identity.group_identifier),
        "Reader data loaded"
    );
    let store = Arc::new(Mutex::new(store));

    let mut notifier = Notifier::new();
    let mqtt_rx = notifier.subscribe(config::EVENT_QUEUE_DEPTH);
    let gpio_rx = notifier.subscribe(config::EVENT_QUEUE_DEPTH);
    let mqtt = tokio::spawn(run_mqtt_task(
        MqttPublisher::new(LogMqttClient, cfg.mqtt_topics()),
        mqtt_rx,
    ));
    let gpio = tokio::spawn(run_gpio_task(GpioActions::new(LogGpioDriver, cfg.gpio()), gpio_rx));

    let (nfc_tx, nfc_rx) = mpsc::channel(config::EVENT_QUEUE_DEPTH);
    let (mgmt_tx, mgmt_rx) = mpsc::channel(config::EVENT_QUEUE_DEPTH);
    let console = tokio::spawn(run_console(mgmt_tx, nfc_tx));

    reader::run_reader_loop(
        nfc_rx,
        mgmt_rx,
        Box::new(UnavailableTransport),
        store,
        notifier,
        cfg.auth_options(),
    )
    .await;

    for (name, task) in [("console", console), ("mqtt", mqtt), ("gpio", gpio)] {
        if let Err(e) = task.await {
            return Err(anyhow::anyhow!("{name} task panicked: {e}"));
        }
    }
    Ok(())
}

/// Management console on stdin: each line is a base64 control-point
/// request, or `supported` for the supported-configuration value. Responses
/// are printed as base64. The NFC queue stays open until stdin closes.
async fn run_console(mgmt_tx: mpsc::Sender<MgmtEvent>, nfc_tx: mpsc::Sender<NfcEvent>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (reply, response) = oneshot::channel();
        let event = if line == "supported" {
            MgmtEvent::SupportedConfiguration { reply }
        } else {
            match crypto::base64_decode(line) {
                Ok(request) => MgmtEvent::ControlPoint { request, reply },
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed control-point line");
                    continue;
                }
            }
        };
        if mgmt_tx.send(event).await.is_err() {
            break;
        }
        match response.await {
            Ok(bytes) => println!("{}", crypto::base64_encode(&bytes)),
            Err(_) => tracing::warn!("Reader dropped the control-point request"),
        }
    }
    tracing::debug!("Console closed");
    drop(nfc_tx);
}
