use clap::Parser;
use indicatif::ProgressBar;
use nus_uart::{BtleplugLink, DeviceId, InboundEvent, LinkState, Target, UartCallbacks, UartConfig, UartManager, WriteError};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Terminal for Nordic UART Service peripherals
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// BLE target name
    #[arg(short, long)]
    name: Option<String>,

    /// BLE Address
    #[arg(short, long)]
    addr: Option<String>,

    /// ATT MTU the OS settles on for the link
    #[arg(long, default_value_t = 247)]
    mtu: u16,

    /// Timeout for a single GATT operation, in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// Give up scanning after this many seconds
    #[arg(long)]
    scan_timeout_secs: Option<u64>,

    /// Send this file once connected, then exit
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Don't append a newline to lines read from stdin
    #[arg(long)]
    no_newline: bool,

    /// Log more (-v shows sent/received records, -vv everything)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Prints what the peripheral sends and tracks file upload progress
struct Terminal {
    progress: Option<ProgressBar>,
    done: Notify,
    link_failed: Notify,
    disconnected: Notify,
    failure: Mutex<Option<String>>,
}

impl Terminal {
    fn new(upload_len: Option<usize>) -> Self {
        Terminal {
            progress: upload_len.map(|len| ProgressBar::new(len as u64)),
            done: Notify::new(),
            link_failed: Notify::new(),
            disconnected: Notify::new(),
            failure: Mutex::new(None),
        }
    }

    fn fail(&self, message: String) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message);
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }
}

impl UartCallbacks for Terminal {
    fn on_data_received(&self, event: InboundEvent) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(&event.data).and_then(|_| stdout.flush()) {
            error!("stdout: {}", e);
        }
    }

    fn on_data_sent(&self, _device: &DeviceId, bytes: &[u8]) {
        if let Some(bar) = &self.progress {
            bar.inc(bytes.len() as u64);
            if Some(bar.position()) >= bar.length() {
                bar.finish();
                self.done.notify_one();
            }
        }
    }

    fn on_write_failed(&self, err: &WriteError) {
        error!("{}", err);
        if let Some(bar) = &self.progress {
            bar.abandon();
            self.fail(err.to_string());
            self.done.notify_one();
        }
    }

    fn on_link_failed(&self, err: &nus_uart::Error) {
        self.fail(err.to_string());
        self.link_failed.notify_one();
    }

    fn on_disconnected(&self, _device: &DeviceId) {
        self.disconnected.notify_one();
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "nus_uart=warn",
        1 => "nus_uart=info",
        _ => "nus_uart=debug,btleplug=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn upload(terminal: &Terminal, handle: &nus_uart::UartHandle, payload: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
    if payload.is_empty() {
        return Ok(());
    }
    info!("Started upload of {} bytes", payload.len());
    let len = payload.len();
    handle.send(payload);
    tokio::select! {
        _ = terminal.done.notified() => {}
        _ = terminal.disconnected.notified() => {
            return Err("link lost during upload".into());
        }
    }
    match terminal.failure() {
        Some(failure) => Err(failure.into()),
        None => {
            info!("Finished upload of {} bytes", len);
            Ok(())
        }
    }
}

async fn interactive(terminal: &Terminal, handle: &nus_uart::UartHandle, newline: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let mut bytes = line.into_bytes();
                    if newline {
                        bytes.push(b'\n');
                    }
                    handle.send(bytes);
                }
                None => return Ok(()),
            },
            _ = terminal.disconnected.notified() => {
                return Err("link lost".into());
            }
        }
    }
}

fn read_payload(path: &Path) -> nus_uart::Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = UartConfig {
        op_timeout: Duration::from_millis(args.timeout_ms),
        ..Default::default()
    };
    let target = Target::from_args(args.name, args.addr)?;
    let payload = args.file.as_deref().map(read_payload).transpose()?;

    let scan_timeout = args.scan_timeout_secs.map(Duration::from_secs);
    let link = Arc::new(BtleplugLink::find(&target, args.mtu, &config, scan_timeout).await?);
    let terminal = Arc::new(Terminal::new(payload.as_ref().map(Vec::len)));

    let (handle, events, _manager) = UartManager::new(link.clone(), config, terminal.clone()).spawn();
    let _pump = link.pump_events(events.clone()).await?;
    link.connect(&events).await?;

    tokio::select! {
        ready = handle.wait_for_state(LinkState::Ready) => ready?,
        _ = terminal.link_failed.notified() => {
            let _ = link.disconnect().await;
            return Err(terminal.failure().unwrap_or_default().into());
        }
        _ = terminal.disconnected.notified() => {
            return Err("link lost before it was ready".into());
        }
    }
    info!("Connected to {}", link.device_id());

    let result = match payload {
        Some(payload) => upload(&terminal, &handle, payload).await,
        None => interactive(&terminal, &handle, !args.no_newline).await,
    };

    if handle.state() != LinkState::Disconnected {
        if let Err(e) = link.disconnect().await {
            debug!("disconnect: {}", e);
        }
    }
    result
}
