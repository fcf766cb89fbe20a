//! Bus driver backed by a candump log
//!
//! Accepts both the log format written by `candump -l`
//! (`(1700000000.123456) can0 123#DEADBEEF`) and the bare compact form
//! (`123#DEADBEEF`). Remote frames, comments and blank lines are skipped.

use async_trait::async_trait;
use busrelay_bridge::{BusAlerts, BusConfig, BusInterface, BusStatus, GatewayError, Result};
use busrelay_core::BusFrame;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{debug, info, trace};

type LineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Sync + Unpin>>>;

/// Most lines taken in one alert wait
const MAX_BURST_LINES: usize = 256;

/// Where candump lines come from
#[derive(Debug, Clone)]
pub enum CandumpSource {
    /// Standard input, for piping a live `candump`
    Stdin,
    /// A recorded log file
    File(PathBuf),
    /// An in-memory log
    Memory(Vec<u8>),
}

impl CandumpSource {
    /// `-` selects stdin, anything else is a file path
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            CandumpSource::Stdin
        } else {
            CandumpSource::File(PathBuf::from(arg))
        }
    }
}

/// Parse one candump line
///
/// Returns `Ok(None)` for lines that carry no frame.
pub fn parse_candump_line(line: &str) -> busrelay_core::Result<Option<BusFrame>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    // The frame is always the last field; timestamp and interface come first
    let Some(token) = line.split_whitespace().last() else {
        return Ok(None);
    };
    if !token.contains('#') {
        return Ok(None);
    }

    token.parse::<BusFrame>().map(Some)
}

/// Bus driver replaying frames from a candump log
pub struct CandumpBus {
    source: CandumpSource,
    lines: Option<LineReader>,
    pending: VecDeque<BusFrame>,
    finished: bool,
    skipped: u32,
    line_number: u64,
}

impl CandumpBus {
    /// Create a driver over the given source; nothing is opened until `start`
    pub fn new(source: CandumpSource) -> Self {
        Self {
            source,
            lines: None,
            pending: VecDeque::new(),
            finished: false,
            skipped: 0,
            line_number: 0,
        }
    }

    /// Lines that could not be parsed
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    async fn open(&self) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        Ok(match &self.source {
            CandumpSource::Stdin => Box::new(tokio::io::stdin()),
            CandumpSource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    GatewayError::DriverInstallFailed(format!("{}: {}", path.display(), e))
                })?;
                Box::new(file)
            }
            CandumpSource::Memory(bytes) => Box::new(std::io::Cursor::new(bytes.clone())),
        })
    }

    /// Read one line if it arrives within `wait`; false on timeout or end of input
    async fn read_line(&mut self, wait: Duration) -> Result<bool> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(GatewayError::BusClosed);
        };

        match tokio::time::timeout(wait, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                self.accept_line(&line);
                Ok(true)
            }
            Ok(Ok(None)) => {
                info!(lines = self.line_number, skipped = self.skipped, "Candump source ended");
                self.finished = true;
                Ok(false)
            }
            Ok(Err(e)) => Err(GatewayError::BusRead(e.to_string())),
            Err(_) => Ok(false),
        }
    }

    fn accept_line(&mut self, line: &str) {
        self.line_number += 1;
        match parse_candump_line(line) {
            Ok(Some(frame)) => self.pending.push_back(frame),
            Ok(None) => trace!(line = self.line_number, "Skipping non-frame line"),
            Err(e) => {
                self.skipped += 1;
                debug!(line = self.line_number, error = %e, "Skipping unparseable candump line");
            }
        }
    }
}

#[async_trait]
impl BusInterface for CandumpBus {
    async fn start(&mut self, config: &BusConfig) -> Result<()> {
        let reader = self.open().await?;
        self.lines = Some(BufReader::new(reader).lines());
        info!(
            source = ?self.source,
            bitrate = config.bitrate,
            mode = ?config.mode,
            "Candump source opened"
        );
        Ok(())
    }

    async fn wait_for_alerts(&mut self, timeout: Duration) -> Result<BusAlerts> {
        if !self.pending.is_empty() {
            return Ok(BusAlerts::RX_DATA);
        }
        if self.finished {
            return Ok(BusAlerts::NONE);
        }

        // Wait for the first line, then take whatever else is already buffered
        let mut wait = timeout;
        for _ in 0..MAX_BURST_LINES {
            if !self.read_line(wait).await? {
                break;
            }
            wait = Duration::ZERO;
        }

        Ok(if self.pending.is_empty() {
            BusAlerts::NONE
        } else {
            BusAlerts::RX_DATA
        })
    }

    async fn receive_frame(&mut self) -> Result<Option<BusFrame>> {
        Ok(self.pending.pop_front())
    }

    fn status(&self) -> BusStatus {
        BusStatus {
            rx_error_counter: self.skipped,
            tx_error_counter: 0,
            msgs_to_rx: self.pending.len() as u32,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    fn name(&self) -> &str {
        "candump"
    }
}
