//! Serial/FIFO transport to the device under test.
//!
//! The DUT exposes a tiny shell over a serial line (or, under an emulator,
//! a FIFO pair). Collecting a trace means: wait for the device node to
//! appear, wake the shell until its `#B>` prompt answers, upload the
//! options blob in hex chunks, send the start command, then read trace
//! lines until the configured stop signal arrives.
//!
//! Reads are bounded by a per-byte timeout, implemented with a reader
//! thread feeding a channel that the foreground recv's with a deadline. A
//! tty device is opened as a file; its line settings are prepared
//! externally.
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tracemesh_core::trace::{TRACE_PREFIX, TraceEntry, parse_trace_line};

use crate::config::{SerialConfig, SignalConfig, TraceLogConfig};

/// Errors raised while acquiring a trace from the device under test.
#[derive(Debug)]
pub enum AcquisitionError {
    /// The serial type is neither `fifo` nor `tty`.
    Unsupported {
        /// The configured serial type.
        kind: String,
    },
    /// No serial port is configured.
    MissingPort,
    /// The device node did not appear within the hotplug window.
    OpenTimeout {
        /// The configured port path.
        port: String,
    },
    /// An I/O fault on the transport.
    Io {
        /// The underlying error message.
        detail: String,
    },
    /// No byte arrived within the configured timeout.
    ReadTimeout,
    /// A write to the transport failed.
    WriteFailed {
        /// The underlying error message.
        detail: String,
    },
    /// A DUT control shell command failed.
    Command {
        /// The command line.
        command: String,
        /// What went wrong.
        detail: String,
    },
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::Unsupported { kind } => {
                write!(f, "unknown serial type {kind:?} (must be 'fifo' or 'tty')")
            }
            AcquisitionError::MissingPort => write!(f, "serial port not specified"),
            AcquisitionError::OpenTimeout { port } => {
                write!(f, "timeout waiting for device {port}")
            }
            AcquisitionError::Io { detail } => write!(f, "transport I/O error: {detail}"),
            AcquisitionError::ReadTimeout => write!(f, "timeout waiting for serial data"),
            AcquisitionError::WriteFailed { detail } => write!(f, "serial write failed: {detail}"),
            AcquisitionError::Command { command, detail } => {
                write!(f, "DUT command {command:?} failed: {detail}")
            }
        }
    }
}

impl std::error::Error for AcquisitionError {}

/// An open connection to the DUT shell.
pub struct Transport {
    rx: mpsc::Receiver<u8>,
    writer: Box<dyn Write + Send>,
    timeout: Duration,
}

impl Transport {
    /// Opens the transport described by `serial`, waiting up to the
    /// hotplug timeout for the device node to appear.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError`] for unknown transport types, a missing
    /// port, or when the node does not appear in time.
    pub fn open(serial: &SerialConfig) -> Result<Self, AcquisitionError> {
        if serial.port.is_empty() {
            return Err(AcquisitionError::MissingPort);
        }
        let hotplug = Duration::from_secs(if serial.hotplugtimeout == 0 {
            5
        } else {
            serial.hotplugtimeout
        });
        let timeout = Duration::from_secs(if serial.timeout == 0 { 5 } else { serial.timeout });

        let (reader, writer): (File, File) = match serial.kind.as_str() {
            "tty" => open_tty(&serial.port, hotplug)?,
            "fifo" => open_fifo_pair(&serial.port, hotplug)?,
            other => {
                return Err(AcquisitionError::Unsupported {
                    kind: other.to_owned(),
                });
            }
        };

        Ok(Transport {
            rx: spawn_reader(reader),
            writer: Box::new(writer),
            timeout,
        })
    }

    fn read_byte(&self) -> Result<u8, AcquisitionError> {
        self.rx
            .recv_timeout(self.timeout)
            .map_err(|_| AcquisitionError::ReadTimeout)
    }

    /// Reads one line, dropping carriage returns.
    fn read_line(&self) -> Result<String, AcquisitionError> {
        let deadline = Instant::now() + self.timeout;
        let mut line = String::new();
        while Instant::now() < deadline {
            let b = self.read_byte()?;
            if b == b'\r' {
                continue;
            }
            if b == b'\n' {
                return Ok(line);
            }
            line.push(char::from(b));
        }
        Err(AcquisitionError::ReadTimeout)
    }

    /// Reads until the accumulated text contains `needle`.
    fn read_until(&self, needle: &str) -> Result<String, AcquisitionError> {
        let deadline = Instant::now() + self.timeout;
        let mut text = String::new();
        while Instant::now() < deadline {
            text.push(char::from(self.read_byte()?));
            if text.contains(needle) {
                return Ok(text);
            }
        }
        Err(AcquisitionError::ReadTimeout)
    }

    fn write_str(&mut self, s: &str) -> Result<(), AcquisitionError> {
        self.writer
            .write_all(s.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|e| AcquisitionError::WriteFailed {
                detail: e.to_string(),
            })
    }

    /// Drives the DUT shell through one trace collection: prompt
    /// handshake, config upload, start command, then capture framed by the
    /// configured start/stop signals.
    ///
    /// Entries are retained from the start-signal access (inclusive) up to
    /// the stop-signal access (exclusive). Without configured signals the
    /// capture only ends when the line goes silent, which surfaces as a
    /// timeout error.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError`] on transport faults or timeouts;
    /// malformed trace lines are logged and skipped.
    pub fn collect_trace(
        &mut self,
        cfg: &TraceLogConfig,
        config_blob: &[u8],
    ) -> Result<Vec<TraceEntry>, AcquisitionError> {
        // Wake the shell until the prompt answers.
        loop {
            self.write_str("\n")?;
            let banner = self.read_until(">")?;
            for line in banner.lines() {
                debug!(line, "shell");
            }
            if banner.ends_with("#B>") {
                break;
            }
        }
        info!("found DUT shell");

        for chunk in config_chunks(config_blob) {
            self.write_str(&chunk)?;
            let echo = self.read_until(">")?;
            for line in echo.lines() {
                debug!(line, "upload");
            }
        }
        self.write_str("0: \n")?;
        info!(bytes = config_blob.len(), "config written, capturing");

        let mut framer = CaptureFramer::new(&cfg.startsignal, &cfg.stopsignal);
        let mut entries = Vec::new();
        loop {
            let line = self.read_line()?;
            match parse_trace_line(&line) {
                Ok(entry) => match framer.step(&entry) {
                    FramerStep::Keep => {
                        debug!(%entry, "trace");
                        entries.push(entry);
                    }
                    FramerStep::Skip => {}
                    FramerStep::Stop => return Ok(entries),
                },
                Err(e) => {
                    if line.trim_start().starts_with(TRACE_PREFIX) && framer.capturing() {
                        warn!(line = %line, error = %e, "skipping malformed trace line");
                    } else {
                        debug!(line = %line, "console");
                    }
                }
            }
        }
    }
}

fn open_tty(port: &str, hotplug: Duration) -> Result<(File, File), AcquisitionError> {
    let deadline = Instant::now() + hotplug;
    loop {
        let attempt = File::open(port).and_then(|reader| {
            let writer = OpenOptions::new().write(true).open(port)?;
            Ok((reader, writer))
        });
        match attempt {
            Ok(pair) => return Ok(pair),
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
            Err(_) => {
                return Err(AcquisitionError::OpenTimeout {
                    port: port.to_owned(),
                });
            }
        }
    }
}

/// Opens the `.in`/`.out` FIFO pair. FIFO opens block until the other end
/// attaches, so the open runs on a helper thread bounded by the hotplug
/// window.
fn open_fifo_pair(base: &str, hotplug: Duration) -> Result<(File, File), AcquisitionError> {
    let (tx, rx) = mpsc::channel();
    let base_owned = base.to_owned();
    thread::spawn(move || {
        let result = OpenOptions::new()
            .write(true)
            .open(format!("{base_owned}.in"))
            .and_then(|writer| {
                let reader = File::open(format!("{base_owned}.out"))?;
                Ok((reader, writer))
            });
        tx.send(result).ok();
    });

    match rx.recv_timeout(hotplug) {
        Ok(Ok((reader, writer))) => Ok((reader, writer)),
        Ok(Err(e)) => Err(AcquisitionError::Io {
            detail: e.to_string(),
        }),
        Err(_) => Err(AcquisitionError::OpenTimeout {
            port: base.to_owned(),
        }),
    }
}

/// Feeds every byte read from `file` into a channel; the foreground side
/// applies its timeout on the receiving end.
fn spawn_reader(mut file: File) -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 1];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(buf[0]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// Renders the `3: <len><offset><hex>` upload commands for a config blob.
///
/// The shell accepts at most 4096 bytes of config in chunks of up to 512
/// bytes; lengths and offsets are zero-padded 8-digit hex.
pub(crate) fn config_chunks(blob: &[u8]) -> Vec<String> {
    let capped = &blob[..blob.len().min(4096)];
    capped
        .chunks(512)
        .enumerate()
        .map(|(i, chunk)| {
            let mut cmd = format!("3: {:08x}{:08x}", chunk.len(), i * 512);
            for b in chunk {
                cmd.push_str(&format!("{b:02x}"));
            }
            cmd.push('\n');
            cmd
        })
        .collect()
}

/// What to do with one parsed entry during capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FramerStep {
    /// Retain the entry.
    Keep,
    /// Discard it (outside the framed region).
    Skip,
    /// The stop signal: discard it and end the capture.
    Stop,
}

/// Start/stop-signal framing: retains entries in `[start, stop)`.
///
/// Without both signals configured, every entry is retained and the
/// capture never self-terminates.
pub(crate) struct CaptureFramer {
    framed: bool,
    capturing: bool,
    start: SignalConfig,
    stop: SignalConfig,
}

impl CaptureFramer {
    pub(crate) fn new(start: &SignalConfig, stop: &SignalConfig) -> Self {
        let framed = start.is_configured() && stop.is_configured();
        CaptureFramer {
            framed,
            capturing: !framed,
            start: start.clone(),
            stop: stop.clone(),
        }
    }

    pub(crate) fn capturing(&self) -> bool {
        self.capturing
    }

    pub(crate) fn step(&mut self, entry: &TraceEntry) -> FramerStep {
        if !self.framed {
            return FramerStep::Keep;
        }
        if !self.capturing {
            if self.start.matches(entry) {
                self.capturing = true;
                return FramerStep::Keep;
            }
            return FramerStep::Skip;
        }
        if self.stop.matches(entry) {
            self.capturing = false;
            return FramerStep::Stop;
        }
        FramerStep::Keep
    }
}

/// Runs one DUT control command (power scripts and the like). The first
/// whitespace-separated token is resolved to an absolute path and executed
/// from its own directory.
pub fn run_shell_command(command: &str) -> Result<(), AcquisitionError> {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(());
    };
    let program = std::fs::canonicalize(program).map_err(|e| AcquisitionError::Command {
        command: command.to_owned(),
        detail: e.to_string(),
    })?;
    info!(program = %program.display(), "running DUT command");

    let mut cmd = std::process::Command::new(&program);
    cmd.args(parts);
    if let Some(dir) = program.parent().filter(|p| *p != Path::new("")) {
        cmd.current_dir(dir);
    }
    let status = cmd.status().map_err(|e| AcquisitionError::Command {
        command: command.to_owned(),
        detail: e.to_string(),
    })?;
    if !status.success() {
        return Err(AcquisitionError::Command {
            command: command.to_owned(),
            detail: status.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::config::parse;
    use tracemesh_core::AccessKind;

    #[test]
    fn config_chunks_render_length_offset_and_hex() {
        let chunks = config_chunks(&[0xab, 0x01, 0xff]);
        assert_eq!(chunks, vec!["3: 0000000300000000ab01ff\n".to_owned()]);
    }

    #[test]
    fn config_chunks_split_at_512_bytes() {
        let blob = vec![0u8; 513];
        let chunks = config_chunks(&blob);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("3: 0000020000000000"));
        assert!(chunks[1].starts_with("3: 0000000100000200"));
        // 512 bytes of hex + command prefix + newline
        assert_eq!(chunks[0].len(), "3: ".len() + 16 + 1024 + 1);
    }

    #[test]
    fn config_chunks_cap_at_4096_bytes() {
        let blob = vec![0u8; 5000];
        let chunks = config_chunks(&blob);
        assert_eq!(chunks.len(), 8);
    }

    fn framed_config() -> (SignalConfig, SignalConfig) {
        let cfg = parse(
            "tracelog:\n  startsignal:\n    type: i\n    offset: 128\n    value: 1\n    direction: O\n    datawidth: 8\n  stopsignal:\n    type: i\n    offset: 128\n    value: 2\n    direction: O\n    datawidth: 8\n",
        )
        .expect("valid config");
        (cfg.tracelog.startsignal, cfg.tracelog.stopsignal)
    }

    fn io_out(value: u64) -> TraceEntry {
        TraceEntry {
            ip: 1,
            kind: AccessKind::Io,
            is_read: false,
            address: 128,
            value,
            access_size: 8,
        }
    }

    #[test]
    fn framer_keeps_the_half_open_region() {
        let (start, stop) = framed_config();
        let mut framer = CaptureFramer::new(&start, &stop);

        assert_eq!(framer.step(&io_out(9)), FramerStep::Skip);
        assert_eq!(framer.step(&io_out(1)), FramerStep::Keep, "start included");
        assert_eq!(framer.step(&io_out(7)), FramerStep::Keep);
        assert_eq!(framer.step(&io_out(2)), FramerStep::Stop, "stop excluded");
    }

    #[test]
    fn unframed_capture_keeps_everything() {
        let mut framer = CaptureFramer::new(&SignalConfig::default(), &SignalConfig::default());
        assert_eq!(framer.step(&io_out(9)), FramerStep::Keep);
        assert_eq!(framer.step(&io_out(1)), FramerStep::Keep);
    }

    #[test]
    fn empty_dut_command_is_a_no_op() {
        run_shell_command("").expect("empty command");
        run_shell_command("   ").expect("blank command");
    }

    #[test]
    fn missing_dut_command_is_reported() {
        let err = run_shell_command("/definitely/not/here arg");
        assert!(matches!(err, Err(AcquisitionError::Command { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn successful_dut_command_runs() {
        run_shell_command("/bin/sh -c true").expect("sh -c true");
    }

    #[test]
    fn opening_an_unknown_serial_type_fails() {
        let serial = SerialConfig {
            kind: "carrier-pigeon".to_owned(),
            port: "/dev/null".to_owned(),
            ..SerialConfig::default()
        };
        assert!(matches!(
            Transport::open(&serial),
            Err(AcquisitionError::Unsupported { .. })
        ));
    }

    #[test]
    fn opening_without_a_port_fails() {
        let serial = SerialConfig::default();
        assert!(matches!(
            Transport::open(&serial),
            Err(AcquisitionError::MissingPort)
        ));
    }
}
