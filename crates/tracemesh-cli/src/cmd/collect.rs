//! `tracemesh collect` — run pending tests against the device under test.
use tracing::{error, info};

use crate::config::Config;
use crate::error::CliError;
use crate::store::{Store, TestStatus};
use crate::transport::{Transport, run_shell_command};

/// Collects the next pending trace, or every pending trace with `--all`.
///
/// Each test is marked in-progress, the device is brought up via the
/// configured DUT commands, the trace is captured, and the test ends as
/// success (trace rows written) or failed. With `--all` a failed test does
/// not stop the run.
pub fn run(
    store: &mut Store,
    config: &Config,
    all: bool,
    dev: Option<&str>,
    baud: Option<u32>,
    fifo: Option<&str>,
) -> Result<(), CliError> {
    let mut serial = config.tracelog.serial.clone();
    if let Some(dev) = dev {
        serial.kind = "tty".to_owned();
        serial.port = dev.to_owned();
    }
    if let Some(fifo) = fifo {
        serial.kind = "fifo".to_owned();
        serial.port = fifo.to_owned();
    }
    if let Some(baud) = baud {
        serial.baudrate = baud;
    }

    let dut = &config.tracelog.dutcontrol;
    if !dut.initcmd.is_empty() {
        run_shell_command(&dut.initcmd)?;
    }

    let mut collected = 0u32;
    loop {
        let Some(test_id) = store.next_pending_test()? else {
            if all {
                info!("all tests have been run");
            }
            break;
        };
        info!(test_id, "collecting trace");

        let blob = store.test_config(test_id)?;
        store.set_test_status(test_id, TestStatus::InProgress)?;

        if !dut.startcmd.is_empty() {
            run_shell_command(&dut.startcmd)?;
        }
        let result = Transport::open(&serial)
            .and_then(|mut transport| transport.collect_trace(&config.tracelog, &blob));
        if !dut.stopcmd.is_empty() {
            run_shell_command(&dut.stopcmd)?;
        }

        match result {
            Ok(entries) => {
                store.set_test_status(test_id, TestStatus::Success)?;
                store.write_trace(test_id, &entries)?;
                info!(test_id, entries = entries.len(), "trace stored");
                println!("test {test_id}: captured {} entries", entries.len());
                collected += 1;
            }
            Err(e) => {
                error!(test_id, error = %e, "trace collection failed");
                store.set_test_status(test_id, TestStatus::Failed)?;
                if !all {
                    return Err(e.into());
                }
            }
        }

        if !all {
            break;
        }
    }

    if all {
        println!("collected {collected} traces");
    }
    Ok(())
}
