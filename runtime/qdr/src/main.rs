// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto
mod batch;
mod sim;

use {
    self::{batch::*, sim::*},
    casper_qdr_protocols::{calibration::QdrCalibration, *},
    clap::Parser,
    glib::Error,
    runtime_core::{cmdline::*, LogLevel, RuntimeOperation},
    std::{collections::BTreeMap, time::Duration},
    tracing::{debug, Level},
};

/// Parameters of one batch calibration run.
struct BatchParams {
    fpga_count: usize,
    qdr_count: usize,
    timeout: Duration,
    seed: u64,
}

struct BatchRuntime {
    fleet: Vec<SimFpga>,
    timeout: Duration,
}

impl RuntimeOperation<BatchParams> for BatchRuntime {
    fn new(params: BatchParams, log_level: Option<LogLevel>) -> Result<Self, Error> {
        if let Some(level) = log_level {
            let fmt_level = match level {
                LogLevel::Debug => Level::DEBUG,
            };
            tracing_subscriber::fmt().with_max_level(fmt_level).init();
        }

        let fleet = (0..params.fpga_count)
            .map(|i| {
                SimFpga::new(
                    &format!("roach2-{:03}", i),
                    params.qdr_count,
                    params.seed.wrapping_add(i as u64),
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(BatchRuntime {
            fleet,
            timeout: params.timeout,
        })
    }

    fn run(&mut self) -> Result<(), Error> {
        let results = calibrate_all(&self.fleet, self.timeout);

        let mut failures = 0;
        for (host, qdrs) in &results {
            for (name, passed) in qdrs {
                println!("{} {} {}", host, name, if *passed { "PASS" } else { "FAIL" });
                if !passed {
                    failures += 1;
                }
            }
        }
        debug!("{} hosts processed, {} failures", results.len(), failures);

        if failures > 0 {
            let label = format!("{} QDR controllers failed to calibrate", failures);
            Err(Error::new(QdrCalError::CalibrationFailed, &label))
        } else {
            Ok(())
        }
    }
}

struct QdrServiceCmd;

#[derive(Parser, Default)]
#[clap(name = "casper-qdr-cal-service")]
struct Arguments {
    /// The number of FPGA hosts in the simulated fleet.
    #[clap(long, default_value_t = 1)]
    fpgas: usize,

    /// The number of QDR controllers per host.
    #[clap(long, default_value_t = 4)]
    qdrs: usize,

    /// How long to wait for each controller, in seconds.
    #[clap(long, default_value_t = 10)]
    timeout: u64,

    /// The seed of the per-line skew of the simulated fleet.
    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// The level to debug runtime, disabled as a default.
    #[clap(long, short, value_enum)]
    log_level: Option<LogLevel>,
}

impl ServiceCmd<Arguments, BatchParams, BatchRuntime> for QdrServiceCmd {
    fn params(args: &Arguments) -> (BatchParams, Option<LogLevel>) {
        (
            BatchParams {
                fpga_count: args.fpgas,
                qdr_count: args.qdrs,
                timeout: Duration::from_secs(args.timeout),
                seed: args.seed,
            },
            args.log_level,
        )
    }

    fn specific_err_to_string(e: &Error) -> String {
        if let Some(error) = e.kind::<QdrCalError>() {
            let cause = match error {
                QdrCalError::HardwareInconsistent => "Clock-tap readback halves disagree",
                QdrCalError::BitNeverFailed => "Data bit eye has no edge",
                QdrCalError::NoRobustTap => "No robust tap setting found",
                QdrCalError::CalibrationFailed => "Output-delay sweep exhausted",
                QdrCalError::ReadShort => "Memory window read back short",
                _ => "",
            };
            format!("QDR calibration error: {}, {}", cause, e)
        } else {
            runtime_core::cmdline::specific_err_to_string(e)
        }
    }
}

fn main() {
    QdrServiceCmd::run()
}
