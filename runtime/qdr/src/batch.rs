// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Fleet-wide calibration fan-out.

use {
    super::*,
    runtime_core::dispatcher::Dispatcher,
    std::collections::BTreeMap,
    tracing::{debug, debug_span},
};

/// One FPGA of the fleet, carrying zero or more QDR controllers.
///
/// Implementations guarantee that the control register and memory window of distinct QDRs
/// are disjoint and that handles of distinct QDRs can be driven from different threads; the
/// calibration core never issues operations of a single QDR concurrently.
pub trait FpgaSession {
    type Access: QdrRegisterAccess + Send + 'static;

    /// The network name of the FPGA host.
    fn host(&self) -> &str;

    /// The QDR controllers of the running design, each with a fresh access handle.
    fn targets(&self) -> Vec<(Qdr, Self::Access)>;
}

/// Software-calibrate every QDR of every FPGA, one concurrent worker per controller.
///
/// A controller which fails calibration, or which does not report within `timeout`, is
/// recorded as `false`. Overdue workers are abandoned rather than killed, so `false` can mean
/// "unknown, possibly still running". An FPGA without QDRs maps to an empty inner result.
pub fn calibrate_all<S: FpgaSession>(
    sessions: &[S],
    timeout: Duration,
) -> BTreeMap<String, BTreeMap<String, bool>> {
    let mut results: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
    let mut dispatcher = Dispatcher::new();

    for session in sessions {
        let host = session.host().to_string();
        let entry = results.entry(host.clone()).or_default();
        for (qdr, mut access) in session.targets() {
            entry.insert(qdr.name.clone(), false);
            let host = host.clone();
            let name = qdr.name.clone();
            dispatcher.spawn(host.clone(), move || {
                let _span = debug_span!("calibrate", host = %host, qdr = %name).entered();
                let passed = access
                    .calibrate()
                    .map_err(|e| debug!("calibration failed: {}", e))
                    .is_ok();
                (name, passed)
            });
        }
    }

    for (host, (name, passed)) in dispatcher.gather(timeout) {
        if let Some(entry) = results.get_mut(&host) {
            entry.insert(name, passed);
        }
    }

    results
}
