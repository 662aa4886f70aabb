//! # mk-posix
//!
//! POSIX platform for the metakernel runtime.
//!
//! [`PosixPlatform`] backs every run loop with a [`PollPoller`], so
//! notifiers can watch file descriptors for all [`NotifierModes`].
//! [`quit_on_ctrlc`] ends a run loop on SIGINT.
//!
//! ```no_run
//! use mk_core::{ExecuteFlags, RunLoop};
//!
//! mk_posix::install();
//! let run_loop = RunLoop::create(true);
//! mk_posix::quit_on_ctrlc(&run_loop).unwrap();
//! run_loop.execute(ExecuteFlags::empty()).unwrap();
//! ```

pub mod poller;

use std::sync::Arc;

use mk_core::platform::{self, CondvarPoller, Platform, Poller};
use mk_core::{NotifierModes, RunLoop};
use thiserror::Error;

pub use poller::PollPoller;

#[derive(Error, Debug)]
pub enum PosixError {
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
}

/// Platform creating `poll(2)` backed run loops.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixPlatform;

impl Platform for PosixPlatform {
    fn name(&self) -> &str {
        "posix"
    }

    fn create_poller(&self) -> Arc<dyn Poller> {
        match PollPoller::new() {
            Ok(poller) => Arc::new(poller),
            Err(err) => {
                log::error!("poll backend unavailable, notifiers disabled: {err}");
                Arc::new(CondvarPoller::new())
            }
        }
    }

    fn supported_notifier_modes(&self) -> NotifierModes {
        NotifierModes::all()
    }
}

/// Makes [`PosixPlatform`] the platform for run loops created from now on.
pub fn install() {
    platform::install(Arc::new(PosixPlatform));
}

/// Quits `run_loop` when the process receives SIGINT.
///
/// Only one handler can be installed per process.
pub fn quit_on_ctrlc(run_loop: &Arc<RunLoop>) -> Result<(), PosixError> {
    let weak = Arc::downgrade(run_loop);
    ctrlc::set_handler(move || match weak.upgrade() {
        Some(run_loop) => {
            log::info!("interrupted, quitting run loop {}", run_loop.name());
            run_loop.quit();
        }
        None => log::debug!("interrupted after run loop was dropped"),
    })?;
    Ok(())
}
