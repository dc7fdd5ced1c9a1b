//! Playbook dispatch
//!
//! Builds the `ansible-playbook` argument vector for a validated tag group
//! and runs it with output streamed straight to the terminal.

use crate::exec::{CommandSpec, ExecError, Executor, ExitOutcome};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Exit code Ansible uses after catching Ctrl-C
const ANSIBLE_USER_INTERRUPT: i32 = 99;

/// Shell convention for death by SIGINT / SIGTERM
const SHELL_SIGINT: i32 = 130;
const SHELL_SIGTERM: i32 = 143;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Error type for playbook runs
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("playbook exited with code {code}")]
    Failed { code: i32 },

    #[error("playbook run was interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Assemble the argument vector for one run.
///
/// `--tags` always comes first, then one `--extra-vars` pair per variable in
/// order, `--skip-tags` only when there is something to skip, and finally
/// pass-through flags such as verbosity.
pub fn build_args(
    tags: &[String],
    extra_vars: &[String],
    skip_tags: &[String],
    extra_args: &[String],
) -> Vec<String> {
    let mut args = vec!["--tags".to_string(), tags.join(",")];

    for var in extra_vars {
        args.push("--extra-vars".to_string());
        args.push(var.clone());
    }

    if !skip_tags.is_empty() {
        args.push("--skip-tags".to_string());
        args.push(skip_tags.join(","));
    }

    args.extend(extra_args.iter().cloned());
    args
}

/// `-v` repeated `level` times as a single flag, e.g. `-vvv`
pub fn verbosity_flag(level: u8) -> Option<String> {
    (level > 0).then(|| format!("-{}", "v".repeat(level as usize)))
}

/// Run `playbook` from `repo_path`. Output is not captured.
pub fn run(
    executor: &dyn Executor,
    ansible_playbook: &str,
    repo_path: &Path,
    playbook: &Path,
    args: &[String],
) -> Result<()> {
    let spec = CommandSpec::new(ansible_playbook, repo_path)
        .arg(playbook.to_string_lossy())
        .arg("--become")
        .args(args.iter().cloned());

    tracing::info!(command = %spec.display(), "running playbook");

    let outcome = {
        let _guard = InterruptGuard::install();
        executor.stream(&spec)?
    };

    classify_outcome(outcome, INTERRUPTED.swap(false, Ordering::SeqCst))
}

fn classify_outcome(outcome: ExitOutcome, interrupted: bool) -> Result<()> {
    match outcome {
        ExitOutcome::Success => Ok(()),
        ExitOutcome::Signal(signal) if is_interrupt_signal(signal) => Err(DispatchError::Interrupted),
        ExitOutcome::Code(ANSIBLE_USER_INTERRUPT | SHELL_SIGINT | SHELL_SIGTERM) => {
            Err(DispatchError::Interrupted)
        }
        _ if interrupted => Err(DispatchError::Interrupted),
        ExitOutcome::Code(code) => Err(DispatchError::Failed { code }),
        ExitOutcome::Signal(signal) => Err(DispatchError::Failed { code: 128 + signal }),
    }
}

#[cfg(unix)]
fn is_interrupt_signal(signal: i32) -> bool {
    use nix::sys::signal::Signal;

    matches!(Signal::try_from(signal), Ok(Signal::SIGINT | Signal::SIGTERM))
}

#[cfg(not(unix))]
fn is_interrupt_signal(_: i32) -> bool {
    false
}

/// Keeps Ctrl-C from killing sb while the playbook owns the terminal.
///
/// A recording handler is used rather than SIG_IGN: an ignored disposition
/// is inherited across exec and would make the playbook immune to Ctrl-C.
struct InterruptGuard {
    #[cfg(unix)]
    previous: Option<nix::sys::signal::SigHandler>,
}

#[cfg(unix)]
extern "C" fn record_interrupt(_: std::os::raw::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

impl InterruptGuard {
    #[cfg(unix)]
    fn install() -> Self {
        use nix::sys::signal::{signal, SigHandler, Signal};

        INTERRUPTED.store(false, Ordering::SeqCst);
        // SAFETY: the handler only stores to an atomic
        let previous = unsafe { signal(Signal::SIGINT, SigHandler::Handler(record_interrupt)) };
        if let Err(e) = &previous {
            tracing::debug!(error = %e, "could not install SIGINT handler");
        }
        Self {
            previous: previous.ok(),
        }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }
}

#[cfg(unix)]
impl Drop for InterruptGuard {
    fn drop(&mut self) {
        use nix::sys::signal::{signal, Signal};

        if let Some(previous) = self.previous.take() {
            // SAFETY: restores whatever disposition was active before install
            let _ = unsafe { signal(Signal::SIGINT, previous) };
        }
    }
}
