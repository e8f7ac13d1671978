use {
    anyhow::{Context as _, Result},
    std::{
        io::{Write, stdout},
        path::Path,
    },
    tokio::{
        runtime::{Handle, RuntimeFlavor},
        task::block_in_place,
    },
};

/// Opens the log output: `log_file` in append mode, or stdout if no file is set.
#[inline]
pub fn log_writer(log_file: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        Ok(Box::new(file))
    } else {
        Ok(Box::new(stdout()))
    }
}

/// Runs blocking `f` without stalling other tasks of a multi-thread runtime.
///
/// `block_in_place` panics on a current-thread runtime, so `f` is called directly there.
#[inline]
pub fn maybe_block_in_place<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            block_in_place(f)
        }
        _ => f(),
    }
}
