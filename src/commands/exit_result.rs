use crate::{error::HarnessError, session::Verdict};
use std::{
    error::Error,
    process::{ExitCode, Termination},
};

/// The workload ran but did not pass.
pub const EXIT_FAILING_VERDICT: i32 = 1;
/// The harness itself could not do its job.
pub const EXIT_HARNESS_ERROR: i32 = 2;

pub enum ExitResult<T: Termination> {
    Ok(T),
    Err(Box<dyn Error>, i32),
    /// Exit with the code; whatever needed saying was already printed.
    Quiet(i32),
}

impl<T: Termination> ExitResult<T> {
    pub fn err_from<E: Error + 'static>(e: E, code: i32) -> ExitResult<T> {
        ExitResult::Err(Box::new(e), code)
    }
}

impl ExitResult<()> {
    pub fn from_verdict(result: Result<Verdict, HarnessError>) -> ExitResult<()> {
        match result {
            Ok(verdict) if verdict.is_pass() => ExitResult::Ok(()),
            Ok(_) => ExitResult::Quiet(EXIT_FAILING_VERDICT),
            Err(e) => e.into(),
        }
    }
}

impl<T: Termination> From<HarnessError> for ExitResult<T> {
    fn from(e: HarnessError) -> Self {
        ExitResult::err_from(e, EXIT_HARNESS_ERROR)
    }
}

impl From<Result<(), HarnessError>> for ExitResult<()> {
    fn from(result: Result<(), HarnessError>) -> Self {
        match result {
            Ok(()) => ExitResult::Ok(()),
            Err(e) => e.into(),
        }
    }
}

impl<T: Termination> Termination for ExitResult<T> {
    fn report(self) -> ExitCode {
        match self {
            ExitResult::Ok(t) => t.report(),
            ExitResult::Err(b, c) => {
                eprintln!("sysreplay: {}", b);
                ExitCode::from(c as u8)
            }
            ExitResult::Quiet(c) => ExitCode::from(c as u8),
        }
    }
}
