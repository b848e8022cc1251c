//! Host-to-guest calls.

use scopeguard::ScopeGuard;
use thiserror::Error;
use tracing::instrument;

use crate::{reg, CpuExecutor, CpuFault, CpuState};

/// Return address installed while guest code runs on behalf of the host.
///
/// It lies in the unmapped low page, so guest code never branches there on
/// its own.
pub const INTEROP_RETURN_ADDRESS: u32 = 0x0000_1234;

/// Argument registers available to a bridged call (`a0`..`t3`).
pub const MAX_REGISTER_ARGS: usize = reg::T3 - reg::A0 + 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteropError {
    #[error("{count} arguments do not fit in the {MAX_REGISTER_ARGS} argument registers")]
    TooManyArguments { count: usize },
    #[error("guest code faulted during a host call: {0}")]
    Fault(#[from] CpuFault),
}

/// Re-entry bridge: runs a fragment of guest code to completion from host
/// logic and hands the caller its registers back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interop;

impl Interop {
    pub fn new() -> Self {
        Self
    }

    /// Calls the guest function at `address` with `args` in `a0..`.
    ///
    /// Returns the guest's `v0`. Every register is restored to its value
    /// before the call, except `v0`/`v1` which keep the callee's results.
    /// A fault, or dropping the returned future before it completes,
    /// restores every register including `v0`/`v1`.
    #[instrument(level = "debug", skip_all, fields(address = address, argc = args.len()), err)]
    pub async fn execute<E>(
        &self,
        executor: &mut E,
        state: &mut CpuState,
        address: u32,
        args: &[u32],
    ) -> Result<u32, InteropError>
    where
        E: CpuExecutor + ?Sized,
    {
        if args.len() > MAX_REGISTER_ARGS {
            return Err(InteropError::TooManyArguments { count: args.len() });
        }

        let snapshot = state.snapshot();
        let mut frame = scopeguard::guard((state, snapshot), |(state, snapshot)| {
            tracing::trace!("restoring registers after an interrupted host call");
            state.restore(&snapshot);
        });

        {
            let (state, _) = &mut *frame;
            state.set_ra(INTEROP_RETURN_ADDRESS);
            for (index, value) in args.iter().enumerate() {
                state.set_gpr(reg::A0 + index, *value);
            }
            state.set_pc(address);
            executor
                .execute_until(&mut **state, INTEROP_RETURN_ADDRESS)
                .await?;
        }

        let (state, snapshot) = ScopeGuard::into_inner(frame);
        let results = state.return_values();
        state.restore(&snapshot);
        state.set_return_values(results);
        Ok(results.0)
    }
}
