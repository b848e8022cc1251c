use pspemu_async::AsyncResult;

/// Whether a parked thread may be re-entered to run guest callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptCallbacks {
    Yes,
    No,
}

/// Tells the scheduler to park the calling thread until `result` settles.
///
/// The settled value becomes the thread's return value.
#[derive(Debug, Clone)]
pub struct WaitingDescriptor {
    /// Name of the HLE routine, for diagnostics.
    pub name: &'static str,
    pub resource_id: i32,
    pub result: AsyncResult<i32>,
    pub accept_callbacks: AcceptCallbacks,
}

impl WaitingDescriptor {
    pub fn new(
        name: &'static str,
        resource_id: i32,
        result: AsyncResult<i32>,
        accept_callbacks: AcceptCallbacks,
    ) -> Self {
        Self {
            name,
            resource_id,
            result,
            accept_callbacks,
        }
    }
}

/// What an HLE routine hands back to the dispatcher.
#[derive(Debug, Clone)]
pub enum HleOutcome {
    /// Written to `v0` right away.
    Immediate(i32),
    Wait(WaitingDescriptor),
}

impl HleOutcome {
    pub fn immediate(&self) -> Option<i32> {
        match self {
            HleOutcome::Immediate(value) => Some(*value),
            HleOutcome::Wait(_) => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, HleOutcome::Wait(_))
    }
}

impl From<i32> for HleOutcome {
    fn from(value: i32) -> Self {
        HleOutcome::Immediate(value)
    }
}

impl From<WaitingDescriptor> for HleOutcome {
    fn from(descriptor: WaitingDescriptor) -> Self {
        HleOutcome::Wait(descriptor)
    }
}
