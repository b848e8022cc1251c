//! End-to-end flows through the dispatcher, the scheduler and the backends.

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use pspemu_workspace::async_result::AsyncError;
use pspemu_workspace::cpu::{
    reg, CpuExecutor, CpuFault, CpuState, GuestMemory, Interop, USER_RAM_BASE,
};
use pspemu_workspace::hle::audio::BufferedAudio;
use pspemu_workspace::hle::{
    sce_audio, AudioFormat, HleConfig, HleContext, HleOutcome, HleRegistry, Scheduler,
    AcceptCallbacks, SceKernelError, SchedulerError, ThreadStatus, WaitingDescriptor,
};
use pspemu_workspace::vfs::{MemoryVfs, ProxyVfs, Vfs, VfsExt};

const CH_RESERVE: u32 = 0x5EC81C55;
const CH_RELEASE: u32 = 0x6FC46853;
const OUTPUT_BLOCKING: u32 = 0x136CAF51;
const OUTPUT_PANNED_BLOCKING: u32 = 0x13F592BC;
const GET_CHANNEL_REST_LEN: u32 = 0xB011922F;

const PCM: u32 = USER_RAM_BASE + 0x1000;

struct Session {
    ctx: HleContext,
    registry: HleRegistry,
    scheduler: Scheduler,
    engine: BufferedAudio,
}

impl Session {
    fn new() -> Self {
        let config = HleConfig::default();
        let engine = BufferedAudio::new();
        let mut registry = HleRegistry::from_config(&config);
        registry
            .register_module(sce_audio::MODULE, sce_audio::EXPORTS)
            .unwrap();
        let ctx = HleContext::new(
            config,
            GuestMemory::new(USER_RAM_BASE, 0x10000),
            Arc::new(engine.clone()),
        );
        Self {
            ctx,
            registry,
            scheduler: Scheduler::new(),
            engine,
        }
    }

    /// Loads `args` into `a0..` of `tid` and issues the syscall.
    fn syscall(&mut self, tid: u32, nid: u32, args: &[u32]) -> Result<(), SchedulerError> {
        let thread = self.scheduler.thread_mut(tid).unwrap();
        for (index, value) in args.iter().enumerate() {
            thread.state.set_gpr(reg::A0 + index, *value);
        }
        self.scheduler
            .dispatch(tid, nid, &self.registry, &mut self.ctx)
    }

    fn v0(&self, tid: u32) -> u32 {
        self.scheduler.thread(tid).unwrap().state.gpr(reg::V0)
    }
}

#[test]
fn blocking_output_parks_until_the_engine_drains() {
    let mut session = Session::new();
    let tid = session.scheduler.spawn_thread("audio", CpuState::new());

    let samples: Vec<u8> = (0..64i16).flat_map(|s| (s * 100).to_le_bytes()).collect();
    session.ctx.memory.write(PCM, &samples).unwrap();

    session
        .syscall(tid, CH_RESERVE, &[-1i32 as u32, 64, u32::from(AudioFormat::Mono)])
        .unwrap();
    assert_eq!(session.v0(tid), 0);

    session.syscall(tid, OUTPUT_BLOCKING, &[0, 0x8000, PCM]).unwrap();
    assert_eq!(
        session.scheduler.thread(tid).unwrap().status(),
        &ThreadStatus::Waiting {
            name: "sceAudioOutputBlocking",
            resource_id: 0,
            accept_callbacks: AcceptCallbacks::No,
        }
    );
    assert_eq!(session.scheduler.poll(), Ok(0));

    let mixed = session.engine.mix(64);
    assert_eq!(&mixed[..6], &[0, 0, 100, 100, 200, 200]);

    assert_eq!(session.scheduler.poll(), Ok(1));
    assert_eq!(session.v0(tid), 0);
    assert_eq!(session.scheduler.runnable_threads(), vec![tid]);
}

#[test]
fn releasing_a_channel_cancels_the_parked_writer() {
    let mut session = Session::new();
    let writer = session.scheduler.spawn_thread("writer", CpuState::new());
    let control = session.scheduler.spawn_thread("control", CpuState::new());

    session.syscall(control, CH_RESERVE, &[5, 64, 0]).unwrap();
    assert_eq!(session.v0(control), 5);

    session
        .syscall(writer, OUTPUT_PANNED_BLOCKING, &[5, 0x8000, 0x4000, PCM])
        .unwrap();
    assert_eq!(
        session.syscall(writer, GET_CHANNEL_REST_LEN, &[5]),
        Err(SchedulerError::AlreadyWaiting(writer))
    );

    session.syscall(control, CH_RELEASE, &[5]).unwrap();
    assert_eq!(session.v0(control), 0);

    assert_eq!(session.scheduler.poll(), Ok(1));
    assert_eq!(session.v0(writer), SceKernelError::WaitCancel.code() as u32);
    assert!(!session.ctx.audio.channel(5).unwrap().is_allocated());
}

#[test]
fn guest_visible_errors_are_immediate() {
    let mut session = Session::new();
    let tid = session.scheduler.spawn_thread("main", CpuState::new());

    session.syscall(tid, OUTPUT_BLOCKING, &[0, 0x8000, 0]).unwrap();
    assert_eq!(session.v0(tid), SceKernelError::IllegalArgument.code() as u32);

    session.syscall(tid, CH_RELEASE, &[3]).unwrap();
    assert_eq!(session.v0(tid), SceKernelError::AudioInvalidChannel.code() as u32);

    assert!(matches!(
        session.syscall(tid, 0x1234_5678, &[]),
        Err(SchedulerError::Registry(_))
    ));
}

fn filesystem() -> ProxyVfs {
    let overlay = MemoryVfs::new("overlay");
    let image = MemoryVfs::new("umd0");
    image
        .insert_file("PSP_GAME/PARAM.SFO", vec![0x00, 0x50, 0x53, 0x46, 1, 1])
        .unwrap();
    ProxyVfs::new(vec![
        Arc::new(overlay) as Arc<dyn Vfs>,
        Arc::new(image) as Arc<dyn Vfs>,
    ])
    .unwrap()
}

#[test]
fn filesystem_reads_share_the_waiting_contract() {
    let mut session = Session::new();
    session.ctx.mount("disc0:", Arc::new(filesystem()));
    let reader = session.scheduler.spawn_thread("reader", CpuState::new());
    let prober = session.scheduler.spawn_thread("prober", CpuState::new());

    for (tid, path) in [
        (reader, "disc0:/PSP_GAME/PARAM.SFO"),
        (prober, "disc0:/PSP_GAME/ICON0.PNG"),
    ] {
        let vfs = session.ctx.device_for(path).unwrap();
        let result = session.scheduler.spawn_result(async move {
            let data = vfs.read_all(path).await.map_err(AsyncError::from)?;
            Ok::<_, AsyncError>(data.len() as i32)
        });
        let descriptor = WaitingDescriptor::new("sceIoRead", 3, result, AcceptCallbacks::Yes);
        session
            .scheduler
            .complete_call(tid, HleOutcome::Wait(descriptor))
            .unwrap();
    }
    assert_eq!(session.scheduler.threads_accepting_callbacks().len(), 2);

    assert_eq!(session.scheduler.poll(), Ok(2));
    assert_eq!(session.v0(reader), 6);
    assert_eq!(session.v0(prober), 0x8001_0002);
}

#[test]
fn missing_backend_operations_surface_as_defects() {
    let mut session = Session::new();
    let tid = session.scheduler.spawn_thread("io", CpuState::new());
    let vfs = filesystem();

    let result = session.scheduler.spawn_result(async move {
        let mut out = [0u8; 4];
        vfs.devctl(0x0203_D802, &[], &mut out)
            .await
            .map_err(AsyncError::from)
    });
    session
        .scheduler
        .complete_call(
            tid,
            WaitingDescriptor::new("sceIoDevctl", 0, result, AcceptCallbacks::No).into(),
        )
        .unwrap();

    let err = session.scheduler.poll().unwrap_err();
    assert!(matches!(err, SchedulerError::BackendDefect { thread, .. } if thread == tid));
    assert!(matches!(
        session.scheduler.thread(tid).unwrap().status(),
        ThreadStatus::Faulted(message) if message.contains("umd0.devctl")
    ));
}

/// Stands in for the interpreter: runs a guest callback that reserves an
/// audio channel through the syscall table and returns.
struct CallbackGuest<'a> {
    registry: &'a HleRegistry,
    ctx: &'a mut HleContext,
}

#[async_trait(?Send)]
impl CpuExecutor for CallbackGuest<'_> {
    async fn execute_until(&mut self, state: &mut CpuState, stop_pc: u32) -> Result<(), CpuFault> {
        // Clobber caller-saved registers the way real guest code would.
        state.set_gpr(reg::A0 + 1, 64);
        state.set_gpr(reg::A0 + 2, 0);
        state.set_gpr(8, 0xdead_beef);

        let outcome = self
            .registry
            .dispatch(CH_RESERVE, self.ctx, state)
            .map_err(|err| CpuFault::Aborted(err.to_string()))?;
        let HleOutcome::Immediate(value) = outcome else {
            return Err(CpuFault::Aborted("callback blocked".into()));
        };
        state.set_return_value(value);

        state.set_pc(state.ra());
        if state.pc() == stop_pc {
            Ok(())
        } else {
            Err(CpuFault::InvalidBranch {
                pc: state.pc(),
                target: stop_pc,
            })
        }
    }
}

#[test]
fn guest_callbacks_can_issue_syscalls_through_the_bridge() {
    let mut session = Session::new();
    let mut state = CpuState::new();
    for index in 1..32 {
        state.set_gpr(index, 0x4000_0000 + index as u32);
    }
    state.set_pc(0x0880_2000);
    let before = state.snapshot();

    let mut guest = CallbackGuest {
        registry: &session.registry,
        ctx: &mut session.ctx,
    };
    let channel = futures::executor::block_on(Interop::new().execute(
        &mut guest,
        &mut state,
        0x0890_0000,
        &[2],
    ))
    .unwrap();

    assert_eq!(channel, 2);
    assert!(session.ctx.audio.channel(2).unwrap().is_allocated());

    let mut expected = before;
    expected.gpr[reg::V0] = 2;
    assert_eq!(state.snapshot(), expected);
}

#[test]
#[tracing_test::traced_test]
fn probing_unimplemented_routines_is_harmless() {
    let mut session = Session::new();
    let tid = session.scheduler.spawn_thread("probe", CpuState::new());
    session.syscall(tid, GET_CHANNEL_REST_LEN, &[0]).unwrap();
    assert_eq!(session.v0(tid), 0);
    assert!(logs_contain("not implemented"));
}
