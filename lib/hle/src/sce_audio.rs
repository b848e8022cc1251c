//! `sceAudio` exports: marshalling from guest registers into [`SceAudio`].
//!
//! [`SceAudio`]: crate::audio::SceAudio

use crate::context::HleContext;
use crate::registry::{ArgKind, HleCall, NativeFunction, Signature};
use crate::waiting::HleOutcome;

use crate::registry::ArgKind::{Int, Ptr, UInt};

pub const MODULE: &str = "sceAudio";

const fn sig(params: &'static [ArgKind]) -> Signature {
    Signature { ret: UInt, params }
}

fn output2_reserve(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio.output2_reserve(call.int(0)).into()
}

fn output2_output_blocking(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    let buffer = call.buffer(&ctx.memory, 1);
    ctx.audio.output2_output_blocking(call.int(0), buffer)
}

fn ch_reserve(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio
        .ch_reserve(call.int(0), call.int(1), call.int(2))
        .into()
}

fn ch_release(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio.ch_release(call.int(0)).into()
}

fn change_channel_config(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio.change_channel_config(call.int(0), call.int(1)).into()
}

fn set_channel_data_len(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio.set_channel_data_len(call.int(0), call.int(1)).into()
}

fn output_panned_blocking(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    let buffer = call.buffer(&ctx.memory, 3);
    ctx.audio
        .output_panned_blocking(call.int(0), call.int(1), call.int(2), buffer)
}

fn output_blocking(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    let buffer = call.buffer(&ctx.memory, 2);
    ctx.audio.output_blocking(call.int(0), call.int(1), buffer)
}

fn output(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    let buffer = call.buffer(&ctx.memory, 2);
    ctx.audio.output(call.int(0), call.int(1), buffer).into()
}

fn output_panned(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    let buffer = call.buffer(&ctx.memory, 3);
    ctx.audio
        .output_panned(call.int(0), call.int(1), call.int(2), buffer)
        .into()
}

fn change_channel_volume(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio
        .change_channel_volume(call.int(0), call.int(1), call.int(2))
        .into()
}

fn get_channel_rest_len(ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
    ctx.audio.get_channel_rest_len(call.int(0)).into()
}

pub static EXPORTS: &[NativeFunction] = &[
    NativeFunction {
        nid: 0x01562BA3,
        name: "sceAudioOutput2Reserve",
        firmware: 150,
        signature: sig(&[Int]),
        handler: output2_reserve,
    },
    NativeFunction {
        nid: 0x2D53F36E,
        name: "sceAudioOutput2OutputBlocking",
        firmware: 150,
        signature: sig(&[Int, Ptr]),
        handler: output2_output_blocking,
    },
    NativeFunction {
        nid: 0x5EC81C55,
        name: "sceAudioChReserve",
        firmware: 150,
        signature: sig(&[Int, Int, Int]),
        handler: ch_reserve,
    },
    NativeFunction {
        nid: 0x6FC46853,
        name: "sceAudioChRelease",
        firmware: 150,
        signature: sig(&[Int]),
        handler: ch_release,
    },
    NativeFunction {
        nid: 0x95FD0C2D,
        name: "sceAudioChangeChannelConfig",
        firmware: 150,
        signature: sig(&[Int, Int]),
        handler: change_channel_config,
    },
    NativeFunction {
        nid: 0xCB2E439E,
        name: "sceAudioSetChannelDataLen",
        firmware: 150,
        signature: sig(&[Int, Int]),
        handler: set_channel_data_len,
    },
    NativeFunction {
        nid: 0x13F592BC,
        name: "sceAudioOutputPannedBlocking",
        firmware: 150,
        signature: sig(&[Int, Int, Int, Ptr]),
        handler: output_panned_blocking,
    },
    NativeFunction {
        nid: 0x136CAF51,
        name: "sceAudioOutputBlocking",
        firmware: 150,
        signature: sig(&[Int, Int, Ptr]),
        handler: output_blocking,
    },
    NativeFunction {
        nid: 0x8C1009B2,
        name: "sceAudioOutput",
        firmware: 150,
        signature: sig(&[Int, Int, Ptr]),
        handler: output,
    },
    NativeFunction {
        nid: 0xE2D56B2D,
        name: "sceAudioOutputPanned",
        firmware: 150,
        signature: sig(&[Int, Int, Int, Ptr]),
        handler: output_panned,
    },
    NativeFunction {
        nid: 0xB7E1D8E7,
        name: "sceAudioChangeChannelVolume",
        firmware: 150,
        signature: sig(&[Int, Int, Int]),
        handler: change_channel_volume,
    },
    NativeFunction {
        nid: 0xB011922F,
        name: "sceAudioGetChannelRestLen",
        firmware: 150,
        signature: sig(&[Int]),
        handler: get_channel_rest_len,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HleRegistry;

    #[test]
    fn every_export_registers() {
        let mut registry = HleRegistry::new(150);
        assert_eq!(registry.register_module(MODULE, EXPORTS).unwrap(), 12);
        assert_eq!(
            registry.lookup(0xB011922F).map(|f| f.name),
            Some("sceAudioGetChannelRestLen")
        );
    }
}
