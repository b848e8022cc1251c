//! The `sceAudio` hardware channel pool.
//!
//! Eight output lines, each reserved by guest code, configured, fed with
//! PCM buffers and released. The pool is owned by the emulator session
//! ([`crate::HleContext`]) and only touched from the scheduler thread.

pub mod engine;

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use pspemu_async::AsyncResult;
use tracing::instrument;

use crate::errors::SceKernelError;
use crate::waiting::{AcceptCallbacks, HleOutcome, WaitingDescriptor};

pub use self::engine::{AudioBackend, AudioChannel, BufferedAudio};

pub const MAX_CHANNELS: usize = 8;
/// Volume that maps to unity gain.
pub const MAX_VOLUME: i32 = 0x8000;
/// Sample counts passed to `sceAudioSetChannelDataLen` must be multiples of this.
pub const SAMPLE_ALIGNMENT: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum AudioFormat {
    Stereo = 0x00,
    Mono = 0x10,
}

impl AudioFormat {
    pub fn channel_count(self) -> usize {
        match self {
            AudioFormat::Stereo => 2,
            AudioFormat::Mono => 1,
        }
    }

    fn parse(raw: i32) -> Result<Self, SceKernelError> {
        Self::try_from(raw as u32).map_err(|_| SceKernelError::AudioInvalidFormat)
    }
}

/// Maps a guest volume to a gain in `[0, 1]`.
pub fn gain(volume: i32) -> f32 {
    (volume as f32 / MAX_VOLUME as f32).clamp(0.0, 1.0)
}

/// One hardware output line.
#[derive(Debug)]
pub struct Channel {
    id: i32,
    sample_count: u32,
    format: AudioFormat,
    line: Option<Box<dyn AudioChannel>>,
    last_output: Option<AsyncResult<i32>>,
}

impl Channel {
    fn new(id: i32, sample_count: u32) -> Self {
        Self {
            id,
            sample_count,
            format: AudioFormat::Stereo,
            line: None,
            last_output: None,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Allocated channels own an engine line; free ones never do.
    pub fn is_allocated(&self) -> bool {
        self.line.is_some()
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Samples consumed per output call, across all interleaved channels.
    pub fn total_sample_count(&self) -> usize {
        self.sample_count as usize * self.format.channel_count()
    }

    /// The most recent playback submission, including fire-and-forget ones.
    pub fn last_output(&self) -> Option<&AsyncResult<i32>> {
        self.last_output.as_ref()
    }
}

#[derive(Debug)]
pub struct SceAudio {
    backend: Arc<dyn AudioBackend>,
    default_sample_count: u32,
    channels: Vec<Channel>,
}

impl SceAudio {
    pub fn new(backend: Arc<dyn AudioBackend>, default_sample_count: u32) -> Self {
        let channels = (0..MAX_CHANNELS as i32)
            .map(|id| Channel::new(id, default_sample_count))
            .collect();
        Self {
            backend,
            default_sample_count,
            channels,
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, channel_id: i32) -> Option<&Channel> {
        usize::try_from(channel_id)
            .ok()
            .and_then(|index| self.channels.get(index))
    }

    pub fn default_sample_count(&self) -> u32 {
        self.default_sample_count
    }

    fn channel_mut(&mut self, channel_id: i32) -> Result<&mut Channel, SceKernelError> {
        usize::try_from(channel_id)
            .ok()
            .and_then(|index| self.channels.get_mut(index))
            .ok_or(SceKernelError::AudioInvalidChannel)
    }

    #[instrument(level = "debug", skip_all, fields(%sample_count), ret)]
    pub fn output2_reserve(&mut self, sample_count: i32) -> i32 {
        tracing::warn!("sceAudioOutput2Reserve is not implemented");
        0
    }

    /// Parks the caller for one scheduler turn and reports success.
    #[instrument(level = "debug", skip_all, fields(%volume), ret)]
    pub fn output2_output_blocking(&mut self, volume: i32, buffer: Option<&[u8]>) -> HleOutcome {
        hle_try!(buffer; SceKernelError::IllegalArgument);
        WaitingDescriptor::new(
            "sceAudioOutput2OutputBlocking",
            0,
            AsyncResult::resolved(0),
            AcceptCallbacks::No,
        )
        .into()
    }

    /// Reserves `channel_id`, or the first free channel when it is negative.
    #[instrument(level = "debug", skip_all, fields(%channel_id, %sample_count, %format), ret)]
    pub fn ch_reserve(&mut self, channel_id: i32, sample_count: i32, format: i32) -> i32 {
        if channel_id >= MAX_CHANNELS as i32 {
            return SceKernelError::AudioInvalidChannel.into();
        }
        let channel_id = if channel_id < 0 {
            hle_try!(
                self.channels.iter().find(|channel| !channel.is_allocated()).map(Channel::id);
                SceKernelError::AudioNoChannelsAvailable
            )
        } else {
            channel_id
        };

        let format = hle_try!(AudioFormat::parse(format));
        let sample_count = hle_try!(
            u32::try_from(sample_count).map_err(|_| SceKernelError::IllegalArgument)
        );

        let backend = self.backend.clone();
        let channel = hle_try!(self.channel_mut(channel_id));
        if channel.is_allocated() {
            return SceKernelError::AudioChannelBusy.into();
        }

        // Hardware lines run continuously once reserved.
        let mut line = backend.create_channel();
        line.start();
        channel.line = Some(line);
        channel.sample_count = sample_count;
        channel.format = format;
        channel.last_output = None;
        channel_id
    }

    /// Stops the line, abandoning any in-flight output, and frees the slot.
    #[instrument(level = "debug", skip_all, fields(%channel_id), ret)]
    pub fn ch_release(&mut self, channel_id: i32) -> i32 {
        let channel = hle_try!(self.channel_mut(channel_id));
        let mut line = hle_try!(channel.line.take(); SceKernelError::AudioInvalidChannel);
        line.stop();
        drop(line);
        0
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %format), ret)]
    pub fn change_channel_config(&mut self, channel_id: i32, format: i32) -> i32 {
        let channel = hle_try!(self.channel_mut(channel_id));
        channel.format = hle_try!(AudioFormat::parse(format));
        0
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %sample_count), ret)]
    pub fn set_channel_data_len(&mut self, channel_id: i32, sample_count: i32) -> i32 {
        let channel = hle_try!(self.channel_mut(channel_id));
        if sample_count < 0 {
            return SceKernelError::IllegalArgument.into();
        }
        if sample_count % SAMPLE_ALIGNMENT != 0 {
            return SceKernelError::AudioOutputSampleDataSizeNotAligned.into();
        }
        channel.sample_count = sample_count as u32;
        0
    }

    /// Validates the call and queues one buffer on the channel's line.
    fn submit(
        &mut self,
        channel_id: i32,
        left_volume: i32,
        right_volume: i32,
        buffer: Option<&[u8]>,
    ) -> Result<AsyncResult<i32>, SceKernelError> {
        let buffer = buffer.ok_or(SceKernelError::IllegalArgument)?;
        let channel = self.channel_mut(channel_id)?;
        let total = channel.total_sample_count();
        let channels = channel.format.channel_count();
        let line = channel
            .line
            .as_mut()
            .ok_or(SceKernelError::AudioChannelNotInit)?;

        let bytes = buffer
            .get(..total * 2)
            .ok_or(SceKernelError::IllegalAddress)?;
        let mut samples = vec![0i16; total];
        LittleEndian::read_i16_into(bytes, &mut samples);

        let result = line.play(channels, samples, gain(left_volume), gain(right_volume));
        channel.last_output = Some(result.clone());
        Ok(result)
    }

    fn blocking(
        &mut self,
        name: &'static str,
        channel_id: i32,
        left_volume: i32,
        right_volume: i32,
        buffer: Option<&[u8]>,
    ) -> HleOutcome {
        let result = hle_try!(self.submit(channel_id, left_volume, right_volume, buffer));
        WaitingDescriptor::new(name, channel_id, result, AcceptCallbacks::No).into()
    }

    /// Fire-and-forget: playback failures are only visible via
    /// [`Channel::last_output`].
    fn non_blocking(
        &mut self,
        channel_id: i32,
        left_volume: i32,
        right_volume: i32,
        buffer: Option<&[u8]>,
    ) -> i32 {
        hle_try!(self.submit(channel_id, left_volume, right_volume, buffer));
        0
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %volume))]
    pub fn output_blocking(&mut self, channel_id: i32, volume: i32, buffer: Option<&[u8]>) -> HleOutcome {
        self.blocking("sceAudioOutputBlocking", channel_id, volume, volume, buffer)
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %left_volume, %right_volume))]
    pub fn output_panned_blocking(
        &mut self,
        channel_id: i32,
        left_volume: i32,
        right_volume: i32,
        buffer: Option<&[u8]>,
    ) -> HleOutcome {
        self.blocking(
            "sceAudioOutputPannedBlocking",
            channel_id,
            left_volume,
            right_volume,
            buffer,
        )
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %volume), ret)]
    pub fn output(&mut self, channel_id: i32, volume: i32, buffer: Option<&[u8]>) -> i32 {
        self.non_blocking(channel_id, volume, volume, buffer)
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %left_volume, %right_volume), ret)]
    pub fn output_panned(
        &mut self,
        channel_id: i32,
        left_volume: i32,
        right_volume: i32,
        buffer: Option<&[u8]>,
    ) -> i32 {
        self.non_blocking(channel_id, left_volume, right_volume, buffer)
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id, %left_volume, %right_volume), ret)]
    pub fn change_channel_volume(&mut self, channel_id: i32, left_volume: i32, right_volume: i32) -> i32 {
        tracing::warn!("sceAudioChangeChannelVolume is not implemented");
        0
    }

    #[instrument(level = "debug", skip_all, fields(%channel_id), ret)]
    pub fn get_channel_rest_len(&mut self, channel_id: i32) -> i32 {
        tracing::warn!("sceAudioGetChannelRestLen is not implemented");
        0
    }
}
