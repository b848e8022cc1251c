//! Seam toward the host's audio output, plus a buffered reference engine.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use pspemu_async::{AsyncError, AsyncResult, Resolver};

use crate::errors::SceKernelError;

/// Host audio output able to hand out independent lines.
pub trait AudioBackend: fmt::Debug + Send + Sync {
    fn create_channel(&self) -> Box<dyn AudioChannel>;
}

/// One playback line. Dropping it must behave like [`AudioChannel::stop`].
pub trait AudioChannel: fmt::Debug + Send {
    fn start(&mut self);

    /// Stops playback and abandons every queued submission.
    fn stop(&mut self);

    /// Queues interleaved `samples` (`channels` per frame) with the given
    /// gains, each in `[0, 1]`. The result settles to `0` once played.
    fn play(&mut self, channels: usize, samples: Vec<i16>, left: f32, right: f32)
    -> AsyncResult<i32>;
}

struct Submission {
    channels: usize,
    samples: Vec<i16>,
    frame: usize,
    left: f32,
    right: f32,
    resolver: Resolver<i32>,
}

impl Submission {
    fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn next_frame(&mut self) -> (f32, f32) {
        let base = self.frame * self.channels;
        let (l, r) = match self.channels {
            1 => (self.samples[base], self.samples[base]),
            _ => (self.samples[base], self.samples[base + 1]),
        };
        self.frame += 1;
        (f32::from(l) * self.left, f32::from(r) * self.right)
    }
}

#[derive(Default)]
struct Line {
    running: bool,
    queue: VecDeque<Submission>,
}

#[derive(Default)]
struct Mixer {
    next_id: u64,
    lines: BTreeMap<u64, Line>,
}

/// Reference engine that queues submissions until the host pulls frames.
///
/// Nothing plays by itself: the host calls [`BufferedAudio::mix`] at its own
/// rate and each submission completes once all of its frames were mixed.
#[derive(Clone, Default)]
pub struct BufferedAudio {
    mixer: Arc<Mutex<Mixer>>,
}

impl BufferedAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mixes `frames` stereo frames from every running line.
    ///
    /// Returns interleaved left/right samples. Lines without queued data
    /// contribute silence.
    pub fn mix(&self, frames: usize) -> Vec<i16> {
        let mut accumulator = vec![0f32; frames * 2];
        let mut finished = Vec::new();
        {
            let mut mixer = self.mixer.lock();
            for line in mixer.lines.values_mut().filter(|line| line.running) {
                let mut out = accumulator.chunks_exact_mut(2);
                'line: while let Some(submission) = line.queue.front_mut() {
                    while submission.frame < submission.frames() {
                        let Some(slot) = out.next() else {
                            break 'line;
                        };
                        let (l, r) = submission.next_frame();
                        slot[0] += l;
                        slot[1] += r;
                    }
                    if let Some(done) = line.queue.pop_front() {
                        finished.push(done.resolver);
                    }
                }
            }
        }
        // Settle outside the lock; wakers may call back into the engine.
        for resolver in finished {
            resolver.resolve(0);
        }
        accumulator
            .into_iter()
            .map(|sample| sample.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
            .collect()
    }

    /// Submissions still waiting to be mixed, across all lines.
    pub fn queued(&self) -> usize {
        self.mixer.lock().lines.values().map(|line| line.queue.len()).sum()
    }

    pub fn open_lines(&self) -> usize {
        self.mixer.lock().lines.len()
    }
}

impl fmt::Debug for BufferedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedAudio")
            .field("lines", &self.open_lines())
            .field("queued", &self.queued())
            .finish()
    }
}

impl AudioBackend for BufferedAudio {
    fn create_channel(&self) -> Box<dyn AudioChannel> {
        let mut mixer = self.mixer.lock();
        let id = mixer.next_id;
        mixer.next_id += 1;
        mixer.lines.insert(id, Line::default());
        Box::new(BufferedChannel {
            id,
            mixer: self.mixer.clone(),
        })
    }
}

struct BufferedChannel {
    id: u64,
    mixer: Arc<Mutex<Mixer>>,
}

impl BufferedChannel {
    /// Takes the queued submissions out so their resolvers drop unlocked.
    fn drain(&self, running: bool) -> VecDeque<Submission> {
        let mut mixer = self.mixer.lock();
        match mixer.lines.get_mut(&self.id) {
            Some(line) => {
                line.running = running;
                std::mem::take(&mut line.queue)
            }
            None => VecDeque::new(),
        }
    }
}

impl fmt::Debug for BufferedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedChannel").field("id", &self.id).finish()
    }
}

impl AudioChannel for BufferedChannel {
    fn start(&mut self) {
        if let Some(line) = self.mixer.lock().lines.get_mut(&self.id) {
            line.running = true;
        }
    }

    fn stop(&mut self) {
        let abandoned = self.drain(false);
        if !abandoned.is_empty() {
            tracing::debug!(line = self.id, count = abandoned.len(), "abandoning queued audio");
        }
    }

    fn play(
        &mut self,
        channels: usize,
        samples: Vec<i16>,
        left: f32,
        right: f32,
    ) -> AsyncResult<i32> {
        if channels == 0 || samples.len() < channels {
            return AsyncResult::resolved(0);
        }
        let mut mixer = self.mixer.lock();
        let Some(line) = mixer.lines.get_mut(&self.id).filter(|line| line.running) else {
            return AsyncResult::rejected(AsyncError::failed(
                SceKernelError::AudioChannelNotInit.code(),
                "audio line is stopped",
            ));
        };
        let (result, resolver) = AsyncResult::pending();
        line.queue.push_back(Submission {
            channels,
            samples,
            frame: 0,
            left,
            right,
            resolver,
        });
        result
    }
}

impl Drop for BufferedChannel {
    fn drop(&mut self) {
        let line = self.mixer.lock().lines.remove(&self.id);
        drop(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pspemu_async::AsyncState;

    #[test]
    fn submissions_complete_once_mixed() {
        let audio = BufferedAudio::new();
        let mut line = audio.create_channel();
        line.start();

        let first = line.play(2, vec![100, -100, 200, -200], 1.0, 0.5);
        let second = line.play(1, vec![1000], 0.5, 0.5);
        assert_eq!(audio.queued(), 2);

        assert_eq!(audio.mix(1), vec![100, -50]);
        assert_eq!(first.state(), AsyncState::Pending);

        assert_eq!(audio.mix(2), vec![200, -100, 500, 500]);
        assert_eq!(first.try_get(), Some(Ok(0)));
        assert_eq!(second.try_get(), Some(Ok(0)));
        assert_eq!(audio.mix(1), vec![0, 0]);
    }

    #[test]
    fn lines_are_summed_and_clamped() {
        let audio = BufferedAudio::new();
        let mut a = audio.create_channel();
        let mut b = audio.create_channel();
        a.start();
        b.start();
        let _ = a.play(1, vec![i16::MAX], 1.0, 1.0);
        let _ = b.play(1, vec![i16::MAX], 1.0, 0.0);
        assert_eq!(audio.mix(1), vec![i16::MAX, i16::MAX]);
    }

    #[test]
    fn stopping_cancels_queued_submissions() {
        let audio = BufferedAudio::new();
        let mut line = audio.create_channel();
        line.start();
        let pending = line.play(1, vec![1; 64], 1.0, 1.0);

        line.stop();
        assert_eq!(pending.try_get(), Some(Err(AsyncError::Cancelled)));
        assert_eq!(audio.queued(), 0);

        let rejected = line.play(1, vec![1; 64], 1.0, 1.0);
        assert_eq!(rejected.state(), AsyncState::Rejected);
    }

    #[test]
    fn dropping_a_line_removes_it() {
        let audio = BufferedAudio::new();
        let mut line = audio.create_channel();
        line.start();
        let pending = line.play(2, vec![1; 128], 1.0, 1.0);
        assert_eq!(audio.open_lines(), 1);

        drop(line);
        assert_eq!(audio.open_lines(), 0);
        assert_eq!(pending.try_get(), Some(Err(AsyncError::Cancelled)));
    }
}
