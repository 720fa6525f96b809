// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The constant-bit-rate MP3 encoder node.
//!
//! A PCM-to-bytes node wrapping LAME. At most one input at a time; the live
//! encoder is built lazily when an input attaches, and rebuilt (after a
//! flush that delivers any residual bytes to subscribers) when a new input
//! has a different channel count. Encoding runs on the subscriber thread of
//! the single attached input, so the encoder handle has exactly one writer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use aircast_core::{
    next_node_id, AircastError, EncodedProducer, Fanout, NodeId, PcmProducer, Result,
    SubscriberId,
};
use bytes::Bytes;
use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm};

/// MP3 qualities accepted by the encoder (2 = best, 7 = fastest).
pub const QUALITY_RANGE: std::ops::RangeInclusive<u8> = 2..=7;

struct EncoderState {
    encoder: mp3lame_encoder::Encoder,
    channels: u16,
}

struct Mp3Shared {
    fanout: Fanout<Bytes>,
    encoder: Mutex<Option<EncoderState>>,
}

struct AttachedInput {
    source: Arc<dyn PcmProducer>,
    subscription: SubscriberId,
}

/// A CBR MP3 encoder node.
pub struct Mp3Encoder {
    id: NodeId,
    quality: u8,
    bit_rate: u32,
    sample_rate: u32,
    shared: Arc<Mp3Shared>,
    input: Mutex<Option<AttachedInput>>,
}

impl Mp3Encoder {
    /// Create an encoder with the given quality (2-7) and bit rate in kbps.
    pub fn new(quality: u8, bit_rate: u32, sample_rate: u32) -> Result<Self> {
        if !QUALITY_RANGE.contains(&quality) {
            return Err(AircastError::EncoderFailed(format!(
                "quality {quality} is outside the range 2-7"
            )));
        }
        // Fail early on an unsupported bit rate rather than at first attach.
        birtate(bit_rate)?;
        let id = next_node_id();
        Ok(Self {
            id,
            quality,
            bit_rate,
            sample_rate,
            shared: Arc::new(Mp3Shared { fanout: Fanout::new(id), encoder: Mutex::new(None) }),
            input: Mutex::new(None),
        })
    }

    /// The configured bit rate in kbps.
    pub fn bit_rate(&self) -> u32 {
        self.bit_rate
    }

    /// The configured quality (2 = best, 7 = fastest).
    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<AttachedInput>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The producer currently encoded, if any.
    pub fn input_id(&self) -> Option<NodeId> {
        self.lock_input().as_ref().map(|attached| attached.source.node_id())
    }

    /// Attach a PCM source (or clear with `None`).
    ///
    /// A source with a different channel count than the live encoder forces
    /// a flush (residual bytes go to subscribers) and a rebuild.
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) -> Result<()> {
        {
            let input = self.lock_input();
            if input.as_ref().map(|attached| attached.source.node_id())
                == source.as_ref().map(|s| s.node_id())
            {
                return Ok(());
            }
        }

        // Detach the old input first: the encoder is single-writer, so no
        // encode can be in flight while we reconfigure below.
        if let Some(previous) = self.lock_input().take() {
            previous.source.unsubscribe(previous.subscription);
        }

        let Some(source) = source else {
            // Clearing the input flushes and destroys the encoder.
            if let Some(residual) = self.shared.take_flushed() {
                self.shared.fanout.publish(&residual);
            }
            return Ok(());
        };

        let channels = source.channels();
        {
            let mut encoder = self.shared.lock_encoder();
            let needs_rebuild =
                encoder.as_ref().is_some_and(|state| state.channels != channels);
            if needs_rebuild {
                let flushed = encoder.take().and_then(|state| flush(state));
                drop(encoder);
                if let Some(residual) = flushed {
                    self.shared.fanout.publish(&residual);
                }
                self.shared.lock_encoder().replace(self.build_encoder(channels)?);
            } else if encoder.is_none() {
                encoder.replace(self.build_encoder(channels)?);
            }
        }

        let weak: Weak<Mp3Shared> = Arc::downgrade(&self.shared);
        let subscription = source.subscribe(Box::new(move |block: &aircast_core::PcmBlock| {
            if let Some(shared) = weak.upgrade() {
                shared.encode_block(block.samples());
            }
        }));
        *self.lock_input() = Some(AttachedInput { source, subscription });
        Ok(())
    }

    /// Flush and detach.
    pub fn close(&self) -> Result<()> {
        self.set_input(None)
    }

    fn build_encoder(&self, channels: u16) -> Result<EncoderState> {
        let channels_u8 = u8::try_from(channels).map_err(|_| {
            AircastError::EncoderFailed(format!("channel count {channels} not encodable"))
        })?;
        let mut builder = Builder::new()
            .ok_or_else(|| AircastError::EncoderFailed("failed to allocate LAME".to_string()))?;
        builder
            .set_num_channels(channels_u8)
            .map_err(|e| AircastError::EncoderFailed(format!("channels: {e:?}")))?;
        builder
            .set_sample_rate(self.sample_rate)
            .map_err(|e| AircastError::EncoderFailed(format!("sample rate: {e:?}")))?;
        builder
            .set_brate(birtate(self.bit_rate)?)
            .map_err(|e| AircastError::EncoderFailed(format!("bit rate: {e:?}")))?;
        builder
            .set_quality(quality_level(self.quality))
            .map_err(|e| AircastError::EncoderFailed(format!("quality: {e:?}")))?;
        let encoder =
            builder.build().map_err(|e| AircastError::EncoderFailed(format!("build: {e:?}")))?;
        tracing::info!(
            channels,
            bit_rate = self.bit_rate,
            quality = self.quality,
            "MP3 encoder built"
        );
        Ok(EncoderState { encoder, channels })
    }
}

impl EncodedProducer for Mp3Encoder {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn encoded(&self) -> &Fanout<Bytes> {
        &self.shared.fanout
    }
}

impl Mp3Shared {
    fn lock_encoder(&self) -> MutexGuard<'_, Option<EncoderState>> {
        self.encoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode one block and publish any produced bytes.
    fn encode_block(&self, samples: &[i16]) {
        let produced = {
            let mut state = self.lock_encoder();
            let Some(state) = state.as_mut() else {
                return;
            };
            let mut out = Vec::new();
            match state.encoder.encode_to_vec(InterleavedPcm(samples), &mut out) {
                Ok(_) => out,
                Err(e) => {
                    tracing::warn!("MP3 encode failed, dropping block: {e:?}");
                    return;
                },
            }
        };
        if !produced.is_empty() {
            self.fanout.publish(&Bytes::from(produced));
        }
    }

    /// Tear down the encoder, returning its residual bytes (if any).
    fn take_flushed(&self) -> Option<Bytes> {
        let state = self.lock_encoder().take()?;
        flush(state)
    }
}

fn flush(state: EncoderState) -> Option<Bytes> {
    let mut state = state;
    let mut out = Vec::new();
    match state.encoder.flush_to_vec::<FlushNoGap>(&mut out) {
        Ok(_) if !out.is_empty() => Some(Bytes::from(out)),
        Ok(_) => None,
        Err(e) => {
            // An encoder that never encoded anything may refuse to flush.
            tracing::debug!("MP3 flush produced nothing: {e:?}");
            None
        },
    }
}

/// Map a kbps value onto the LAME CBR table.
fn birtate(kbps: u32) -> Result<mp3lame_encoder::Birtate> {
    use mp3lame_encoder::Birtate;
    let rate = match kbps {
        8 => Birtate::Kbps8,
        16 => Birtate::Kbps16,
        24 => Birtate::Kbps24,
        32 => Birtate::Kbps32,
        40 => Birtate::Kbps40,
        48 => Birtate::Kbps48,
        64 => Birtate::Kbps64,
        80 => Birtate::Kbps80,
        96 => Birtate::Kbps96,
        112 => Birtate::Kbps112,
        128 => Birtate::Kbps128,
        160 => Birtate::Kbps160,
        192 => Birtate::Kbps192,
        224 => Birtate::Kbps224,
        256 => Birtate::Kbps256,
        320 => Birtate::Kbps320,
        other => {
            return Err(AircastError::EncoderFailed(format!("unsupported bit rate {other} kbps")))
        },
    };
    Ok(rate)
}

/// Map the 2-7 quality scale onto LAME's quality enum.
fn quality_level(quality: u8) -> mp3lame_encoder::Quality {
    use mp3lame_encoder::Quality;
    match quality {
        2 => Quality::NearBest,
        3 => Quality::VeryNice,
        4 => Quality::Nice,
        5 => Quality::Good,
        6 => Quality::Decent,
        _ => Quality::Ok,
    }
}
