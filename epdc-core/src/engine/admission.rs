//! Admission control

use super::Engine;
use crate::config::UpdateScheme;
use crate::error::Error;
use crate::geometry::Rect;
use crate::traits::{ImagePipeline, PowerRails, RegisterBus, TemperatureSensor};
use crate::update::{Marker, PendingUpdate, UpdateFlags, UpdateKind, UpdateRequest};
use crate::waveform::WaveformMode;

/// Pre-admission verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Admission {
    /// Everything in flight must drain before this request is admitted
    pub drain_first: bool,
}

impl<R, P, S, X> Engine<R, P, S, X>
where
    R: RegisterBus,
    P: PowerRails,
    S: TemperatureSensor,
    X: ImagePipeline,
{
    /// Check a request without admitting it
    pub fn prepare(&self, request: &UpdateRequest) -> Result<Admission, Error> {
        if !self.ready {
            return Err(Error::NotReady);
        }
        if self.power.is_locked() {
            return Err(Error::Locked);
        }
        self.validate(request)?;
        if self.pool.free_count() == 0 {
            debug!("no free processing buffer");
            return Err(Error::NoBufferAvailable);
        }
        Ok(Admission {
            drain_first: self.whitening_transition(request).is_some(),
        })
    }

    /// Admit a request
    ///
    /// Whitening requests need a drain beforehand, see [`prepare`]; this
    /// call does not block for it. Returns the marker if it is tracked.
    ///
    /// [`prepare`]: Self::prepare
    pub fn submit(&mut self, mut request: UpdateRequest) -> Result<Option<Marker>, Error> {
        self.prepare(&request)?;

        if let Some(entering) = self.whitening_transition(&request) {
            self.whitening = entering;
            request.flags |= UpdateFlags::WHITEN;
            if !entering {
                request.region = self.display_rect();
            }
            debug!("whitening request, phase now {}", entering);
        }

        let order = self.next_order;
        let id = self
            .pool
            .admit(PendingUpdate::new(request, order))
            .ok_or(Error::NoBufferAvailable)?;
        self.next_order = self.next_order.wrapping_add(1);

        let mut marker = request.marker;
        if let Some(m) = marker {
            if !self.markers.register(m) {
                warn!("marker table full, {} not tracked", m.value());
                marker = None;
            }
        }

        self.stats.submitted += 1;
        self.bump();
        trace!("admitted order {} into buffer {}", order, id.index());

        if self.config.scheme == UpdateScheme::Snapshot {
            if let Err(e) = self.process_candidate(id) {
                self.fail_candidate(id, e);
                return Err(e);
            }
        }

        Ok(marker)
    }

    fn validate(&self, request: &UpdateRequest) -> Result<(), Error> {
        let display = self.display_rect();
        if request.region.is_empty() || !display.contains(&request.region) {
            debug!("region outside display");
            return Err(Error::InvalidRegion);
        }

        if !self.config.waveform_modes.accepts(request.waveform) {
            debug!("waveform mode {:?} rejected", request.waveform);
            return Err(Error::InvalidWaveformMode);
        }

        match request.alt_source {
            Some(alt) => {
                let same_size = alt.region.width == request.region.width
                    && alt.region.height == request.region.height;
                if !same_size || !Rect::sized(alt.width, alt.height).contains(&alt.region) {
                    debug!("alternate source does not match update region");
                    return Err(Error::InvalidRegion);
                }
                // Every byte offset into the buffer must fit the address width
                let bytes = alt.width as u64
                    * alt.height as u64
                    * self.config.bytes_per_pixel as u64;
                if bytes > u32::MAX as u64 {
                    debug!("alternate source {}x{} too large", alt.width, alt.height);
                    return Err(Error::InvalidRegion);
                }
            }
            None if request.flags.contains(UpdateFlags::ALT_SOURCE) => {
                return Err(Error::InvalidRegion);
            }
            None => {}
        }

        Ok(())
    }

    /// Whitening phase change this request would trigger
    ///
    /// An A2 request outside the phase enters it; a full GC16 request inside
    /// the phase leaves it.
    fn whitening_transition(&self, request: &UpdateRequest) -> Option<bool> {
        let modes = &self.config.waveform_modes;
        if !self.whitening && modes.is(request.waveform, WaveformMode::A2) {
            Some(true)
        } else if self.whitening
            && request.kind == UpdateKind::Full
            && modes.is(request.waveform, WaveformMode::Gc16)
        {
            Some(false)
        } else {
            None
        }
    }
}
