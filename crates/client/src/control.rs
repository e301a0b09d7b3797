//! Outbound control messages over the RTC engine's message channel.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use phonecast_protocol::{BitrateModel, ControlMessage, DefinitionError, SdkEvent, StreamDefinition};
use tracing::{debug, info, warn};

use crate::callbacks::SessionCallbacks;
use crate::pact::{Pact, PactError};

/// Reliable, ordered, at-most-once message channel to the remote device.
/// Implementations settle the returned pact when the engine acknowledges
/// (or refuses) the send.
pub trait MessageChannel {
    fn send_text(&self, text: String) -> Pact<()>;
    fn send_binary(&self, payload: Bytes) -> Pact<()>;
}

/// Minimum spacing between two inactivity-deadline resets.
pub const IDLE_RESET_THROTTLE: Duration = Duration::from_millis(500);

/// Inactivity deadline, pushed back by every user-originated send.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Option<Duration>,
    last_reset: Option<Instant>,
    deadline: Option<Instant>,
}

impl IdleTimer {
    /// `None` disables the timer.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            last_reset: None,
            deadline: None,
        }
    }

    /// Push the deadline back. Returns `false` when disabled or throttled.
    pub fn touch(&mut self, now: Instant) -> bool {
        let Some(timeout) = self.timeout else {
            return false;
        };
        if let Some(last) = self.last_reset
            && now.saturating_duration_since(last) < IDLE_RESET_THROTTLE
        {
            return false;
        }
        self.last_reset = Some(now);
        self.deadline = Some(now + timeout);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
        self.last_reset = None;
    }
}

pub struct ControlChannel {
    channel: Rc<dyn MessageChannel>,
    callbacks: Rc<SessionCallbacks>,
    idle: RefCell<IdleTimer>,
}

impl ControlChannel {
    pub fn new(
        channel: Rc<dyn MessageChannel>,
        callbacks: Rc<SessionCallbacks>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            channel,
            callbacks,
            idle: RefCell::new(IdleTimer::new(idle_timeout)),
        }
    }

    /// Send a user-originated message. Resets the inactivity deadline.
    pub fn send(&self, message: &ControlMessage) -> Pact<()> {
        self.touch_idle(Instant::now());
        self.dispatch(message)
    }

    /// Send an already-serialized user message as is.
    pub fn send_raw(&self, text: impl Into<String>) -> Pact<()> {
        self.touch_idle(Instant::now());
        self.report(self.channel.send_text(text.into()))
    }

    /// Ask the remote encoder for an immediate keyframe.
    pub fn request_keyframe(&self) -> Pact<()> {
        debug!("Requesting keyframe");
        self.dispatch(&ControlMessage::Sdk(SdkEvent::RequestIFrame))
    }

    /// Ask the device to push its UI state again. Sent whenever the channel
    /// comes up, since the device's first push can be missed.
    pub fn request_ui_refresh(&self) -> Pact<()> {
        self.dispatch(&ControlMessage::Sdk(SdkEvent::UpdateUiH5))
    }

    /// Switch the remote encoder profile. Out-of-range ids are refused and
    /// nothing is sent.
    pub fn set_stream_definition(
        &self,
        definition: StreamDefinition,
    ) -> Result<Pact<()>, DefinitionError> {
        definition.validate()?;
        info!(
            definition_id = definition.definition_id,
            framerate_id = definition.framerate_id,
            bitrate_id = definition.bitrate_id,
            "Updating stream definition"
        );
        Ok(self.dispatch(&ControlMessage::Sdk(SdkEvent::DefinitionUpdate(
            definition,
        ))))
    }

    /// Inject the one-byte bitrate model opcode.
    pub fn change_bitrate_model(&self, model: BitrateModel) -> Pact<()> {
        info!(opcode = %model, "Sending bitrate model opcode");
        let payload = Bytes::copy_from_slice(&model.serialize());
        self.report(self.channel.send_binary(payload))
    }

    pub fn touch_idle(&self, now: Instant) -> bool {
        self.idle.borrow_mut().touch(now)
    }

    pub fn idle_expired(&self, now: Instant) -> bool {
        self.idle.borrow().expired(now)
    }

    pub fn disarm_idle(&self) {
        self.idle.borrow_mut().disarm();
    }

    fn dispatch(&self, message: &ControlMessage) -> Pact<()> {
        let text = match message
            .to_wire()
            .context("Failed to serialize control message")
        {
            Ok(text) => text,
            Err(e) => return self.report(Pact::reject(e)),
        };
        self.report(self.channel.send_text(text))
    }

    fn report(&self, pact: Pact<()>) -> Pact<()> {
        let callbacks = Rc::clone(&self.callbacks);
        pact.on_settled(move |outcome| {
            if let Err(e) = outcome {
                warn!(error = %e, "Control message send failed");
                (callbacks.on_send_user_error)(&e);
            }
        });
        pact
    }
}

impl From<DefinitionError> for PactError {
    fn from(err: DefinitionError) -> Self {
        anyhow::Error::new(err).into()
    }
}
