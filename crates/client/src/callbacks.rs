//! Application callbacks for a session.
//!
//! Applications register only the callbacks they care about. Missing ones
//! are filled with no-ops once, in [`CallbacksBuilder::build`], so the rest
//! of the crate can call any callback unconditionally.

use phonecast_protocol::RemoteVideoStats;

use crate::pact::PactError;
use crate::transform::RotationState;

type Notify = Box<dyn Fn()>;
type NotifyWith<T> = Box<dyn Fn(&T)>;

fn noop() {}

fn ignore<T: ?Sized>(_: &T) {}

pub struct SessionCallbacks {
    pub on_connect_success: Notify,
    pub on_connect_fail: NotifyWith<anyhow::Error>,
    pub on_error_message: Box<dyn Fn(&str)>,
    pub on_auto_recovery_time: Notify,
    pub on_rendered_first_frame: Notify,
    pub on_rotation_changed: NotifyWith<RotationState>,
    pub on_send_user_error: NotifyWith<PactError>,
    pub on_run_information: NotifyWith<RemoteVideoStats>,
}

impl SessionCallbacks {
    pub fn builder() -> CallbacksBuilder {
        CallbacksBuilder::default()
    }
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        CallbacksBuilder::default().build()
    }
}

#[derive(Default)]
pub struct CallbacksBuilder {
    on_connect_success: Option<Notify>,
    on_connect_fail: Option<NotifyWith<anyhow::Error>>,
    on_error_message: Option<Box<dyn Fn(&str)>>,
    on_auto_recovery_time: Option<Notify>,
    on_rendered_first_frame: Option<Notify>,
    on_rotation_changed: Option<NotifyWith<RotationState>>,
    on_send_user_error: Option<NotifyWith<PactError>>,
    on_run_information: Option<NotifyWith<RemoteVideoStats>>,
}

impl CallbacksBuilder {
    pub fn on_connect_success(mut self, f: impl Fn() + 'static) -> Self {
        self.on_connect_success = Some(Box::new(f));
        self
    }

    /// Transient connection or signaling failure. Not fatal to an
    /// established session.
    pub fn on_connect_fail(mut self, f: impl Fn(&anyhow::Error) + 'static) -> Self {
        self.on_connect_fail = Some(Box::new(f));
        self
    }

    pub fn on_error_message(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_error_message = Some(Box::new(f));
        self
    }

    /// Fired after the session stopped itself for inactivity.
    pub fn on_auto_recovery_time(mut self, f: impl Fn() + 'static) -> Self {
        self.on_auto_recovery_time = Some(Box::new(f));
        self
    }

    pub fn on_rendered_first_frame(mut self, f: impl Fn() + 'static) -> Self {
        self.on_rendered_first_frame = Some(Box::new(f));
        self
    }

    pub fn on_rotation_changed(mut self, f: impl Fn(&RotationState) + 'static) -> Self {
        self.on_rotation_changed = Some(Box::new(f));
        self
    }

    pub fn on_send_user_error(mut self, f: impl Fn(&PactError) + 'static) -> Self {
        self.on_send_user_error = Some(Box::new(f));
        self
    }

    pub fn on_run_information(mut self, f: impl Fn(&RemoteVideoStats) + 'static) -> Self {
        self.on_run_information = Some(Box::new(f));
        self
    }

    pub fn build(self) -> SessionCallbacks {
        SessionCallbacks {
            on_connect_success: self.on_connect_success.unwrap_or_else(|| Box::new(noop)),
            on_connect_fail: self
                .on_connect_fail
                .unwrap_or_else(|| Box::new(ignore::<anyhow::Error>)),
            on_error_message: self
                .on_error_message
                .unwrap_or_else(|| Box::new(ignore::<str>)),
            on_auto_recovery_time: self.on_auto_recovery_time.unwrap_or_else(|| Box::new(noop)),
            on_rendered_first_frame: self
                .on_rendered_first_frame
                .unwrap_or_else(|| Box::new(noop)),
            on_rotation_changed: self
                .on_rotation_changed
                .unwrap_or_else(|| Box::new(ignore::<RotationState>)),
            on_send_user_error: self
                .on_send_user_error
                .unwrap_or_else(|| Box::new(ignore::<PactError>)),
            on_run_information: self
                .on_run_information
                .unwrap_or_else(|| Box::new(ignore::<RemoteVideoStats>)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn unset_callbacks_are_noops() {
        let callbacks = SessionCallbacks::default();
        (callbacks.on_connect_success)();
        (callbacks.on_error_message)("ignored");
        (callbacks.on_send_user_error)(&PactError::msg("ignored"));
        (callbacks.on_run_information)(&RemoteVideoStats::default());
    }

    #[test]
    fn registered_callback_is_called() {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let callbacks = SessionCallbacks::builder()
            .on_rendered_first_frame(move || h.set(h.get() + 1))
            .build();
        (callbacks.on_rendered_first_frame)();
        (callbacks.on_auto_recovery_time)();
        assert_eq!(hits.get(), 1);
    }
}
