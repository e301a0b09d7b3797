//! Turns input snapshots into gesture messages.
//!
//! Event handlers never touch engine state directly. They capture an
//! immutable [`InputSnapshot`] and push it onto the [`InputQueue`]; the
//! session drains the queue in order into the [`GestureEngine`], so a
//! touch-down is fully processed before any move that follows it.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use phonecast_protocol::{
    ControlMessage, PointerProperties, SwipeGesture, TouchAction, TouchConfig,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::touch::TouchSample;
use crate::transform::{
    self, ElementGeometry, GeometryCache, LockedCursor, Measure, RotationState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    Mouse,
    Touch,
}

/// One contact as seen by the event handler.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub client_x: f64,
    pub client_y: f64,
    /// Element-relative position, when the event provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<f64>,
    /// Relative motion since the previous event (pointer lock only).
    #[serde(default)]
    pub movement_x: f64,
    #[serde(default)]
    pub movement_y: f64,
}

impl Contact {
    pub fn at(client_x: f64, client_y: f64) -> Self {
        Self {
            client_x,
            client_y,
            ..Self::default()
        }
    }

    pub fn offset(&self) -> Option<(f64, f64)> {
        Some((self.offset_x?, self.offset_y?))
    }
}

/// Immutable capture of one input event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InputSnapshot {
    Down {
        pointer: PointerKind,
        contacts: Vec<Contact>,
        #[serde(default)]
        pointer_locked: bool,
    },
    Move {
        pointer: PointerKind,
        contacts: Vec<Contact>,
        #[serde(default)]
        pointer_locked: bool,
    },
    Up {
        pointer: PointerKind,
        /// Touches still on the surface after this one lifted.
        #[serde(default)]
        remaining_touches: usize,
    },
    Leave,
    Wheel {
        offset_x: f64,
        offset_y: f64,
        delta_y: f64,
    },
    /// Layout change of the video element.
    Resize { geometry: ElementGeometry },
}

/// In-order, non-reentrant dispatch queue.
#[derive(Debug, Default)]
pub struct InputQueue {
    pending: RefCell<VecDeque<InputSnapshot>>,
    draining: Cell<bool>,
}

impl InputQueue {
    pub fn push(&self, snapshot: InputSnapshot) {
        self.pending.borrow_mut().push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Feed queued snapshots to `handle` in push order, including any pushed
    /// by `handle` itself. A nested call while draining returns at once; the
    /// outer drain picks the new entries up.
    pub fn drain(&self, mut handle: impl FnMut(InputSnapshot)) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        let mut handled = 0;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(snapshot) = next else { break };
            handle(snapshot);
            handled += 1;
        }
        self.draining.set(false);
        handled
    }
}

pub struct GestureEngine<R> {
    rng: R,
    disabled: bool,
    measure: Box<dyn Measure>,
    geometry: GeometryCache,
    /// The live gesture; each outbound message is a clone of it.
    live: TouchConfig,
    sample: Option<TouchSample>,
    pressed: bool,
    cursor: LockedCursor,
}

impl<R: Rng> GestureEngine<R> {
    pub fn new(rng: R, measure: Box<dyn Measure>, disabled: bool) -> Self {
        Self {
            rng,
            disabled,
            measure,
            geometry: GeometryCache::default(),
            live: TouchConfig::new(0, 0),
            sample: None,
            pressed: false,
            cursor: LockedCursor::default(),
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn live_config(&self) -> &TouchConfig {
        &self.live
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Process one snapshot, returning the message to send, if any.
    pub fn handle(
        &mut self,
        snapshot: &InputSnapshot,
        rotation: &RotationState,
    ) -> Option<ControlMessage> {
        if let InputSnapshot::Resize { geometry } = snapshot {
            self.geometry.update(*geometry);
            return None;
        }
        if self.disabled {
            return None;
        }
        match snapshot {
            InputSnapshot::Down {
                pointer,
                contacts,
                pointer_locked,
            } => self.down(*pointer, contacts, *pointer_locked, rotation),
            InputSnapshot::Move {
                pointer,
                contacts,
                pointer_locked,
            } => self.moved(*pointer, contacts, *pointer_locked, rotation),
            InputSnapshot::Up {
                pointer,
                remaining_touches,
            } => self.up(*pointer, *remaining_touches),
            InputSnapshot::Leave => self.leave(),
            InputSnapshot::Wheel {
                offset_x,
                offset_y,
                delta_y,
            } => {
                let geometry = self.geometry.get_or_measure(self.measure.as_ref());
                Some(ControlMessage::Swipe(SwipeGesture::at(
                    *offset_x,
                    *offset_y,
                    geometry.client_width,
                    geometry.client_height,
                    *delta_y,
                )))
            }
            InputSnapshot::Resize { .. } => None,
        }
    }

    fn down(
        &mut self,
        pointer: PointerKind,
        contacts: &[Contact],
        pointer_locked: bool,
        rotation: &RotationState,
    ) -> Option<ControlMessage> {
        if contacts.is_empty() {
            return None;
        }
        self.pressed = true;
        let geometry = self.geometry.refresh(self.measure.as_ref());
        let sample = TouchSample::generate(&mut self.rng);
        self.sample = Some(sample);

        let (width, height) =
            transform::surface_dims(rotation, geometry.client_width, geometry.client_height);
        self.live.action = TouchAction::Down;
        self.live.width_pixels = width;
        self.live.height_pixels = height;
        self.live.point_count = contacts.len() as u32;
        self.live.properties.clear();
        self.live.coords.clear();

        for (index, contact) in contacts.iter().enumerate() {
            self.live
                .properties
                .push(PointerProperties::finger(index as u32));
            let (x, y) = transform::map_point(
                rotation,
                &geometry.rect,
                contact.offset(),
                contact.client_x,
                contact.client_y,
            );
            if pointer == PointerKind::Mouse && pointer_locked {
                self.cursor.seed(x, y);
            }
            self.live.coords.push(sample.at(&mut self.rng, x, y));
        }

        let mut message = self.live.clone();
        if contacts.len() > 1 {
            message.action = TouchAction::MultiDown;
        }
        trace!(
            points = contacts.len(),
            width,
            height,
            angle = rotation.rotation_angle_deg(),
            "Gesture down"
        );
        Some(ControlMessage::Gesture(message))
    }

    fn moved(
        &mut self,
        pointer: PointerKind,
        contacts: &[Contact],
        pointer_locked: bool,
        rotation: &RotationState,
    ) -> Option<ControlMessage> {
        if !self.pressed || contacts.is_empty() {
            return None;
        }
        let geometry = self.geometry.get_or_measure(self.measure.as_ref());
        let sample = *self
            .sample
            .get_or_insert_with(|| TouchSample::generate(&mut self.rng));

        self.live.action = TouchAction::Move;
        self.live.point_count = contacts.len() as u32;
        self.live.coords.clear();
        for (index, contact) in contacts.iter().enumerate() {
            let properties = PointerProperties::finger(index as u32);
            match self.live.properties.get_mut(index) {
                Some(slot) => *slot = properties,
                None => self.live.properties.push(properties),
            }
            let (x, y) = if pointer == PointerKind::Mouse && pointer_locked {
                self.cursor
                    .advance(rotation, contact.movement_x, contact.movement_y)
            } else {
                transform::map_point(
                    rotation,
                    &geometry.rect,
                    contact.offset(),
                    contact.client_x,
                    contact.client_y,
                )
            };
            self.live.coords.push(sample.at(&mut self.rng, x, y));
        }
        Some(ControlMessage::Gesture(self.live.clone()))
    }

    fn up(&mut self, pointer: PointerKind, remaining_touches: usize) -> Option<ControlMessage> {
        self.pressed = false;
        if pointer == PointerKind::Touch && remaining_touches > 0 {
            return None;
        }
        self.lift()
    }

    /// Leaving the element while pressed lifts the contact on the remote.
    /// The local press stays active, so re-entering keeps dragging.
    fn leave(&mut self) -> Option<ControlMessage> {
        if !self.pressed {
            return None;
        }
        self.lift()
    }

    fn lift(&mut self) -> Option<ControlMessage> {
        if self.live.coords.is_empty() {
            return None;
        }
        self.live.action = TouchAction::Up;
        Some(ControlMessage::Gesture(self.live.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Resolution, RotateType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Fixed(ElementGeometry);

    impl Measure for Fixed {
        fn measure(&self) -> ElementGeometry {
            self.0
        }
    }

    fn engine() -> GestureEngine<StdRng> {
        GestureEngine::new(
            StdRng::seed_from_u64(1),
            Box::new(Fixed(ElementGeometry::sized(720, 1280))),
            false,
        )
    }

    fn portrait() -> RotationState {
        RotationState::new(RotateType::Portrait, Resolution::new(720, 1280))
    }

    fn mouse_down(x: f64, y: f64) -> InputSnapshot {
        InputSnapshot::Down {
            pointer: PointerKind::Mouse,
            contacts: vec![Contact::at(x, y)],
            pointer_locked: false,
        }
    }

    fn mouse_move(x: f64, y: f64) -> InputSnapshot {
        InputSnapshot::Move {
            pointer: PointerKind::Mouse,
            contacts: vec![Contact::at(x, y)],
            pointer_locked: false,
        }
    }

    fn gesture(msg: Option<ControlMessage>) -> TouchConfig {
        match msg {
            Some(ControlMessage::Gesture(config)) => config,
            other => panic!("expected gesture, got {:?}", other),
        }
    }

    #[test]
    fn down_move_up_sequence() {
        let mut e = engine();
        let rot = portrait();

        let down = gesture(e.handle(&mouse_down(10.0, 20.0), &rot));
        assert_eq!(down.action, TouchAction::Down);
        assert_eq!((down.width_pixels, down.height_pixels), (720, 1280));
        assert_eq!(down.point_count, 1);
        assert_eq!(down.properties, vec![PointerProperties::finger(0)]);
        assert_eq!((down.coords[0].x, down.coords[0].y), (10.0, 20.0));

        let mv = gesture(e.handle(&mouse_move(15.0, 25.0), &rot));
        assert_eq!(mv.action, TouchAction::Move);
        assert_eq!(mv.coords[0].touch_major, down.coords[0].touch_major);
        assert_eq!((mv.coords[0].x, mv.coords[0].y), (15.0, 25.0));

        let up = gesture(e.handle(
            &InputSnapshot::Up {
                pointer: PointerKind::Mouse,
                remaining_touches: 0,
            },
            &rot,
        ));
        assert_eq!(up.action, TouchAction::Up);
        assert_eq!((up.coords[0].x, up.coords[0].y), (15.0, 25.0));
        assert!(!e.is_pressed());
    }

    #[test]
    fn move_without_press_is_ignored() {
        let mut e = engine();
        assert!(e.handle(&mouse_move(1.0, 1.0), &portrait()).is_none());
    }

    #[test]
    fn two_fingers_send_multi_down() {
        let mut e = engine();
        let snapshot = InputSnapshot::Down {
            pointer: PointerKind::Touch,
            contacts: vec![Contact::at(10.0, 10.0), Contact::at(50.0, 60.0)],
            pointer_locked: false,
        };
        let msg = gesture(e.handle(&snapshot, &portrait()));
        assert_eq!(msg.action, TouchAction::MultiDown);
        assert_eq!(msg.point_count, 2);
        assert_eq!(msg.properties[1], PointerProperties::finger(1));
        // Live config keeps the plain down action.
        assert_eq!(e.live_config().action, TouchAction::Down);
    }

    #[test]
    fn touch_end_with_remaining_fingers_sends_nothing() {
        let mut e = engine();
        let rot = portrait();
        e.handle(&mouse_down(1.0, 1.0), &rot);
        let lifted = e.handle(
            &InputSnapshot::Up {
                pointer: PointerKind::Touch,
                remaining_touches: 1,
            },
            &rot,
        );
        assert!(lifted.is_none());
        assert!(!e.is_pressed());
    }

    #[test]
    fn leave_while_pressed_lifts() {
        let mut e = engine();
        let rot = portrait();
        assert!(e.handle(&InputSnapshot::Leave, &rot).is_none());
        e.handle(&mouse_down(5.0, 5.0), &rot);
        let up = gesture(e.handle(&InputSnapshot::Leave, &rot));
        assert_eq!(up.action, TouchAction::Up);
        assert!(e.is_pressed());
    }

    #[test]
    fn wheel_uses_client_size_and_direction() {
        let mut e = engine();
        let msg = e.handle(
            &InputSnapshot::Wheel {
                offset_x: 30.0,
                offset_y: 40.0,
                delta_y: 100.0,
            },
            &portrait(),
        );
        match msg {
            Some(ControlMessage::Swipe(swipe)) => {
                assert_eq!(swipe.swipe, -1);
                assert_eq!((swipe.width_pixels, swipe.height_pixels), (720, 1280));
                assert_eq!((swipe.coords[0].x, swipe.coords[0].y), (30.0, 40.0));
            }
            other => panic!("expected swipe, got {:?}", other),
        }
    }

    #[test]
    fn disabled_suppresses_everything_but_resize() {
        let mut e = engine();
        e.set_disabled(true);
        let rot = portrait();
        assert!(e.handle(&mouse_down(1.0, 1.0), &rot).is_none());
        assert!(
            e.handle(
                &InputSnapshot::Wheel {
                    offset_x: 0.0,
                    offset_y: 0.0,
                    delta_y: 1.0
                },
                &rot
            )
            .is_none()
        );
        e.handle(
            &InputSnapshot::Resize {
                geometry: ElementGeometry::sized(1000, 500),
            },
            &rot,
        );
        e.set_disabled(false);
        let wheel = e.handle(
            &InputSnapshot::Wheel {
                offset_x: 0.0,
                offset_y: 0.0,
                delta_y: 1.0,
            },
            &rot,
        );
        match wheel {
            Some(ControlMessage::Swipe(swipe)) => {
                assert_eq!((swipe.width_pixels, swipe.height_pixels), (1000, 500));
            }
            other => panic!("expected swipe, got {:?}", other),
        }
    }

    /// Element whose position changes without a resize, like a page scroll.
    struct Scrolling(Rc<Cell<f64>>);

    impl Measure for Scrolling {
        fn measure(&self) -> ElementGeometry {
            let mut geometry = ElementGeometry::sized(720, 1280);
            geometry.rect.top = self.0.get();
            geometry
        }
    }

    #[test]
    fn each_down_remeasures_the_element() {
        let top = Rc::new(Cell::new(0.0));
        let mut e = GestureEngine::new(
            StdRng::seed_from_u64(4),
            Box::new(Scrolling(top.clone())),
            false,
        );
        let rot = portrait();
        let up = InputSnapshot::Up {
            pointer: PointerKind::Mouse,
            remaining_touches: 0,
        };

        let first = gesture(e.handle(&mouse_down(100.0, 500.0), &rot));
        assert_eq!(first.coords[0].y, 500.0);
        e.handle(&up, &rot);

        top.set(200.0);
        let second = gesture(e.handle(&mouse_down(100.0, 500.0), &rot));
        assert_eq!(second.coords[0].y, 300.0);

        // Moves within the press reuse the rect measured at down.
        top.set(50.0);
        let mv = gesture(e.handle(&mouse_move(100.0, 600.0), &rot));
        assert_eq!(mv.coords[0].y, 400.0);
    }

    #[test]
    fn rotated_remote_maps_client_points() {
        let mut e = GestureEngine::new(
            StdRng::seed_from_u64(2),
            Box::new(Fixed(ElementGeometry::sized(1280, 720))),
            false,
        );
        let rot = RotationState::new(RotateType::Landscape, Resolution::new(720, 1280));
        let down = gesture(e.handle(&mouse_down(100.0, 200.0), &rot));
        // Portrait stream in a landscape container: x' = bottom - y, y' = x - left.
        assert_eq!((down.coords[0].x, down.coords[0].y), (520.0, 100.0));
        assert_eq!((down.width_pixels, down.height_pixels), (720, 1280));
    }

    #[test]
    fn pointer_lock_accumulates_rotated_movement() {
        let mut e = GestureEngine::new(
            StdRng::seed_from_u64(3),
            Box::new(Fixed(ElementGeometry::sized(1280, 720))),
            false,
        );
        let rot = RotationState::new(RotateType::Landscape, Resolution::new(720, 1280));
        let mut contact = Contact::at(100.0, 200.0);
        e.handle(
            &InputSnapshot::Down {
                pointer: PointerKind::Mouse,
                contacts: vec![contact],
                pointer_locked: true,
            },
            &rot,
        );
        contact.movement_x = 4.0;
        contact.movement_y = 6.0;
        let mv = gesture(e.handle(
            &InputSnapshot::Move {
                pointer: PointerKind::Mouse,
                contacts: vec![contact],
                pointer_locked: true,
            },
            &rot,
        ));
        // Seed (520, 100) plus rotated (-6, 4).
        assert_eq!((mv.coords[0].x, mv.coords[0].y), (514.0, 104.0));
    }

    #[test]
    fn sent_messages_are_snapshots() {
        let mut e = engine();
        let rot = portrait();
        let first = gesture(e.handle(&mouse_down(1.0, 2.0), &rot));
        e.handle(&mouse_move(100.0, 200.0), &rot);
        assert_eq!(first.action, TouchAction::Down);
        assert_eq!((first.coords[0].x, first.coords[0].y), (1.0, 2.0));
    }

    #[test]
    fn queue_drains_in_order_including_nested_pushes() {
        let queue = InputQueue::default();
        queue.push(InputSnapshot::Leave);
        queue.push(mouse_down(1.0, 1.0));
        let mut seen = Vec::new();
        let handled = queue.drain(|snapshot| {
            if snapshot == InputSnapshot::Leave {
                queue.push(mouse_move(2.0, 2.0));
                // Re-entrant drain is a no-op.
                assert_eq!(queue.drain(|_| panic!("nested drain ran")), 0);
            }
            seen.push(snapshot);
        });
        assert_eq!(handled, 3);
        assert_eq!(seen[0], InputSnapshot::Leave);
        assert_eq!(seen[1], mouse_down(1.0, 1.0));
        assert_eq!(seen[2], mouse_move(2.0, 2.0));
        assert!(queue.is_empty());
    }

    #[test]
    fn snapshot_trace_line_parses() {
        let line = r#"{"kind":"down","pointer":"touch","contacts":[{"clientX":5,"clientY":6,"offsetX":1,"offsetY":2}]}"#;
        let snapshot: InputSnapshot = serde_json::from_str(line).unwrap();
        match snapshot {
            InputSnapshot::Down {
                pointer: PointerKind::Touch,
                contacts,
                pointer_locked: false,
            } => assert_eq!(contacts[0].offset(), Some((1.0, 2.0))),
            other => panic!("expected touch down, got {:?}", other),
        }
        let wheel: InputSnapshot =
            serde_json::from_str(r#"{"kind":"wheel","offsetX":1,"offsetY":2,"deltaY":-3}"#)
                .unwrap();
        assert!(matches!(wheel, InputSnapshot::Wheel { .. }));
    }
}
