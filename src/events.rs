//! Bounded single-producer/single-consumer event queue.
//!
//! GLFW callbacks feed a ring buffer instead of dispatching directly,
//! so the windowing layer (producer) and the application's poll loop
//! (consumer) can be two distinct call sites on the same thread.

use thiserror::Error;

/// Queue capacity.
pub const CAPACITY: usize = 1024;

/// Keyboard/mouse button action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Key or button pressed.
    Press,
    /// Key or button released.
    Release,
    /// Key auto-repeated while held.
    Repeat,
}

/// Input-originated events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// A keyboard key changed state.
    Key { key_code: i32, scancode: i32, action: Action, mods: i32 },
    /// A mouse button changed state.
    MouseButton { button: i32, action: Action, mods: i32 },
    /// The cursor moved, in window-space coordinates.
    CursorMoved { x: f64, y: f64 },
    /// The scroll wheel moved.
    Scroll { x_offset: f64, y_offset: f64 },
    /// A Unicode codepoint was typed.
    CharTyped { codepoint: u32 },
}

/// Window-originated events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowEvent {
    /// The framebuffer was resized.
    Resized { width: u32, height: u32 },
    /// The window gained or lost input focus.
    FocusChanged { focused: bool },
    /// The user requested the window be closed.
    CloseRequested,
    /// The window was minimized or restored.
    Minimized { minimized: bool },
}

/// Monitor hot-plug events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A monitor was connected.
    Connected,
    /// A monitor was disconnected.
    Disconnected,
}

/// Joystick/gamepad hot-plug events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickEvent {
    /// A joystick was connected, identified by its GLFW joystick index.
    Connected { joystick_id: i32 },
    /// A joystick was disconnected.
    Disconnected { joystick_id: i32 },
}

/// The tagged union of everything the windowing layer can produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Input subsystem event.
    Input(InputEvent),
    /// Window subsystem event.
    Window(WindowEvent),
    /// Monitor subsystem event.
    Monitor(MonitorEvent),
    /// Joystick subsystem event.
    Joystick(JoystickEvent),
}

/// Errors from the event queue.
#[derive(Debug, Error)]
pub enum EventQueueError {
    /// A `push` would have made `head` catch up to `tail`: the consumer
    /// isn't draining fast enough. Treated as fatal rather than
    /// silently dropping the event.
    #[error("event queue overflow: capacity {capacity} exceeded")]
    Overflow {
        /// Queue capacity at the time of overflow.
        capacity: usize,
    },
}

/// A fixed-capacity ring buffer of [`Event`]s. The windowing layer is
/// the sole producer (`push`); application code is the sole consumer
/// (`next_event`).
pub struct EventQueue {
    slots: Box<[Option<Event>; CAPACITY]>,
    head: usize,
    tail: usize,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { slots: Box::new([None; CAPACITY]), head: 0, tail: 0 }
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        (self.head + CAPACITY - self.tail) % CAPACITY
    }

    /// Whether the queue holds no events.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Push one event. Errors if this write would make `head` re-equal
    /// `tail` (indistinguishable from empty) -- a hard overflow, not a
    /// silent drop.
    pub fn push(&mut self, event: Event) -> Result<(), EventQueueError> {
        let next_head = (self.head + 1) % CAPACITY;
        if next_head == self.tail {
            return Err(EventQueueError::Overflow { capacity: CAPACITY });
        }
        self.slots[self.head] = Some(event);
        self.head = next_head;
        Ok(())
    }

    /// Pop the next event, if any.
    pub fn next_event(&mut self) -> Option<Event> {
        if self.head == self.tail {
            return None;
        }
        let event = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % CAPACITY;
        event
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let mut q = EventQueue::new();
        q.push(Event::Window(WindowEvent::CloseRequested)).unwrap();
        q.push(Event::Monitor(MonitorEvent::Connected)).unwrap();
        assert_eq!(q.next_event(), Some(Event::Window(WindowEvent::CloseRequested)));
        assert_eq!(q.next_event(), Some(Event::Monitor(MonitorEvent::Connected)));
        assert_eq!(q.next_event(), None);
    }

    #[test]
    fn empty_means_head_equals_tail() {
        let q = EventQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn overflow_is_fatal_one_slot_before_wrap() {
        let mut q = EventQueue::new();
        for _ in 0..CAPACITY - 1 {
            q.push(Event::Monitor(MonitorEvent::Connected)).unwrap();
        }
        // One more write would make head == tail again.
        let result = q.push(Event::Monitor(MonitorEvent::Connected));
        assert!(matches!(result, Err(EventQueueError::Overflow { capacity }) if capacity == CAPACITY));
    }

    #[test]
    fn draining_then_refilling_reuses_slots() {
        let mut q = EventQueue::new();
        for _ in 0..CAPACITY - 1 {
            q.push(Event::Monitor(MonitorEvent::Connected)).unwrap();
        }
        for _ in 0..CAPACITY - 1 {
            assert!(q.next_event().is_some());
        }
        assert!(q.is_empty());
        q.push(Event::Monitor(MonitorEvent::Disconnected)).unwrap();
        assert_eq!(q.next_event(), Some(Event::Monitor(MonitorEvent::Disconnected)));
    }
}
