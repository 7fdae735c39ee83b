use crate::event::PostedEvent;
use crate::registry::group::HandlerGroup;
use crate::registry::listener::Listener;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Runtime pairing of a listener with one of its handler groups.
///
/// Identity is `(listener pointer, group index)`; the registry uses it to
/// keep registration idempotent and to drop every subscriber of a
/// listener on unregister.
pub struct Subscriber {
    listener: Arc<Listener>,
    group_index: usize,
    /// Present unless the group opted into concurrent invocation; held
    /// for the whole three-phase run.
    serialize: Option<Mutex<()>>,
    /// FIFO lane used by the pooled dispatcher.
    lane: Mutex<LaneState>,
}

#[derive(Default)]
pub(crate) struct LaneState {
    pub(crate) queue: VecDeque<PostedEvent>,
    pub(crate) scheduled: bool,
}

impl Subscriber {
    pub(crate) fn new(listener: Arc<Listener>, group_index: usize) -> Arc<Self> {
        let concurrent = listener.groups()[group_index].concurrent_safe();
        Arc::new(Self {
            listener,
            group_index,
            serialize: if concurrent { None } else { Some(Mutex::new(())) },
            lane: Mutex::new(LaneState::default()),
        })
    }

    pub(crate) fn group(&self) -> &HandlerGroup {
        &self.listener.groups()[self.group_index]
    }

    pub(crate) fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    pub(crate) fn listener_ptr(&self) -> usize {
        Arc::as_ptr(&self.listener) as *const () as usize
    }

    pub(crate) fn serialize(&self) -> Option<&Mutex<()>> {
        self.serialize.as_ref()
    }

    pub(crate) fn lane(&self) -> &Mutex<LaneState> {
        &self.lane
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("listener", &self.listener.label())
            .field("event", &self.group().event_label())
            .finish()
    }
}
