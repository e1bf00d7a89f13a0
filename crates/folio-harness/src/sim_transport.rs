//! In-memory channel transport with failure injection.
//!
//! Records every open and close so tests can assert on channel lifecycle,
//! and lets tests push status and payload events into any open channel.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use folio_client::{ChannelSink, ChannelTransport};
use folio_core::{
    ChannelEvent, ChannelId, ChannelSpec, ChannelStatus, PayloadKind, TransportError,
};

struct OpenChannel {
    spec: ChannelSpec,
    sink: ChannelSink,
}

struct TransportState {
    open: BTreeMap<ChannelId, OpenChannel>,
    opened: Vec<(ChannelId, ChannelSpec)>,
    closed: Vec<ChannelId>,
    refuse_opens: usize,
    auto_subscribe: bool,
}

/// Simulated push transport.
///
/// Clones share state. By default every open succeeds and is acknowledged
/// with `Subscribed` right away.
#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<TransportState>>,
}

impl SimTransport {
    /// Transport that acknowledges every channel.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                open: BTreeMap::new(),
                opened: Vec::new(),
                closed: Vec::new(),
                refuse_opens: 0,
                auto_subscribe: true,
            })),
        }
    }

    /// Leave channels in `Connecting` until a test emits `Subscribed`.
    pub fn manual_ack(self) -> Self {
        self.state().auto_subscribe = false;
        self
    }

    /// Refuse the next `count` opens with a transport error.
    pub fn refuse_next_opens(&self, count: usize) {
        self.state().refuse_opens = count;
    }

    /// Currently open channels with their specs.
    pub fn open_channels(&self) -> Vec<(ChannelId, ChannelSpec)> {
        self.state().open.iter().map(|(id, ch)| (*id, ch.spec.clone())).collect()
    }

    /// Every successful open so far, in order.
    pub fn opened(&self) -> Vec<(ChannelId, ChannelSpec)> {
        self.state().opened.clone()
    }

    /// Number of successful opens so far.
    pub fn opened_total(&self) -> usize {
        self.state().opened.len()
    }

    /// Every close so far, in order.
    pub fn closed(&self) -> Vec<ChannelId> {
        self.state().closed.clone()
    }

    /// Most recently opened channel that is still open.
    pub fn current(&self) -> Option<ChannelId> {
        let state = self.state();
        state.opened.iter().rev().map(|(id, _)| *id).find(|id| state.open.contains_key(id))
    }

    /// Deliver a lifecycle status on an open channel.
    ///
    /// Returns `false` if the channel is not open or its hub has stopped.
    pub fn emit_status(&self, channel: ChannelId, status: ChannelStatus) -> bool {
        self.emit(ChannelEvent::status(channel, status))
    }

    /// Deliver a row change on an open channel.
    pub fn emit_payload(&self, channel: ChannelId, kind: PayloadKind) -> bool {
        self.emit(ChannelEvent::payload(channel, kind))
    }

    fn emit(&self, event: ChannelEvent) -> bool {
        let state = self.state();
        state.open.get(&event.channel).is_some_and(|open| open.sink.send(event))
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelTransport for SimTransport {
    async fn open(
        &self,
        channel: ChannelId,
        spec: ChannelSpec,
        events: ChannelSink,
    ) -> Result<(), TransportError> {
        let mut state = self.state();

        if state.refuse_opens > 0 {
            state.refuse_opens -= 1;
            return Err(TransportError::Open { channel, reason: "simulated refusal".into() });
        }

        if state.auto_subscribe {
            events.send(ChannelEvent::status(channel, ChannelStatus::Subscribed));
        }
        state.opened.push((channel, spec.clone()));
        state.open.insert(channel, OpenChannel { spec, sink: events });
        Ok(())
    }

    async fn close(&self, channel: ChannelId) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.open.remove(&channel).is_some() {
            state.closed.push(channel);
        }
        Ok(())
    }
}
