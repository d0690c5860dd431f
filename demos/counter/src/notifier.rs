//! Notification plugin for the counter.
//!
//! The notifier holds at most one pending notice. Resetting the counter posts
//! one; acknowledging it clears it and emits `Delivered`, which the counter
//! sees twice: as a [`CounterEffect::Notified`] effect and as a
//! [`CounterEvent::NoticeAcknowledged`] event.

use crate::{CounterEffect, CounterEvent, CounterState};
use statepipe_core::{ContextOf, Processor};
use statepipe_runtime::{Pipeline, PluginRegistration};

/// Notice posted when the counter is reset
pub const RESET_NOTICE: &str = "Counter was reset";

/// Notifier events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    /// Post a notice, replacing any pending one
    Post(String),
    /// Acknowledge the pending notice
    Acknowledge,
}

/// Notifier effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEffect {
    /// A notice was acknowledged
    Delivered(String),
}

/// Notifier processor. Its state is the pending notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifierProcessor;

impl Processor for NotifierProcessor {
    type Event = NotifierEvent;
    type State = Option<String>;
    type Effect = NotifierEffect;

    async fn process(&self, ctx: &ContextOf<Self>, event: NotifierEvent) -> anyhow::Result<()> {
        match event {
            NotifierEvent::Post(notice) => {
                ctx.update_state(|_| Some(notice));
            },
            NotifierEvent::Acknowledge => {
                let Some(notice) = ctx.current_state() else {
                    tracing::debug!("Nothing to acknowledge");
                    return Ok(());
                };
                ctx.update_state(|_| None);
                ctx.emit_effect(NotifierEffect::Delivered(notice)).await;
            },
        }
        Ok(())
    }
}

/// Wire `notifier` into the counter through all four adapters.
#[must_use]
pub fn registration(
    notifier: &Pipeline<NotifierProcessor>,
) -> PluginRegistration<CounterEvent, CounterState, CounterEffect, NotifierProcessor> {
    PluginRegistration::new(notifier.clone())
        .map_events(|event: &CounterEvent| match event {
            CounterEvent::Reset => Some(NotifierEvent::Post(RESET_NOTICE.to_string())),
            CounterEvent::Acknowledge => Some(NotifierEvent::Acknowledge),
            _ => None,
        })
        .merge_state(|counter: &CounterState, notice: &Option<String>| CounterState {
            notice: notice.clone(),
            ..counter.clone()
        })
        .map_effects(|effect: &NotifierEffect| match effect {
            NotifierEffect::Delivered(notice) => Some(CounterEffect::Notified(notice.clone())),
        })
        .effects_to_events(|effect: &NotifierEffect| match effect {
            NotifierEffect::Delivered(_) => Some(CounterEvent::NoticeAcknowledged),
        })
        .on_unregister(|| tracing::debug!("Notifier unwired from counter"))
}
