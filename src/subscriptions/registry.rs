//! Per-store subscription registry.
//!
//! Holds explicit subscriptions (token-addressed) and auto-subscriptions
//! (identity-addressed), both indexed by topic. Methods that change whether a
//! key is tracked return that key so the caller can fire tracking hooks after
//! releasing its lock.

use crate::error::{DispatchError, Result};
use crate::types::{Key, SubscriptionToken, Topic};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::types::{AutoSubscription, Listener};

/// An explicit subscription.
struct Subscription {
    token: SubscriptionToken,
    listener: Listener,
}

#[derive(Default)]
pub(crate) struct Registry {
    /// Explicit subscriptions by topic, in subscription order.
    subscriptions: HashMap<Topic, Vec<Subscription>>,
    /// Live tokens and the topic each one lives under.
    tokens: HashMap<SubscriptionToken, Topic>,
    /// Auto-subscriptions by topic, in tracking order.
    auto: HashMap<Topic, Vec<Arc<AutoSubscription>>>,
    /// Last issued token.
    last_token: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add an explicit subscription. Returns the new token and, if this made
    /// the store start tracking a key, that key.
    pub(crate) fn subscribe(
        &mut self,
        listener: Listener,
        topic: Topic,
    ) -> Result<(SubscriptionToken, Option<Key>)> {
        validate(&topic)?;

        self.last_token += 1;
        let token = SubscriptionToken(self.last_token);

        let list = self.subscriptions.entry(topic.clone()).or_default();
        let first = list.is_empty();
        list.push(Subscription { token, listener });
        self.tokens.insert(token, topic.clone());

        let started = if first && !self.auto.contains_key(&topic) {
            topic.as_key().cloned()
        } else {
            None
        };
        Ok((token, started))
    }

    /// Remove an explicit subscription. Returns its listener and, if the store
    /// stopped tracking a key, that key.
    pub(crate) fn unsubscribe(
        &mut self,
        token: SubscriptionToken,
    ) -> Result<(Listener, Option<Key>)> {
        let topic = self
            .tokens
            .remove(&token)
            .ok_or(DispatchError::UnknownToken(token))?;

        let list = self
            .subscriptions
            .get_mut(&topic)
            .ok_or(DispatchError::UnknownToken(token))?;
        let index = list
            .iter()
            .position(|s| s.token == token)
            .ok_or(DispatchError::UnknownToken(token))?;
        let removed = list.remove(index);

        let mut stopped = None;
        if list.is_empty() {
            self.subscriptions.remove(&topic);
            if !self.auto.contains_key(&topic) {
                stopped = topic.as_key().cloned();
            }
        }
        Ok((removed.listener, stopped))
    }

    /// Track an auto-subscription under its own topic.
    pub(crate) fn track_auto(&mut self, sub: Arc<AutoSubscription>) -> Result<Option<Key>> {
        let topic = sub.topic().clone();
        validate(&topic)?;

        let list = self.auto.entry(topic.clone()).or_default();
        let first = list.is_empty();
        list.push(sub);

        if first && !self.subscriptions.contains_key(&topic) {
            Ok(topic.as_key().cloned())
        } else {
            Ok(None)
        }
    }

    /// Remove an auto-subscription by identity.
    pub(crate) fn remove_auto(&mut self, sub: &Arc<AutoSubscription>) -> Result<Option<Key>> {
        let topic = sub.topic();
        let list = self
            .auto
            .get_mut(topic)
            .ok_or_else(|| DispatchError::SubscriptionNotFound(topic.clone()))?;

        let before = list.len();
        list.retain(|s| !Arc::ptr_eq(s, sub));
        if list.len() + 1 != before {
            return Err(DispatchError::SubscriptionNotFound(topic.clone()));
        }

        let mut stopped = None;
        if list.is_empty() {
            self.auto.remove(topic);
            if !self.subscriptions.contains_key(topic) {
                stopped = topic.as_key().cloned();
            }
        }
        Ok(stopped)
    }

    /// Listeners registered under exactly `topic`: explicit ones first, then
    /// auto-subscriptions.
    pub(crate) fn listeners_for(&self, topic: &Topic) -> Vec<Listener> {
        let explicit = self
            .subscriptions
            .get(topic)
            .into_iter()
            .flatten()
            .map(|s| s.listener.clone());
        let auto = self
            .auto
            .get(topic)
            .into_iter()
            .flatten()
            .map(|s| s.listener().clone());
        explicit.chain(auto).collect()
    }

    /// Every listener under every topic.
    pub(crate) fn all_listeners(&self) -> Vec<Listener> {
        let explicit = self
            .subscriptions
            .values()
            .flatten()
            .map(|s| s.listener.clone());
        let auto = self.auto.values().flatten().map(|s| s.listener().clone());
        explicit.chain(auto).collect()
    }

    pub(crate) fn topics(&self) -> HashSet<Topic> {
        self.subscriptions
            .keys()
            .chain(self.auto.keys())
            .cloned()
            .collect()
    }

    pub(crate) fn is_tracking(&self, topic: &Topic) -> bool {
        self.subscriptions.contains_key(topic) || self.auto.contains_key(topic)
    }

    /// Total explicit plus auto subscriptions.
    pub(crate) fn len(&self) -> usize {
        self.tokens.len() + self.auto.values().map(Vec::len).sum::<usize>()
    }
}

fn validate(topic: &Topic) -> Result<()> {
    match topic {
        Topic::Key(key) if key.is_empty() => Err(DispatchError::InvalidKey(key.to_string())),
        _ => Ok(()),
    }
}
