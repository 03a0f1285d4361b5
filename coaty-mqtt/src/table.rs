//! Subscription bookkeeping across reconnects.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use coaty::binding::EventSubscription;

/// The binding's subscription items, kept until explicit removal.
///
/// Distinct items may resolve to the same broker-level topic filter
/// (raw and external-IO-value subscriptions in particular); the broker
/// subscription is only issued for the first such item and only released
/// when no sibling remains.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    items: Vec<EventSubscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item. Returns the broker-level filter to subscribe
    /// when this is the first item resolving to it.
    pub fn add(
        &mut self,
        subscription: EventSubscription,
        namespace: &str,
        cross_namespacing: bool,
    ) -> Option<String> {
        let filter = subscription.topic_filter(namespace, cross_namespacing);
        let first = !self
            .items
            .iter()
            .any(|item| item.topic_filter(namespace, cross_namespacing) == filter);
        self.items.push(subscription);
        first.then_some(filter)
    }

    /// Remove one matching item. Returns the broker-level filter to
    /// unsubscribe when no sibling shares it.
    pub fn remove(
        &mut self,
        subscription: &EventSubscription,
        namespace: &str,
        cross_namespacing: bool,
    ) -> Option<String> {
        let position = self.items.iter().position(|item| item == subscription)?;
        let removed = self.items.remove(position);
        let filter = removed.topic_filter(namespace, cross_namespacing);
        let sibling_remains = self
            .items
            .iter()
            .any(|item| item.topic_filter(namespace, cross_namespacing) == filter);
        (!sibling_remains).then_some(filter)
    }

    /// All distinct broker-level filters, for batched resubscription on
    /// reconnect.
    pub fn unique_filters(&self, namespace: &str, cross_namespacing: bool) -> Vec<String> {
        let mut filters: Vec<String> = self
            .items
            .iter()
            .map(|item| item.topic_filter(namespace, cross_namespacing))
            .collect();
        filters.sort();
        filters.dedup();
        filters
    }

    /// Iterate the registered items for inbound dispatch.
    pub fn iter(&self) -> impl Iterator<Item = &EventSubscription> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use coaty::event::CommunicationEventType;

    #[test]
    fn test_first_item_triggers_broker_subscription() {
        let mut table = SubscriptionTable::new();
        let sub = EventSubscription::for_event(
            CommunicationEventType::Advertise,
            Some("Task".to_string()),
        );
        assert_eq!(
            table.add(sub.clone(), "-", false),
            Some("coaty/3/-/ADV:Task/+".to_string())
        );
        // A second observer of the same filter needs no broker action.
        assert_eq!(table.add(sub.clone(), "-", false), None);
        assert_eq!(table.remove(&sub, "-", false), None);
        assert_eq!(
            table.remove(&sub, "-", false),
            Some("coaty/3/-/ADV:Task/+".to_string())
        );
    }

    #[test]
    fn test_raw_and_io_value_items_share_filter_independently() {
        let mut table = SubscriptionTable::new();
        let raw = EventSubscription::raw("/external/route");
        let io = EventSubscription::io_route("/external/route", true);

        assert_eq!(table.add(raw.clone(), "-", false), Some("/external/route".to_string()));
        // The IO item shares the broker filter with the raw sibling.
        assert_eq!(table.add(io.clone(), "-", false), None);

        // Removing one sibling keeps the broker subscription alive.
        assert_eq!(table.remove(&raw, "-", false), None);
        assert_eq!(table.remove(&io, "-", false), Some("/external/route".to_string()));
    }

    #[test]
    fn test_remove_unknown_item_is_a_no_op() {
        let mut table = SubscriptionTable::new();
        let sub = EventSubscription::raw("/x");
        assert_eq!(table.remove(&sub, "-", false), None);
    }

    #[test]
    fn test_unique_filters_for_batched_resubscription() {
        let mut table = SubscriptionTable::new();
        table.add(EventSubscription::raw("/a"), "-", false);
        table.add(EventSubscription::raw("/a"), "-", false);
        table.add(EventSubscription::raw("/b"), "-", false);
        table.add(
            EventSubscription::for_event(CommunicationEventType::Discover, None),
            "-",
            false,
        );
        assert_eq!(
            table.unique_filters("-", false),
            vec![
                "/a".to_string(),
                "/b".to_string(),
                "coaty/3/-/DSC/+/+".to_string()
            ]
        );
    }
}
